//! Shared test support: a mock connection and credential fixtures.

#![allow(dead_code)]

use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use nkeys::KeyPair;
use rustls::pki_types::CertificateDer;

use lattice_auth::account::Account;
use lattice_auth::auth::jwt::UserClaims;
use lattice_auth::auth::user::{NkeyUser, User};
use lattice_auth::connection::{
    ClientAuthentication, ClientKind, ConnectOpts, TlsConnectionState,
};
use lattice_auth::error::AuthResult;

/// The nonce handed to mock connections.
pub const NONCE: &[u8] = b"lattice-test-nonce";

/// A scriptable connection that records what the orchestrator does to it.
pub struct MockConnection {
    pub kind: ClientKind,
    pub opts: ConnectOpts,
    pub tls: Option<TlsConnectionState>,
    pub nonce: Vec<u8>,
    pub websocket: bool,
    pub registered_user: Option<Arc<User>>,
    pub registered_nkey_user: Option<Arc<NkeyUser>>,
    pub bound_account: Option<Arc<Account>>,
    pub public_key: Option<String>,
    pub expiration_claims: Option<UserClaims>,
    /// Invoked from registration callbacks, outside the service lock.
    pub on_register: Option<Box<dyn FnMut() + Send>>,
}

impl MockConnection {
    pub fn new(kind: ClientKind) -> Self {
        Self {
            kind,
            opts: ConnectOpts::default(),
            tls: None,
            nonce: NONCE.to_vec(),
            websocket: false,
            registered_user: None,
            registered_nkey_user: None,
            bound_account: None,
            public_key: None,
            expiration_claims: None,
            on_register: None,
        }
    }

    pub fn client() -> Self {
        Self::new(ClientKind::Client)
    }

    pub fn with_user_pass(mut self, username: &str, password: &str) -> Self {
        self.opts.username = username.to_string();
        self.opts.password = password.to_string();
        self
    }

    pub fn with_token(mut self, token: &str) -> Self {
        self.opts.token = token.to_string();
        self
    }

    pub fn with_jwt(mut self, jwt: &str) -> Self {
        self.opts.jwt = jwt.to_string();
        self
    }

    pub fn with_nkey(mut self, key: &KeyPair) -> Self {
        self.opts.nkey = key.public_key();
        self.opts.sig = sign_nonce(key, &self.nonce);
        self
    }

    pub fn with_nonce_sig(mut self, user_key: &KeyPair) -> Self {
        self.opts.sig = sign_nonce(user_key, &self.nonce);
        self
    }

    pub fn with_tls(mut self, state: TlsConnectionState) -> Self {
        self.tls = Some(state);
        self
    }

    pub fn over_websocket(mut self) -> Self {
        self.websocket = true;
        self
    }

    fn fire_register_hook(&mut self) {
        if let Some(hook) = self.on_register.as_mut() {
            hook();
        }
    }
}

impl ClientAuthentication for MockConnection {
    fn kind(&self) -> ClientKind {
        self.kind
    }

    fn connect_opts(&self) -> &ConnectOpts {
        &self.opts
    }

    fn connect_opts_mut(&mut self) -> &mut ConnectOpts {
        &mut self.opts
    }

    fn tls_state(&self) -> Option<&TlsConnectionState> {
        self.tls.as_ref()
    }

    fn nonce(&self) -> &[u8] {
        &self.nonce
    }

    fn is_websocket(&self) -> bool {
        self.websocket
    }

    fn set_public_key(&mut self, key: &str) {
        self.public_key = Some(key.to_string());
    }

    fn register_user(&mut self, user: Arc<User>) {
        self.bound_account = user.account.clone();
        self.registered_user = Some(user);
        self.fire_register_hook();
    }

    fn register_nkey_user(&mut self, user: Arc<NkeyUser>) -> AuthResult<()> {
        self.bound_account = user.account.clone();
        self.registered_nkey_user = Some(user);
        self.fire_register_hook();
        Ok(())
    }

    fn register_with_account(&mut self, account: Arc<Account>) -> AuthResult<()> {
        self.bound_account = Some(account);
        self.fire_register_hook();
        Ok(())
    }

    fn check_expiration(&mut self, claims: &UserClaims) {
        self.expiration_claims = Some(claims.clone());
    }
}

/// Sign the nonce the way a client library would.
pub fn sign_nonce(key: &KeyPair, nonce: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(key.sign(nonce).expect("signing key"))
}

/// Encode and sign user claims as a three-segment JWT.
pub fn sign_user_jwt(issuer: &KeyPair, claims: &UserClaims) -> String {
    let header = serde_json::json!({"typ": "JWT", "alg": "ed25519-nkey"});
    let encoded_header = URL_SAFE_NO_PAD.encode(serde_json::to_string(&header).unwrap());
    let encoded_payload = URL_SAFE_NO_PAD.encode(serde_json::to_string(claims).unwrap());
    let signing_input = format!("{encoded_header}.{encoded_payload}");
    let sig = issuer.sign(signing_input.as_bytes()).expect("signing key");
    format!("{signing_input}.{}", URL_SAFE_NO_PAD.encode(sig))
}

/// Baseline user claims issued by `issuer` for `user`.
pub fn user_claims(issuer: &KeyPair, user: &KeyPair) -> UserClaims {
    UserClaims {
        iat: unix_now(),
        iss: issuer.public_key(),
        sub: user.public_key(),
        name: "test-user".to_string(),
        ..UserClaims::default()
    }
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs()
}

/// Build TLS state from a PEM certificate fixture.
pub fn tls_state_from_pem(pem: &str) -> TlsConnectionState {
    let (_, parsed) = x509_parser::pem::parse_x509_pem(pem.as_bytes()).expect("valid PEM");
    TlsConnectionState {
        peer_certificates: vec![CertificateDer::from(parsed.contents)],
    }
}

/// Self-signed certificate with SAN `DNS:host.example` (CN=san-user).
pub const DNS_SAN_CERT: &str = "\
-----BEGIN CERTIFICATE-----
MIIBVDCCAQagAwIBAgIUDMCyPPjW1ciWi4y78W9nLcknTmowBQYDK2VwMBMxETAP
BgNVBAMMCHNhbi11c2VyMB4XDTI2MDgwMjA2NTY0MVoXDTQ2MDcyODA2NTY0MVow
EzERMA8GA1UEAwwIc2FuLXVzZXIwKjAFBgMrZXADIQCwD7eN0qU2aeX6fzK4cIta
rQRDYGnj7/tPxuc5yPbGIqNsMGowHQYDVR0OBBYEFP+HOrzstLyWU9mcLNp243o0
SFuhMB8GA1UdIwQYMBaAFP+HOrzstLyWU9mcLNp243o0SFuhMA8GA1UdEwEB/wQF
MAMBAf8wFwYDVR0RBBAwDoIMaG9zdC5leGFtcGxlMAUGAytlcANBADALtUJy6Rcg
6dPx0gAHrpkFBzoSKDzRM/TlV4TlL30ElEMbEi7yWPFBd74sInivcWlF+dGMlULi
2PUOrOYiZw8=
-----END CERTIFICATE-----
";
