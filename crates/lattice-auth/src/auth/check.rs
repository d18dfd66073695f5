//! The authentication orchestrator.
//!
//! [`AuthService`] owns the replaceable user tables, the trusted operator
//! keys, the account registry, and the resolver handle. A connection is
//! checked by dispatching on its kind; client and leaf connections run the
//! credential precedence ladder.
//!
//! # Locking
//!
//! The coarse service mutex is held only to select the effective credential
//! set and snapshot the user or nkey candidate. It is explicitly dropped
//! before bcrypt comparison, nkey signature verification, account resolver
//! calls, and JWT account checks, so latency-variable work never blocks the
//! server. Connection registration callbacks are invoked lock-free.

use std::sync::{Arc, Mutex};

use tracing::{debug, error, warn};

use crate::account::{Account, AccountRegistry, AccountResolver, GLOBAL_ACCOUNT_NAME};
use crate::auth::credentials::{select_credentials, ws_config_auth, AuthState};
use crate::auth::jwt::{decode_user_claims, verify_nonce_signature, UserClaims};
use crate::auth::password::compare_passwords;
use crate::auth::registry::{build_nkeys_and_users, has_plaintext_passwords};
use crate::auth::tls_identity::check_client_tls_cert_subject;
use crate::auth::user::{NkeyUser, User};
use crate::config::{validate_auth, Options};
use crate::connection::{
    Authentication, ClientAuthentication, ClientKind, EventSink, LogEventSink,
};
use crate::error::{AuthError, AuthResult, ConfigResult};

/// The connection authentication service.
///
/// One instance lives for the lifetime of an options snapshot; the broker
/// constructs a new service (and swaps the handle) on reconfiguration.
#[derive(Debug)]
pub struct AuthService {
    options: Options,
    trusted_keys: Vec<String>,
    accounts: AccountRegistry,
    global_account: Arc<Account>,
    resolver: Arc<dyn AccountResolver>,
    events: Arc<dyn EventSink>,
    state: Mutex<AuthState>,
}

impl AuthService {
    /// Create a service from validated options.
    ///
    /// # Errors
    ///
    /// Returns a [`crate::error::ConfigError`] when the options fail
    /// validation.
    pub fn new(options: Options, resolver: Arc<dyn AccountResolver>) -> ConfigResult<Self> {
        validate_auth(&options)?;
        let accounts = AccountRegistry::new();
        let global_account = Arc::new(Account::new(GLOBAL_ACCOUNT_NAME));
        accounts.store(Arc::clone(&global_account));
        let trusted_keys = options.trusted_operators.clone();
        let service = Self {
            options,
            trusted_keys,
            accounts,
            global_account,
            resolver,
            events: Arc::new(LogEventSink),
            state: Mutex::new(AuthState::default()),
        };
        service.configure_authorization();
        Ok(service)
    }

    /// Replace the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The concurrent account registry.
    #[must_use]
    pub fn accounts(&self) -> &AccountRegistry {
        &self.accounts
    }

    /// The default global account.
    #[must_use]
    pub fn global_account(&self) -> &Arc<Account> {
        &self.global_account
    }

    /// Whether client connections must authenticate.
    #[must_use]
    pub fn auth_required(&self) -> bool {
        self.state.lock().unwrap().auth_required
    }

    /// Build the user tables from the options and swap them in atomically.
    ///
    /// Called at construction; callable again once accounts have been
    /// registered so that declared account names rebind to registry
    /// entries.
    pub fn configure_authorization(&self) {
        let options = &self.options;
        let mut state = AuthState::default();

        if options.custom_client_authentication.is_some() {
            state.auth_required = true;
        } else if !self.trusted_keys.is_empty() {
            state.auth_required = true;
        } else if !options.nkeys.is_empty() || !options.users.is_empty() {
            let (nkeys, users) = build_nkeys_and_users(
                &options.nkeys,
                &options.users,
                &self.accounts,
                &self.global_account,
            );
            state.nkeys = nkeys;
            state.users = users;
            state.auth_required = true;
        } else if !options.username().is_empty() || !options.authorization().is_empty() {
            state.auth_required = true;
        }

        state.websocket =
            ws_config_auth(&options.websocket, &self.accounts, &self.global_account);

        if has_plaintext_passwords(&options.password(), state.users.as_ref(), options.tls_map) {
            warn!("plaintext passwords detected, use nkeys or bcrypt");
        }

        *self.state.lock().unwrap() = state;
    }

    /// Check whether a connection is authorized, dispatching on its kind.
    pub fn check_authentication(&self, client: &mut dyn ClientAuthentication) -> bool {
        match client.kind() {
            ClientKind::Client => self.is_client_authorized(client),
            ClientKind::Router => self.is_router_authorized(client),
            ClientKind::Gateway => self.is_gateway_authorized(client),
            ClientKind::Leaf => self.is_leaf_authorized(client),
        }
    }

    /// Authorize a client connection: custom authenticator first, then the
    /// client/leaf precedence ladder.
    fn is_client_authorized(&self, client: &mut dyn ClientAuthentication) -> bool {
        if let Some(custom) = &self.options.custom_client_authentication {
            return custom.check(client);
        }
        self.process_client_or_leaf_authentication(client)
    }

    /// Authorize a route connection from a peer broker.
    fn is_router_authorized(&self, client: &mut dyn ClientAuthentication) -> bool {
        let cluster = &self.options.cluster;
        if let Some(custom) = &cluster.custom_router_authentication {
            return custom.check(client);
        }
        if cluster.username.is_empty() {
            return true;
        }
        if cluster.tls_map {
            return check_client_tls_cert_subject(client, |identity| {
                cluster.username == identity
            });
        }
        if cluster.username != client.connect_opts().username {
            debug!(kind = %client.kind(), "router username mismatch");
            return false;
        }
        if !compare_passwords(&cluster.password(), &client.connect_opts().password) {
            debug!(error = %AuthError::PasswordMismatch, "router authentication failed");
            return false;
        }
        true
    }

    /// Authorize a gateway connection from a cross-cluster peer.
    fn is_gateway_authorized(&self, client: &mut dyn ClientAuthentication) -> bool {
        let gateway = &self.options.gateway;
        if gateway.username.is_empty() {
            return true;
        }
        if gateway.tls_map {
            return check_client_tls_cert_subject(client, |identity| {
                gateway.username == identity
            });
        }
        if gateway.username != client.connect_opts().username {
            debug!(kind = %client.kind(), "gateway username mismatch");
            return false;
        }
        let ok = compare_passwords(&gateway.password(), &client.connect_opts().password);
        if !ok {
            debug!(error = %AuthError::PasswordMismatch, "gateway authentication failed");
        }
        ok
    }

    /// Authorize an inbound leaf connection.
    fn is_leaf_authorized(&self, client: &mut dyn ClientAuthentication) -> bool {
        let leaf = &self.options.leafnode;

        // A single configured username takes precedence; the connection
        // binds to the configured account.
        if !leaf.username.is_empty() {
            return self.leaf_credentials_match(client, &leaf.username, &leaf.password(), &leaf.account);
        }
        if !leaf.users.is_empty() {
            // This is expected to be a very small list.
            for user in &leaf.users {
                if user.username == client.connect_opts().username {
                    let account = user.account.clone().unwrap_or_default();
                    return self.leaf_credentials_match(
                        client,
                        &user.username,
                        &user.password,
                        &account,
                    );
                }
            }
            debug!(
                username = %client.connect_opts().username,
                "leaf user not found"
            );
            return false;
        }

        // No leaf credentials are required; fall through so that CONNECT
        // credentials (if any) can still bind an account.
        self.process_client_or_leaf_authentication(client)
    }

    fn leaf_credentials_match(
        &self,
        client: &mut dyn ClientAuthentication,
        username: &str,
        password: &str,
        account: &str,
    ) -> bool {
        if username != client.connect_opts().username {
            debug!(username = %client.connect_opts().username, "leaf username mismatch");
            return false;
        }
        if !compare_passwords(password, &client.connect_opts().password) {
            debug!(error = %AuthError::PasswordMismatch, "leaf authentication failed");
            return false;
        }
        self.register_leaf_with_account(client, account)
    }

    /// Bind a leaf connection to the named account, or the global account
    /// when no name is given.
    fn register_leaf_with_account(
        &self,
        client: &mut dyn ClientAuthentication,
        account: &str,
    ) -> bool {
        let acc = if account.is_empty() {
            Arc::clone(&self.global_account)
        } else {
            match self.resolver.lookup_account(account) {
                Ok(acc) => acc,
                Err(err) => {
                    error!(
                        username = %client.connect_opts().username,
                        account = %account,
                        error = %err,
                        "authentication failed, unable to lookup account"
                    );
                    return false;
                }
            }
        };
        client.register_with_account(acc).is_ok()
    }

    /// The client/leaf credential precedence ladder.
    fn process_client_or_leaf_authentication(
        &self,
        client: &mut dyn ClientAuthentication,
    ) -> bool {
        let mut nkey_user: Option<Arc<NkeyUser>> = None;
        let mut user: Option<Arc<User>> = None;
        let mut user_claims: Option<UserClaims> = None;

        let state = self.state.lock().unwrap();
        let Some(auth) = select_credentials(&self.options, &state, client.is_websocket()) else {
            drop(state);
            return true;
        };

        // With trusted operator keys configured we require a user JWT (or
        // an nkey that the generated-account path can serve).
        if !self.trusted_keys.is_empty() {
            let opts = client.connect_opts();
            if opts.jwt.is_empty()
                && (opts.nkey.is_empty() || self.options.system_account.is_empty())
            {
                drop(state);
                debug!(error = %AuthError::MissingCredentials, "client authentication failed");
                return false;
            }
            if !opts.jwt.is_empty() {
                let claims = match decode_user_claims(&opts.jwt) {
                    Ok(claims) => claims,
                    Err(err) => {
                        drop(state);
                        debug!(error = %err, "user JWT not valid");
                        return false;
                    }
                };
                let results = claims.validate();
                if results.is_blocking(true) {
                    drop(state);
                    debug!(issues = ?results.issues, "user JWT no longer valid");
                    return false;
                }
                user_claims = Some(claims);
            }
        }

        // Snapshot the user or nkey candidate while the lock is held.
        let has_nkeys = auth.nkeys.is_some();
        let has_users = auth.users.is_some();
        if has_nkeys && !client.connect_opts().nkey.is_empty() {
            let nkeys = auth.nkeys.as_ref().unwrap();
            match nkeys.get(&client.connect_opts().nkey) {
                Some(found) => nkey_user = Some(Arc::clone(found)),
                // With a system account configured the miss is advisory:
                // the generated-account path below may still produce a
                // binding.
                None if self.options.system_account.is_empty() => {
                    drop(state);
                    debug!(
                        error = %AuthError::PrincipalUnknown(client.connect_opts().nkey.clone()),
                        "client authentication failed"
                    );
                    return false;
                }
                None => {}
            }
        } else if has_users {
            let users = auth.users.as_ref().unwrap();
            if auth.tls_map {
                let mut cert_user = String::new();
                let authorized = check_client_tls_cert_subject(&*client, |identity| {
                    match users.get(identity) {
                        Some(found) => {
                            user = Some(Arc::clone(found));
                            cert_user = identity.to_string();
                            true
                        }
                        None => {
                            debug!(identity = %identity, "user in cert not found");
                            false
                        }
                    }
                });
                if !authorized {
                    drop(state);
                    debug!(error = %AuthError::TlsIdentityUnmapped, "client authentication failed");
                    return false;
                }
                if !client.connect_opts().username.is_empty() {
                    warn!(
                        username = %client.connect_opts().username,
                        "user found in connect proto, but user required from cert"
                    );
                }
                // Adopt the certificate identity so the connection is
                // identifiable in the logs.
                client.connect_opts_mut().username = cert_user;
            } else {
                if client.kind() == ClientKind::Client
                    && client.connect_opts().username.is_empty()
                    && !auth.no_auth_user.is_empty()
                {
                    if let Some(no_auth) = users.get(&auth.no_auth_user) {
                        let opts = client.connect_opts_mut();
                        opts.username = no_auth.username.clone();
                        opts.password = no_auth.password.clone();
                    }
                }
                if !client.connect_opts().username.is_empty() {
                    match users.get(&client.connect_opts().username) {
                        Some(found) => user = Some(Arc::clone(found)),
                        None => {
                            let username = client.connect_opts().username.clone();
                            drop(state);
                            debug!(
                                error = %AuthError::PrincipalUnknown(username),
                                "client authentication failed"
                            );
                            return false;
                        }
                    }
                }
            }
        }
        // Release the server lock before any cryptographic or account
        // resolution work below.
        drop(state);

        if let Some(claims) = user_claims {
            return self.authorize_user_jwt(client, &claims);
        }

        if nkey_user.is_none()
            && client.kind() == ClientKind::Client
            && !client.connect_opts().nkey.is_empty()
            && !self.options.system_account.is_empty()
        {
            nkey_user = self.generated_account_nkey_user(&*client);
        }

        if let Some(nkey) = nkey_user {
            let opts = client.connect_opts();
            if opts.sig.is_empty() {
                debug!("signature missing");
                return false;
            }
            if let Err(err) = verify_nonce_signature(&opts.nkey, client.nonce(), &opts.sig) {
                debug!(error = %err, "nkey authentication failed");
                return false;
            }
            return client.register_nkey_user(nkey).is_ok();
        }

        if let Some(user) = user {
            let ok = compare_passwords(&user.password, &client.connect_opts().password);
            if ok {
                // Registration sets up any pub/sub permissions.
                client.register_user(Arc::clone(&user));
                self.account_connect_event(&user.username);
            } else {
                debug!(
                    username = %user.username,
                    error = %AuthError::PasswordMismatch,
                    "client authentication failed"
                );
            }
            return ok;
        }

        match client.kind() {
            ClientKind::Client => {
                if !auth.token.is_empty() {
                    let ok = compare_passwords(&auth.token, &client.connect_opts().token);
                    if !ok {
                        debug!(error = %AuthError::PasswordMismatch, "token authentication failed");
                    }
                    return ok;
                } else if !auth.username.is_empty() {
                    if auth.username != client.connect_opts().username {
                        debug!(
                            username = %client.connect_opts().username,
                            "static username mismatch"
                        );
                        return false;
                    }
                    let ok = compare_passwords(&auth.password, &client.connect_opts().password);
                    if !ok {
                        debug!(error = %AuthError::PasswordMismatch, "client authentication failed");
                    }
                    return ok;
                }
            }
            ClientKind::Leaf => {
                // No required credentials and nothing in the CONNECT
                // matched; bind to the configured or global account.
                return self.register_leaf_with_account(client, &self.options.leafnode.account);
            }
            _ => {}
        }

        debug!(kind = %client.kind(), "no authentication method applies");
        false
    }

    /// Resolve and check the issuing account for verified user claims, then
    /// bind the connection. Runs without the service lock.
    fn authorize_user_jwt(
        &self,
        client: &mut dyn ClientAuthentication,
        claims: &UserClaims,
    ) -> bool {
        let account = match self.lookup_user_jwt_account(claims) {
            Ok(account) => account,
            Err(err) => {
                debug!(error = %err, "user JWT rejected");
                return false;
            }
        };

        // Bearer tokens skip the nonce signature; everything else must
        // prove possession of the subject key.
        if !claims.lattice.bearer_token {
            let opts = client.connect_opts();
            if opts.sig.is_empty() {
                debug!("signature missing");
                return false;
            }
            if let Err(err) = verify_nonce_signature(&claims.sub, client.nonce(), &opts.sig) {
                debug!(error = %err, "user JWT signature rejected");
                return false;
            }
        }
        if account.check_user_revoked(&claims.sub) {
            debug!(error = %AuthError::UserRevoked, subject = %claims.sub, "user JWT rejected");
            return false;
        }

        let nkey = Arc::new(NkeyUser::from_claims(claims, account));
        if client.register_nkey_user(nkey).is_err() {
            return false;
        }
        // Hold onto the user's public key for later identification.
        client.set_public_key(&claims.sub);
        self.account_connect_event(&claims.sub);
        // Arm an expiration timer if the user JWT expires.
        client.check_expiration(claims);
        true
    }

    fn lookup_user_jwt_account(&self, claims: &UserClaims) -> AuthResult<Arc<Account>> {
        let issuer = claims
            .lattice
            .issuer_account
            .as_deref()
            .unwrap_or(&claims.iss);
        let account = self.resolver.lookup_account(issuer)?;
        if !self.is_trusted_issuer(&account.issuer) {
            return Err(AuthError::UntrustedIssuer);
        }
        if claims.lattice.issuer_account.is_some() && !account.has_issuer(&claims.iss) {
            return Err(AuthError::IssuerAccountMismatch);
        }
        if account.is_expired() {
            return Err(AuthError::AccountExpired);
        }
        Ok(account)
    }

    /// Materialize (or adopt) the generated account named by the CONNECT
    /// nkey and build its user. Runs without the service lock.
    fn generated_account_nkey_user(
        &self,
        client: &dyn ClientAuthentication,
    ) -> Option<Arc<NkeyUser>> {
        let nkey = client.connect_opts().nkey.clone();
        let account = if let Some(existing) = self.accounts.load(&nkey) {
            debug!(account = %existing.name, "found generated account");
            existing
        } else {
            let system = match self.resolver.lookup_account(&self.options.system_account) {
                Ok(system) => system,
                Err(err) => {
                    debug!(error = %err, "account JWT lookup error");
                    return None;
                }
            };
            let mut claims = match self.resolver.verify_account_claims(&system.claim_jwt()) {
                Ok(claims) => claims,
                Err(err) => {
                    debug!(error = %err, "account JWT verification failed");
                    return None;
                }
            };
            claims.name = nkey.clone();
            claims.sub = nkey.clone();
            let claim_jwt = match claims.to_json() {
                Ok(json) => json,
                Err(err) => {
                    debug!(error = %err, "account claim serialization failed");
                    return None;
                }
            };
            let built = self.resolver.build_internal_account(&claims);
            built.set_claim_jwt(&claim_jwt);
            // The registry decides the single winner under concurrent
            // materialization; losers adopt the winner's account.
            let account = match self.accounts.register(Arc::clone(&built)) {
                Some(existing) => {
                    match self
                        .resolver
                        .update_account_with_claim_jwt(&existing, &claim_jwt)
                    {
                        Ok(()) | Err(AuthError::SameClaims) => {}
                        Err(err) => {
                            debug!(error = %err, "account JWT claim update failed");
                            return None;
                        }
                    }
                    existing
                }
                None => built,
            };
            debug!(account = %account.name, "generated account");
            account
        };

        Some(Arc::new(NkeyUser {
            nkey,
            permissions: account.default_permissions.clone(),
            account: Some(account),
            signing_key: String::new(),
        }))
    }

    fn is_trusted_issuer(&self, issuer: &str) -> bool {
        if self.trusted_keys.is_empty() {
            return true;
        }
        self.trusted_keys.iter().any(|key| key == issuer)
    }

    /// Emit a connect event when a system account is configured.
    fn account_connect_event(&self, username: &str) {
        if self.options.system_account.is_empty() {
            return;
        }
        self.events.account_connect(username);
    }
}

impl Authentication for AuthService {
    fn check(&self, client: &mut dyn ClientAuthentication) -> bool {
        self.check_authentication(client)
    }
}
