//! Connection-facing contracts for the authentication core.
//!
//! The broker's connection layer implements [`ClientAuthentication`] and
//! hands connections to the orchestrator; [`Authentication`] is the single
//! dynamic-dispatch boundary for pluggable authenticators.

use std::fmt;
use std::sync::Arc;

use rustls::pki_types::CertificateDer;

use crate::account::Account;
use crate::auth::jwt::UserClaims;
use crate::auth::user::{NkeyUser, User};
use crate::error::AuthResult;

/// The kind of connection being authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientKind {
    /// End user connection.
    Client,
    /// Peer broker in the same cluster.
    Router,
    /// Cross-cluster peer.
    Gateway,
    /// Remote edge broker.
    Leaf,
}

impl fmt::Display for ClientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Router => write!(f, "router"),
            Self::Gateway => write!(f, "gateway"),
            Self::Leaf => write!(f, "leafnode"),
        }
    }
}

/// Credentials carried by a connection's CONNECT frame.
///
/// Empty strings mean the field was not supplied.
#[derive(Debug, Clone, Default)]
pub struct ConnectOpts {
    /// Username.
    pub username: String,
    /// Password.
    pub password: String,
    /// Bearer token.
    pub token: String,
    /// Encoded user JWT.
    pub jwt: String,
    /// Nkey public key.
    pub nkey: String,
    /// Base64 signature of the server nonce.
    pub sig: String,
}

/// TLS connection state as seen by the authentication core.
///
/// The first certificate is the peer's; any others are ignored for
/// identity extraction.
#[derive(Debug, Default)]
pub struct TlsConnectionState {
    /// Peer certificate chain in DER form.
    pub peer_certificates: Vec<CertificateDer<'static>>,
}

/// Contract a connection must expose to be authenticated.
pub trait ClientAuthentication {
    /// The connection kind.
    fn kind(&self) -> ClientKind;

    /// CONNECT-frame credentials.
    fn connect_opts(&self) -> &ConnectOpts;

    /// Mutable CONNECT-frame credentials. The orchestrator rewrites these
    /// when a no-auth user is assumed or a certificate identity is adopted.
    fn connect_opts_mut(&mut self) -> &mut ConnectOpts;

    /// TLS state, when the connection is TLS-terminated.
    fn tls_state(&self) -> Option<&TlsConnectionState>;

    /// The per-connection random challenge the client signs.
    fn nonce(&self) -> &[u8];

    /// Whether the connection arrived over the WebSocket listener.
    fn is_websocket(&self) -> bool {
        false
    }

    /// Record the authenticated public key for later identification.
    fn set_public_key(&mut self, _key: &str) {}

    /// Bind the connection to an authenticated user.
    fn register_user(&mut self, user: Arc<User>);

    /// Bind the connection to an authenticated nkey user.
    ///
    /// # Errors
    ///
    /// The connection may refuse the binding; refusal denies the
    /// connection.
    fn register_nkey_user(&mut self, user: Arc<NkeyUser>) -> AuthResult<()>;

    /// Bind the connection directly to an account.
    ///
    /// # Errors
    ///
    /// The connection may refuse the binding; refusal denies the
    /// connection.
    fn register_with_account(&mut self, account: Arc<Account>) -> AuthResult<()>;

    /// Arm an expiration timer from the user claims, if they expire.
    /// Cancelling the timer on disconnect is the connection layer's
    /// responsibility.
    fn check_expiration(&mut self, _claims: &UserClaims) {}
}

/// Pluggable authenticator for a connection kind.
///
/// When configured, an implementation short-circuits the orchestrator for
/// its kind. This is the only dynamic-dispatch boundary the core requires.
pub trait Authentication: Send + Sync + fmt::Debug {
    /// Check whether the connection is authorized to connect.
    fn check(&self, client: &mut dyn ClientAuthentication) -> bool;
}

/// Receives connect events for successfully authenticated users.
pub trait EventSink: Send + Sync + fmt::Debug {
    /// A user or JWT authentication succeeded on a connection.
    fn account_connect(&self, username: &str);
}

/// Default event sink: emits a structured log line per connect event.
#[derive(Debug, Default)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn account_connect(&self, username: &str) {
        tracing::debug!(username = %username, "account connect event");
    }
}
