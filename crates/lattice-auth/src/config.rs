//! Authorization configuration for the broker's authentication core.
//!
//! Configuration is loaded from YAML and validated before use. Secret-bearing
//! fields support `${ENV_VAR}` expansion so credentials can be kept out of
//! config files:
//!
//! ```yaml
//! users:
//!   - user: "alice"
//!     password: "${ALICE_PASSWORD}"
//! cluster:
//!   username: "router"
//!   password: "${CLUSTER_PASSWORD}"
//! websocket:
//!   no_auth_user: "guest"
//! ```

use std::path::Path;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::auth::permissions::{Permissions, RoutePermissions};
use crate::connection::Authentication;
use crate::error::{ConfigError, ConfigResult};

/// Root authorization options consumed by the authentication service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Static single-user username.
    pub username: String,
    /// Static single-user password (plaintext or bcrypt hash).
    pub password: String,
    /// Static bearer token (plaintext or bcrypt hash).
    pub authorization: String,
    /// Multi-user table keyed by username.
    pub users: Vec<UserConfig>,
    /// Multi-user table keyed by nkey public key.
    pub nkeys: Vec<NkeyConfig>,
    /// User to assume when a client connects without credentials.
    pub no_auth_user: String,
    /// Derive client identity from the peer TLS certificate.
    pub tls_map: bool,
    /// Operator public keys whose account signatures are trusted.
    pub trusted_operators: Vec<String>,
    /// Name of the system account used for generated accounts.
    pub system_account: String,
    /// Cluster (route) authorization.
    pub cluster: ClusterOpts,
    /// Gateway authorization.
    pub gateway: GatewayOpts,
    /// Leaf node authorization.
    pub leafnode: LeafNodeOpts,
    /// WebSocket listener authorization overlay.
    pub websocket: WebsocketOpts,
    /// Pluggable authenticator for client connections.
    #[serde(skip)]
    pub custom_client_authentication: Option<Arc<dyn Authentication>>,
}

impl Options {
    /// Parse options from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error when the YAML does not parse or fails validation.
    pub fn from_yaml(yaml: &str) -> ConfigResult<Self> {
        let options: Self = serde_yaml::from_str(yaml)?;
        validate_auth(&options)?;
        Ok(options)
    }

    /// Load options from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error when the file cannot be read, does not parse, or
    /// fails validation.
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Static username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// Static password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }

    /// Static token with environment variables expanded.
    #[must_use]
    pub fn authorization(&self) -> String {
        expand_env_vars(&self.authorization)
    }
}

/// A username/password user declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    /// Login username.
    #[serde(rename = "user")]
    pub username: String,
    /// Plaintext password or bcrypt hash.
    pub password: String,
    /// Permissions granted to this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Name of the account this user belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
}

/// An nkey user declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NkeyConfig {
    /// Base32-encoded Ed25519 public key.
    pub nkey: String,
    /// Permissions granted to this user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Name of the account this user belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,
    /// Issuing signing key, when the user was issued by one.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub signing_key: String,
}

/// Cluster (route) authorization options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterOpts {
    /// Username peers must present. Empty disables route authentication.
    pub username: String,
    /// Password peers must present.
    pub password: String,
    /// Match the cluster username against the peer certificate instead.
    pub tls_map: bool,
    /// Subjects imported from and exported to peer servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<RoutePermissions>,
    /// Pluggable authenticator for route connections.
    #[serde(skip)]
    pub custom_router_authentication: Option<Arc<dyn Authentication>>,
}

impl ClusterOpts {
    /// Cluster password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// Gateway authorization options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayOpts {
    /// Username gateways must present. Empty disables gateway authentication.
    pub username: String,
    /// Password gateways must present.
    pub password: String,
    /// Match the gateway username against the peer certificate instead.
    pub tls_map: bool,
}

impl GatewayOpts {
    /// Gateway password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// Leaf node authorization options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LeafNodeOpts {
    /// Single required username. Takes precedence over `users`.
    pub username: String,
    /// Single required password.
    pub password: String,
    /// Account to bind authenticated leaf connections to.
    pub account: String,
    /// Multi-user table for leaf connections.
    pub users: Vec<UserConfig>,
}

impl LeafNodeOpts {
    /// Leaf password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }
}

/// WebSocket listener authorization overlay.
///
/// When any credential field is set here (or `auth_required` is forced),
/// WebSocket clients authenticate against this block instead of the
/// top-level options.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebsocketOpts {
    /// Static single-user username for WebSocket clients.
    pub username: String,
    /// Static single-user password for WebSocket clients.
    pub password: String,
    /// Static token for WebSocket clients.
    pub token: String,
    /// No-auth fallback user for WebSocket clients.
    pub no_auth_user: String,
    /// Derive WebSocket client identity from the peer certificate.
    pub tls_map: bool,
    /// WebSocket-specific users table.
    pub users: Vec<UserConfig>,
    /// WebSocket-specific nkeys table.
    pub nkeys: Vec<NkeyConfig>,
    /// Force authentication for WebSocket clients.
    pub auth_required: bool,
}

impl WebsocketOpts {
    /// WebSocket username with environment variables expanded.
    #[must_use]
    pub fn username(&self) -> String {
        expand_env_vars(&self.username)
    }

    /// WebSocket password with environment variables expanded.
    #[must_use]
    pub fn password(&self) -> String {
        expand_env_vars(&self.password)
    }

    /// WebSocket token with environment variables expanded.
    #[must_use]
    pub fn token(&self) -> String {
        expand_env_vars(&self.token)
    }
}

/// Expand environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of the environment variable
/// `VAR_NAME`. If the variable is not set, replaces with an empty string.
fn expand_env_vars(s: &str) -> String {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex");
    re.replace_all(s, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .to_string()
}

/// Validate the authorization options before use.
///
/// Rejects `no_auth_user` combined with trusted operators, without a users
/// list, or naming a user that is not in the users list. All other invalid
/// auth configurations are the config parser's responsibility.
///
/// # Errors
///
/// Returns a descriptive [`ConfigError`] for each rejected combination.
pub fn validate_auth(options: &Options) -> ConfigResult<()> {
    if options.no_auth_user.is_empty() {
        return Ok(());
    }
    if !options.trusted_operators.is_empty() {
        return Err(ConfigError::NoAuthUserWithTrustedOperators);
    }
    if options.users.is_empty() {
        return Err(ConfigError::NoAuthUserWithoutUsers(
            options.no_auth_user.clone(),
        ));
    }
    if options
        .users
        .iter()
        .any(|u| u.username == options.no_auth_user)
    {
        Ok(())
    } else {
        Err(ConfigError::NoAuthUserUnknown(options.no_auth_user.clone()))
    }
}
