//! Domain error types for the authentication core.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//!
//! Every authentication-time error collapses to a denied connection at the
//! orchestrator boundary; the variants exist so that denial reasons can be
//! logged precisely. Configuration-time errors are surfaced to the operator
//! as descriptive strings and prevent the service from being constructed.

use thiserror::Error;

/// Errors related to authorization configuration validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// `no_auth_user` cannot be combined with trusted operators.
    #[error("no_auth_user not compatible with trusted operator mode")]
    NoAuthUserWithTrustedOperators,

    /// `no_auth_user` requires a users list to pick from.
    #[error("no_auth_user \"{0}\" present, but users are not defined")]
    NoAuthUserWithoutUsers(String),

    /// `no_auth_user` names a user that is not in the users list.
    #[error("no_auth_user \"{0}\" not present as user in the authorization block")]
    NoAuthUserUnknown(String),

    /// Failed to read a configuration file.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML configuration.
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Errors that deny a connection during authentication.
///
/// All variants map to "deny" outward; the distinctions exist for logging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Trusted-operator mode without a user JWT or usable nkey.
    #[error("authentication requires a user JWT")]
    MissingCredentials,

    /// Undecodable signature, malformed nkey, or malformed JWT.
    #[error("malformed credential: {0}")]
    CredentialMalformed(String),

    /// The signature does not verify against the server nonce.
    #[error("signature not verified")]
    SignatureInvalid,

    /// Username or nkey not present in the tables and no fallback applies.
    #[error("unknown principal: {0}")]
    PrincipalUnknown(String),

    /// String or bcrypt password compare failed.
    #[error("password mismatch")]
    PasswordMismatch,

    /// The account resolver could not produce the issuing account.
    #[error("unable to resolve account: {0}")]
    AccountUnresolvable(String),

    /// The issuing account is not signed by a trusted operator.
    #[error("account JWT not signed by trusted operator")]
    UntrustedIssuer,

    /// `issuer_account` was set but the account does not list the issuer.
    #[error("user JWT issuer is not known to the account")]
    IssuerAccountMismatch,

    /// The issuing account's claims have expired.
    #[error("account JWT has expired")]
    AccountExpired,

    /// The account revokes this subject.
    #[error("user authentication revoked")]
    UserRevoked,

    /// TLS-map mode without a usable certificate identity.
    #[error("no usable identity in client certificate")]
    TlsIdentityAbsent,

    /// The certificate identity did not map to a known user.
    #[error("certificate identity not mapped to a user")]
    TlsIdentityUnmapped,

    /// Distinguished resolver sentinel: the stored claims already match.
    /// Treated as success by callers updating generated accounts.
    #[error("account resolver reports identical claims")]
    SameClaims,

    /// A connection registration callback refused the binding.
    #[error("connection registration refused")]
    RegistrationFailed,
}

/// Result type alias for authentication operations.
pub type AuthResult<T> = std::result::Result<T, AuthError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
