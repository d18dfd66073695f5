//! Connection authentication.
//!
//! This module decides, per connection, whether to admit it and, if
//! admitted, binds it to an account with an effective permission set. It
//! multiplexes the supported credential schemes:
//! - pluggable custom authenticators (client and router kinds)
//! - decentralized user JWTs signed by trusted operators, including
//!   on-demand generated accounts
//! - raw nkey signature challenges over the server nonce
//! - multi-user tables keyed by username or by TLS certificate identity
//! - a single static username/password or bearer token
//! - an optional no-auth default user
//!
//! # Example Configuration
//!
//! ```yaml
//! users:
//!   - user: "alice"
//!     password: "$2a$11$V1qrpBt8/SLfEBr4NJq4T.2mg8CjhiYQQTkY0kTmFQ/AlCkWKKSva"
//!     account: "ACME"
//! no_auth_user: "guest"
//! websocket:
//!   no_auth_user: "ws-guest"
//! cluster:
//!   username: "router"
//!   password: "${CLUSTER_PASSWORD}"
//! ```

pub mod check;
pub mod credentials;
pub mod jwt;
pub mod password;
pub mod permissions;
pub mod registry;
pub mod tls_identity;
pub mod user;

pub use check::AuthService;
pub use jwt::{
    decode_user_claims, verify_nonce_signature, UserClaims, UserClaimsBody, ValidationIssue,
    ValidationResults,
};
pub use password::{compare_passwords, is_bcrypt};
pub use permissions::{
    validate_response_permissions, Permissions, ResponsePermission, RoutePermissions,
    SubjectPermission, DEFAULT_ALLOW_RESPONSE_EXPIRATION, DEFAULT_ALLOW_RESPONSE_MAX_MSGS,
};
pub use registry::{NkeyMap, UserMap};
pub use tls_identity::check_client_tls_cert_subject;
pub use user::{NkeyUser, User};
