//! Runtime user entries for the authentication tables.
//!
//! Configuration declares users with an optional account *name*; the
//! runtime tables built from it hold users bound to [`Account`] pointers.
//! Table entries own deep copies of their permissions so the server never
//! references the options object.

use std::sync::Arc;

use crate::account::Account;
use crate::auth::jwt::UserClaims;
use crate::auth::permissions::{validate_response_permissions, Permissions};
use crate::config::{NkeyConfig, UserConfig};

/// A username/password user entry.
#[derive(Debug, Clone, Default)]
pub struct User {
    /// Login username.
    pub username: String,
    /// Plaintext password or bcrypt hash.
    pub password: String,
    /// Effective permissions, if restricted.
    pub permissions: Option<Permissions>,
    /// Account this user is bound to. Always set once the tables are built.
    pub account: Option<Arc<Account>>,
}

impl User {
    /// Build a runtime user from its configuration entry.
    ///
    /// Permissions are deep-copied and response permissions normalized;
    /// account binding is the table builder's responsibility.
    #[must_use]
    pub fn from_config(cfg: &UserConfig) -> Self {
        let mut permissions = cfg.permissions.clone();
        if let Some(p) = permissions.as_mut() {
            validate_response_permissions(p);
        }
        Self {
            username: cfg.username.clone(),
            password: cfg.password.clone(),
            permissions,
            account: None,
        }
    }
}

/// An nkey-based user entry, identified by its public key.
#[derive(Debug, Clone, Default)]
pub struct NkeyUser {
    /// Base32-encoded Ed25519 public key.
    pub nkey: String,
    /// Effective permissions, if restricted.
    pub permissions: Option<Permissions>,
    /// Account this user is bound to. Always set once the tables are built.
    pub account: Option<Arc<Account>>,
    /// Issuing signing key, when the user was issued by one.
    pub signing_key: String,
}

impl NkeyUser {
    /// Build a runtime nkey user from its configuration entry.
    #[must_use]
    pub fn from_config(cfg: &NkeyConfig) -> Self {
        let mut permissions = cfg.permissions.clone();
        if let Some(p) = permissions.as_mut() {
            validate_response_permissions(p);
        }
        Self {
            nkey: cfg.nkey.clone(),
            permissions,
            account: None,
            signing_key: cfg.signing_key.clone(),
        }
    }

    /// Build the internal nkey user backing a verified user JWT.
    ///
    /// The user's subject becomes the nkey and the claims' permissions are
    /// copied over and normalized.
    #[must_use]
    pub fn from_claims(claims: &UserClaims, account: Arc<Account>) -> Self {
        let mut permissions = claims.lattice.permissions.clone();
        if let Some(p) = permissions.as_mut() {
            validate_response_permissions(p);
        }
        Self {
            nkey: claims.sub.clone(),
            permissions,
            account: Some(account),
            signing_key: String::new(),
        }
    }
}
