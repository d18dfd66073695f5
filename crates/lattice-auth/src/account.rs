//! Tenant accounts, the concurrent account registry, and the resolver seam.
//!
//! Accounts are the named tenants a connection is bound to after a
//! successful authentication. The core never mutates an account beyond its
//! stored claim string; it looks accounts up in the registry, resolves them
//! through an [`AccountResolver`], and binds connections to them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::auth::permissions::Permissions;
use crate::error::{AuthError, AuthResult};

/// Name of the default global account assigned to users lacking one.
pub const GLOBAL_ACCOUNT_NAME: &str = "$G";

/// A named tenant owning permission defaults and revocation lists.
#[derive(Debug, Default)]
pub struct Account {
    /// Account name (the public account nkey in operator mode).
    pub name: String,
    /// Public key of the operator or account that issued this account.
    pub issuer: String,
    /// Additional signing keys trusted to issue users for this account.
    pub signing_keys: Vec<String>,
    /// Unix time after which this account's claims are no longer valid.
    pub expires: Option<u64>,
    /// Revoked user subjects mapped to the revocation time.
    pub revocations: HashMap<String, u64>,
    /// Permissions applied to users generated for this account.
    pub default_permissions: Option<Permissions>,
    claim_jwt: RwLock<String>,
}

impl Account {
    /// Create a bare account with the given name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Set the issuer public key.
    #[must_use]
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    /// Set the trusted signing keys.
    #[must_use]
    pub fn with_signing_keys(mut self, keys: Vec<String>) -> Self {
        self.signing_keys = keys;
        self
    }

    /// Set the expiration time (unix seconds).
    #[must_use]
    pub fn with_expiry(mut self, at: u64) -> Self {
        self.expires = Some(at);
        self
    }

    /// Set the default permissions for generated users.
    #[must_use]
    pub fn with_default_permissions(mut self, permissions: Permissions) -> Self {
        self.default_permissions = Some(permissions);
        self
    }

    /// Set the stored claim string.
    #[must_use]
    pub fn with_claim_jwt(self, claim_jwt: impl Into<String>) -> Self {
        *self.claim_jwt.write().unwrap() = claim_jwt.into();
        self
    }

    /// Revoke a user subject at the given unix time.
    pub fn revoke_user(&mut self, subject: impl Into<String>, at: u64) {
        self.revocations.insert(subject.into(), at);
    }

    /// Whether the account's claims have expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.expires {
            Some(at) => at <= unix_now(),
            None => false,
        }
    }

    /// Whether the given key issued this account or is one of its trusted
    /// signing keys.
    #[must_use]
    pub fn has_issuer(&self, key: &str) -> bool {
        self.issuer == key || self.signing_keys.iter().any(|k| k == key)
    }

    /// Whether the given user subject has been revoked by this account.
    /// The wildcard subject `*` revokes every user.
    #[must_use]
    pub fn check_user_revoked(&self, subject: &str) -> bool {
        self.revocations.contains_key(subject) || self.revocations.contains_key("*")
    }

    /// The stored claim string.
    #[must_use]
    pub fn claim_jwt(&self) -> String {
        self.claim_jwt.read().unwrap().clone()
    }

    /// Replace the stored claim string.
    pub fn set_claim_jwt(&self, claim_jwt: &str) {
        *self.claim_jwt.write().unwrap() = claim_jwt.to_string();
    }
}

pub(crate) fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Claims describing an account, as carried by an account claim string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountClaims {
    /// Claim identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jti: String,
    /// Issued-at time (unix seconds).
    pub iat: u64,
    /// Expiration time (unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Issuer public key.
    pub iss: String,
    /// Subject: the account public key.
    pub sub: String,
    /// Human-readable account name.
    pub name: String,
    /// Account-specific claim body.
    pub lattice: AccountClaimsBody,
}

/// The account-specific body embedded in account claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountClaimsBody {
    /// Additional signing keys trusted for this account.
    pub signing_keys: Vec<String>,
    /// Revoked user subjects mapped to revocation time.
    pub revocations: HashMap<String, u64>,
    /// Permissions applied to users generated for this account.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_permissions: Option<Permissions>,
    /// Claim type discriminator.
    #[serde(rename = "type")]
    pub claim_type: String,
}

impl Default for AccountClaimsBody {
    fn default() -> Self {
        Self {
            signing_keys: Vec::new(),
            revocations: HashMap::new(),
            default_permissions: None,
            claim_type: "account".to_string(),
        }
    }
}

impl AccountClaims {
    /// Serialize the claims to their canonical JSON string form.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialMalformed`] if serialization fails.
    pub fn to_json(&self) -> AuthResult<String> {
        serde_json::to_string(self).map_err(|e| AuthError::CredentialMalformed(e.to_string()))
    }
}

/// Concurrent account registry keyed by account name.
///
/// Reads and writes are independently synchronized; `register` provides
/// load-or-register semantics so that concurrent materialization of the
/// same account has a single winner.
#[derive(Debug, Default)]
pub struct AccountRegistry {
    inner: DashMap<String, Arc<Account>>,
}

impl AccountRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an account by name.
    #[must_use]
    pub fn load(&self, name: &str) -> Option<Arc<Account>> {
        self.inner.get(name).map(|a| Arc::clone(a.value()))
    }

    /// Insert or replace an account unconditionally.
    pub fn store(&self, account: Arc<Account>) {
        self.inner.insert(account.name.clone(), account);
    }

    /// Register an account unless one with the same name already exists.
    ///
    /// Returns the previously registered account when the name was taken,
    /// `None` when this call won the registration.
    pub fn register(&self, account: Arc<Account>) -> Option<Arc<Account>> {
        match self.inner.entry(account.name.clone()) {
            Entry::Occupied(existing) => Some(Arc::clone(existing.get())),
            Entry::Vacant(slot) => {
                slot.insert(account);
                None
            }
        }
    }

    /// Number of registered accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Resolves account names to account objects and maintains their claims.
///
/// The broker embeds a directory-backed implementation; the in-memory
/// implementation below serves embedding and tests.
pub trait AccountResolver: Send + Sync + fmt::Debug {
    /// Fetch the account registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AccountUnresolvable`] when the name is unknown.
    fn lookup_account(&self, name: &str) -> AuthResult<Arc<Account>>;

    /// Verify an account claim string and return the decoded claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialMalformed`] when the claims do not
    /// decode.
    fn verify_account_claims(&self, claim_jwt: &str) -> AuthResult<AccountClaims>;

    /// Materialize an account object from verified claims.
    fn build_internal_account(&self, claims: &AccountClaims) -> Arc<Account>;

    /// Update an account with a new claim string.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::SameClaims`] when the stored claims already
    /// match (callers treat this as success), or another [`AuthError`] on
    /// failure.
    fn update_account_with_claim_jwt(
        &self,
        account: &Arc<Account>,
        claim_jwt: &str,
    ) -> AuthResult<()>;
}

/// In-memory account resolver.
#[derive(Debug, Default)]
pub struct MemoryAccountResolver {
    accounts: DashMap<String, Arc<Account>>,
}

impl MemoryAccountResolver {
    /// Create an empty resolver.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an account to the resolver's directory.
    pub fn insert(&self, account: Arc<Account>) {
        self.accounts.insert(account.name.clone(), account);
    }
}

impl AccountResolver for MemoryAccountResolver {
    fn lookup_account(&self, name: &str) -> AuthResult<Arc<Account>> {
        self.accounts
            .get(name)
            .map(|a| Arc::clone(a.value()))
            .ok_or_else(|| AuthError::AccountUnresolvable(name.to_string()))
    }

    fn verify_account_claims(&self, claim_jwt: &str) -> AuthResult<AccountClaims> {
        serde_json::from_str(claim_jwt).map_err(|e| AuthError::CredentialMalformed(e.to_string()))
    }

    fn build_internal_account(&self, claims: &AccountClaims) -> Arc<Account> {
        let mut account = Account::new(claims.name.clone())
            .with_issuer(claims.iss.clone())
            .with_signing_keys(claims.lattice.signing_keys.clone());
        account.expires = claims.exp;
        account.revocations = claims.lattice.revocations.clone();
        account.default_permissions = claims.lattice.default_permissions.clone();
        Arc::new(account)
    }

    fn update_account_with_claim_jwt(
        &self,
        account: &Arc<Account>,
        claim_jwt: &str,
    ) -> AuthResult<()> {
        if account.claim_jwt() == claim_jwt {
            return Err(AuthError::SameClaims);
        }
        account.set_claim_jwt(claim_jwt);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_issuer() {
        let account = Account::new("ACME")
            .with_issuer("OP_KEY")
            .with_signing_keys(vec!["SK_ONE".to_string()]);
        assert!(account.has_issuer("OP_KEY"));
        assert!(account.has_issuer("SK_ONE"));
        assert!(!account.has_issuer("SK_TWO"));
    }

    #[test]
    fn test_expiry() {
        let fresh = Account::new("A").with_expiry(unix_now() + 3600);
        assert!(!fresh.is_expired());
        let stale = Account::new("B").with_expiry(unix_now() - 1);
        assert!(stale.is_expired());
        assert!(!Account::new("C").is_expired());
    }

    #[test]
    fn test_revocation() {
        let mut account = Account::new("ACME");
        account.revoke_user("USER_KEY", unix_now());
        assert!(account.check_user_revoked("USER_KEY"));
        assert!(!account.check_user_revoked("OTHER_KEY"));

        let mut wildcard = Account::new("ALL");
        wildcard.revoke_user("*", unix_now());
        assert!(wildcard.check_user_revoked("ANY_KEY"));
    }

    #[test]
    fn test_registry_register_single_winner() {
        let registry = AccountRegistry::new();
        let first = Arc::new(Account::new("ACME"));
        let second = Arc::new(Account::new("ACME"));

        assert!(registry.register(Arc::clone(&first)).is_none());
        let existing = registry.register(second).expect("name already taken");
        assert!(Arc::ptr_eq(&existing, &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_load_and_store() {
        let registry = AccountRegistry::new();
        assert!(registry.load("ACME").is_none());
        registry.store(Arc::new(Account::new("ACME")));
        assert_eq!(registry.load("ACME").unwrap().name, "ACME");
    }

    #[test]
    fn test_memory_resolver_lookup() {
        let resolver = MemoryAccountResolver::new();
        resolver.insert(Arc::new(Account::new("SYS")));
        assert!(resolver.lookup_account("SYS").is_ok());
        assert_eq!(
            resolver.lookup_account("NOPE").unwrap_err(),
            AuthError::AccountUnresolvable("NOPE".to_string())
        );
    }

    #[test]
    fn test_memory_resolver_same_claims_sentinel() {
        let resolver = MemoryAccountResolver::new();
        let account = Arc::new(Account::new("SYS").with_claim_jwt("{}"));
        assert_eq!(
            resolver.update_account_with_claim_jwt(&account, "{}"),
            Err(AuthError::SameClaims)
        );
        assert!(resolver
            .update_account_with_claim_jwt(&account, r#"{"name":"SYS"}"#)
            .is_ok());
        assert_eq!(account.claim_jwt(), r#"{"name":"SYS"}"#);
    }

    #[test]
    fn test_account_claims_roundtrip() {
        let mut claims = AccountClaims {
            iss: "OPERATOR".to_string(),
            sub: "ACCOUNT".to_string(),
            name: "ACME".to_string(),
            ..AccountClaims::default()
        };
        claims.lattice.signing_keys.push("SK".to_string());
        let json = claims.to_json().unwrap();
        let back: AccountClaims = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "ACME");
        assert_eq!(back.lattice.signing_keys, vec!["SK".to_string()]);
        assert_eq!(back.lattice.claim_type, "account");
    }
}
