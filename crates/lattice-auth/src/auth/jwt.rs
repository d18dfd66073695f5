//! User claims decoding and nkey signature verification.
//!
//! User JWTs are three dot-separated raw-URL base64 segments with header
//! `alg: ed25519-nkey`; the token's own signature is verified against the
//! issuer key carried in the claims. Nonce signatures arrive as raw-URL
//! base64 with a standard-base64 fallback and verify against the user's
//! public nkey.

use std::collections::HashMap;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use nkeys::KeyPair;
use serde::{Deserialize, Serialize};

use crate::account::unix_now;
use crate::auth::permissions::Permissions;
use crate::error::{AuthError, AuthResult};

/// Signature algorithm required in user JWT headers.
const ALG_ED25519_NKEY: &str = "ed25519-nkey";

/// Legacy algorithm name still accepted on decode.
const ALG_ED25519: &str = "ed25519";

/// Claims describing a user, as carried by a user JWT.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct UserClaims {
    /// Claim identifier.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub jti: String,
    /// Issued-at time (unix seconds).
    pub iat: u64,
    /// Expiration time (unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    /// Not-before time (unix seconds).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    /// Issuer: the account (or signing) key that signed this JWT.
    pub iss: String,
    /// Subject: the user's public nkey.
    pub sub: String,
    /// Human-readable user name.
    pub name: String,
    /// User-specific claim body.
    pub lattice: UserClaimsBody,
}

/// The user-specific body embedded in user claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserClaimsBody {
    /// Account the issuer signing key belongs to, when issued by one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer_account: Option<String>,
    /// When set, the JWT alone authenticates; no nonce signature required.
    pub bearer_token: bool,
    /// Permissions granted to the user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    /// Claim type discriminator.
    #[serde(rename = "type")]
    pub claim_type: String,
    /// Claim format version.
    pub version: i32,
}

impl Default for UserClaimsBody {
    fn default() -> Self {
        Self {
            issuer_account: None,
            bearer_token: false,
            permissions: None,
            claim_type: "user".to_string(),
            version: 2,
        }
    }
}

/// One finding from claims validation.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Human-readable description.
    pub description: String,
    /// Whether this issue blocks authentication.
    pub blocking: bool,
    /// Whether this issue is a time-based check.
    pub time_check: bool,
}

/// Findings from validating a set of claims.
#[derive(Debug, Clone, Default)]
pub struct ValidationResults {
    /// Collected findings.
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResults {
    fn add(&mut self, description: impl Into<String>, blocking: bool, time_check: bool) {
        self.issues.push(ValidationIssue {
            description: description.into(),
            blocking,
            time_check,
        });
    }

    /// Whether any finding blocks authentication. Time-based findings are
    /// only considered when `include_time_checks` is set.
    #[must_use]
    pub fn is_blocking(&self, include_time_checks: bool) -> bool {
        self.issues
            .iter()
            .any(|i| i.blocking && (include_time_checks || !i.time_check))
    }
}

impl UserClaims {
    /// Validate the claims against the current time.
    #[must_use]
    pub fn validate(&self) -> ValidationResults {
        let now = unix_now();
        let mut results = ValidationResults::default();
        if !is_user_key(&self.sub) {
            results.add("subject is not a valid user nkey", true, false);
        }
        if !is_account_key(&self.iss) {
            results.add("issuer is not a valid account nkey", true, false);
        }
        if let Some(exp) = self.exp {
            if exp <= now {
                results.add("claim is expired", true, true);
            }
        }
        if let Some(nbf) = self.nbf {
            if nbf > now {
                results.add("claim is not yet valid", true, true);
            }
        }
        results
    }

    /// The claims' JSON representation, used for logging and events.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::CredentialMalformed`] if serialization fails.
    pub fn to_json(&self) -> AuthResult<String> {
        serde_json::to_string(self).map_err(|e| AuthError::CredentialMalformed(e.to_string()))
    }
}

/// Decode a user JWT and verify its own signature against the issuer key
/// carried in the claims.
///
/// # Errors
///
/// Returns [`AuthError::CredentialMalformed`] for structural problems and
/// [`AuthError::SignatureInvalid`] when the token signature does not verify.
pub fn decode_user_claims(token: &str) -> AuthResult<UserClaims> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::CredentialMalformed(
            "expected three JWT segments".to_string(),
        ));
    }

    let header_bytes = URL_SAFE_NO_PAD
        .decode(parts[0])
        .map_err(|e| AuthError::CredentialMalformed(format!("header: {e}")))?;
    let header: HashMap<String, serde_json::Value> = serde_json::from_slice(&header_bytes)
        .map_err(|e| AuthError::CredentialMalformed(format!("header: {e}")))?;
    match header.get("alg").and_then(|v| v.as_str()) {
        Some(ALG_ED25519_NKEY | ALG_ED25519) => {}
        other => {
            return Err(AuthError::CredentialMalformed(format!(
                "unsupported algorithm: {other:?}"
            )))
        }
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AuthError::CredentialMalformed(format!("payload: {e}")))?;
    let claims: UserClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|e| AuthError::CredentialMalformed(format!("payload: {e}")))?;
    if claims.lattice.claim_type != "user" {
        return Err(AuthError::CredentialMalformed(format!(
            "not a user claim: {}",
            claims.lattice.claim_type
        )));
    }

    let signature = URL_SAFE_NO_PAD
        .decode(parts[2])
        .map_err(|e| AuthError::CredentialMalformed(format!("signature: {e}")))?;
    let issuer = KeyPair::from_public_key(&claims.iss)
        .map_err(|e| AuthError::CredentialMalformed(format!("issuer key: {e}")))?;
    let signing_input = format!("{}.{}", parts[0], parts[1]);
    issuer
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| AuthError::SignatureInvalid)?;

    Ok(claims)
}

/// Verify a client-supplied signature over the server nonce.
///
/// The signature is decoded as raw-URL base64 first, falling back to
/// standard base64, and verified against the given public nkey.
///
/// # Errors
///
/// Returns [`AuthError::CredentialMalformed`] when the signature or key do
/// not decode, and [`AuthError::SignatureInvalid`] when verification fails.
pub fn verify_nonce_signature(public_key: &str, nonce: &[u8], sig: &str) -> AuthResult<()> {
    let signature = URL_SAFE_NO_PAD
        .decode(sig)
        .or_else(|_| STANDARD.decode(sig))
        .map_err(|_| AuthError::CredentialMalformed("signature not valid base64".to_string()))?;
    let key = KeyPair::from_public_key(public_key)
        .map_err(|e| AuthError::CredentialMalformed(format!("user nkey not valid: {e}")))?;
    key.verify(nonce, &signature)
        .map_err(|_| AuthError::SignatureInvalid)
}

/// Whether the string is a well-formed user public nkey (`U...`).
#[must_use]
pub fn is_user_key(key: &str) -> bool {
    key.starts_with('U') && KeyPair::from_public_key(key).is_ok()
}

/// Whether the string is a well-formed account public nkey (`A...`).
#[must_use]
pub fn is_account_key(key: &str) -> bool {
    key.starts_with('A') && KeyPair::from_public_key(key).is_ok()
}
