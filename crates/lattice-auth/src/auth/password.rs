//! Password primitives: bcrypt detection and comparison.
//!
//! Stored secrets (passwords and tokens) may be plaintext or bcrypt hashes.
//! A secret is treated as a bcrypt hash when its serialized form matches
//! `$2[abxy]$NN$...`; anything else is compared as an exact string.

use std::sync::LazyLock;

use regex::Regex;

/// Recognizes bcrypt-serialized secrets (`$2a$`, `$2b$`, `$2x$`, `$2y$`).
static BCRYPT_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$2[abxy]\$\d{2}\$.*").expect("valid regex"));

/// Check whether the given password or token is a bcrypt hash.
#[must_use]
pub fn is_bcrypt(secret: &str) -> bool {
    if !secret.starts_with('$') {
        return false;
    }
    BCRYPT_PREFIX.is_match(secret)
}

/// Compare a client-supplied secret against the server-side secret.
///
/// If the server secret is a bcrypt hash, the client secret is verified
/// against it; otherwise the two must be exactly equal. Verification
/// failures of any kind compare as false.
#[must_use]
pub fn compare_passwords(server_password: &str, client_password: &str) -> bool {
    if is_bcrypt(server_password) {
        bcrypt::verify(client_password, server_password).unwrap_or(false)
    } else {
        server_password == client_password
    }
}
