//! Subject permission model for authenticated principals.
//!
//! Permissions are declared in configuration (or carried inside user JWTs)
//! and attached to the runtime user tables as independent deep copies, so
//! the tables never alias the input configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default maximum number of messages a response permission allows.
pub const DEFAULT_ALLOW_RESPONSE_MAX_MSGS: i64 = 1;

/// Default expiration window for a response permission.
pub const DEFAULT_ALLOW_RESPONSE_EXPIRATION: Duration = Duration::from_secs(2 * 60);

/// An individual allow and deny list for publish or subscribe authorization.
///
/// `None` lists are distinct from empty lists: an absent `allow` means a
/// blanket allow, while an empty `allow` revokes it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectPermission {
    /// Subjects this permission explicitly allows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow: Option<Vec<String>>,
    /// Subjects this permission explicitly denies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny: Option<Vec<String>>,
}

/// Grants time- and count-bounded publish rights to reply subjects received
/// on a valid subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResponsePermission {
    /// Maximum number of response messages (0 selects the default).
    #[serde(rename = "max")]
    pub max_msgs: i64,
    /// How long the response permission stays valid (zero selects the
    /// default).
    #[serde(rename = "ttl")]
    pub expires: Duration,
}

/// The allowed subjects on a per publish or subscribe basis.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    /// Publish-side subject permission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub publish: Option<SubjectPermission>,
    /// Subscribe-side subject permission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<SubjectPermission>,
    /// Response permission for reply subjects.
    #[serde(rename = "responses", skip_serializing_if = "Option::is_none")]
    pub response: Option<ResponsePermission>,
}

/// What a server may import from and export to a peer server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutePermissions {
    /// Subjects imported from the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<SubjectPermission>,
    /// Subjects exported to the peer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<SubjectPermission>,
}

/// Normalize a permission set that carries a response permission.
///
/// If a response permission is present: a publish permission is forced into
/// existence, a missing publish allow list becomes the empty list (the
/// blanket allow is revoked), and zero-valued response fields are filled
/// with the defaults. Idempotent.
pub fn validate_response_permissions(p: &mut Permissions) {
    let Some(response) = p.response.as_mut() else {
        return;
    };
    let publish = p.publish.get_or_insert_with(SubjectPermission::default);
    if publish.allow.is_none() {
        // Turn off the blanket allow statement.
        publish.allow = Some(Vec::new());
    }
    if response.max_msgs == 0 {
        response.max_msgs = DEFAULT_ALLOW_RESPONSE_MAX_MSGS;
    }
    if response.expires == Duration::ZERO {
        response.expires = DEFAULT_ALLOW_RESPONSE_EXPIRATION;
    }
}
