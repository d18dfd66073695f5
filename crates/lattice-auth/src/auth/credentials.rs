//! Per-connection selection of the effective credential set.
//!
//! The service keeps the top-level and WebSocket user tables behind its
//! coarse mutex; the selector runs under that lock and produces an
//! [`AuthCtx`] snapshot combining global fields with the WebSocket overlay
//! when the connection arrived over the WebSocket listener.

use std::sync::Arc;

use crate::account::{Account, AccountRegistry};
use crate::auth::registry::{build_nkeys_and_users, NkeyMap, UserMap};
use crate::config::{Options, WebsocketOpts};

/// Replaceable authentication state guarded by the service mutex.
///
/// Tables are shared snapshots: readers clone the `Arc` handles under the
/// lock and use them after releasing it. Reconfiguration replaces the whole
/// state atomically.
#[derive(Debug, Default)]
pub(crate) struct AuthState {
    /// Whether connections must authenticate.
    pub auth_required: bool,
    /// Username table, when multi-user auth is configured.
    pub users: Option<UserMap>,
    /// Nkey table, when nkey auth is configured.
    pub nkeys: Option<NkeyMap>,
    /// WebSocket-specific overlay state.
    pub websocket: WsAuthState,
}

/// WebSocket credential sub-tables, mirroring the top-level discipline.
#[derive(Debug, Default)]
pub(crate) struct WsAuthState {
    /// Whether the WebSocket listener declares its own auth requirement.
    pub auth_required: bool,
    /// WebSocket-specific username table.
    pub users: Option<UserMap>,
    /// WebSocket-specific nkey table.
    pub nkeys: Option<NkeyMap>,
}

/// The effective credential set for one connection.
#[derive(Debug, Default)]
pub(crate) struct AuthCtx {
    /// Static single-user username.
    pub username: String,
    /// Static single-user password.
    pub password: String,
    /// Static token.
    pub token: String,
    /// No-auth fallback username.
    pub no_auth_user: String,
    /// Whether identity is derived from the peer certificate.
    pub tls_map: bool,
    /// Username table snapshot.
    pub users: Option<UserMap>,
    /// Nkey table snapshot.
    pub nkeys: Option<NkeyMap>,
}

/// Select the effective credential set for a connection.
///
/// Returns `None` when no authentication is required (neither top-level nor,
/// for WebSocket connections, the WebSocket overlay). Must be called with
/// the service mutex held; the returned context owns its snapshots.
pub(crate) fn select_credentials(
    options: &Options,
    state: &AuthState,
    ws_client: bool,
) -> Option<AuthCtx> {
    let mut auth_required = state.auth_required;
    if !auth_required && ws_client {
        auth_required = state.websocket.auth_required;
    }
    if !auth_required {
        return None;
    }

    let mut ctx = AuthCtx {
        no_auth_user: options.no_auth_user.clone(),
        tls_map: options.tls_map,
        ..AuthCtx::default()
    };

    if ws_client {
        let wo = &options.websocket;
        // WebSocket-specific no-auth user and TLS map override the global
        // values whenever they are set, regardless of any other WebSocket
        // auth configuration.
        if !wo.no_auth_user.is_empty() {
            ctx.no_auth_user = wo.no_auth_user.clone();
        }
        if wo.tls_map {
            ctx.tls_map = true;
        }
        if state.websocket.auth_required {
            ctx.username = wo.username();
            ctx.password = wo.password();
            ctx.token = wo.token();
            ctx.users = state.websocket.users.clone();
            ctx.nkeys = state.websocket.nkeys.clone();
            return Some(ctx);
        }
        // Fall back to the regular auth configuration.
    }

    ctx.username = options.username();
    ctx.password = options.password();
    ctx.token = options.authorization();
    ctx.users = state.users.clone();
    ctx.nkeys = state.nkeys.clone();
    Some(ctx)
}

/// Build the WebSocket overlay state from its options block.
pub(crate) fn ws_config_auth(
    options: &WebsocketOpts,
    accounts: &AccountRegistry,
    global_account: &Arc<Account>,
) -> WsAuthState {
    let mut ws = WsAuthState::default();
    if !options.nkeys.is_empty() || !options.users.is_empty() {
        let (nkeys, users) =
            build_nkeys_and_users(&options.nkeys, &options.users, accounts, global_account);
        ws.nkeys = nkeys;
        ws.users = users;
        ws.auth_required = true;
    }
    if options.auth_required
        || !options.username.is_empty()
        || !options.token.is_empty()
        || !options.no_auth_user.is_empty()
    {
        ws.auth_required = true;
    }
    ws
}
