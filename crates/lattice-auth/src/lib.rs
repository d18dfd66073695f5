//! Lattice Broker Authentication Core
//!
//! This library is the connection authentication core of the lattice
//! pub/sub broker. Connections of four kinds (clients, cluster routers,
//! cross-cluster gateways, and leaf nodes) are checked against the
//! configured credential schemes and, when admitted, bound to a tenant
//! account with an effective permission set.
//!
//! # Architecture
//!
//! The library is organized into several modules:
//!
//! - [`config`] - Authorization options, loading and validation
//! - [`error`] - Domain-specific error types
//! - [`account`] - Tenant accounts, registry, and the resolver seam
//! - [`connection`] - Connection-facing contracts
//! - [`auth`] - Credential schemes and the authentication orchestrator
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use lattice_auth::{AuthService, MemoryAccountResolver, Options};
//!
//! let options = Options::from_file("auth.yaml")?;
//! let service = AuthService::new(options, Arc::new(MemoryAccountResolver::new()))?;
//!
//! // For each new connection, after the CONNECT frame is parsed:
//! // let admitted = service.check_authentication(&mut connection);
//! ```

#![forbid(unsafe_code)]

pub mod account;
pub mod auth;
pub mod config;
pub mod connection;
pub mod error;

// Re-export commonly used types
pub use account::{
    Account, AccountClaims, AccountRegistry, AccountResolver, MemoryAccountResolver,
    GLOBAL_ACCOUNT_NAME,
};
pub use auth::{AuthService, NkeyUser, Permissions, User, UserClaims};
pub use config::{validate_auth, Options};
pub use connection::{
    Authentication, ClientAuthentication, ClientKind, ConnectOpts, EventSink, LogEventSink,
    TlsConnectionState,
};
pub use error::{AuthError, AuthResult, ConfigError, ConfigResult};
