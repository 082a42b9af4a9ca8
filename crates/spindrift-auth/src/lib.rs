//! # spindrift-auth
//!
//! OAuth2-style bearer token service for the spindrift security
//! subsystem.
//!
//! The service mints, validates, refreshes, invalidates and (via an
//! external sweeper) prunes access/refresh token pairs. Tokens are never
//! persisted: the bearer string carries (plainly or encrypted, depending
//! on the cluster's minimum node version) a random id naming a document
//! in the security index, and only derived identifiers and metadata are
//! stored.
//!
//! ## Modules
//!
//! - [`config`] - service configuration
//! - [`error`] - error taxonomy and RFC 6750 header values
//! - [`types`] - authentications, user tokens, token documents
//! - [`keys`] - key primitives, derivation, ring, key manager
//! - [`codec`] - version-prefixed bearer string encode/decode
//! - [`repository`] - document CRUD with origin tagging and retry
//! - [`service`] - the [`TokenService`] facade (refresh engine in
//!   `refresh`, invalidation engine in `invalidate`)
//! - [`clock`] - injectable time source
//! - [`sweeper`] - expired-token sweeper hook

pub mod clock;
pub mod codec;
pub mod config;
pub mod error;
pub mod invalidate;
pub mod keys;
pub mod refresh;
pub mod repository;
pub mod service;
pub mod sweeper;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use codec::TokenCodec;
pub use config::{ConfigError, TokenServiceConfig};
pub use error::{
    AuthError, EXPIRED_TOKEN_WWW_AUTH_VALUE, MALFORMED_TOKEN_WWW_AUTH_VALUE,
};
pub use keys::{KeyManager, KeyRing};
pub use repository::TokenRepository;
pub use service::{TOKEN_KEY_THREAD_NAME, TokenService};
pub use sweeper::{CountingSweeper, ExpiredTokenSweeper, NoopSweeper};
pub use types::{
    Authentication, AuthenticationType, TokenDocument, TokensInvalidationResult, UserToken,
};

/// Type alias for token service results.
pub type AuthResult<T> = Result<T, AuthError>;
