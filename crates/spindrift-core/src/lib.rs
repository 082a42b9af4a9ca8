//! # spindrift-core
//!
//! Shared primitives for the spindrift search cluster:
//!
//! - [`SecureString`] - an owned secret character sequence that is zeroed
//!   on drop and compared in constant time
//! - [`NodeVersion`] - the version of a cluster node, with the wire id
//!   encoding used by version-prefixed payloads
//! - [`random_token_id`] - cryptographically random 128-bit identifiers

pub mod id;
pub mod secure;
pub mod version;

pub use id::{TOKEN_ID_LENGTH, random_token_id};
pub use secure::SecureString;
pub use version::{NodeVersion, VersionError};
