//! Node version handling.
//!
//! Every node advertises a version, and serialized payloads carry the
//! version of the node that produced them as a fixed-width id. The id
//! encoding packs `major.minor.patch` into a single integer so that
//! ordering of ids matches ordering of versions.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Errors raised when parsing or decoding a [`NodeVersion`].
#[derive(Debug, thiserror::Error)]
pub enum VersionError {
    /// The textual form was not `major.minor.patch`.
    #[error("Invalid version string: {input}")]
    InvalidString {
        /// The offending input.
        input: String,
    },

    /// The wire id did not decode to a well-formed version.
    #[error("Invalid version id: {id}")]
    InvalidId {
        /// The offending id.
        id: u32,
    },
}

/// The version of a cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct NodeVersion {
    /// Major release number.
    pub major: u8,
    /// Minor release number.
    pub minor: u8,
    /// Patch release number.
    pub patch: u8,
}

impl NodeVersion {
    /// First version that serializes bearer tokens in the opaque format.
    pub const V7_1_0: NodeVersion = NodeVersion::new(7, 1, 0);

    /// Creates a version from its components.
    #[must_use]
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// The fixed-width wire id of this version.
    ///
    /// Ids order the same way versions do, so range comparisons against a
    /// cutover version work directly on ids.
    #[must_use]
    pub const fn to_id(self) -> u32 {
        self.major as u32 * 1_000_000 + self.minor as u32 * 10_000 + self.patch as u32 * 100
    }

    /// Decodes a wire id back into a version.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError::InvalidId`] if the id does not round-trip,
    /// which rejects arbitrary integers read from untrusted payloads.
    pub fn from_id(id: u32) -> Result<Self, VersionError> {
        let major = id / 1_000_000;
        let minor = (id % 1_000_000) / 10_000;
        let patch = (id % 10_000) / 100;
        if major > u8::MAX as u32 || id % 100 != 0 {
            return Err(VersionError::InvalidId { id });
        }
        let version = Self::new(major as u8, minor as u8, patch as u8);
        if version.to_id() == id {
            Ok(version)
        } else {
            Err(VersionError::InvalidId { id })
        }
    }

    /// Returns `true` if this version is at least `other`.
    #[must_use]
    pub fn on_or_after(self, other: NodeVersion) -> bool {
        self >= other
    }
}

impl fmt::Display for NodeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for NodeVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || VersionError::InvalidString {
            input: s.to_string(),
        };
        let mut parts = s.split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let minor = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        let patch = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        Ok(Self::new(major, minor, patch))
    }
}

impl TryFrom<u32> for NodeVersion {
    type Error = VersionError;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::from_id(id)
    }
}

impl From<NodeVersion> for u32 {
    fn from(version: NodeVersion) -> Self {
        version.to_id()
    }
}
