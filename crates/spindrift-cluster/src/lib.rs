//! # spindrift-cluster
//!
//! Cluster-state plumbing for the security subsystem.
//!
//! The token service coordinates its signing keys across the cluster
//! through a replicated metadata slot. This crate defines the metadata
//! payload ([`TokenKeysMetadata`]), an immutable view of the cluster state
//! ([`ClusterState`]), and the [`ClusterStateChannel`] trait for submitting
//! acknowledged metadata updates and observing changes. A single-process
//! implementation ([`LocalChannel`]) backs tests and single-node
//! deployments.

pub mod channel;
pub mod local;
pub mod metadata;

pub use channel::{
    Acknowledged, ClusterError, ClusterState, ClusterStateChannel, Priority,
};
pub use local::LocalChannel;
pub use metadata::{KeyWithTimestamp, TokenKeysMetadata};

/// Type alias for cluster channel results.
pub type ClusterResult<T> = Result<T, ClusterError>;
