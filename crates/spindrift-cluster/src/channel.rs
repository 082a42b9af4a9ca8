//! The replicated-metadata channel contract.

use async_trait::async_trait;
use tokio::sync::watch;

use spindrift_core::NodeVersion;

use crate::metadata::TokenKeysMetadata;

/// Errors raised by cluster metadata submissions.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The update was processed but not acknowledged by the cluster within
    /// the ack timeout.
    #[error("Cluster state update was not acknowledged")]
    NotAcknowledged,

    /// The update could not be submitted at all.
    #[error("Cluster state update failed: {message}")]
    SubmissionFailed {
        /// Description of the failure.
        message: String,
    },
}

impl ClusterError {
    /// Creates a new `SubmissionFailed` error.
    #[must_use]
    pub fn submission_failed(message: impl Into<String>) -> Self {
        Self::SubmissionFailed {
            message: message.into(),
        }
    }
}

/// Priority of a cluster state update task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    /// Normal queue position.
    Normal,
    /// Jumps ahead of normal-priority tasks. Key management updates run
    /// urgent so a rotation is not starved by routine cluster churn.
    Urgent,
}

/// Acknowledgement of a cluster state update.
#[derive(Debug, Clone, Copy)]
pub struct Acknowledged {
    /// Whether the required set of nodes acknowledged within the timeout.
    pub acknowledged: bool,
}

/// An immutable snapshot of the cluster state, as far as the security
/// subsystem cares about it.
#[derive(Debug, Clone)]
pub struct ClusterState {
    /// The lowest version among the nodes currently in the cluster. Wire
    /// formats are chosen against this so every node can read them.
    pub min_node_version: NodeVersion,
    /// Whether the local node is the elected leader. Only the leader
    /// initiates metadata installs and rotations.
    pub local_node_is_leader: bool,
    /// The token-keys metadata slot, if installed.
    pub token_keys: Option<TokenKeysMetadata>,
}

impl ClusterState {
    /// Creates a snapshot with an empty metadata slot.
    #[must_use]
    pub fn new(min_node_version: NodeVersion, local_node_is_leader: bool) -> Self {
        Self {
            min_node_version,
            local_node_is_leader,
            token_keys: None,
        }
    }
}

/// The coordination facility used to publish and observe token-keys
/// metadata.
///
/// Submissions are acknowledged updates: the returned [`Acknowledged`]
/// reports whether the cluster accepted the change within the channel's
/// default ack timeout. Observers use [`ClusterStateChannel::watch`] and
/// react to every published state.
#[async_trait]
pub trait ClusterStateChannel: Send + Sync {
    /// Returns the current cluster state snapshot.
    fn state(&self) -> ClusterState;

    /// Submits a new token-keys payload as an acknowledged update.
    ///
    /// Submitting a payload equal to the installed one is a no-op that
    /// still acknowledges.
    ///
    /// # Errors
    ///
    /// Returns [`ClusterError::SubmissionFailed`] if the update could not
    /// be queued or applied.
    async fn submit_token_keys(
        &self,
        metadata: TokenKeysMetadata,
        priority: Priority,
    ) -> Result<Acknowledged, ClusterError>;

    /// Returns a receiver that observes every published cluster state.
    fn watch(&self) -> watch::Receiver<ClusterState>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn _assert_object_safe(_: &dyn ClusterStateChannel) {}
}
