//! Single-process cluster channel.

use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::watch;

use spindrift_core::NodeVersion;

use crate::channel::{Acknowledged, ClusterError, ClusterState, ClusterStateChannel, Priority};
use crate::metadata::TokenKeysMetadata;

/// In-process implementation of [`ClusterStateChannel`].
///
/// Backs tests and single-node deployments: the local node is the leader,
/// submissions apply synchronously and always acknowledge, and every
/// accepted state is published to watchers.
pub struct LocalChannel {
    state: Mutex<ClusterState>,
    sender: watch::Sender<ClusterState>,
}

impl LocalChannel {
    /// Creates a channel for a single node of the given version.
    #[must_use]
    pub fn new(min_node_version: NodeVersion) -> Self {
        let state = ClusterState::new(min_node_version, true);
        let (sender, _) = watch::channel(state.clone());
        Self {
            state: Mutex::new(state),
            sender,
        }
    }

    /// Overrides the advertised minimum node version and publishes the
    /// resulting state. Used to stand in for mixed-version clusters.
    pub fn set_min_node_version(&self, version: NodeVersion) {
        let mut state = self.state.lock().expect("cluster state lock poisoned");
        state.min_node_version = version;
        let _ = self.sender.send(state.clone());
    }

    /// Overrides leadership of the local node and publishes the resulting
    /// state.
    pub fn set_local_node_is_leader(&self, is_leader: bool) {
        let mut state = self.state.lock().expect("cluster state lock poisoned");
        state.local_node_is_leader = is_leader;
        let _ = self.sender.send(state.clone());
    }
}

#[async_trait]
impl ClusterStateChannel for LocalChannel {
    fn state(&self) -> ClusterState {
        self.state
            .lock()
            .expect("cluster state lock poisoned")
            .clone()
    }

    async fn submit_token_keys(
        &self,
        metadata: TokenKeysMetadata,
        _priority: Priority,
    ) -> Result<Acknowledged, ClusterError> {
        let mut state = self.state.lock().expect("cluster state lock poisoned");
        if state.token_keys.as_ref() == Some(&metadata) {
            tracing::debug!("token keys metadata unchanged, skipping publish");
            return Ok(Acknowledged { acknowledged: true });
        }
        state.token_keys = Some(metadata);
        let _ = self.sender.send(state.clone());
        Ok(Acknowledged { acknowledged: true })
    }

    fn watch(&self) -> watch::Receiver<ClusterState> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindrift_core::SecureString;

    use crate::metadata::KeyWithTimestamp;

    #[tokio::test]
    async fn submission_is_acknowledged_and_published() {
        let channel = LocalChannel::new(NodeVersion::V7_1_0);
        let mut watcher = channel.watch();

        let metadata = TokenKeysMetadata::new(
            vec![KeyWithTimestamp::new(SecureString::from("k1"), 1)],
            vec![0xab; 8],
        );
        let ack = channel
            .submit_token_keys(metadata.clone(), Priority::Urgent)
            .await
            .unwrap();
        assert!(ack.acknowledged);

        watcher.changed().await.unwrap();
        let observed = watcher.borrow().clone();
        assert_eq!(observed.token_keys, Some(metadata));
    }

    #[tokio::test]
    async fn unchanged_submission_does_not_republish() {
        let channel = LocalChannel::new(NodeVersion::V7_1_0);
        let metadata = TokenKeysMetadata::new(
            vec![KeyWithTimestamp::new(SecureString::from("k1"), 1)],
            vec![0xab; 8],
        );
        channel
            .submit_token_keys(metadata.clone(), Priority::Urgent)
            .await
            .unwrap();

        let mut watcher = channel.watch();
        channel
            .submit_token_keys(metadata, Priority::Urgent)
            .await
            .unwrap();
        // No new state was published for the identical payload.
        assert!(!watcher.has_changed().unwrap());
    }

    #[tokio::test]
    async fn version_override_publishes() {
        let channel = LocalChannel::new(NodeVersion::V7_1_0);
        let mut watcher = channel.watch();
        channel.set_min_node_version(NodeVersion::new(7, 0, 0));
        watcher.changed().await.unwrap();
        assert_eq!(
            watcher.borrow().min_node_version,
            NodeVersion::new(7, 0, 0)
        );
    }
}
