/// Remote settings synchronisation seam
///
/// The core only decides *what* to push or pull; the transport lives behind
/// this trait. Payloads are export envelopes (see `SettingsManager::export`).

use serde_json::Value;

#[async_trait::async_trait]
pub trait RemoteSettingsSync: Send + Sync {
    /// Upload the export envelope of `user_id`
    async fn push(&self, user_id: &str, payload: Value) -> anyhow::Result<()>;

    /// Download the latest envelope of `user_id`, if the remote has one
    async fn pull(&self, user_id: &str) -> anyhow::Result<Option<Value>>;
}

/// Remote sync used when no backend is configured
pub struct NoOpRemoteSync;

#[async_trait::async_trait]
impl RemoteSettingsSync for NoOpRemoteSync {
    async fn push(&self, _user_id: &str, _payload: Value) -> anyhow::Result<()> {
        Ok(())
    }

    async fn pull(&self, _user_id: &str) -> anyhow::Result<Option<Value>> {
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_remote_sync() {
        let remote = NoOpRemoteSync;
        assert!(remote.push("u1", json!({"version": "2.0.0"})).await.is_ok());
        assert!(remote.pull("u1").await.unwrap().is_none());
    }
}
