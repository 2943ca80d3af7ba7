//! Store wrapper that keeps a receipt for every artifact it publishes.
//!
//! A session routes all of its writes through one [`RecordingStore`]; the
//! collected [`ArtifactRef`]s become the session manifest.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{ArtifactKey, ArtifactKind, ArtifactRef, ArtifactStore};
use crate::error::StorageError;
use crate::model::SessionId;

pub struct RecordingStore {
    inner: Arc<dyn ArtifactStore>,
    published: Mutex<Vec<ArtifactRef>>,
}

impl RecordingStore {
    pub fn new(inner: Arc<dyn ArtifactStore>) -> Self {
        Self {
            inner,
            published: Mutex::new(Vec::new()),
        }
    }

    /// Receipts in publication order.
    pub async fn published(&self) -> Vec<ArtifactRef> {
        self.published.lock().await.clone()
    }

    /// The wrapped store; writes through it are not recorded.
    pub fn inner(&self) -> &dyn ArtifactStore {
        self.inner.as_ref()
    }
}

#[async_trait]
impl ArtifactStore for RecordingStore {
    async fn put(
        &self,
        session: &SessionId,
        key: &ArtifactKey,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        let stored = self.inner.put(session, key, bytes).await?;
        self.published.lock().await.push(stored.clone());
        Ok(stored)
    }

    async fn get(&self, session: &SessionId, key: &ArtifactKey) -> Result<Vec<u8>, StorageError> {
        self.inner.get(session, key).await
    }

    async fn list(
        &self,
        session: &SessionId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactKey>, StorageError> {
        self.inner.list(session, kind).await
    }

    fn session_location(&self, session: &SessionId) -> Option<PathBuf> {
        self.inner.session_location(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{digest_hex, MemoryArtifactStore};

    #[tokio::test]
    async fn only_successful_puts_are_recorded() {
        let inner = Arc::new(MemoryArtifactStore::new());
        let store = RecordingStore::new(inner.clone());
        let session = SessionId::new();
        let key = ArtifactKey::new(ArtifactKind::Plan, 0, "plan.json");

        store.put(&session, &key, b"{}").await.unwrap();
        assert!(store.put(&session, &key, b"[]").await.is_err());

        let published = store.published().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, key);
        assert_eq!(published[0].digest, digest_hex(b"{}"));
        assert_eq!(inner.get(&session, &key).await.unwrap(), b"{}");
    }
}
