//! In-memory artifact store for tests and ephemeral runs.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

use super::{already_exists, digest_hex, not_found, ArtifactKey, ArtifactKind, ArtifactRef, ArtifactStore};
use crate::error::StorageError;
use crate::model::SessionId;

/// Artifact store backed by a `BTreeMap<(session, key), bytes>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    entries: Mutex<BTreeMap<(SessionId, ArtifactKey), Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of artifacts across all sessions.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(
        &self,
        session: &SessionId,
        key: &ArtifactKey,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        key.validate()?;
        let mut entries = self.entries.lock().await;
        let map_key = (session.clone(), key.clone());
        if entries.contains_key(&map_key) {
            return Err(already_exists(session, key));
        }
        entries.insert(map_key, bytes.to_vec());
        Ok(ArtifactRef {
            session: session.clone(),
            key: key.clone(),
            digest: digest_hex(bytes),
            size: bytes.len(),
            location: None,
        })
    }

    async fn get(&self, session: &SessionId, key: &ArtifactKey) -> Result<Vec<u8>, StorageError> {
        let entries = self.entries.lock().await;
        entries
            .get(&(session.clone(), key.clone()))
            .cloned()
            .ok_or_else(|| not_found(session, key))
    }

    async fn list(
        &self,
        session: &SessionId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactKey>, StorageError> {
        let entries = self.entries.lock().await;
        let mut keys: Vec<ArtifactKey> = entries
            .keys()
            .filter(|(s, k)| s == session && k.kind == kind)
            .map(|(_, k)| k.clone())
            .collect();
        keys.sort_by(|a, b| a.revision.cmp(&b.revision).then_with(|| a.name.cmp(&b.name)));
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{get_json, put_json};

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryArtifactStore::new();
        let s = SessionId::new();
        let key = ArtifactKey::new(ArtifactKind::Plan, 0, "plan.json");
        let r = store.put(&s, &key, b"{}").await.unwrap();
        assert_eq!(r.size, 2);
        assert_eq!(store.get(&s, &key).await.unwrap(), b"{}");
    }

    #[tokio::test]
    async fn second_put_is_rejected_and_original_kept() {
        let store = MemoryArtifactStore::new();
        let s = SessionId::new();
        let key = ArtifactKey::new(ArtifactKind::Plan, 0, "plan.json");
        store.put(&s, &key, b"first").await.unwrap();
        let err = store.put(&s, &key, b"second").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.get(&s, &key).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn sessions_are_isolated() {
        let store = MemoryArtifactStore::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let key = ArtifactKey::new(ArtifactKind::Raw, 0, "bundle.json");
        store.put(&a, &key, b"a").await.unwrap();
        assert!(store.get(&b, &key).await.is_err());
        assert!(store.list(&b, ArtifactKind::Raw).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_revision_tracks_name() {
        let store = MemoryArtifactStore::new();
        let s = SessionId::new();
        for rev in [0u32, 1, 2] {
            put_json(&store, &s, &ArtifactKey::new(ArtifactKind::Plan, rev, "plan.json"), &rev)
                .await
                .unwrap();
        }
        assert_eq!(
            store.latest_revision(&s, ArtifactKind::Plan, "plan.json").await.unwrap(),
            Some(2)
        );
        let v: u32 = get_json(&store, &s, &ArtifactKey::new(ArtifactKind::Plan, 1, "plan.json"))
            .await
            .unwrap();
        assert_eq!(v, 1);
        assert_eq!(
            store.latest_revision(&s, ArtifactKind::Speech, "speech.json").await.unwrap(),
            None
        );
    }
}
