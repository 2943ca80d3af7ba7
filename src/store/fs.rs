//! On-disk artifact store.
//!
//! Layout: `<root>/<session>/<namespace>/r<revision>/<name>`
//!
//! Writes go to a temp file in the destination directory and are then
//! persisted with a no-clobber rename, so a crash mid-write leaves at most an
//! orphaned temp file, never a half-written artifact under its real name.

use async_trait::async_trait;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{already_exists, digest_hex, not_found, ArtifactKey, ArtifactKind, ArtifactRef, ArtifactStore};
use crate::error::StorageError;
use crate::model::SessionId;

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, session: &SessionId, key: &ArtifactKey) -> PathBuf {
        let mut path = self
            .root
            .join(session.as_str())
            .join(key.kind.as_str())
            .join(format!("r{}", key.revision));
        for seg in key.name.split('/') {
            path.push(seg);
        }
        path
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| std::io::Error::other("artifact path has no parent"))?;
    fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path).map_err(|e| e.error)?;
    Ok(())
}

/// Collect `name` paths below one revision directory, `/`-joined.
fn walk_names(dir: &Path, prefix: &str, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let file_name = entry.file_name().to_string_lossy().into_owned();
        // Temp files from NamedTempFile start with '.'.
        if file_name.starts_with('.') {
            continue;
        }
        let name = if prefix.is_empty() {
            file_name
        } else {
            format!("{prefix}/{file_name}")
        };
        if entry.file_type()?.is_dir() {
            walk_names(&entry.path(), &name, out)?;
        } else {
            out.push(name);
        }
    }
    Ok(())
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(
        &self,
        session: &SessionId,
        key: &ArtifactKey,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError> {
        key.validate()?;
        let path = self.path_for(session, key);
        if path.exists() {
            return Err(already_exists(session, key));
        }

        let data = bytes.to_vec();
        let target = path.clone();
        let result = tokio::task::spawn_blocking(move || write_atomic(&target, &data))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?;

        match result {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                return Err(already_exists(session, key));
            }
            Err(e) => return Err(StorageError::Io(e)),
        }

        debug!("Stored {} ({} bytes) in session {}", key, bytes.len(), session);
        Ok(ArtifactRef {
            session: session.clone(),
            key: key.clone(),
            digest: digest_hex(bytes),
            size: bytes.len(),
            location: Some(path),
        })
    }

    async fn get(&self, session: &SessionId, key: &ArtifactKey) -> Result<Vec<u8>, StorageError> {
        key.validate()?;
        let path = self.path_for(session, key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(not_found(session, key)),
            Err(e) => Err(StorageError::Io(e)),
        }
    }

    async fn list(
        &self,
        session: &SessionId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactKey>, StorageError> {
        let ns_dir = self.root.join(session.as_str()).join(kind.as_str());
        let keys = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<ArtifactKey>> {
            let mut keys = Vec::new();
            if !ns_dir.is_dir() {
                return Ok(keys);
            }
            for entry in fs::read_dir(&ns_dir)? {
                let entry = entry?;
                let dir_name = entry.file_name().to_string_lossy().into_owned();
                let Some(revision) = dir_name.strip_prefix('r').and_then(|r| r.parse::<u32>().ok())
                else {
                    continue;
                };
                let mut names = Vec::new();
                walk_names(&entry.path(), "", &mut names)?;
                keys.extend(names.into_iter().map(|name| ArtifactKey::new(kind, revision, name)));
            }
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))??;

        let mut keys = keys;
        keys.sort_by(|a, b| a.revision.cmp(&b.revision).then_with(|| a.name.cmp(&b.name)));
        Ok(keys)
    }

    fn session_location(&self, session: &SessionId) -> Option<PathBuf> {
        Some(self.root.join(session.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsArtifactStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn layout_is_session_namespace_revision() {
        let (dir, store) = make_store();
        let s: SessionId = "sess-1".parse().unwrap();
        let key = ArtifactKey::new(ArtifactKind::Document, 3, "attempt-1.tex");
        let r = store.put(&s, &key, b"\\documentclass{beamer}").await.unwrap();
        let expected = dir.path().join("sess-1/document/r3/attempt-1.tex");
        assert_eq!(r.location.as_deref(), Some(expected.as_path()));
        assert!(expected.exists());
    }

    #[tokio::test]
    async fn append_only_on_disk() {
        let (_dir, store) = make_store();
        let s = SessionId::new();
        let key = ArtifactKey::new(ArtifactKind::Plan, 0, "plan.json");
        store.put(&s, &key, b"v1").await.unwrap();
        let err = store.put(&s, &key, b"v2").await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
        assert_eq!(store.get(&s, &key).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn list_walks_nested_names() {
        let (_dir, store) = make_store();
        let s = SessionId::new();
        store
            .put(&s, &ArtifactKey::new(ArtifactKind::Raw, 0, "figures/fig-1.png"), b"png")
            .await
            .unwrap();
        store
            .put(&s, &ArtifactKey::new(ArtifactKind::Raw, 0, "bundle.json"), b"{}")
            .await
            .unwrap();
        let keys = store.list(&s, ArtifactKind::Raw).await.unwrap();
        let names: Vec<_> = keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, vec!["bundle.json", "figures/fig-1.png"]);
    }

    #[tokio::test]
    async fn missing_artifact_is_not_found() {
        let (_dir, store) = make_store();
        let s = SessionId::new();
        let err = store
            .get(&s, &ArtifactKey::new(ArtifactKind::Speech, 0, "speech.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
        assert!(store.list(&s, ArtifactKind::Speech).await.unwrap().is_empty());
    }
}
