//! Session-scoped, append-only artifact storage.
//!
//! Every intermediate result of a run lives under a key
//! `(session, namespace, revision, name)`. A key can be written exactly once;
//! a second write fails with [`StorageError::AlreadyExists`]. New revisions
//! are new keys, so published artifacts are never altered.
//!
//! ## Why a trait?
//!
//! The orchestrator only needs `put`/`get`/`list`. Keeping those behind
//! [`ArtifactStore`] lets tests run the full pipeline against
//! [`MemoryArtifactStore`] while the CLI persists to disk through
//! [`FsArtifactStore`]; an object-store backend would slot in the same way.

pub mod fs;
pub mod memory;
pub mod recording;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;
pub use recording::RecordingStore;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

use crate::error::StorageError;
use crate::model::SessionId;

/// Artifact namespaces. Each maps to one directory per session on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    /// Extraction output: content bundle, transcripts, page images.
    Raw,
    Plan,
    /// LaTeX sources, compile logs and compiled PDFs.
    Document,
    Verification,
    Repair,
    Speech,
    /// Session record and final result.
    Session,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 7] = [
        ArtifactKind::Raw,
        ArtifactKind::Plan,
        ArtifactKind::Document,
        ArtifactKind::Verification,
        ArtifactKind::Repair,
        ArtifactKind::Speech,
        ArtifactKind::Session,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Raw => "raw",
            ArtifactKind::Plan => "plan",
            ArtifactKind::Document => "document",
            ArtifactKind::Verification => "verification",
            ArtifactKind::Repair => "repair",
            ArtifactKind::Speech => "speech",
            ArtifactKind::Session => "session",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address of one artifact inside a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub kind: ArtifactKind,
    pub revision: u32,
    /// Relative name; may contain `/`-separated sub-directories.
    pub name: String,
}

impl ArtifactKey {
    pub fn new(kind: ArtifactKind, revision: u32, name: impl Into<String>) -> Self {
        Self {
            kind,
            revision,
            name: name.into(),
        }
    }

    /// Reject names that could escape the namespace directory.
    pub fn validate(&self) -> Result<(), StorageError> {
        let ok = !self.name.is_empty()
            && self.name.split('/').all(|seg| {
                !seg.is_empty() && !seg.starts_with('.') && !seg.contains('\\')
            });
        if ok {
            Ok(())
        } else {
            Err(StorageError::InvalidName(self.name.clone()))
        }
    }
}

impl fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/r{}/{}", self.kind, self.revision, self.name)
    }
}

/// Receipt for a published artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub session: SessionId,
    pub key: ArtifactKey,
    /// Hex SHA-256 of the stored bytes.
    pub digest: String,
    pub size: usize,
    /// On-disk location, for backends that have one.
    #[serde(default)]
    pub location: Option<PathBuf>,
}

/// Hex SHA-256 of `bytes`.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Append-only key/value storage for session artifacts.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Publish `bytes` under `key`. Fails if the key already exists.
    ///
    /// Implementations must make the write atomic: readers either see the
    /// complete artifact or nothing.
    async fn put(
        &self,
        session: &SessionId,
        key: &ArtifactKey,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StorageError>;

    async fn get(&self, session: &SessionId, key: &ArtifactKey) -> Result<Vec<u8>, StorageError>;

    /// All keys of one namespace, sorted by revision then name.
    async fn list(
        &self,
        session: &SessionId,
        kind: ArtifactKind,
    ) -> Result<Vec<ArtifactKey>, StorageError>;

    async fn exists(&self, session: &SessionId, key: &ArtifactKey) -> Result<bool, StorageError> {
        match self.get(session, key).await {
            Ok(_) => Ok(true),
            Err(StorageError::NotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Highest revision holding an artifact called `name` in `kind`.
    async fn latest_revision(
        &self,
        session: &SessionId,
        kind: ArtifactKind,
        name: &str,
    ) -> Result<Option<u32>, StorageError> {
        Ok(self
            .list(session, kind)
            .await?
            .into_iter()
            .filter(|k| k.name == name)
            .map(|k| k.revision)
            .max())
    }

    /// Human-facing location of the session's artifacts, if any.
    fn session_location(&self, session: &SessionId) -> Option<PathBuf> {
        let _ = session;
        None
    }
}

/// Serialise `value` as pretty JSON and publish it.
pub async fn put_json<T: Serialize + ?Sized>(
    store: &dyn ArtifactStore,
    session: &SessionId,
    key: &ArtifactKey,
    value: &T,
) -> Result<ArtifactRef, StorageError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(session, key, &bytes).await
}

/// Fetch and deserialise a JSON artifact.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ArtifactStore,
    session: &SessionId,
    key: &ArtifactKey,
) -> Result<T, StorageError> {
    let bytes = store.get(session, key).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

pub(crate) fn not_found(session: &SessionId, key: &ArtifactKey) -> StorageError {
    StorageError::NotFound {
        session: session.to_string(),
        kind: key.kind,
        revision: key.revision,
        name: key.name.clone(),
    }
}

pub(crate) fn already_exists(session: &SessionId, key: &ArtifactKey) -> StorageError {
    StorageError::AlreadyExists {
        session: session.to_string(),
        kind: key.kind,
        revision: key.revision,
        name: key.name.clone(),
    }
}
