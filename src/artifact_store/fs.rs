//! Filesystem artifact store.
//!
//! Layout: `<root>/<session_id>/{transcript.txt, topics.json, performance.txt,
//! session.json}` and `<root>/<session_id>/topics/<topic>/{facts.txt,
//! script.txt, audio.mp3}`.

use super::{ArtifactKey, ArtifactStore, SESSION_FILE};
use crate::error::{Result, StudycastError};
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Artifact store rooted at a directory.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &ArtifactKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn session_path(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str()).join(SESSION_FILE)
    }

    /// Write to a temp file, flush to disk, then rename into place.
    async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
        let parent = path.parent().ok_or_else(|| {
            StudycastError::Artifact(format!("No parent directory for {}", path.display()))
        })?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("artifact");
        let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let mut file = tokio::fs::File::create(&tmp_path).await?;
        if let Err(e) = async {
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await
        {
            drop(file);
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }
        drop(file);

        tokio::fs::rename(&tmp_path, path).await?;
        Ok(())
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    #[instrument(skip(self, data), fields(key = %key, bytes = data.len()))]
    async fn put(&self, key: &ArtifactKey, data: &[u8]) -> Result<String> {
        key.validate()?;
        let path = self.path_for(key);
        Self::write_atomic(&path, data).await?;
        debug!("Stored artifact at {}", path.display());
        Ok(path.display().to_string())
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>> {
        key.validate()?;
        Self::read_optional(&self.path_for(key)).await
    }

    fn locate(&self, key: &ArtifactKey) -> String {
        self.path_for(key).display().to_string()
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_vec_pretty(session)?;
        Self::write_atomic(&self.session_path(&session.id), &json).await
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        match Self::read_optional(&self.session_path(session_id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut sessions = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            match SessionId::parse(&name) {
                Ok(id) if entry.path().join(SESSION_FILE).exists() => sessions.push(id),
                Ok(_) => {}
                Err(_) => warn!("Ignoring unexpected directory in artifact store: {}", name),
            }
        }

        sessions.sort();
        Ok(sessions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Stage;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let id = SessionId::new();
        let key = ArtifactKey::topic(&id, Stage::ScriptGeneration, "cardiac output");

        let location = store.put_text(&key, "Welcome back.").await.unwrap();
        assert!(location.ends_with("cardiac_output/script.txt"));
        assert_eq!(store.get_text(&key).await.unwrap().as_deref(), Some("Welcome back."));
        assert!(store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_artifact_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let key = ArtifactKey::session(&SessionId::new(), Stage::Transcription);
        assert!(store.get(&key).await.unwrap().is_none());
        assert!(!store.exists(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_content_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let id = SessionId::new();
        let key = ArtifactKey::session(&id, Stage::Transcription);

        store.put_text(&key, "first").await.unwrap();
        store.put_text(&key, "second").await.unwrap();
        assert_eq!(store.get_text(&key).await.unwrap().as_deref(), Some("second"));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join(id.as_str()))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_session_snapshots_are_listed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let session = Session::new(SessionId::new(), "/tmp/a.mp3");

        assert!(store.load_session(&session.id).await.unwrap().is_none());
        store.save_session(&session).await.unwrap();

        let loaded = store.load_session(&session.id).await.unwrap().unwrap();
        assert_eq!(loaded.audio_ref, "/tmp/a.mp3");
        assert_eq!(store.list_sessions().await.unwrap(), vec![session.id.clone()]);
    }

    #[tokio::test]
    async fn test_rejects_mismatched_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path()).unwrap();
        let key = ArtifactKey::session(&SessionId::new(), Stage::FactRetrieval);
        assert!(store.put(&key, b"x").await.is_err());
    }
}
