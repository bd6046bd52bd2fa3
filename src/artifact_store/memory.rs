//! In-memory artifact store.
//!
//! Useful for testing and one-shot runs that do not need durability.

use super::{ArtifactKey, ArtifactStore};
use crate::error::Result;
use crate::session::{Session, SessionId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

/// In-memory artifact store.
pub struct MemoryArtifactStore {
    artifacts: RwLock<HashMap<ArtifactKey, Vec<u8>>>,
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self {
            artifacts: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored artifacts (session snapshots excluded).
    pub fn len(&self) -> usize {
        self.artifacts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryArtifactStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn put(&self, key: &ArtifactKey, data: &[u8]) -> Result<String> {
        key.validate()?;
        self.artifacts
            .write()
            .unwrap()
            .insert(key.clone(), data.to_vec());
        Ok(self.locate(key))
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>> {
        key.validate()?;
        Ok(self.artifacts.read().unwrap().get(key).cloned())
    }

    fn locate(&self, key: &ArtifactKey) -> String {
        format!("memory://{}", key.relative_path().display())
    }

    async fn save_session(&self, session: &Session) -> Result<()> {
        self.sessions
            .write()
            .unwrap()
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn load_session(&self, session_id: &SessionId) -> Result<Option<Session>> {
        Ok(self.sessions.read().unwrap().get(session_id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut ids: Vec<SessionId> = self.sessions.read().unwrap().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
