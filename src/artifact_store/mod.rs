//! Artifact store abstraction for Studycast.
//!
//! Every stage output is persisted under the session's namespace so later
//! stages and resumed sessions can read prior results without recomputation.

mod fs;
mod memory;

pub use fs::FsArtifactStore;
pub use memory::MemoryArtifactStore;

use crate::error::{Result, StudycastError};
use crate::session::{Session, SessionId, Stage};
use async_trait::async_trait;
use std::path::PathBuf;

/// File name of the persisted session snapshot.
pub const SESSION_FILE: &str = "session.json";

/// Address of one artifact: `(session, stage, topic?)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactKey {
    pub session_id: SessionId,
    pub stage: Stage,
    pub topic: Option<String>,
}

impl ArtifactKey {
    /// Key for a session-level artifact (transcript, topic list, summary).
    pub fn session(session_id: &SessionId, stage: Stage) -> Self {
        Self {
            session_id: session_id.clone(),
            stage,
            topic: None,
        }
    }

    /// Key for a per-topic artifact (facts, script, audio).
    pub fn topic(session_id: &SessionId, stage: Stage, topic: &str) -> Self {
        Self {
            session_id: session_id.clone(),
            stage,
            topic: Some(topic.to_string()),
        }
    }

    /// Check that the topic component matches the stage's level.
    ///
    /// A mismatch is the caller's mistake, so it is reported as invalid input.
    pub fn validate(&self) -> Result<()> {
        match (self.stage.is_session_level(), &self.topic) {
            (true, Some(topic)) => Err(StudycastError::InvalidInput(format!(
                "{} is a session-level artifact but topic {:?} was given",
                self.stage, topic
            ))),
            (false, None) => Err(StudycastError::InvalidInput(format!(
                "{} artifacts require a topic",
                self.stage
            ))),
            (false, Some(topic)) if topic.trim().is_empty() => Err(StudycastError::InvalidInput(
                "Topic name must not be empty".to_string(),
            )),
            _ => Ok(()),
        }
    }

    /// Path of this artifact relative to the store root.
    pub fn relative_path(&self) -> PathBuf {
        let mut path = PathBuf::from(self.session_id.as_str());
        if let Some(topic) = &self.topic {
            path.push("topics");
            path.push(encode_topic(topic));
        }
        path.push(artifact_file_name(self.stage));
        path
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.topic {
            Some(topic) => write!(f, "{}/{}/{}", self.session_id, self.stage.slug(), topic),
            None => write!(f, "{}/{}", self.session_id, self.stage.slug()),
        }
    }
}

/// File name used for a stage's artifact.
pub fn artifact_file_name(stage: Stage) -> &'static str {
    match stage {
        Stage::Transcription => "transcript.txt",
        Stage::TopicExtraction => "topics.json",
        Stage::PerformanceAnalysis => "performance.txt",
        Stage::GapReview => "gap_review.txt",
        Stage::FactRetrieval => "facts.txt",
        Stage::ScriptGeneration => "script.txt",
        Stage::AudioSynthesis => "audio.mp3",
    }
}

/// Encode a topic name into a path-safe directory name.
///
/// ASCII alphanumerics and `-` pass through, spaces become `_`, and every
/// other byte is written as `%XX`, so distinct topics never collide.
pub fn encode_topic(topic: &str) -> String {
    let mut out = String::with_capacity(topic.len());
    for byte in topic.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' => out.push(byte as char),
            b' ' => out.push('_'),
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

/// Trait for artifact storage backends.
///
/// `get` on a missing key yields `Ok(None)` rather than an error; callers use
/// that to skip stages whose output already exists.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Durably write an artifact, returning its location reference.
    ///
    /// The write is complete (flushed) when this returns.
    async fn put(&self, key: &ArtifactKey, data: &[u8]) -> Result<String>;

    /// Read an artifact, or `None` if it was never written.
    async fn get(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>>;

    /// Location reference for a key (whether or not it exists yet).
    fn locate(&self, key: &ArtifactKey) -> String;

    /// Persist the session snapshot.
    async fn save_session(&self, session: &Session) -> Result<()>;

    /// Load a session snapshot, or `None` if unknown.
    async fn load_session(&self, session_id: &SessionId) -> Result<Option<Session>>;

    /// All sessions that have a snapshot.
    async fn list_sessions(&self) -> Result<Vec<SessionId>>;

    /// Whether an artifact exists.
    async fn exists(&self, key: &ArtifactKey) -> Result<bool> {
        Ok(self.get(key).await?.is_some())
    }

    /// Read a text artifact.
    async fn get_text(&self, key: &ArtifactKey) -> Result<Option<String>> {
        Ok(self
            .get(key)
            .await?
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }

    /// Write a text artifact.
    async fn put_text(&self, key: &ArtifactKey, text: &str) -> Result<String> {
        self.put(key, text.as_bytes()).await
    }
}
