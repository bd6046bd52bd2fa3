//! Session pipeline: stage invocation, per-topic fan-out and the session
//! orchestrator.

pub mod fanout;
pub mod invoke;
pub mod orchestrator;

#[cfg(test)]
pub(crate) mod testing;

pub use fanout::TopicFanOut;
pub use invoke::invoke_stage;
pub use orchestrator::{load_artifact, load_session, SessionOrchestrator};

use crate::artifact_store::{ArtifactKey, ArtifactStore};
use crate::config::Settings;
use crate::session::{Stage, StageError};
use std::time::Duration;

/// Per-stage deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub transcription: Duration,
    pub extraction: Duration,
    pub analysis: Duration,
    pub gap_review: Duration,
    pub retrieval: Duration,
    pub generation: Duration,
    pub synthesis: Duration,
}

impl StageTimeouts {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            transcription: settings.stage_timeout(Stage::Transcription),
            extraction: settings.stage_timeout(Stage::TopicExtraction),
            analysis: settings.stage_timeout(Stage::PerformanceAnalysis),
            gap_review: settings.stage_timeout(Stage::GapReview),
            retrieval: settings.stage_timeout(Stage::FactRetrieval),
            generation: settings.stage_timeout(Stage::ScriptGeneration),
            synthesis: settings.stage_timeout(Stage::AudioSynthesis),
        }
    }

    /// The same deadline for every stage.
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            transcription: timeout,
            extraction: timeout,
            analysis: timeout,
            gap_review: timeout,
            retrieval: timeout,
            generation: timeout,
            synthesis: timeout,
        }
    }

    pub fn get(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Transcription => self.transcription,
            Stage::TopicExtraction => self.extraction,
            Stage::PerformanceAnalysis => self.analysis,
            Stage::GapReview => self.gap_review,
            Stage::FactRetrieval => self.retrieval,
            Stage::ScriptGeneration => self.generation,
            Stage::AudioSynthesis => self.synthesis,
        }
    }
}

/// Orchestration knobs, injected at construction.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_topics: usize,
    /// Keep at most this many topics (0 = no limit).
    pub max_topics: usize,
    pub fail_on_total_topic_failure: bool,
    pub include_previous_facts: bool,
    pub timeouts: StageTimeouts,
}

impl PipelineConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            max_concurrent_topics: settings.pipeline.max_concurrent_topics,
            max_topics: settings.extraction.max_topics,
            fail_on_total_topic_failure: settings.pipeline.fail_on_total_topic_failure,
            include_previous_facts: settings.pipeline.include_previous_facts,
            timeouts: StageTimeouts::from_settings(settings),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

/// Read an artifact; store failures count against the stage that owns it.
pub(crate) async fn read_artifact(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
) -> Result<Option<Vec<u8>>, StageError> {
    store
        .get(key)
        .await
        .map_err(|e| StageError::failed(key.stage, format!("reading {}: {}", key, e)))
}

pub(crate) async fn read_text_artifact(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
) -> Result<Option<String>, StageError> {
    Ok(read_artifact(store, key)
        .await?
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
}

/// Persist an artifact, returning its location.
pub(crate) async fn write_artifact(
    store: &dyn ArtifactStore,
    key: &ArtifactKey,
    data: &[u8],
) -> Result<String, StageError> {
    store
        .put(key, data)
        .await
        .map_err(|e| StageError::failed(key.stage, format!("persisting {}: {}", key, e)))
}
