//! Session data model.
//!
//! A [`Session`] is one end-to-end processing run for one uploaded recording.
//! It is created at intake, mutated only by the orchestrator as stages
//! complete, and becomes terminal at [`SessionStatus::Completed`] or
//! [`SessionStatus::Failed`].

mod report;

pub use report::{SessionOutcome, SessionReport, TopicLine, TopicOutcome};

use crate::error::{Result, StudycastError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Opaque session identifier, also used as the artifact namespace key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Parse an identifier supplied by a caller.
    ///
    /// Only ASCII alphanumerics, `-` and `_` are accepted so an id can never
    /// escape its artifact namespace.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 64
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');

        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(StudycastError::InvalidInput(format!(
                "Invalid session id: {:?}",
                raw
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Named processing steps of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Transcription,
    TopicExtraction,
    PerformanceAnalysis,
    GapReview,
    FactRetrieval,
    ScriptGeneration,
    AudioSynthesis,
}

impl Stage {
    /// Human-readable stage name used in errors and reports.
    pub fn label(self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::TopicExtraction => "topic extraction",
            Stage::PerformanceAnalysis => "performance analysis",
            Stage::GapReview => "gap review",
            Stage::FactRetrieval => "fact retrieval",
            Stage::ScriptGeneration => "script generation",
            Stage::AudioSynthesis => "audio synthesis",
        }
    }

    /// Identifier used in URLs and on the command line.
    pub fn slug(self) -> &'static str {
        match self {
            Stage::Transcription => "transcription",
            Stage::TopicExtraction => "topic_extraction",
            Stage::PerformanceAnalysis => "performance_analysis",
            Stage::GapReview => "gap_review",
            Stage::FactRetrieval => "fact_retrieval",
            Stage::ScriptGeneration => "script_generation",
            Stage::AudioSynthesis => "audio_synthesis",
        }
    }

    /// Session-level stages produce one artifact per session; the rest run
    /// once per topic.
    pub fn is_session_level(self) -> bool {
        matches!(
            self,
            Stage::Transcription
                | Stage::TopicExtraction
                | Stage::PerformanceAnalysis
                | Stage::GapReview
        )
    }

    /// The three steps of a topic sub-pipeline, in execution order.
    pub fn topic_steps() -> [Stage; 3] {
        [
            Stage::FactRetrieval,
            Stage::ScriptGeneration,
            Stage::AudioSynthesis,
        ]
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().replace([' ', '-'], "_").as_str() {
            "transcription" | "transcript" => Ok(Stage::Transcription),
            "topic_extraction" | "topics" => Ok(Stage::TopicExtraction),
            "performance_analysis" | "performance" | "analysis" => {
                Ok(Stage::PerformanceAnalysis)
            }
            "gap_review" | "gaps" | "review" => Ok(Stage::GapReview),
            "fact_retrieval" | "facts" => Ok(Stage::FactRetrieval),
            "script_generation" | "script" => Ok(Stage::ScriptGeneration),
            "audio_synthesis" | "audio" => Ok(Stage::AudioSynthesis),
            _ => Err(format!("Unknown stage: {}", s)),
        }
    }
}

/// How a stage invocation went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageErrorKind {
    /// The stage client returned an error.
    Failed,
    /// The stage client exceeded its deadline.
    TimedOut,
    /// The session was cancelled while the stage was pending.
    Cancelled,
}

impl std::fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageErrorKind::Failed => write!(f, "failed"),
            StageErrorKind::TimedOut => write!(f, "timed out"),
            StageErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A classified stage failure.
///
/// For session-level stages this halts the session; for topic steps it is
/// captured into that topic's [`TopicResult::error`].
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{stage} {kind}: {message}")]
pub struct StageError {
    pub stage: Stage,
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub fn failed(stage: Stage, cause: impl std::fmt::Display) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Failed,
            message: cause.to_string(),
        }
    }

    pub fn timed_out(stage: Stage, after: Duration) -> Self {
        Self {
            stage,
            kind: StageErrorKind::TimedOut,
            message: format!("no response after {:.1}s", after.as_secs_f64()),
        }
    }

    pub fn cancelled(stage: Stage) -> Self {
        Self {
            stage,
            kind: StageErrorKind::Cancelled,
            message: "session cancelled".to_string(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == StageErrorKind::Cancelled
    }
}

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Transcribing,
    ExtractingTopics,
    ProcessingTopics,
    Completed,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Created => "created",
            SessionStatus::Transcribing => "transcribing",
            SessionStatus::ExtractingTopics => "extracting topics",
            SessionStatus::ProcessingTopics => "processing topics",
            SessionStatus::Completed => "completed",
            SessionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Outcome of one topic's sub-pipeline.
///
/// The fields form a strict chain: `audio_ref` is only ever set when
/// `script` is, and `script` only when `facts` is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicResult {
    pub topic: String,
    pub facts: Option<String>,
    pub script: Option<String>,
    pub audio_ref: Option<String>,
    pub error: Option<StageError>,
}

impl TopicResult {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            facts: None,
            script: None,
            audio_ref: None,
            error: None,
        }
    }

    pub fn record_facts(&mut self, facts: String) {
        self.facts = Some(facts);
    }

    /// Returns false (and records nothing) when facts are missing.
    pub fn record_script(&mut self, script: String) -> bool {
        if self.facts.is_none() {
            return false;
        }
        self.script = Some(script);
        true
    }

    /// Returns false (and records nothing) when the script is missing.
    pub fn record_audio(&mut self, audio_ref: String) -> bool {
        if self.script.is_none() {
            return false;
        }
        self.audio_ref = Some(audio_ref);
        true
    }

    pub fn fail(&mut self, error: StageError) {
        self.error = Some(error);
    }

    /// Whether the dependency chain holds.
    pub fn is_consistent(&self) -> bool {
        (self.script.is_none() || self.facts.is_some())
            && (self.audio_ref.is_none() || self.script.is_some())
    }

    /// Narrated end to end.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.audio_ref.is_some()
    }

    pub fn failed_step(&self) -> Option<Stage> {
        self.error.as_ref().map(|e| e.stage)
    }
}

/// One end-to-end processing run for one recording.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub audio_ref: String,
    pub status: SessionStatus,
    pub transcript: Option<String>,
    pub topics: Vec<String>,
    pub performance_summary: Option<String>,
    /// Grounded explanations of the gaps the performance summary found.
    #[serde(default)]
    pub gap_review: Option<String>,
    pub topic_results: HashMap<String, TopicResult>,
    /// Session-level failure, if any.
    pub error: Option<StageError>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(id: SessionId, audio_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            audio_ref: audio_ref.into(),
            status: SessionStatus::Created,
            transcript: None,
            topics: Vec::new(),
            performance_summary: None,
            gap_review: None,
            topic_results: HashMap::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition_to(&mut self, status: SessionStatus) {
        tracing::debug!(session_id = %self.id, from = %self.status, to = %status, "Session transition");
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Mark the session failed with a session-level error.
    pub fn fail(&mut self, error: StageError) {
        self.error = Some(error);
        self.transition_to(SessionStatus::Failed);
    }

    pub fn record_topic_result(&mut self, result: TopicResult) {
        self.topic_results.insert(result.topic.clone(), result);
        self.updated_at = Utc::now();
    }

    /// Topic results in canonical (extraction) order.
    pub fn ordered_results(&self) -> impl Iterator<Item = (&str, Option<&TopicResult>)> {
        self.topics
            .iter()
            .map(move |t| (t.as_str(), self.topic_results.get(t)))
    }

    /// Number of topics narrated end to end.
    pub fn narrated_count(&self) -> usize {
        self.topic_results.values().filter(|r| r.is_success()).count()
    }

    pub fn failed_topic_count(&self) -> usize {
        self.topic_results
            .values()
            .filter(|r| r.error.is_some())
            .count()
    }

    pub fn report(&self) -> SessionReport {
        SessionReport::from_session(self)
    }
}

/// Deduplicate topic names, preserving first-seen order.
///
/// Names are trimmed; comparison is case-insensitive; blanks are dropped.
pub fn dedupe_topics<I, S>(topics: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();
    for topic in topics {
        let trimmed = topic.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_lowercase()) {
            out.push(trimmed.to_string());
        }
    }
    out
}
