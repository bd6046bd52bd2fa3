//! Configuration settings for Studycast.

use crate::session::Stage;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub general: GeneralSettings,
    pub pipeline: PipelineSettings,
    pub transcription: TranscriptionSettings,
    pub extraction: ExtractionSettings,
    pub analysis: AnalysisSettings,
    pub gap_review: GapReviewSettings,
    pub retrieval: RetrievalSettings,
    pub generation: GenerationSettings,
    pub synthesis: SynthesisSettings,
    pub remote: RemoteSettings,
    pub server: ServerSettings,
    pub prompts: PromptSettings,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralSettings {
    /// Directory for storing application data.
    pub data_dir: String,
    /// Directory holding per-session artifacts.
    pub sessions_dir: String,
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: "~/.studycast".to_string(),
            sessions_dir: "~/.studycast/sessions".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Maximum number of topic sub-pipelines in flight at once.
    /// Caps simultaneous calls to shared downstream services.
    pub max_concurrent_topics: usize,
    /// Mark the session failed when every topic errors.
    pub fail_on_total_topic_failure: bool,
    /// Pass the previous topic's facts to script generation when available.
    pub include_previous_facts: bool,
    /// Sessions the background job queue runs at once.
    pub max_concurrent_sessions: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_topics: 3,
            fail_on_total_topic_failure: false,
            include_previous_facts: true,
            max_concurrent_sessions: 2,
        }
    }
}

/// Backend for LLM-style stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StageProvider {
    /// Call OpenAI directly from this process.
    #[default]
    OpenAI,
    /// Call an independently deployed sibling service.
    Remote,
}

impl std::str::FromStr for StageProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" => Ok(StageProvider::OpenAI),
            "remote" | "service" => Ok(StageProvider::Remote),
            _ => Err(format!("Unknown stage provider: {}", s)),
        }
    }
}

impl std::fmt::Display for StageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StageProvider::OpenAI => write!(f, "openai"),
            StageProvider::Remote => write!(f, "remote"),
        }
    }
}

/// Speech-to-text backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionProvider {
    /// OpenAI Whisper.
    #[default]
    OpenAI,
    /// ElevenLabs Scribe.
    ElevenLabs,
    /// Sibling transcription service.
    Remote,
}

impl std::str::FromStr for TranscriptionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "openai" | "whisper" => Ok(TranscriptionProvider::OpenAI),
            "elevenlabs" | "scribe" => Ok(TranscriptionProvider::ElevenLabs),
            "remote" | "service" => Ok(TranscriptionProvider::Remote),
            _ => Err(format!("Unknown transcription provider: {}", s)),
        }
    }
}

impl std::fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionProvider::OpenAI => write!(f, "openai"),
            TranscriptionProvider::ElevenLabs => write!(f, "elevenlabs"),
            TranscriptionProvider::Remote => write!(f, "remote"),
        }
    }
}

/// Transcription stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionSettings {
    pub provider: TranscriptionProvider,
    /// Whisper model to use.
    pub model: String,
    /// Optional language hint (ISO-639-1).
    pub language: Option<String>,
    /// ElevenLabs Scribe model id.
    pub elevenlabs_model: String,
    /// ElevenLabs API key (falls back to ELEVENLABS_API_KEY).
    pub elevenlabs_api_key: Option<String>,
    /// Ask Scribe to label speakers.
    pub diarize: bool,
    pub timeout_seconds: u64,
}

impl Default for TranscriptionSettings {
    fn default() -> Self {
        Self {
            provider: TranscriptionProvider::OpenAI,
            model: "whisper-1".to_string(),
            language: None,
            elevenlabs_model: "scribe_v1".to_string(),
            elevenlabs_api_key: None,
            diarize: true,
            timeout_seconds: 600,
        }
    }
}

/// Topic extraction stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionSettings {
    pub provider: StageProvider,
    pub model: String,
    /// Keep at most this many topics (0 = no limit).
    pub max_topics: usize,
    pub timeout_seconds: u64,
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            provider: StageProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            max_topics: 12,
            timeout_seconds: 120,
        }
    }
}

/// Student performance analysis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisSettings {
    pub enabled: bool,
    pub provider: StageProvider,
    pub model: String,
    pub timeout_seconds: u64,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: StageProvider::OpenAI,
            model: "gpt-4o-mini".to_string(),
            timeout_seconds: 120,
        }
    }
}

/// Gap review settings.
///
/// Runs after performance analysis and writes grounded explanations for the
/// gaps it found. Needs analysis enabled; always calls OpenAI.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GapReviewSettings {
    pub enabled: bool,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for GapReviewSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            model: "gpt-4o".to_string(),
            temperature: 0.7,
            timeout_seconds: 180,
        }
    }
}

/// Fact retrieval backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalProvider {
    /// Embedding search over a local directory of reference notes.
    #[default]
    KnowledgeBase,
    /// Sibling RAG service.
    Remote,
}

impl std::fmt::Display for RetrievalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RetrievalProvider::KnowledgeBase => write!(f, "knowledge_base"),
            RetrievalProvider::Remote => write!(f, "remote"),
        }
    }
}

/// Fact retrieval stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub provider: RetrievalProvider,
    /// Directory of `.txt`/`.md` reference material.
    pub knowledge_dir: String,
    /// Embedding model for the knowledge base.
    pub embedding_model: String,
    /// Embedding dimensions.
    pub dimensions: u32,
    /// Number of passages to return per topic.
    pub top_k: usize,
    /// Minimum cosine similarity for a passage to count as grounding.
    pub min_score: f32,
    pub timeout_seconds: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            provider: RetrievalProvider::KnowledgeBase,
            knowledge_dir: "~/.studycast/knowledge".to_string(),
            embedding_model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            top_k: 5,
            min_score: 0.25,
            timeout_seconds: 60,
        }
    }
}

/// Script generation stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub provider: StageProvider,
    pub model: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            provider: StageProvider::OpenAI,
            model: "gpt-4o".to_string(),
            temperature: 0.5,
            timeout_seconds: 180,
        }
    }
}

/// Text-to-speech backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisProvider {
    #[default]
    OpenAI,
    ElevenLabs,
}

impl std::fmt::Display for SynthesisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisProvider::OpenAI => write!(f, "openai"),
            SynthesisProvider::ElevenLabs => write!(f, "elevenlabs"),
        }
    }
}

/// Audio synthesis stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisSettings {
    pub provider: SynthesisProvider,
    /// OpenAI speech model.
    pub model: String,
    /// OpenAI voice name.
    pub voice: String,
    /// ElevenLabs voice id.
    pub elevenlabs_voice_id: String,
    /// ElevenLabs model id.
    pub elevenlabs_model: String,
    /// ElevenLabs API key (falls back to ELEVENLABS_API_KEY).
    pub elevenlabs_api_key: Option<String>,
    pub timeout_seconds: u64,
}

impl Default for SynthesisSettings {
    fn default() -> Self {
        Self {
            provider: SynthesisProvider::OpenAI,
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
            elevenlabs_voice_id: "21m00Tcm4TlvDq8ikWAM".to_string(),
            elevenlabs_model: "eleven_multilingual_v2".to_string(),
            elevenlabs_api_key: None,
            timeout_seconds: 300,
        }
    }
}

/// Endpoints of sibling services used by `remote` providers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub whisper_url: String,
    pub topic_url: String,
    pub rag_url: String,
    pub scriptgen_url: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            whisper_url: "http://localhost:8000".to_string(),
            topic_url: "http://localhost:8001".to_string(),
            rag_url: "http://localhost:8002".to_string(),
            scriptgen_url: "http://localhost:8003".to_string(),
        }
    }
}

/// HTTP API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Prompt customization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct PromptSettings {
    /// Directory for custom prompts (overrides defaults).
    pub custom_dir: Option<String>,
    /// Custom variables available in all prompts as {{variable_name}}.
    pub variables: std::collections::HashMap<String, String>,
}

impl Settings {
    /// Load settings from the default configuration file.
    pub fn load() -> crate::error::Result<Self> {
        Self::load_from(None)
    }

    /// Load settings from a specific path, or default location if None.
    pub fn load_from(path: Option<&PathBuf>) -> crate::error::Result<Self> {
        let config_path = match path {
            Some(p) => p.clone(),
            None => Self::default_config_path(),
        };

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let settings: Settings = toml::from_str(&content)?;
            settings.validate()?;
            Ok(settings)
        } else {
            Ok(Settings::default())
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.pipeline.max_concurrent_topics == 0 {
            return Err(crate::error::StudycastError::Config(
                "pipeline.max_concurrent_topics must be at least 1".to_string(),
            ));
        }
        if self.pipeline.max_concurrent_sessions == 0 {
            return Err(crate::error::StudycastError::Config(
                "pipeline.max_concurrent_sessions must be at least 1".to_string(),
            ));
        }
        for stage in [
            Stage::Transcription,
            Stage::TopicExtraction,
            Stage::PerformanceAnalysis,
            Stage::GapReview,
            Stage::FactRetrieval,
            Stage::ScriptGeneration,
            Stage::AudioSynthesis,
        ] {
            if self.stage_timeout(stage).is_zero() {
                return Err(crate::error::StudycastError::Config(format!(
                    "Timeout for {} must be greater than zero",
                    stage
                )));
            }
        }
        Ok(())
    }

    /// Save settings to the default configuration file.
    pub fn save(&self) -> crate::error::Result<()> {
        self.save_to(&Self::default_config_path())
    }

    /// Save settings to a specific path.
    pub fn save_to(&self, path: &PathBuf) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::StudycastError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path.
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("studycast")
            .join("config.toml")
    }

    /// Expand shell variables in paths (e.g., ~).
    pub fn expand_path(path: &str) -> PathBuf {
        PathBuf::from(shellexpand::tilde(path).to_string())
    }

    /// Get the expanded data directory path.
    pub fn data_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.data_dir)
    }

    /// Get the expanded session artifact directory path.
    pub fn sessions_dir(&self) -> PathBuf {
        Self::expand_path(&self.general.sessions_dir)
    }

    /// Get the expanded knowledge base directory path.
    pub fn knowledge_dir(&self) -> PathBuf {
        Self::expand_path(&self.retrieval.knowledge_dir)
    }

    /// Deadline for one invocation of a stage.
    pub fn stage_timeout(&self, stage: Stage) -> Duration {
        let secs = match stage {
            Stage::Transcription => self.transcription.timeout_seconds,
            Stage::TopicExtraction => self.extraction.timeout_seconds,
            Stage::PerformanceAnalysis => self.analysis.timeout_seconds,
            Stage::GapReview => self.gap_review.timeout_seconds,
            Stage::FactRetrieval => self.retrieval.timeout_seconds,
            Stage::ScriptGeneration => self.generation.timeout_seconds,
            Stage::AudioSynthesis => self.synthesis.timeout_seconds,
        };
        Duration::from_secs(secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.pipeline.max_concurrent_topics, 3);
        assert_eq!(
            settings.stage_timeout(Stage::Transcription),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let settings: Settings = toml::from_str(
            r#"
            [pipeline]
            max_concurrent_topics = 8

            [retrieval]
            provider = "remote"

            [synthesis]
            provider = "elevenlabs"
            "#,
        )
        .unwrap();

        assert_eq!(settings.pipeline.max_concurrent_topics, 8);
        assert!(!settings.pipeline.fail_on_total_topic_failure);
        assert_eq!(settings.retrieval.provider, RetrievalProvider::Remote);
        assert_eq!(settings.synthesis.provider, SynthesisProvider::ElevenLabs);
        assert_eq!(settings.transcription.model, "whisper-1");
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut settings = Settings::default();
        settings.pipeline.max_concurrent_topics = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("remote".parse::<StageProvider>().unwrap(), StageProvider::Remote);
        assert_eq!("OpenAI".parse::<StageProvider>().unwrap(), StageProvider::OpenAI);
        assert!("local".parse::<StageProvider>().is_err());
        assert_eq!(
            "scribe".parse::<TranscriptionProvider>().unwrap(),
            TranscriptionProvider::ElevenLabs
        );
    }

    #[test]
    fn test_scribe_transcription_from_toml() {
        let settings: Settings = toml::from_str(
            r#"
            [transcription]
            provider = "elevenlabs"
            language = "en"
            "#,
        )
        .unwrap();

        assert_eq!(settings.transcription.provider, TranscriptionProvider::ElevenLabs);
        assert_eq!(settings.transcription.elevenlabs_model, "scribe_v1");
        assert!(settings.transcription.diarize);
        assert_eq!(settings.transcription.provider.to_string(), "elevenlabs");
    }
}
