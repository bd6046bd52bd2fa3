//! Error types for Studycast.

use thiserror::Error;

/// Library-level error type for Studycast operations.
#[derive(Error, Debug)]
pub enum StudycastError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Topic extraction failed: {0}")]
    Extraction(String),

    #[error("Performance analysis failed: {0}")]
    Analysis(String),

    #[error("Gap review failed: {0}")]
    GapReview(String),

    #[error("Fact retrieval failed: {0}")]
    Retrieval(String),

    #[error("Script generation failed: {0}")]
    Generation(String),

    #[error("Audio synthesis failed: {0}")]
    Synthesis(String),

    #[error("Artifact store error: {0}")]
    Artifact(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Job queue error: {0}")]
    Queue(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAI API error: {0}")]
    OpenAI(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type alias for Studycast operations.
pub type Result<T> = std::result::Result<T, StudycastError>;
