//! Pre-flight checks before expensive operations.
//!
//! Validates that credentials and inputs are available before starting a
//! session that would otherwise fail midway.

use crate::config::{
    RetrievalProvider, Settings, StageProvider, SynthesisProvider, TranscriptionProvider,
};
use crate::error::{Result, StudycastError};
use crate::stages::elevenlabs_api_key;
use std::path::Path;

/// Whether any configured stage calls OpenAI from this process.
pub fn needs_openai(settings: &Settings) -> bool {
    settings.transcription.provider == TranscriptionProvider::OpenAI
        || settings.extraction.provider == StageProvider::OpenAI
        || (settings.analysis.enabled && settings.analysis.provider == StageProvider::OpenAI)
        || (settings.analysis.enabled && settings.gap_review.enabled)
        || settings.retrieval.provider == RetrievalProvider::KnowledgeBase
        || settings.generation.provider == StageProvider::OpenAI
        || settings.synthesis.provider == SynthesisProvider::OpenAI
}

/// Checks for running a session over `audio`.
pub fn check_run(settings: &Settings, audio: &Path) -> Result<()> {
    check_audio(audio)?;
    check_credentials(settings)
}

/// Checks for resuming a session: credentials only.
pub fn check_credentials(settings: &Settings) -> Result<()> {
    if needs_openai(settings) {
        check_api_key()?;
    }
    if settings.transcription.provider == TranscriptionProvider::ElevenLabs
        && elevenlabs_api_key(settings.transcription.elevenlabs_api_key.as_deref()).is_none()
    {
        return Err(StudycastError::Config(
            "Scribe transcription selected but no API key. Set ELEVENLABS_API_KEY or transcription.elevenlabs_api_key".to_string(),
        ));
    }
    if settings.synthesis.provider == SynthesisProvider::ElevenLabs
        && elevenlabs_api_key(settings.synthesis.elevenlabs_api_key.as_deref()).is_none()
    {
        return Err(StudycastError::Config(
            "ElevenLabs synthesis selected but no API key. Set ELEVENLABS_API_KEY or synthesis.elevenlabs_api_key".to_string(),
        ));
    }
    Ok(())
}

fn check_audio(audio: &Path) -> Result<()> {
    if !audio.is_file() {
        return Err(StudycastError::InvalidInput(format!(
            "Audio file not found: {}",
            audio.display()
        )));
    }
    Ok(())
}

/// Check if OpenAI API key is configured.
fn check_api_key() -> Result<()> {
    match std::env::var("OPENAI_API_KEY") {
        Ok(key) if !key.is_empty() => Ok(()),
        Ok(_) => Err(StudycastError::Config(
            "OPENAI_API_KEY is empty. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
        Err(_) => Err(StudycastError::Config(
            "OPENAI_API_KEY not set. Set it with: export OPENAI_API_KEY='sk-...'".to_string(),
        )),
    }
}
