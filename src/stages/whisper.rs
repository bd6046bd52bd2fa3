//! OpenAI Whisper transcription.

use super::Transcriber;
use crate::error::{Result, StudycastError};
use crate::openai::create_client_with_timeout;
use async_openai::types::{AudioInput, AudioResponseFormat, CreateTranscriptionRequestArgs};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

/// Largest upload the transcription endpoint accepts.
const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Container formats the transcription endpoint accepts.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "flac", "m4a", "mp3", "mp4", "mpeg", "mpga", "oga", "ogg", "wav", "webm",
];

/// Whisper-based transcriber for local audio files.
pub struct WhisperTranscriber {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    language: Option<String>,
}

impl WhisperTranscriber {
    pub fn with_config(model: &str, language: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            model: model.to_string(),
            language: language.map(|s| s.to_string()),
        })
    }
}

/// Check that a file looks like something Whisper can transcribe.
pub(crate) fn check_audio_file(path: &Path) -> Result<()> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(StudycastError::Transcription(format!(
            "Unsupported audio format '{}' for {}",
            ext,
            path.display()
        )));
    }

    let metadata = std::fs::metadata(path).map_err(|e| {
        StudycastError::Transcription(format!("Cannot read audio {}: {}", path.display(), e))
    })?;

    if metadata.len() == 0 {
        return Err(StudycastError::Transcription(format!(
            "Audio file is empty: {}",
            path.display()
        )));
    }
    if metadata.len() > MAX_UPLOAD_BYTES {
        return Err(StudycastError::Transcription(format!(
            "Audio file is {:.1} MB; the limit is 25 MB",
            metadata.len() as f64 / (1024.0 * 1024.0)
        )));
    }

    Ok(())
}

#[async_trait]
impl Transcriber for WhisperTranscriber {
    #[instrument(skip(self))]
    async fn transcribe(&self, audio_ref: &str) -> Result<String> {
        let path = Path::new(audio_ref);
        check_audio_file(path)?;

        let file_bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let mut request_builder = CreateTranscriptionRequestArgs::default();
        request_builder
            .file(AudioInput::from_vec_u8(file_name, file_bytes))
            .model(&self.model)
            .response_format(AudioResponseFormat::Json);

        if let Some(lang) = &self.language {
            request_builder.language(lang);
        }

        let request = request_builder.build().map_err(|e| {
            StudycastError::Transcription(format!("Failed to build request: {}", e))
        })?;

        let response = self
            .client
            .audio()
            .transcribe(request)
            .await
            .map_err(|e| StudycastError::Transcription(format!("Whisper API error: {}", e)))?;

        let text = response.text.trim().to_string();
        if text.is_empty() {
            return Err(StudycastError::Transcription(
                "Whisper returned an empty transcript".to_string(),
            ));
        }

        debug!("Transcribed {} characters", text.len());
        Ok(text)
    }
}
