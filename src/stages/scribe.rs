//! ElevenLabs Scribe transcription.

use super::speech::{elevenlabs_api_key, ELEVENLABS_API_BASE};
use super::Transcriber;
use crate::config::TranscriptionSettings;
use crate::error::{Result, StudycastError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Deserialize)]
struct ScribeResponse {
    text: String,
    #[serde(default)]
    words: Vec<ScribeWord>,
}

#[derive(Deserialize)]
struct ScribeWord {
    #[serde(default)]
    speaker_id: Option<String>,
}

/// Speech-to-text through ElevenLabs Scribe.
pub struct ElevenLabsScribeTranscriber {
    http: reqwest::Client,
    api_key: String,
    model_id: String,
    language: Option<String>,
    diarize: bool,
    base_url: String,
}

impl ElevenLabsScribeTranscriber {
    pub fn from_settings(settings: &TranscriptionSettings) -> Result<Self> {
        let api_key = elevenlabs_api_key(settings.elevenlabs_api_key.as_deref()).ok_or_else(|| {
            StudycastError::Config(
                "Scribe transcription needs transcription.elevenlabs_api_key or ELEVENLABS_API_KEY"
                    .to_string(),
            )
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .map_err(|e| StudycastError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_key,
            model_id: settings.elevenlabs_model.clone(),
            language: settings.language.clone(),
            diarize: settings.diarize,
            base_url: ELEVENLABS_API_BASE.to_string(),
        })
    }

    /// Point at another API root, e.g. a regional endpoint.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn endpoint(&self) -> String {
        format!("{}/speech-to-text", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl Transcriber for ElevenLabsScribeTranscriber {
    #[instrument(skip(self))]
    async fn transcribe(&self, audio_ref: &str) -> Result<String> {
        let path = Path::new(audio_ref);
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StudycastError::Transcription(format!("Cannot read audio {}: {}", audio_ref, e))
        })?;
        if bytes.is_empty() {
            return Err(StudycastError::Transcription(format!(
                "Audio file is empty: {}",
                audio_ref
            )));
        }
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let mut form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("model_id", self.model_id.clone())
            .text("diarize", self.diarize.to_string());
        if let Some(language) = &self.language {
            form = form.text("language_code", language.clone());
        }

        let response = self
            .http
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StudycastError::Transcription(format!("Scribe unreachable: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StudycastError::Transcription(format!(
                "Scribe returned {}: {}",
                status,
                body.chars().take(300).collect::<String>()
            )));
        }

        let reply: ScribeResponse = response.json().await.map_err(|e| {
            StudycastError::Transcription(format!("Unexpected Scribe reply: {}", e))
        })?;

        let text = reply.text.trim().to_string();
        if text.is_empty() {
            return Err(StudycastError::Transcription(
                "Scribe returned an empty transcript".to_string(),
            ));
        }

        let speakers: HashSet<&str> = reply
            .words
            .iter()
            .filter_map(|w| w.speaker_id.as_deref())
            .collect();
        debug!(
            chars = text.len(),
            words = reply.words.len(),
            speakers = speakers.len(),
            "Scribe transcript ready"
        );
        Ok(text)
    }
}
