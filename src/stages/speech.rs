//! Text-to-speech: OpenAI speech models or ElevenLabs.

use super::AudioSynthesizer;
use crate::config::SynthesisSettings;
use crate::error::{Result, StudycastError};
use crate::openai::create_client_with_timeout;
use async_openai::types::{CreateSpeechRequestArgs, SpeechModel, SpeechResponseFormat, Voice};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, instrument};

/// OpenAI rejects speech input longer than this.
const OPENAI_MAX_INPUT_CHARS: usize = 4096;

pub(crate) const ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io/v1";

/// ElevenLabs key from config, else from `ELEVENLABS_API_KEY`. Blank counts as unset.
pub(crate) fn elevenlabs_api_key(configured: Option<&str>) -> Option<String> {
    configured
        .filter(|k| !k.is_empty())
        .map(str::to_string)
        .or_else(|| std::env::var("ELEVENLABS_API_KEY").ok().filter(|k| !k.is_empty()))
}

/// Split a script into pieces of at most `max_chars` characters, preferring
/// sentence boundaries and falling back to word boundaries.
pub fn split_for_speech(script: &str, max_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in sentences(script) {
        if current.chars().count() + sentence.chars().count() + 1 > max_chars && !current.is_empty()
        {
            pieces.push(std::mem::take(&mut current));
        }

        if sentence.chars().count() > max_chars {
            for word in sentence.split_whitespace() {
                if current.chars().count() + word.chars().count() + 1 > max_chars
                    && !current.is_empty()
                {
                    pieces.push(std::mem::take(&mut current));
                }
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
            }
            continue;
        }

        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(sentence);
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn sentences(text: &str) -> impl Iterator<Item = &str> {
    let mut start = 0;
    let mut out = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        let boundary = matches!(c, '.' | '!' | '?' | '\n')
            && chars.peek().map_or(true, |(_, next)| next.is_whitespace());
        if boundary {
            let end = i + c.len_utf8();
            out.push(text[start..end].trim());
            start = end;
        }
    }
    out.push(text[start..].trim());
    out.into_iter().filter(|s| !s.is_empty())
}

fn parse_voice(name: &str) -> Voice {
    match name.to_lowercase().as_str() {
        "echo" => Voice::Echo,
        "fable" => Voice::Fable,
        "onyx" => Voice::Onyx,
        "nova" => Voice::Nova,
        "shimmer" => Voice::Shimmer,
        _ => Voice::Alloy,
    }
}

fn parse_model(name: &str) -> SpeechModel {
    match name {
        "tts-1" => SpeechModel::Tts1,
        "tts-1-hd" => SpeechModel::Tts1Hd,
        other => SpeechModel::Other(other.to_string()),
    }
}

/// OpenAI speech synthesis.
pub struct OpenAISpeechSynthesizer {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    voice: String,
}

impl OpenAISpeechSynthesizer {
    pub fn new(model: &str, voice: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_client_with_timeout(timeout)?,
            model: model.to_string(),
            voice: voice.to_string(),
        })
    }
}

#[async_trait]
impl AudioSynthesizer for OpenAISpeechSynthesizer {
    #[instrument(skip(self, script), fields(chars = script.len()))]
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>> {
        let pieces = split_for_speech(script, OPENAI_MAX_INPUT_CHARS);
        if pieces.is_empty() {
            return Err(StudycastError::Synthesis("Script is empty".to_string()));
        }

        let mut audio = Vec::new();
        for (i, piece) in pieces.iter().enumerate() {
            let request = CreateSpeechRequestArgs::default()
                .model(parse_model(&self.model))
                .voice(parse_voice(&self.voice))
                .input(piece.as_str())
                .response_format(SpeechResponseFormat::Mp3)
                .build()
                .map_err(|e| StudycastError::Synthesis(e.to_string()))?;

            let response = self
                .client
                .audio()
                .speech(request)
                .await
                .map_err(|e| StudycastError::Synthesis(format!("Speech API error: {}", e)))?;

            debug!("Synthesized piece {}/{}", i + 1, pieces.len());
            // MP3 frames concatenate into a playable stream.
            audio.extend_from_slice(&response.bytes);
        }

        if audio.is_empty() {
            return Err(StudycastError::Synthesis(
                "Speech API returned no audio".to_string(),
            ));
        }
        Ok(audio)
    }
}

#[derive(Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
}

#[derive(Serialize)]
struct ElevenLabsRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

/// ElevenLabs speech synthesis.
pub struct ElevenLabsSynthesizer {
    http: reqwest::Client,
    api_key: String,
    voice_id: String,
    model_id: String,
}

impl ElevenLabsSynthesizer {
    pub fn from_settings(settings: &SynthesisSettings) -> Result<Self> {
        let api_key = elevenlabs_api_key(settings.elevenlabs_api_key.as_deref())
            .ok_or_else(|| {
                StudycastError::Config(
                    "ElevenLabs synthesis needs synthesis.elevenlabs_api_key or ELEVENLABS_API_KEY"
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
            voice_id: settings.elevenlabs_voice_id.clone(),
            model_id: settings.elevenlabs_model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/text-to-speech/{}", ELEVENLABS_API_BASE, self.voice_id)
    }
}

#[async_trait]
impl AudioSynthesizer for ElevenLabsSynthesizer {
    #[instrument(skip(self, script), fields(chars = script.len()))]
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>> {
        if script.trim().is_empty() {
            return Err(StudycastError::Synthesis("Script is empty".to_string()));
        }

        let response = self
            .http
            .post(self.endpoint())
            .header("xi-api-key", &self.api_key)
            .header("accept", "audio/mpeg")
            .json(&ElevenLabsRequest {
                text: script,
                model_id: &self.model_id,
                voice_settings: VoiceSettings {
                    stability: 0.5,
                    similarity_boost: 0.5,
                },
            })
            .send()
            .await
            .map_err(|e| StudycastError::Synthesis(format!("ElevenLabs unreachable: {}", e)))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| StudycastError::Synthesis(e.to_string()))?;

        if !status.is_success() {
            return Err(StudycastError::Synthesis(format!(
                "ElevenLabs returned {}: {}",
                status,
                String::from_utf8_lossy(&body).chars().take(300).collect::<String>()
            )));
        }
        if body.is_empty() {
            return Err(StudycastError::Synthesis(
                "ElevenLabs returned no audio".to_string(),
            ));
        }
        Ok(body.to_vec())
    }
}
