//! Stage clients backed by independently deployed sibling services.
//!
//! Endpoints:
//! - `POST {whisper_url}/transcribe` multipart `audio` → `{"transcript": ..}`
//! - `POST {topic_url}/analyze` `{"transcript"}` → `{"topics": [..], "summary": ..}`
//! - `POST {rag_url}/retrieve` `{"topics": [..]}` → `{topic: [passage, ..]}`
//! - `POST {scriptgen_url}/generate` `{"topic", "notes", "summary"?, "gap_review"?}` → `{"script": ..}`
//!
//! Failures are reported as `{"error": ..}` with a non-2xx status.

use super::{
    FactRetriever, GenerationContext, PerformanceAnalyzer, ScriptGenerator, TopicExtractor,
    Transcriber,
};
use crate::config::{RemoteSettings, Settings};
use crate::error::{Result, StudycastError};
use crate::session::Stage;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

/// Client for the sibling whisper/topic/RAG/scriptgen services.
pub struct RemoteServices {
    http: reqwest::Client,
    endpoints: RemoteSettings,
    /// Last `/analyze` reply, keyed by transcript hash. Extraction and
    /// analysis both read it for the same transcript.
    last_analysis: Mutex<Option<(u64, AnalyzeResponse)>>,
}

#[derive(Deserialize)]
struct TranscribeResponse {
    transcript: String,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    transcript: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    topics: Vec<String>,
    #[serde(default)]
    summary: String,
}

#[derive(Serialize)]
struct RetrieveRequest<'a> {
    topics: [&'a str; 1],
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    topic: &'a str,
    notes: Vec<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    gap_review: Option<&'a str>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    script: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl RemoteServices {
    pub fn new(endpoints: &RemoteSettings, settings: &Settings) -> Result<Self> {
        // Longest stage deadline; each call is additionally bounded by the pipeline.
        let timeout = [
            Stage::Transcription,
            Stage::TopicExtraction,
            Stage::PerformanceAnalysis,
            Stage::FactRetrieval,
            Stage::ScriptGeneration,
        ]
        .into_iter()
        .map(|s| settings.stage_timeout(s))
        .max()
        .unwrap_or_default();

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StudycastError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoints: endpoints.clone(),
            last_analysis: Mutex::new(None),
        })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path)
    }

    /// Decode a service reply, turning non-2xx statuses into `err`.
    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        err: fn(String) -> StudycastError,
    ) -> Result<T> {
        let status = response.status();
        let body = response.bytes().await.map_err(|e| err(e.to_string()))?;

        if !status.is_success() {
            let detail = serde_json::from_slice::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or_else(|_| String::from_utf8_lossy(&body).chars().take(300).collect());
            return Err(err(format!("service returned {}: {}", status, detail)));
        }

        serde_json::from_slice(&body).map_err(|e| err(format!("malformed service reply: {}", e)))
    }

    async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: String,
        body: &B,
        err: fn(String) -> StudycastError,
    ) -> Result<T> {
        debug!("POST {}", url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| err(format!("{} unreachable: {}", url, e)))?;
        Self::decode(response, err).await
    }

    async fn analyze_transcript(
        &self,
        transcript: &str,
        err: fn(String) -> StudycastError,
    ) -> Result<AnalyzeResponse> {
        let mut hasher = DefaultHasher::new();
        transcript.hash(&mut hasher);
        let digest = hasher.finish();

        if let Some((cached, reply)) = self.last_analysis.lock().await.as_ref() {
            if *cached == digest {
                debug!("Reusing topic service reply");
                return Ok(reply.clone());
            }
        }

        let reply: AnalyzeResponse = self
            .post_json(
                Self::url(&self.endpoints.topic_url, "analyze"),
                &AnalyzeRequest { transcript },
                err,
            )
            .await?;
        *self.last_analysis.lock().await = Some((digest, reply.clone()));
        Ok(reply)
    }
}

#[async_trait]
impl Transcriber for RemoteServices {
    #[instrument(skip(self))]
    async fn transcribe(&self, audio_ref: &str) -> Result<String> {
        let path = Path::new(audio_ref);
        let bytes = tokio::fs::read(path).await.map_err(|e| {
            StudycastError::Transcription(format!("Cannot read audio {}: {}", audio_ref, e))
        })?;
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.mp3")
            .to_string();

        let form = reqwest::multipart::Form::new().part(
            "audio",
            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
        );

        let url = Self::url(&self.endpoints.whisper_url, "transcribe");
        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| StudycastError::Transcription(format!("{} unreachable: {}", url, e)))?;

        let reply: TranscribeResponse =
            Self::decode(response, StudycastError::Transcription).await?;
        let transcript = reply.transcript.trim().to_string();
        if transcript.is_empty() {
            return Err(StudycastError::Transcription(
                "Transcription service returned an empty transcript".to_string(),
            ));
        }
        Ok(transcript)
    }
}

#[async_trait]
impl TopicExtractor for RemoteServices {
    async fn extract_topics(&self, transcript: &str) -> Result<Vec<String>> {
        let reply = self
            .analyze_transcript(transcript, StudycastError::Extraction)
            .await?;
        Ok(reply
            .topics
            .into_iter()
            .map(|t| t.trim_start_matches(['-', ' ']).trim().to_string())
            .collect())
    }
}

#[async_trait]
impl PerformanceAnalyzer for RemoteServices {
    async fn analyze(&self, transcript: &str, _topics: &[String]) -> Result<String> {
        let reply = self
            .analyze_transcript(transcript, StudycastError::Analysis)
            .await?;
        let summary = reply.summary.trim().to_string();
        if summary.is_empty() {
            return Err(StudycastError::Analysis(
                "Topic service returned no summary".to_string(),
            ));
        }
        Ok(summary)
    }
}

#[async_trait]
impl FactRetriever for RemoteServices {
    #[instrument(skip(self))]
    async fn retrieve_facts(&self, topic: &str) -> Result<String> {
        let reply: HashMap<String, Vec<String>> = self
            .post_json(
                Self::url(&self.endpoints.rag_url, "retrieve"),
                &RetrieveRequest { topics: [topic] },
                StudycastError::Retrieval,
            )
            .await?;

        let passages: Vec<String> = reply
            .get(topic)
            .map(|chunks| {
                chunks
                    .iter()
                    .map(|c| c.trim().to_string())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        if passages.is_empty() {
            return Err(StudycastError::Retrieval(format!(
                "No grounding content found for '{}'",
                topic
            )));
        }
        Ok(passages.join("\n\n"))
    }
}

#[async_trait]
impl ScriptGenerator for RemoteServices {
    #[instrument(skip(self, facts, context))]
    async fn generate_script(
        &self,
        topic: &str,
        facts: &str,
        context: &GenerationContext,
    ) -> Result<String> {
        let notes: Vec<&str> = facts
            .split("\n\n")
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .collect();

        let reply: GenerateResponse = self
            .post_json(
                Self::url(&self.endpoints.scriptgen_url, "generate"),
                &GenerateRequest {
                    topic,
                    notes,
                    summary: context.performance_summary.as_deref(),
                    gap_review: context.gap_review.as_deref(),
                },
                StudycastError::Generation,
            )
            .await?;

        let script = reply.script.trim().to_string();
        if script.is_empty() {
            return Err(StudycastError::Generation(
                "Script service returned an empty script".to_string(),
            ));
        }
        Ok(script)
    }
}
