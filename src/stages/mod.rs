//! Stage clients.
//!
//! Each processing capability sits behind a small async trait. The
//! orchestrator never knows whether a stage runs in-process, calls a hosted
//! AI API, or talks to a sibling service; it only sees these contracts.
//!
//! Implementations must be safe to call concurrently from several topics and
//! must not keep per-call mutable state. Deadlines and cancellation are
//! enforced by the pipeline around every call.

mod llm;
mod remote;
mod scribe;
mod speech;
mod whisper;

pub use llm::{
    parse_topic_lines, LlmGapReviewer, LlmPerformanceAnalyzer, LlmScriptGenerator,
    LlmTopicExtractor,
};
pub use remote::RemoteServices;
pub use scribe::ElevenLabsScribeTranscriber;
pub(crate) use speech::elevenlabs_api_key;
pub use speech::{split_for_speech, ElevenLabsSynthesizer, OpenAISpeechSynthesizer};
pub use whisper::WhisperTranscriber;

use crate::config::{
    Prompts, RetrievalProvider, Settings, StageProvider, SynthesisProvider, TranscriptionProvider,
};
use crate::error::Result;
use crate::knowledge::KnowledgeBaseRetriever;
use crate::session::Stage;
use async_trait::async_trait;
use std::sync::Arc;

/// Turns a recording into transcript text.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, audio_ref: &str) -> Result<String>;
}

/// Lists the topics discussed in a transcript, in order of appearance.
///
/// An empty list is a valid answer.
#[async_trait]
pub trait TopicExtractor: Send + Sync {
    async fn extract_topics(&self, transcript: &str) -> Result<Vec<String>>;
}

/// Summarizes how the student performed, to steer script tone.
#[async_trait]
pub trait PerformanceAnalyzer: Send + Sync {
    async fn analyze(&self, transcript: &str, topics: &[String]) -> Result<String>;
}

/// Explains the knowledge gaps a performance summary points out.
#[async_trait]
pub trait GapReviewer: Send + Sync {
    async fn review(&self, transcript: &str, topics: &[String], summary: &str) -> Result<String>;
}

/// Retrieves grounding material for one topic.
#[async_trait]
pub trait FactRetriever: Send + Sync {
    async fn retrieve_facts(&self, topic: &str) -> Result<String>;

    /// Prepare expensive shared state (such as a search index) ahead of the
    /// per-topic calls. Runs once per session, outside any stage deadline.
    async fn warm(&self) -> Result<()> {
        Ok(())
    }
}

/// Writes the narration script for one topic.
#[async_trait]
pub trait ScriptGenerator: Send + Sync {
    async fn generate_script(
        &self,
        topic: &str,
        facts: &str,
        context: &GenerationContext,
    ) -> Result<String>;
}

/// Speaks a script.
#[async_trait]
pub trait AudioSynthesizer: Send + Sync {
    /// Returns encoded MP3 audio.
    async fn synthesize(&self, script: &str) -> Result<Vec<u8>>;
}

/// Context shared with script generation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationContext {
    /// Student performance summary for the whole session.
    pub performance_summary: Option<String>,
    /// Explanations of the student's knowledge gaps.
    pub gap_review: Option<String>,
    /// Topic that precedes this one in display order.
    pub previous_topic: Option<String>,
    /// Facts already retrieved for the previous topic.
    pub previous_facts: Option<String>,
}

/// The full set of stage clients used by one orchestrator.
#[derive(Clone)]
pub struct StageClients {
    pub transcriber: Arc<dyn Transcriber>,
    pub extractor: Arc<dyn TopicExtractor>,
    /// Optional; the pipeline runs without a performance summary when absent.
    pub analyzer: Option<Arc<dyn PerformanceAnalyzer>>,
    /// Optional; only runs when a performance summary exists.
    pub gap_reviewer: Option<Arc<dyn GapReviewer>>,
    pub retriever: Arc<dyn FactRetriever>,
    pub generator: Arc<dyn ScriptGenerator>,
    pub synthesizer: Arc<dyn AudioSynthesizer>,
}

impl StageClients {
    /// Build the configured stage clients.
    pub fn from_settings(settings: &Settings, prompts: &Prompts) -> Result<Self> {
        let remote = Arc::new(RemoteServices::new(&settings.remote, settings)?);

        let transcriber: Arc<dyn Transcriber> = match settings.transcription.provider {
            TranscriptionProvider::OpenAI => Arc::new(WhisperTranscriber::with_config(
                &settings.transcription.model,
                settings.transcription.language.as_deref(),
                settings.stage_timeout(Stage::Transcription),
            )?),
            TranscriptionProvider::ElevenLabs => Arc::new(
                ElevenLabsScribeTranscriber::from_settings(&settings.transcription)?,
            ),
            TranscriptionProvider::Remote => remote.clone(),
        };

        let extractor: Arc<dyn TopicExtractor> = match settings.extraction.provider {
            StageProvider::OpenAI => Arc::new(LlmTopicExtractor::new(
                &settings.extraction.model,
                prompts.clone(),
                settings.stage_timeout(Stage::TopicExtraction),
            )?),
            StageProvider::Remote => remote.clone(),
        };

        let analyzer: Option<Arc<dyn PerformanceAnalyzer>> = if settings.analysis.enabled {
            let analyzer: Arc<dyn PerformanceAnalyzer> = match settings.analysis.provider {
                StageProvider::OpenAI => Arc::new(LlmPerformanceAnalyzer::new(
                    &settings.analysis.model,
                    prompts.clone(),
                    settings.stage_timeout(Stage::PerformanceAnalysis),
                )?),
                StageProvider::Remote => remote.clone(),
            };
            Some(analyzer)
        } else {
            None
        };

        let retriever: Arc<dyn FactRetriever> = match settings.retrieval.provider {
            RetrievalProvider::KnowledgeBase => Arc::new(KnowledgeBaseRetriever::from_settings(
                &settings.retrieval,
                settings.knowledge_dir(),
                settings.data_dir().join("knowledge_index.json"),
            )?),
            RetrievalProvider::Remote => remote.clone(),
        };

        let gap_reviewer: Option<Arc<dyn GapReviewer>> =
            if settings.analysis.enabled && settings.gap_review.enabled {
                Some(Arc::new(LlmGapReviewer::new(
                    &settings.gap_review.model,
                    settings.gap_review.temperature,
                    prompts.clone(),
                    retriever.clone(),
                    settings.stage_timeout(Stage::GapReview),
                )?))
            } else {
                None
            };

        let generator: Arc<dyn ScriptGenerator> = match settings.generation.provider {
            StageProvider::OpenAI => Arc::new(LlmScriptGenerator::new(
                &settings.generation.model,
                settings.generation.temperature,
                prompts.clone(),
                settings.stage_timeout(Stage::ScriptGeneration),
            )?),
            StageProvider::Remote => remote.clone(),
        };

        let synthesizer: Arc<dyn AudioSynthesizer> = match settings.synthesis.provider {
            SynthesisProvider::OpenAI => Arc::new(OpenAISpeechSynthesizer::new(
                &settings.synthesis.model,
                &settings.synthesis.voice,
                settings.stage_timeout(Stage::AudioSynthesis),
            )?),
            SynthesisProvider::ElevenLabs => {
                Arc::new(ElevenLabsSynthesizer::from_settings(&settings.synthesis)?)
            }
        };

        Ok(Self {
            transcriber,
            extractor,
            analyzer,
            gap_reviewer,
            retriever,
            generator,
            synthesizer,
        })
    }
}
