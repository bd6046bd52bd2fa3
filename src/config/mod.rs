//! Configuration module for Studycast.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AnalysisPrompts, ExtractionPrompts, GapReviewPrompts, Prompts, ScriptPrompts};
pub use settings::{
    AnalysisSettings, ExtractionSettings, GapReviewSettings, GeneralSettings, GenerationSettings,
    PipelineSettings, PromptSettings, RemoteSettings, RetrievalProvider, RetrievalSettings,
    ServerSettings, Settings, StageProvider, SynthesisProvider, SynthesisSettings,
    TranscriptionProvider, TranscriptionSettings,
};
