//! Studycast - narrated topic reviews from recorded study sessions
//!
//! A pipeline that turns one recording of a study session into a set of
//! short, fact-grounded audio reviews, one per topic discussed.
//!
//! # Overview
//!
//! For each session Studycast:
//! - Transcribes the recording
//! - Extracts the topics discussed and, optionally, a performance summary
//! - Retrieves reference facts for every topic from a knowledge base
//! - Writes a review script per topic and synthesizes it to speech
//!
//! Topics are processed concurrently and independently: one failing topic
//! never takes the rest of the session down with it. Every intermediate
//! result is persisted, so an interrupted session can be resumed without
//! repeating finished work.
//!
//! # Architecture
//!
//! - `session` - Session, topic result and stage error types
//! - `artifact_store` - Persistence of intermediate results
//! - `stages` - Stage traits and their OpenAI, ElevenLabs and HTTP backends
//! - `knowledge` - Local knowledge base retrieval over embedded notes
//! - `pipeline` - Orchestration, per-topic fan-out, timeouts and cancellation
//! - `jobs` - Background job queue used by the HTTP API
//! - `config` - Configuration management
//!
//! # Example
//!
//! ```rust,no_run
//! use studycast::config::Settings;
//! use studycast::pipeline::SessionOrchestrator;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = SessionOrchestrator::new(&settings)?;
//!
//!     let session = orchestrator
//!         .run_session("lecture.mp3", &CancellationToken::new())
//!         .await?;
//!     println!("{}", session.report().headline());
//!
//!     Ok(())
//! }
//! ```

pub mod artifact_store;
pub mod cli;
pub mod config;
pub mod error;
pub mod jobs;
pub mod knowledge;
pub mod openai;
pub mod pipeline;
pub mod session;
pub mod stages;

pub use error::{Result, StudycastError};
