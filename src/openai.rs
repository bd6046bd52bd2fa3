//! OpenAI client construction.

use crate::error::{Result, StudycastError};
use async_openai::{config::OpenAIConfig, Client};
use std::time::Duration;

/// Create an OpenAI client whose HTTP layer gives up after `timeout`.
///
/// The pipeline enforces its own per-stage deadline as well; this one only
/// keeps a stalled connection from lingering after the stage has moved on.
pub fn create_client_with_timeout(timeout: Duration) -> Result<Client<OpenAIConfig>> {
    let http_client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| StudycastError::Config(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Client::with_config(OpenAIConfig::default()).with_http_client(http_client))
}
