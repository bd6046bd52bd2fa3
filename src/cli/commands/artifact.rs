//! Artifact command implementation.

use crate::cli::Output;
use crate::config::Settings;
use crate::artifact_store::FsArtifactStore;
use crate::pipeline::load_artifact;
use crate::session::{SessionId, Stage};
use anyhow::{anyhow, bail, Result};
use std::io::Write;

/// Print or save one artifact.
pub async fn run_artifact(
    session: &str,
    stage: &str,
    topic: Option<&str>,
    output: Option<&str>,
    settings: Settings,
) -> Result<()> {
    let session_id = SessionId::parse(session)?;
    let stage: Stage = stage.parse().map_err(|e: String| anyhow!(e))?;
    let store = FsArtifactStore::new(settings.sessions_dir())?;

    let Some(bytes) = load_artifact(&store, &session_id, stage, topic).await? else {
        bail!(
            "No {} artifact for session {}{}",
            stage,
            session_id,
            topic.map(|t| format!(" topic '{}'", t)).unwrap_or_default()
        );
    };

    match output {
        Some(path) => {
            let path = Settings::expand_path(path);
            std::fs::write(&path, &bytes)?;
            Output::success(&format!("Wrote {} bytes to {}", bytes.len(), path.display()));
        }
        None if stage == Stage::AudioSynthesis => {
            bail!("Audio is binary; pass --output <file.mp3>");
        }
        None => {
            std::io::stdout().write_all(&bytes)?;
            println!();
        }
    }
    Ok(())
}
