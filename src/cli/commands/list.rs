//! List command implementation.

use crate::artifact_store::{ArtifactStore, FsArtifactStore};
use crate::cli::Output;
use crate::config::Settings;
use anyhow::Result;

/// List every session with a snapshot in the sessions directory.
pub async fn run_list(settings: Settings) -> Result<()> {
    let store = FsArtifactStore::new(settings.sessions_dir())?;
    let ids = store.list_sessions().await?;

    if ids.is_empty() {
        Output::info("No sessions yet. Use 'studycast run <audio>' to process one.");
        return Ok(());
    }

    let mut sessions = Vec::with_capacity(ids.len());
    for id in &ids {
        match store.load_session(id).await {
            Ok(Some(session)) => sessions.push(session),
            Ok(None) => {}
            Err(e) => Output::warning(&format!("Skipping {}: {}", id, e)),
        }
    }
    sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Output::header(&format!("Sessions ({})", sessions.len()));
    println!();
    for session in &sessions {
        Output::session_line(session);
    }
    Ok(())
}
