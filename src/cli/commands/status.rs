//! Status and report commands.

use crate::cli::Output;
use crate::config::Settings;
use crate::artifact_store::FsArtifactStore;
use crate::pipeline::load_session;
use crate::session::SessionId;
use anyhow::Result;

/// Show the latest snapshot of a session.
pub async fn run_status(session: &str, json: bool, settings: Settings) -> Result<()> {
    let session_id = SessionId::parse(session)?;
    let store = FsArtifactStore::new(settings.sessions_dir())?;
    let session = load_session(&store, &session_id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&session)?);
        return Ok(());
    }

    Output::header(&format!("Session {}", session.id));
    Output::kv("Status", &session.status.to_string());
    Output::kv("Audio", &session.audio_ref);
    Output::kv("Created", &session.created_at.to_rfc3339());
    Output::kv("Updated", &session.updated_at.to_rfc3339());
    if let Some(transcript) = &session.transcript {
        Output::kv("Transcript", &format!("{} characters", transcript.len()));
    }
    if let Some(review) = &session.gap_review {
        Output::kv("Gap review", &format!("{} characters", review.len()));
    }
    Output::kv(
        "Topics",
        &format!(
            "{} ({} narrated, {} failed)",
            session.topics.len(),
            session.narrated_count(),
            session.failed_topic_count()
        ),
    );
    if let Some(error) = &session.error {
        Output::kv("Error", &error.to_string());
    }
    println!();
    Output::report(&session.report());
    Ok(())
}

/// Show the outcome report of a session.
pub async fn run_report(session: &str, json: bool, settings: Settings) -> Result<()> {
    let session_id = SessionId::parse(session)?;
    let store = FsArtifactStore::new(settings.sessions_dir())?;
    let report = load_session(&store, &session_id).await?.report();

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        Output::report(&report);
    }
    Ok(())
}
