//! Run and resume commands.

use crate::cli::{preflight, Output};
use crate::config::Settings;
use crate::pipeline::SessionOrchestrator;
use crate::session::{Session, SessionId, SessionStatus};
use anyhow::{bail, Result};
use tokio_util::sync::CancellationToken;

/// Process a recording end to end.
pub async fn run_session(audio: &str, json: bool, settings: Settings) -> Result<()> {
    let audio_path = Settings::expand_path(audio);
    preflight::check_run(&settings, &audio_path)?;
    let audio_path = std::fs::canonicalize(&audio_path)?;

    let orchestrator = SessionOrchestrator::new(&settings)?;
    let session = orchestrator
        .create_session(&audio_path.to_string_lossy())
        .await?;

    if !json {
        Output::info(&format!("Session {}", session.id));
    }

    let finished = drive(&orchestrator, session.id.clone(), false, json).await?;
    finish(&finished, json)
}

/// Re-run a session, skipping stages that already produced artifacts.
pub async fn run_resume(session: &str, json: bool, settings: Settings) -> Result<()> {
    let session_id = SessionId::parse(session)?;
    preflight::check_credentials(&settings)?;

    let orchestrator = SessionOrchestrator::new(&settings)?;
    let finished = drive(&orchestrator, session_id, true, json).await?;
    finish(&finished, json)
}

/// Run with a spinner and Ctrl+C wired to cancellation.
async fn drive(
    orchestrator: &SessionOrchestrator,
    session_id: SessionId,
    resume: bool,
    quiet: bool,
) -> Result<Session> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let spinner = (!quiet).then(|| Output::spinner("Processing session..."));
    let session = if resume {
        orchestrator.resume(&session_id, &cancel).await?
    } else {
        orchestrator.run(&session_id, &cancel).await?
    };
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    if cancel.is_cancelled() && !quiet {
        Output::warning("Interrupted; resume later with `studycast resume`");
    }
    Ok(session)
}

fn finish(session: &Session, json: bool) -> Result<()> {
    let report = session.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        Output::report(&report);
        Output::kv("Session", session.id.as_str());
    }

    if session.status == SessionStatus::Failed {
        bail!("{}", report.headline());
    }
    Ok(())
}
