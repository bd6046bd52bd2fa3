//! Doctor command - verify credentials, services and directories.

use crate::cli::output::format_size;
use crate::cli::preflight::needs_openai;
use crate::cli::Output;
use crate::config::{
    RetrievalProvider, Settings, StageProvider, SynthesisProvider, TranscriptionProvider,
};
use crate::stages::elevenlabs_api_key;
use console::style;
use std::path::Path;

/// Check result for a single item.
#[derive(Debug)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    pub hint: Option<String>,
}

#[derive(Debug, PartialEq)]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

impl CheckResult {
    fn ok(name: &str, message: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message: message.to_string(),
            hint: None,
        }
    }

    fn warning(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Warning,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn error(name: &str, message: &str, hint: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    fn print(&self) {
        let icon = match self.status {
            CheckStatus::Ok => style("✓").green(),
            CheckStatus::Warning => style("!").yellow(),
            CheckStatus::Error => style("✗").red(),
        };

        println!("  {} {} - {}", icon, style(&self.name).bold(), self.message);

        if let Some(hint) = &self.hint {
            println!("    {} {}", style("→").dim(), style(hint).dim());
        }
    }
}

/// Run all diagnostic checks.
pub async fn run_doctor(settings: &Settings, config_path: &Path) -> anyhow::Result<()> {
    Output::header("Studycast Doctor");
    println!();
    println!("Checking configuration, credentials and services...\n");

    let mut checks = Vec::new();

    let mut section = |title: &str, results: Vec<CheckResult>| {
        println!("{}", style(title).bold());
        for check in &results {
            check.print();
        }
        println!();
        checks.extend(results);
    };

    section("Credentials", check_credentials(settings));
    section("Stage Services", check_services(settings).await);
    section("Directories", check_directories(settings));
    section("Configuration", vec![check_config_file(config_path)]);

    let errors = checks.iter().filter(|c| c.status == CheckStatus::Error).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warning).count();

    if errors > 0 {
        Output::error(&format!(
            "{} error(s) found. Please fix them before running a session.",
            errors
        ));
        std::process::exit(1);
    } else if warnings > 0 {
        Output::warning(&format!("All checks passed with {} warning(s).", warnings));
    } else {
        Output::success("All checks passed! Studycast is ready to use.");
    }

    Ok(())
}

fn check_credentials(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    if needs_openai(settings) {
        results.push(check_openai_api_key(std::env::var("OPENAI_API_KEY").ok()));
    } else {
        results.push(CheckResult::ok("OPENAI_API_KEY", "not needed (no OpenAI stages)"));
    }

    if settings.transcription.provider == TranscriptionProvider::ElevenLabs {
        results.push(check_elevenlabs_key(
            "transcription",
            settings.transcription.elevenlabs_api_key.as_deref(),
        ));
    }
    if settings.synthesis.provider == SynthesisProvider::ElevenLabs {
        results.push(check_elevenlabs_key(
            "synthesis",
            settings.synthesis.elevenlabs_api_key.as_deref(),
        ));
    }

    results
}

fn check_elevenlabs_key(section: &str, configured: Option<&str>) -> CheckResult {
    let name = format!("ELEVENLABS_API_KEY ({})", section);
    match elevenlabs_api_key(configured) {
        Some(_) => CheckResult::ok(&name, "configured"),
        None => CheckResult::error(
            &name,
            "not set",
            &format!("Set ELEVENLABS_API_KEY or {}.elevenlabs_api_key", section),
        ),
    }
}

/// Check the OpenAI API key.
fn check_openai_api_key(key: Option<String>) -> CheckResult {
    match key {
        Some(key) if key.starts_with("sk-") && key.len() > 20 => {
            let masked = format!("{}...{}", &key[..7], &key[key.len() - 4..]);
            CheckResult::ok("OPENAI_API_KEY", &format!("configured ({})", masked))
        }
        Some(key) if key.is_empty() => CheckResult::error(
            "OPENAI_API_KEY",
            "empty",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
        Some(_) => CheckResult::warning(
            "OPENAI_API_KEY",
            "set but format looks unusual",
            "Expected format: sk-... (OpenAI API key)",
        ),
        None => CheckResult::error(
            "OPENAI_API_KEY",
            "not set",
            "Set with: export OPENAI_API_KEY='sk-...'",
        ),
    }
}

/// Remote services that configured stages delegate to.
fn remote_endpoints(settings: &Settings) -> Vec<(&'static str, &str)> {
    let remote = &settings.remote;
    let mut endpoints = Vec::new();
    if settings.transcription.provider == TranscriptionProvider::Remote {
        endpoints.push(("Transcription service", remote.whisper_url.as_str()));
    }
    if settings.extraction.provider == StageProvider::Remote
        || (settings.analysis.enabled && settings.analysis.provider == StageProvider::Remote)
    {
        endpoints.push(("Topic service", remote.topic_url.as_str()));
    }
    if settings.retrieval.provider == RetrievalProvider::Remote {
        endpoints.push(("Retrieval service", remote.rag_url.as_str()));
    }
    if settings.generation.provider == StageProvider::Remote {
        endpoints.push(("Script service", remote.scriptgen_url.as_str()));
    }
    endpoints
}

async fn check_services(settings: &Settings) -> Vec<CheckResult> {
    let endpoints = remote_endpoints(settings);
    if endpoints.is_empty() {
        return vec![CheckResult::ok("Remote services", "none configured")];
    }

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(5))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            return vec![CheckResult::error(
                "HTTP client",
                &e.to_string(),
                "Check TLS configuration",
            )]
        }
    };

    let mut results = Vec::new();
    for (name, url) in endpoints {
        // Any HTTP answer means something is listening.
        let result = match client.get(url).send().await {
            Ok(response) => CheckResult::ok(name, &format!("{} ({})", url, response.status())),
            Err(e) => CheckResult::error(
                name,
                &format!("{} unreachable", url),
                &format!("Start the service or fix remote settings: {}", e),
            ),
        };
        results.push(result);
    }
    results
}

fn check_directories(settings: &Settings) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let data_dir = settings.data_dir();
    if data_dir.exists() {
        results.push(CheckResult::ok("Data directory", &data_dir.display().to_string()));
    } else {
        results.push(CheckResult::warning(
            "Data directory",
            &format!("{} (will be created)", data_dir.display()),
            "Directory will be created on first use",
        ));
    }

    let sessions_dir = settings.sessions_dir();
    if sessions_dir.exists() {
        let sessions = std::fs::read_dir(&sessions_dir)
            .map(|entries| entries.filter_map(|e| e.ok()).count())
            .unwrap_or(0);
        let size = dir_size(&sessions_dir);
        results.push(CheckResult::ok(
            "Sessions",
            &format!(
                "{} ({} session(s), {})",
                sessions_dir.display(),
                sessions,
                format_size(size)
            ),
        ));
    } else {
        results.push(CheckResult::warning(
            "Sessions",
            &format!("{} (not created yet)", sessions_dir.display()),
            "Created when the first session runs",
        ));
    }

    if settings.retrieval.provider == RetrievalProvider::KnowledgeBase {
        results.push(check_knowledge_dir(&settings.knowledge_dir()));
    }

    results
}

fn check_knowledge_dir(dir: &Path) -> CheckResult {
    if !dir.is_dir() {
        return CheckResult::error(
            "Knowledge base",
            &format!("{} missing", dir.display()),
            "Create it and add .md or .txt reference notes",
        );
    }
    let has_notes = walk_files(dir).into_iter().any(|p| {
        p.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| matches!(e, "md" | "markdown" | "txt"))
    });
    if has_notes {
        CheckResult::ok("Knowledge base", &dir.display().to_string())
    } else {
        CheckResult::warning(
            "Knowledge base",
            &format!("{} has no notes", dir.display()),
            "Fact retrieval fails for every topic until notes are added",
        )
    }
}

fn walk_files(dir: &Path) -> Vec<std::path::PathBuf> {
    let mut files = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return files;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            files.extend(walk_files(&path));
        } else {
            files.push(path);
        }
    }
    files
}

fn dir_size(dir: &Path) -> u64 {
    walk_files(dir)
        .iter()
        .filter_map(|p| std::fs::metadata(p).ok())
        .map(|m| m.len())
        .sum()
}

fn check_config_file(config_path: &Path) -> CheckResult {
    if config_path.exists() {
        CheckResult::ok("Config file", &config_path.display().to_string())
    } else {
        CheckResult::warning(
            "Config file",
            "using defaults",
            "Create with: studycast config init",
        )
    }
}
