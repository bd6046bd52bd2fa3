//! Config command implementation.

use crate::cli::{ConfigAction, Output};
use crate::config::Settings;
use anyhow::Result;
use std::path::PathBuf;

/// Run the config command against `config_path`.
pub fn run_config(action: &ConfigAction, config_path: PathBuf, settings: Settings) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let toml_str = toml::to_string_pretty(&settings)
                .map_err(|e| anyhow::anyhow!("Failed to serialize config: {}", e))?;
            println!("{}", toml_str);
        }

        ConfigAction::Init { force } => {
            if config_path.exists() && !force {
                Output::warning(&format!(
                    "Config already exists at {}",
                    config_path.display()
                ));
                Output::info("Use --force to overwrite it with the defaults.");
                return Ok(());
            }
            Settings::default().save_to(&config_path)?;
            Output::success(&format!("Wrote default config to {}", config_path.display()));
        }

        ConfigAction::Edit => {
            if !config_path.exists() {
                settings.save_to(&config_path)?;
                Output::info(&format!("Created default config at {}", config_path.display()));
            }

            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vim".to_string());
            Output::info(&format!("Opening config in {}...", editor));

            match std::process::Command::new(&editor).arg(&config_path).status() {
                Ok(s) if s.success() => {
                    // Surface a broken edit now rather than on the next run.
                    match Settings::load_from(Some(&config_path)) {
                        Ok(_) => Output::success("Config saved."),
                        Err(e) => Output::error(&format!("Config is invalid: {}", e)),
                    }
                }
                Ok(_) => {
                    Output::warning("Editor exited with non-zero status.");
                }
                Err(e) => {
                    Output::error(&format!("Failed to open editor: {}", e));
                    Output::info(&format!("Config file is at: {}", config_path.display()));
                }
            }
        }

        ConfigAction::Path => {
            println!("{}", config_path.display());
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_writes_loadable_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        run_config(&ConfigAction::Init { force: false }, path.clone(), Settings::default()).unwrap();

        let loaded = Settings::load_from(Some(&path)).unwrap();
        assert_eq!(
            loaded.pipeline.max_concurrent_topics,
            Settings::default().pipeline.max_concurrent_topics
        );
    }

    #[test]
    fn test_init_keeps_existing_file_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "# mine\n").unwrap();

        run_config(&ConfigAction::Init { force: false }, path.clone(), Settings::default()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# mine\n");

        run_config(&ConfigAction::Init { force: true }, path.clone(), Settings::default()).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("[pipeline]"));
    }
}
