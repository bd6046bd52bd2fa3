//! CLI module for Studycast.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Studycast - narrated topic reviews from recorded study sessions
///
/// Transcribes a study session, finds the topics discussed, grounds each one
/// in your reference notes and narrates a short review per topic.
#[derive(Parser, Debug)]
#[command(name = "studycast")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "STUDYCAST_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Process a recorded study session end to end
    Run {
        /// Path to the session recording
        audio: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Re-run a session, reusing every artifact already produced
    Resume {
        /// Session id
        session: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the current state of a session
    Status {
        /// Session id
        session: String,

        /// Print the raw session snapshot as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the outcome report of a session
    Report {
        /// Session id
        session: String,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// List known sessions
    List,

    /// Print or save one artifact of a session
    Artifact {
        /// Session id
        session: String,

        /// Stage that produced it (transcript, topics, performance, facts, script, audio)
        stage: String,

        /// Topic, for per-topic artifacts
        #[arg(short, long)]
        topic: Option<String>,

        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Start the HTTP API with a background job queue
    Serve {
        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration and credentials
    Doctor,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}
