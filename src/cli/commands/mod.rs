//! CLI command implementations.

mod artifact;
mod config;
mod doctor;
mod list;
mod run;
mod serve;
mod status;

pub use artifact::run_artifact;
pub use config::run_config;
pub use doctor::run_doctor;
pub use list::run_list;
pub use run::{run_resume, run_session};
pub use serve::run_serve;
pub use status::{run_report, run_status};
