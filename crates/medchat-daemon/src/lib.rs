//! medchat daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, chat, inspection)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands};
pub use commands::{
    build_service, classify_report, init_logging, load_settings, models_report, prompt_report,
    run_chat, show_config, start_daemon,
};
