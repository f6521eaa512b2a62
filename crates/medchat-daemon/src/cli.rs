//! CLI argument parsing for the medchat daemon.
//!
//! CLI flags override all other config sources.

use clap::{Parser, Subcommand};

/// medchat
///
/// Personalized medical chat with long-term patient memory.
#[derive(Parser, Debug)]
#[command(name = "medchat")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/medchat/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the daemon: load the embedding model, schedule backfill, wait
    /// for Ctrl+C
    Start {
        /// JSON snapshot file for the in-memory store
        #[arg(long)]
        data_path: Option<String>,

        /// Do not schedule the embedding backfill job
        #[arg(long)]
        no_backfill: bool,
    },

    /// Interactive chat against the configured model
    Chat {
        /// Model id (default from preferences or config)
        #[arg(short, long)]
        model: Option<String>,

        /// Do not keep history between turns
        #[arg(short, long)]
        temporary: bool,

        /// User id the conversation belongs to
        #[arg(short, long, default_value = "local")]
        user: String,

        /// JSON snapshot file for the in-memory store
        #[arg(long)]
        data_path: Option<String>,
    },

    /// Classify a message as casual or domain
    Classify {
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },

    /// Print the system prompt a message would get
    Prompt {
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,

        /// Preferences as JSON, e.g. '{"ageGroup": "old", "responseLength": "brief"}'
        #[arg(short, long)]
        preferences: Option<String>,
    },

    /// List supported chat models
    Models,

    /// Print effective configuration with secrets masked
    Config,
}
