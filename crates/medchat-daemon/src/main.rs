//! medchat daemon
//!
//! Personalized medical chat with long-term patient memory.
//!
//! # Usage
//!
//! ```bash
//! medchat start [--data-path PATH] [--no-backfill]
//! medchat chat [--model MODEL] [--temporary] [--user ID]
//! medchat classify TEXT...
//! medchat prompt [--preferences JSON] TEXT...
//! medchat models
//! medchat config
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/medchat/config.toml)
//! 3. Environment variables (MEDCHAT_*, PERPLEXITY_API_KEY)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use medchat_daemon::{
    classify_report, models_report, prompt_report, run_chat, show_config, start_daemon, Cli,
    Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            data_path,
            no_backfill,
        } => {
            start_daemon(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                data_path.as_deref(),
                no_backfill,
            )
            .await?;
        }
        Commands::Chat {
            model,
            temporary,
            user,
            data_path,
        } => {
            run_chat(
                cli.config.as_deref(),
                cli.log_level.as_deref(),
                model,
                temporary,
                &user,
                data_path.as_deref(),
            )
            .await?;
        }
        Commands::Classify { text } => {
            println!("{}", classify_report(&text.join(" ")));
        }
        Commands::Prompt { text, preferences } => {
            println!("{}", prompt_report(&text.join(" "), preferences.as_deref())?);
        }
        Commands::Models => {
            println!("{}", models_report());
        }
        Commands::Config => {
            println!("{}", show_config(cli.config.as_deref(), cli.log_level.as_deref())?);
        }
    }

    Ok(())
}
