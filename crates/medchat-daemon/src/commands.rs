//! Command implementations for the medchat daemon.
//!
//! Handles:
//! - start: load config, warm the embedding model, run the backfill job
//! - chat: interactive REPL through the full pipeline
//! - classify / prompt / models / config: offline inspection

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};

use medchat_chat::{available_models, PerplexityClient};
use medchat_embeddings::EmbeddingProvider;
use medchat_retrieval::{PromptComposer, QueryClassifier};
use medchat_scheduler::{
    create_backfill_job, BackfillJobConfig, BackgroundPersistenceScheduler, SchedulerConfig,
    SchedulerService,
};
use medchat_service::{ChatService, SendMessage, ServiceConfig};
use medchat_storage::InMemoryStore;
use medchat_types::{Settings, UserPreferenceProfile};

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(config_path: Option<&str>, log_level: Option<&str>) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;
    if let Some(level) = log_level {
        settings.log_level = level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber. `RUST_LOG` wins over `level`.
pub fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

async fn open_store(data_path: Option<&str>) -> Result<Arc<InMemoryStore>> {
    let store = match data_path {
        Some(path) => {
            info!("Opening store snapshot at {}", path);
            InMemoryStore::open(path)
                .await
                .context("Failed to open store snapshot")?
        }
        None => InMemoryStore::new(),
    };
    Ok(Arc::new(store))
}

/// Wire the pipeline around `store` using the configured model.
pub fn build_service(settings: &Settings, store: Arc<InMemoryStore>) -> Result<Arc<ChatService>> {
    let model = PerplexityClient::from_settings(&settings.chat)
        .context("Chat model is not configured (set PERPLEXITY_API_KEY or chat.api_key)")?;
    let embedder = Arc::new(EmbeddingProvider::new(settings.embedding.clone()));
    let persistence = BackgroundPersistenceScheduler::new(settings.persistence.max_concurrent_jobs);

    Ok(Arc::new(ChatService::new(
        store.clone(),
        store,
        embedder,
        Arc::new(model),
        persistence,
        ServiceConfig::from_settings(settings),
    )))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down...");
        }
    }
}

/// Drain background writes, then flush the snapshot if there is one.
async fn drain(service: &ChatService, store: &InMemoryStore, grace: Duration) -> Result<()> {
    let report = service.persistence().shutdown(grace).await;
    if !report.drained {
        warn!(pending = report.pending, "Exiting with unfinished background writes");
    }
    store.flush().await.context("Failed to write store snapshot")?;
    Ok(())
}

/// Start the daemon.
///
/// 1. Load configuration (defaults -> file -> env -> CLI)
/// 2. Load the embedding model eagerly
/// 3. Schedule the backfill job
/// 4. Wait for SIGINT/SIGTERM, then drain persistence
pub async fn start_daemon(
    config_path: Option<&str>,
    log_level: Option<&str>,
    data_path: Option<&str>,
    no_backfill: bool,
) -> Result<()> {
    let settings = load_settings(config_path, log_level)?;
    init_logging(&settings.log_level)?;

    info!("medchat daemon starting...");
    info!("  Embedding mode: {}", settings.embedding.mode);
    info!("  Chat model: {}", settings.chat.default_model);
    info!("  Log level: {}", settings.log_level);

    let store = open_store(data_path).await?;
    let service = build_service(&settings, store.clone())?;

    // Model load takes seconds; do it before the first request
    if let Err(e) = service.embedder().initialize().await {
        warn!(error = %e, "Embedding provider unavailable, memory features degraded");
    }

    let mut scheduler = SchedulerService::new(SchedulerConfig::from_settings(&settings))
        .await
        .context("Failed to create scheduler")?;

    if settings.backfill.enabled && !no_backfill {
        create_backfill_job(
            &scheduler,
            service.clone(),
            BackfillJobConfig::from_settings(&settings.backfill),
        )
        .await
        .context("Failed to register backfill job")?;
    }
    scheduler.start().await.context("Failed to start scheduler")?;

    shutdown_signal().await;

    if let Err(e) = scheduler.shutdown().await {
        warn!("Scheduler shutdown error: {}", e);
    }
    drain(
        &service,
        &store,
        Duration::from_secs(settings.persistence.shutdown_grace_secs),
    )
    .await?;

    info!("medchat daemon stopped");
    Ok(())
}

/// Interactive chat. Each line is one turn; `/quit` or EOF ends the session.
pub async fn run_chat(
    config_path: Option<&str>,
    log_level: Option<&str>,
    model: Option<String>,
    temporary: bool,
    user: &str,
    data_path: Option<&str>,
) -> Result<()> {
    let settings = load_settings(config_path, log_level.or(Some("warn")))?;
    init_logging(&settings.log_level)?;

    let store = open_store(data_path).await?;
    let service = build_service(&settings, store.clone())?;

    let conversation_id = if temporary {
        None
    } else {
        let conversation = service
            .create_conversation(user, Some("CLI session".to_string()), false)
            .await
            .context("Failed to create conversation")?;
        Some(conversation.id)
    };

    println!("medchat ({}). Type /quit to exit.", if temporary { "temporary" } else { "saved" });
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        let text = line.trim();
        if text == "/quit" {
            break;
        }
        if text.is_empty() {
            continue;
        }

        let request = SendMessage {
            user_id: user.to_string(),
            conversation_id: conversation_id.clone(),
            text: text.to_string(),
            model: model.clone(),
        };
        match service.send_message(request).await {
            Ok(reply) => {
                println!("\n{}\n", reply.content);
                for (i, url) in reply.citations.iter().enumerate() {
                    println!("  [{}] {}", i + 1, url);
                }
            }
            Err(e) if e.is_client_error() => println!("Rejected: {}", e),
            Err(e) => println!("Error: {}", e),
        }
    }

    drain(
        &service,
        &store,
        Duration::from_secs(settings.persistence.shutdown_grace_secs),
    )
    .await
}

/// `kind [category: pattern] - reason`
pub fn classify_report(text: &str) -> String {
    let result = QueryClassifier::new().classify(text);
    match (result.category, result.matched_pattern.as_deref()) {
        (Some(category), Some(pattern)) => format!(
            "{} [{:?}: '{}'] - {}",
            result.kind, category, pattern, result.reason
        ),
        _ => format!("{} - {}", result.kind, result.reason),
    }
}

/// The system prompt for `text`, with optional preferences as JSON.
pub fn prompt_report(text: &str, preferences_json: Option<&str>) -> Result<String> {
    let preferences: Option<UserPreferenceProfile> = preferences_json
        .map(serde_json::from_str)
        .transpose()
        .context("Invalid preferences JSON")?;

    let kind = QueryClassifier::new().kind(text);
    Ok(PromptComposer::new().compose(kind, preferences.as_ref(), None))
}

/// One line per supported model.
pub fn models_report() -> String {
    available_models()
        .iter()
        .map(|m| {
            format!(
                "{:<22}{:<11}{}{}",
                m.id,
                format!("{:?}", m.category).to_lowercase(),
                m.description,
                if m.recommended { " (recommended)" } else { "" }
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn show_config(config_path: Option<&str>, log_level: Option<&str>) -> Result<String> {
    let settings = load_settings(config_path, log_level)?;
    settings
        .to_redacted_toml()
        .context("Failed to render configuration")
}
