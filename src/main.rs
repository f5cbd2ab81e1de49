//! Nutrimind - eating-behavior pattern pipeline
//!
//! Command-line entry point: runs the HTTP API, the daily batches, and
//! single-user operations against the local database.

mod cli;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use cli::helpers::{load_config, open_pipeline};
use cli::jobs::JobCommand;
use nutrimind_core::api::{self, ApiServerConfig};
use nutrimind_core::jobs::default_scheduler;
use nutrimind_core::{EatingContext, Mood};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, Level};
use tracing_subscriber::{self, EnvFilter};

#[derive(Parser)]
#[command(name = "nutrimind")]
#[command(about = "Eating-behavior pattern detection, risk prediction and daily insights", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Set log level
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Database path (overrides config file and NUTRIMIND_DB_PATH)
    #[arg(long, global = true)]
    db_path: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Address to bind (defaults to server.addr from config)
        #[arg(long)]
        addr: Option<String>,

        /// Also run the daily job scheduler in the background
        #[arg(long)]
        with_scheduler: bool,
    },

    /// Log a food event
    Log {
        /// User id
        user: String,

        /// Meal description as typed
        text: String,

        /// Estimated calories
        #[arg(long, default_value = "0")]
        calories: u32,

        /// great, ok, meh, bad or awful
        #[arg(long)]
        mood: Option<Mood>,

        /// home, work, street or restaurant
        #[arg(long)]
        context: Option<EatingContext>,

        /// RFC 3339 timestamp; defaults to now
        #[arg(long)]
        at: Option<DateTime<Utc>>,
    },

    /// Run pattern detection for a user
    Detect { user: String },

    /// List a user's patterns
    Patterns {
        user: String,

        /// Include deactivated patterns
        #[arg(long)]
        history: bool,
    },

    /// Show today's risk for a user
    Risk { user: String },

    /// Show today's insight for a user
    Insight { user: String },

    /// Confirm or dispute a pattern
    Feedback {
        pattern: String,

        /// Dispute the pattern (lowers its confidence)
        #[arg(long)]
        dispute: bool,
    },

    /// Assign the cold-start cluster from onboarding answers
    Onboard {
        user: String,

        /// Answers as question=answer
        #[arg(required = true)]
        answers: Vec<String>,
    },

    /// Mark a CBT lesson completed
    Lesson { user: String, lesson_id: String },

    /// Run daily batches
    #[command(subcommand)]
    Jobs(JobCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Use the requested level for our crates, WARN for HTTP internals
    let level = level.as_str().to_lowercase();
    let filter = EnvFilter::new(format!(
        "nutrimind={},nutrimind_core={},tower_http=warn,hyper=warn,reqwest=warn",
        level, level
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr) // Write logs to stderr, not stdout
        .init();

    debug!("Nutrimind v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_deref(), cli.db_path)?;

    match cli.command.unwrap_or(Commands::Serve {
        addr: None,
        with_scheduler: false,
    }) {
        Commands::Serve {
            addr,
            with_scheduler,
        } => {
            let mut server_config = ApiServerConfig::from(&config.server);
            if let Some(addr) = addr {
                server_config.addr = addr
                    .parse::<SocketAddr>()
                    .with_context(|| format!("Invalid address '{}'", addr))?;
            }

            let pipeline = open_pipeline(config).await?;

            if with_scheduler {
                let scheduler = default_scheduler(pipeline.clone());
                info!("Background scheduler enabled: {}", scheduler.job_names().join(", "));
                let scheduler = Arc::new(scheduler);
                tokio::spawn(async move {
                    if let Err(e) = scheduler.start().await {
                        tracing::error!("Scheduler stopped: {}", e);
                    }
                });
            }

            api::serve(server_config, pipeline).await
        }
        Commands::Log {
            user,
            text,
            calories,
            mood,
            context,
            at,
        } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::log(&pipeline, &user, text, calories, mood, context, at).await
        }
        Commands::Detect { user } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::detect(&pipeline, &user).await
        }
        Commands::Patterns { user, history } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::patterns(&pipeline, &user, history).await
        }
        Commands::Risk { user } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::risk(&pipeline, &user).await
        }
        Commands::Insight { user } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::insight(&pipeline, &user).await
        }
        Commands::Feedback { pattern, dispute } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::feedback(&pipeline, &pattern, dispute).await
        }
        Commands::Onboard { user, answers } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::onboard(&pipeline, &user, &answers).await
        }
        Commands::Lesson { user, lesson_id } => {
            let pipeline = open_pipeline(config).await?;
            cli::user::lesson(&pipeline, &user, &lesson_id).await
        }
        Commands::Jobs(command) => cli::jobs::handle(command, config).await,
    }
}
