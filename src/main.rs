//! Relay - resilient multi-provider completion router
//!
//! Sends one prompt through the router and prints the completion.
//!
//! ## Usage
//!
//! ```bash
//! # Route a prompt with the default config (~/.relay/config.yaml)
//! relay "Explain TCP slow start"
//!
//! # Custom config, verbose logging, and a stats dump afterwards
//! relay --config relay.yaml -v --stats "Design a microservice system"
//!
//! # Give up after 30 seconds
//! relay --deadline-secs 30 "Summarize RFC 9110"
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_config::RelayConfig;
use relay_core::{LogGuard, Message, init_logging};
use relay_router::{CallBudget, CancellationToken, RequestRouter};
use tracing::{error, info, warn};

/// Relay completion router
///
/// Routes a prompt to the primary provider, falling back to the secondary
/// when the primary times out, is rate limited, or its circuit is open.
#[derive(Parser, Debug)]
#[command(name = "relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Prompt to complete
    prompt: String,

    /// Optional system message sent before the prompt
    #[arg(long)]
    system: Option<String>,

    /// Config file (defaults to $RELAY_CONFIG, then ~/.relay/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (increases log level)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Directory for log files (defaults to ~/.relay/logs/)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Abort the whole call after this many seconds
    #[arg(long)]
    deadline_secs: Option<u64>,

    /// Print the usage statistics snapshot as JSON after the call
    #[arg(long)]
    stats: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let _guard = match setup_logging(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("relay failed: {:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Set up logging based on CLI arguments.
fn setup_logging(cli: &Cli) -> relay_core::Result<LogGuard> {
    init_logging(cli.log_dir.clone(), cli.verbose > 0)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = RelayConfig::load(cli.config.as_deref()).context("loading configuration")?;
    let router = RequestRouter::from_config(&config).context("building router")?;

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = cli.system {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(cli.prompt));

    let budget = build_budget(cli.deadline_secs);

    info!(primary = %config.primary.name, fallback = %config.fallback.name, "routing prompt");
    let result = router.call_with(&messages, &[], &budget).await;

    if cli.stats {
        let snapshot = serde_json::to_string_pretty(&router.snapshot())?;
        eprintln!("{snapshot}");
    }

    let completion = result?;
    if completion.fell_back {
        warn!(provider = %completion.provider, "answered by fallback provider");
    }
    println!("{}", completion.text);
    Ok(())
}

/// Deadline from the CLI plus Ctrl-C cancellation.
fn build_budget(deadline_secs: Option<u64>) -> CallBudget {
    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let budget = CallBudget::unbounded().with_cancellation(token);
    match deadline_secs {
        Some(secs) => budget.with_timeout(Duration::from_secs(secs)),
        None => budget,
    }
}
