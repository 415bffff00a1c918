//! Pacer main binary.

mod config;
mod routes;
mod runtime;
mod server;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "pacer", version, about = "Paced, human-like message sending")]
struct Cli {
    /// Config file (default: ~/.pacer/config.toml).
    #[arg(long, global = true, env = "PACER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start the control API server (default).
    Serve,
    /// Report which recipients in a file were contacted recently.
    Check {
        #[arg(long)]
        file: PathBuf,
    },
    /// Send a templated message to every recipient in a file.
    Bulk {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        message: String,
        /// Paraphrase each message before sending.
        #[arg(long)]
        vary: bool,
        /// Drop recipients contacted within the retention window.
        #[arg(long)]
        enforce_recency: bool,
    },
    /// Send one message to one number.
    Send {
        number: String,
        message: String,
        #[arg(long)]
        vary: bool,
    },
    /// Print the contact history.
    History,
    /// Validate config and check the actuator.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("pacer: ignoring unreadable .env: {e}");
        }
    }
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let config = cli.config;

    let command = if let Some(command) = cli.command {
        command
    } else {
        Command::Serve
    };

    match command {
        Command::Serve => server::serve(config).await,
        Command::Check { file } => server::check_file(config, &file).await,
        Command::Bulk {
            file,
            message,
            vary,
            enforce_recency,
        } => server::bulk_file(config, &file, &message, vary, enforce_recency).await,
        Command::Send {
            number,
            message,
            vary,
        } => server::send_one_shot(config, &number, &message, vary).await,
        Command::History => server::print_history(config).await,
        Command::Doctor => server::doctor(config).await,
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,pacer=debug,pacer_app=debug,pacer_core=debug,pacer_channels=debug,pacer_llm=debug,tower_http=info",
        ),
    };
    let log_format = std::env::var("PACER_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported PACER_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::info!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}
