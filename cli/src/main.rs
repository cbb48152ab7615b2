//! Warden CLI - loads the access policy and exposes the dispatcher as JSON.
//!
//! ```text
//! warden [--config PATH] describe
//! warden [--config PATH] invoke <operation> [JSON-ARGS]
//! ```
//!
//! `invoke` reads its arguments from stdin when `JSON-ARGS` is omitted. Output
//! on stdout is always a single JSON document; logs go to stderr.

use std::{
    io::{Read, Write, stdin, stdout},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use warden_config::WardenConfig;
use warden_tools::ToolDispatcher;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(std::io::stderr),
        )
        .with(env_filter)
        .init();
}

#[derive(Debug, Parser)]
#[command(name = "warden")]
#[command(about = "Policy-bounded filesystem tools for language-model agents", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $WARDEN_CONFIG, then the user config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, PartialEq, Eq, Subcommand)]
enum Command {
    /// Print the available operations and the active policy
    Describe,
    /// Run one operation and print its result envelope
    Invoke {
        /// Operation name, e.g. read_file
        operation: String,
        /// JSON object of arguments; read from stdin when omitted
        arguments: Option<String>,
    },
}

fn read_arguments(inline: Option<String>) -> Result<Value> {
    let raw = match inline {
        Some(raw) => raw,
        None => {
            let mut buf = String::new();
            stdin()
                .read_to_string(&mut buf)
                .context("failed to read arguments from stdin")?;
            buf
        }
    };
    if raw.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&raw).context("arguments must be a JSON object")
}

fn print_json(value: &Value) -> Result<()> {
    let mut out = stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();

    let config = WardenConfig::load(cli.config.as_deref())?.unwrap_or_default();
    let policy = config.access_policy()?;
    tracing::info!(
        directories = policy.allowed_directories().len(),
        write = policy.allow_write(),
        delete = policy.allow_delete(),
        "Access policy loaded"
    );
    let dispatcher = ToolDispatcher::new(policy);

    match cli.command {
        Command::Describe => {
            let description = json!({
                "operations": serde_json::to_value(dispatcher.describe_operations())?,
                "policy": serde_json::to_value(dispatcher.policy().summary())?,
            });
            print_json(&description)?;
        }
        Command::Invoke {
            operation,
            arguments,
        } => {
            let arguments = read_arguments(arguments)?;
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Interrupted, cancelling operation");
                    on_signal.cancel();
                }
            });

            let result = dispatcher
                .invoke_with_cancel(&operation, &arguments, cancel)
                .await;
            print_json(&result.to_value())?;
        }
    }

    Ok(())
}
