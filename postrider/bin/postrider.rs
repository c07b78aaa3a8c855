//! Command-line front-end for the postrider delivery engine
//!
//! - `send` submits one message through the credential pool
//! - `probe` opens a test session with the current credential
//! - `check` validates the configuration and prints pool health

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use postrider::{
    config::{self, Config},
    store::FilePoolStore,
};
use postrider_common::collab::{Notice, Notifier, TracingLog};
use postrider_delivery::{DeliveryEngine, SendRequest};

/// Send mail through a pool of submission credentials
#[derive(Parser, Debug)]
#[command(name = "postrider")]
#[command(about = "Send mail through a pool of submission credentials", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one message through the credential pool
    Send {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Subject line; {email}, {date}, {time}, and {random} expand per send
        #[arg(long)]
        subject: String,

        /// Message body text
        #[arg(long)]
        body: Option<String>,

        /// Read the message body from a file instead
        #[arg(long)]
        body_file: Option<PathBuf>,

        /// Reply-To address
        #[arg(long)]
        reply_to: Option<String>,

        /// Campaign tag placed in the X-Campaign header
        #[arg(long)]
        campaign: Option<String>,

        /// Attach a file; repeat for several
        #[arg(long = "attach")]
        attachments: Vec<PathBuf>,

        /// Send the body as HTML instead of plain text
        #[arg(long)]
        html: bool,
    },
    /// Open a connection with the current credential and report what worked
    Probe,
    /// Validate the configuration and print pool health
    Check,
}

/// Surfaces engine notices on the operator's terminal.
#[derive(Debug, Clone, Copy, Default)]
struct CliNotifier;

impl Notifier for CliNotifier {
    fn notify(&self, notice: &Notice) {
        tracing::warn!("{notice}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    postrider_common::logging::init();

    let cli = Cli::parse();

    let config_path = cli.config.map_or_else(config::find_config_file, Ok)?;
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Send {
            to,
            subject,
            body,
            body_file,
            reply_to,
            campaign,
            attachments,
            html,
        } => {
            let body = match (body, body_file) {
                (Some(text), None) => text,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read body from {}", path.display()))?,
                _ => anyhow::bail!("exactly one of --body or --body-file is required"),
            };

            let mut request = SendRequest::new(to, subject, body).html(html);
            if let Some(reply_to) = reply_to {
                request = request.reply_to(reply_to);
            }
            if let Some(campaign) = campaign {
                request = request.campaign(campaign);
            }
            for attachment in attachments {
                request = request.attachment(attachment);
            }

            cmd_send(build_engine(config, &config_path), &request).await
        }
        Commands::Probe => cmd_probe(build_engine(config, &config_path)).await,
        Commands::Check => {
            let engine = build_engine(config, &config_path);
            cmd_check(&engine, &config_path)
        }
    }
}

/// Wires the engine to the terminal: tracing output, CLI notices, and
/// removals written back to the configuration file.
fn build_engine(config: Config, config_path: &Path) -> DeliveryEngine {
    DeliveryEngine::new(config.credentials, config.engine)
        .with_log(Arc::new(TracingLog))
        .with_notifier(Arc::new(CliNotifier))
        .with_pool_store(Arc::new(FilePoolStore::new(config_path)))
}

async fn cmd_send(mut engine: DeliveryEngine, request: &SendRequest) -> anyhow::Result<()> {
    if engine.send(request).await {
        let stats = engine.stats();
        println!("✓ Sent ({}/{} this run)", stats.batch_success, stats.batch_size);
        Ok(())
    } else {
        anyhow::bail!("send failed after exhausting the retry budget; see the log for details")
    }
}

async fn cmd_probe(mut engine: DeliveryEngine) -> anyhow::Result<()> {
    let Some(credential) = engine.current_credential().cloned() else {
        anyhow::bail!("the configuration has no credentials to probe");
    };

    println!("Probing {credential}...");

    if engine.test_connection().await {
        println!("✓ Connected");
        for (endpoint, preference) in engine.preferences() {
            println!("  {endpoint} → {}", preference.encryption);
        }
        Ok(())
    } else {
        anyhow::bail!("no endpoint of {credential} accepted a session; see the log for details")
    }
}

fn cmd_check(engine: &DeliveryEngine, config_path: &Path) -> anyhow::Result<()> {
    println!("Configuration: {}", config_path.display());

    if engine.credential_count() == 0 {
        anyhow::bail!("the configuration parses but has no [[credential]] tables");
    }

    let stats = engine.stats();

    println!();
    println!(
        "  {:<42} {:>6} {:>6} {:>10} {:>10} {:>9}",
        "CREDENTIAL", "SENT", "OK", "SUSPICION", "COOLDOWN", "LATENCY"
    );
    println!("{}", "-".repeat(90));

    for (index, entry) in stats.credentials.iter().enumerate() {
        let marker = if index == stats.current { "→" } else { " " };
        let cooldown = entry
            .cooling_for
            .map_or_else(|| "-".to_string(), |left| format!("{}s", left.as_secs()));
        let latency = entry
            .average_latency
            .map_or_else(|| "-".to_string(), |avg| format!("{}ms", avg.as_millis()));
        println!(
            "{marker} {:<42} {:>6} {:>6} {:>10} {:>10} {:>9}",
            format!("{}@{}", entry.username, entry.host),
            entry.sent,
            entry.succeeded,
            entry.suspicion,
            cooldown,
            latency
        );
    }
    println!("\nTotal: {} credential(s)", stats.credentials.len());

    let preferences = engine.preferences();
    if !preferences.is_empty() {
        println!();
        println!("Learned endpoints:");
        for (endpoint, preference) in preferences {
            println!(
                "  {endpoint} → {} (learned {})",
                preference.encryption, preference.updated_at
            );
        }
    }

    Ok(())
}
