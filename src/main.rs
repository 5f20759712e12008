//! # vetchat CLI
//!
//! ```bash
//! vetchat --config ./config/vetchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `vetchat init` | Create the SQLite database and schema |
//! | `vetchat serve` | Start the HTTP API and embed widget |
//! | `vetchat check` | Validate configuration and ping the store |
//! | `vetchat cleanup --days N` | Delete conversations idle for N days |
//! | `vetchat tiers` | Print the tier table |
//! | `vetchat tier <status>` | Show which tier a subscription status resolves to |
//! | `vetchat mask "<text>"` | Show how PII masking rewrites a message |
//!
//! `tiers`, `tier` and `mask` do not need a config file.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use vetchat::{backend, config, llm, logging, maintenance, migrate, server};
use vetchat_core::pii;
use vetchat_core::tier::Tier;

/// vetchat: a tiered chat assistant for veterans.
#[derive(Parser)]
#[command(name = "vetchat", version, about = "Tiered chat assistant API for veterans")]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/vetchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the SQLite database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Validate the configuration and check that the store is reachable.
    Check,

    /// Delete conversations (and their messages) not updated for `--days`.
    Cleanup {
        /// Retention in days; defaults to `[maintenance].retention_days`.
        #[arg(long)]
        days: Option<u32>,

        /// Print the cutoff without deleting anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Print the tier table.
    Tiers,

    /// Resolve a subscription status string to a tier.
    Tier {
        /// Raw status, e.g. "active" or "founding member".
        status: String,
    },

    /// Mask PII in a piece of text.
    Mask {
        /// Text to mask.
        text: String,
    },
}

fn print_tiers() {
    println!(
        "{:<8} {:>10} {:>6} {:>9} {:>8} {:>8}  features",
        "tier", "daily", "rpm", "max_chars", "history", "context"
    );
    for tier in Tier::ALL {
        let c = tier.config();
        let daily = c
            .daily_message_limit
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".to_string());
        let f = c.features;
        let features: Vec<&str> = [
            ("resource_context", f.resource_context),
            ("opportunity_context", f.opportunity_context),
            ("saved_conversations", f.saved_conversations),
            ("advanced_model", f.advanced_model),
            ("priority_fallback", f.priority_fallback),
        ]
        .iter()
        .filter(|(_, on)| *on)
        .map(|(name, _)| *name)
        .collect();
        println!(
            "{:<8} {:>10} {:>6} {:>9} {:>8} {:>8}  {}",
            tier.as_str(),
            daily,
            c.requests_per_minute,
            c.max_message_chars,
            c.history_messages,
            c.context_items,
            features.join(", ")
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Commands that do not need a config file.
    match &cli.command {
        Commands::Tiers => {
            print_tiers();
            return Ok(());
        }
        Commands::Tier { status } => {
            let tier = Tier::from_status(status);
            println!("{status:?} -> {tier}");
            println!("{}", serde_json::to_string_pretty(tier.config())?);
            return Ok(());
        }
        Commands::Mask { text } => {
            let masked = pii::mask(text);
            println!("{}", masked.text);
            if masked.is_clean() {
                println!("findings: none");
            } else {
                let kinds: Vec<String> =
                    masked.findings.iter().map(|k| format!("{k:?}")).collect();
                println!("findings: {}", kinds.join(", "));
            }
            return Ok(());
        }
        _ => {}
    }

    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging.format);

    match cli.command {
        Commands::Init => {
            if cfg.store.backend != "sqlite" {
                println!(
                    "Store backend is '{}'; nothing to initialize.",
                    cfg.store.backend
                );
                return Ok(());
            }
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Check => {
            println!("Config OK: {}", cli.config.display());
            let store = backend::open_store(&cfg).await?;
            store.ping().await?;
            println!("Store OK ({})", store.backend());
            let chain = llm::create_chain(&cfg)?;
            if chain.is_empty() {
                println!("LLM providers: none (fallback replies only)");
            } else {
                println!("LLM providers: {}", chain.names().join(" -> "));
            }
            if cfg.secrets.jwt_secret.is_none() {
                println!("Warning: JWT_SECRET is not set; `serve` will refuse to start.");
            }
        }
        Commands::Cleanup { days, dry_run } => {
            let days = days.unwrap_or(cfg.maintenance.retention_days);
            if days == 0 {
                anyhow::bail!("--days must be at least 1");
            }
            let cutoff = maintenance::cutoff_for(days, chrono::Utc::now());
            if dry_run {
                println!(
                    "Dry run: would delete conversations last updated before {}.",
                    cutoff.to_rfc3339()
                );
                return Ok(());
            }
            let store = backend::open_store(&cfg).await?;
            let report = maintenance::run_cleanup(store.as_ref(), days).await?;
            println!(
                "Deleted {} conversations and {} messages older than {} days.",
                report.conversations_deleted, report.messages_deleted, days
            );
        }
        Commands::Tiers | Commands::Tier { .. } | Commands::Mask { .. } => {}
    }

    Ok(())
}
