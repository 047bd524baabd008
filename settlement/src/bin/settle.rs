//! Settlement operator CLI

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use revenue_ledger::{
    Actor, ActorType, Currency, EntryFilter, EventId, Ledger, MoneyState, ReferenceId,
};
use revenue_settlement::{Config, InMemoryOrderSource, SettlementEngine};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "settle", version, about = "Ticketing revenue ledger and settlement")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "SETTLEMENT_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// JSON order manifest (overrides the configured one)
    #[arg(short, long, value_name = "FILE")]
    manifest: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Settle every completed order of an event
    SettleEvent {
        /// Event id
        event_id: String,
    },

    /// Record authorization and capture for manifest orders carrying payment references
    Ingest {
        /// Restrict to one event
        #[arg(long)]
        event_id: Option<String>,
    },

    /// Sum entries matching a filter
    Balance {
        /// Entity (order) id
        #[arg(long)]
        entity: Option<String>,
        /// Actor id
        #[arg(long)]
        actor: Option<String>,
        /// Money state, e.g. SETTLED
        #[arg(long)]
        state: Option<String>,
        /// ISO 4217 currency
        #[arg(long)]
        currency: Option<String>,
    },

    /// Move an actor's PAYABLE balance into PAID
    Payout {
        /// Actor id
        actor: String,
        /// Actor type (club, promoter, platform, ...)
        actor_type: String,
        /// Amount in minor units
        amount: i64,
        /// ISO 4217 currency
        currency: String,
        /// Payout reference (idempotency key)
        reference: String,
    },

    /// Check that every entity's entries sum to zero
    Verify,
}

#[derive(Debug, Default, Serialize)]
struct IngestSummary {
    authorized: usize,
    captured: usize,
    already_processed: usize,
    failed: Vec<String>,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json().with_writer(std::io::stderr)).init();
    } else {
        registry.with(fmt::layer().with_writer(std::io::stderr)).init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = Config::from_file(path)
                .with_context(|| format!("Loading config from {}", path.display()))?;
            config.apply_env()?;
            config
        }
        None => Config::from_env()?,
    };

    if let Some(manifest) = &cli.manifest {
        config.order_manifest = Some(manifest.clone());
    }

    Ok(config)
}

fn load_source(config: &Config) -> anyhow::Result<InMemoryOrderSource> {
    let path = config
        .order_manifest
        .as_ref()
        .context("No order manifest: pass --manifest or set SETTLEMENT_ORDER_MANIFEST")?;
    InMemoryOrderSource::from_manifest(path)
        .with_context(|| format!("Loading order manifest {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = load_config(&cli)?;
    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        ledger = %config.ledger.data_dir.display(),
        "Starting settle"
    );

    match cli.command {
        Command::SettleEvent { event_id } => {
            let source = load_source(&config)?;
            let engine = SettlementEngine::open(config, Arc::new(source)).await?;

            let report = engine.settle_event(&EventId::new(event_id)).await?;
            print_json(&report)?;
            engine.ledger().shutdown().await?;
        }

        Command::Ingest { event_id } => {
            let source = load_source(&config)?;
            let ledger = Ledger::open(config.ledger.clone()).await?;
            let summary = ingest(&ledger, &source, event_id.map(EventId::new)).await;
            print_json(&summary)?;
            ledger.shutdown().await?;
        }

        Command::Balance {
            entity,
            actor,
            state,
            currency,
        } => {
            let mut filter = EntryFilter::new();
            if let Some(entity) = entity {
                filter = filter.entity(entity.as_str());
            }
            if let Some(actor) = actor {
                filter = filter.actor(actor.as_str());
            }
            if let Some(state) = state {
                filter = filter.state(state.parse::<MoneyState>()?);
            }
            if let Some(currency) = currency {
                filter = filter.currency(currency.parse::<Currency>()?);
            }

            let ledger = Ledger::open(config.ledger.clone()).await?;
            let balance = ledger.get_balance(&filter)?;
            print_json(&serde_json::json!({
                "filter": filter.to_string(),
                "balance": balance,
            }))?;
            ledger.shutdown().await?;
        }

        Command::Payout {
            actor,
            actor_type,
            amount,
            currency,
            reference,
        } => {
            let actor = Actor::new(actor, actor_type.parse::<ActorType>()?);
            let currency = currency.parse::<Currency>()?;

            let ledger = Ledger::open(config.ledger.clone()).await?;
            let outcome = ledger
                .record_payout(&actor, amount, currency, &ReferenceId::new(reference))
                .await?;
            print_json(&outcome)?;
            ledger.shutdown().await?;
        }

        Command::Verify => {
            let ledger = Ledger::open(config.ledger.clone()).await?;
            let report = ledger.verify_invariants()?;
            print_json(&report)?;
            ledger.shutdown().await?;

            if !report.is_balanced() {
                bail!("{} entities violate the zero-sum invariant", report.unbalanced.len());
            }
        }
    }

    Ok(())
}

async fn ingest(ledger: &Ledger, source: &InMemoryOrderSource, only: Option<EventId>) -> IngestSummary {
    let mut summary = IngestSummary::default();

    for event in source.events().await {
        if only.as_ref().is_some_and(|id| *id != event.event_id) {
            continue;
        }

        for manifest_order in &event.orders {
            let order = manifest_order.to_order(&event.event_id);

            if let Some(intent) = &manifest_order.payment_intent_ref {
                match ledger.record_order_authorized(&order, intent).await {
                    Ok(outcome) if outcome.is_applied() => summary.authorized += 1,
                    Ok(_) => summary.already_processed += 1,
                    Err(e) => {
                        tracing::error!(order_id = %order.id, error = %e, "Authorization failed");
                        summary.failed.push(format!("{}: {}", order.id, e));
                        continue;
                    }
                }
            }

            if let Some(payment_ref) = &manifest_order.payment_ref {
                match ledger.record_order_captured(&order, payment_ref).await {
                    Ok(outcome) if outcome.is_applied() => summary.captured += 1,
                    Ok(_) => summary.already_processed += 1,
                    Err(e) => {
                        tracing::error!(order_id = %order.id, error = %e, "Capture failed");
                        summary.failed.push(format!("{}: {}", order.id, e));
                    }
                }
            }
        }
    }

    summary
}
