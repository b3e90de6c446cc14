//! # fanout_app — operator CLI
//!
//! Drives a [`PubSubEngine`] over NATS JetStream from the command line.
//!
//! Subscriptions are read from a JSON file holding an array of subscription
//! documents; it stands in for the registry during operator sessions.
//!
//! ```text
//! fanout_app -s subs.json subscribe s-1
//! fanout_app -s subs.json publish \
//!     '{"type":"temperature","id":"i-1","visible_to":["p-1"],"value":70}'
//! fanout_app -s subs.json receive s-1 --timeout 10
//! ```

use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use fanout_engine::{EngineConfig, Environment, MemoryRegistry, PubSubEngine};
use fanout_model::{Item, Subscription};
use fanout_net::JetStreamSubstrate;
use fanout_net::routing::EXCHANGE_NAME;
use tracing::info;
use tracing_subscriber::EnvFilter;

type Engine = PubSubEngine<JetStreamSubstrate, MemoryRegistry>;

#[derive(Parser)]
#[command(name = "fanout_app", about = "Selective pub/sub fan-out over NATS")]
struct Args {
    /// NATS server URL. Without it the engine runs disabled.
    #[arg(short, long, env = "NATS_URL")]
    nats_url: Option<String>,

    /// Exchange (stream) name
    #[arg(short, long, default_value = EXCHANGE_NAME)]
    exchange: String,

    /// Deployment environment
    #[arg(long, env = "FANOUT_ENV", default_value = "development")]
    env: Environment,

    /// JSON file with an array of subscriptions
    #[arg(short, long)]
    subscriptions: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the queue for a subscription in the subscriptions file.
    Subscribe { id: String },
    /// Delete the queue for a subscription in the subscriptions file.
    Unsubscribe { id: String },
    /// Fan an item out to every matching subscription.
    Publish {
        /// Item as a JSON document
        item: String,
        /// Publish under this type instead of the item's own
        #[arg(short = 't', long = "type")]
        item_type: Option<String>,
    },
    /// Wait for one item on a subscription's queue and print it.
    Receive {
        id: String,
        /// Seconds to wait
        #[arg(long, default_value_t = 300)]
        timeout: u64,
    },
    /// Print the stale-subscription cutoff as Unix seconds.
    Cutoff,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let mut config = EngineConfig::new()
        .with_exchange(args.exchange)
        .with_environment(args.env);
    if let Some(url) = args.nats_url {
        config = config.with_url(url);
    }

    let registry = match &args.subscriptions {
        Some(path) => MemoryRegistry::from_subscriptions(load_subscriptions(path)?),
        None => MemoryRegistry::new(),
    };
    info!(subscriptions = registry.len(), "registry loaded");

    let engine = Engine::connect(config, registry).await;
    let outcome = run(&engine, args.command).await;
    engine.close().await?;
    outcome
}

async fn run(engine: &Engine, command: Command) -> Result<()> {
    match command {
        Command::Subscribe { id } => {
            let subscription = find_subscription(engine, &id).await?;
            engine.create_subscription(subscription).await?;
            println!("subscribed {id}");
        }
        Command::Unsubscribe { id } => {
            let subscription = find_subscription(engine, &id).await?;
            engine.remove_subscription(&subscription).await?;
            println!("unsubscribed {id}");
        }
        Command::Publish { item, item_type } => {
            let item: Item = serde_json::from_str(&item).context("parsing item")?;
            let item_type = item_type.unwrap_or_else(|| item.item_type.clone());
            let report = engine.publish(&item_type, &item).await?;
            println!(
                "delivered to {} subscription(s) across {} principal(s)",
                report.delivered, report.targets
            );
        }
        Command::Receive { id, timeout } => {
            let subscription = find_subscription(engine, &id).await?;
            let item = engine
                .receive_within(&subscription, Duration::from_secs(timeout))
                .await?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        Command::Cutoff => {
            let cutoff = engine
                .stale_subscription_cutoff()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default();
            println!("{}", cutoff.as_secs());
        }
    }
    Ok(())
}

fn load_subscriptions(path: &Path) -> Result<Vec<Subscription>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

async fn find_subscription(engine: &Engine, id: &str) -> Result<Subscription> {
    let active = engine.active_subscriptions().await?;
    match active.into_iter().find(|s| s.id == id) {
        Some(subscription) => Ok(subscription),
        None => bail!("no subscription {id} in the subscriptions file"),
    }
}
