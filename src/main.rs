use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use throttlex::config::ThrottleConfig;
use throttlex::policy::PolicySet;
use throttlex::storage::MemoryStore;
use throttlex::{AdmissionGate, Clock, SystemClock};

/// Per-key rate limiting engine.
#[derive(Parser, Debug)]
#[command(name = "throttlex", version, about)]
struct Cli {
    /// Configuration file (YAML); THROTTLEX__* environment variables override it
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a series of checks against one key and print the verdicts
    Check {
        key: String,

        /// Number of requests to issue
        #[arg(short = 'n', long, default_value_t = 1)]
        requests: u32,

        /// Pause between requests, in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,
    },
    /// Print the default policy and every provisioned policy
    Policies,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    info!("Starting ThrottleX");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = ThrottleConfig::load(cli.config.as_deref())?;
    info!(
        kind = %config.default_policy.kind,
        capacity = config.default_policy.capacity,
        "Configuration loaded"
    );

    let store = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let gate = AdmissionGate::with_memory_store(
        store.clone(),
        config.default_policy.clone(),
        clock.clone(),
    );

    if let Some(path) = &config.policies_path {
        let set = PolicySet::from_file(path)?;
        for policy in set.policies {
            gate.resolver().create(policy).await?;
        }
    }

    let sweeper = store.spawn_sweeper(
        Duration::from_secs(config.storage.sweep_interval_secs.max(1)),
        config.bucket_retention(),
        clock,
    );

    match cli.command {
        Command::Check {
            key,
            requests,
            interval_ms,
        } => {
            for i in 1..=requests {
                match gate.check(&key).await {
                    Ok(allowed) => {
                        let verdict = if allowed { "ALLOWED" } else { "THROTTLED" };
                        println!("{:>4} {} {}", i, key, verdict);
                    }
                    Err(e) => {
                        warn!(key = %key, error = %e, "Check failed");
                        println!("{:>4} {} ERROR {}", i, key, e);
                    }
                }
                if interval_ms > 0 && i < requests {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                }
            }

            if let Some(snapshot) = gate.snapshot(&key).await? {
                println!("{}", serde_json::to_string_pretty(&snapshot)?);
            }
        }
        Command::Policies => {
            let default = gate.resolver().default_policy().bind("*");
            println!("{}", serde_json::to_string(&default)?);
            for policy in gate.resolver().list().await? {
                println!("{}", serde_json::to_string(&policy)?);
            }
        }
    }

    sweeper.abort();
    info!("ThrottleX stopped");
    Ok(())
}
