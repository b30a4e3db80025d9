use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use rand::Rng;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

use turnstile::config::{FailureMode, TurnstileConfig};
use turnstile::ratelimit::{AdmissionGate, AlgorithmKind, MemoryStore, Policy, SystemClock};

/// Drive the admission engine from the command line.
#[derive(Debug, Parser)]
#[command(name = "turnstile", version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run checks one after another and print each decision
    Check {
        #[command(flatten)]
        target: Target,

        /// Number of checks
        #[arg(long, default_value_t = 1)]
        count: u32,

        /// Pause between checks in milliseconds
        #[arg(long, default_value_t = 0)]
        interval_ms: u64,

        /// Random extra pause of up to this many milliseconds
        #[arg(long, default_value_t = 0)]
        jitter_ms: u64,
    },
    /// Fire simultaneous checks and print how many were admitted
    Burst {
        #[command(flatten)]
        target: Target,

        /// Number of simultaneous checks
        #[arg(long, default_value_t = 10)]
        concurrency: u32,
    },
}

#[derive(Debug, Args)]
struct Target {
    /// Identity to rate limit
    #[arg(long)]
    identity: String,

    /// Algorithm, overriding the configured policy
    #[arg(long)]
    algorithm: Option<String>,

    /// Capacity, overriding the configured policy
    #[arg(long)]
    capacity: Option<u64>,

    /// Window length in milliseconds, overriding the configured policy
    #[arg(long)]
    window_ms: Option<u64>,
}

impl Target {
    fn policy(&self, config: &TurnstileConfig) -> anyhow::Result<Policy> {
        let mut policy = *config.policies.resolve(&self.identity);
        if let Some(ref name) = self.algorithm {
            policy.algorithm = name.parse::<AlgorithmKind>()?;
        }
        if let Some(capacity) = self.capacity {
            policy.capacity = capacity;
        }
        if let Some(window_ms) = self.window_ms {
            policy.window_ms = window_ms;
        }
        Ok(policy)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match cli.config {
        Some(ref path) => TurnstileConfig::from_file(path)?,
        None => TurnstileConfig::default(),
    };
    info!(
        lock_timeout_ms = config.admission.lock_timeout_ms,
        failure_mode = ?config.admission.failure_mode,
        overrides = config.policies.identities.len(),
        "Configuration loaded"
    );

    let gate = AdmissionGate::builder(Arc::new(MemoryStore::new()), Arc::new(SystemClock::new()))
        .lock_timeout(config.admission.lock_timeout())
        .failure_mode(config.admission.failure_mode)
        .build();

    let decisions = match cli.command {
        Command::Check {
            target,
            count,
            interval_ms,
            jitter_ms,
        } => {
            let policy = target.policy(&config)?;
            for i in 0..count {
                if i > 0 {
                    let jitter = if jitter_ms > 0 {
                        rand::thread_rng().gen_range(0..=jitter_ms)
                    } else {
                        0
                    };
                    tokio::time::sleep(Duration::from_millis(interval_ms + jitter)).await;
                }
                let decision = gate.check(&target.identity, &policy).await?;
                println!("{}", serde_json::to_string(&decision)?);
            }
            count as usize
        }
        Command::Burst {
            target,
            concurrency,
        } => {
            let policy = target.policy(&config)?;
            let checks = (0..concurrency).map(|_| gate.check(&target.identity, &policy));
            let decisions = futures::future::try_join_all(checks).await?;

            let allowed = decisions.iter().filter(|d| d.allowed).count();
            let summary = json!({
                "identity": target.identity,
                "algorithm": policy.algorithm,
                "capacity": policy.capacity,
                "window_ms": policy.window_ms,
                "requests": decisions.len(),
                "allowed": allowed,
                "denied": decisions.len() - allowed,
                "degraded": decisions.iter().filter(|d| d.degraded).count(),
                "fail_closed": gate.failure_mode() == FailureMode::Closed,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            decisions.len()
        }
    };

    info!(decisions = decisions, "Done");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
