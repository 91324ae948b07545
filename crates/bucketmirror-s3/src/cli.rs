//! `bmirror` command line.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::future::try_join_all;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;

use bucketmirror_core::region::{RegionResolver, ResolvedDestination, DEFAULT_PROBE_REGION};
use bucketmirror_core::{
    BatchReport, CancelPolicy, EngineConfig, JoinPolicy, ReplError, ReplicationEngine, RuleTable,
};

use crate::config::ConfigSource;
use crate::s3::{S3BackendConfig, S3StoreProvider};

/// Top-level arguments.
#[derive(Parser, Debug)]
#[command(name = "bmirror")]
#[command(about = "Replicate S3 object changes to destination buckets", long_about = None)]
pub struct Cli {
    /// Emit log lines as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Where the rule table comes from.
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Cloud and engine settings.
    #[command(flatten)]
    pub engine: EngineArgs,

    /// What to do.
    #[command(subcommand)]
    pub command: Command,
}

/// Rule table location. A file wins over a URL, a URL over inline base64.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Local JSON rule table.
    #[arg(long, global = true)]
    pub config_file: Option<PathBuf>,

    /// URL of the JSON rule table (http or https; https if no scheme).
    #[arg(long, global = true, env = "CONFIG_URL")]
    pub config_url: Option<String>,

    /// Base64-encoded JSON rule table.
    #[arg(long = "config", global = true, env = "CONFIG", hide_env_values = true)]
    pub config_inline: Option<String>,
}

impl ConfigArgs {
    /// Chooses the configuration source.
    pub fn source(&self) -> bucketmirror_core::Result<ConfigSource> {
        match &self.config_file {
            Some(path) => Ok(ConfigSource::File(path.clone())),
            None => ConfigSource::from_vars(self.config_url.clone(), self.config_inline.clone()),
        }
    }
}

/// Engine and S3 backend settings.
#[derive(Args, Debug, Clone)]
pub struct EngineArgs {
    /// Region used for bucket location lookups.
    #[arg(long, global = true, env = "BMIRROR_PROBE_REGION", default_value = DEFAULT_PROBE_REGION)]
    pub probe_region: String,

    /// Maximum number of tasks talking to S3 at once.
    #[arg(long, global = true, env = "BMIRROR_MAX_CONCURRENCY", default_value_t = 64)]
    pub max_concurrency: usize,

    /// fail-fast or wait-all.
    #[arg(long, global = true, env = "BMIRROR_JOIN_POLICY", default_value = "fail-fast")]
    pub join_policy: JoinPolicy,

    /// detach or abort.
    #[arg(long, global = true, env = "BMIRROR_CANCEL_POLICY", default_value = "detach")]
    pub cancel_policy: CancelPolicy,

    /// Existence polls after each copy or delete.
    #[arg(long, global = true, env = "BMIRROR_WAIT_ATTEMPTS", default_value_t = 20)]
    pub wait_attempts: u32,

    /// Milliseconds between existence polls.
    #[arg(long, global = true, env = "BMIRROR_WAIT_DELAY_MS", default_value_t = 5000)]
    pub wait_delay_ms: u64,

    /// Custom S3 endpoint.
    #[arg(long, global = true, env = "BMIRROR_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Path-style bucket addressing.
    #[arg(long, global = true)]
    pub force_path_style: bool,
}

impl EngineArgs {
    /// Engine settings, validated.
    pub fn engine_config(&self) -> bucketmirror_core::Result<EngineConfig> {
        let config = EngineConfig {
            probe_region: self.probe_region.clone(),
            max_concurrent_tasks: self.max_concurrency,
            join_policy: self.join_policy,
            cancel_policy: self.cancel_policy,
        };
        config.validate()?;
        Ok(config)
    }

    /// S3 backend settings.
    pub fn backend_config(&self) -> S3BackendConfig {
        S3BackendConfig {
            wait_max_attempts: self.wait_attempts,
            wait_delay_ms: self.wait_delay_ms,
            endpoint_url: self.endpoint_url.clone(),
            force_path_style: self.force_path_style,
        }
    }
}

/// Subcommands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one replication pass over a notification batch.
    Handle {
        /// Notification JSON file, or `-` for stdin.
        #[arg(default_value = "-")]
        event: String,
    },
    /// Load and validate the rule table.
    CheckConfig {
        /// Also look up the region of every destination without an `@region`.
        #[arg(long)]
        resolve: bool,
    },
}

impl Cli {
    /// Executes the selected subcommand.
    pub async fn run(self) -> Result<()> {
        let rules = self.config.source()?.load().await?;
        let engine_config = self.engine.engine_config()?;

        match &self.command {
            Command::Handle { event } => {
                let provider = S3StoreProvider::from_env(self.engine.backend_config()).await;
                let engine = ReplicationEngine::new(engine_config, Arc::new(rules), Arc::new(provider));
                let raw = read_event(event).await?;
                let report = engine.handle_event(&raw).await?;
                log_report(&report);
                Ok(())
            }
            Command::CheckConfig { resolve } => {
                print_rules(&rules);
                if *resolve {
                    let provider = S3StoreProvider::from_env(self.engine.backend_config()).await;
                    let resolver = RegionResolver::new(Arc::new(provider), engine_config.probe_region);
                    for (source, dest) in resolve_destinations(&rules, &resolver).await? {
                        println!("{} -> {} ({})", source, dest.bucket, dest.region);
                    }
                }
                Ok(())
            }
        }
    }
}

/// Reads the notification document from a file, or stdin for `-`.
pub async fn read_event(event: &str) -> Result<Vec<u8>> {
    if event == "-" {
        let mut raw = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut raw)
            .await
            .context("reading notification from stdin")?;
        return Ok(raw);
    }

    let path = Path::new(event);
    tokio::fs::read(path)
        .await
        .with_context(|| format!("reading notification from {}", path.display()))
}

/// Resolves every destination of every rule concurrently.
pub async fn resolve_destinations(
    rules: &RuleTable,
    resolver: &RegionResolver,
) -> bucketmirror_core::Result<Vec<(String, ResolvedDestination)>> {
    let lookups = rules.iter().flat_map(move |(source, rule)| {
        rule.destinations.iter().map(move |dest| async move {
            let resolved = resolver.resolve(dest, &rule.region).await?;
            Ok::<_, ReplError>((source.to_string(), resolved))
        })
    });
    try_join_all(lookups).await
}

fn print_rules(rules: &RuleTable) {
    for (source, rule) in rules.iter() {
        let destinations: Vec<String> = rule.destinations.iter().map(|d| d.to_string()).collect();
        println!(
            "{} [{}] -> {} acl={}",
            source,
            rule.region,
            destinations.join(", "),
            rule.explicit_acl().unwrap_or("<source>")
        );
    }
}

fn log_report(report: &BatchReport) {
    if report.is_noop() {
        info!("Batch {}: nothing to replicate ({} records)", report.batch_id, report.records);
        return;
    }
    info!(
        "Batch {}: {:?} of {} records, {} tasks dispatched, {} results received",
        report.batch_id,
        report.kind,
        report.records,
        report.dispatched,
        report.outcomes.len()
    );
}

/// Process exit code for a failed run: 2 when a destination bucket does not
/// exist, 1 otherwise.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ReplError>() {
        Some(e) if e.is_fatal() => 2,
        _ => 1,
    }
}
