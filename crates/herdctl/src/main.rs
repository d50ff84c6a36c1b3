//! `herdctl`: inspect herdcache rings and talk to stampede-guarded caches.
//!
//! # Usage
//!
//! ```text
//! herdctl -c herd.toml locate user:1 user:2      # which node owns each key
//! herdctl -n redis://a -n redis://b distribution  # key share per node
//! herdctl simulate --expired-ago 10 -t 100000     # stale fraction 10s past expiry
//! herdctl -c herd.toml set greeting hello -t 60   # write through the guard
//! herdctl -c herd.toml get greeting
//! herdctl -c herd.toml del greeting
//! ```

mod config;
mod telemetry;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use herdcache_herd::{StampedeGuard, is_expired};
use herdcache_placement::{HashRing, hash_tag};
use herdcache_shard::ShardedStore;
use herdcache_store::{KvStore, RedisStore};
use herdcache_types::CacheTimeout;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(
    name = "herdctl",
    version,
    about = "Inspect herdcache rings and stampede-guarded caches"
)]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true, env = "HERDCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Ring node (repeatable). Replaces `[ring] nodes` from the config file.
    #[arg(short = 'n', long = "node", global = true)]
    nodes: Vec<String>,

    /// Virtual points per node. Overrides `[ring] replicas`.
    #[arg(long, global = true)]
    replicas: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the node and ring index each key maps to.
    Locate {
        /// Keys to place.
        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Show how synthetic keys spread over the configured nodes.
    Distribution {
        /// Number of keys to place.
        #[arg(short = 'k', long, default_value = "100000")]
        keys: usize,
    },

    /// Estimate how often a read is declared stale some time after expiry.
    Simulate {
        /// Seconds since the logical expiry.
        #[arg(long)]
        expired_ago: u64,

        /// Number of simulated reads.
        #[arg(short, long, default_value = "10000")]
        trials: usize,

        /// Herd window in seconds. Overrides `[herd] herd_timeout`.
        #[arg(long)]
        herd_timeout: Option<u64>,

        /// RNG seed for a reproducible run.
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Read a key through the stampede guard.
    Get {
        key: String,
    },

    /// Write a key through the stampede guard.
    Set {
        key: String,
        value: String,

        /// Timeout in seconds. Zero or less deletes the key.
        #[arg(short, long, allow_negative_numbers = true)]
        timeout: Option<i64>,

        /// Store without expiry.
        #[arg(long, conflicts_with = "timeout")]
        never: bool,
    },

    /// Delete keys.
    Del {
        #[arg(required = true)]
        keys: Vec<String>,
    },
}

// -----------------------------------------------------------------------
// Entrypoint
// -----------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref()).context("failed to load config")?;

    telemetry::init(&config.log.level);

    // CLI args override config file values.
    if !cli.nodes.is_empty() {
        config.ring.nodes = cli.nodes;
    }
    if let Some(replicas) = cli.replicas {
        config.ring.replicas = replicas;
    }
    debug!(?config, "effective configuration");

    match cli.command {
        Commands::Locate { keys } => cmd_locate(&config, &keys),
        Commands::Distribution { keys } => cmd_distribution(&config, keys),
        Commands::Simulate {
            expired_ago,
            trials,
            herd_timeout,
            seed,
        } => {
            let herd_timeout = herd_timeout.unwrap_or(config.herd.herd_timeout);
            cmd_simulate(expired_ago, herd_timeout, trials, seed)
        }
        Commands::Get { key } => cmd_get(&config, &key).await,
        Commands::Set {
            key,
            value,
            timeout,
            never,
        } => cmd_set(&config, &key, value, resolve_timeout(timeout, never)).await,
        Commands::Del { keys } => cmd_del(&config, &keys).await,
    }
}

/// Build the ring described by the configuration, refusing an empty one.
fn build_ring(config: &CliConfig) -> Result<HashRing> {
    if config.ring.nodes.is_empty() {
        bail!("no nodes configured: set [ring] nodes or pass --node");
    }
    HashRing::from_config(&config.ring).context("invalid ring configuration")
}

/// Map the `set` flags to a timeout.
fn resolve_timeout(timeout: Option<i64>, never: bool) -> CacheTimeout {
    match (timeout, never) {
        (_, true) => CacheTimeout::Never,
        (Some(secs), false) => CacheTimeout::Seconds(secs),
        (None, false) => CacheTimeout::Default,
    }
}

// -----------------------------------------------------------------------
// herdctl locate / distribution
// -----------------------------------------------------------------------

fn cmd_locate(config: &CliConfig, keys: &[String]) -> Result<()> {
    let ring = build_ring(config)?;

    for key in keys {
        let tag = hash_tag(key);
        let Some((node, pos)) = ring.get_node_pos(tag) else {
            bail!("ring has no nodes");
        };
        if tag == key.as_str() {
            println!("{key}\t{node}\t{pos}");
        } else {
            println!("{key}\t{node}\t{pos}\t(tag {tag})");
        }
    }

    Ok(())
}

/// Count how many of `count` synthetic keys land on each node, in member order.
fn distribution(ring: &HashRing, count: usize) -> Vec<(String, usize)> {
    let mut hits: HashMap<&str, usize> = HashMap::new();
    for i in 0..count {
        if let Some(node) = ring.get_node(&format!("key-{i}")) {
            *hits.entry(node).or_default() += 1;
        }
    }
    ring.nodes()
        .map(|node| (node.to_string(), hits.get(node).copied().unwrap_or(0)))
        .collect()
}

fn cmd_distribution(config: &CliConfig, count: usize) -> Result<()> {
    let ring = build_ring(config)?;
    let shares = distribution(&ring, count);

    println!(
        "{} nodes, {} points, {count} keys",
        ring.node_count(),
        ring.point_count()
    );
    for (node, hits) in &shares {
        let pct = if count == 0 {
            0.0
        } else {
            *hits as f64 * 100.0 / count as f64
        };
        println!("  {node:<40} {hits:>10} {pct:>6.2}%");
    }

    Ok(())
}

// -----------------------------------------------------------------------
// herdctl simulate
// -----------------------------------------------------------------------

/// Fraction of `trials` reads declared stale `elapsed` seconds past expiry.
fn simulate_stale<R: Rng + ?Sized>(
    elapsed: u64,
    herd_timeout: u64,
    trials: usize,
    rng: &mut R,
) -> f64 {
    if trials == 0 {
        return 0.0;
    }
    let stale = (0..trials)
        .filter(|_| is_expired(elapsed, herd_timeout, &mut *rng))
        .count();
    stale as f64 / trials as f64
}

/// Exact probability that a read `elapsed` seconds past expiry is stale.
fn expected_stale(elapsed: u64, herd_timeout: u64) -> f64 {
    if elapsed >= herd_timeout {
        return 1.0;
    }
    // Stale iff the draw from [1, h] is at least h - elapsed: elapsed + 1 outcomes.
    (elapsed + 1) as f64 / herd_timeout as f64
}

fn cmd_simulate(elapsed: u64, herd_timeout: u64, trials: usize, seed: Option<u64>) -> Result<()> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let observed = simulate_stale(elapsed, herd_timeout, trials, &mut rng);
    let expected = expected_stale(elapsed, herd_timeout);

    println!("herd_timeout: {herd_timeout}s");
    println!("expired_ago:  {elapsed}s");
    println!("trials:       {trials}");
    println!("stale:        {:.2}% (expected {:.2}%)", observed * 100.0, expected * 100.0);

    Ok(())
}

// -----------------------------------------------------------------------
// herdctl get / set / del
// -----------------------------------------------------------------------

/// Connect to every configured node and wrap the sharded store in a guard.
async fn open_cache(config: &CliConfig) -> Result<StampedeGuard> {
    build_ring(config)?;

    let store = ShardedStore::from_config(&config.ring, |url| async move {
        let store = RedisStore::connect(&url)
            .await
            .with_context(|| format!("cannot connect to {url}"))?;
        Ok::<_, anyhow::Error>(Arc::new(store) as Arc<dyn KvStore>)
    })
    .await?;

    info!(nodes = config.ring.nodes.len(), "connected to cache nodes");
    Ok(StampedeGuard::new(Arc::new(store), config.herd))
}

async fn cmd_get(config: &CliConfig, key: &str) -> Result<()> {
    let cache = open_cache(config).await?;
    match cache.get(key).await? {
        Some(value) => println!("{}", String::from_utf8_lossy(&value)),
        None => println!("(nil)"),
    }
    Ok(())
}

async fn cmd_set(
    config: &CliConfig,
    key: &str,
    value: String,
    timeout: CacheTimeout,
) -> Result<()> {
    let cache = open_cache(config).await?;
    let written = cache.set(key, Bytes::from(value), timeout).await?;
    println!("{}", if written { "OK" } else { "(not written)" });
    Ok(())
}

async fn cmd_del(config: &CliConfig, keys: &[String]) -> Result<()> {
    let cache = open_cache(config).await?;
    let removed = cache.delete_many(keys).await?;
    println!("{removed}");
    Ok(())
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
