use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

use chainwatch_config::{ConfigStore, ConfigStoreOptions, FileConfigSource, WatchMode};
use chainwatch_core::pacing::DEFAULT_PACING;
use chainwatch_core::{BackoffPacing, FixedPacing, HexPolicy, PacingPolicy, Persister, RuleValidator};
use chainwatch_evm::{
    infura_mainnet_url, spawn_block_poller, ChainClient, ChainWatcher, ChainWatcherOptions,
    HttpChainClient, HttpClientConfig, RuleEngine,
};

use crate::backend;

#[derive(Args)]
pub struct RunArgs {
    /// JSON-RPC endpoint
    #[arg(long, env = "CHAINWATCH_RPC_URL")]
    rpc_url: Option<String>,

    /// Infura project key; used when --rpc-url is not given
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// sqlite:<path> or postgres://...; in-memory when unset
    #[arg(long, env = "DATABASE_URL", hide_env_values = true)]
    database_url: Option<String>,

    /// Head polling interval in milliseconds
    #[arg(long, env = "CHAINWATCH_BLOCK_POLL_MS", default_value_t = 4_000)]
    block_poll_ms: u64,

    /// Pause between per-rule queries
    #[arg(long, value_enum, env = "CHAINWATCH_PACING", default_value_t = PacingArg::Fixed)]
    pacing: PacingArg,

    /// Base pause between per-rule queries in milliseconds
    #[arg(long, env = "CHAINWATCH_PACING_MS", default_value_t = DEFAULT_PACING.as_millis() as u64)]
    pacing_ms: u64,

    /// Upper bound for backoff pacing in milliseconds
    #[arg(long, default_value_t = 60_000)]
    pacing_max_ms: u64,

    /// Quiet period before a changed rule file is reloaded, in milliseconds
    #[arg(long, env = "CHAINWATCH_DEBOUNCE_MS", default_value_t = 300)]
    debounce_ms: u64,

    /// How rule file changes are detected
    #[arg(long, value_enum, env = "CHAINWATCH_WATCH", default_value_t = WatchArg::Native)]
    watch: WatchArg,

    /// Stat interval for --watch poll, in milliseconds
    #[arg(long, default_value_t = 500)]
    watch_poll_ms: u64,

    /// JSON-RPC request timeout in seconds
    #[arg(long, default_value_t = 30)]
    request_timeout_secs: u64,

    /// How long to wait for running flushes on shutdown, in seconds
    #[arg(long, default_value_t = 30)]
    shutdown_grace_secs: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum PacingArg {
    Fixed,
    Backoff,
}

#[derive(Clone, Copy, ValueEnum)]
enum WatchArg {
    Native,
    Poll,
}

impl RunArgs {
    fn endpoint(&self) -> Result<String> {
        match (&self.rpc_url, &self.api_key) {
            (Some(url), _) if !url.trim().is_empty() => Ok(url.trim().to_string()),
            (_, Some(key)) if !key.trim().is_empty() => Ok(infura_mainnet_url(key.trim())),
            _ => bail!("no RPC endpoint: set --rpc-url / CHAINWATCH_RPC_URL or API_KEY"),
        }
    }

    fn pacing_policy(&self) -> Arc<dyn PacingPolicy> {
        let base = Duration::from_millis(self.pacing_ms);
        match self.pacing {
            PacingArg::Fixed => Arc::new(FixedPacing::new(base)),
            PacingArg::Backoff => Arc::new(BackoffPacing {
                base,
                max: Duration::from_millis(self.pacing_max_ms.max(self.pacing_ms)),
                ..Default::default()
            }),
        }
    }

    fn watch_mode(&self) -> WatchMode {
        match self.watch {
            WatchArg::Native => WatchMode::Native,
            WatchArg::Poll => WatchMode::Poll(Duration::from_millis(self.watch_poll_ms)),
        }
    }
}

pub async fn run(config_path: &Path, policy: HexPolicy, args: RunArgs) -> Result<()> {
    let endpoint = args.endpoint()?;

    let source = Arc::new(FileConfigSource::new(config_path, args.watch_mode()));
    let config = ConfigStore::load(
        source,
        RuleValidator::new(policy),
        ConfigStoreOptions {
            debounce: Duration::from_millis(args.debounce_ms),
        },
    )
    .await
    .with_context(|| format!("loading {}", config_path.display()))?;
    config.watch()?;

    let client: Arc<dyn ChainClient> = Arc::new(HttpChainClient::new(
        endpoint,
        HttpClientConfig {
            request_timeout: Duration::from_secs(args.request_timeout_secs),
        },
    )?);
    let store = backend::open_store(args.database_url.as_deref()).await?;

    let engine = Arc::new(RuleEngine::new(client.clone(), args.pacing_policy()));
    let (subscription, updates) = config.subscribe();
    let watcher = ChainWatcher::new(
        engine,
        Persister::new(store),
        config.get(),
        ChainWatcherOptions {
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        },
    );

    let (blocks, poller) = spawn_block_poller(client, Duration::from_millis(args.block_poll_ms));
    let handle = watcher.spawn(blocks, updates);
    info!(config = %config_path.display(), "chainwatch running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
    info!("shutting down");

    config.unsubscribe(subscription);
    config.cleanup();
    poller.abort();
    let summary = handle.stop().await;
    info!(
        blocks = summary.blocks_seen,
        windows = summary.windows_flushed,
        failed = summary.flushes_failed,
        abandoned = summary.flushes_abandoned,
        "stopped"
    );
    Ok(())
}
