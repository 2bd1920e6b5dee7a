//! ChainWatch CLI.
//!
//! # Commands
//! ```text
//! chainwatch run      [--rpc-url <url>] [--database-url <url>]
//! chainwatch validate
//! chainwatch rules    list | add <json> | update <json> | delete <id>
//! chainwatch delay    <n>
//! chainwatch query    [--tx <hash>] [--block <n>] [--rule <id>] [--page <n>] ...
//! chainwatch info
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use chainwatch_core::HexPolicy;

mod backend;
mod cmd_query;
mod cmd_rules;
mod cmd_run;
mod logging;

#[derive(Parser)]
#[command(
    name = "chainwatch",
    about = "Rule-driven EVM log watcher with a hot-reloadable rule file",
    long_about = "
ChainWatch follows new blocks, queries eth_getLogs for every enabled rule once
a confirmation window has passed, and upserts matching logs keyed by
transaction hash.

ENVIRONMENT VARIABLES:
  CHAINWATCH_CONFIG     Rule document path (default: configuration.json)
  CHAINWATCH_RPC_URL    JSON-RPC endpoint
  API_KEY               Infura key, used when no RPC URL is given
  DATABASE_URL          sqlite:<path> or postgres://...; in-memory when unset
  CHAINWATCH_LOG        Log level (default: info)
",
    version
)]
struct Cli {
    /// Path to the rule document
    #[arg(long, global = true, env = "CHAINWATCH_CONFIG", default_value = "configuration.json")]
    config: PathBuf,

    /// Hex checking for rule addresses and topics
    #[arg(long, global = true, value_enum, env = "CHAINWATCH_HEX_POLICY", default_value_t = HexArg::Strict)]
    hex: HexArg,

    /// Environment file loaded before anything else (ignored if missing)
    #[arg(long, global = true, default_value = ".env")]
    env_file: PathBuf,

    /// Global log level
    #[arg(long, global = true, env = "CHAINWATCH_LOG", default_value = "info")]
    log_level: String,

    /// Per-crate log level override, e.g. chainwatch_evm=debug (repeatable)
    #[arg(long = "log", global = true)]
    log_components: Vec<String>,

    /// Emit JSON logs
    #[arg(long, global = true, env = "CHAINWATCH_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum HexArg {
    Strict,
    Lenient,
}

impl From<HexArg> for HexPolicy {
    fn from(arg: HexArg) -> Self {
        match arg {
            HexArg::Strict => HexPolicy::Strict,
            HexArg::Lenient => HexPolicy::Lenient,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Watch the chain and persist matching logs until Ctrl-C
    Run(cmd_run::RunArgs),

    /// Validate the rule document and print a summary
    Validate,

    /// List or edit rules (writes the document; a running watcher reloads it)
    Rules {
        #[command(subcommand)]
        action: cmd_rules::RulesAction,
    },

    /// Set delayBlocks
    Delay {
        /// New value; anything that is not a non-negative integer is rejected
        value: String,
    },

    /// Page through stored logs
    Query(cmd_query::QueryArgs),

    /// Show build and default settings
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.env_file.exists() {
        dotenvy::from_path(&cli.env_file)
            .with_context(|| format!("loading {}", cli.env_file.display()))?;
    }

    let log = logging::LogConfig {
        level: cli.log_level.clone(),
        json: cli.log_json,
        ..Default::default()
    }
    .with_components(cli.log_components.iter().map(String::as_str));
    logging::init_tracing(&log);

    let policy = HexPolicy::from(cli.hex);
    match cli.command {
        Commands::Run(args) => cmd_run::run(&cli.config, policy, args).await,
        Commands::Validate => cmd_rules::validate(&cli.config, policy).await,
        Commands::Rules { action } => cmd_rules::run(&cli.config, policy, action).await,
        Commands::Delay { value } => cmd_rules::set_delay(&cli.config, policy, &value).await,
        Commands::Query(args) => cmd_query::run(args).await,
        Commands::Info => {
            cmd_info();
            Ok(())
        }
    }
}

fn cmd_info() {
    println!("ChainWatch v{}", env!("CARGO_PKG_VERSION"));
    println!(
        "  Block poll interval: {} ms",
        chainwatch_evm::DEFAULT_BLOCK_POLL.as_millis()
    );
    println!(
        "  Query pacing: {} ms (fixed or backoff)",
        chainwatch_core::pacing::DEFAULT_PACING.as_millis()
    );
    println!(
        "  Reload debounce: {} ms",
        chainwatch_config::debounce::DEFAULT_DEBOUNCE.as_millis()
    );
    println!(
        "  Watch modes: native, poll ({} ms)",
        chainwatch_config::DEFAULT_POLL_INTERVAL.as_millis()
    );
    println!("  Storage backends: memory, SQLite (sqlite:), PostgreSQL (postgres://)");
    println!("  Dedup / upsert key: transactionHash");
}
