//! chainwatch-evm: EVM side of the ingestion pipeline.
//!
//! - [`client`]: the [`ChainClient`] trait and `eth_getLogs` wire types
//! - [`rpc`]: [`HttpChainClient`], JSON-RPC over HTTP
//! - [`blocks`]: head polling turned into a block-number stream
//! - [`engine`]: [`RuleEngine`], one paced query per enabled rule
//! - [`watcher`]: [`ChainWatcher`], confirmation windows and flush scheduling

pub mod blocks;
pub mod client;
pub mod engine;
pub mod rpc;
pub mod watcher;

#[cfg(test)]
mod mock;

pub use blocks::{spawn_block_poller, DEFAULT_BLOCK_POLL};
pub use client::{parse_hex_u64, ChainClient, LogFilter, RawLog};
pub use engine::RuleEngine;
pub use rpc::{infura_mainnet_url, HttpChainClient, HttpClientConfig};
pub use watcher::{ChainWatcher, ChainWatcherOptions, WatcherHandle, WatcherSummary};
