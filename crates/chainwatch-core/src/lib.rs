//! chainwatch-core: rule model and ingestion primitives for ChainWatch.
//!
//! # Architecture
//!
//! ```text
//! ConfigStore ──configurationUpdated──► ChainWatcher
//!                                          ├── WindowTracker  (confirmation delay)
//!                                          ├── RuleEngine     (one query per enabled rule, paced)
//!                                          └── Persister      (dedup by tx hash → LogStore upsert)
//! ```
//!
//! This crate holds the pieces that do not touch the network or the
//! filesystem; `chainwatch-config`, `chainwatch-evm` and `chainwatch-storage`
//! build on it.

pub mod error;
pub mod pacing;
pub mod persister;
pub mod rule;
pub mod store;
pub mod types;
pub mod validator;
pub mod window;

pub use error::{FieldViolation, ValidationError, WatchError};
pub use pacing::{BackoffPacing, FixedPacing, PacingPolicy};
pub use persister::{dedup_by_transaction, Persister};
pub use rule::{Configuration, Rule, RuleMatch};
pub use store::{LogPage, LogQuery, LogStore, SortDirection, SortField, UpsertSpec, LOG_EVENT_UPSERT};
pub use types::{ConfirmationWindow, LogEvent, StoredLog};
pub use validator::{HexPolicy, RuleValidator};
pub use window::WindowTracker;
