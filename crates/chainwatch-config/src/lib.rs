//! chainwatch-config: hot-reloadable rule configuration.
//!
//! ```text
//! ConfigSource (file: native / poll, memory)
//!     │ change signals
//!     ▼
//! debouncer (300 ms) ──► ConfigStore::reload ──► SubscriberRegistry ──► configurationUpdated
//!                              ▲
//!  add/update/delete rule ─────┘ (validated, written atomically, published)
//! ```

pub mod debounce;
pub mod source;
pub mod store;
pub mod subscribers;

pub use source::{ConfigSource, FileConfigSource, MemoryConfigSource, WatchMode, DEFAULT_POLL_INTERVAL};
pub use store::{ConfigStore, ConfigStoreOptions};
pub use subscribers::SubscriptionId;
