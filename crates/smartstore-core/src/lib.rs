//! SmartStore Core: a key-value store that persists itself
//!
//! An ordered in-memory map whose contents are written to a single snapshot
//! file automatically, shortly after they change, and loaded back on open.
//!
//! # Architecture
//!
//! - **Protocol**: values are JSON plus tagged strings for timestamps and
//!   patterns, escape-safe for ordinary strings that look like tags
//! - **Dirty tracking**: every key access marks the key; a flush only
//!   rewrites the file if some touched key now encodes differently
//! - **Scheduler**: a bounded debounce (`[min, max]`) turns bursts of writes
//!   into one background flush
//! - **Lifecycle**: open/flush/close in sync and async forms; concurrent
//!   async calls join one in-flight operation
//!
//! ```no_run
//! use smartstore_core::{Store, StoreResult};
//!
//! fn main() -> StoreResult<()> {
//!     let store = Store::load_sync("settings.store")?;
//!     store.set("theme", "dark")?;
//!     store.close_sync()
//! }
//! ```

pub mod config;
pub mod dirty;
pub mod error;
pub mod fileio;
pub mod flush;
pub mod lifecycle;
pub mod platform_durability;
pub mod protocol;
pub mod scheduler;
pub mod store;
pub mod value;

// Re-export key types for convenience
pub use config::{FlushDelay, LogSink, StoreOptions};
pub use error::{StoreError, StoreResult};
pub use fileio::{DiskFiles, FileApi};
pub use flush::RESERVED_KEYS;
pub use lifecycle::LifecycleState;
pub use protocol::{deserialize, serialize};
pub use store::Store;
pub use value::{Pattern, Value};
