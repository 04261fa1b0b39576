//! CheckpointStore - durable one-file-per-record JSON storage
//!
//! Each record is kept as a single pretty-printed JSON file named after its
//! key. Writes go through a temp file that is fsynced and renamed into
//! place, so a reader never observes a half-written record.
//!
//! # Layout
//!
//! ```text
//! checkpoints/
//! ├── task-1.json
//! ├── task-2.json
//! └── ...
//! ```
//!
//! # Example
//!
//! ```ignore
//! use checkpointstore::JsonStore;
//!
//! let store: JsonStore<MyRecord> = JsonStore::open("/tmp/checkpoints")?;
//! store.write(&record).await?;
//! let loaded = store.read("task-1").await?;
//! ```

mod error;
mod store;

pub use error::{Severity, StoreError, StoreResult};
pub use store::{JsonStore, Record};

/// Current time as Unix milliseconds
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
