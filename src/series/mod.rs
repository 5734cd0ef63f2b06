//! Time-Series Buffers
//!
//! Bounded per-widget sample history:
//!
//! - **buffer**: `SeriesBuffer`, a FIFO ring of `Sample`s
//! - **store**: `SeriesStore`, buffers keyed by widget-instance id
//! - **history**: optional durable snapshots (`HistoryStore`)
//! - **error**: Error types
//!
//! Series are keyed by widget instance, not by topic: two widgets watching
//! the same topic through different paths get independent buffers.
//!
//! # Example
//!
//! ```rust
//! use mqttdeck::series::{Sample, SeriesStore};
//!
//! let mut store = SeriesStore::new(20);
//! for i in 0..25 {
//!     store.push("chart-1", Sample::new(i, i as f64));
//! }
//! assert_eq!(store.read("chart-1").len(), 20);
//! ```

mod buffer;
mod error;
mod history;
mod store;

pub use buffer::{Sample, SeriesBuffer, Trend};
pub use error::{HistoryError, HistoryResult};
pub use history::{history_key, FileHistoryStore, HistoryStore, MemoryHistoryStore};
pub use store::{write_snapshots, SeriesStore, Snapshot};
