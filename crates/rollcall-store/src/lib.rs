//! rollcall-store — durable state on the local machine.
//!
//! - [`EmbeddingStore`]: JSON cache of enrolled embeddings, rewritten atomically.
//! - [`SqliteRecords`]: student registry and attendance ledger.
//! - [`LocalImageStore`]: enrollment photos on disk.

pub mod embeddings;
pub mod images;
pub mod sqlite;

pub use embeddings::{EmbeddingStore, StoreError};
pub use images::LocalImageStore;
pub use sqlite::{AttendanceFilter, SqliteRecords};
