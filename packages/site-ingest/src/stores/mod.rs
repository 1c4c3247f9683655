//! Job store implementations.
//!
//! Available backends:
//! - `MemoryJobStore` - In-memory ledger (always available)
//! - `SqliteJobStore` - SQLite file-based ledger (requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use memory::MemoryJobStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteJobStore;
