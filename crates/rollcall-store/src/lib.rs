//! rollcall-store: SQLite persistence for subject profiles and the attendance ledger.

pub mod sqlite;

pub use sqlite::SqliteStore;
