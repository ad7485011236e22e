//! Persistence: the relational store and the report artifact repository.

pub mod artifacts;
pub mod sqlite;

pub use artifacts::GitArtifactStore;
pub use sqlite::SqliteStore;
