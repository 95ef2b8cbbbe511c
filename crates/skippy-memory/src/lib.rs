//! SQLite-backed memory: global and per-channel key/value records plus
//! named skills, with tokenized search and deep-merge skill updates.

pub mod db;
pub mod error;
pub mod merge;
pub mod store;
pub mod types;

pub use error::MemoryError;
pub use store::MemoryStore;
pub use types::{MemoryRecord, Scope, SkillRecord};
