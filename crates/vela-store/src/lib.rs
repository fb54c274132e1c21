//! # vela-store
//!
//! Durable state for the vela job queue: the job-list snapshot and the
//! per-user archive of unliked posts. Each store comes in a JSON-file
//! flavour for real use and an in-memory flavour for tests and hosts that
//! bring their own persistence. An in-memory prompt library backs the
//! prompt-pack purge.

pub mod archive;
mod json_file;
pub mod prompts;
pub mod snapshot;

pub use archive::{JsonFileArchiveStore, MemoryArchiveStore};
pub use prompts::MemoryPromptLibrary;
pub use snapshot::{JsonFileSnapshotStore, MemorySnapshotStore};
