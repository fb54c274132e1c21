//! # vela-core
//!
//! Core types, traits, and abstractions for the vela bulk media queue.
//!
//! This crate provides the job data model, the error taxonomy, the
//! collaborator traits the queue consumes, and the event bus it publishes
//! progress on. It performs no I/O of its own.

pub mod defaults;
pub mod error;
pub mod events;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{EventBus, QueueEvent};
pub use models::*;
pub use traits::*;
