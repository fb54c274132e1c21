//! # vela-jobs
//!
//! Single-worker job queue for bulk media operations.
//!
//! This crate provides:
//! - A persisted job list with FIFO dispatch ([`JobQueue`])
//! - A single-flight worker with cooperative stop ([`JobWorker`])
//! - One handler per job type, with batched upscales and HD URL polling
//! - Progress and lifecycle notifications via a broadcast channel
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vela_jobs::{Collaborators, JobQueue, WorkerBuilder, WorkerConfig};
//! use vela_store::JsonFileSnapshotStore;
//! use vela_core::{EventBus, JobData, JobType};
//!
//! let store = Arc::new(JsonFileSnapshotStore::new("vela-jobs.json"));
//! let queue = JobQueue::restore(store, EventBus::default()).await?;
//!
//! let worker = WorkerBuilder::new(queue, collaborators)
//!     .with_config(WorkerConfig::from_env())
//!     .build();
//!
//! let mut events = worker.subscribe();
//! worker
//!     .add_job(JobType::Relike, 2, JobData::Relike { post_ids })
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//! ```

pub mod config;
pub mod handler;
pub mod handlers;
pub mod poller;
pub mod queue;
pub mod worker;

// Re-export core types
pub use vela_core::*;

pub use config::{DelayRange, EnvConfig, StaticConfig, StaticUser, WorkerConfig};
pub use handler::{HandlerRegistry, JobContext, JobHandler};
pub use handlers::{
    DownloadHandler, ProcessForUpscaleHandler, PurgeHandler, RelikeHandler, UnlikeHandler,
    UpscaleHandler,
};
pub use poller::HdUrlPoller;
pub use queue::JobQueue;
pub use worker::{Collaborators, JobWorker, WorkerBuilder};
