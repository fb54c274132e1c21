//! Queue events and the broadcast bus that carries them.
//!
//! Progress displays and hosts subscribe independently; an event emitted
//! with no subscribers is dropped.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::JobType;

/// Something observable happened to the queue or the worker.
///
/// Serialized with a `type` tag, e.g.
/// `{"type":"JobStarted","job_id":"...","job_type":"upscale"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum QueueEvent {
    /// A job was appended to the queue.
    JobAdded { job_id: Uuid, job_type: JobType },
    /// The worker picked a job up.
    JobStarted { job_id: Uuid, job_type: JobType },
    /// A processor reported progress.
    JobProgress {
        job_id: Uuid,
        progress: u8,
        processed_items: usize,
        total_items: usize,
    },
    JobCompleted { job_id: Uuid, job_type: JobType },
    JobFailed {
        job_id: Uuid,
        job_type: JobType,
        error: String,
    },
    /// A job was removed explicitly.
    JobRemoved { job_id: Uuid },
    /// A bulk clear removed `removed` jobs.
    JobsCleared { removed: usize },
    /// Any externally cached list of liked posts is out of date.
    PostListStale { job_type: JobType },
    WorkerStarted,
    WorkerStopped,
}

impl QueueEvent {
    /// Dot-namespaced event name (e.g. `"job.started"`).
    pub fn event_type(&self) -> &'static str {
        match self {
            QueueEvent::JobAdded { .. } => "job.added",
            QueueEvent::JobStarted { .. } => "job.started",
            QueueEvent::JobProgress { .. } => "job.progress",
            QueueEvent::JobCompleted { .. } => "job.completed",
            QueueEvent::JobFailed { .. } => "job.failed",
            QueueEvent::JobRemoved { .. } => "job.removed",
            QueueEvent::JobsCleared { .. } => "queue.cleared",
            QueueEvent::PostListStale { .. } => "posts.stale",
            QueueEvent::WorkerStarted => "worker.started",
            QueueEvent::WorkerStopped => "worker.stopped",
        }
    }

    /// Job this event relates to, if any.
    pub fn job_id(&self) -> Option<Uuid> {
        match self {
            QueueEvent::JobAdded { job_id, .. }
            | QueueEvent::JobStarted { job_id, .. }
            | QueueEvent::JobProgress { job_id, .. }
            | QueueEvent::JobCompleted { job_id, .. }
            | QueueEvent::JobFailed { job_id, .. }
            | QueueEvent::JobRemoved { job_id } => Some(*job_id),
            _ => None,
        }
    }
}

/// Broadcast bus for [`QueueEvent`]s. Cloning shares the channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<QueueEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: QueueEvent) {
        tracing::trace!(
            event_type = event.event_type(),
            subscriber_count = self.tx.receiver_count(),
            "EventBus emit"
        );
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(crate::defaults::EVENT_BUS_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_event_bus_emit_subscribe() {
        let bus = EventBus::new(32);
        let mut rx = bus.subscribe();

        bus.emit(QueueEvent::JobAdded {
            job_id: Uuid::nil(),
            job_type: JobType::Download,
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "job.added");
        assert_eq!(event.job_id(), Some(Uuid::nil()));
    }

    #[tokio::test]
    async fn test_event_bus_multiple_subscribers() {
        let bus = EventBus::new(32);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.emit(QueueEvent::WorkerStarted);

        assert_eq!(rx1.recv().await.unwrap(), QueueEvent::WorkerStarted);
        assert_eq!(rx2.recv().await.unwrap(), QueueEvent::WorkerStarted);
    }

    #[test]
    fn test_emit_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.emit(QueueEvent::WorkerStopped);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = QueueEvent::PostListStale {
            job_type: JobType::Unlike,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "PostListStale");
        assert_eq!(json["job_type"], "unlike");
        assert_eq!(event.job_id(), None);
    }
}
