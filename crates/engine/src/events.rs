//! Event sink: an append-only subscriber list with copy-on-publish dispatch.
//!
//! Subscribers run synchronously on the publishing task but are isolated
//! from each other with `catch_unwind` so one panicking subscriber cannot
//! take down the scheduler's dispatch loop or poison the subscriber list.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::error;

use taskflow_common::JobEvent;
use taskflow_core::scheduler::{EventSink, EventSubscriber};

/// Default in-memory event sink.
#[derive(Default)]
pub struct InMemoryEventSink {
    subscribers: Mutex<Vec<Arc<dyn EventSubscriber>>>,
}

impl InMemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for InMemoryEventSink {
    fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) {
        self.subscribers.lock().push(subscriber);
    }

    fn publish(&self, event: JobEvent) {
        // Clone the subscriber list under the lock, then release it before
        // invoking callbacks, so a subscriber that re-subscribes (or a
        // slow one) never blocks other publishers.
        let subscribers = self.subscribers.lock().clone();

        for subscriber in subscribers {
            let event_ref = &event;
            let result = catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event_ref)));
            if result.is_err() {
                error!(job_id = %event.job_id, "event subscriber panicked, ignoring");
            }
        }
    }
}

/// Subscriber that collects every event it sees, for tests and for callers
/// that want to inspect the full event history of a run.
#[derive(Default)]
pub struct RecordingSubscriber {
    events: Mutex<Vec<JobEvent>>,
}

impl RecordingSubscriber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobEvent> {
        self.events.lock().clone()
    }
}

impl EventSubscriber for RecordingSubscriber {
    fn on_event(&self, event: &JobEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskflow_common::{JobEventKind, JobId};
    use uuid::Uuid;

    fn event(job_id: &str) -> JobEvent {
        JobEvent {
            timestamp: chrono::Utc::now(),
            job_id: JobId::from(job_id),
            kind: JobEventKind::Started { attempt: 1 },
            execution_id: Uuid::new_v4(),
        }
    }

    #[test]
    fn publishes_to_every_subscriber() {
        let sink = InMemoryEventSink::new();
        let recorder = Arc::new(RecordingSubscriber::new());
        sink.subscribe(recorder.clone());

        sink.publish(event("a"));
        sink.publish(event("b"));

        assert_eq!(recorder.events().len(), 2);
    }

    struct PanickingSubscriber;
    impl EventSubscriber for PanickingSubscriber {
        fn on_event(&self, _event: &JobEvent) {
            panic!("boom");
        }
    }

    #[test]
    fn a_panicking_subscriber_does_not_stop_others() {
        let sink = InMemoryEventSink::new();
        sink.subscribe(Arc::new(PanickingSubscriber));
        let recorder = Arc::new(RecordingSubscriber::new());
        sink.subscribe(recorder.clone());

        sink.publish(event("a"));

        assert_eq!(recorder.events().len(), 1);
    }
}
