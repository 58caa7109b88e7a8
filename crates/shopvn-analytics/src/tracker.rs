use chrono::{SubsecRound, Utc};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::event::{EventPayload, EventRecord};
use crate::persistence::PersistenceStrategy;
use crate::session::SessionContext;

/// Append-only, in-order log of the events captured this session.
#[derive(Default)]
pub struct EventLog {
    events: RwLock<Vec<EventRecord>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append and return the 1-based sequence number of the new entry.
    fn push(&self, event: EventRecord) -> u64 {
        let mut events = self.events.write();
        events.push(event);
        events.len() as u64
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Copy of everything captured so far.
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.events.read().clone()
    }
}

/// Captures storefront interactions for one session.
///
/// `record` never fails and never blocks on I/O; persistence is handed to
/// the strategy, which dispatches its own background work.
pub struct EventTracker {
    context: Arc<SessionContext>,
    strategy: Arc<dyn PersistenceStrategy>,
    log: EventLog,
    total: AtomicU64,
}

impl EventTracker {
    pub fn new(context: Arc<SessionContext>, strategy: Arc<dyn PersistenceStrategy>) -> Self {
        Self {
            context,
            strategy,
            log: EventLog::new(),
            total: AtomicU64::new(0),
        }
    }

    /// Stamp `payload` with the session envelope, append it and hand it to
    /// the persistence strategy. Returns the event's sequence number.
    pub fn record(&self, payload: EventPayload) -> u64 {
        let session = &self.context.session;
        let event = EventRecord {
            // Millisecond precision, matching the serialized form.
            timestamp: Utc::now().trunc_subsecs(3),
            session_id: session.session_id.clone(),
            device_type: session.device_type,
            browser: session.browser,
            location: session.location.clone(),
            payload,
        };
        let seq = self.log.push(event.clone());
        self.total.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            event_type = %event.kind(),
            seq,
            session_id = %event.session_id,
            "event tracked"
        );
        self.strategy.on_event(&self.context, &event, seq, &self.log);
        seq
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.log.snapshot()
    }

    pub fn event_count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.context
    }
}
