use tracing::debug;

use crate::collaborators::{record_best_effort, AuditSink};
use crate::events::{AuditRecord, Event, EventSender};

/// Events and audit records produced inside a transaction.
///
/// Nothing leaves the process until [`Outbox::flush`] runs after commit, so a
/// rolled-back transaction never announces work that did not happen.
#[derive(Debug, Default)]
pub struct Outbox {
    events: Vec<Event>,
    audit: Vec<AuditRecord>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: Event) {
        self.events.push(event);
    }

    pub fn audit(&mut self, record: AuditRecord) {
        self.audit.push(record);
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.audit.is_empty()
    }

    /// Publishes queued events, then hands audit records to the sink.
    pub async fn flush(self, sender: &EventSender, sink: &dyn AuditSink) {
        debug!(
            events = self.events.len(),
            audit = self.audit.len(),
            "Flushing outbox"
        );
        for event in self.events {
            sender.publish(event).await;
        }
        for record in self.audit {
            record_best_effort(sink, record).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::TracingAuditSink;
    use uuid::Uuid;

    #[tokio::test]
    async fn dropped_outbox_publishes_nothing() {
        let (sender, mut rx) = EventSender::channel(4);
        {
            let mut outbox = Outbox::new();
            outbox.enqueue(Event::InvoicePaid(Uuid::nil()));
        }
        drop(sender);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn flush_publishes_in_enqueue_order() {
        let (sender, mut rx) = EventSender::channel(4);
        let mut outbox = Outbox::new();
        outbox.enqueue(Event::ForkliftTaskDeleted(Uuid::nil()));
        outbox.enqueue(Event::InvoicePaid(Uuid::nil()));
        outbox.flush(&sender, &TracingAuditSink).await;

        assert_eq!(rx.recv().await, Some(Event::ForkliftTaskDeleted(Uuid::nil())));
        assert_eq!(rx.recv().await, Some(Event::InvoicePaid(Uuid::nil())));
    }
}
