use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod outbox;

pub use outbox::Outbox;

use crate::entities::{
    forklift_task::TaskStatus,
    repair_ticket::TicketStatus,
    service_request::{RequestStatus, RequestType},
};

/// One audit trail entry, handed to the audit sink after a business change commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    pub actor: String,
    pub action: String,
    pub entity: String,
    pub entity_id: Uuid,
    pub meta: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        entity: impl Into<String>,
        entity_id: Uuid,
        meta: serde_json::Value,
    ) -> Self {
        Self {
            actor: actor.into(),
            action: action.into(),
            entity: entity.into(),
            entity_id,
            meta,
            recorded_at: Utc::now(),
        }
    }
}

/// Domain events published after a transaction commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Event {
    RequestCreated {
        request_id: Uuid,
        request_type: RequestType,
        status: RequestStatus,
    },
    RequestTransitioned {
        request_id: Uuid,
        request_type: RequestType,
        from: RequestStatus,
        to: RequestStatus,
        actor: String,
    },
    ForkliftTaskCreated {
        task_id: Uuid,
        container_no: String,
        request_id: Option<Uuid>,
    },
    ForkliftTaskStatusChanged {
        task_id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },
    ForkliftTaskDeleted(Uuid),
    RepairTicketCreated {
        ticket_id: Uuid,
        request_id: Uuid,
        container_no: String,
    },
    RepairTicketDecided {
        ticket_id: Uuid,
        status: TicketStatus,
    },
    SealAllocated {
        seal_id: Uuid,
        seal_number: String,
        container_no: String,
    },
    SealReleased {
        seal_id: Uuid,
        seal_number: String,
        container_no: String,
    },
    InvoiceRecomputed {
        invoice_id: Uuid,
        subtotal: Decimal,
        tax_amount: Decimal,
        total_amount: Decimal,
    },
    InvoicePaid(Uuid),
    Audit(AuditRecord),
}

impl Event {
    /// Short name used as a metrics label and log field.
    pub fn name(&self) -> &'static str {
        match self {
            Event::RequestCreated { .. } => "request_created",
            Event::RequestTransitioned { .. } => "request_transitioned",
            Event::ForkliftTaskCreated { .. } => "forklift_task_created",
            Event::ForkliftTaskStatusChanged { .. } => "forklift_task_status_changed",
            Event::ForkliftTaskDeleted(_) => "forklift_task_deleted",
            Event::RepairTicketCreated { .. } => "repair_ticket_created",
            Event::RepairTicketDecided { .. } => "repair_ticket_decided",
            Event::SealAllocated { .. } => "seal_allocated",
            Event::SealReleased { .. } => "seal_released",
            Event::InvoiceRecomputed { .. } => "invoice_recomputed",
            Event::InvoicePaid(_) => "invoice_paid",
            Event::Audit(_) => "audit",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with its receiving end.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event without waiting; fails when the channel is full or closed.
    pub fn try_send(&self, event: Event) -> Result<(), String> {
        self.sender
            .try_send(event)
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes a post-commit event. Delivery failures are logged, never returned.
    pub async fn publish(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Handlers receive every event drained by [`process_events`].
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), String>;
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        metrics::counter!("depot.events.processed", 1, "event" => event.name());

        match &event {
            Event::RequestTransitioned {
                request_id,
                from,
                to,
                actor,
                ..
            } => {
                info!(%request_id, %from, %to, %actor, "Request transitioned");
            }
            Event::SealAllocated {
                seal_number,
                container_no,
                ..
            } => {
                info!(%seal_number, %container_no, "Seal allocated");
            }
            Event::SealReleased {
                seal_number,
                container_no,
                ..
            } => {
                info!(%seal_number, %container_no, "Seal released");
            }
            Event::Audit(record) => {
                info!(
                    actor = %record.actor,
                    action = %record.action,
                    entity = %record.entity,
                    entity_id = %record.entity_id,
                    "Audit"
                );
            }
            other => debug!(event = other.name(), "Received event: {:?}", other),
        }

        let results = join_all(handlers.iter().map(|h| h.handle_event(&event))).await;
        for result in results {
            if let Err(e) = result {
                error!(event = event.name(), error = %e, "Event handler failed");
            }
        }
    }

    warn!("Event processing loop has ended");
}
