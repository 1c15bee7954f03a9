//! Interfaces to systems the orchestration core consumes but does not own:
//! the audit log, static reference data and the document store.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    events::{AuditRecord, Event, EventSender},
};

/// Failure of a system behind one of the collaborator traits.
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{0} unavailable: {1}")]
    Unavailable(&'static str, String),
    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

impl From<CollaboratorError> for ServiceError {
    fn from(err: CollaboratorError) -> Self {
        ServiceError::InternalError(err.to_string())
    }
}

/// Fire-and-forget audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, record: AuditRecord) -> Result<(), CollaboratorError>;
}

/// Records an audit entry, logging instead of returning any failure.
pub async fn record_best_effort(sink: &dyn AuditSink, record: AuditRecord) {
    let action = record.action.clone();
    let entity_id = record.entity_id;
    if let Err(e) = sink.record(record).await {
        metrics::counter!("depot.audit.failures", 1);
        warn!(%action, %entity_id, error = %e, "Audit record dropped");
    }
}

/// Forwards audit records onto the domain event channel without blocking.
#[derive(Debug, Clone)]
pub struct EventAuditSink {
    sender: EventSender,
}

impl EventAuditSink {
    pub fn new(sender: EventSender) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl AuditSink for EventAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CollaboratorError> {
        self.sender
            .try_send(Event::Audit(record))
            .map_err(|e| CollaboratorError::Unavailable("event channel", e))
    }
}

/// Writes audit records to the tracing subscriber.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), CollaboratorError> {
        info!(
            target: "audit",
            actor = %record.actor,
            action = %record.action,
            entity = %record.entity,
            entity_id = %record.entity_id,
            meta = %record.meta,
            "audit"
        );
        Ok(())
    }
}

/// Read-only lookup of customers, shipping lines and container types.
#[async_trait]
pub trait ReferenceData: Send + Sync {
    async fn customer_exists(&self, id: Uuid) -> Result<bool, CollaboratorError>;
    async fn shipping_line_exists(&self, id: Uuid) -> Result<bool, CollaboratorError>;
    async fn container_type_exists(&self, id: Uuid) -> Result<bool, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryReferenceData {
    customers: RwLock<HashSet<Uuid>>,
    shipping_lines: RwLock<HashSet<Uuid>>,
    container_types: RwLock<HashSet<Uuid>>,
}

impl InMemoryReferenceData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_customer(&self, id: Uuid) {
        if let Ok(mut set) = self.customers.write() {
            set.insert(id);
        }
    }

    pub fn add_shipping_line(&self, id: Uuid) {
        if let Ok(mut set) = self.shipping_lines.write() {
            set.insert(id);
        }
    }

    pub fn add_container_type(&self, id: Uuid) {
        if let Ok(mut set) = self.container_types.write() {
            set.insert(id);
        }
    }

    fn contains(set: &RwLock<HashSet<Uuid>>, id: Uuid) -> Result<bool, CollaboratorError> {
        set.read()
            .map(|s| s.contains(&id))
            .map_err(|_| CollaboratorError::Poisoned("reference data"))
    }
}

#[async_trait]
impl ReferenceData for InMemoryReferenceData {
    async fn customer_exists(&self, id: Uuid) -> Result<bool, CollaboratorError> {
        Self::contains(&self.customers, id)
    }

    async fn shipping_line_exists(&self, id: Uuid) -> Result<bool, CollaboratorError> {
        Self::contains(&self.shipping_lines, id)
    }

    async fn container_type_exists(&self, id: Uuid) -> Result<bool, CollaboratorError> {
        Self::contains(&self.container_types, id)
    }
}

/// Attachment metadata; the content itself stays in the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DocumentRef {
    pub id: Uuid,
    pub request_id: Uuid,
    pub file_name: String,
    pub content_type: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Document/attachment store keyed by request id, opaque to the core.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn list(&self, request_id: Uuid) -> Result<Vec<DocumentRef>, CollaboratorError>;
}

#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<Uuid, Vec<DocumentRef>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach(&self, request_id: Uuid, file_name: &str, content_type: &str) -> DocumentRef {
        let doc = DocumentRef {
            id: Uuid::new_v4(),
            request_id,
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            uploaded_at: Utc::now(),
        };
        if let Ok(mut map) = self.documents.write() {
            map.entry(request_id).or_default().push(doc.clone());
        }
        doc
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn list(&self, request_id: Uuid) -> Result<Vec<DocumentRef>, CollaboratorError> {
        self.documents
            .read()
            .map(|map| map.get(&request_id).cloned().unwrap_or_default())
            .map_err(|_| CollaboratorError::Poisoned("document store"))
    }
}
