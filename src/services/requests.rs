use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use sea_orm::{ActiveModelTrait, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    collaborators::{CollaboratorError, DocumentRef, DocumentStore, ReferenceData},
    db,
    entities::{
        request_transition,
        service_request::{self, RequestStatus, RequestType},
    },
    errors::ServiceError,
    events::{AuditRecord, Event, Outbox},
    services::{
        workflow::{self, RequestStateMachine, TransitionExtra},
        Actor, ActorScope,
    },
};

/// ISO 6346 shape: four capital letters, seven digits.
static CONTAINER_NO_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Z]{4}[0-9]{7}$").unwrap());

pub fn validate_container_no(value: &str) -> Result<(), ValidationError> {
    if CONTAINER_NO_RE.is_match(value) {
        Ok(())
    } else {
        Err(ValidationError::new("container_no"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ImportRequestInput {
    #[validate(custom = "validate_container_no")]
    pub container_no: String,
    pub customer_id: Uuid,
    pub shipping_line_id: Uuid,
    pub container_type_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub booking_no: Option<String>,
    /// Truck turned up without a booking; starts at `NEW_REQUEST`.
    #[serde(default)]
    pub walk_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ExportRequestInput {
    /// Usually picked later with [`RequestService::pick_container`].
    #[validate(custom = "validate_container_no")]
    pub container_no: Option<String>,
    pub customer_id: Uuid,
    pub shipping_line_id: Uuid,
    pub container_type_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub booking_no: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreateRequestInput {
    Import(ImportRequestInput),
    Export(ExportRequestInput),
}

impl CreateRequestInput {
    fn validate(&self) -> Result<(), ServiceError> {
        match self {
            Self::Import(input) => input.validate()?,
            Self::Export(input) => input.validate()?,
        }
        Ok(())
    }

    fn request_type(&self) -> RequestType {
        match self {
            Self::Import(_) => RequestType::Import,
            Self::Export(_) => RequestType::Export,
        }
    }

    fn initial_status(&self) -> RequestStatus {
        match self {
            Self::Import(input) if input.walk_in => RequestStatus::NewRequest,
            _ => RequestStatus::Pending,
        }
    }

    fn container_no(&self) -> Option<&str> {
        match self {
            Self::Import(input) => Some(input.container_no.as_str()),
            Self::Export(input) => input.container_no.as_deref(),
        }
    }

    fn references(&self) -> (Uuid, Uuid, Uuid) {
        match self {
            Self::Import(i) => (i.customer_id, i.shipping_line_id, i.container_type_id),
            Self::Export(e) => (e.customer_id, e.shipping_line_id, e.container_type_id),
        }
    }

    fn booking_no(&self) -> Option<String> {
        match self {
            Self::Import(input) => input.booking_no.clone(),
            Self::Export(input) => Some(input.booking_no.clone()),
        }
    }
}

/// Statuses from which a request may be hidden.
const DELETABLE: [RequestStatus; 4] = [
    RequestStatus::Pending,
    RequestStatus::NewRequest,
    RequestStatus::Completed,
    RequestStatus::Rejected,
];

#[derive(Clone)]
pub struct RequestService {
    machine: RequestStateMachine,
    references: Arc<dyn ReferenceData>,
    documents: Arc<dyn DocumentStore>,
}

impl RequestService {
    pub fn new(
        machine: RequestStateMachine,
        references: Arc<dyn ReferenceData>,
        documents: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            machine,
            references,
            documents,
        }
    }

    async fn check_references(&self, input: &CreateRequestInput) -> Result<(), ServiceError> {
        let (customer, line, container_type) = input.references();
        let lookup = |r: Result<bool, CollaboratorError>,
                      what: &str,
                      id: Uuid|
         -> Result<(), ServiceError> {
            if r? {
                Ok(())
            } else {
                Err(ServiceError::ValidationError(format!("unknown {} {}", what, id)))
            }
        };
        lookup(self.references.customer_exists(customer).await, "customer", customer)?;
        lookup(
            self.references.shipping_line_exists(line).await,
            "shipping line",
            line,
        )?;
        lookup(
            self.references.container_type_exists(container_type).await,
            "container type",
            container_type,
        )
    }

    #[instrument(skip(self, input, actor), fields(actor = %actor.id))]
    pub async fn create_request(
        &self,
        input: CreateRequestInput,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        input.validate()?;
        let (customer_id, shipping_line_id, container_type_id) = input.references();
        if let ActorScope::Customer(own) = actor.scope {
            if own != customer_id {
                return Err(ServiceError::ValidationError(
                    "customers may only file requests for themselves".to_string(),
                ));
            }
        }
        self.check_references(&input).await?;

        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        if let Some(container_no) = input.container_no() {
            ensure_container_free(&txn, container_no).await?;
        }

        let request_type = input.request_type();
        let status = input.initial_status();
        let now = Utc::now();
        let request = service_request::ActiveModel {
            id: Set(Uuid::new_v4()),
            request_type: Set(request_type),
            status: Set(status),
            container_no: Set(input.container_no().map(str::to_string)),
            booking_no: Set(input.booking_no()),
            customer_id: Set(customer_id),
            shipping_line_id: Set(shipping_line_id),
            container_type_id: Set(container_type_id),
            appointment_at: Set(None),
            time_in: Set(None),
            time_out: Set(None),
            gate_checked_at: Set(None),
            completed_at: Set(None),
            driver_name: Set(None),
            truck_plate: Set(None),
            driver_phone: Set(None),
            rejection_reason: Set(None),
            is_paid: Set(false),
            has_invoice: Set(false),
            is_check: Set(false),
            is_repair: Set(false),
            is_repair_rejected: Set(false),
            depot_deleted_at: Set(None),
            customer_deleted_at: Set(None),
            created_by: Set(actor.id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| ServiceError::conflict_on_unique(e, || container_taken(input.container_no())))?;

        workflow::record_transition(&txn, request.id, None, status, &actor.id, None).await?;

        outbox.enqueue(Event::RequestCreated {
            request_id: request.id,
            request_type,
            status,
        });
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "request.create",
            "service_request",
            request.id,
            serde_json::json!({ "type": request_type, "container_no": request.container_no }),
        ));
        ctx.finish(txn, "request.create", started, outbox).await?;

        metrics::counter!("depot.request.created", 1, "type" => request_type.to_string());
        info!(request_id = %request.id, %request_type, %status, "Service request created");
        Ok(request)
    }

    /// Assigns the container to a pending export request.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn pick_container(
        &self,
        request_id: Uuid,
        container_no: &str,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        validate_container_no(container_no).map_err(|_| {
            ServiceError::ValidationError(format!("malformed container number {}", container_no))
        })?;

        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = workflow::load_request_for_update(&txn, request_id, actor).await?;
        if request.request_type != RequestType::Export || request.status != RequestStatus::Pending
        {
            return Err(ServiceError::invalid_transition(
                "service_request",
                request.status,
                RequestStatus::PickContainer,
            ));
        }
        ensure_container_free(&txn, container_no).await?;

        let mut active: service_request::ActiveModel = request.into();
        active.container_no = Set(Some(container_no.to_string()));
        let request = active
            .update(&txn)
            .await
            .map_err(|e| ServiceError::conflict_on_unique(e, || container_taken(Some(container_no))))?;
        let request = self
            .machine
            .apply(
                &txn,
                request,
                RequestStatus::PickContainer,
                &actor.id,
                TransitionExtra::note(format!("picked {}", container_no)),
                &mut outbox,
            )
            .await?;

        ctx.finish(txn, "request.pick_container", started, outbox)
            .await?;
        Ok(request)
    }

    /// Withdraws a request. Exports give back any seals they consumed.
    #[instrument(skip(self, reason, actor), fields(request_id = %request_id))]
    pub async fn cancel_request(
        &self,
        request_id: Uuid,
        reason: &str,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(ServiceError::ValidationError(
                "cancellation needs a reason".to_string(),
            ));
        }
        let extra = TransitionExtra {
            reason: Some(reason.to_string()),
            ..Default::default()
        };
        self.machine
            .transition(request_id, RequestStatus::Rejected, actor, extra)
            .await
    }

    /// Hides a request on the actor's side only. A request still waiting at
    /// `PENDING`/`NEW_REQUEST` is withdrawn to `REJECTED` first.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn soft_delete(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = workflow::load_request_for_update(&txn, request_id, actor).await?;
        if !DELETABLE.contains(&request.status) {
            warn!(status = %request.status, "Refusing to delete a request in flight");
            return Err(ServiceError::invalid_transition(
                "service_request",
                request.status,
                "DELETED",
            ));
        }

        let side = match actor.scope {
            ActorScope::Depot => "depot",
            ActorScope::Customer(_) => "customer",
        };
        // A hidden request must not keep owning its container.
        let request = if RequestStatus::terminal_statuses().contains(&request.status) {
            request
        } else {
            let extra = TransitionExtra {
                reason: Some(format!("deleted by {}", side)),
                ..Default::default()
            };
            self.machine
                .apply(&txn, request, RequestStatus::Rejected, &actor.id, extra, &mut outbox)
                .await?
        };

        let now = Utc::now();
        let mut active: service_request::ActiveModel = request.into();
        match actor.scope {
            ActorScope::Depot => active.depot_deleted_at = Set(Some(now)),
            ActorScope::Customer(_) => active.customer_deleted_at = Set(Some(now)),
        }
        active.updated_at = Set(now);
        let request = active.update(&txn).await?;

        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "request.soft_delete",
            "service_request",
            request.id,
            serde_json::json!({ "side": side }),
        ));
        ctx.finish(txn, "request.soft_delete", started, outbox)
            .await?;
        Ok(request)
    }

    pub async fn get_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<service_request::Model, ServiceError> {
        workflow::load_request(self.machine.context().db(), request_id, actor).await
    }

    /// Transition log, oldest first.
    pub async fn history(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<request_transition::Model>, ServiceError> {
        let conn = self.machine.context().db();
        workflow::load_request(conn, request_id, actor).await?;
        workflow::history_in(conn, request_id).await
    }

    pub async fn documents(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<DocumentRef>, ServiceError> {
        workflow::load_request(self.machine.context().db(), request_id, actor).await?;
        Ok(self.documents.list(request_id).await?)
    }

    /// The request currently driving side effects for a container.
    pub async fn active_request(
        &self,
        container_no: &str,
        actor: &Actor,
    ) -> Result<Option<service_request::Model>, ServiceError> {
        let found =
            workflow::find_active_request_in(self.machine.context().db(), container_no).await?;
        Ok(found.filter(|r| actor.can_see(r)))
    }
}

fn container_taken(container_no: Option<&str>) -> String {
    format!(
        "container {} already has an active request",
        container_no.unwrap_or_default()
    )
}

/// Fast-path check; the partial unique index on `container_no` settles races.
async fn ensure_container_free<C: sea_orm::ConnectionTrait>(
    conn: &C,
    container_no: &str,
) -> Result<(), ServiceError> {
    if let Some(active) = workflow::find_active_request_in(conn, container_no).await? {
        return Err(ServiceError::Conflict(format!(
            "container {} already has active request {} ({})",
            container_no, active.id, active.status
        )));
    }
    Ok(())
}
