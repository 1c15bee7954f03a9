use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    config::GateSlotConfig,
    db,
    entities::{
        forklift_task::{self, TaskStatus},
        service_request,
        yard_placement::{self, PlacementStatus},
        yard_slot,
    },
    errors::ServiceError,
    events::{AuditRecord, Event, Outbox},
    services::{
        requests::validate_container_no,
        workflow::{self, RequestStateMachine, TransitionExtra, Trigger, TriggerSource},
        Actor,
    },
};

const DEFAULT_CANCEL_REASON: &str = "N/A";

/// Manual task creation by yard staff.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AssignTaskInput {
    #[validate(custom = "validate_container_no")]
    pub container_no: String,
    pub request_id: Option<Uuid>,
    pub from_slot_id: Option<Uuid>,
    pub to_slot_id: Option<Uuid>,
    #[validate(length(min = 1, max = 128))]
    pub driver: Option<String>,
}

/// Coordinates container movement jobs. At most one open task per container.
#[derive(Clone)]
pub struct ForkliftTaskCoordinator {
    machine: RequestStateMachine,
}

impl ForkliftTaskCoordinator {
    pub fn new(machine: RequestStateMachine) -> Self {
        Self { machine }
    }

    /// Makes sure the export request's container has a lift task to the gate.
    ///
    /// Returns the task created, or `None` when one was already open or the
    /// container is not in the yard.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn ensure_export_task(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<Option<forklift_task::Model>, ServiceError> {
        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = workflow::load_request_for_update(&txn, request_id, actor).await?;
        let task =
            ensure_export_task_in(&txn, &request, &ctx.settings.gate_slot, &actor.id, &mut outbox)
                .await?;

        ctx.finish(txn, "forklift.ensure_export_task", started, outbox)
            .await?;
        Ok(task)
    }

    /// Creates a task by hand. Unlike the gate trigger this reports an existing
    /// open task as `Conflict`.
    #[instrument(skip(self, input, actor), fields(container_no = %input.container_no))]
    pub async fn assign_task(
        &self,
        input: AssignTaskInput,
        actor: &Actor,
    ) -> Result<forklift_task::Model, ServiceError> {
        input.validate()?;

        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = match input.request_id {
            Some(id) => Some(workflow::load_request_for_update(&txn, id, actor).await?),
            None => None,
        };
        if let Some(request) = &request {
            if request.container_no.as_deref() != Some(input.container_no.as_str()) {
                return Err(ServiceError::ValidationError(format!(
                    "request {} is not for container {}",
                    request.id, input.container_no
                )));
            }
        }

        // Same lock order as the gate trigger: placement first, then open tasks.
        let placement = current_placement(&txn, &input.container_no).await?;
        if let Some(open) = find_open_task(&txn, &input.container_no).await? {
            return Err(open_task_conflict(&input.container_no, &open));
        }

        let from_slot_id = input.from_slot_id.or(placement.map(|p| p.slot_id));
        let status = if input.driver.is_some() {
            TaskStatus::Assigned
        } else {
            TaskStatus::Pending
        };

        let now = Utc::now();
        let task = forklift_task::ActiveModel {
            id: Set(Uuid::new_v4()),
            container_no: Set(input.container_no.clone()),
            request_id: Set(input.request_id),
            from_slot_id: Set(from_slot_id),
            to_slot_id: Set(input.to_slot_id),
            status: Set(status),
            assigned_driver: Set(input.driver.clone()),
            cancel_reason: Set(None),
            created_by: Set(actor.id.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            ServiceError::conflict_on_unique(e, || {
                format!("container {} already has an open task", input.container_no)
            })
        })?;

        if let Some(request) = request {
            let status = request.status;
            for trigger in triggers_for(&request, TriggerSource::ForkliftAssigned) {
                if let Trigger::MoveRequest(to) = trigger {
                    self.machine
                        .apply(
                            &txn,
                            request.clone(),
                            to,
                            &actor.id,
                            TransitionExtra::note(format!("forklift task {} assigned", task.id)),
                            &mut outbox,
                        )
                        .await?;
                }
            }
            debug!(request_status = %status, "Manual assignment linked to request");
        }

        outbox.enqueue(Event::ForkliftTaskCreated {
            task_id: task.id,
            container_no: task.container_no.clone(),
            request_id: task.request_id,
        });
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "forklift.assign",
            "forklift_task",
            task.id,
            serde_json::json!({ "container_no": task.container_no, "status": task.status }),
        ));
        ctx.finish(txn, "forklift.assign_task", started, outbox)
            .await?;

        info!(task_id = %task.id, "Forklift task assigned");
        Ok(task)
    }

    /// Moves a task along its status machine and feeds the linked request.
    #[instrument(skip(self, reason, actor), fields(task_id = %task_id, to = %new_status))]
    pub async fn update_status(
        &self,
        task_id: Uuid,
        new_status: TaskStatus,
        reason: Option<String>,
        actor: &Actor,
    ) -> Result<forklift_task::Model, ServiceError> {
        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let task = forklift_task::Entity::find_by_id(task_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Forklift task {} not found", task_id)))?;

        let from = task.status;
        if !from.can_transition_to(new_status) {
            return Err(ServiceError::invalid_transition(
                "forklift_task",
                from,
                new_status,
            ));
        }

        let mut active: forklift_task::ActiveModel = task.into();
        active.status = Set(new_status);
        active.updated_at = Set(Utc::now());
        if new_status == TaskStatus::Cancelled {
            let reason = reason
                .filter(|r| !r.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
            active.cancel_reason = Set(Some(reason));
        }
        let task = active.update(&txn).await?;

        if let Some(request_id) = task.request_id {
            let request = service_request::Entity::find_by_id(request_id)
                .lock_exclusive()
                .one(&txn)
                .await?;
            match request {
                Some(request) => {
                    self.apply_task_triggers(&txn, &task, request, from, &actor.id, &mut outbox)
                        .await?
                }
                None => warn!(%request_id, "Task references a missing request"),
            }
        }

        outbox.enqueue(Event::ForkliftTaskStatusChanged {
            task_id: task.id,
            from,
            to: new_status,
        });
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "forklift.update_status",
            "forklift_task",
            task.id,
            serde_json::json!({ "from": from, "to": new_status, "reason": task.cancel_reason }),
        ));
        ctx.finish(txn, "forklift.update_status", started, outbox)
            .await?;

        metrics::counter!("depot.forklift.status_changes", 1, "to" => new_status.to_string());
        Ok(task)
    }

    async fn apply_task_triggers<C: ConnectionTrait>(
        &self,
        conn: &C,
        task: &forklift_task::Model,
        request: service_request::Model,
        from: TaskStatus,
        actor: &str,
        outbox: &mut Outbox,
    ) -> Result<(), ServiceError> {
        let source = TriggerSource::ForkliftTask {
            from,
            to: task.status,
        };
        let mut request = request;
        for trigger in triggers_for(&request, source) {
            match trigger {
                Trigger::MoveRequest(to) => {
                    request = self
                        .machine
                        .apply(
                            conn,
                            request,
                            to,
                            actor,
                            TransitionExtra::note(format!("forklift task {} {}", task.id, task.status)),
                            outbox,
                        )
                        .await?;
                }
                Trigger::RemovePlacement => {
                    remove_placement_in(conn, &task.container_no).await?;
                }
                Trigger::PlaceAtDestination => {
                    let slot_id = task.to_slot_id.ok_or_else(|| {
                        ServiceError::ValidationError(format!(
                            "forklift task {} has no destination slot",
                            task.id
                        ))
                    })?;
                    place_in(conn, &task.container_no, slot_id).await?;
                }
                other => debug!(?other, "Trigger not handled by forklift coordinator"),
            }
        }
        Ok(())
    }

    /// Deletes a cancelled task. Anything else must be cancelled first.
    #[instrument(skip(self, actor), fields(task_id = %task_id))]
    pub async fn delete_task(&self, task_id: Uuid, actor: &Actor) -> Result<(), ServiceError> {
        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let task = forklift_task::Entity::find_by_id(task_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Forklift task {} not found", task_id)))?;

        if task.status != TaskStatus::Cancelled {
            return Err(ServiceError::invalid_transition(
                "forklift_task",
                task.status,
                "DELETED",
            ));
        }
        task.delete(&txn).await?;

        outbox.enqueue(Event::ForkliftTaskDeleted(task_id));
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "forklift.delete",
            "forklift_task",
            task_id,
            serde_json::Value::Null,
        ));
        ctx.finish(txn, "forklift.delete_task", started, outbox)
            .await
    }

    pub async fn get_task(&self, task_id: Uuid) -> Result<forklift_task::Model, ServiceError> {
        forklift_task::Entity::find_by_id(task_id)
            .one(self.machine.context().db())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Forklift task {} not found", task_id)))
    }

    pub async fn list_open_tasks(
        &self,
        container_no: &str,
    ) -> Result<Vec<forklift_task::Model>, ServiceError> {
        Ok(forklift_task::Entity::find()
            .filter(forklift_task::Column::ContainerNo.eq(container_no))
            .filter(forklift_task::Column::Status.is_in(TaskStatus::open_statuses()))
            .order_by_asc(forklift_task::Column::CreatedAt)
            .all(self.machine.context().db())
            .await?)
    }
}

fn triggers_for(request: &service_request::Model, source: TriggerSource) -> Vec<Trigger> {
    workflow::triggers(request.request_type, request.status, source)
}

/// Creates the gate-bound lift task for an export request, once.
pub(crate) async fn ensure_export_task_in<C: ConnectionTrait>(
    conn: &C,
    request: &service_request::Model,
    gate: &GateSlotConfig,
    actor: &str,
    outbox: &mut Outbox,
) -> Result<Option<forklift_task::Model>, ServiceError> {
    let container_no = request.container_no.as_deref().ok_or_else(|| {
        ServiceError::ValidationError(format!("request {} has no container", request.id))
    })?;

    // The placement row lock serialises concurrent callers for one container.
    let placement = current_placement(conn, container_no).await?;

    if let Some(open) = find_open_task(conn, container_no).await? {
        debug!(%container_no, task_id = %open.id, "Open task exists, nothing to do");
        return Ok(None);
    }

    let Some(placement) = placement else {
        warn!(%container_no, "Container not placed in the yard, no lift task created");
        return Ok(None);
    };

    let gate_slot = resolve_gate_slot(conn, gate).await?;
    let now = Utc::now();
    let task = forklift_task::ActiveModel {
        id: Set(Uuid::new_v4()),
        container_no: Set(container_no.to_string()),
        request_id: Set(Some(request.id)),
        from_slot_id: Set(Some(placement.slot_id)),
        to_slot_id: Set(Some(gate_slot.id)),
        status: Set(TaskStatus::Pending),
        assigned_driver: Set(None),
        cancel_reason: Set(None),
        created_by: Set(actor.to_string()),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(|e| {
        ServiceError::conflict_on_unique(e, || {
            format!("container {} already has an open task", container_no)
        })
    })?;

    outbox.enqueue(Event::ForkliftTaskCreated {
        task_id: task.id,
        container_no: task.container_no.clone(),
        request_id: task.request_id,
    });
    metrics::counter!("depot.forklift.tasks_created", 1);
    info!(task_id = %task.id, %container_no, "Export lift task created");
    Ok(Some(task))
}

fn open_task_conflict(container_no: &str, open: &forklift_task::Model) -> ServiceError {
    ServiceError::Conflict(format!(
        "container {} already has open task {} ({})",
        container_no, open.id, open.status
    ))
}

async fn find_open_task<C: ConnectionTrait>(
    conn: &C,
    container_no: &str,
) -> Result<Option<forklift_task::Model>, ServiceError> {
    Ok(forklift_task::Entity::find()
        .filter(forklift_task::Column::ContainerNo.eq(container_no))
        .filter(forklift_task::Column::Status.is_in(TaskStatus::open_statuses()))
        .lock_exclusive()
        .one(conn)
        .await?)
}

/// The slot a container physically sits in (`HOLD` or `OCCUPIED`).
async fn current_placement<C: ConnectionTrait>(
    conn: &C,
    container_no: &str,
) -> Result<Option<yard_placement::Model>, ServiceError> {
    Ok(yard_placement::Entity::find()
        .filter(yard_placement::Column::ContainerNo.eq(container_no))
        .filter(yard_placement::Column::Status.is_in(PlacementStatus::physically_present()))
        .order_by_desc(yard_placement::Column::PlacedAt)
        .lock_exclusive()
        .one(conn)
        .await?)
}

/// Finds the reserved gate slot, creating it on first use.
async fn resolve_gate_slot<C: ConnectionTrait>(
    conn: &C,
    gate: &GateSlotConfig,
) -> Result<yard_slot::Model, ServiceError> {
    let existing = yard_slot::Entity::find()
        .filter(yard_slot::Column::Yard.eq(gate.yard.as_str()))
        .filter(yard_slot::Column::Block.eq(gate.block.as_str()))
        .filter(yard_slot::Column::Slot.eq(gate.slot.as_str()))
        .one(conn)
        .await?;
    if let Some(slot) = existing {
        return Ok(slot);
    }

    info!(yard = %gate.yard, block = %gate.block, slot = %gate.slot, "Creating gate slot");
    Ok(yard_slot::ActiveModel {
        id: Set(Uuid::new_v4()),
        yard: Set(gate.yard.clone()),
        block: Set(gate.block.clone()),
        slot: Set(gate.slot.clone()),
        is_reserved: Set(true),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?)
}

async fn remove_placement_in<C: ConnectionTrait>(
    conn: &C,
    container_no: &str,
) -> Result<(), ServiceError> {
    match current_placement(conn, container_no).await? {
        Some(placement) => {
            let now = Utc::now();
            let mut active: yard_placement::ActiveModel = placement.into();
            active.status = Set(PlacementStatus::Removed);
            active.removed_at = Set(Some(now));
            active.updated_at = Set(now);
            active.update(conn).await?;
        }
        None => warn!(%container_no, "No placement to remove"),
    }
    Ok(())
}

async fn place_in<C: ConnectionTrait>(
    conn: &C,
    container_no: &str,
    slot_id: Uuid,
) -> Result<yard_placement::Model, ServiceError> {
    let now = Utc::now();
    Ok(yard_placement::ActiveModel {
        id: Set(Uuid::new_v4()),
        container_no: Set(container_no.to_string()),
        slot_id: Set(slot_id),
        status: Set(PlacementStatus::Occupied),
        placed_at: Set(now),
        removed_at: Set(None),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}
