//! Service-request state machine.
//!
//! Every status change goes through [`RequestStateMachine::apply`], which checks the
//! allow-list for the request type, stamps timestamps, appends a history row and
//! runs the side effects named by [`triggers`], all on the caller's transaction.
use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    db,
    entities::{
        forklift_task::TaskStatus,
        request_transition,
        service_request::{self, RequestStatus, RequestType},
    },
    errors::ServiceError,
    events::{AuditRecord, Event, Outbox},
    services::{forklift, repair, seals, Actor, ServiceContext},
};

/// Statuses reachable from `from` for a request of the given type.
pub fn allowed_targets(request_type: RequestType, from: RequestStatus) -> &'static [RequestStatus] {
    use RequestStatus::*;
    match request_type {
        RequestType::Import => match from {
            NewRequest => &[GateIn, Rejected],
            Pending => &[Scheduled, Rejected],
            Scheduled => &[Forwarded, Rejected],
            Forwarded => &[GateIn, Rejected],
            GateIn => &[Checked, Rejected],
            Checked => &[Positioned, Forklifting, Rejected],
            Positioned => &[Forklifting],
            // GATE_OUT directly from FORKLIFTING is an import-only carve-out for
            // lifts that finished without the IN_YARD step being recorded.
            Forklifting => &[InYard, GateOut],
            InYard => &[GateOut],
            GateOut => &[Completed],
            _ => &[],
        },
        RequestType::Export => match from {
            Pending => &[PickContainer, Rejected],
            PickContainer => &[Scheduled, Rejected],
            Scheduled => &[Forwarded, Rejected],
            Forwarded => &[GateIn, Rejected],
            GateIn => &[Forklifting],
            Forklifting => &[DoneLifting],
            DoneLifting => &[InCar],
            InCar => &[GateOut],
            GateOut => &[Completed],
            _ => &[],
        },
    }
}

pub fn is_allowed(request_type: RequestType, from: RequestStatus, to: RequestStatus) -> bool {
    allowed_targets(request_type, from).contains(&to)
}

/// What happened, as seen by the trigger table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    Request {
        from: RequestStatus,
        to: RequestStatus,
    },
    ForkliftTask {
        from: TaskStatus,
        to: TaskStatus,
    },
    /// A task was created by hand for the request's container.
    ForkliftAssigned,
    RepairDecision {
        accept: bool,
        can_repair: bool,
    },
    SealAllocated,
}

/// A side effect owed by a [`TriggerSource`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    EnsureExportTask,
    EnsureImportTicket,
    ReleaseSeals,
    MoveRequest(RequestStatus),
    RemovePlacement,
    PlaceAtDestination,
    MarkChecked { can_repair: bool },
    MarkRepairRejected,
    AppendRepairLine,
    AppendSealLine,
}

/// The complete side-effect surface of the core.
///
/// `request_status` is the linked request's current status; request-level
/// sources ignore it since the allow-list has already been applied.
pub fn triggers(
    request_type: RequestType,
    request_status: RequestStatus,
    source: TriggerSource,
) -> Vec<Trigger> {
    use RequestStatus as R;
    use RequestType::{Export, Import};
    use TaskStatus as T;

    match (request_type, source) {
        (
            Export,
            TriggerSource::Request {
                from: R::Forwarded,
                to: R::GateIn,
            },
        ) => vec![Trigger::EnsureExportTask],
        (
            Import,
            TriggerSource::Request {
                from: R::Forwarded | R::NewRequest,
                to: R::GateIn,
            },
        ) => vec![Trigger::EnsureImportTicket],
        (Export, TriggerSource::Request { to: R::Rejected, .. }) => vec![Trigger::ReleaseSeals],

        (
            Export,
            TriggerSource::ForkliftTask {
                from: T::Pending | T::Assigned,
                to: T::InProgress,
            },
        ) if request_status == R::GateIn => vec![Trigger::MoveRequest(R::Forklifting)],
        (
            Import,
            TriggerSource::ForkliftTask {
                from: T::Pending | T::Assigned,
                to: T::InProgress,
            },
        ) if matches!(request_status, R::Checked | R::Positioned) => {
            vec![Trigger::MoveRequest(R::Forklifting)]
        }
        (
            Export,
            TriggerSource::ForkliftTask {
                to: T::Completed, ..
            },
        ) if request_status == R::Forklifting => vec![
            Trigger::MoveRequest(R::DoneLifting),
            Trigger::RemovePlacement,
        ],
        (
            Import,
            TriggerSource::ForkliftTask {
                to: T::Completed, ..
            },
        ) if request_status == R::Forklifting => vec![
            Trigger::MoveRequest(R::InYard),
            Trigger::PlaceAtDestination,
        ],
        (Import, TriggerSource::ForkliftAssigned) if request_status == R::Checked => {
            vec![Trigger::MoveRequest(R::Positioned)]
        }

        (
            Import,
            TriggerSource::RepairDecision {
                accept: true,
                can_repair,
            },
        ) => {
            let mut owed = vec![
                Trigger::MoveRequest(R::Checked),
                Trigger::MarkChecked { can_repair },
            ];
            if can_repair {
                owed.push(Trigger::AppendRepairLine);
            }
            owed
        }
        (Import, TriggerSource::RepairDecision { accept: false, .. }) => vec![
            Trigger::MoveRequest(R::Rejected),
            Trigger::MarkRepairRejected,
        ],

        (Export, TriggerSource::SealAllocated) => vec![Trigger::AppendSealLine],

        _ => Vec::new(),
    }
}

/// Driver and truck captured at the gate.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct DriverInfo {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[validate(length(min = 1, max = 32))]
    pub truck_plate: String,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

/// Optional data a transition may carry.
#[derive(Debug, Clone, Default)]
pub struct TransitionExtra {
    pub note: Option<String>,
    pub appointment_at: Option<DateTime<Utc>>,
    pub driver: Option<DriverInfo>,
    pub reason: Option<String>,
}

impl TransitionExtra {
    pub fn note(note: impl Into<String>) -> Self {
        Self {
            note: Some(note.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone)]
pub struct RequestStateMachine {
    ctx: ServiceContext,
}

impl RequestStateMachine {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.ctx
    }

    /// Moves a request to `to` in its own transaction.
    pub async fn transition(
        &self,
        request_id: Uuid,
        to: RequestStatus,
        actor: &Actor,
        extra: TransitionExtra,
    ) -> Result<service_request::Model, ServiceError> {
        self.transition_if(request_id, to, actor, extra, |_, _| true)
            .await
    }

    /// Like [`transition`](Self::transition), but first checks the persisted
    /// type and status against an operation-specific `guard`.
    #[instrument(skip(self, actor, extra, guard), fields(request_id = %request_id, to = %to, actor = %actor.id))]
    pub async fn transition_if<G>(
        &self,
        request_id: Uuid,
        to: RequestStatus,
        actor: &Actor,
        extra: TransitionExtra,
        guard: G,
    ) -> Result<service_request::Model, ServiceError>
    where
        G: Fn(RequestType, RequestStatus) -> bool + Send,
    {
        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = load_request_for_update(&txn, request_id, actor).await?;
        if !guard(request.request_type, request.status) {
            metrics::counter!("depot.request.transitions_rejected", 1, "reason" => "guard");
            warn!(from = %request.status, "Operation not permitted from current status");
            return Err(ServiceError::invalid_transition(
                "service_request",
                request.status,
                to,
            ));
        }

        let updated = self
            .apply(&txn, request, to, &actor.id, extra, &mut outbox)
            .await?;
        self.ctx
            .finish(txn, "request.transition", started, outbox)
            .await?;
        Ok(updated)
    }

    /// Applies one guarded transition to an already-loaded request on `conn`.
    ///
    /// Callers must have re-read `request` on the same transaction.
    pub async fn apply<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: service_request::Model,
        to: RequestStatus,
        actor: &str,
        extra: TransitionExtra,
        outbox: &mut Outbox,
    ) -> Result<service_request::Model, ServiceError> {
        let from = request.status;
        let request_type = request.request_type;

        if !is_allowed(request_type, from, to) {
            metrics::counter!("depot.request.transitions_rejected", 1, "reason" => "allow_list");
            warn!(request_id = %request.id, %from, %to, "Transition not in allow-list");
            return Err(ServiceError::invalid_transition("service_request", from, to));
        }
        if to == RequestStatus::Scheduled && extra.appointment_at.is_none() {
            return Err(ServiceError::ValidationError(
                "scheduling requires an appointment time".to_string(),
            ));
        }
        if let Some(driver) = &extra.driver {
            driver.validate()?;
        }

        let now = Utc::now();
        let mut active: service_request::ActiveModel = request.into();
        active.status = Set(to);
        active.updated_at = Set(now);
        match to {
            RequestStatus::Scheduled => active.appointment_at = Set(extra.appointment_at),
            RequestStatus::GateIn => {
                active.time_in = Set(Some(now));
                active.gate_checked_at = Set(Some(now));
            }
            RequestStatus::GateOut => active.time_out = Set(Some(now)),
            RequestStatus::Completed => active.completed_at = Set(Some(now)),
            RequestStatus::Rejected => {
                active.rejection_reason = Set(extra.reason.clone().or_else(|| extra.note.clone()))
            }
            _ => {}
        }
        if let Some(driver) = extra.driver {
            active.driver_name = Set(Some(driver.name));
            active.truck_plate = Set(Some(driver.truck_plate));
            active.driver_phone = Set(driver.phone);
        }
        let updated = active.update(conn).await?;

        let note = extra.note.or(extra.reason);
        record_transition(conn, updated.id, Some(from), to, actor, note.clone()).await?;

        for trigger in triggers(request_type, to, TriggerSource::Request { from, to }) {
            match trigger {
                Trigger::EnsureExportTask => {
                    forklift::ensure_export_task_in(
                        conn,
                        &updated,
                        &self.ctx.settings.gate_slot,
                        actor,
                        outbox,
                    )
                    .await?;
                }
                Trigger::EnsureImportTicket => {
                    repair::ensure_import_ticket_in(conn, &updated, actor, outbox).await?;
                }
                Trigger::ReleaseSeals => {
                    seals::release_for_request_in(conn, updated.id, actor, outbox).await?;
                }
                other => debug!(?other, "Trigger belongs to another coordinator"),
            }
        }

        outbox.enqueue(Event::RequestTransitioned {
            request_id: updated.id,
            request_type,
            from,
            to,
            actor: actor.to_string(),
        });
        outbox.audit(AuditRecord::new(
            actor,
            "request.transition",
            "service_request",
            updated.id,
            serde_json::json!({ "from": from, "to": to, "note": note }),
        ));
        metrics::counter!(
            "depot.request.transitions",
            1,
            "type" => request_type.to_string(),
            "to" => to.to_string()
        );
        info!(request_id = %updated.id, %from, %to, %actor, "Request transitioned");

        Ok(updated)
    }
}

/// Re-reads a request under a row lock, enforcing the actor's visibility.
pub(crate) async fn load_request_for_update<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    actor: &Actor,
) -> Result<service_request::Model, ServiceError> {
    service_request::Entity::find_by_id(request_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .filter(|r| actor.can_see(r))
        .ok_or_else(|| ServiceError::NotFound(format!("Service request {} not found", request_id)))
}

pub(crate) async fn load_request<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    actor: &Actor,
) -> Result<service_request::Model, ServiceError> {
    service_request::Entity::find_by_id(request_id)
        .one(conn)
        .await?
        .filter(|r| actor.can_see(r))
        .ok_or_else(|| ServiceError::NotFound(format!("Service request {} not found", request_id)))
}

/// The non-terminal, non-deleted request currently owning `container_no`, if any.
pub(crate) async fn find_active_request_in<C: ConnectionTrait>(
    conn: &C,
    container_no: &str,
) -> Result<Option<service_request::Model>, ServiceError> {
    Ok(service_request::Entity::find()
        .filter(service_request::Column::ContainerNo.eq(container_no))
        .filter(service_request::Column::Status.is_not_in(RequestStatus::terminal_statuses()))
        .filter(service_request::Column::DepotDeletedAt.is_null())
        .filter(service_request::Column::CustomerDeletedAt.is_null())
        .order_by_desc(service_request::Column::CreatedAt)
        .one(conn)
        .await?)
}

/// Appends one row to a request's history.
pub(crate) async fn record_transition<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    from: Option<RequestStatus>,
    to: RequestStatus,
    actor: &str,
    note: Option<String>,
) -> Result<request_transition::Model, ServiceError> {
    let existing = request_transition::Entity::find()
        .filter(request_transition::Column::RequestId.eq(request_id))
        .count(conn)
        .await?;
    let seq = i32::try_from(existing + 1)
        .map_err(|_| ServiceError::InternalError("transition history overflow".to_string()))?;

    let row = request_transition::ActiveModel {
        id: Set(Uuid::new_v4()),
        request_id: Set(request_id),
        seq: Set(seq),
        from_status: Set(from),
        to_status: Set(to),
        actor: Set(actor.to_string()),
        note: Set(note),
        created_at: Set(Utc::now()),
    };
    Ok(row.insert(conn).await?)
}

pub(crate) async fn history_in<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
) -> Result<Vec<request_transition::Model>, ServiceError> {
    Ok(request_transition::Entity::find()
        .filter(request_transition::Column::RequestId.eq(request_id))
        .order_by_asc(request_transition::Column::Seq)
        .all(conn)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use sea_orm::Iterable;
    use RequestStatus::*;

    #[rstest]
    #[case(RequestType::Import, Pending, Scheduled)]
    #[case(RequestType::Import, Scheduled, Forwarded)]
    #[case(RequestType::Import, Forwarded, GateIn)]
    #[case(RequestType::Import, NewRequest, GateIn)]
    #[case(RequestType::Import, GateIn, Checked)]
    #[case(RequestType::Import, Checked, Positioned)]
    #[case(RequestType::Import, Positioned, Forklifting)]
    #[case(RequestType::Import, Forklifting, InYard)]
    #[case(RequestType::Import, Forklifting, GateOut)]
    #[case(RequestType::Import, InYard, GateOut)]
    #[case(RequestType::Import, GateOut, Completed)]
    #[case(RequestType::Export, Pending, PickContainer)]
    #[case(RequestType::Export, PickContainer, Scheduled)]
    #[case(RequestType::Export, Forwarded, GateIn)]
    #[case(RequestType::Export, GateIn, Forklifting)]
    #[case(RequestType::Export, Forklifting, DoneLifting)]
    #[case(RequestType::Export, DoneLifting, InCar)]
    #[case(RequestType::Export, InCar, GateOut)]
    #[case(RequestType::Export, GateOut, Completed)]
    fn allowed(#[case] ty: RequestType, #[case] from: RequestStatus, #[case] to: RequestStatus) {
        assert!(is_allowed(ty, from, to), "{ty} {from} -> {to} should be allowed");
    }

    #[rstest]
    #[case(RequestType::Import, Pending, GateIn)]
    #[case(RequestType::Import, Pending, PickContainer)]
    #[case(RequestType::Import, InYard, Completed)]
    #[case(RequestType::Import, Positioned, Rejected)]
    #[case(RequestType::Export, Pending, Scheduled)]
    #[case(RequestType::Export, GateIn, Rejected)]
    #[case(RequestType::Export, Forklifting, GateOut)]
    #[case(RequestType::Export, NewRequest, GateIn)]
    #[case(RequestType::Export, GateIn, Checked)]
    fn refused(#[case] ty: RequestType, #[case] from: RequestStatus, #[case] to: RequestStatus) {
        assert!(!is_allowed(ty, from, to), "{ty} {from} -> {to} should be refused");
    }

    #[test]
    fn final_states_have_no_exits() {
        for ty in [RequestType::Import, RequestType::Export] {
            for status in RequestStatus::iter().filter(|s| s.is_final()) {
                assert!(allowed_targets(ty, status).is_empty());
            }
        }
    }

    #[test]
    fn gate_out_only_closes_out() {
        for ty in [RequestType::Import, RequestType::Export] {
            assert_eq!(allowed_targets(ty, GateOut), &[Completed]);
        }
    }

    #[test]
    fn no_self_transitions() {
        for ty in [RequestType::Import, RequestType::Export] {
            for status in RequestStatus::iter() {
                assert!(!is_allowed(ty, status, status));
            }
        }
    }

    #[rstest]
    #[case(RequestType::Export, Forwarded, GateIn, vec![Trigger::EnsureExportTask])]
    #[case(RequestType::Import, Forwarded, GateIn, vec![Trigger::EnsureImportTicket])]
    #[case(RequestType::Import, NewRequest, GateIn, vec![Trigger::EnsureImportTicket])]
    #[case(RequestType::Export, Scheduled, Rejected, vec![Trigger::ReleaseSeals])]
    #[case(RequestType::Import, Forwarded, Rejected, vec![])]
    #[case(RequestType::Import, GateIn, Checked, vec![])]
    fn request_triggers(
        #[case] ty: RequestType,
        #[case] from: RequestStatus,
        #[case] to: RequestStatus,
        #[case] expected: Vec<Trigger>,
    ) {
        assert_eq!(triggers(ty, to, TriggerSource::Request { from, to }), expected);
    }

    #[test]
    fn task_start_moves_request_only_from_expected_status() {
        let start = TriggerSource::ForkliftTask {
            from: TaskStatus::Pending,
            to: TaskStatus::InProgress,
        };
        assert_eq!(
            triggers(RequestType::Export, GateIn, start),
            vec![Trigger::MoveRequest(Forklifting)]
        );
        assert_eq!(
            triggers(RequestType::Import, Positioned, start),
            vec![Trigger::MoveRequest(Forklifting)]
        );
        assert!(triggers(RequestType::Export, Forwarded, start).is_empty());
        assert!(triggers(RequestType::Import, GateIn, start).is_empty());
    }

    #[test]
    fn task_completion_depends_on_flow() {
        let done = TriggerSource::ForkliftTask {
            from: TaskStatus::InProgress,
            to: TaskStatus::Completed,
        };
        assert_eq!(
            triggers(RequestType::Export, Forklifting, done),
            vec![Trigger::MoveRequest(DoneLifting), Trigger::RemovePlacement]
        );
        assert_eq!(
            triggers(RequestType::Import, Forklifting, done),
            vec![Trigger::MoveRequest(InYard), Trigger::PlaceAtDestination]
        );
        assert!(triggers(RequestType::Export, GateIn, done).is_empty());
    }

    #[test]
    fn repair_decisions() {
        let accept_repair = TriggerSource::RepairDecision {
            accept: true,
            can_repair: true,
        };
        assert_eq!(
            triggers(RequestType::Import, GateIn, accept_repair),
            vec![
                Trigger::MoveRequest(Checked),
                Trigger::MarkChecked { can_repair: true },
                Trigger::AppendRepairLine,
            ]
        );
        let reject = TriggerSource::RepairDecision {
            accept: false,
            can_repair: false,
        };
        assert_eq!(
            triggers(RequestType::Import, GateIn, reject),
            vec![Trigger::MoveRequest(Rejected), Trigger::MarkRepairRejected]
        );
    }

    #[test]
    fn seal_line_only_for_exports() {
        assert_eq!(
            triggers(RequestType::Export, GateIn, TriggerSource::SealAllocated),
            vec![Trigger::AppendSealLine]
        );
        assert!(triggers(RequestType::Import, GateIn, TriggerSource::SealAllocated).is_empty());
    }
}
