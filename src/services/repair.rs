use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db,
    entities::{
        repair_cost_item::{self, CostKind},
        repair_ticket::{self, TicketStatus},
        service_request::{self, RequestType},
    },
    errors::ServiceError,
    events::{AuditRecord, Event, Outbox},
    services::{
        invoicing::{self, checked_amount, LineInput, REPAIR_LINE},
        workflow::{self, RequestStateMachine, TransitionExtra, Trigger, TriggerSource},
        Actor,
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairDecision {
    Accept,
    Reject,
}

fn validate_amount(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

fn validate_quantity(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CostItemInput {
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    #[serde(default = "default_kind")]
    pub kind: CostKind,
    /// Defaults to one.
    #[validate(custom = "validate_quantity")]
    pub quantity: Option<Decimal>,
    #[validate(custom = "validate_amount")]
    pub unit_price: Decimal,
}

fn default_kind() -> CostKind {
    CostKind::Part
}

impl CostItemInput {
    pub fn line_total(&self) -> Result<Decimal, ServiceError> {
        let quantity = self.quantity.unwrap_or(Decimal::ONE);
        let total = checked_amount(quantity.checked_mul(self.unit_price))?;
        Ok(total.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct DecideTicketInput {
    pub decision: RepairDecision,
    #[serde(default)]
    pub can_repair: bool,
    #[serde(default)]
    #[validate]
    pub cost_items: Vec<CostItemInput>,
}

impl DecideTicketInput {
    fn check(&self) -> Result<(), ServiceError> {
        self.validate()?;
        let repairing = self.decision == RepairDecision::Accept && self.can_repair;
        if repairing && self.cost_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "a repairable container needs at least one cost item".to_string(),
            ));
        }
        if !repairing && !self.cost_items.is_empty() {
            return Err(ServiceError::ValidationError(
                "cost items are only recorded for repairable containers".to_string(),
            ));
        }
        Ok(())
    }

    fn ticket_status(&self) -> TicketStatus {
        match (self.decision, self.can_repair) {
            (RepairDecision::Accept, false) => TicketStatus::Complete,
            (RepairDecision::Accept, true) => TicketStatus::CompleteNeedRepair,
            (RepairDecision::Reject, _) => TicketStatus::Reject,
        }
    }
}

/// Inspection tickets for import containers, one per request.
#[derive(Clone)]
pub struct RepairTicketCoordinator {
    machine: RequestStateMachine,
}

impl RepairTicketCoordinator {
    pub fn new(machine: RequestStateMachine) -> Self {
        Self { machine }
    }

    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn ensure_import_ticket(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<repair_ticket::Model, ServiceError> {
        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = workflow::load_request_for_update(&txn, request_id, actor).await?;
        if request.request_type != RequestType::Import {
            return Err(ServiceError::ValidationError(format!(
                "request {} is not an import",
                request.id
            )));
        }
        let ticket = ensure_import_ticket_in(&txn, &request, &actor.id, &mut outbox).await?;

        ctx.finish(txn, "repair.ensure_import_ticket", started, outbox)
            .await?;
        Ok(ticket)
    }

    /// Records the inspection outcome and moves the linked request.
    #[instrument(skip(self, input, actor), fields(ticket_id = %ticket_id, decision = %input.decision))]
    pub async fn decide(
        &self,
        ticket_id: Uuid,
        input: DecideTicketInput,
        actor: &Actor,
    ) -> Result<repair_ticket::Model, ServiceError> {
        input.check()?;

        let ctx = self.machine.context();
        let started = Instant::now();
        let txn = db::begin(ctx.db()).await?;
        let mut outbox = Outbox::new();

        let ticket = repair_ticket::Entity::find_by_id(ticket_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Repair ticket {} not found", ticket_id)))?;
        let status = input.ticket_status();
        if ticket.status != TicketStatus::Pending {
            return Err(ServiceError::invalid_transition(
                "repair_ticket",
                ticket.status,
                status,
            ));
        }
        let mut request = workflow::load_request_for_update(&txn, ticket.request_id, actor).await?;

        let now = Utc::now();
        let mut estimated_cost = Decimal::ZERO;
        let mut labor_cost = Decimal::ZERO;
        for item in &input.cost_items {
            let line_total = item.line_total()?;
            estimated_cost = checked_amount(estimated_cost.checked_add(line_total))?;
            if item.kind == CostKind::Labor {
                labor_cost = checked_amount(labor_cost.checked_add(line_total))?;
            }
            repair_cost_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                ticket_id: Set(ticket.id),
                description: Set(item.description.clone()),
                kind: Set(item.kind),
                quantity: Set(item.quantity.unwrap_or(Decimal::ONE)),
                unit_price: Set(item.unit_price),
                line_total: Set(line_total),
                created_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }

        let mut active: repair_ticket::ActiveModel = ticket.into();
        active.status = Set(status);
        active.can_repair = Set(Some(input.can_repair && input.decision == RepairDecision::Accept));
        active.estimated_cost = Set(estimated_cost);
        active.labor_cost = Set(labor_cost);
        active.decided_by = Set(Some(actor.id.clone()));
        active.decided_at = Set(Some(now));
        active.updated_at = Set(now);
        let ticket = active.update(&txn).await?;

        let source = TriggerSource::RepairDecision {
            accept: input.decision == RepairDecision::Accept,
            can_repair: input.can_repair,
        };
        for trigger in workflow::triggers(request.request_type, request.status, source) {
            match trigger {
                Trigger::MoveRequest(to) => {
                    request = self
                        .machine
                        .apply(
                            &txn,
                            request,
                            to,
                            &actor.id,
                            TransitionExtra::note(format!("repair ticket {} {}", ticket.id, status)),
                            &mut outbox,
                        )
                        .await?;
                }
                Trigger::MarkChecked { can_repair } => {
                    let mut flags: service_request::ActiveModel = request.into();
                    flags.is_check = Set(true);
                    flags.is_repair = Set(can_repair);
                    flags.updated_at = Set(Utc::now());
                    request = flags.update(&txn).await?;
                }
                Trigger::MarkRepairRejected => {
                    let mut flags: service_request::ActiveModel = request.into();
                    flags.is_repair_rejected = Set(true);
                    flags.updated_at = Set(Utc::now());
                    request = flags.update(&txn).await?;
                }
                Trigger::AppendRepairLine => {
                    invoicing::append_request_line_in(
                        &txn,
                        &request,
                        &ctx.settings,
                        LineInput {
                            line_code: REPAIR_LINE.to_string(),
                            description: format!("Repair of container {}", ticket.container_no),
                            reference: Some(ticket.id.to_string()),
                            quantity: Decimal::ONE,
                            unit_price: estimated_cost,
                            tax_rate: None,
                        },
                        &mut outbox,
                    )
                    .await?;
                }
                other => debug!(?other, "Trigger not handled by repair coordinator"),
            }
        }

        outbox.enqueue(Event::RepairTicketDecided {
            ticket_id: ticket.id,
            status,
        });
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "repair.decide",
            "repair_ticket",
            ticket.id,
            serde_json::json!({
                "decision": input.decision,
                "can_repair": input.can_repair,
                "estimated_cost": estimated_cost,
            }),
        ));
        ctx.finish(txn, "repair.decide", started, outbox).await?;

        metrics::counter!("depot.repair.decisions", 1, "status" => status.to_string());
        info!(ticket_id = %ticket.id, %status, "Repair ticket decided");
        Ok(ticket)
    }

    pub async fn get_ticket(&self, ticket_id: Uuid) -> Result<repair_ticket::Model, ServiceError> {
        repair_ticket::Entity::find_by_id(ticket_id)
            .one(self.machine.context().db())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Repair ticket {} not found", ticket_id)))
    }

    pub async fn tickets_for_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<Vec<repair_ticket::Model>, ServiceError> {
        let conn = self.machine.context().db();
        workflow::load_request(conn, request_id, actor).await?;
        Ok(repair_ticket::Entity::find()
            .filter(repair_ticket::Column::RequestId.eq(request_id))
            .order_by_asc(repair_ticket::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    pub async fn cost_items(
        &self,
        ticket_id: Uuid,
    ) -> Result<Vec<repair_cost_item::Model>, ServiceError> {
        Ok(repair_cost_item::Entity::find()
            .filter(repair_cost_item::Column::TicketId.eq(ticket_id))
            .order_by_asc(repair_cost_item::Column::CreatedAt)
            .all(self.machine.context().db())
            .await?)
    }
}

/// Returns the request's inspection ticket, creating it if the request has none.
///
/// Tickets are keyed by request, so a later visit of the same container gets
/// a fresh ticket.
pub(crate) async fn ensure_import_ticket_in<C: ConnectionTrait>(
    conn: &C,
    request: &service_request::Model,
    actor: &str,
    outbox: &mut Outbox,
) -> Result<repair_ticket::Model, ServiceError> {
    let container_no = request.container_no.as_deref().ok_or_else(|| {
        ServiceError::ValidationError(format!("request {} has no container", request.id))
    })?;

    let existing = repair_ticket::Entity::find()
        .filter(repair_ticket::Column::RequestId.eq(request.id))
        .lock_exclusive()
        .one(conn)
        .await?;
    if let Some(ticket) = existing {
        debug!(ticket_id = %ticket.id, "Ticket already exists for request");
        return Ok(ticket);
    }

    let now = Utc::now();
    let ticket = repair_ticket::ActiveModel {
        id: Set(Uuid::new_v4()),
        container_no: Set(container_no.to_string()),
        request_id: Set(request.id),
        description: Set(format!("Gate-in inspection of {}", container_no)),
        status: Set(TicketStatus::Pending),
        can_repair: Set(None),
        estimated_cost: Set(Decimal::ZERO),
        labor_cost: Set(Decimal::ZERO),
        created_by: Set(actor.to_string()),
        decided_by: Set(None),
        decided_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?;

    outbox.enqueue(Event::RepairTicketCreated {
        ticket_id: ticket.id,
        request_id: request.id,
        container_no: ticket.container_no.clone(),
    });
    metrics::counter!("depot.repair.tickets_created", 1);
    info!(ticket_id = %ticket.id, %container_no, "Inspection ticket opened");
    Ok(ticket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn item(kind: CostKind, quantity: Option<Decimal>, unit_price: Decimal) -> CostItemInput {
        CostItemInput {
            description: "Panel".into(),
            kind,
            quantity,
            unit_price,
        }
    }

    #[test]
    fn ticket_status_follows_decision() {
        let mut input = DecideTicketInput {
            decision: RepairDecision::Accept,
            can_repair: false,
            cost_items: vec![],
        };
        assert_eq!(input.ticket_status(), TicketStatus::Complete);
        input.can_repair = true;
        assert_eq!(input.ticket_status(), TicketStatus::CompleteNeedRepair);
        input.decision = RepairDecision::Reject;
        assert_eq!(input.ticket_status(), TicketStatus::Reject);
    }

    #[test]
    fn repairable_needs_costs() {
        let input = DecideTicketInput {
            decision: RepairDecision::Accept,
            can_repair: true,
            cost_items: vec![],
        };
        assert_matches!(input.check(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn rejection_takes_no_costs() {
        let input = DecideTicketInput {
            decision: RepairDecision::Reject,
            can_repair: false,
            cost_items: vec![item(CostKind::Part, None, dec!(10))],
        };
        assert_matches!(input.check(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn line_total_defaults_quantity_to_one() {
        assert_eq!(item(CostKind::Part, None, dec!(500000)).line_total().unwrap(), dec!(500000));
        assert_eq!(
            item(CostKind::Labor, Some(dec!(2.5)), dec!(40.005)).line_total().unwrap(),
            dec!(100.01)
        );
    }

    #[test]
    fn oversized_cost_is_refused() {
        let oversized = item(CostKind::Part, Some(dec!(10000000000000000)), dec!(10000000000000000));
        assert_matches!(oversized.line_total(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn negative_price_is_invalid() {
        assert!(item(CostKind::Part, None, dec!(-1)).validate().is_err());
        assert!(item(CostKind::Part, Some(Decimal::ZERO), dec!(1)).validate().is_err());
    }

    #[test]
    fn decision_parses_from_wire_names() {
        let input: DecideTicketInput =
            serde_json::from_str(r#"{"decision":"ACCEPT","can_repair":true,"cost_items":[{"description":"Door","unit_price":"500000"}]}"#)
                .unwrap();
        assert_eq!(input.decision, RepairDecision::Accept);
        assert_eq!(input.cost_items[0].kind, CostKind::Part);
        assert!(input.check().is_ok());
    }
}
