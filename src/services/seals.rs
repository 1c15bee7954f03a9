//! Seal stock: FIFO consumption per shipping company with a usage ledger.
//!
//! For every lot `quantity_purchased = quantity_exported + quantity_remaining`
//! and `quantity_exported` equals the number of ledger rows pointing at it.
use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db,
    entities::{
        seal::{self, SealStatus},
        seal_usage_history,
        service_request::{self, RequestStatus, RequestType},
    },
    errors::ServiceError,
    events::{AuditRecord, Event, Outbox},
    services::{
        invoicing::{self, LineInput, SEAL_LINE},
        requests::validate_container_no,
        workflow::{self, Trigger, TriggerSource},
        Actor, ServiceContext,
    },
};

fn validate_price(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ReceiveLotInput {
    #[validate(length(min = 1, max = 64))]
    pub shipping_company: String,
    #[validate(length(max = 16))]
    pub serial_prefix: String,
    #[validate(range(min = 0))]
    pub serial_start: i64,
    #[validate(range(min = 1, max = 1_000_000))]
    pub quantity_purchased: i32,
    #[validate(custom = "validate_price")]
    pub unit_price: Decimal,
    pub purchase_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct AllocateSealInput {
    #[validate(length(min = 1, max = 64))]
    pub shipping_company: String,
    #[validate(custom = "validate_container_no")]
    pub container_no: String,
    pub booking_no: Option<String>,
    /// Resolved from the container's active export request when absent.
    pub request_id: Option<Uuid>,
}

/// Seals are only charged to a live export request for the same container.
fn check_seal_target(
    request: &service_request::Model,
    container_no: &str,
) -> Result<(), ServiceError> {
    if request.request_type != RequestType::Export {
        return Err(ServiceError::ValidationError(format!(
            "request {} is not an export",
            request.id
        )));
    }
    if RequestStatus::terminal_statuses().contains(&request.status) {
        return Err(ServiceError::invalid_transition(
            "service_request",
            request.status,
            "SEAL_ALLOCATED",
        ));
    }
    if request.container_no.as_deref() != Some(container_no) {
        return Err(ServiceError::ValidationError(format!(
            "request {} is not for container {}",
            request.id, container_no
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
pub struct SealAllocation {
    pub seal: seal::Model,
    pub usage: seal_usage_history::Model,
}

#[derive(Clone)]
pub struct SealAllocator {
    ctx: ServiceContext,
}

impl SealAllocator {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    /// Registers a purchased lot of seals.
    #[instrument(skip(self, input, actor), fields(shipping_company = %input.shipping_company))]
    pub async fn receive_lot(
        &self,
        input: ReceiveLotInput,
        actor: &Actor,
    ) -> Result<seal::Model, ServiceError> {
        input.validate()?;

        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let now = Utc::now();
        let lot = seal::ActiveModel {
            id: Set(Uuid::new_v4()),
            shipping_company: Set(input.shipping_company),
            serial_prefix: Set(input.serial_prefix),
            serial_start: Set(input.serial_start),
            quantity_purchased: Set(input.quantity_purchased),
            quantity_exported: Set(0),
            quantity_remaining: Set(input.quantity_purchased),
            unit_price: Set(input.unit_price),
            purchase_date: Set(input.purchase_date),
            status: Set(SealStatus::Active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await?;

        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "seal.receive_lot",
            "seal",
            lot.id,
            serde_json::json!({ "quantity": lot.quantity_purchased }),
        ));
        self.ctx
            .finish(txn, "seal.receive_lot", started, outbox)
            .await?;

        info!(seal_id = %lot.id, quantity = lot.quantity_purchased, "Seal lot received");
        Ok(lot)
    }

    /// Takes one seal from the oldest lot with stock left.
    #[instrument(skip(self, input, actor), fields(shipping_company = %input.shipping_company, container_no = %input.container_no))]
    pub async fn allocate(
        &self,
        input: AllocateSealInput,
        actor: &Actor,
    ) -> Result<SealAllocation, ServiceError> {
        input.validate()?;

        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let request = match input.request_id {
            Some(id) => {
                let request = workflow::load_request_for_update(&txn, id, actor).await?;
                check_seal_target(&request, &input.container_no)?;
                Some(request)
            }
            None => workflow::find_active_request_in(&txn, &input.container_no)
                .await?
                .filter(|r| r.request_type == RequestType::Export),
        };
        let booking_no = input
            .booking_no
            .clone()
            .or_else(|| request.as_ref().and_then(|r| r.booking_no.clone()));

        let lot = seal::Entity::find()
            .filter(seal::Column::ShippingCompany.eq(input.shipping_company.as_str()))
            .filter(seal::Column::Status.eq(SealStatus::Active))
            .filter(seal::Column::QuantityRemaining.gt(0))
            .order_by_asc(seal::Column::PurchaseDate)
            .order_by_asc(seal::Column::CreatedAt)
            // Every candidate is locked: a lot drained while we waited drops
            // out of the result without hiding the next one.
            .lock_exclusive()
            .all(&txn)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                metrics::counter!("depot.seal.out_of_stock", 1);
                ServiceError::OutOfStock(format!(
                    "no seals left for shipping company {}",
                    input.shipping_company
                ))
            })?;

        let serial = lowest_free_serial(&txn, &lot).await?;
        let seal_number = lot.seal_number(serial);

        let exported = lot.quantity_exported + 1;
        let remaining = lot.quantity_purchased - exported;
        let mut active: seal::ActiveModel = lot.into();
        active.quantity_exported = Set(exported);
        active.quantity_remaining = Set(remaining);
        active.updated_at = Set(Utc::now());
        let lot = active.update(&txn).await?;

        let usage = seal_usage_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            seal_id: Set(lot.id),
            seal_number: Set(seal_number.clone()),
            serial: Set(serial),
            container_no: Set(input.container_no.clone()),
            booking_no: Set(booking_no),
            request_id: Set(request.as_ref().map(|r| r.id)),
            requested_by: Set(actor.id.clone()),
            created_at: Set(Utc::now()),
        }
        .insert(&txn)
        .await?;

        if let Some(request) = &request {
            let owed = workflow::triggers(
                request.request_type,
                request.status,
                TriggerSource::SealAllocated,
            );
            if owed.contains(&Trigger::AppendSealLine) {
                invoicing::append_request_line_in(
                    &txn,
                    request,
                    &self.ctx.settings,
                    LineInput {
                        line_code: SEAL_LINE.to_string(),
                        description: format!("Seal {} for {}", seal_number, input.container_no),
                        reference: Some(seal_number.clone()),
                        quantity: Decimal::ONE,
                        unit_price: lot.unit_price,
                        tax_rate: None,
                    },
                    &mut outbox,
                )
                .await?;
            }
        }

        outbox.enqueue(Event::SealAllocated {
            seal_id: lot.id,
            seal_number: seal_number.clone(),
            container_no: input.container_no.clone(),
        });
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "seal.allocate",
            "seal",
            lot.id,
            serde_json::json!({
                "seal_number": seal_number,
                "container_no": input.container_no,
                "remaining": lot.quantity_remaining,
            }),
        ));
        self.ctx
            .finish(txn, "seal.allocate", started, outbox)
            .await?;

        metrics::counter!("depot.seal.allocations", 1);
        Ok(SealAllocation { seal: lot, usage })
    }

    /// Undoes one allocation: drops the ledger row and restores the counters.
    #[instrument(skip(self, actor))]
    pub async fn release(
        &self,
        seal_number: &str,
        container_no: &str,
        actor: &Actor,
    ) -> Result<seal::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let usage = seal_usage_history::Entity::find()
            .filter(seal_usage_history::Column::SealNumber.eq(seal_number))
            .filter(seal_usage_history::Column::ContainerNo.eq(container_no))
            .order_by_desc(seal_usage_history::Column::CreatedAt)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Seal {} was not issued to container {}",
                    seal_number, container_no
                ))
            })?;
        let lot = release_usage_in(&txn, usage, &actor.id, &mut outbox).await?;

        self.ctx.finish(txn, "seal.release", started, outbox).await?;
        Ok(lot)
    }

    /// Releases every seal issued against a request.
    #[instrument(skip(self, actor), fields(request_id = %request_id))]
    pub async fn release_for_request(
        &self,
        request_id: Uuid,
        actor: &Actor,
    ) -> Result<usize, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        workflow::load_request_for_update(&txn, request_id, actor).await?;
        let released = release_for_request_in(&txn, request_id, &actor.id, &mut outbox).await?;

        self.ctx
            .finish(txn, "seal.release_for_request", started, outbox)
            .await?;
        Ok(released)
    }

    pub async fn usage_for_container(
        &self,
        container_no: &str,
    ) -> Result<Vec<seal_usage_history::Model>, ServiceError> {
        Ok(seal_usage_history::Entity::find()
            .filter(seal_usage_history::Column::ContainerNo.eq(container_no))
            .order_by_asc(seal_usage_history::Column::CreatedAt)
            .all(self.ctx.db())
            .await?)
    }

    pub async fn get_lot(&self, seal_id: Uuid) -> Result<seal::Model, ServiceError> {
        seal::Entity::find_by_id(seal_id)
            .one(self.ctx.db())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Seal lot {} not found", seal_id)))
    }

    /// Lots of a shipping company in consumption order.
    pub async fn lots_for_company(
        &self,
        shipping_company: &str,
    ) -> Result<Vec<seal::Model>, ServiceError> {
        Ok(seal::Entity::find()
            .filter(seal::Column::ShippingCompany.eq(shipping_company))
            .order_by_asc(seal::Column::PurchaseDate)
            .order_by_asc(seal::Column::CreatedAt)
            .all(self.ctx.db())
            .await?)
    }
}

async fn lowest_free_serial<C: ConnectionTrait>(
    conn: &C,
    lot: &seal::Model,
) -> Result<i64, ServiceError> {
    let used: HashSet<i64> = seal_usage_history::Entity::find()
        .filter(seal_usage_history::Column::SealId.eq(lot.id))
        .all(conn)
        .await?
        .into_iter()
        .map(|u| u.serial)
        .collect();
    lot.serial_range()
        .find(|serial| !used.contains(serial))
        .ok_or_else(|| {
            ServiceError::InternalError(format!(
                "seal lot {} has stock left but no free serial",
                lot.id
            ))
        })
}

async fn release_usage_in<C: ConnectionTrait>(
    conn: &C,
    usage: seal_usage_history::Model,
    actor: &str,
    outbox: &mut Outbox,
) -> Result<seal::Model, ServiceError> {
    let lot = seal::Entity::find_by_id(usage.seal_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Seal lot {} not found", usage.seal_id)))?;

    if lot.quantity_exported < 1 || lot.quantity_remaining >= lot.quantity_purchased {
        return Err(ServiceError::InternalError(format!(
            "seal lot {} counters out of step with its ledger",
            lot.id
        )));
    }

    let seal_number = usage.seal_number.clone();
    let container_no = usage.container_no.clone();
    let request_id = usage.request_id;
    usage.delete(conn).await?;

    let exported = lot.quantity_exported - 1;
    let remaining = lot.quantity_purchased - exported;
    let mut active: seal::ActiveModel = lot.into();
    active.quantity_exported = Set(exported);
    active.quantity_remaining = Set(remaining);
    active.updated_at = Set(Utc::now());
    let lot = active.update(conn).await?;

    if let Some(request_id) = request_id {
        invoicing::remove_reference_line_in(conn, request_id, SEAL_LINE, &seal_number, outbox)
            .await?;
    }

    outbox.enqueue(Event::SealReleased {
        seal_id: lot.id,
        seal_number: seal_number.clone(),
        container_no: container_no.clone(),
    });
    outbox.audit(AuditRecord::new(
        actor,
        "seal.release",
        "seal",
        lot.id,
        serde_json::json!({ "seal_number": seal_number, "container_no": container_no }),
    ));
    metrics::counter!("depot.seal.releases", 1);
    info!(%seal_number, %container_no, remaining, "Seal released");
    Ok(lot)
}

/// Compensates every seal consumed by a request, returning how many were released.
pub(crate) async fn release_for_request_in<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    actor: &str,
    outbox: &mut Outbox,
) -> Result<usize, ServiceError> {
    let issued = seal_usage_history::Entity::find()
        .filter(seal_usage_history::Column::RequestId.eq(request_id))
        .lock_exclusive()
        .all(conn)
        .await?;
    if issued.is_empty() {
        return Ok(0);
    }

    let count = issued.len();
    for usage in issued {
        release_usage_in(conn, usage, actor, outbox).await?;
    }
    warn!(%request_id, count, "Released seals of withdrawn request");
    Ok(count)
}
