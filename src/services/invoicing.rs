//! Invoice totals and line maintenance.
//!
//! Stored totals are a cache: every line mutation recomputes them from the
//! line items in the same transaction.
use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    db,
    entities::{
        invoice::{self, InvoiceStatus},
        invoice_line_item, service_request,
    },
    errors::ServiceError,
    events::{AuditRecord, Event, Outbox},
    services::{workflow, Actor, DepotSettings, ServiceContext},
};

/// `source_module` of the invoice that collects a request's surcharges.
pub const REQUEST_SOURCE: &str = "SERVICE_REQUEST";
pub const SEAL_LINE: &str = "SEAL";
pub const REPAIR_LINE: &str = "REPAIR";

const QTY_DP: u32 = 3;
const PRICE_DP: u32 = 4;
const AMOUNT_DP: u32 = 2;

fn round(value: Decimal, dp: u32) -> Decimal {
    value.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero)
}

/// The numeric part of a line the calculator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxableLine {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: Option<Decimal>,
}

impl From<&invoice_line_item::Model> for TaxableLine {
    fn from(line: &invoice_line_item::Model) -> Self {
        Self {
            quantity: line.quantity,
            unit_price: line.unit_price,
            tax_rate: line.tax_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTotals {
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub line_amount: Decimal,
    pub line_tax: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InvoiceTotals {
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub total_amount: Decimal,
}

/// Largest magnitude an amount column holds.
fn max_amount() -> Decimal {
    Decimal::new(1_000_000_000_000, 0)
}

/// Turns an unchecked arithmetic result into an amount that fits storage.
pub(crate) fn checked_amount(value: Option<Decimal>) -> Result<Decimal, ServiceError> {
    match value {
        Some(v) if v.abs() < max_amount() => Ok(v),
        _ => Err(ServiceError::ValidationError(format!(
            "amount must stay below {}",
            max_amount()
        ))),
    }
}

/// Rounds one line: qty to 3dp, price to 4dp, amount and tax to 2dp, half away from zero.
pub fn line_totals(line: TaxableLine) -> Result<LineTotals, ServiceError> {
    let quantity = round(line.quantity, QTY_DP);
    let unit_price = round(line.unit_price, PRICE_DP);
    let line_amount = round(checked_amount(quantity.checked_mul(unit_price))?, AMOUNT_DP);
    let rate = line.tax_rate.unwrap_or(Decimal::ZERO);
    let line_tax = round(checked_amount(line_amount.checked_mul(rate))?, AMOUNT_DP);
    Ok(LineTotals {
        quantity,
        unit_price,
        line_amount,
        line_tax,
    })
}

/// Sums already-rounded line values. A missing tax rate means no tax.
pub fn calc_totals<I>(lines: I) -> Result<InvoiceTotals, ServiceError>
where
    I: IntoIterator<Item = TaxableLine>,
{
    let (subtotal, tax_amount) = lines.into_iter().try_fold(
        (Decimal::ZERO, Decimal::ZERO),
        |(sub, tax), line| {
            let l = line_totals(line)?;
            Ok::<_, ServiceError>((
                checked_amount(sub.checked_add(l.line_amount))?,
                checked_amount(tax.checked_add(l.line_tax))?,
            ))
        },
    )?;
    Ok(InvoiceTotals {
        subtotal,
        tax_amount,
        total_amount: checked_amount(subtotal.checked_add(tax_amount))?,
    })
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value > Decimal::ZERO {
        Ok(())
    } else {
        Err(ValidationError::new("must_be_positive"))
    }
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    Ok(())
}

fn validate_rate(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO || *value > Decimal::ONE {
        return Err(ValidationError::new("tax_rate_out_of_range"));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LineInput {
    #[validate(length(min = 1, max = 32))]
    pub line_code: String,
    #[validate(length(min = 1, max = 255))]
    pub description: String,
    pub reference: Option<String>,
    #[validate(custom = "validate_positive")]
    pub quantity: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub unit_price: Decimal,
    #[validate(custom = "validate_rate")]
    pub tax_rate: Option<Decimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateInvoiceInput {
    #[validate(length(min = 1, max = 64))]
    pub source_module: String,
    pub source_id: Uuid,
    pub request_id: Option<Uuid>,
    #[validate(length(equal = 3))]
    pub currency: Option<String>,
    #[validate]
    pub lines: Vec<LineInput>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceWithLines {
    pub invoice: invoice::Model,
    pub lines: Vec<invoice_line_item::Model>,
}

#[derive(Clone)]
pub struct InvoiceService {
    ctx: ServiceContext,
}

impl InvoiceService {
    pub fn new(ctx: ServiceContext) -> Self {
        Self { ctx }
    }

    #[instrument(skip(self, input, actor), fields(source_module = %input.source_module, source_id = %input.source_id))]
    pub async fn create_invoice(
        &self,
        input: CreateInvoiceInput,
        actor: &Actor,
    ) -> Result<InvoiceWithLines, ServiceError> {
        input.validate()?;

        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        if find_by_source(&txn, &input.source_module, input.source_id)
            .await?
            .is_some()
        {
            return Err(ServiceError::Conflict(format!(
                "invoice already exists for {} {}",
                input.source_module, input.source_id
            )));
        }
        if let Some(request_id) = input.request_id {
            workflow::load_request_for_update(&txn, request_id, actor).await?;
            mark_has_invoice(&txn, request_id).await?;
        }

        let currency = input
            .currency
            .clone()
            .unwrap_or_else(|| self.ctx.settings.currency.clone());
        let invoice = insert_invoice(
            &txn,
            &input.source_module,
            input.source_id,
            input.request_id,
            &currency,
        )
        .await?;
        for line in input.lines {
            insert_line(&txn, invoice.id, line).await?;
        }
        let invoice = recompute_in(&txn, invoice.id, &mut outbox).await?;
        let lines = lines_in(&txn, invoice.id).await?;

        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "invoice.create",
            "invoice",
            invoice.id,
            serde_json::json!({ "invoice_no": invoice.invoice_no, "lines": lines.len() }),
        ));
        self.ctx
            .finish(txn, "invoice.create", started, outbox)
            .await?;

        info!(invoice_id = %invoice.id, invoice_no = %invoice.invoice_no, "Invoice created");
        Ok(InvoiceWithLines { invoice, lines })
    }

    #[instrument(skip(self, line, actor), fields(invoice_id = %invoice_id))]
    pub async fn add_line(
        &self,
        invoice_id: Uuid,
        line: LineInput,
        actor: &Actor,
    ) -> Result<InvoiceWithLines, ServiceError> {
        line.validate()?;

        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let invoice = load_for_update(&txn, invoice_id).await?;
        ensure_draft(&invoice, "ADD_LINE")?;
        let created = insert_line(&txn, invoice.id, line).await?;
        let invoice = recompute_in(&txn, invoice.id, &mut outbox).await?;
        let lines = lines_in(&txn, invoice.id).await?;

        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "invoice.add_line",
            "invoice",
            invoice.id,
            serde_json::json!({ "line_id": created.id, "line_code": created.line_code }),
        ));
        self.ctx
            .finish(txn, "invoice.add_line", started, outbox)
            .await?;
        Ok(InvoiceWithLines { invoice, lines })
    }

    #[instrument(skip(self, line, actor), fields(line_id = %line_id))]
    pub async fn update_line(
        &self,
        line_id: Uuid,
        line: LineInput,
        actor: &Actor,
    ) -> Result<InvoiceWithLines, ServiceError> {
        line.validate()?;

        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let existing = load_line(&txn, line_id).await?;
        let invoice = load_for_update(&txn, existing.invoice_id).await?;
        ensure_draft(&invoice, "UPDATE_LINE")?;

        let totals = line_totals(TaxableLine {
            quantity: line.quantity,
            unit_price: line.unit_price,
            tax_rate: line.tax_rate,
        })?;
        let mut active: invoice_line_item::ActiveModel = existing.into();
        active.line_code = Set(line.line_code);
        active.description = Set(line.description);
        active.reference = Set(line.reference);
        active.quantity = Set(totals.quantity);
        active.unit_price = Set(totals.unit_price);
        active.tax_rate = Set(line.tax_rate);
        active.line_amount = Set(totals.line_amount);
        active.line_tax = Set(totals.line_tax);
        active.update(&txn).await?;

        let invoice = recompute_in(&txn, invoice.id, &mut outbox).await?;
        let lines = lines_in(&txn, invoice.id).await?;

        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "invoice.update_line",
            "invoice",
            invoice.id,
            serde_json::json!({ "line_id": line_id }),
        ));
        self.ctx
            .finish(txn, "invoice.update_line", started, outbox)
            .await?;
        Ok(InvoiceWithLines { invoice, lines })
    }

    #[instrument(skip(self, actor), fields(line_id = %line_id))]
    pub async fn remove_line(
        &self,
        line_id: Uuid,
        actor: &Actor,
    ) -> Result<InvoiceWithLines, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let existing = load_line(&txn, line_id).await?;
        let invoice = load_for_update(&txn, existing.invoice_id).await?;
        ensure_draft(&invoice, "REMOVE_LINE")?;
        existing.delete(&txn).await?;

        let invoice = recompute_in(&txn, invoice.id, &mut outbox).await?;
        let lines = lines_in(&txn, invoice.id).await?;

        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "invoice.remove_line",
            "invoice",
            invoice.id,
            serde_json::json!({ "line_id": line_id }),
        ));
        self.ctx
            .finish(txn, "invoice.remove_line", started, outbox)
            .await?;
        Ok(InvoiceWithLines { invoice, lines })
    }

    /// Refreshes the cached totals from the line items.
    #[instrument(skip(self), fields(invoice_id = %invoice_id))]
    pub async fn recompute_totals(&self, invoice_id: Uuid) -> Result<invoice::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        load_for_update(&txn, invoice_id).await?;
        let invoice = recompute_in(&txn, invoice_id, &mut outbox).await?;

        self.ctx
            .finish(txn, "invoice.recompute", started, outbox)
            .await?;
        Ok(invoice)
    }

    /// Settles a draft invoice and flags the linked request as paid.
    #[instrument(skip(self, actor), fields(invoice_id = %invoice_id))]
    pub async fn mark_paid(
        &self,
        invoice_id: Uuid,
        actor: &Actor,
    ) -> Result<invoice::Model, ServiceError> {
        let started = Instant::now();
        let txn = db::begin(self.ctx.db()).await?;
        let mut outbox = Outbox::new();

        let invoice = load_for_update(&txn, invoice_id).await?;
        if invoice.status != InvoiceStatus::Draft {
            return Err(ServiceError::invalid_transition(
                "invoice",
                invoice.status,
                InvoiceStatus::Paid,
            ));
        }
        let request_id = invoice.request_id;
        let invoice = recompute_in(&txn, invoice.id, &mut outbox).await?;

        let now = Utc::now();
        let mut active: invoice::ActiveModel = invoice.into();
        active.status = Set(InvoiceStatus::Paid);
        active.paid_at = Set(Some(now));
        active.updated_at = Set(now);
        let invoice = active.update(&txn).await?;

        if let Some(request_id) = request_id {
            service_request::Entity::update_many()
                .col_expr(service_request::Column::IsPaid, Expr::value(true))
                .col_expr(service_request::Column::UpdatedAt, Expr::value(now))
                .filter(service_request::Column::Id.eq(request_id))
                .exec(&txn)
                .await?;
        }

        outbox.enqueue(Event::InvoicePaid(invoice.id));
        outbox.audit(AuditRecord::new(
            actor.id.as_str(),
            "invoice.mark_paid",
            "invoice",
            invoice.id,
            serde_json::json!({ "total_amount": invoice.total_amount }),
        ));
        self.ctx
            .finish(txn, "invoice.mark_paid", started, outbox)
            .await?;

        metrics::counter!("depot.invoice.paid", 1);
        Ok(invoice)
    }

    pub async fn get_invoice(&self, invoice_id: Uuid) -> Result<InvoiceWithLines, ServiceError> {
        let conn = self.ctx.db();
        let invoice = invoice::Entity::find_by_id(invoice_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;
        let lines = lines_in(conn, invoice.id).await?;
        Ok(InvoiceWithLines { invoice, lines })
    }

    /// The surcharge invoice collected for a request, if one was opened.
    pub async fn invoice_for_request(
        &self,
        request_id: Uuid,
    ) -> Result<Option<InvoiceWithLines>, ServiceError> {
        let conn = self.ctx.db();
        let found = invoice::Entity::find()
            .filter(invoice::Column::SourceModule.eq(REQUEST_SOURCE))
            .filter(invoice::Column::SourceId.eq(request_id))
            .one(conn)
            .await?;
        let Some(invoice) = found else {
            return Ok(None);
        };
        let lines = lines_in(conn, invoice.id).await?;
        Ok(Some(InvoiceWithLines { invoice, lines }))
    }
}

fn ensure_draft(invoice: &invoice::Model, attempted: &str) -> Result<(), ServiceError> {
    if invoice.status == InvoiceStatus::Draft {
        Ok(())
    } else {
        Err(ServiceError::invalid_transition(
            "invoice",
            invoice.status,
            attempted.to_string(),
        ))
    }
}

fn next_invoice_no() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "INV-{}-{}",
        Utc::now().format("%Y%m%d"),
        suffix[..8].to_uppercase()
    )
}

async fn find_by_source<C: ConnectionTrait>(
    conn: &C,
    source_module: &str,
    source_id: Uuid,
) -> Result<Option<invoice::Model>, ServiceError> {
    Ok(invoice::Entity::find()
        .filter(invoice::Column::SourceModule.eq(source_module))
        .filter(invoice::Column::SourceId.eq(source_id))
        .lock_exclusive()
        .one(conn)
        .await?)
}

async fn load_for_update<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<invoice::Model, ServiceError> {
    invoice::Entity::find_by_id(invoice_id)
        .lock_exclusive()
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))
}

async fn load_line<C: ConnectionTrait>(
    conn: &C,
    line_id: Uuid,
) -> Result<invoice_line_item::Model, ServiceError> {
    invoice_line_item::Entity::find_by_id(line_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice line {} not found", line_id)))
}

async fn lines_in<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
) -> Result<Vec<invoice_line_item::Model>, ServiceError> {
    Ok(invoice_line_item::Entity::find()
        .filter(invoice_line_item::Column::InvoiceId.eq(invoice_id))
        .order_by_asc(invoice_line_item::Column::CreatedAt)
        .all(conn)
        .await?)
}

async fn mark_has_invoice<C: ConnectionTrait>(conn: &C, request_id: Uuid) -> Result<(), ServiceError> {
    service_request::Entity::update_many()
        .col_expr(service_request::Column::HasInvoice, Expr::value(true))
        .filter(service_request::Column::Id.eq(request_id))
        .exec(conn)
        .await?;
    Ok(())
}

async fn insert_invoice<C: ConnectionTrait>(
    conn: &C,
    source_module: &str,
    source_id: Uuid,
    request_id: Option<Uuid>,
    currency: &str,
) -> Result<invoice::Model, ServiceError> {
    let now = Utc::now();
    Ok(invoice::ActiveModel {
        id: Set(Uuid::new_v4()),
        invoice_no: Set(next_invoice_no()),
        source_module: Set(source_module.to_string()),
        source_id: Set(source_id),
        request_id: Set(request_id),
        currency: Set(currency.to_string()),
        status: Set(InvoiceStatus::Draft),
        subtotal: Set(Decimal::ZERO),
        tax_amount: Set(Decimal::ZERO),
        total_amount: Set(Decimal::ZERO),
        paid_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await?)
}

async fn insert_line<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
    line: LineInput,
) -> Result<invoice_line_item::Model, ServiceError> {
    let totals = line_totals(TaxableLine {
        quantity: line.quantity,
        unit_price: line.unit_price,
        tax_rate: line.tax_rate,
    })?;
    Ok(invoice_line_item::ActiveModel {
        id: Set(Uuid::new_v4()),
        invoice_id: Set(invoice_id),
        line_code: Set(line.line_code),
        description: Set(line.description),
        reference: Set(line.reference),
        quantity: Set(totals.quantity),
        unit_price: Set(totals.unit_price),
        tax_rate: Set(line.tax_rate),
        line_amount: Set(totals.line_amount),
        line_tax: Set(totals.line_tax),
        created_at: Set(Utc::now()),
    }
    .insert(conn)
    .await?)
}

/// Recalculates and stores an invoice's totals from its current lines.
pub(crate) async fn recompute_in<C: ConnectionTrait>(
    conn: &C,
    invoice_id: Uuid,
    outbox: &mut Outbox,
) -> Result<invoice::Model, ServiceError> {
    let invoice = invoice::Entity::find_by_id(invoice_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Invoice {} not found", invoice_id)))?;
    let lines = lines_in(conn, invoice_id).await?;
    let totals = calc_totals(lines.iter().map(TaxableLine::from))?;

    let mut active: invoice::ActiveModel = invoice.into();
    active.subtotal = Set(totals.subtotal);
    active.tax_amount = Set(totals.tax_amount);
    active.total_amount = Set(totals.total_amount);
    active.updated_at = Set(Utc::now());
    let invoice = active.update(conn).await?;

    outbox.enqueue(Event::InvoiceRecomputed {
        invoice_id,
        subtotal: totals.subtotal,
        tax_amount: totals.tax_amount,
        total_amount: totals.total_amount,
    });
    metrics::counter!("depot.invoice.recomputed", 1);
    Ok(invoice)
}

/// Opens the request's surcharge invoice on first use.
async fn ensure_request_invoice_in<C: ConnectionTrait>(
    conn: &C,
    request: &service_request::Model,
    settings: &DepotSettings,
) -> Result<invoice::Model, ServiceError> {
    if let Some(existing) = find_by_source(conn, REQUEST_SOURCE, request.id).await? {
        return Ok(existing);
    }
    mark_has_invoice(conn, request.id).await?;
    let invoice = insert_invoice(
        conn,
        REQUEST_SOURCE,
        request.id,
        Some(request.id),
        &settings.currency,
    )
    .await?;
    info!(request_id = %request.id, invoice_no = %invoice.invoice_no, "Request invoice opened");
    Ok(invoice)
}

/// Appends a surcharge line to the request's invoice and recomputes it.
///
/// Lines without a tax rate take the depot default.
pub(crate) async fn append_request_line_in<C: ConnectionTrait>(
    conn: &C,
    request: &service_request::Model,
    settings: &DepotSettings,
    mut line: LineInput,
    outbox: &mut Outbox,
) -> Result<invoice_line_item::Model, ServiceError> {
    line.validate()?;
    if line.tax_rate.is_none() {
        line.tax_rate = Some(settings.tax_rate);
    }

    let invoice = ensure_request_invoice_in(conn, request, settings).await?;
    ensure_draft(&invoice, "ADD_LINE")?;
    let created = insert_line(conn, invoice.id, line).await?;
    recompute_in(conn, invoice.id, outbox).await?;
    Ok(created)
}

/// Drops the request-invoice line matching `line_code` and `reference`.
///
/// Settled invoices keep their lines; the caller's compensation still goes ahead.
pub(crate) async fn remove_reference_line_in<C: ConnectionTrait>(
    conn: &C,
    request_id: Uuid,
    line_code: &str,
    reference: &str,
    outbox: &mut Outbox,
) -> Result<bool, ServiceError> {
    let Some(invoice) = find_by_source(conn, REQUEST_SOURCE, request_id).await? else {
        return Ok(false);
    };
    if invoice.status != InvoiceStatus::Draft {
        warn!(
            invoice_id = %invoice.id,
            status = %invoice.status,
            %line_code,
            %reference,
            "Invoice is settled, line kept"
        );
        return Ok(false);
    }

    let removed = invoice_line_item::Entity::delete_many()
        .filter(invoice_line_item::Column::InvoiceId.eq(invoice.id))
        .filter(invoice_line_item::Column::LineCode.eq(line_code))
        .filter(invoice_line_item::Column::Reference.eq(reference))
        .exec(conn)
        .await?;
    if removed.rows_affected == 0 {
        return Ok(false);
    }
    recompute_in(conn, invoice.id, outbox).await?;
    Ok(true)
}
