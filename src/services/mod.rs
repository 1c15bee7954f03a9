// Request lifecycle
pub mod gate;
pub mod requests;
pub mod workflow;

// Side-effect coordinators
pub mod forklift;
pub mod repair;
pub mod seals;

// Billing
pub mod invoicing;

// Service factory for dependency injection
pub mod factory;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use crate::{
    collaborators::AuditSink,
    config::{AppConfig, GateSlotConfig},
    db::{self, DbPool},
    entities::service_request,
    errors::ServiceError,
    events::{EventSender, Outbox},
};

/// Whose view of the data an operation runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorScope {
    Depot,
    Customer(Uuid),
}

/// The caller of an operation: a depot clerk, a driver dashboard, a customer portal user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    pub scope: ActorScope,
}

impl Actor {
    pub fn depot(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            scope: ActorScope::Depot,
        }
    }

    pub fn customer(id: impl Into<String>, customer_id: Uuid) -> Self {
        Self {
            id: id.into(),
            scope: ActorScope::Customer(customer_id),
        }
    }

    /// Used for work the depot performs on its own behalf (CLI, triggers).
    pub fn system() -> Self {
        Self::depot("system")
    }

    /// A request is visible when it belongs to the actor's scope and was not
    /// deleted on the actor's side.
    pub fn can_see(&self, request: &service_request::Model) -> bool {
        match self.scope {
            ActorScope::Depot => request.depot_deleted_at.is_none(),
            ActorScope::Customer(customer_id) => {
                request.customer_id == customer_id && request.customer_deleted_at.is_none()
            }
        }
    }
}

/// Depot-wide settings the coordinators need inside a transaction.
#[derive(Debug, Clone)]
pub struct DepotSettings {
    pub gate_slot: GateSlotConfig,
    pub tax_rate: Decimal,
    pub currency: String,
}

impl Default for DepotSettings {
    fn default() -> Self {
        Self::from(&AppConfig::new(String::new(), "development".to_string()))
    }
}

impl From<&AppConfig> for DepotSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            gate_slot: cfg.gate_slot.clone(),
            tax_rate: cfg.tax_rate(),
            currency: cfg.currency.clone(),
        }
    }
}

/// Shared handles every service is built from.
#[derive(Clone)]
pub struct ServiceContext {
    pub db: Arc<DbPool>,
    pub settings: Arc<DepotSettings>,
    pub events: EventSender,
    pub audit: Arc<dyn AuditSink>,
}

impl ServiceContext {
    pub fn new(
        db: Arc<DbPool>,
        settings: DepotSettings,
        events: EventSender,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            db,
            settings: Arc::new(settings),
            events,
            audit,
        }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    /// Commits the operation's transaction, then releases what it queued.
    pub async fn finish(
        &self,
        txn: sea_orm::DatabaseTransaction,
        operation: &'static str,
        started: Instant,
        outbox: Outbox,
    ) -> Result<(), ServiceError> {
        db::commit(txn, operation, started).await?;
        outbox.flush(&self.events, self.audit.as_ref()).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::service_request::{RequestStatus, RequestType};
    use chrono::Utc;

    fn request(customer_id: Uuid) -> service_request::Model {
        let now = Utc::now();
        service_request::Model {
            id: Uuid::new_v4(),
            request_type: RequestType::Import,
            status: RequestStatus::Pending,
            container_no: Some("MSCU1234567".into()),
            booking_no: None,
            customer_id,
            shipping_line_id: Uuid::new_v4(),
            container_type_id: Uuid::new_v4(),
            appointment_at: None,
            time_in: None,
            time_out: None,
            gate_checked_at: None,
            completed_at: None,
            driver_name: None,
            truck_plate: None,
            driver_phone: None,
            rejection_reason: None,
            is_paid: false,
            has_invoice: false,
            is_check: false,
            is_repair: false,
            is_repair_rejected: false,
            depot_deleted_at: None,
            customer_deleted_at: None,
            created_by: "clerk".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn customers_see_only_their_own_rows() {
        let owner = Uuid::new_v4();
        let row = request(owner);
        assert!(Actor::depot("clerk").can_see(&row));
        assert!(Actor::customer("portal", owner).can_see(&row));
        assert!(!Actor::customer("portal", Uuid::new_v4()).can_see(&row));
    }

    #[test]
    fn deletion_hides_one_side() {
        let owner = Uuid::new_v4();
        let mut row = request(owner);
        row.customer_deleted_at = Some(Utc::now());
        assert!(Actor::depot("clerk").can_see(&row));
        assert!(!Actor::customer("portal", owner).can_see(&row));

        row.customer_deleted_at = None;
        row.depot_deleted_at = Some(Utc::now());
        assert!(!Actor::system().can_see(&row));
        assert!(Actor::customer("portal", owner).can_see(&row));
    }

    #[test]
    fn settings_follow_config() {
        let settings = DepotSettings::default();
        assert_eq!(settings.currency, "VND");
        assert_eq!(settings.gate_slot, GateSlotConfig::default());
    }
}
