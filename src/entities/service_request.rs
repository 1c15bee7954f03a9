use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Direction of a container movement through the depot.
///
/// The two flows share one status enum but have different transition tables,
/// see [`crate::services::workflow`].
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    #[sea_orm(string_value = "IMPORT")]
    Import,
    #[sea_orm(string_value = "EXPORT")]
    Export,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    #[sea_orm(string_value = "NEW_REQUEST")]
    NewRequest,
    #[sea_orm(string_value = "PENDING")]
    Pending,
    #[sea_orm(string_value = "PICK_CONTAINER")]
    PickContainer,
    #[sea_orm(string_value = "SCHEDULED")]
    Scheduled,
    #[sea_orm(string_value = "FORWARDED")]
    Forwarded,
    #[sea_orm(string_value = "GATE_IN")]
    GateIn,
    #[sea_orm(string_value = "CHECKED")]
    Checked,
    #[sea_orm(string_value = "POSITIONED")]
    Positioned,
    #[sea_orm(string_value = "FORKLIFTING")]
    Forklifting,
    #[sea_orm(string_value = "DONE_LIFTING")]
    DoneLifting,
    #[sea_orm(string_value = "IN_CAR")]
    InCar,
    #[sea_orm(string_value = "IN_YARD")]
    InYard,
    #[sea_orm(string_value = "GATE_OUT")]
    GateOut,
    #[sea_orm(string_value = "COMPLETED")]
    Completed,
    #[sea_orm(string_value = "REJECTED")]
    Rejected,
}

impl RequestStatus {
    /// No transition leaves these states.
    pub fn is_final(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Rejected)
    }

    /// A request in one of these states no longer owns its container for
    /// side-effect purposes. `GATE_OUT` counts: the container has left the depot.
    pub fn is_terminal(self) -> bool {
        self.is_final() || self == RequestStatus::GateOut
    }

    pub fn terminal_statuses() -> [RequestStatus; 3] {
        [
            RequestStatus::GateOut,
            RequestStatus::Completed,
            RequestStatus::Rejected,
        ]
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_requests")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub request_type: RequestType,
    pub status: RequestStatus,
    /// Unset for an export request until a container is picked.
    pub container_no: Option<String>,
    pub booking_no: Option<String>,
    pub customer_id: Uuid,
    pub shipping_line_id: Uuid,
    pub container_type_id: Uuid,
    pub appointment_at: Option<DateTime<Utc>>,
    pub time_in: Option<DateTime<Utc>>,
    pub time_out: Option<DateTime<Utc>>,
    pub gate_checked_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub driver_name: Option<String>,
    pub truck_plate: Option<String>,
    pub driver_phone: Option<String>,
    pub rejection_reason: Option<String>,
    pub is_paid: bool,
    pub has_invoice: bool,
    pub is_check: bool,
    pub is_repair: bool,
    pub is_repair_rejected: bool,
    pub depot_deleted_at: Option<DateTime<Utc>>,
    pub customer_deleted_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::request_transition::Entity")]
    Transitions,
    #[sea_orm(has_many = "super::repair_ticket::Entity")]
    RepairTickets,
    #[sea_orm(has_many = "super::forklift_task::Entity")]
    ForkliftTasks,
}

impl Related<super::request_transition::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Transitions.def()
    }
}

impl Related<super::repair_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::RepairTickets.def()
    }
}

impl Related<super::forklift_task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ForkliftTasks.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn is_deleted(&self) -> bool {
        self.depot_deleted_at.is_some() || self.customer_deleted_at.is_some()
    }

    pub fn container(&self) -> &str {
        self.container_no.as_deref().unwrap_or("")
    }
}
