use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    #[sea_orm(string_value = "PENDING")]
    Pending,
    /// Container inspected and sound.
    #[sea_orm(string_value = "COMPLETE")]
    Complete,
    #[sea_orm(string_value = "COMPLETE_NEEDREPAIR")]
    CompleteNeedRepair,
    #[sea_orm(string_value = "REJECT")]
    Reject,
}

/// Inspection record for one container on one depot visit.
///
/// `request_id` is the correlation key: a new request for the same container
/// always gets its own ticket.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "repair_tickets")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub container_no: String,
    pub request_id: Uuid,
    pub description: String,
    pub status: TicketStatus,
    pub can_repair: Option<bool>,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub estimated_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub labor_cost: Decimal,
    pub created_by: String,
    pub decided_by: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::service_request::Entity",
        from = "Column::RequestId",
        to = "super::service_request::Column::Id"
    )]
    ServiceRequest,
    #[sea_orm(has_many = "super::repair_cost_item::Entity")]
    CostItems,
}

impl Related<super::service_request::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServiceRequest.def()
    }
}

impl Related<super::repair_cost_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CostItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
