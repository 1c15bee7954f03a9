use chrono::{DateTime, Utc};
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum PlacementStatus {
    #[sea_orm(string_value = "OCCUPIED")]
    Occupied,
    #[sea_orm(string_value = "HOLD")]
    Hold,
    #[sea_orm(string_value = "EMPTY")]
    Empty,
    #[sea_orm(string_value = "RESERVED")]
    Reserved,
    #[sea_orm(string_value = "REMOVED")]
    Removed,
}

impl PlacementStatus {
    /// Statuses meaning the container is physically sitting in the slot.
    pub fn physically_present() -> [PlacementStatus; 2] {
        [PlacementStatus::Hold, PlacementStatus::Occupied]
    }
}

/// Occupancy of a yard slot by a container. Owned by the yard subsystem;
/// the core only reads it and flips it to `REMOVED` or records a new arrival.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "yard_placements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub container_no: String,
    pub slot_id: Uuid,
    pub status: PlacementStatus,
    pub placed_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::yard_slot::Entity",
        from = "Column::SlotId",
        to = "super::yard_slot::Column::Id"
    )]
    YardSlot,
}

impl Related<super::yard_slot::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::YardSlot.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
