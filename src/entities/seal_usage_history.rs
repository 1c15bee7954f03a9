use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Ledger row, one per seal consumed by an export container.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seal_usage_history")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub seal_id: Uuid,
    pub seal_number: String,
    pub serial: i64,
    pub container_no: String,
    pub booking_no: Option<String>,
    pub request_id: Option<Uuid>,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::seal::Entity",
        from = "Column::SealId",
        to = "super::seal::Column::Id"
    )]
    Seal,
}

impl Related<super::seal::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Seal.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
