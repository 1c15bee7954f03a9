use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A physical position in the yard, addressed by its yard/block/slot triplet.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "yard_slots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub yard: String,
    pub block: String,
    pub slot: String,
    /// Reserved slots are never offered for storage (the gate slot is one).
    pub is_reserved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::yard_placement::Entity")]
    Placements,
}

impl Related<super::yard_placement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Placements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn label(&self) -> String {
        format!("{}-{}-{}", self.yard, self.block, self.slot)
    }
}
