use chrono::{DateTime, NaiveDate, Utc};
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
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SealStatus {
    #[sea_orm(string_value = "ACTIVE")]
    Active,
    #[sea_orm(string_value = "INACTIVE")]
    Inactive,
}

/// One purchased lot of seals for a shipping company.
///
/// Invariant: `quantity_remaining = quantity_purchased - quantity_exported`
/// and `quantity_exported` equals the number of usage rows for this lot.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "seals")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub shipping_company: String,
    pub serial_prefix: String,
    pub serial_start: i64,
    pub quantity_purchased: i32,
    pub quantity_exported: i32,
    pub quantity_remaining: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub unit_price: Decimal,
    pub purchase_date: NaiveDate,
    pub status: SealStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::seal_usage_history::Entity")]
    UsageHistory,
}

impl Related<super::seal_usage_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UsageHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn serial_range(&self) -> std::ops::Range<i64> {
        self.serial_start..self.serial_start + i64::from(self.quantity_purchased)
    }

    pub fn seal_number(&self, serial: i64) -> String {
        format!("{}{:07}", self.serial_prefix, serial)
    }
}
