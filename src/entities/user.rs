use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Buyer account with its loyalty balance.
///
/// `point_balance` always equals the sum of the user's `point_history` deltas.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "users")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub point_balance: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::point_history::Entity")]
    PointHistory,
}

impl Related<super::point_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PointHistory.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
