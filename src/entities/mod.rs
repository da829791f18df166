//! Persistent entities of the checkout and settlement core.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub mod attendee;
pub mod coupon;
pub mod event;
pub mod point_history;
pub mod promotion;
pub mod referral;
pub mod ticket;
pub mod ticket_transaction;
pub mod transaction_ticket;
pub mod user;

pub use ticket_transaction::TransactionStatus;

/// How the integer `discount` on a promotion or coupon is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiscountType {
    /// Whole percent, 0-100.
    #[sea_orm(string_value = "PERCENTAGE")]
    Percentage,
    /// Amount in the smallest currency unit.
    #[sea_orm(string_value = "FLAT")]
    Flat,
}
