use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Persisted settlement state.
///
/// Expiry is not stored: an expired transaction is a
/// `WaitingForPayment` row whose deadline has passed (see [`Model::is_expired_at`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(40))")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    #[sea_orm(string_value = "WAITING_FOR_PAYMENT")]
    WaitingForPayment,
    #[sea_orm(string_value = "WAITING_FOR_ADMIN_CONFIRMATION")]
    WaitingForAdminConfirmation,
    #[sea_orm(string_value = "DONE")]
    Done,
    #[sea_orm(string_value = "CANCELED")]
    Canceled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::WaitingForPayment => "WAITING_FOR_PAYMENT",
            TransactionStatus::WaitingForAdminConfirmation => "WAITING_FOR_ADMIN_CONFIRMATION",
            TransactionStatus::Done => "DONE",
            TransactionStatus::Canceled => "CANCELED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Done | TransactionStatus::Canceled)
    }

    /// States from which a cancellation may still roll the reservation back.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            TransactionStatus::WaitingForPayment | TransactionStatus::WaitingForAdminConfirmation
        )
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The ticketing order. Amounts and the applied promotion/coupon are snapshots
/// so audits never depend on the promotion or coupon rows.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "transactions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub user_id: Uuid,
    pub event_id: Uuid,
    /// Sum of line totals before any discount.
    pub total_amount: i64,
    pub promotion_id: Option<Uuid>,
    pub promotion_code: Option<String>,
    pub promotion_discount: i64,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub coupon_discount: i64,
    pub points_used: i64,
    /// Amount the buyer owes, never negative.
    pub final_amount: i64,
    pub status: TransactionStatus,
    pub payment_deadline: DateTime<Utc>,
    pub payment_proof: Option<String>,
    pub proof_submitted_at: Option<DateTime<Utc>>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub canceled_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::transaction_ticket::Entity")]
    Items,
    #[sea_orm(has_many = "super::attendee::Entity")]
    Attendees,
}

impl Related<super::transaction_ticket::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl Related<super::attendee::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Attendees.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Waiting for payment with the deadline already reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::WaitingForPayment && self.payment_deadline <= now
    }

    pub fn accepts_payment_proof_at(&self, now: DateTime<Utc>) -> bool {
        self.status == TransactionStatus::WaitingForPayment && now < self.payment_deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn waiting(deadline: DateTime<Utc>) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            event_id: Uuid::new_v4(),
            total_amount: 100,
            promotion_id: None,
            promotion_code: None,
            promotion_discount: 0,
            coupon_id: None,
            coupon_code: None,
            coupon_discount: 0,
            points_used: 0,
            final_amount: 100,
            status: TransactionStatus::WaitingForPayment,
            payment_deadline: deadline,
            payment_proof: None,
            proof_submitted_at: None,
            confirmed_at: None,
            canceled_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn expiry_is_derived_from_status_and_deadline() {
        let deadline = Utc::now();
        let txn = waiting(deadline);
        assert!(!txn.is_expired_at(deadline - Duration::seconds(1)));
        assert!(txn.is_expired_at(deadline));
        assert!(!txn.accepts_payment_proof_at(deadline));

        let mut confirmed = waiting(deadline);
        confirmed.status = TransactionStatus::WaitingForAdminConfirmation;
        assert!(!confirmed.is_expired_at(deadline + Duration::days(1)));
    }

    #[test]
    fn cancellable_states() {
        assert!(TransactionStatus::WaitingForPayment.is_cancellable());
        assert!(TransactionStatus::WaitingForAdminConfirmation.is_cancellable());
        assert!(!TransactionStatus::Done.is_cancellable());
        assert!(TransactionStatus::Canceled.is_terminal());
    }
}
