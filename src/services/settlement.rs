use crate::{
    clock::Clock,
    db::DbPool,
    entities::{ticket_transaction, TransactionStatus},
    errors::ServiceError,
    notifications::{dispatch, CancellationReason, Notification, NotificationSink},
    services::{
        checkout::{
            find_transaction, issue_attendees, load_items, percent_of, TransactionDetails,
            PURCHASE_BONUS_PERCENT, REFERRAL_BONUS_PERCENT,
        },
        inventory::InventoryLedger,
        loyalty::LoyaltyLedger,
    },
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{
    sea_query::Expr, ColumnTrait, DatabaseTransaction, EntityTrait, QueryFilter, TransactionTrait,
};
use std::sync::Arc;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Side effects of a confirmation, reported once the unit commits.
struct Confirmation {
    details: TransactionDetails,
    bonus_points: i64,
    referral: Option<(Uuid, i64)>,
}

/// Moves transactions through proof, confirmation and cancellation.
///
/// Each transition is a guarded status `UPDATE`; the row only moves if it is
/// still in the state the transition starts from. Repeating a transition
/// whose outcome already holds succeeds without side effects.
#[derive(Clone)]
pub struct SettlementStateMachine {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    inventory: InventoryLedger,
    loyalty: LoyaltyLedger,
    notifier: Arc<dyn NotificationSink>,
}

impl SettlementStateMachine {
    pub fn new(db: Arc<DbPool>, clock: Arc<dyn Clock>, notifier: Arc<dyn NotificationSink>) -> Self {
        Self {
            inventory: InventoryLedger::new(clock.clone()),
            loyalty: LoyaltyLedger::new(clock.clone()),
            db,
            clock,
            notifier,
        }
    }

    /// Stores the buyer's proof and hands the transaction to an admin.
    #[instrument(skip(self, proof), fields(transaction_id = %transaction_id))]
    pub async fn submit_payment_proof(
        &self,
        transaction_id: Uuid,
        proof: &str,
    ) -> Result<TransactionDetails, ServiceError> {
        let proof = proof.trim();
        if proof.is_empty() {
            return Err(ServiceError::InvalidInput(
                "payment proof reference must not be empty".to_string(),
            ));
        }
        let db = &*self.db;
        let now = self.clock.now();
        let current = find_transaction(db, transaction_id).await?;

        match current.status {
            TransactionStatus::WaitingForPayment => {
                if !current.accepts_payment_proof_at(now) {
                    return Err(ServiceError::PaymentWindowExpired(transaction_id));
                }
            }
            TransactionStatus::WaitingForAdminConfirmation
                if current.payment_proof.as_deref() == Some(proof) =>
            {
                return TransactionDetails::load(db, transaction_id).await;
            }
            other => {
                return Err(ServiceError::Conflict(format!(
                    "cannot accept payment proof for transaction {} in state {}",
                    transaction_id, other
                )));
            }
        }

        let res = ticket_transaction::Entity::update_many()
            .col_expr(
                ticket_transaction::Column::Status,
                Expr::value(TransactionStatus::WaitingForAdminConfirmation),
            )
            .col_expr(ticket_transaction::Column::PaymentProof, Expr::value(Some(proof.to_string())))
            .col_expr(ticket_transaction::Column::ProofSubmittedAt, Expr::value(Some(now)))
            .col_expr(ticket_transaction::Column::UpdatedAt, Expr::value(now))
            .filter(ticket_transaction::Column::Id.eq(transaction_id))
            .filter(ticket_transaction::Column::Status.eq(TransactionStatus::WaitingForPayment))
            .filter(ticket_transaction::Column::PaymentDeadline.gt(now))
            .exec(db)
            .await?;

        if res.rows_affected == 0 {
            // Lost a race; the row has moved on.
            let latest = find_transaction(db, transaction_id).await?;
            if latest.status == TransactionStatus::WaitingForAdminConfirmation
                && latest.payment_proof.as_deref() == Some(proof)
            {
                return TransactionDetails::load(db, transaction_id).await;
            }
            return Err(ServiceError::Conflict(format!(
                "transaction {} changed state to {} while submitting proof",
                transaction_id, latest.status
            )));
        }

        info!(user_id = %current.user_id, "Payment proof submitted");
        dispatch(
            self.notifier.as_ref(),
            Notification::PaymentProofSubmitted {
                transaction_id,
                user_id: current.user_id,
            },
        )
        .await;

        TransactionDetails::load(db, transaction_id).await
    }

    /// Admin approval: settles the transaction, issues seats and pays out bonuses.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn confirm_payment(&self, transaction_id: Uuid) -> Result<TransactionDetails, ServiceError> {
        let db = &*self.db;
        let current = find_transaction(db, transaction_id).await?;
        match current.status {
            TransactionStatus::Done => {
                info!("Transaction already confirmed");
                return TransactionDetails::load(db, transaction_id).await;
            }
            TransactionStatus::WaitingForAdminConfirmation => {}
            other => {
                return Err(ServiceError::Conflict(format!(
                    "cannot confirm transaction {} in state {}",
                    transaction_id, other
                )));
            }
        }

        let now = self.clock.now();
        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start confirmation unit of work");
            ServiceError::from(e).inside_unit_of_work()
        })?;

        let outcome = match self.commit_confirmation(&txn, transaction_id, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    error!(error = %rb, "Failed to roll back confirmation");
                }
                return Err(e.inside_unit_of_work());
            }
        };

        let Some(confirmation) = outcome else {
            txn.rollback().await?;
            let latest = find_transaction(db, transaction_id).await?;
            if latest.status == TransactionStatus::Done {
                return TransactionDetails::load(db, transaction_id).await;
            }
            return Err(ServiceError::Conflict(format!(
                "transaction {} changed state to {} while confirming",
                transaction_id, latest.status
            )));
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit confirmation");
            ServiceError::from(e).inside_unit_of_work()
        })?;

        counter!("ticketing.settlement.confirmed", 1);
        let row = &confirmation.details.transaction;
        info!(
            user_id = %row.user_id,
            seats = confirmation.details.attendees.len(),
            bonus_points = confirmation.bonus_points,
            "Payment confirmed"
        );

        dispatch(
            self.notifier.as_ref(),
            Notification::PaymentConfirmed {
                transaction_id,
                user_id: row.user_id,
                bonus_points: confirmation.bonus_points,
            },
        )
        .await;
        dispatch(
            self.notifier.as_ref(),
            Notification::TicketsIssued {
                transaction_id,
                user_id: row.user_id,
                event_id: row.event_id,
                seats: confirmation.details.attendees.len(),
            },
        )
        .await;
        if let Some((referrer_id, points)) = confirmation.referral {
            dispatch(
                self.notifier.as_ref(),
                Notification::ReferralRewarded {
                    referrer_id,
                    referred_user_id: row.user_id,
                    points,
                },
            )
            .await;
        }

        Ok(confirmation.details)
    }

    /// `None` when the status guard did not match.
    async fn commit_confirmation(
        &self,
        txn: &DatabaseTransaction,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<Confirmation>, ServiceError> {
        let res = ticket_transaction::Entity::update_many()
            .col_expr(ticket_transaction::Column::Status, Expr::value(TransactionStatus::Done))
            .col_expr(ticket_transaction::Column::ConfirmedAt, Expr::value(Some(now)))
            .col_expr(ticket_transaction::Column::UpdatedAt, Expr::value(now))
            .filter(ticket_transaction::Column::Id.eq(transaction_id))
            .filter(
                ticket_transaction::Column::Status
                    .eq(TransactionStatus::WaitingForAdminConfirmation),
            )
            .exec(txn)
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }

        let transaction = find_transaction(txn, transaction_id).await?;
        let items = load_items(txn, transaction_id).await?;
        let attendees = issue_attendees(txn, &transaction, &items, now).await?;

        let bonus_points = percent_of(transaction.final_amount, PURCHASE_BONUS_PERCENT);
        self.loyalty
            .credit_points(
                txn,
                transaction.user_id,
                bonus_points,
                &format!("Purchase bonus for transaction {}", transaction_id),
                Some(transaction_id),
            )
            .await?;

        let mut referral = None;
        if let Some(claimed) = self.loyalty.claim_referral(txn, transaction.user_id).await? {
            let reward = percent_of(transaction.final_amount, REFERRAL_BONUS_PERCENT);
            self.loyalty
                .credit_points(
                    txn,
                    claimed.referrer_id,
                    reward,
                    &format!("Referral reward for transaction {}", transaction_id),
                    Some(transaction_id),
                )
                .await?;
            referral = Some((claimed.referrer_id, reward));
        }

        Ok(Some(Confirmation {
            details: TransactionDetails {
                transaction,
                items,
                attendees,
            },
            bonus_points,
            referral,
        }))
    }

    /// Cancels a pending transaction and gives back everything it took.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn cancel(&self, transaction_id: Uuid) -> Result<TransactionDetails, ServiceError> {
        self.cancel_with_reason(transaction_id, CancellationReason::Requested)
            .await
    }

    /// Cancellation driven by a missed payment deadline.
    ///
    /// Only matches transactions still waiting for payment past their
    /// deadline; anything else is a `Conflict`.
    #[instrument(skip(self), fields(transaction_id = %transaction_id))]
    pub async fn cancel_expired(&self, transaction_id: Uuid) -> Result<TransactionDetails, ServiceError> {
        self.cancel_with_reason(transaction_id, CancellationReason::PaymentWindowExpired)
            .await
    }

    async fn cancel_with_reason(
        &self,
        transaction_id: Uuid,
        reason: CancellationReason,
    ) -> Result<TransactionDetails, ServiceError> {
        let db = &*self.db;
        let now = self.clock.now();
        let current = find_transaction(db, transaction_id).await?;

        if current.status == TransactionStatus::Canceled {
            info!("Transaction already canceled");
            return TransactionDetails::load(db, transaction_id).await;
        }
        if !current.status.is_cancellable() {
            return Err(ServiceError::Conflict(format!(
                "cannot cancel transaction {} in state {}",
                transaction_id, current.status
            )));
        }
        if reason == CancellationReason::PaymentWindowExpired && !current.is_expired_at(now) {
            return Err(ServiceError::Conflict(format!(
                "transaction {} is not past its payment deadline",
                transaction_id
            )));
        }

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start cancellation unit of work");
            ServiceError::from(e).inside_unit_of_work()
        })?;

        let outcome = match self.commit_cancellation(&txn, transaction_id, reason, now).await {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    error!(error = %rb, "Failed to roll back cancellation");
                }
                return Err(e.inside_unit_of_work());
            }
        };

        let Some(details) = outcome else {
            txn.rollback().await?;
            let latest = find_transaction(db, transaction_id).await?;
            if latest.status == TransactionStatus::Canceled {
                return TransactionDetails::load(db, transaction_id).await;
            }
            return Err(ServiceError::Conflict(format!(
                "transaction {} changed state to {} while canceling",
                transaction_id, latest.status
            )));
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, "Failed to commit cancellation");
            ServiceError::from(e).inside_unit_of_work()
        })?;

        counter!("ticketing.settlement.canceled", 1, "reason" => reason.to_string());
        info!(
            user_id = %details.transaction.user_id,
            %reason,
            seats = details.seat_count(),
            points_refunded = details.transaction.points_used,
            "Transaction canceled"
        );
        dispatch(
            self.notifier.as_ref(),
            Notification::TransactionCanceled {
                transaction_id,
                user_id: details.transaction.user_id,
                reason,
            },
        )
        .await;

        Ok(details)
    }

    async fn commit_cancellation(
        &self,
        txn: &DatabaseTransaction,
        transaction_id: Uuid,
        reason: CancellationReason,
        now: DateTime<Utc>,
    ) -> Result<Option<TransactionDetails>, ServiceError> {
        let mut update = ticket_transaction::Entity::update_many()
            .col_expr(ticket_transaction::Column::Status, Expr::value(TransactionStatus::Canceled))
            .col_expr(ticket_transaction::Column::CanceledAt, Expr::value(Some(now)))
            .col_expr(
                ticket_transaction::Column::CancelReason,
                Expr::value(Some(reason.to_string())),
            )
            .col_expr(ticket_transaction::Column::UpdatedAt, Expr::value(now))
            .filter(ticket_transaction::Column::Id.eq(transaction_id));
        update = match reason {
            CancellationReason::Requested => update.filter(ticket_transaction::Column::Status.is_in([
                TransactionStatus::WaitingForPayment,
                TransactionStatus::WaitingForAdminConfirmation,
            ])),
            CancellationReason::PaymentWindowExpired => update
                .filter(ticket_transaction::Column::Status.eq(TransactionStatus::WaitingForPayment))
                .filter(ticket_transaction::Column::PaymentDeadline.lte(now)),
        };
        if update.exec(txn).await?.rows_affected == 0 {
            return Ok(None);
        }

        let transaction = find_transaction(txn, transaction_id).await?;
        let items = load_items(txn, transaction_id).await?;

        for item in &items {
            self.inventory
                .release(txn, item.ticket_id, item.quantity)
                .await?;
        }
        if let Some(promotion_id) = transaction.promotion_id {
            self.loyalty.revert_promotion_use(txn, promotion_id).await?;
        }
        if let Some(coupon_id) = transaction.coupon_id {
            self.loyalty.restore_coupon(txn, coupon_id).await?;
        }
        if transaction.points_used > 0 {
            self.loyalty
                .credit_points(
                    txn,
                    transaction.user_id,
                    transaction.points_used,
                    &format!("Points refund for canceled transaction {}", transaction_id),
                    Some(transaction_id),
                )
                .await?;
        }

        Ok(Some(TransactionDetails {
            transaction,
            items,
            attendees: Vec::new(),
        }))
    }
}
