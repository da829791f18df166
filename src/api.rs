use std::sync::Arc;

use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use tracing::instrument;
use uuid::Uuid;

use crate::{
    clock::{Clock, SystemClock},
    config::AppConfig,
    db::DbPool,
    entities::{point_history, ticket_transaction},
    errors::ServiceError,
    notifications::NotificationSink,
    services::{
        checkout::{CheckoutOrchestrator, CheckoutRequest, SettlementPolicy, TransactionDetails},
        expiry::{ExpirySweeper, SweepReport},
        loyalty::{LoyaltyLedger, PointAudit},
        pricing::PricedQuote,
        settlement::SettlementStateMachine,
    },
};

/// Entry point for the presentation layer.
///
/// Owns nothing but handles: the store, clock and notification sink are
/// constructed by the process and passed in.
#[derive(Clone)]
pub struct TicketingCore {
    db: Arc<DbPool>,
    checkout: CheckoutOrchestrator,
    settlement: SettlementStateMachine,
    sweeper: ExpirySweeper,
    loyalty: LoyaltyLedger,
}

impl TicketingCore {
    pub fn new(
        db: Arc<DbPool>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        policy: SettlementPolicy,
        sweep_batch_size: u64,
    ) -> Self {
        let checkout = CheckoutOrchestrator::new(db.clone(), clock.clone(), notifier.clone(), policy);
        let settlement = SettlementStateMachine::new(db.clone(), clock.clone(), notifier);
        let sweeper = ExpirySweeper::new(db.clone(), clock.clone(), settlement.clone(), sweep_batch_size);
        Self {
            loyalty: LoyaltyLedger::new(clock),
            db,
            checkout,
            settlement,
            sweeper,
        }
    }

    /// Wires the core with the wall clock and configured policy.
    pub fn from_config(db: Arc<DbPool>, cfg: &AppConfig, notifier: Arc<dyn NotificationSink>) -> Self {
        Self::new(
            db,
            Arc::new(SystemClock),
            notifier,
            cfg.settlement_policy(),
            cfg.expiry_sweep_batch_size,
        )
    }

    pub fn sweeper(&self) -> ExpirySweeper {
        self.sweeper.clone()
    }

    pub async fn quote_checkout(&self, request: &CheckoutRequest) -> Result<PricedQuote, ServiceError> {
        self.checkout.quote(request).await
    }

    pub async fn create_checkout(&self, request: CheckoutRequest) -> Result<TransactionDetails, ServiceError> {
        self.checkout.checkout(request).await
    }

    pub async fn submit_payment_proof(
        &self,
        transaction_id: Uuid,
        proof: &str,
    ) -> Result<TransactionDetails, ServiceError> {
        self.settlement
            .submit_payment_proof(transaction_id, proof)
            .await
    }

    /// Privileged.
    pub async fn confirm_payment(&self, transaction_id: Uuid) -> Result<TransactionDetails, ServiceError> {
        self.settlement.confirm_payment(transaction_id).await
    }

    pub async fn cancel_transaction(&self, transaction_id: Uuid) -> Result<TransactionDetails, ServiceError> {
        self.settlement.cancel(transaction_id).await
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> Result<TransactionDetails, ServiceError> {
        TransactionDetails::load(&*self.db, transaction_id).await
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_user_transactions(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<ticket_transaction::Model>, ServiceError> {
        Ok(ticket_transaction::Entity::find()
            .filter(ticket_transaction::Column::UserId.eq(user_id))
            .order_by_desc(ticket_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    pub async fn sweep_expired(&self) -> Result<SweepReport, ServiceError> {
        self.sweeper.sweep_once().await
    }

    pub async fn point_balance(&self, user_id: Uuid) -> Result<i64, ServiceError> {
        self.loyalty.balance(&*self.db, user_id).await
    }

    pub async fn point_history(&self, user_id: Uuid) -> Result<Vec<point_history::Model>, ServiceError> {
        self.loyalty.history(&*self.db, user_id).await
    }

    pub async fn audit_points(&self, user_id: Uuid) -> Result<PointAudit, ServiceError> {
        self.loyalty.audit(&*self.db, user_id).await
    }
}
