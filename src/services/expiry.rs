use crate::{
    clock::Clock,
    db::DbPool,
    entities::{ticket_transaction, TransactionStatus},
    errors::{ErrorKind, ServiceError},
    services::settlement::SettlementStateMachine,
};
use chrono::{DateTime, Utc};
use metrics::counter;
use sea_orm::{ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect};
use serde::Serialize;
use std::{sync::Arc, time::Duration};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub canceled: Vec<Uuid>,
    /// Moved on (proof submitted, canceled) between the scan and the cancel.
    pub skipped: Vec<Uuid>,
    pub failed: Vec<Uuid>,
}

/// Cancels transactions whose payment window has closed.
#[derive(Clone)]
pub struct ExpirySweeper {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    settlement: SettlementStateMachine,
    batch_size: u64,
}

impl ExpirySweeper {
    pub fn new(
        db: Arc<DbPool>,
        clock: Arc<dyn Clock>,
        settlement: SettlementStateMachine,
        batch_size: u64,
    ) -> Self {
        Self {
            db,
            clock,
            settlement,
            batch_size: batch_size.max(1),
        }
    }

    /// Waiting transactions past their deadline, oldest deadline first.
    pub async fn find_expired(&self) -> Result<Vec<ticket_transaction::Model>, ServiceError> {
        self.find_expired_after(self.clock.now(), None).await
    }

    /// One page of expired transactions ordered by `(payment_deadline, id)`,
    /// strictly after `cursor` when given.
    pub async fn find_expired_after(
        &self,
        now: DateTime<Utc>,
        cursor: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<ticket_transaction::Model>, ServiceError> {
        let mut query = ticket_transaction::Entity::find()
            .filter(ticket_transaction::Column::Status.eq(TransactionStatus::WaitingForPayment))
            .filter(ticket_transaction::Column::PaymentDeadline.lte(now));
        if let Some((deadline, id)) = cursor {
            query = query.filter(
                Condition::any()
                    .add(ticket_transaction::Column::PaymentDeadline.gt(deadline))
                    .add(
                        Condition::all()
                            .add(ticket_transaction::Column::PaymentDeadline.eq(deadline))
                            .add(ticket_transaction::Column::Id.gt(id)),
                    ),
            );
        }
        Ok(query
            .order_by_asc(ticket_transaction::Column::PaymentDeadline)
            .order_by_asc(ticket_transaction::Column::Id)
            .limit(self.batch_size)
            .all(&*self.db)
            .await?)
    }

    /// Runs one pass over every transaction expired at the start of the pass.
    ///
    /// Pages are walked with a keyset cursor, so rows whose cancel keeps
    /// failing never hide the ones behind them. Per-transaction failures are
    /// recorded and the pass goes on.
    #[instrument(skip(self))]
    pub async fn sweep_once(&self) -> Result<SweepReport, ServiceError> {
        let now = self.clock.now();
        let mut report = SweepReport::default();
        let mut cursor = None;

        loop {
            let page = self.find_expired_after(now, cursor).await?;
            let page_len = page.len() as u64;
            report.scanned += page.len();

            for txn in &page {
                match self.settlement.cancel_expired(txn.id).await {
                    Ok(_) => report.canceled.push(txn.id),
                    Err(e) if e.kind() == ErrorKind::Conflict => {
                        debug!(transaction_id = %txn.id, error = %e, "Skipping transaction that left the expirable state");
                        report.skipped.push(txn.id);
                    }
                    Err(e) => {
                        warn!(transaction_id = %txn.id, error = %e, "Failed to cancel expired transaction");
                        report.failed.push(txn.id);
                    }
                }
            }

            match page.last() {
                Some(last) if page_len == self.batch_size => {
                    cursor = Some((last.payment_deadline, last.id));
                }
                _ => break,
            }
        }

        counter!("ticketing.expiry.swept", report.canceled.len() as u64);
        if report.scanned > 0 {
            info!(
                scanned = report.scanned,
                canceled = report.canceled.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Expiry sweep finished"
            );
        }
        Ok(report)
    }

    /// Sweeps every `period` until `shutdown` flips to `true` or its sender drops.
    pub async fn run(self, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_secs = period.as_secs(), batch_size = self.batch_size, "Expiry sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "Expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Expiry sweeper stopped");
    }
}
