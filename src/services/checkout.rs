use crate::{
    clock::Clock,
    db::DbPool,
    entities::{
        attendee::{self, AttendeeStatus},
        coupon, event, promotion, ticket, ticket_transaction, transaction_ticket, user,
        TransactionStatus,
    },
    errors::ServiceError,
    notifications::{dispatch, Notification, NotificationSink},
    services::{
        inventory::InventoryLedger,
        loyalty::LoyaltyLedger,
        pricing::{self, CartLine, CatalogSnapshot, PricedQuote, PricingRequest},
    },
};
use chrono::{DateTime, Duration, Utc};
use metrics::counter;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseTransaction, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

/// Bonus points per paid transaction, as a percentage.
pub const PURCHASE_BONUS_PERCENT: i64 = 10;
/// Reward paid to the referrer on the referred buyer's first confirmed payment.
pub const REFERRAL_BONUS_PERCENT: i64 = 5;

/// Floor of `pct` percent of `amount`.
pub fn percent_of(amount: i64, pct: i64) -> i64 {
    pricing::floor_percent(amount, pct)
}

/// Time rules applied to new transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    pub payment_window: Duration,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            payment_window: Duration::hours(24),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub event_id: Uuid,
    pub cart: Vec<CartLine>,
    #[validate(length(min = 1, max = 64))]
    pub promotion_code: Option<String>,
    pub coupon_id: Option<Uuid>,
    #[validate(range(min = 0))]
    pub points_to_use: Option<i64>,
}

impl CheckoutRequest {
    pub fn new(user_id: Uuid, event_id: Uuid, cart: Vec<CartLine>) -> Self {
        Self {
            user_id,
            event_id,
            cart,
            promotion_code: None,
            coupon_id: None,
            points_to_use: None,
        }
    }

    pub fn with_promotion_code(mut self, code: impl Into<String>) -> Self {
        self.promotion_code = Some(code.into());
        self
    }

    pub fn with_coupon(mut self, coupon_id: Uuid) -> Self {
        self.coupon_id = Some(coupon_id);
        self
    }

    pub fn with_points(mut self, points: i64) -> Self {
        self.points_to_use = Some(points);
        self
    }
}

/// A transaction with its line items and issued attendees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransactionDetails {
    pub transaction: ticket_transaction::Model,
    pub items: Vec<transaction_ticket::Model>,
    pub attendees: Vec<attendee::Model>,
}

impl TransactionDetails {
    pub async fn load<C: ConnectionTrait>(conn: &C, transaction_id: Uuid) -> Result<Self, ServiceError> {
        let transaction = find_transaction(conn, transaction_id).await?;
        let items = load_items(conn, transaction_id).await?;
        let attendees = attendee::Entity::find()
            .filter(attendee::Column::TransactionId.eq(transaction_id))
            .order_by_asc(attendee::Column::CreatedAt)
            .all(conn)
            .await?;
        Ok(Self {
            transaction,
            items,
            attendees,
        })
    }

    pub fn id(&self) -> Uuid {
        self.transaction.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.transaction.status
    }

    pub fn seat_count(&self) -> i64 {
        self.items.iter().map(|i| i64::from(i.quantity)).sum()
    }
}

pub(crate) async fn find_transaction<C: ConnectionTrait>(
    conn: &C,
    transaction_id: Uuid,
) -> Result<ticket_transaction::Model, ServiceError> {
    ticket_transaction::Entity::find_by_id(transaction_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("transaction {} not found", transaction_id)))
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    transaction_id: Uuid,
) -> Result<Vec<transaction_ticket::Model>, ServiceError> {
    Ok(transaction_ticket::Entity::find()
        .filter(transaction_ticket::Column::TransactionId.eq(transaction_id))
        .order_by_asc(transaction_ticket::Column::CreatedAt)
        .all(conn)
        .await?)
}

/// Writes one attendee row per purchased seat.
pub(crate) async fn issue_attendees<C: ConnectionTrait>(
    conn: &C,
    transaction: &ticket_transaction::Model,
    items: &[transaction_ticket::Model],
    now: DateTime<Utc>,
) -> Result<Vec<attendee::Model>, ServiceError> {
    let mut issued = Vec::new();
    for item in items {
        for _ in 0..item.quantity {
            let row = attendee::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(transaction.user_id),
                event_id: Set(transaction.event_id),
                transaction_id: Set(transaction.id),
                ticket_id: Set(item.ticket_id),
                ticket_type: Set(item.ticket_name.clone()),
                status: Set(AttendeeStatus::Confirmed),
                created_at: Set(now),
            };
            issued.push(row.insert(conn).await?);
        }
    }
    Ok(issued)
}

/// Looks a promotion code up for an event, preferring one scoped to it
/// as long as that one is usable right now.
async fn find_promotion<C: ConnectionTrait>(
    conn: &C,
    code: &str,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> Result<Option<promotion::Model>, ServiceError> {
    let candidates = promotion::Entity::find()
        .filter(promotion::Column::Code.eq(code))
        .all(conn)
        .await?;
    Ok(pick_promotion(candidates, event_id, now))
}

fn pick_promotion(
    candidates: Vec<promotion::Model>,
    event_id: Uuid,
    now: DateTime<Utc>,
) -> Option<promotion::Model> {
    let (scoped, agnostic): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .filter(|p| pricing::promotion_applies(p, event_id, now))
        .partition(|p| p.event_id.is_some());
    scoped.into_iter().chain(agnostic).next()
}

struct PreparedCheckout {
    catalog: CatalogSnapshot,
    quote: PricedQuote,
}

/// Turns a cart into a committed transaction in one unit of work.
#[derive(Clone)]
pub struct CheckoutOrchestrator {
    db: Arc<DbPool>,
    clock: Arc<dyn Clock>,
    inventory: InventoryLedger,
    loyalty: LoyaltyLedger,
    notifier: Arc<dyn NotificationSink>,
    policy: SettlementPolicy,
}

impl CheckoutOrchestrator {
    pub fn new(
        db: Arc<DbPool>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn NotificationSink>,
        policy: SettlementPolicy,
    ) -> Self {
        Self {
            inventory: InventoryLedger::new(clock.clone()),
            loyalty: LoyaltyLedger::new(clock.clone()),
            db,
            clock,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> SettlementPolicy {
        self.policy
    }

    /// Prices the cart against the current catalog without writing anything.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, event_id = %request.event_id))]
    pub async fn quote(&self, request: &CheckoutRequest) -> Result<PricedQuote, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        let prepared = self.prepare(&*self.db, request, self.clock.now()).await?;
        Ok(prepared.quote)
    }

    async fn prepare<C: ConnectionTrait>(
        &self,
        conn: &C,
        request: &CheckoutRequest,
        now: DateTime<Utc>,
    ) -> Result<PreparedCheckout, ServiceError> {
        let event = event::Entity::find_by_id(request.event_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("event {} not found", request.event_id)))?;
        if !event.is_open_for_sale(now) {
            return Err(ServiceError::Unavailable(format!(
                "event {} is not open for sale",
                event.id
            )));
        }

        let buyer = user::Entity::find_by_id(request.user_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user {} not found", request.user_id)))?;

        let tickets = ticket::Entity::find()
            .filter(ticket::Column::EventId.eq(event.id))
            .all(conn)
            .await?;
        let catalog = CatalogSnapshot::from_models(event.id, &tickets);

        let promotion = match request.promotion_code.as_deref() {
            Some(code) => find_promotion(conn, code, event.id, now).await?,
            None => None,
        };
        let coupon = match request.coupon_id {
            Some(id) => coupon::Entity::find_by_id(id).one(conn).await?,
            None => None,
        };

        let quote = pricing::price(&PricingRequest {
            user_id: buyer.id,
            cart: &request.cart,
            catalog: &catalog,
            promotion: promotion.as_ref(),
            coupon: coupon.as_ref(),
            points_requested: request.points_to_use.unwrap_or(0),
            point_balance: buyer.point_balance,
            now,
        })?;

        if request.promotion_code.is_some() && quote.promotion().is_none() {
            info!(code = ?request.promotion_code, "Promotion code not applicable, ignoring");
        }
        if request.coupon_id.is_some() && quote.coupon().is_none() {
            info!(coupon_id = ?request.coupon_id, "Coupon not applicable, ignoring");
        }

        Ok(PreparedCheckout { catalog, quote })
    }

    /// Reserves seats, records the transaction and consumes discounts atomically.
    ///
    /// Free orders are settled and fulfilled inside the same commit.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, event_id = %request.event_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<TransactionDetails, ServiceError> {
        let result = self.run_checkout(&request).await;
        match &result {
            Ok(details) => {
                counter!("ticketing.checkout.created", 1);
                info!(
                    transaction_id = %details.id(),
                    status = %details.status(),
                    final_amount = details.transaction.final_amount,
                    "Checkout committed"
                );
            }
            Err(e) => {
                counter!("ticketing.checkout.failed", 1, "kind" => e.kind().to_string());
                warn!(error = %e, kind = %e.kind(), "Checkout failed");
            }
        }
        result
    }

    async fn run_checkout(&self, request: &CheckoutRequest) -> Result<TransactionDetails, ServiceError> {
        request
            .validate()
            .map_err(|e| ServiceError::InvalidInput(e.to_string()))?;
        let now = self.clock.now();

        let prepared = self.prepare(&*self.db, request, now).await?;
        prepared.quote.ensure_available(&prepared.catalog)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "Failed to start checkout unit of work");
            ServiceError::from(e).inside_unit_of_work()
        })?;

        let details = match self.commit_checkout(&txn, request, &prepared.quote, now).await {
            Ok(details) => details,
            Err(e) => {
                if let Err(rb) = txn.rollback().await {
                    error!(error = %rb, "Failed to roll back checkout");
                }
                return Err(e.inside_unit_of_work());
            }
        };

        txn.commit().await.map_err(|e| {
            error!(error = %e, transaction_id = %details.id(), "Failed to commit checkout");
            ServiceError::from(e).inside_unit_of_work()
        })?;

        let txn_row = &details.transaction;
        dispatch(
            self.notifier.as_ref(),
            Notification::CheckoutCreated {
                transaction_id: txn_row.id,
                user_id: txn_row.user_id,
                event_id: txn_row.event_id,
                final_amount: txn_row.final_amount,
                payment_deadline: txn_row.payment_deadline,
            },
        )
        .await;
        if !details.attendees.is_empty() {
            dispatch(
                self.notifier.as_ref(),
                Notification::TicketsIssued {
                    transaction_id: txn_row.id,
                    user_id: txn_row.user_id,
                    event_id: txn_row.event_id,
                    seats: details.attendees.len(),
                },
            )
            .await;
        }

        Ok(details)
    }

    async fn commit_checkout(
        &self,
        txn: &DatabaseTransaction,
        request: &CheckoutRequest,
        quote: &PricedQuote,
        now: DateTime<Utc>,
    ) -> Result<TransactionDetails, ServiceError> {
        for line in &quote.lines {
            self.inventory
                .reserve(txn, line.ticket_id, line.quantity)
                .await?;
        }

        let transaction_id = Uuid::new_v4();
        let settled = quote.final_amount == 0;
        let promotion = quote.promotion();
        let coupon = quote.coupon();

        let row = ticket_transaction::ActiveModel {
            id: Set(transaction_id),
            user_id: Set(request.user_id),
            event_id: Set(request.event_id),
            total_amount: Set(quote.total_amount),
            promotion_id: Set(promotion.and_then(|p| p.reference_id)),
            promotion_code: Set(promotion.and_then(|p| p.code.clone())),
            promotion_discount: Set(quote.promotion_discount()),
            coupon_id: Set(coupon.and_then(|c| c.reference_id)),
            coupon_code: Set(coupon.and_then(|c| c.code.clone())),
            coupon_discount: Set(quote.coupon_discount()),
            points_used: Set(quote.points_used),
            final_amount: Set(quote.final_amount),
            status: Set(if settled {
                TransactionStatus::Done
            } else {
                TransactionStatus::WaitingForPayment
            }),
            payment_deadline: Set(now + self.policy.payment_window),
            payment_proof: Set(None),
            proof_submitted_at: Set(None),
            confirmed_at: Set(settled.then_some(now)),
            canceled_at: Set(None),
            cancel_reason: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        };
        let transaction = row.insert(txn).await?;

        let mut items = Vec::with_capacity(quote.lines.len());
        for line in &quote.lines {
            let item = transaction_ticket::ActiveModel {
                id: Set(Uuid::new_v4()),
                transaction_id: Set(transaction_id),
                ticket_id: Set(line.ticket_id),
                ticket_name: Set(line.ticket_name.clone()),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
                created_at: Set(now),
            };
            items.push(item.insert(txn).await?);
        }

        if quote.points_used > 0 {
            self.loyalty
                .debit_points(
                    txn,
                    request.user_id,
                    quote.points_used,
                    &format!("Points redeemed for transaction {}", transaction_id),
                    Some(transaction_id),
                )
                .await?;
        }
        if let Some(coupon_id) = coupon.and_then(|c| c.reference_id) {
            self.loyalty.consume_coupon(txn, coupon_id).await?;
        }
        if let Some(promotion_id) = promotion.and_then(|p| p.reference_id) {
            self.loyalty.apply_promotion_use(txn, promotion_id).await?;
        }

        let mut attendees = Vec::new();
        if settled {
            attendees = issue_attendees(txn, &transaction, &items, now).await?;
            let bonus = percent_of(quote.total_amount, PURCHASE_BONUS_PERCENT);
            if bonus > 0 {
                self.loyalty
                    .credit_points(
                        txn,
                        request.user_id,
                        bonus,
                        &format!("Purchase bonus for transaction {}", transaction_id),
                        Some(transaction_id),
                    )
                    .await?;
            }
        }

        Ok(TransactionDetails {
            transaction,
            items,
            attendees,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_of_floors() {
        assert_eq!(percent_of(100_000, PURCHASE_BONUS_PERCENT), 10_000);
        assert_eq!(percent_of(999, PURCHASE_BONUS_PERCENT), 99);
        assert_eq!(percent_of(999, REFERRAL_BONUS_PERCENT), 49);
        assert_eq!(percent_of(-5, PURCHASE_BONUS_PERCENT), 0);
        assert_eq!(percent_of(i64::MAX, PURCHASE_BONUS_PERCENT), i64::MAX / 10);
    }

    #[test]
    fn negative_points_request_is_rejected() {
        let request = CheckoutRequest::new(Uuid::new_v4(), Uuid::new_v4(), vec![]).with_points(-1);
        assert!(request.validate().is_err());
        let blank_code = CheckoutRequest::new(Uuid::new_v4(), Uuid::new_v4(), vec![])
            .with_promotion_code("");
        assert!(blank_code.validate().is_err());
    }

    fn promo(event_id: Option<Uuid>, end: DateTime<Utc>) -> promotion::Model {
        let start = end - Duration::days(10);
        promotion::Model {
            id: Uuid::new_v4(),
            event_id,
            code: "SPRING".into(),
            discount_type: crate::entities::DiscountType::Flat,
            discount: 1_000,
            start_date: start,
            end_date: end,
            max_uses: 5,
            used_count: 0,
            created_at: start,
            updated_at: start,
        }
    }

    #[test]
    fn expired_scoped_promotion_does_not_hide_a_live_global_one() {
        let now = Utc::now();
        let event_id = Uuid::new_v4();
        let stale = promo(Some(event_id), now - Duration::days(1));
        let global = promo(None, now + Duration::days(1));
        let picked = pick_promotion(vec![stale, global.clone()], event_id, now);
        assert_eq!(picked.map(|p| p.id), Some(global.id));
    }

    #[test]
    fn live_scoped_promotion_wins_over_global() {
        let now = Utc::now();
        let event_id = Uuid::new_v4();
        let scoped = promo(Some(event_id), now + Duration::days(1));
        let global = promo(None, now + Duration::days(1));
        let other_event = promo(Some(Uuid::new_v4()), now + Duration::days(1));
        let picked = pick_promotion(vec![global, other_event, scoped.clone()], event_id, now);
        assert_eq!(picked.map(|p| p.id), Some(scoped.id));
    }

    #[test]
    fn default_window_is_a_day() {
        assert_eq!(SettlementPolicy::default().payment_window, Duration::hours(24));
    }
}
