use crate::{
    clock::Clock,
    entities::{coupon, point_history, promotion, referral, user},
    errors::ServiceError,
};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Balance against the sum of its history rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointAudit {
    pub user_id: Uuid,
    pub balance: i64,
    pub history_total: i64,
    pub entries: usize,
}

impl PointAudit {
    pub fn is_consistent(&self) -> bool {
        self.balance == self.history_total
    }
}

/// Point balances plus the usage state of promotions, coupons and referrals.
///
/// Each balance change writes exactly one history row through the same
/// connection, so a unit of work either keeps both or neither.
#[derive(Clone)]
pub struct LoyaltyLedger {
    clock: Arc<dyn Clock>,
}

impl LoyaltyLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    #[instrument(skip(self, conn, reason))]
    pub async fn debit_points<C>(
        &self,
        conn: &C,
        user_id: Uuid,
        amount: i64,
        reason: &str,
        transaction_id: Option<Uuid>,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if amount < 0 {
            return Err(ServiceError::InvalidInput(format!(
                "cannot debit a negative amount of points ({})",
                amount
            )));
        }
        if amount == 0 {
            return Ok(());
        }
        let now = self.clock.now();

        let res = user::Entity::update_many()
            .col_expr(
                user::Column::PointBalance,
                Expr::col(user::Column::PointBalance).sub(amount),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(now))
            .filter(user::Column::Id.eq(user_id))
            .filter(user::Column::PointBalance.gte(amount))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            let available = find_user(conn, user_id).await?.point_balance;
            return Err(ServiceError::InsufficientPoints {
                requested: amount,
                available,
            });
        }

        self.append_history(conn, user_id, -amount, reason, transaction_id)
            .await?;
        debug!(%user_id, amount, "Points debited");
        Ok(())
    }

    #[instrument(skip(self, conn, reason))]
    pub async fn credit_points<C>(
        &self,
        conn: &C,
        user_id: Uuid,
        amount: i64,
        reason: &str,
        transaction_id: Option<Uuid>,
    ) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if amount < 0 {
            return Err(ServiceError::InvalidInput(format!(
                "cannot credit a negative amount of points ({})",
                amount
            )));
        }
        if amount == 0 {
            return Ok(());
        }
        let now = self.clock.now();

        let res = user::Entity::update_many()
            .col_expr(
                user::Column::PointBalance,
                Expr::col(user::Column::PointBalance).add(amount),
            )
            .col_expr(user::Column::UpdatedAt, Expr::value(now))
            .filter(user::Column::Id.eq(user_id))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::NotFound(format!("user {} not found", user_id)));
        }

        self.append_history(conn, user_id, amount, reason, transaction_id)
            .await?;
        debug!(%user_id, amount, "Points credited");
        Ok(())
    }

    async fn append_history<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
        delta: i64,
        reason: &str,
        transaction_id: Option<Uuid>,
    ) -> Result<point_history::Model, ServiceError> {
        let row = point_history::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            delta: Set(delta),
            description: Set(reason.to_string()),
            transaction_id: Set(transaction_id),
            created_at: Set(self.clock.now()),
        };
        Ok(row.insert(conn).await?)
    }

    /// Counts one use against the promotion's cap.
    #[instrument(skip(self, conn))]
    pub async fn apply_promotion_use<C>(&self, conn: &C, promotion_id: Uuid) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let res = promotion::Entity::update_many()
            .col_expr(
                promotion::Column::UsedCount,
                Expr::col(promotion::Column::UsedCount).add(1),
            )
            .col_expr(promotion::Column::UpdatedAt, Expr::value(self.clock.now()))
            .filter(promotion::Column::Id.eq(promotion_id))
            .filter(Expr::col(promotion::Column::UsedCount).lt(Expr::col(promotion::Column::MaxUses)))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return match promotion::Entity::find_by_id(promotion_id).one(conn).await? {
                Some(_) => Err(ServiceError::UsageExhausted(promotion_id)),
                None => Err(ServiceError::NotFound(format!(
                    "promotion {} not found",
                    promotion_id
                ))),
            };
        }
        Ok(())
    }

    /// Gives back one use. A deleted promotion has nothing to restore.
    #[instrument(skip(self, conn))]
    pub async fn revert_promotion_use<C>(&self, conn: &C, promotion_id: Uuid) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let res = promotion::Entity::update_many()
            .col_expr(
                promotion::Column::UsedCount,
                Expr::col(promotion::Column::UsedCount).sub(1),
            )
            .col_expr(promotion::Column::UpdatedAt, Expr::value(self.clock.now()))
            .filter(promotion::Column::Id.eq(promotion_id))
            .filter(promotion::Column::UsedCount.gt(0))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return match promotion::Entity::find_by_id(promotion_id).one(conn).await? {
                Some(_) => Err(ServiceError::InvariantViolation(format!(
                    "promotion {} has no recorded use to revert",
                    promotion_id
                ))),
                None => {
                    warn!(%promotion_id, "Promotion no longer exists, skipping usage revert");
                    Ok(())
                }
            };
        }
        Ok(())
    }

    /// Flips the coupon to used. Only one caller can ever win this.
    #[instrument(skip(self, conn))]
    pub async fn consume_coupon<C>(&self, conn: &C, coupon_id: Uuid) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let res = coupon::Entity::update_many()
            .col_expr(coupon::Column::IsUsed, Expr::value(true))
            .col_expr(coupon::Column::UpdatedAt, Expr::value(self.clock.now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::IsUsed.eq(false))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return match coupon::Entity::find_by_id(coupon_id).one(conn).await? {
                Some(_) => Err(ServiceError::AlreadyUsed(coupon_id)),
                None => Err(ServiceError::NotFound(format!("coupon {} not found", coupon_id))),
            };
        }
        Ok(())
    }

    #[instrument(skip(self, conn))]
    pub async fn restore_coupon<C>(&self, conn: &C, coupon_id: Uuid) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        let res = coupon::Entity::update_many()
            .col_expr(coupon::Column::IsUsed, Expr::value(false))
            .col_expr(coupon::Column::UpdatedAt, Expr::value(self.clock.now()))
            .filter(coupon::Column::Id.eq(coupon_id))
            .filter(coupon::Column::IsUsed.eq(true))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            warn!(%coupon_id, "Coupon missing or already unused, nothing to restore");
        }
        Ok(())
    }

    /// Marks the buyer's pending referral as rewarded and returns it.
    ///
    /// `None` when the buyer was never referred or the reward already fired.
    #[instrument(skip(self, conn))]
    pub async fn claim_referral<C>(
        &self,
        conn: &C,
        referred_user_id: Uuid,
    ) -> Result<Option<referral::Model>, ServiceError>
    where
        C: ConnectionTrait,
    {
        let Some(pending) = referral::Entity::find()
            .filter(referral::Column::ReferredUserId.eq(referred_user_id))
            .filter(referral::Column::IsUsed.eq(false))
            .one(conn)
            .await?
        else {
            return Ok(None);
        };

        let now = self.clock.now();
        let res = referral::Entity::update_many()
            .col_expr(referral::Column::IsUsed, Expr::value(true))
            .col_expr(referral::Column::UsedAt, Expr::value(Some(now)))
            .filter(referral::Column::Id.eq(pending.id))
            .filter(referral::Column::IsUsed.eq(false))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return Ok(None);
        }

        Ok(Some(referral::Model {
            is_used: true,
            used_at: Some(now),
            ..pending
        }))
    }

    pub async fn balance<C: ConnectionTrait>(&self, conn: &C, user_id: Uuid) -> Result<i64, ServiceError> {
        Ok(find_user(conn, user_id).await?.point_balance)
    }

    /// Ledger rows for a user, oldest first.
    pub async fn history<C: ConnectionTrait>(
        &self,
        conn: &C,
        user_id: Uuid,
    ) -> Result<Vec<point_history::Model>, ServiceError> {
        Ok(point_history::Entity::find()
            .filter(point_history::Column::UserId.eq(user_id))
            .order_by_asc(point_history::Column::CreatedAt)
            .all(conn)
            .await?)
    }

    #[instrument(skip(self, conn))]
    pub async fn audit<C: ConnectionTrait>(&self, conn: &C, user_id: Uuid) -> Result<PointAudit, ServiceError> {
        let balance = self.balance(conn, user_id).await?;
        let history = self.history(conn, user_id).await?;
        let audit = PointAudit {
            user_id,
            balance,
            history_total: history.iter().map(|h| h.delta).sum(),
            entries: history.len(),
        };
        if !audit.is_consistent() {
            warn!(%user_id, balance, history_total = audit.history_total, "Point balance drifted from its history");
        }
        Ok(audit)
    }
}

async fn find_user<C: ConnectionTrait>(conn: &C, user_id: Uuid) -> Result<user::Model, ServiceError> {
    user::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user {} not found", user_id)))
}
