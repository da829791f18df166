use crate::{
    clock::Clock,
    entities::{event, ticket},
    errors::ServiceError,
};
use sea_orm::{
    sea_query::Expr, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use uuid::Uuid;

/// Owns the tier and event seat counters.
///
/// Every mutation is a guarded `UPDATE` so the availability check and the
/// decrement happen in one statement. Callers pass the connection of the
/// unit of work they are running in.
#[derive(Clone)]
pub struct InventoryLedger {
    clock: Arc<dyn Clock>,
}

impl InventoryLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Takes `quantity` seats from the tier and from its event.
    #[instrument(skip(self, conn))]
    pub async fn reserve<C>(&self, conn: &C, ticket_id: Uuid, quantity: i32) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "reservation quantity must be positive, got {}",
                quantity
            )));
        }
        let tier = find_ticket(conn, ticket_id).await?;
        let now = self.clock.now();

        let res = ticket::Entity::update_many()
            .col_expr(
                ticket::Column::AvailableSeats,
                Expr::col(ticket::Column::AvailableSeats).sub(quantity),
            )
            .col_expr(ticket::Column::UpdatedAt, Expr::value(now))
            .filter(ticket::Column::Id.eq(ticket_id))
            .filter(ticket::Column::AvailableSeats.gte(quantity))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            let available = find_ticket(conn, ticket_id).await?.available_seats;
            return Err(ServiceError::InsufficientSeats(format!(
                "ticket {} has {} seats left, {} requested",
                ticket_id, available, quantity
            )));
        }

        let res = event::Entity::update_many()
            .col_expr(
                event::Column::AvailableSeats,
                Expr::col(event::Column::AvailableSeats).sub(quantity),
            )
            .col_expr(event::Column::UpdatedAt, Expr::value(now))
            .filter(event::Column::Id.eq(tier.event_id))
            .filter(event::Column::AvailableSeats.gte(quantity))
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            return Err(ServiceError::InsufficientSeats(format!(
                "event {} cannot seat {} more",
                tier.event_id, quantity
            )));
        }

        debug!(%ticket_id, event_id = %tier.event_id, quantity, "Seats reserved");
        Ok(())
    }

    /// Returns `quantity` seats to the tier and its event.
    ///
    /// Releasing past `total_seats` means the books are already wrong and is
    /// reported as an invariant violation.
    #[instrument(skip(self, conn))]
    pub async fn release<C>(&self, conn: &C, ticket_id: Uuid, quantity: i32) -> Result<(), ServiceError>
    where
        C: ConnectionTrait,
    {
        if quantity <= 0 {
            return Err(ServiceError::InvalidInput(format!(
                "release quantity must be positive, got {}",
                quantity
            )));
        }
        let tier = find_ticket(conn, ticket_id).await?;
        let now = self.clock.now();

        let res = ticket::Entity::update_many()
            .col_expr(
                ticket::Column::AvailableSeats,
                Expr::col(ticket::Column::AvailableSeats).add(quantity),
            )
            .col_expr(ticket::Column::UpdatedAt, Expr::value(now))
            .filter(ticket::Column::Id.eq(ticket_id))
            .filter(
                Expr::col(ticket::Column::AvailableSeats)
                    .lte(Expr::col(ticket::Column::TotalSeats).sub(quantity)),
            )
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            error!(%ticket_id, quantity, available = tier.available_seats, total = tier.total_seats, "Release would exceed tier capacity");
            return Err(ServiceError::InvariantViolation(format!(
                "releasing {} seats would push ticket {} above its capacity",
                quantity, ticket_id
            )));
        }

        let res = event::Entity::update_many()
            .col_expr(
                event::Column::AvailableSeats,
                Expr::col(event::Column::AvailableSeats).add(quantity),
            )
            .col_expr(event::Column::UpdatedAt, Expr::value(now))
            .filter(event::Column::Id.eq(tier.event_id))
            .filter(
                Expr::col(event::Column::AvailableSeats)
                    .lte(Expr::col(event::Column::TotalSeats).sub(quantity)),
            )
            .exec(conn)
            .await?;
        if res.rows_affected == 0 {
            error!(event_id = %tier.event_id, quantity, "Release would exceed event capacity");
            return Err(ServiceError::InvariantViolation(format!(
                "releasing {} seats would push event {} above its capacity",
                quantity, tier.event_id
            )));
        }

        debug!(%ticket_id, event_id = %tier.event_id, quantity, "Seats released");
        Ok(())
    }
}

async fn find_ticket<C: ConnectionTrait>(conn: &C, ticket_id: Uuid) -> Result<ticket::Model, ServiceError> {
    ticket::Entity::find_by_id(ticket_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("ticket {} not found", ticket_id)))
}
