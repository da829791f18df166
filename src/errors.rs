use sea_orm::error::DbErr;
use serde::Serialize;
use uuid::Uuid;

use crate::services::pricing::PricingError;

/// Failure categories exposed to callers of the checkout core.
///
/// Every [`ServiceError`] maps onto exactly one kind; the presentation layer
/// only needs to branch on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    Unavailable,
    InsufficientResource,
    InvalidInput,
    Conflict,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unavailable: {0}")]
    Unavailable(String),

    #[error("Payment window for transaction {0} has closed")]
    PaymentWindowExpired(Uuid),

    #[error("Promotion {0} has no remaining uses")]
    UsageExhausted(Uuid),

    #[error("Coupon {0} has already been used")]
    AlreadyUsed(Uuid),

    #[error("Insufficient seats: {0}")]
    InsufficientSeats(String),

    #[error("Insufficient points: requested {requested}, available {available}")]
    InsufficientPoints { requested: i64, available: i64 },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(#[source] Box<ServiceError>),

    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl ServiceError {
    /// Maps the error onto the public failure taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unavailable(_)
            | Self::PaymentWindowExpired(_)
            | Self::UsageExhausted(_)
            | Self::AlreadyUsed(_) => ErrorKind::Unavailable,
            Self::InsufficientSeats(_) | Self::InsufficientPoints { .. } => {
                ErrorKind::InsufficientResource
            }
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::Conflict(_) => ErrorKind::Conflict,
            Self::DatabaseError(_)
            | Self::TransactionFailed(_)
            | Self::InvariantViolation(_)
            | Self::InternalError(_) => ErrorKind::Internal,
        }
    }

    /// Wraps a failure raised inside an atomic unit of work.
    ///
    /// Validation outcomes pass through untouched so the caller can act on
    /// them; anything internal becomes a generic `TransactionFailed` that
    /// still carries the cause for operators.
    pub fn inside_unit_of_work(self) -> Self {
        match self {
            Self::TransactionFailed(_) => self,
            other if other.kind() == ErrorKind::Internal => {
                Self::TransactionFailed(Box::new(other))
            }
            other => other,
        }
    }

    /// Message safe to show to an end user. Internal details never leak.
    pub fn response_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "The request could not be completed, please try again".to_string(),
            _ => match self {
                Self::PaymentWindowExpired(_) => {
                    "The payment window for this order has closed".to_string()
                }
                _ => self.to_string(),
            },
        }
    }
}

impl From<PricingError> for ServiceError {
    fn from(err: PricingError) -> Self {
        match err {
            PricingError::EmptyCart => ServiceError::InvalidInput(err.to_string()),
            PricingError::InvalidQuantity { .. } => ServiceError::InvalidInput(err.to_string()),
            PricingError::TicketNotFound(_) => ServiceError::NotFound(err.to_string()),
            PricingError::InsufficientSeats { .. } => {
                ServiceError::InsufficientSeats(err.to_string())
            }
        }
    }
}
