use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

/// Why a transaction ended up canceled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CancellationReason {
    /// Buyer or admin asked for it.
    Requested,
    /// Payment proof never arrived before the deadline.
    PaymentWindowExpired,
}

/// Buyer-facing messages emitted after a settlement step commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    CheckoutCreated {
        transaction_id: Uuid,
        user_id: Uuid,
        event_id: Uuid,
        final_amount: i64,
        payment_deadline: DateTime<Utc>,
    },
    TicketsIssued {
        transaction_id: Uuid,
        user_id: Uuid,
        event_id: Uuid,
        seats: usize,
    },
    PaymentProofSubmitted {
        transaction_id: Uuid,
        user_id: Uuid,
    },
    PaymentConfirmed {
        transaction_id: Uuid,
        user_id: Uuid,
        bonus_points: i64,
    },
    TransactionCanceled {
        transaction_id: Uuid,
        user_id: Uuid,
        reason: CancellationReason,
    },
    ReferralRewarded {
        referrer_id: Uuid,
        referred_user_id: Uuid,
        points: i64,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::CheckoutCreated { .. } => "checkout_created",
            Notification::TicketsIssued { .. } => "tickets_issued",
            Notification::PaymentProofSubmitted { .. } => "payment_proof_submitted",
            Notification::PaymentConfirmed { .. } => "payment_confirmed",
            Notification::TransactionCanceled { .. } => "transaction_canceled",
            Notification::ReferralRewarded { .. } => "referral_rewarded",
        }
    }
}

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Notification channel closed")]
    ChannelClosed,
    #[error("Notification channel full")]
    ChannelFull,
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// Fire-and-forget delivery of buyer notifications (email, push, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError>;
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotificationSink;

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        info!(kind = notification.kind(), ?notification, "Notification");
        Ok(())
    }
}

/// Hands notifications to a bounded channel drained by a delivery worker.
///
/// Never waits for room in the channel; a full channel is a delivery error.
#[derive(Debug, Clone)]
pub struct ChannelNotificationSink {
    sender: mpsc::Sender<Notification>,
}

impl ChannelNotificationSink {
    pub fn new(sender: mpsc::Sender<Notification>) -> Self {
        Self { sender }
    }

    /// Creates a sink together with the receiving end of its channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl NotificationSink for ChannelNotificationSink {
    async fn notify(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sender.try_send(notification).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NotificationError::ChannelFull,
            mpsc::error::TrySendError::Closed(_) => NotificationError::ChannelClosed,
        })
    }
}

/// Feeds every queued notification to `deliver` until all senders are gone.
///
/// The returned handle resolves to the number of notifications delivered, so
/// awaiting it after dropping the sinks drains the queue completely.
pub fn spawn_delivery<F>(mut receiver: mpsc::Receiver<Notification>, deliver: F) -> JoinHandle<usize>
where
    F: Fn(&Notification) + Send + 'static,
{
    tokio::spawn(async move {
        let mut delivered = 0;
        while let Some(notification) = receiver.recv().await {
            deliver(&notification);
            delivered += 1;
        }
        delivered
    })
}

/// Sends and forgets. A failing sink is logged, never surfaced.
pub async fn dispatch(sink: &dyn NotificationSink, notification: Notification) {
    let kind = notification.kind();
    if let Err(e) = sink.notify(notification).await {
        warn!(error = %e, kind, "Failed to deliver notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn proof_submitted() -> Notification {
        Notification::PaymentProofSubmitted {
            transaction_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelNotificationSink::channel(4);
        let first = proof_submitted();
        let second = proof_submitted();
        sink.notify(first.clone()).await.unwrap();
        sink.notify(second.clone()).await.unwrap();
        assert_eq!(rx.recv().await, Some(first));
        assert_eq!(rx.recv().await, Some(second));
    }

    #[tokio::test]
    async fn full_or_closed_channel_is_an_error_not_a_stall() {
        let (sink, rx) = ChannelNotificationSink::channel(1);
        sink.notify(proof_submitted()).await.unwrap();
        assert_matches!(
            sink.notify(proof_submitted()).await,
            Err(NotificationError::ChannelFull)
        );
        drop(rx);
        assert_matches!(
            sink.notify(proof_submitted()).await,
            Err(NotificationError::ChannelClosed)
        );
        // Swallowed.
        dispatch(&sink, proof_submitted()).await;
    }

    #[tokio::test]
    async fn delivery_drains_the_queue_once_senders_drop() {
        let (sink, rx) = ChannelNotificationSink::channel(8);
        for _ in 0..3 {
            sink.notify(proof_submitted()).await.unwrap();
        }
        let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = seen.clone();
        let handle = spawn_delivery(rx, move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        drop(sink);
        let delivered = tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("delivery task should finish once the channel closes")
            .unwrap();
        assert_eq!(delivered, 3);
        assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 3);
    }

    #[test]
    fn serializes_with_type_tag() {
        let json = serde_json::to_value(Notification::TransactionCanceled {
            transaction_id: Uuid::nil(),
            user_id: Uuid::nil(),
            reason: CancellationReason::PaymentWindowExpired,
        })
        .unwrap();
        assert_eq!(json["type"], "transaction_canceled");
        assert_eq!(json["reason"], "payment_window_expired");
    }
}
