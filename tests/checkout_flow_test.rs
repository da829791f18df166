mod common;

use assert_matches::assert_matches;
use chrono::Duration;
use common::TestContext;
use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set};
use ticket_market::{
    entities::{attendee, event, promotion, ticket_transaction, DiscountType, TransactionStatus},
    notifications::Notification,
    CartLine, CheckoutRequest, ErrorKind, ServiceError,
};
use uuid::Uuid;

#[tokio::test]
async fn free_order_is_settled_and_fulfilled_in_the_same_commit() {
    let mut ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(100_000, 10).await;
    let buyer = ctx.seed_user(200_000).await;
    let coupon = ctx.seed_coupon(buyer.id, DiscountType::Flat, 100_000).await;

    let request = CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)])
        .with_coupon(coupon.id);

    let quote = ctx.core.quote_checkout(&request).await.unwrap();
    assert_eq!(quote.total_amount, 100_000);
    assert_eq!(quote.coupon_discount(), 100_000);
    assert_eq!(quote.final_amount, 0);

    let details = ctx.core.create_checkout(request).await.unwrap();
    assert_eq!(details.status(), TransactionStatus::Done);
    assert_eq!(details.transaction.final_amount, 0);
    assert!(details.transaction.confirmed_at.is_some());
    assert_eq!(details.attendees.len(), 1);
    assert_eq!(details.attendees[0].ticket_type, "Regular");

    // No points requested, so only the 10% bonus moves the balance.
    assert_eq!(ctx.user(buyer.id).await.point_balance, 210_000);
    assert!(ctx.coupon(coupon.id).await.is_used);
    assert_eq!(ctx.ticket(tier.id).await.available_seats, 9);

    let notes = ctx.drain_notifications();
    assert!(notes.iter().any(|n| matches!(n, Notification::CheckoutCreated { final_amount: 0, .. })));
    assert!(notes.iter().any(|n| matches!(n, Notification::TicketsIssued { seats: 1, .. })));
}

#[tokio::test]
async fn paid_checkout_reserves_seats_and_consumes_discounts() {
    let ctx = TestContext::new().await;
    let event = ctx.seed_event(50).await;
    let vip = ctx.seed_ticket(event.id, "VIP", 50_000, 10).await;
    let regular = ctx.seed_ticket(event.id, "Regular", 20_000, 40).await;
    let buyer = ctx.seed_user(30_000).await;
    let promo = ctx
        .seed_promotion(Some(event.id), "EARLY10", DiscountType::Percentage, 10, 5)
        .await;
    let coupon = ctx.seed_coupon(buyer.id, DiscountType::Flat, 5_000).await;

    let request = CheckoutRequest::new(
        buyer.id,
        event.id,
        vec![CartLine::new(vip.id, 1), CartLine::new(regular.id, 2)],
    )
    .with_promotion_code("EARLY10")
    .with_coupon(coupon.id)
    .with_points(25_000);

    let details = ctx.core.create_checkout(request).await.unwrap();
    let txn = &details.transaction;

    // 90_000 total, 9_000 promotion, 5_000 coupon, 25_000 points.
    assert_eq!(txn.total_amount, 90_000);
    assert_eq!(txn.promotion_discount, 9_000);
    assert_eq!(txn.promotion_code.as_deref(), Some("EARLY10"));
    assert_eq!(txn.coupon_discount, 5_000);
    assert_eq!(txn.points_used, 25_000);
    assert_eq!(txn.final_amount, 51_000);
    assert_eq!(txn.status, TransactionStatus::WaitingForPayment);
    assert_eq!(txn.payment_deadline, ctx.now() + Duration::hours(24));
    assert!(details.attendees.is_empty());
    assert_eq!(details.items.len(), 2);
    assert_eq!(details.seat_count(), 3);

    assert_eq!(ctx.ticket(vip.id).await.available_seats, 9);
    assert_eq!(ctx.ticket(regular.id).await.available_seats, 38);
    assert_eq!(ctx.event(event.id).await.available_seats, 47);
    assert_eq!(ctx.user(buyer.id).await.point_balance, 5_000);
    assert_eq!(ctx.promotion(promo.id).await.used_count, 1);
    assert!(ctx.coupon(coupon.id).await.is_used);

    let audit = ctx.core.audit_points(buyer.id).await.unwrap();
    assert!(audit.is_consistent());
}

#[tokio::test]
async fn line_prices_are_snapshotted() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let buyer = ctx.seed_user(0).await;

    let details = ctx
        .core
        .create_checkout(CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 2)]))
        .await
        .unwrap();

    let mut repriced: ticket_market::entities::ticket::ActiveModel = ctx.ticket(tier.id).await.into();
    repriced.price = Set(99_999);
    repriced.update(&*ctx.db).await.unwrap();

    let reloaded = ctx.core.get_transaction(details.id()).await.unwrap();
    assert_eq!(reloaded.items[0].unit_price, 10_000);
    assert_eq!(reloaded.items[0].line_total(), 20_000);
}

#[tokio::test]
async fn expired_promotion_is_ignored_not_rejected() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let buyer = ctx.seed_user(0).await;
    let promo = ctx
        .seed_promotion(None, "SUMMER", DiscountType::Flat, 2_000, 10)
        .await;
    let mut expired: promotion::ActiveModel = promo.clone().into();
    expired.end_date = Set(ctx.now() - Duration::hours(1));
    expired.update(&*ctx.db).await.unwrap();

    let details = ctx
        .core
        .create_checkout(
            CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)])
                .with_promotion_code("SUMMER"),
        )
        .await
        .unwrap();

    assert_eq!(details.transaction.promotion_discount, 0);
    assert_eq!(details.transaction.promotion_id, None);
    assert_eq!(details.transaction.final_amount, 10_000);
    assert_eq!(ctx.promotion(promo.id).await.used_count, 0);
}

#[tokio::test]
async fn unknown_codes_and_foreign_coupons_are_ignored() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let buyer = ctx.seed_user(0).await;
    let stranger = ctx.seed_user(0).await;
    let foreign = ctx.seed_coupon(stranger.id, DiscountType::Flat, 5_000).await;

    let details = ctx
        .core
        .create_checkout(
            CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)])
                .with_promotion_code("NOPE")
                .with_coupon(foreign.id),
        )
        .await
        .unwrap();

    assert_eq!(details.transaction.final_amount, 10_000);
    assert!(!ctx.coupon(foreign.id).await.is_used);
}

#[tokio::test]
async fn event_must_exist_be_active_and_not_started() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let buyer = ctx.seed_user(0).await;
    let cart = vec![CartLine::new(tier.id, 1)];

    let missing = ctx
        .core
        .create_checkout(CheckoutRequest::new(buyer.id, Uuid::new_v4(), cart.clone()))
        .await
        .unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::NotFound);

    let mut inactive: event::ActiveModel = event.clone().into();
    inactive.is_active = Set(false);
    inactive.update(&*ctx.db).await.unwrap();
    let err = ctx
        .core
        .create_checkout(CheckoutRequest::new(buyer.id, event.id, cart.clone()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);

    let mut reopened: event::ActiveModel = ctx.event(event.id).await.into();
    reopened.is_active = Set(true);
    reopened.update(&*ctx.db).await.unwrap();
    ctx.clock.advance(Duration::days(8));
    let err = ctx
        .core
        .quote_checkout(&CheckoutRequest::new(buyer.id, event.id, cart))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Unavailable);
}

#[tokio::test]
async fn invalid_carts_are_rejected_before_any_write() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 2).await;
    let buyer = ctx.seed_user(0).await;

    let empty = ctx
        .core
        .create_checkout(CheckoutRequest::new(buyer.id, event.id, vec![]))
        .await
        .unwrap_err();
    assert_eq!(empty.kind(), ErrorKind::InvalidInput);

    let zero = ctx
        .core
        .create_checkout(CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 0)]))
        .await
        .unwrap_err();
    assert_eq!(zero.kind(), ErrorKind::InvalidInput);

    let unknown = ctx
        .core
        .create_checkout(CheckoutRequest::new(
            buyer.id,
            event.id,
            vec![CartLine::new(Uuid::new_v4(), 1)],
        ))
        .await
        .unwrap_err();
    assert_eq!(unknown.kind(), ErrorKind::NotFound);

    let too_many = ctx
        .core
        .create_checkout(CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 3)]))
        .await
        .unwrap_err();
    assert_matches!(too_many, ServiceError::InsufficientSeats(_));

    assert_eq!(ctx.ticket(tier.id).await.available_seats, 2);
    assert_eq!(
        ticket_transaction::Entity::find().count(&*ctx.db).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn failed_reservation_inside_the_unit_leaves_no_trace() {
    let ctx = TestContext::new().await;
    // The tier has room, the event does not.
    let event = ctx.seed_event(1).await;
    let tier = ctx.seed_ticket(event.id, "Regular", 10_000, 5).await;
    let buyer = ctx.seed_user(10_000).await;
    let coupon = ctx.seed_coupon(buyer.id, DiscountType::Flat, 1_000).await;

    let err = ctx
        .core
        .create_checkout(
            CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 2)])
                .with_coupon(coupon.id)
                .with_points(5_000),
        )
        .await
        .unwrap_err();
    assert_matches!(err, ServiceError::InsufficientSeats(_));

    assert_eq!(ctx.ticket(tier.id).await.available_seats, 5);
    assert_eq!(ctx.event(event.id).await.available_seats, 1);
    assert_eq!(ctx.user(buyer.id).await.point_balance, 10_000);
    assert!(!ctx.coupon(coupon.id).await.is_used);
    assert_eq!(
        ticket_transaction::Entity::find().count(&*ctx.db).await.unwrap(),
        0
    );
    assert_eq!(attendee::Entity::find().count(&*ctx.db).await.unwrap(), 0);
}

#[tokio::test]
async fn exhausted_promotion_is_not_applied() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let promo = ctx
        .seed_promotion(Some(event.id), "ONCE", DiscountType::Flat, 1_000, 1)
        .await;

    let first = ctx.seed_user(0).await;
    let second = ctx.seed_user(0).await;
    for buyer in [&first, &second] {
        ctx.core
            .create_checkout(
                CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)])
                    .with_promotion_code("ONCE"),
            )
            .await
            .unwrap();
    }

    let txns = ctx.core.list_user_transactions(second.id).await.unwrap();
    assert_eq!(txns.len(), 1);
    assert_eq!(txns[0].promotion_discount, 0);
    assert_eq!(ctx.promotion(promo.id).await.used_count, 1);
}

#[tokio::test]
async fn stale_event_promotion_falls_back_to_the_sitewide_code() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let buyer = ctx.seed_user(0).await;
    let scoped = ctx
        .seed_promotion(Some(event.id), "WEEKEND", DiscountType::Flat, 5_000, 10)
        .await;
    let mut stale: promotion::ActiveModel = scoped.clone().into();
    stale.end_date = Set(ctx.now() - Duration::hours(1));
    stale.update(&*ctx.db).await.unwrap();
    let sitewide = ctx
        .seed_promotion(None, "WEEKEND", DiscountType::Flat, 1_500, 10)
        .await;

    let details = ctx
        .core
        .create_checkout(
            CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)])
                .with_promotion_code("WEEKEND"),
        )
        .await
        .unwrap();

    assert_eq!(details.transaction.promotion_id, Some(sitewide.id));
    assert_eq!(details.transaction.promotion_discount, 1_500);
    assert_eq!(details.transaction.final_amount, 8_500);
    assert_eq!(ctx.promotion(sitewide.id).await.used_count, 1);
    assert_eq!(ctx.promotion(scoped.id).await.used_count, 0);
}
