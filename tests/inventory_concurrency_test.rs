mod common;

use common::TestContext;
use futures::future::join_all;
use ticket_market::{entities::DiscountType, CartLine, CheckoutRequest, ErrorKind};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_seat_goes_to_exactly_one_buyer() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(15_000, 1).await;
    let alice = ctx.seed_user(0).await;
    let bob = ctx.seed_user(0).await;

    let attempts = [alice.id, bob.id].map(|user_id| {
        let core = ctx.core.clone();
        let request = CheckoutRequest::new(user_id, event.id, vec![CartLine::new(tier.id, 1)]);
        tokio::spawn(async move { core.create_checkout(request).await })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("checkout task panicked"))
        .collect();

    let won = results.iter().filter(|r| r.is_ok()).count();
    let lost: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();
    assert_eq!(won, 1);
    assert_eq!(lost.len(), 1);
    assert_eq!(lost[0].kind(), ErrorKind::InsufficientResource);
    assert_eq!(ctx.ticket(tier.id).await.available_seats, 0);
    assert_eq!(ctx.event(event.id).await.available_seats, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_buyers_never_oversell() {
    const SEATS: i32 = 5;
    const BUYERS: usize = 8;

    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(5_000, SEATS).await;

    let mut tasks = Vec::with_capacity(BUYERS);
    for _ in 0..BUYERS {
        let buyer = ctx.seed_user(0).await;
        let core = ctx.core.clone();
        let request = CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)]);
        tasks.push(tokio::spawn(async move { core.create_checkout(request).await.is_ok() }));
    }

    let successes = join_all(tasks)
        .await
        .into_iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();

    assert_eq!(successes, SEATS as usize);
    assert_eq!(ctx.ticket(tier.id).await.available_seats, 0);
    assert_eq!(ctx.event(event.id).await.available_seats, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_use_coupon_is_consumed_once() {
    let ctx = TestContext::new().await;
    let (event, tier) = ctx.seed_event_with_tier(10_000, 10).await;
    let buyer = ctx.seed_user(0).await;
    let coupon = ctx.seed_coupon(buyer.id, DiscountType::Flat, 4_000).await;

    let tasks = (0..3).map(|_| {
        let core = ctx.core.clone();
        let request = CheckoutRequest::new(buyer.id, event.id, vec![CartLine::new(tier.id, 1)])
            .with_coupon(coupon.id);
        tokio::spawn(async move { core.create_checkout(request).await })
    });
    let created: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .filter_map(|joined| joined.ok().and_then(Result::ok))
        .collect();

    let with_coupon = created
        .iter()
        .filter(|d| d.transaction.coupon_id == Some(coupon.id))
        .count();
    assert_eq!(with_coupon, 1);
    assert!(ctx.coupon(coupon.id).await.is_used);
}
