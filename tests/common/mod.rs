#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use ticket_market::{
    clock::{Clock, ManualClock},
    db::{self, DbConfig, DbPool},
    entities::{coupon, event, point_history, promotion, referral, ticket, user, DiscountType},
    notifications::{ChannelNotificationSink, Notification, NotificationSink},
    services::checkout::SettlementPolicy,
    TicketingCore,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Harness backed by a fresh in-memory SQLite database and a manual clock.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub clock: Arc<ManualClock>,
    pub core: TicketingCore,
    notifications: Option<mpsc::Receiver<Notification>>,
}

impl TestContext {
    pub async fn new() -> Self {
        let (sink, rx) = ChannelNotificationSink::channel(1024);
        let mut ctx = Self::with_notifier(Arc::new(sink)).await;
        ctx.notifications = Some(rx);
        ctx
    }

    pub async fn with_notifier(notifier: Arc<dyn NotificationSink>) -> Self {
        let pool = db::establish_connection_with_config(&DbConfig::in_memory_sqlite())
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to migrate test database");
        let db = Arc::new(pool);

        let start = Utc.with_ymd_and_hms(2030, 3, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let core = TicketingCore::new(
            db.clone(),
            clock.clone(),
            notifier,
            SettlementPolicy::default(),
            100,
        );

        Self {
            db,
            clock,
            core,
            notifications: None,
        }
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }

    /// Everything delivered to the channel sink so far.
    pub fn drain_notifications(&mut self) -> Vec<Notification> {
        let mut out = Vec::new();
        if let Some(rx) = self.notifications.as_mut() {
            while let Ok(n) = rx.try_recv() {
                out.push(n);
            }
        }
        out
    }

    /// Event starting in a week with the given total seat count.
    pub async fn seed_event(&self, total_seats: i32) -> event::Model {
        let now = self.now();
        event::ActiveModel {
            id: Set(Uuid::new_v4()),
            organizer_id: Set(Uuid::new_v4()),
            name: Set("Jazz Night".into()),
            location: Set("Riverside Hall".into()),
            start_time: Set(now + Duration::days(7)),
            end_time: Set(now + Duration::days(7) + Duration::hours(4)),
            total_seats: Set(total_seats),
            available_seats: Set(total_seats),
            is_active: Set(true),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed event")
    }

    pub async fn seed_ticket(&self, event_id: Uuid, name: &str, price: i64, seats: i32) -> ticket::Model {
        let now = self.now();
        ticket::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id),
            name: Set(name.into()),
            price: Set(price),
            total_seats: Set(seats),
            available_seats: Set(seats),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed ticket")
    }

    /// Event with a single tier covering all of its seats.
    pub async fn seed_event_with_tier(&self, price: i64, seats: i32) -> (event::Model, ticket::Model) {
        let event = self.seed_event(seats).await;
        let tier = self.seed_ticket(event.id, "Regular", price, seats).await;
        (event, tier)
    }

    /// User whose opening balance is backed by a history row.
    pub async fn seed_user(&self, points: i64) -> user::Model {
        let now = self.now();
        let id = Uuid::new_v4();
        let model = user::ActiveModel {
            id: Set(id),
            name: Set("Ada".into()),
            email: Set(format!("{}@example.com", id.simple())),
            point_balance: Set(points),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed user");

        if points != 0 {
            point_history::ActiveModel {
                id: Set(Uuid::new_v4()),
                user_id: Set(id),
                delta: Set(points),
                description: Set("Opening balance".into()),
                transaction_id: Set(None),
                created_at: Set(now),
            }
            .insert(&*self.db)
            .await
            .expect("seed opening balance");
        }
        model
    }

    pub async fn seed_promotion(
        &self,
        event_id: Option<Uuid>,
        code: &str,
        discount_type: DiscountType,
        discount: i64,
        max_uses: i32,
    ) -> promotion::Model {
        let now = self.now();
        promotion::ActiveModel {
            id: Set(Uuid::new_v4()),
            event_id: Set(event_id),
            code: Set(code.into()),
            discount_type: Set(discount_type),
            discount: Set(discount),
            start_date: Set(now - Duration::days(1)),
            end_date: Set(now + Duration::days(3)),
            max_uses: Set(max_uses),
            used_count: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed promotion")
    }

    pub async fn seed_coupon(&self, user_id: Uuid, discount_type: DiscountType, discount: i64) -> coupon::Model {
        let now = self.now();
        coupon::ActiveModel {
            id: Set(Uuid::new_v4()),
            user_id: Set(user_id),
            event_id: Set(None),
            code: Set(format!("CPN-{}", &Uuid::new_v4().simple().to_string()[..8])),
            discount_type: Set(discount_type),
            discount: Set(discount),
            is_used: Set(false),
            expires_at: Set(now + Duration::days(30)),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.db)
        .await
        .expect("seed coupon")
    }

    pub async fn seed_referral(&self, referrer_id: Uuid, referred_user_id: Uuid) -> referral::Model {
        referral::ActiveModel {
            id: Set(Uuid::new_v4()),
            referrer_id: Set(referrer_id),
            referred_user_id: Set(referred_user_id),
            is_used: Set(false),
            used_at: Set(None),
            created_at: Set(self.now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed referral")
    }

    pub async fn ticket(&self, id: Uuid) -> ticket::Model {
        ticket::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load ticket")
            .expect("ticket exists")
    }

    pub async fn event(&self, id: Uuid) -> event::Model {
        event::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load event")
            .expect("event exists")
    }

    pub async fn user(&self, id: Uuid) -> user::Model {
        user::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load user")
            .expect("user exists")
    }

    pub async fn promotion(&self, id: Uuid) -> promotion::Model {
        promotion::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load promotion")
            .expect("promotion exists")
    }

    pub async fn coupon(&self, id: Uuid) -> coupon::Model {
        coupon::Entity::find_by_id(id)
            .one(&*self.db)
            .await
            .expect("load coupon")
            .expect("coupon exists")
    }

    pub async fn referral_of(&self, referred_user_id: Uuid) -> referral::Model {
        referral::Entity::find()
            .filter(referral::Column::ReferredUserId.eq(referred_user_id))
            .one(&*self.db)
            .await
            .expect("load referral")
            .expect("referral exists")
    }
}
