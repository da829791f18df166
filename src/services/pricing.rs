//! Pure checkout pricing.
//!
//! Nothing in this module touches the store or the clock; every input,
//! including the instant used to judge promotion and coupon windows, is
//! passed in. Identical inputs always produce an identical [`PricedQuote`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use crate::entities::{coupon, promotion, ticket, DiscountType};

/// Share of the pre-discount total that points may cover, in percent.
pub const MAX_POINTS_SHARE_PERCENT: i64 = 50;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PricingError {
    #[error("cart has no lines")]
    EmptyCart,
    #[error("invalid quantity {quantity} for ticket {ticket_id}")]
    InvalidQuantity { ticket_id: Uuid, quantity: i32 },
    #[error("ticket {0} not found for this event")]
    TicketNotFound(Uuid),
    #[error("ticket {ticket_id} has {available} seats left, {requested} requested")]
    InsufficientSeats {
        ticket_id: Uuid,
        requested: i32,
        available: i32,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub ticket_id: Uuid,
    pub quantity: i32,
}

impl CartLine {
    pub fn new(ticket_id: Uuid, quantity: i32) -> Self {
        Self {
            ticket_id,
            quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketSnapshot {
    pub id: Uuid,
    pub name: String,
    pub unit_price: i64,
    pub available_seats: i32,
}

impl From<&ticket::Model> for TicketSnapshot {
    fn from(model: &ticket::Model) -> Self {
        Self {
            id: model.id,
            name: model.name.clone(),
            unit_price: model.price,
            available_seats: model.available_seats,
        }
    }
}

/// Tiers of one event as read at quote time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogSnapshot {
    pub event_id: Uuid,
    tickets: HashMap<Uuid, TicketSnapshot>,
}

impl CatalogSnapshot {
    pub fn new(event_id: Uuid, tickets: impl IntoIterator<Item = TicketSnapshot>) -> Self {
        Self {
            event_id,
            tickets: tickets.into_iter().map(|t| (t.id, t)).collect(),
        }
    }

    pub fn from_models(event_id: Uuid, models: &[ticket::Model]) -> Self {
        Self::new(
            event_id,
            models
                .iter()
                .filter(|m| m.event_id == event_id)
                .map(TicketSnapshot::from),
        )
    }

    pub fn get(&self, ticket_id: &Uuid) -> Option<&TicketSnapshot> {
        self.tickets.get(ticket_id)
    }

    pub fn len(&self) -> usize {
        self.tickets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tickets.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountSource {
    Promotion,
    Coupon,
    Points,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedDiscount {
    pub source: DiscountSource,
    /// Promotion or coupon id; `None` for points.
    pub reference_id: Option<Uuid>,
    pub code: Option<String>,
    pub amount: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedLine {
    pub ticket_id: Uuid,
    pub ticket_name: String,
    pub unit_price: i64,
    pub quantity: i32,
    pub subtotal: i64,
    /// Whether the tier could cover every seat the cart asks for.
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedQuote {
    pub event_id: Uuid,
    pub lines: Vec<PricedLine>,
    pub total_amount: i64,
    pub discounts: Vec<AppliedDiscount>,
    pub points_used: i64,
    pub final_amount: i64,
    /// Advisory; seats are re-checked atomically at commit.
    pub all_available: bool,
}

impl PricedQuote {
    fn discount_from(&self, source: DiscountSource) -> Option<&AppliedDiscount> {
        self.discounts.iter().find(|d| d.source == source)
    }

    pub fn promotion(&self) -> Option<&AppliedDiscount> {
        self.discount_from(DiscountSource::Promotion)
    }

    pub fn coupon(&self) -> Option<&AppliedDiscount> {
        self.discount_from(DiscountSource::Coupon)
    }

    pub fn promotion_discount(&self) -> i64 {
        self.promotion().map_or(0, |d| d.amount)
    }

    pub fn coupon_discount(&self) -> i64 {
        self.coupon().map_or(0, |d| d.amount)
    }

    pub fn seat_count(&self) -> i64 {
        self.lines.iter().map(|l| i64::from(l.quantity)).sum()
    }

    /// Fails on the first tier that cannot cover its requested seats.
    pub fn ensure_available(&self, catalog: &CatalogSnapshot) -> Result<(), PricingError> {
        if self.all_available {
            return Ok(());
        }
        let requested = requested_per_ticket(self.lines.iter().map(|l| (l.ticket_id, l.quantity)));
        match self.lines.iter().find(|l| !l.available) {
            Some(line) => Err(PricingError::InsufficientSeats {
                ticket_id: line.ticket_id,
                requested: requested.get(&line.ticket_id).copied().unwrap_or(line.quantity),
                available: catalog
                    .get(&line.ticket_id)
                    .map_or(0, |t| t.available_seats),
            }),
            None => Ok(()),
        }
    }
}

/// Everything the engine needs to price one cart.
#[derive(Debug, Clone, Copy)]
pub struct PricingRequest<'a> {
    pub user_id: Uuid,
    pub cart: &'a [CartLine],
    pub catalog: &'a CatalogSnapshot,
    pub promotion: Option<&'a promotion::Model>,
    pub coupon: Option<&'a coupon::Model>,
    pub points_requested: i64,
    pub point_balance: i64,
    pub now: DateTime<Utc>,
}

/// Prices a cart. Inapplicable promotions and coupons are ignored, not errors.
pub fn price(request: &PricingRequest<'_>) -> Result<PricedQuote, PricingError> {
    if request.cart.is_empty() {
        return Err(PricingError::EmptyCart);
    }

    let requested = requested_per_ticket(request.cart.iter().map(|l| (l.ticket_id, l.quantity)));

    let mut lines = Vec::with_capacity(request.cart.len());
    for line in request.cart {
        if line.quantity <= 0 {
            return Err(PricingError::InvalidQuantity {
                ticket_id: line.ticket_id,
                quantity: line.quantity,
            });
        }
        let tier = request
            .catalog
            .get(&line.ticket_id)
            .ok_or(PricingError::TicketNotFound(line.ticket_id))?;
        let wanted = requested.get(&line.ticket_id).copied().unwrap_or(line.quantity);
        lines.push(PricedLine {
            ticket_id: tier.id,
            ticket_name: tier.name.clone(),
            unit_price: tier.unit_price,
            quantity: line.quantity,
            subtotal: tier.unit_price.saturating_mul(i64::from(line.quantity)),
            available: wanted <= tier.available_seats,
        });
    }

    let total_amount = lines
        .iter()
        .fold(0i64, |acc, l| acc.saturating_add(l.subtotal));
    let mut running = total_amount;
    let mut discounts = Vec::new();

    if let Some(promo) = request
        .promotion
        .filter(|p| promotion_applies(p, request.catalog.event_id, request.now))
    {
        let amount = discount_amount(promo.discount_type, promo.discount, total_amount, running);
        running -= amount;
        discounts.push(AppliedDiscount {
            source: DiscountSource::Promotion,
            reference_id: Some(promo.id),
            code: Some(promo.code.clone()),
            amount,
        });
    }

    if let Some(cpn) = request
        .coupon
        .filter(|c| c.is_redeemable_by(request.user_id, request.catalog.event_id, request.now))
    {
        let amount = discount_amount(cpn.discount_type, cpn.discount, running, running);
        running -= amount;
        discounts.push(AppliedDiscount {
            source: DiscountSource::Coupon,
            reference_id: Some(cpn.id),
            code: Some(cpn.code.clone()),
            amount,
        });
    }

    let points_used = points_usable(total_amount, request.point_balance, request.points_requested);
    if points_used > 0 {
        discounts.push(AppliedDiscount {
            source: DiscountSource::Points,
            reference_id: None,
            code: None,
            amount: points_used,
        });
    }

    let final_amount = (running - points_used).max(0);
    let all_available = lines.iter().all(|l| l.available);

    Ok(PricedQuote {
        event_id: request.catalog.event_id,
        lines,
        total_amount,
        discounts,
        points_used,
        final_amount,
        all_available,
    })
}

/// Event match, active window and remaining uses.
pub fn promotion_applies(promo: &promotion::Model, event_id: Uuid, now: DateTime<Utc>) -> bool {
    promo.applies_to_event(event_id) && promo.is_active_at(now) && promo.has_remaining_uses()
}

/// Points that may be spent: capped by the balance and by half of the
/// pre-discount total.
pub fn points_usable(total_amount: i64, balance: i64, requested: i64) -> i64 {
    let cap = balance
        .max(0)
        .min(floor_percent(total_amount, MAX_POINTS_SHARE_PERCENT));
    requested.max(0).min(cap)
}

/// Floor of `pct` percent of `amount`, computed wide so huge carts cannot overflow.
pub fn floor_percent(amount: i64, pct: i64) -> i64 {
    let share = i128::from(amount.max(0)) * i128::from(pct.max(0)) / 100;
    i64::try_from(share).unwrap_or(i64::MAX)
}

/// Percentage discounts floor. The result never exceeds `running`.
fn discount_amount(kind: DiscountType, value: i64, base: i64, running: i64) -> i64 {
    let raw = match kind {
        DiscountType::Percentage => {
            let pct = i128::from(value.clamp(0, 100));
            (i128::from(base.max(0)) * pct / 100) as i64
        }
        DiscountType::Flat => value.max(0),
    };
    raw.min(running.max(0))
}

fn requested_per_ticket(lines: impl Iterator<Item = (Uuid, i32)>) -> HashMap<Uuid, i32> {
    let mut totals: HashMap<Uuid, i32> = HashMap::new();
    for (ticket_id, quantity) in lines {
        let entry = totals.entry(ticket_id).or_insert(0);
        *entry = entry.saturating_add(quantity.max(0));
    }
    totals
}
