//! Value objects shared by the order, settlement and settings aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// The purchasing user.
    BuyerId
);
uuid_id!(
    /// An independent merchant; each seller's share of a checkout is its own order.
    SellerId
);
uuid_id!(ProductId);
uuid_id!(
    /// An ephemeral shopping cart.
    CartId
);

/// Amount in minor currency units (cents, paise).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn multiply(&self, quantity: u64) -> Money {
        Money(self.0 * quantity as i64)
    }

    /// Splits `self` across `weights` proportionally.
    ///
    /// Every share but the last is floored; the last absorbs the remainder, so
    /// the shares always sum to `self`. With all-zero weights everything lands
    /// on the last share.
    pub fn allocate(&self, weights: &[Money]) -> Vec<Money> {
        let Some(last) = weights.len().checked_sub(1) else {
            return Vec::new();
        };
        let total: i128 = weights.iter().map(|w| w.0 as i128).sum();

        let mut shares = Vec::with_capacity(weights.len());
        let mut allocated = 0i64;
        for weight in &weights[..last] {
            let share = if total == 0 {
                0
            } else {
                (self.0 as i128 * weight.0 as i128 / total) as i64
            };
            allocated += share;
            shares.push(Money(share));
        }
        shares.push(Money(self.0 - allocated));
        shares
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl std::ops::Add for Money {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Money(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Money {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Money(self.0 - rhs.0)
    }
}

impl std::ops::AddAssign for Money {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::iter::Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Self {
        iter.fold(Money::zero(), |acc, m| acc + m)
    }
}

/// Platform commission in basis points (`500` = 5.00%).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct FeeRate(u32);

impl FeeRate {
    pub const MAX_BPS: u32 = 10_000;

    /// `None` above 100%.
    pub fn from_bps(bps: u32) -> Option<Self> {
        (bps <= Self::MAX_BPS).then_some(Self(bps))
    }

    pub fn bps(&self) -> u32 {
        self.0
    }

    /// Fee on `amount`, rounded half up.
    pub fn fee_for(&self, amount: Money) -> Money {
        let scaled = amount.cents() as i128 * self.0 as i128;
        let half = Self::MAX_BPS as i128 / 2;
        Money::from_cents(((scaled + half) / Self::MAX_BPS as i128) as i64)
    }
}

impl std::fmt::Display for FeeRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{:02}%", self.0 / 100, self.0 % 100)
    }
}

/// One product line of an order.
///
/// Buyers purchase whole lots; stock is counted in units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: ProductId,
    pub lot_quantity: u32,
    /// Price of a single unit.
    pub unit_price: Money,
    pub lot_size: u32,
    pub line_total: Money,
    #[serde(default)]
    pub rated: bool,
}

impl LineItem {
    pub fn new(product_id: ProductId, lot_quantity: u32, lot_size: u32, unit_price: Money) -> Self {
        let units = lot_quantity as u64 * lot_size as u64;
        Self {
            product_id,
            lot_quantity,
            unit_price,
            lot_size,
            line_total: unit_price.multiply(units),
            rated: false,
        }
    }

    /// Units drawn from stock by this line.
    pub fn units(&self) -> u64 {
        self.lot_quantity as u64 * self.lot_size as u64
    }
}

/// Who performed an action recorded in an order's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Buyer(BuyerId),
    Seller(SellerId),
    Admin(String),
    Carrier,
    PaymentGateway,
    System,
}

impl Actor {
    pub fn actor_id(&self) -> String {
        match self {
            Actor::Buyer(id) => id.to_string(),
            Actor::Seller(id) => id.to_string(),
            Actor::Admin(id) => id.clone(),
            Actor::Carrier => "carrier".to_string(),
            Actor::PaymentGateway => "payment-gateway".to_string(),
            Actor::System => "system".to_string(),
        }
    }
}

/// Carrier booking recorded when an order ships.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentDetails {
    pub shipment_id: String,
    pub awb_code: String,
    pub courier_name: String,
    pub tracking_url: Option<String>,
    pub estimated_delivery: Option<DateTime<Utc>>,
}

/// Money owed back to the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundDue {
    pub amount: Money,
    pub payment_ref: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_total_counts_units_not_lots() {
        let line = LineItem::new(ProductId::new(), 2, 5, Money::from_cents(100));
        assert_eq!(line.units(), 10);
        assert_eq!(line.line_total, Money::from_cents(1000));
    }

    #[test]
    fn fee_rounds_half_up_and_nets_exactly() {
        let rate = FeeRate::from_bps(250).unwrap();
        // 2.5% of 1.10 = 0.0275
        assert_eq!(rate.fee_for(Money::from_cents(110)), Money::from_cents(3));
        // 2.5% of 1.00 = 0.025
        assert_eq!(rate.fee_for(Money::from_cents(100)), Money::from_cents(3));
        assert_eq!(rate.fee_for(Money::from_cents(99)), Money::from_cents(2));

        for cents in [0, 1, 999, 1000, 123_457] {
            let amount = Money::from_cents(cents);
            let fee = rate.fee_for(amount);
            assert_eq!((amount - fee) + fee, amount);
            assert!(fee <= amount);
        }
    }

    #[test]
    fn fee_rate_is_capped() {
        assert!(FeeRate::from_bps(10_001).is_none());
        assert_eq!(FeeRate::from_bps(500).unwrap().to_string(), "5.00%");
    }

    #[test]
    fn allocation_is_proportional_and_exact() {
        let shares = Money::from_cents(100).allocate(&[
            Money::from_cents(1000),
            Money::from_cents(1000),
            Money::from_cents(1000),
        ]);
        assert_eq!(
            shares,
            vec![
                Money::from_cents(33),
                Money::from_cents(33),
                Money::from_cents(34)
            ]
        );

        let shares = Money::from_cents(500).allocate(&[Money::from_cents(300), Money::from_cents(100)]);
        assert_eq!(shares, vec![Money::from_cents(375), Money::from_cents(125)]);
    }

    #[test]
    fn allocation_edge_cases() {
        assert!(Money::from_cents(10).allocate(&[]).is_empty());
        assert_eq!(
            Money::from_cents(10).allocate(&[Money::zero(), Money::zero()]),
            vec![Money::zero(), Money::from_cents(10)]
        );
    }

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(1234).to_string(), "12.34");
        assert_eq!(Money::from_cents(5).to_string(), "0.05");
        assert_eq!(Money::from_cents(-1234).to_string(), "-12.34");
    }

    #[test]
    fn actor_ids() {
        let buyer = BuyerId::new();
        assert_eq!(Actor::Buyer(buyer).actor_id(), buyer.to_string());
        assert_eq!(Actor::System.actor_id(), "system");
    }
}
