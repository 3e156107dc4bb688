//! Deterministic catalog and quote rules used by the sales tools.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

pub const DEFAULT_RELEASES_PER_YEAR: u32 = 12;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceTier {
    Basic,
    Professional,
    Premium,
}

impl ServiceTier {
    pub const ALL: [ServiceTier; 3] = [Self::Basic, Self::Professional, Self::Premium];

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "basic" => Some(Self::Basic),
            "professional" => Some(Self::Professional),
            "premium" => Some(Self::Premium),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Professional => "professional",
            Self::Premium => "premium",
        }
    }

    pub fn monthly_list_price(&self) -> Decimal {
        match self {
            Self::Basic => Decimal::new(1999, 2),
            Self::Professional => Decimal::new(4999, 2),
            Self::Premium => Decimal::new(9999, 2),
        }
    }

    pub fn yearly_list_price(&self) -> Decimal {
        match self {
            Self::Basic => Decimal::new(19999, 2),
            Self::Professional => Decimal::new(49999, 2),
            Self::Premium => Decimal::new(99999, 2),
        }
    }

    pub fn features(&self) -> &'static [&'static str] {
        match self {
            Self::Basic => &["Unlimited distribution", "Basic analytics", "Email support"],
            Self::Professional => {
                &["Everything in Basic", "Pre-saves", "Advanced analytics", "Priority support"]
            }
            Self::Premium => &[
                "Everything in Professional",
                "Marketing tools",
                "Automatic royalty splits",
                "Dedicated manager",
            ],
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPricing {
    pub tier: ServiceTier,
    pub monthly: Decimal,
    pub yearly: Decimal,
    pub features: Vec<String>,
}

pub fn list_pricing(tier: ServiceTier) -> TierPricing {
    TierPricing {
        tier,
        monthly: tier.monthly_list_price(),
        yearly: tier.yearly_list_price(),
        features: tier.features().iter().map(|feature| (*feature).to_string()).collect(),
    }
}

/// Volume discount as a fraction: more than 20 releases a year earns 15 %,
/// more than 10 earns 10 %.
pub fn volume_discount(num_releases: u32) -> Decimal {
    if num_releases > 20 {
        Decimal::new(15, 2)
    } else if num_releases > 10 {
        Decimal::new(10, 2)
    } else {
        Decimal::ZERO
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteStep {
    pub stage: String,
    pub amount: Decimal,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceQuote {
    pub tier: ServiceTier,
    pub num_releases: u32,
    pub artist_name: Option<String>,
    /// Percentage points, e.g. `15` for 15 %.
    pub discount_applied: Decimal,
    pub monthly_price: Decimal,
    pub yearly_price: Decimal,
    pub trace: Vec<QuoteStep>,
}

/// Prices a subscription: volume discount on the monthly list price, then a
/// flat 10 % prepay discount on twelve months.
pub fn quote(tier: ServiceTier, num_releases: u32, artist_name: Option<String>) -> ServiceQuote {
    let base = tier.monthly_list_price();
    let discount = volume_discount(num_releases);
    let discounted = base * (Decimal::ONE - discount);
    let yearly = discounted * Decimal::from(12) * Decimal::new(9, 1);

    ServiceQuote {
        tier,
        num_releases,
        artist_name,
        discount_applied: (discount * Decimal::from(100)).normalize(),
        monthly_price: round_money(discounted),
        yearly_price: round_money(yearly),
        trace: vec![
            QuoteStep { stage: "list_monthly".to_string(), amount: base },
            QuoteStep { stage: "volume_discounted".to_string(), amount: discounted },
            QuoteStep { stage: "annual_prepay".to_string(), amount: yearly },
        ],
    }
}

fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
