use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::{ThrottlerError, ThrottlerResult};

/// One window/budget pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    #[serde(alias = "window_seconds")]
    #[validate(range(min = 1, message = "window must be at least one second"))]
    pub window_seconds: u64,
    #[serde(alias = "point_budget")]
    #[validate(range(min = 1, message = "point budget must be positive"))]
    pub point_budget: u64,
}

impl Tier {
    /// Create a validated tier
    pub fn new(window_seconds: u64, point_budget: u64) -> ThrottlerResult<Self> {
        let tier = Self {
            window_seconds,
            point_budget,
        };
        tier.validate()?;
        Ok(tier)
    }

    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window_seconds)
            .unwrap_or(i64::MAX)
            .saturating_mul(1_000)
    }

    /// Lower bound (inclusive) of the window ending at `now_ms`
    pub fn since(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.window_ms())
    }
}

/// Ordered, non-empty list of tiers. Order is evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Tier>", into = "Vec<Tier>")]
pub struct TierSet {
    tiers: Vec<Tier>,
}

impl TierSet {
    pub fn new(tiers: Vec<Tier>) -> ThrottlerResult<Self> {
        if tiers.is_empty() {
            return Err(ThrottlerError::Configuration(
                "At least one throttle tier must be configured".to_string(),
            ));
        }

        for tier in &tiers {
            tier.validate()?;
        }

        Ok(Self { tiers })
    }

    /// Build from `(window_seconds, point_budget)` pairs
    pub fn from_pairs(pairs: &[(u64, u64)]) -> ThrottlerResult<Self> {
        Self::new(
            pairs
                .iter()
                .map(|&(window, budget)| Tier {
                    window_seconds: window,
                    point_budget: budget,
                })
                .collect(),
        )
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tier> {
        self.tiers.iter()
    }

    pub fn len(&self) -> usize {
        self.tiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiers.is_empty()
    }

    pub fn as_slice(&self) -> &[Tier] {
        &self.tiers
    }
}

impl Default for TierSet {
    /// One minute / one hour tiers
    fn default() -> Self {
        Self {
            tiers: vec![
                Tier {
                    window_seconds: 60,
                    point_budget: 60,
                },
                Tier {
                    window_seconds: 3_600,
                    point_budget: 600,
                },
            ],
        }
    }
}

impl TryFrom<Vec<Tier>> for TierSet {
    type Error = ThrottlerError;

    fn try_from(tiers: Vec<Tier>) -> Result<Self, Self::Error> {
        Self::new(tiers)
    }
}

impl From<TierSet> for Vec<Tier> {
    fn from(set: TierSet) -> Self {
        set.tiers
    }
}

impl<'a> IntoIterator for &'a TierSet {
    type Item = &'a Tier;
    type IntoIter = std::slice::Iter<'a, Tier>;

    fn into_iter(self) -> Self::IntoIter {
        self.tiers.iter()
    }
}
