use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

use crate::error::ThrottlerResult;
use crate::store::EventStore;
use crate::tier::{Tier, TierSet};

/// Points accumulated against a single tier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TierUsage {
    pub window_seconds: u64,
    pub point_budget: u64,
    pub points: u64,
    pub violated: bool,
}

/// Scores a key's recent history against an ordered tier list.
#[derive(Debug, Clone)]
pub struct TierEvaluator {
    store: Arc<dyn EventStore>,
}

impl TierEvaluator {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// True as soon as one tier holds `points >= budget`; later tiers are not
    /// queried.
    pub async fn is_violated(&self, key: &str, tiers: &TierSet, now_ms: i64) -> ThrottlerResult<bool> {
        for tier in tiers {
            let points = self.points(key, tier, now_ms).await?;

            if points >= tier.point_budget {
                debug!(
                    key = %key,
                    tier_window_secs = tier.window_seconds,
                    points,
                    budget = tier.point_budget,
                    "Tier violated"
                );
                return Ok(true);
            }
        }

        Ok(false)
    }

    /// Usage of every tier, without short-circuiting.
    pub async fn usage(&self, key: &str, tiers: &TierSet, now_ms: i64) -> ThrottlerResult<Vec<TierUsage>> {
        let mut usage = Vec::with_capacity(tiers.len());

        for tier in tiers {
            let points = self.points(key, tier, now_ms).await?;
            usage.push(TierUsage {
                window_seconds: tier.window_seconds,
                point_budget: tier.point_budget,
                points,
                violated: points >= tier.point_budget,
            });
        }

        Ok(usage)
    }

    async fn points(&self, key: &str, tier: &Tier, now_ms: i64) -> ThrottlerResult<u64> {
        self.store.sum_weighted_points(key, tier.since(now_ms)).await
    }
}
