//! Selection of the tier set that applies to a request path.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ThrottlerError, ThrottlerResult};
use crate::tier::TierSet;

/// A path pattern and the tiers that apply to it, as written in settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteRule {
    /// Regular expression matched against the request path
    pub pattern: String,
    pub tiers: TierSet,
}

#[derive(Debug, Clone)]
struct CompiledRoute {
    pattern: Regex,
    tiers: TierSet,
}

/// Ordered route rules; the first matching pattern wins, otherwise the
/// default tiers apply.
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<CompiledRoute>,
    default_tiers: TierSet,
}

impl RouteTable {
    pub fn new(rules: &[RouteRule], default_tiers: TierSet) -> ThrottlerResult<Self> {
        let routes = rules
            .iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.pattern).map_err(|e| {
                    ThrottlerError::Configuration(format!(
                        "Invalid route pattern '{}': {}",
                        rule.pattern, e
                    ))
                })?;
                Ok(CompiledRoute {
                    pattern,
                    tiers: rule.tiers.clone(),
                })
            })
            .collect::<ThrottlerResult<Vec<_>>>()?;

        Ok(Self {
            routes,
            default_tiers,
        })
    }

    /// Table with no route rules
    pub fn uniform(default_tiers: TierSet) -> Self {
        Self {
            routes: Vec::new(),
            default_tiers,
        }
    }

    pub fn select(&self, path: &str) -> &TierSet {
        self.routes
            .iter()
            .find(|route| route.pattern.is_match(path))
            .map(|route| &route.tiers)
            .unwrap_or(&self.default_tiers)
    }

    pub fn default_tiers(&self) -> &TierSet {
        &self.default_tiers
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
