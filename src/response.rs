use serde::{Deserialize, Serialize};

use crate::evaluator::TierUsage;
use crate::gate::Decision;
use crate::key::ThrottleKey;
use crate::outcome::Outcome;

/// Attributes of the request being admitted, as sent by a collaborator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateRequest {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    /// Request path used to select route-specific tiers
    #[serde(default)]
    pub route: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluateResponse {
    #[serde(flatten)]
    pub decision: Decision,
    /// Timestamp to send back with the outcome of this request
    pub requested_at: i64,
}

/// Outcome of a previously evaluated request. Either `outcome` or `status`
/// must be given.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRequest {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub requested_at: Option<i64>,
    #[serde(default)]
    pub outcome: Option<Outcome>,
    #[serde(default)]
    pub status: Option<u16>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UsageQuery {
    pub identity: Option<String>,
    pub address: Option<String>,
    pub route: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageResponse {
    pub key: Option<ThrottleKey>,
    pub tiers: Vec<TierUsage>,
}
