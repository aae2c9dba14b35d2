//! Student records.

use crate::redeem::{coerce_amount, PendingClaim};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// A student account.
///
/// Fields the core does not manage are preserved in `extra` so a merge
/// write never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_credits")]
    pub credits: u64,
    #[serde(default, deserialize_with = "lenient_list")]
    pub redeemed_codes: Vec<String>,
    /// Ids of the redeem claims already credited to this account.
    #[serde(default, deserialize_with = "lenient_list")]
    pub credited_claims: Vec<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn lenient_credits<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(coerce_amount(&raw).credits)
}

/// `null` or a non-array reads as empty; non-string elements are skipped.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    Ok(match raw {
        serde_json::Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            credits: 0,
            redeemed_codes: Vec::new(),
            credited_claims: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn with_credits(mut self, credits: u64) -> Self {
        self.credits = credits;
        self
    }

    pub fn has_redeemed(&self, code: &str) -> bool {
        self.redeemed_codes.iter().any(|c| c == code)
    }

    pub fn has_credited(&self, claim: &PendingClaim) -> bool {
        let claim_id = claim.claim_id.to_string();
        self.credited_claims.iter().any(|c| *c == claim_id)
    }

    /// Add `amount` credits for `claim` on `code`.
    ///
    /// Returns false and leaves the user untouched when this claim was
    /// already credited, so replays of one redemption never double-credit.
    /// A reissued code is a new claim and credits again; `code` is listed
    /// in `redeemed_codes` once either way.
    pub fn apply_redemption(&mut self, code: &str, claim: &PendingClaim, amount: u64) -> bool {
        if self.has_credited(claim) {
            return false;
        }
        self.credits = self.credits.saturating_add(amount);
        if !self.has_redeemed(code) {
            self.redeemed_codes.push(code.to_string());
        }
        self.credited_claims.push(claim.claim_id.to_string());
        true
    }
}

/// Outcome of a weekly test, appended to the user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_id: String,
    #[serde(default)]
    pub test_name: String,
    pub score: u32,
    pub total: u32,
    pub date: DateTime<Utc>,
}

impl TestResult {
    pub fn new(test_id: impl Into<String>, test_name: impl Into<String>, score: u32, total: u32) -> Self {
        Self {
            test_id: test_id.into(),
            test_name: test_name.into(),
            score,
            total,
            date: Utc::now(),
        }
    }
}
