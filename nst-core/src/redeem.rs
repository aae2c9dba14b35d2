//! Gift code records and the pure parts of the redeem transaction.

use crate::User;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// How long a redeem status message stays on screen before the caller clears it.
pub const STATUS_DISPLAY_WINDOW: Duration = Duration::from_secs(3);

/// Normalize user input into the stored code form.
pub fn normalize_code(input: &str) -> String {
    input.trim().to_uppercase()
}

// ============================================================================
// GIFT CODE
// ============================================================================

/// Claim recorded on a code while its redemption is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingClaim {
    pub claim_id: Uuid,
    pub user_id: String,
    #[serde(default)]
    pub user_name: String,
    pub claimed_at: DateTime<Utc>,
}

impl PendingClaim {
    pub fn new(user: &User, claimed_at: DateTime<Utc>) -> Self {
        Self {
            claim_id: Uuid::now_v7(),
            user_id: user.id.clone(),
            user_name: user.name.clone(),
            claimed_at,
        }
    }

    /// True once the claim has been open longer than `threshold`.
    pub fn is_stuck(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        match chrono::Duration::from_std(threshold) {
            Ok(threshold) => now - self.claimed_at >= threshold,
            Err(_) => false,
        }
    }
}

/// Lifecycle of a code. `Redeemed` is terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedemptionState {
    Unredeemed,
    Pending(PendingClaim),
    Redeemed,
}

/// A gift code record as stored under `redeem_codes/{CODE}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GiftCode {
    #[serde(default)]
    pub code: String,
    /// Stored loosely; read through [`GiftCode::credit_amount`].
    #[serde(default)]
    pub amount: serde_json::Value,
    #[serde(default)]
    pub is_redeemed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_by_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redeemed_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_claim: Option<PendingClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl GiftCode {
    /// A fresh, unredeemed code.
    pub fn new(code: &str, amount: u64) -> Self {
        Self {
            code: normalize_code(code),
            amount: serde_json::Value::from(amount),
            is_redeemed: false,
            redeemed_by: None,
            redeemed_by_name: None,
            redeemed_date: None,
            pending_claim: None,
            created_at: Some(Utc::now()),
        }
    }

    pub fn state(&self) -> RedemptionState {
        if self.is_redeemed {
            RedemptionState::Redeemed
        } else if let Some(claim) = &self.pending_claim {
            RedemptionState::Pending(claim.clone())
        } else {
            RedemptionState::Unredeemed
        }
    }

    pub fn credit_amount(&self) -> AmountCoercion {
        coerce_amount(&self.amount)
    }

    /// Copy of this record carrying `claim`.
    pub fn with_claim(&self, claim: PendingClaim) -> Self {
        Self {
            pending_claim: Some(claim),
            ..self.clone()
        }
    }

    /// Terminal copy of this record, attributed to the claimant.
    pub fn finalized(&self, claim: &PendingClaim, redeemed_at: DateTime<Utc>) -> Self {
        Self {
            is_redeemed: true,
            redeemed_by: Some(claim.user_id.clone()),
            redeemed_by_name: Some(claim.user_name.clone()),
            redeemed_date: Some(redeemed_at),
            pending_claim: None,
            ..self.clone()
        }
    }
}

// ============================================================================
// AMOUNT COERCION
// ============================================================================

/// Result of reading a loosely-typed credit amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmountCoercion {
    pub credits: u64,
    /// Set when the stored value could not be represented exactly.
    pub lossy: bool,
}

impl AmountCoercion {
    fn exact(credits: u64) -> Self {
        Self {
            credits,
            lossy: false,
        }
    }

    fn lossy(credits: u64) -> Self {
        Self {
            credits,
            lossy: true,
        }
    }
}

/// Coerce a stored amount to whole credits.
///
/// Numbers, numeric strings and booleans are accepted. Missing or null is 0.
/// Negative, NaN and non-numeric values become 0, fractions are floored;
/// those cases are flagged as lossy.
pub fn coerce_amount(value: &serde_json::Value) -> AmountCoercion {
    use serde_json::Value;

    match value {
        Value::Null => AmountCoercion::exact(0),
        Value::Bool(b) => AmountCoercion::exact(u64::from(*b)),
        Value::Number(n) => {
            if let Some(u) = n.as_u64() {
                AmountCoercion::exact(u)
            } else {
                coerce_float(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return AmountCoercion::exact(0);
            }
            match trimmed.parse::<u64>() {
                Ok(u) => AmountCoercion::exact(u),
                Err(_) => coerce_float(trimmed.parse::<f64>().unwrap_or(f64::NAN)),
            }
        }
        Value::Array(_) | Value::Object(_) => AmountCoercion::lossy(0),
    }
}

fn coerce_float(f: f64) -> AmountCoercion {
    if !f.is_finite() || f <= 0.0 {
        return AmountCoercion {
            credits: 0,
            lossy: f != 0.0,
        };
    }
    let floored = f.floor();
    let credits = if floored >= u64::MAX as f64 {
        u64::MAX
    } else {
        floored as u64
    };
    AmountCoercion {
        credits,
        lossy: floored != f,
    }
}

// ============================================================================
// OUTCOME
// ============================================================================

/// Successful redemption.
#[derive(Debug, Clone, PartialEq)]
pub struct RedeemOutcome {
    pub user: User,
    pub amount_added: u64,
}

impl RedeemOutcome {
    pub fn success_message(&self) -> String {
        format!(
            "Success! 🎉 Added {} Credits to your account.",
            self.amount_added
        )
    }
}
