//! Gift code redemption.
//!
//! A redemption moves a code through three conditional steps:
//!
//! 1. **Claim**: `UNREDEEMED → PENDING(claim)` with a compare-and-set on the
//!    code record. Only one claimant can win.
//! 2. **Credit**: add the amount and the code to the claimant's user record
//!    (merge write) and mirror the result locally.
//! 3. **Finalize**: `PENDING(claim) → REDEEMED` with a second compare-and-set.
//!
//! A failure after the claim leaves the code pending. Nothing is rolled
//! back; [`PendingRedemptionSweeper`](crate::PendingRedemptionSweeper) rolls
//! stuck claims forward. Crediting records the claim id in the user's
//! `creditedClaims` and checks it first, so a claim is never credited twice
//! while a reissued code still credits.

use chrono::Utc;
use nst_core::{
    normalize_code, GiftCode, NstError, NstResult, PendingClaim, RedeemError, RedeemOutcome,
    RedemptionState, StorageError, User, CURRENT_USER_KEY, USERS_COLLECTION,
};
use nst_storage::{code_path, DocumentWrite, ETag};
use serde_json::Value;

use crate::context::StoreContext;

/// Attempts at the finalize compare-and-set before leaving it to the sweeper.
const FINALIZE_ATTEMPTS: usize = 3;

pub struct RedeemService {
    ctx: StoreContext,
}

impl RedeemService {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    /// Redeem `input` for `user`.
    ///
    /// Returns the updated user and the credits added. The caller shows
    /// [`RedeemOutcome::success_message`] or [`RedeemError::user_message`]
    /// for [`STATUS_DISPLAY_WINDOW`](nst_core::STATUS_DISPLAY_WINDOW).
    pub async fn redeem(&self, user: &User, input: &str) -> Result<RedeemOutcome, RedeemError> {
        let code = normalize_code(input);
        if code.is_empty() {
            return Err(RedeemError::EmptyCode);
        }
        let path = code_path(&code);

        let (gift, etag) = self.fetch(&code, &path).await?;
        let claim = match gift.state() {
            RedemptionState::Redeemed => {
                return Err(RedeemError::AlreadyRedeemed { code });
            }
            // Our own earlier attempt stalled after claiming; pick it back up.
            RedemptionState::Pending(claim) if claim.user_id == user.id => {
                tracing::info!(code = %code, claim_id = %claim.claim_id, "resuming pending claim");
                claim
            }
            RedemptionState::Pending(_) => {
                return Err(RedeemError::AlreadyRedeemed { code });
            }
            RedemptionState::Unredeemed => {
                let claim = PendingClaim::new(user, Utc::now());
                let claimed = serde_json::to_value(gift.with_claim(claim.clone()))
                    .map_err(|e| connection_failed(e.into()))?;
                let won = self
                    .ctx
                    .remote("set_if_match", self.ctx.tree().set_if_match(&path, claimed, &etag))
                    .await
                    .map_err(connection_failed)?;
                if !won {
                    tracing::info!(code = %code, user_id = %user.id, "lost claim race");
                    return Err(RedeemError::AlreadyRedeemed { code });
                }
                claim
            }
        };

        let amount = gift.credit_amount();
        if amount.lossy {
            tracing::warn!(code = %code, stored = %gift.amount, credited = amount.credits, "gift code amount coerced");
        }

        let (updated, added) = credit_claimant(&self.ctx, &code, &claim, amount.credits, Some(user))
            .await
            .map_err(connection_failed)?;
        if let Ok(value) = serde_json::to_value(&updated) {
            self.ctx.mirror_local(CURRENT_USER_KEY, &value);
        }

        match finalize_claim(&self.ctx, &path, &claim).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(code = %code, claim_id = %claim.claim_id, "claim no longer pending, not finalized")
            }
            Err(e) => {
                // The user is already credited; the sweeper completes the record.
                tracing::warn!(code = %code, claim_id = %claim.claim_id, error = %e, "finalize deferred");
            }
        }

        tracing::info!(code = %code, user_id = %updated.id, amount_added = added, "gift code redeemed");
        Ok(RedeemOutcome {
            user: updated,
            amount_added: added,
        })
    }

    async fn fetch(&self, code: &str, path: &str) -> Result<(GiftCode, ETag), RedeemError> {
        let versioned = self
            .ctx
            .remote("get_versioned", self.ctx.tree().get_versioned(path))
            .await
            .map_err(connection_failed)?;
        let Some(value) = versioned.value else {
            return Err(RedeemError::CodeNotFound {
                code: code.to_string(),
            });
        };
        match serde_json::from_value::<GiftCode>(value) {
            Ok(gift) => Ok((gift, versioned.etag)),
            Err(e) => {
                tracing::warn!(code, error = %e, "unreadable gift code record");
                Err(RedeemError::CodeNotFound {
                    code: code.to_string(),
                })
            }
        }
    }
}

fn connection_failed(e: NstError) -> RedeemError {
    tracing::warn!(error = %e, "redeem remote call failed");
    RedeemError::ConnectionFailed {
        reason: e.to_string(),
    }
}

/// Load a user record. A missing record starts from `fallback`, or empty.
pub(crate) async fn load_user(
    ctx: &StoreContext,
    user_id: &str,
    fallback: Option<&User>,
) -> NstResult<User> {
    let doc = ctx
        .remote("get_doc", ctx.documents().get_doc(USERS_COLLECTION, user_id))
        .await?;
    match doc {
        Some(Value::Object(mut map)) => {
            map.entry("id")
                .or_insert_with(|| Value::String(user_id.to_string()));
            Ok(serde_json::from_value(Value::Object(map))?)
        }
        _ => Ok(fallback
            .cloned()
            .unwrap_or_else(|| User::new(user_id, String::new()))),
    }
}

/// Credit `claim`'s user with `amount` for `code`.
///
/// Returns the updated user and the credits actually added, which is 0 when
/// the record shows this claim was already credited.
pub(crate) async fn credit_claimant(
    ctx: &StoreContext,
    code: &str,
    claim: &PendingClaim,
    amount: u64,
    fallback: Option<&User>,
) -> NstResult<(User, u64)> {
    let mut user = load_user(ctx, &claim.user_id, fallback).await?;
    if !user.apply_redemption(code, claim, amount) {
        tracing::debug!(code, user_id = %user.id, claim_id = %claim.claim_id, "claim already credited");
        return Ok((user, 0));
    }

    // List fields and updatedAt go through transforms, never as plain fields.
    let mut write = DocumentWrite::from_value(serde_json::to_value(&user)?);
    write.fields.remove("redeemedCodes");
    write.fields.remove("creditedClaims");
    write.fields.remove("updatedAt");
    let write = write
        .array_union("redeemedCodes", vec![Value::String(code.to_string())])
        .array_union("creditedClaims", vec![Value::String(claim.claim_id.to_string())])
        .server_timestamp("updatedAt");
    ctx.remote(
        "set_doc",
        ctx.documents().set_doc(USERS_COLLECTION, &user.id, write, true),
    )
    .await?;
    Ok((user, amount))
}

/// Move the code at `path` from `PENDING(claim)` to `REDEEMED`.
///
/// Returns false when the record no longer carries `claim`.
pub(crate) async fn finalize_claim(
    ctx: &StoreContext,
    path: &str,
    claim: &PendingClaim,
) -> NstResult<bool> {
    for _ in 0..FINALIZE_ATTEMPTS {
        let versioned = ctx
            .remote("get_versioned", ctx.tree().get_versioned(path))
            .await?;
        let Some(value) = versioned.value else {
            return Ok(false);
        };
        let gift: GiftCode = serde_json::from_value(value)?;
        match gift.state() {
            RedemptionState::Redeemed => return Ok(gift.redeemed_by.as_deref() == Some(claim.user_id.as_str())),
            RedemptionState::Pending(current) if current.claim_id == claim.claim_id => {}
            _ => return Ok(false),
        }

        let finalized = serde_json::to_value(gift.finalized(claim, Utc::now()))?;
        if ctx
            .remote("set_if_match", ctx.tree().set_if_match(path, finalized, &versioned.etag))
            .await?
        {
            return Ok(true);
        }
    }
    Err(StorageError::Conflict {
        path: path.to_string(),
    }
    .into())
}
