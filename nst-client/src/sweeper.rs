//! Pending Redemption Sweeper
//!
//! A redemption that fails between its claim and its finalize step leaves
//! the code `PENDING`: the claimant may or may not have been credited. This
//! background task finds claims older than the stuck threshold and rolls
//! them forward:
//!
//! - credits the claimant if their record does not list the code yet
//! - finalizes the code as redeemed by the claimant
//!
//! Rolling forward never double-credits because crediting is keyed on the
//! user's `redeemedCodes`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use nst_core::{GiftCode, NstResult, RedeemConfig, RedemptionState, CODES_PREFIX};
use nst_storage::join_path;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::context::StoreContext;
use crate::redeem::{credit_claimant, finalize_claim};

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct SweeperMetrics {
    /// Claims moved to redeemed since startup
    pub claims_finalized: AtomicU64,

    /// Claimants credited by the sweeper rather than the redeem call
    pub claimants_credited: AtomicU64,

    pub sweep_cycles: AtomicU64,

    pub sweep_errors: AtomicU64,
}

impl SweeperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SweeperSnapshot {
        SweeperSnapshot {
            claims_finalized: self.claims_finalized.load(Ordering::Relaxed),
            claimants_credited: self.claimants_credited.load(Ordering::Relaxed),
            sweep_cycles: self.sweep_cycles.load(Ordering::Relaxed),
            sweep_errors: self.sweep_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweeperSnapshot {
    pub claims_finalized: u64,
    pub claimants_credited: u64,
    pub sweep_cycles: u64,
    pub sweep_errors: u64,
}

// ============================================================================
// SWEEPER
// ============================================================================

pub struct PendingRedemptionSweeper {
    ctx: StoreContext,
    config: RedeemConfig,
    metrics: Arc<SweeperMetrics>,
}

impl PendingRedemptionSweeper {
    pub fn new(ctx: StoreContext, config: RedeemConfig) -> Self {
        Self {
            ctx,
            config,
            metrics: Arc::new(SweeperMetrics::new()),
        }
    }

    pub fn metrics(&self) -> Arc<SweeperMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Sweep every `sweep_interval` until `shutdown_rx` turns true.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> Arc<SweeperMetrics> {
        let mut ticker = interval(self.config.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        tracing::info!(
            sweep_interval_secs = self.config.sweep_interval.as_secs(),
            stuck_threshold_secs = self.config.stuck_threshold.as_secs(),
            batch_size = self.config.sweep_batch_size,
            "Pending redemption sweeper started"
        );

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Pending redemption sweeper shutting down");
                        break;
                    }
                }

                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }

        let snapshot = self.metrics.snapshot();
        tracing::info!(
            claims_finalized = snapshot.claims_finalized,
            claimants_credited = snapshot.claimants_credited,
            sweep_cycles = snapshot.sweep_cycles,
            sweep_errors = snapshot.sweep_errors,
            "Pending redemption sweeper completed"
        );
        self.metrics
    }

    /// One pass over the code records. Returns how many claims were finalized.
    pub async fn sweep_once(&self) -> u64 {
        self.metrics.sweep_cycles.fetch_add(1, Ordering::Relaxed);

        let stuck = match self.find_stuck().await {
            Ok(stuck) => stuck,
            Err(e) => {
                tracing::error!(error = %e, "Failed to list gift codes");
                self.metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
                return 0;
            }
        };

        let mut finalized = 0u64;
        for (segment, gift) in stuck {
            match self.roll_forward(&segment, &gift).await {
                Ok(true) => {
                    finalized += 1;
                    self.metrics.claims_finalized.fetch_add(1, Ordering::Relaxed);
                }
                Ok(false) => {
                    tracing::debug!(code = %gift.code, "Claim already resolved, skipping");
                }
                Err(e) => {
                    tracing::error!(error = %e, code = %gift.code, "Failed to roll claim forward");
                    self.metrics.sweep_errors.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if finalized > 0 {
            tracing::info!(finalized, "Pending redemption sweep completed");
        } else {
            tracing::trace!("Pending redemption sweep completed with no stuck claims");
        }
        finalized
    }

    /// Stuck pending records, keyed by their path segment under the codes prefix.
    async fn find_stuck(&self) -> NstResult<Vec<(String, GiftCode)>> {
        let all = self
            .ctx
            .remote("get", self.ctx.tree().get(CODES_PREFIX))
            .await?;
        let Some(Value::Object(records)) = all else {
            return Ok(Vec::new());
        };

        let now = Utc::now();
        let stuck = records
            .into_iter()
            .filter_map(|(segment, value)| {
                let gift: GiftCode = serde_json::from_value(value).ok()?;
                match gift.state() {
                    RedemptionState::Pending(claim)
                        if claim.is_stuck(now, self.config.stuck_threshold) =>
                    {
                        Some((segment, gift))
                    }
                    _ => None,
                }
            })
            .take(self.config.sweep_batch_size)
            .collect();
        Ok(stuck)
    }

    async fn roll_forward(&self, segment: &str, gift: &GiftCode) -> NstResult<bool> {
        let RedemptionState::Pending(claim) = gift.state() else {
            return Ok(false);
        };
        tracing::warn!(
            code = %gift.code,
            claim_id = %claim.claim_id,
            user_id = %claim.user_id,
            claimed_at = %claim.claimed_at,
            "Rolling stuck claim forward"
        );

        // Older records may lack the code field; the path segment stands in.
        let code = if gift.code.is_empty() { segment } else { gift.code.as_str() };
        let amount = gift.credit_amount();
        let (_, added) = credit_claimant(&self.ctx, code, &claim, amount.credits, None).await?;
        if added > 0 {
            self.metrics.claimants_credited.fetch_add(1, Ordering::Relaxed);
        }
        finalize_claim(&self.ctx, &join_path(CODES_PREFIX, segment), &claim).await
    }
}

impl std::fmt::Debug for PendingRedemptionSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRedemptionSweeper")
            .field("config", &self.config)
            .field("metrics", &self.metrics.snapshot())
            .finish()
    }
}
