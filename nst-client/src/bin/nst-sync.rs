//! NST sync daemon.
//!
//! Connects to the configured stores and runs the pending redemption
//! sweeper until interrupted.

use nst_client::{
    init_tracing, ClientError, ClientResult, PendingRedemptionSweeper, SettingsSync, StoreContext,
    TelemetryConfig,
};
use nst_core::NstConfig;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> ClientResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = NstConfig::from_env();
    let redeem_config = config.redeem.clone();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (ctx, probe) = StoreContext::connect(config, shutdown_rx.clone())?;

    let settings = SettingsSync::new(ctx.clone());
    match settings.refresh().await {
        Ok(current) => tracing::info!(
            app_name = %current.app_name,
            maintenance_mode = current.maintenance_mode,
            "Settings loaded"
        ),
        Err(e) => tracing::warn!(error = %e, "Settings unavailable, continuing with defaults"),
    }

    let sweeper = PendingRedemptionSweeper::new(ctx.clone(), redeem_config);
    let sweeper_task = tokio::spawn(sweeper.run(shutdown_rx));
    tracing::info!(connected = ctx.is_connected(), "nst-sync running");

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| ClientError::Task(format!("Failed to listen for shutdown: {}", e)))?;
    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(true);

    let metrics = sweeper_task
        .await
        .map_err(|e| ClientError::Task(e.to_string()))?;
    let _ = probe.await;

    let snapshot = metrics.snapshot();
    tracing::info!(
        claims_finalized = snapshot.claims_finalized,
        sweep_errors = snapshot.sweep_errors,
        "nst-sync stopped"
    );
    Ok(())
}
