//! NST Client - Content Resolution and Gift Code Redemption
//!
//! The flows a student device runs against the shared stores:
//!
//! - [`ContentResolver`]: lesson content through the tiered cache, generated
//!   on a miss and written back.
//! - [`RedeemService`]: exactly-once gift code redemption with a
//!   claim → credit → finalize sequence, and the
//!   [`PendingRedemptionSweeper`] that completes interrupted ones.
//! - [`UserSync`] and [`SettingsSync`]: user and settings records.
//! - [`GiftCodeIssuer`]: admin code creation.
//!
//! All of them take a [`StoreContext`] holding the store handles.

pub mod context;
pub mod error;
pub mod issuer;
pub mod redeem;
pub mod resolver;
pub mod settings_sync;
pub mod sweeper;
pub mod telemetry;
pub mod user_sync;

pub use context::StoreContext;
pub use error::{ClientError, ClientResult};
pub use issuer::{generate_code, GiftCodeIssuer};
pub use redeem::RedeemService;
pub use resolver::{ContentResolver, Resolution, ResolutionSource};
pub use settings_sync::SettingsSync;
pub use sweeper::{PendingRedemptionSweeper, SweeperMetrics, SweeperSnapshot};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
pub use user_sync::UserSync;
