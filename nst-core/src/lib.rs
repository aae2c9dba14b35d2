//! NST Core - Domain Types
//!
//! Lesson requests, content keys, gift codes, users, settings, configuration
//! and the error taxonomy shared by every other crate. No I/O lives here.

pub mod config;
pub mod content;
pub mod error;
pub mod health;
pub mod redeem;
pub mod settings;
pub mod user;

pub use config::{
    GeneratorConfig, LocalCacheConfig, NstConfig, RedeemConfig, RemoteConfig, ResolverConfig,
};
pub use content::{
    Board, Chapter, ChapterQuery, ClassLevel, ContentKey, ContentRequest, ContentType, Language, LessonContent,
    Stream, CONTENT_KEY_PREFIX,
};
pub use error::{
    ConfigError, GenerationError, NstError, NstResult, RedeemError, StorageError, Tier,
    ValidationError,
};
pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use redeem::{
    coerce_amount, normalize_code, AmountCoercion, GiftCode, PendingClaim, RedeemOutcome,
    RedemptionState, STATUS_DISPLAY_WINDOW,
};
pub use settings::SystemSettings;
pub use user::{TestResult, User};

// ============================================================================
// PERSISTED LAYOUT
// ============================================================================

/// Document collection holding generated content.
pub const CONTENT_COLLECTION: &str = "content";

/// Tree path prefix holding generated content.
pub const CONTENT_TREE_PREFIX: &str = "nst_content";

/// Tree path prefix holding gift codes, keyed by normalized code.
pub const CODES_PREFIX: &str = "redeem_codes";

/// Document collection holding user records, keyed by user id.
pub const USERS_COLLECTION: &str = "users";

/// Tree path of the single settings record.
pub const SETTINGS_PATH: &str = "nst_system_settings";

/// Local cache key mirroring the signed-in user.
pub const CURRENT_USER_KEY: &str = "nst_current_user";

/// Local cache key mirroring the settings record.
pub const SETTINGS_LOCAL_KEY: &str = "nst_system_settings";
