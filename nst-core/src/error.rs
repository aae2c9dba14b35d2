//! Error types for NST operations

use std::time::Duration;
use thiserror::Error;

/// Storage tier identifier used in error reports and cache statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Process-local durable cache.
    Local,
    /// Document-oriented remote store.
    Primary,
    /// Tree-structured remote store.
    Secondary,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Local => write!(f, "local"),
            Tier::Primary => write!(f, "primary"),
            Tier::Secondary => write!(f, "secondary"),
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Tier {tier} unavailable: {reason}")]
    Unavailable { tier: Tier, reason: String },

    #[error("Remote call {operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("Conditional write lost on {path}")]
    Conflict { path: String },

    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Local cache error: {reason}")]
    LocalCache { reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Content generation provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("No content generation provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Generation failed: {reason}")]
    GenerationFailed { reason: String },
}

/// Redeem transaction errors.
///
/// Each variant maps to a distinct user-facing message via [`RedeemError::user_message`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RedeemError {
    #[error("Gift code is empty")]
    EmptyCode,

    #[error("Gift code not found: {code}")]
    CodeNotFound { code: String },

    #[error("Gift code already redeemed: {code}")]
    AlreadyRedeemed { code: String },

    #[error("Connection failed: {reason}")]
    ConnectionFailed { reason: String },
}

impl RedeemError {
    /// Message shown to the student for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            RedeemError::EmptyCode => "Please enter a gift code.",
            RedeemError::CodeNotFound { .. } => "Invalid Code. Please check and try again.",
            RedeemError::AlreadyRedeemed { .. } => "This code has already been redeemed.",
            RedeemError::ConnectionFailed { .. } => "Connection failed. Please try again later.",
        }
    }
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all NST errors.
#[derive(Debug, Clone, Error)]
pub enum NstError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Redeem error: {0}")]
    Redeem(#[from] RedeemError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl NstError {
    /// Returns true when the error is a tier-level storage failure that
    /// callers are expected to absorb.
    pub fn is_tier_unavailable(&self) -> bool {
        matches!(
            self,
            NstError::Storage(StorageError::Unavailable { .. } | StorageError::Timeout { .. })
        )
    }
}

impl From<serde_json::Error> for NstError {
    fn from(e: serde_json::Error) -> Self {
        NstError::Storage(StorageError::Serialization {
            reason: e.to_string(),
        })
    }
}

/// Result type alias for NST operations.
pub type NstResult<T> = Result<T, NstError>;

// =============================================================================
// TESTS
// =============================================================================
