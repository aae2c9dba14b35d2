//! Runtime configuration.
//!
//! Every section has development defaults and can be overridden from `NST_*`
//! environment variables. Call [`NstConfig::validate`] before wiring stores.

use crate::ConfigError;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// ENV HELPERS
// ============================================================================

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|s| s.parse().ok())
}

fn env_bool(name: &str, default: bool) -> bool {
    env_string(name)
        .map(|s| match s.to_lowercase().as_str() {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            _ => default,
        })
        .unwrap_or(default)
}

fn env_millis(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_millis)
}

fn env_secs(name: &str) -> Option<Duration> {
    env_parse::<u64>(name).map(Duration::from_secs)
}

fn env_list(name: &str) -> Vec<String> {
    env_string(name)
        .map(|s| {
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// SECTIONS
// ============================================================================

/// Remote backend endpoints and call deadlines.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteConfig {
    /// Realtime database root, e.g. `https://project-default-rtdb.firebaseio.com`.
    pub rtdb_url: Option<String>,
    pub firestore_project_id: Option<String>,
    pub firestore_database: String,
    /// Firestore REST root, without the `/projects/...` suffix.
    pub firestore_endpoint: String,
    /// Bearer token or database secret sent with every request.
    pub auth_token: Option<String>,
    /// Deadline applied to each individual remote call.
    pub call_timeout: Duration,
    pub connectivity_probe_interval: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            rtdb_url: None,
            firestore_project_id: None,
            firestore_database: "(default)".to_string(),
            firestore_endpoint: "https://firestore.googleapis.com/v1".to_string(),
            auth_token: None,
            call_timeout: Duration::from_secs(5),
            connectivity_probe_interval: Duration::from_secs(15),
        }
    }
}

impl RemoteConfig {
    /// Environment variables:
    /// - `NST_RTDB_URL`
    /// - `NST_FIRESTORE_PROJECT_ID`
    /// - `NST_FIRESTORE_DATABASE` (default: `(default)`)
    /// - `NST_FIRESTORE_ENDPOINT` (default: `https://firestore.googleapis.com/v1`)
    /// - `NST_AUTH_TOKEN`
    /// - `NST_REMOTE_TIMEOUT_MS` (default: 5000)
    /// - `NST_CONNECTIVITY_PROBE_SECS` (default: 15)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            rtdb_url: env_string("NST_RTDB_URL").map(|u| u.trim_end_matches('/').to_string()),
            firestore_project_id: env_string("NST_FIRESTORE_PROJECT_ID"),
            firestore_database: env_string("NST_FIRESTORE_DATABASE")
                .unwrap_or(defaults.firestore_database),
            firestore_endpoint: env_string("NST_FIRESTORE_ENDPOINT")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.firestore_endpoint),
            auth_token: env_string("NST_AUTH_TOKEN"),
            call_timeout: env_millis("NST_REMOTE_TIMEOUT_MS").unwrap_or(defaults.call_timeout),
            connectivity_probe_interval: env_secs("NST_CONNECTIVITY_PROBE_SECS")
                .unwrap_or(defaults.connectivity_probe_interval),
        }
    }
}

/// Local durable cache settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalCacheConfig {
    pub path: PathBuf,
    pub map_size_bytes: usize,
    /// When set, local entries older than this are treated as misses.
    /// Unset keeps stale local entries authoritative.
    pub ttl: Option<Duration>,
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./nst-cache"),
            map_size_bytes: 64 * 1024 * 1024,
            ttl: None,
        }
    }
}

impl LocalCacheConfig {
    /// Environment variables:
    /// - `NST_CACHE_PATH` (default: `./nst-cache`)
    /// - `NST_CACHE_MAP_SIZE_MB` (default: 64)
    /// - `NST_CACHE_TTL_SECS` (default: unset)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            path: env_string("NST_CACHE_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.path),
            map_size_bytes: env_parse::<usize>("NST_CACHE_MAP_SIZE_MB")
                .map(|mb| mb.saturating_mul(1024 * 1024))
                .unwrap_or(defaults.map_size_bytes),
            ttl: env_secs("NST_CACHE_TTL_SECS"),
        }
    }
}

/// Content resolver behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Share one provider call between concurrent resolutions of a key.
    pub single_flight: bool,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            single_flight: true,
        }
    }
}

impl ResolverConfig {
    /// Environment variables:
    /// - `NST_RESOLVER_SINGLE_FLIGHT` (default: true)
    pub fn from_env() -> Self {
        Self {
            single_flight: env_bool("NST_RESOLVER_SINGLE_FLIGHT", true),
        }
    }
}

/// Redeem reconciliation settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RedeemConfig {
    pub sweep_interval: Duration,
    /// Pending claims younger than this are left alone.
    pub stuck_threshold: Duration,
    pub sweep_batch_size: usize,
}

impl Default for RedeemConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(60),
            stuck_threshold: Duration::from_secs(120),
            sweep_batch_size: 100,
        }
    }
}

impl RedeemConfig {
    /// Environment variables:
    /// - `NST_REDEEM_SWEEP_INTERVAL_SECS` (default: 60)
    /// - `NST_REDEEM_STUCK_THRESHOLD_SECS` (default: 120)
    /// - `NST_REDEEM_SWEEP_BATCH_SIZE` (default: 100)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sweep_interval: env_secs("NST_REDEEM_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.sweep_interval),
            stuck_threshold: env_secs("NST_REDEEM_STUCK_THRESHOLD_SECS")
                .unwrap_or(defaults.stuck_threshold),
            sweep_batch_size: env_parse("NST_REDEEM_SWEEP_BATCH_SIZE")
                .unwrap_or(defaults.sweep_batch_size),
        }
    }
}

/// Content generation provider settings.
#[derive(Clone, PartialEq)]
pub struct GeneratorConfig {
    pub api_keys: Vec<String>,
    pub model: String,
    pub base_url: String,
    pub max_concurrent_requests: usize,
    pub request_timeout: Duration,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_keys", &format_args!("[{} redacted]", self.api_keys.len()))
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("max_concurrent_requests", &self.max_concurrent_requests)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            model: "gemini-2.0-flash".to_string(),
            base_url: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            max_concurrent_requests: 4,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl GeneratorConfig {
    /// Environment variables:
    /// - `NST_GEMINI_API_KEYS`: comma-separated keys
    /// - `NST_GEMINI_MODEL` (default: `gemini-2.0-flash`)
    /// - `NST_GEMINI_BASE_URL`
    /// - `NST_GEMINI_MAX_CONCURRENT` (default: 4)
    /// - `NST_GEMINI_TIMEOUT_SECS` (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_keys: env_list("NST_GEMINI_API_KEYS"),
            model: env_string("NST_GEMINI_MODEL").unwrap_or(defaults.model),
            base_url: env_string("NST_GEMINI_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.base_url),
            max_concurrent_requests: env_parse("NST_GEMINI_MAX_CONCURRENT")
                .unwrap_or(defaults.max_concurrent_requests),
            request_timeout: env_secs("NST_GEMINI_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
        }
    }
}

// ============================================================================
// TOP LEVEL
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NstConfig {
    pub remote: RemoteConfig,
    pub local_cache: LocalCacheConfig,
    pub resolver: ResolverConfig,
    pub redeem: RedeemConfig,
    pub generator: GeneratorConfig,
}

impl NstConfig {
    pub fn from_env() -> Self {
        Self {
            remote: RemoteConfig::from_env(),
            local_cache: LocalCacheConfig::from_env(),
            resolver: ResolverConfig::from_env(),
            redeem: RedeemConfig::from_env(),
            generator: GeneratorConfig::from_env(),
        }
    }

    /// Reject values no deployment can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.remote.call_timeout.is_zero() {
            return Err(invalid("remote.call_timeout", "0", "must be greater than zero"));
        }
        if self.remote.connectivity_probe_interval.is_zero() {
            return Err(invalid(
                "remote.connectivity_probe_interval",
                "0",
                "must be greater than zero",
            ));
        }
        if self.local_cache.map_size_bytes == 0 {
            return Err(invalid("local_cache.map_size_bytes", "0", "must be greater than zero"));
        }
        if matches!(self.local_cache.ttl, Some(ttl) if ttl.is_zero()) {
            return Err(invalid("local_cache.ttl", "0", "leave unset to disable expiry"));
        }
        if self.redeem.sweep_interval.is_zero() {
            return Err(invalid("redeem.sweep_interval", "0", "must be greater than zero"));
        }
        if self.redeem.sweep_batch_size == 0 {
            return Err(invalid("redeem.sweep_batch_size", "0", "must be greater than zero"));
        }
        // A claim is only stuck once every call of the redeem flow has timed out.
        let in_flight_budget = self.remote.call_timeout.saturating_mul(3);
        if self.redeem.stuck_threshold <= in_flight_budget {
            return Err(invalid(
                "redeem.stuck_threshold",
                &format!("{:?}", self.redeem.stuck_threshold),
                &format!("must exceed three remote call timeouts ({:?})", in_flight_budget),
            ));
        }
        if self.generator.max_concurrent_requests == 0 {
            return Err(invalid(
                "generator.max_concurrent_requests",
                "0",
                "must be greater than zero",
            ));
        }
        Ok(())
    }

    /// [`validate`](Self::validate) plus the requirements of a deployment that
    /// generates content.
    pub fn validate_with_generator(&self) -> Result<(), ConfigError> {
        self.validate()?;
        if self.generator.api_keys.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "NST_GEMINI_API_KEYS".to_string(),
            });
        }
        Ok(())
    }

    /// Remote settings required by the REST adapters.
    pub fn require_remote(&self) -> Result<(&str, &str), ConfigError> {
        let rtdb = self
            .remote
            .rtdb_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "NST_RTDB_URL".to_string(),
            })?;
        let project = self
            .remote
            .firestore_project_id
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "NST_FIRESTORE_PROJECT_ID".to_string(),
            })?;
        Ok((rtdb, project))
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = NstConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.local_cache.ttl.is_none());
        assert!(config.resolver.single_flight);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let mut config = NstConfig::default();
        config.remote.call_timeout = Duration::ZERO;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "remote.call_timeout"
        ));
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let mut config = NstConfig::default();
        config.local_cache.map_size_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_stuck_threshold_must_outlast_calls() {
        let mut config = NstConfig::default();
        config.remote.call_timeout = Duration::from_secs(10);
        config.redeem.stuck_threshold = Duration::from_secs(20);
        assert!(config.validate().is_err());
        config.redeem.stuck_threshold = Duration::from_secs(31);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_generator_requires_keys() {
        let mut config = NstConfig::default();
        assert!(matches!(
            config.validate_with_generator(),
            Err(ConfigError::MissingRequired { .. })
        ));
        config.generator.api_keys = vec!["k1".to_string()];
        assert!(config.validate_with_generator().is_ok());
    }

    #[test]
    fn test_require_remote() {
        let mut config = NstConfig::default();
        assert!(config.require_remote().is_err());
        config.remote.rtdb_url = Some("https://db.example".to_string());
        config.remote.firestore_project_id = Some("nst-app".to_string());
        assert_eq!(
            config.require_remote().unwrap(),
            ("https://db.example", "nst-app")
        );
    }

    #[test]
    fn test_generator_debug_redacts_keys() {
        let config = GeneratorConfig {
            api_keys: vec!["secret-key".to_string()],
            ..GeneratorConfig::default()
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("secret-key"));
        assert!(rendered.contains("1 redacted"));
    }
}
