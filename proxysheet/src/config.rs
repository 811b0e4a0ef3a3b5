//! Engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the cache root.
pub const CACHE_DIR_ENV: &str = "PROXYSHEET_CACHE_DIR";

/// Default catalog endpoint.
pub const DEFAULT_CATALOG_URL: &str = "https://api.scryfall.com";

/// Configuration for an [`Engine`](crate::engine::Engine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Root directory for all persisted caches and log files.
    pub cache_dir: PathBuf,

    /// Base URL of the card catalog API.
    pub catalog_base_url: String,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Minimum spacing between consecutive catalog API calls.
    pub catalog_cooldown: Duration,

    /// Maximum image downloads in flight across all background tasks.
    pub max_concurrent_fetches: usize,

    /// Worker threads for the engine's async runtime.
    pub worker_threads: usize,

    /// Age after which the valid-name index is considered stale.
    pub names_max_age: Duration,

    /// How long a completed background task stays queryable if nobody
    /// observes it finishing.
    pub completed_task_ttl: Duration,

    /// Upper bound on completed-but-unobserved tasks kept around.
    pub max_retained_completed: usize,

    /// Minimum interval between two observer wake calls.
    pub wake_coalesce_window: Duration,

    /// Capacity of the change-notification queue. Oldest events are
    /// dropped once it is full.
    pub max_queued_events: usize,

    /// User-Agent sent with every catalog request.
    pub user_agent: String,

    /// Tracing filter directive. `None` falls back to `PROXYSHEET_LOG`, then `info`.
    pub log_filter: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cache_dir = dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("proxysheet");

        Self {
            cache_dir,
            catalog_base_url: DEFAULT_CATALOG_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            catalog_cooldown: Duration::from_millis(100),
            max_concurrent_fetches: 8,
            worker_threads: 4,
            names_max_age: Duration::from_secs(24 * 60 * 60),
            completed_task_ttl: Duration::from_secs(5 * 60),
            max_retained_completed: 64,
            wake_coalesce_window: Duration::from_millis(50),
            max_queued_events: 4096,
            user_agent: format!("proxysheet/{}", crate::VERSION),
            log_filter: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration rooted at the given cache directory.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Default::default()
        }
    }

    /// Defaults, with the cache root taken from `PROXYSHEET_CACHE_DIR` when set.
    pub fn from_env() -> Self {
        match std::env::var_os(CACHE_DIR_ENV) {
            Some(dir) if !dir.is_empty() => Self::new(PathBuf::from(dir)),
            _ => Self::default(),
        }
    }

    /// Set the catalog base URL.
    pub fn with_catalog_base_url(mut self, url: impl Into<String>) -> Self {
        self.catalog_base_url = url.into();
        self
    }

    /// Set the HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the spacing between catalog API calls.
    pub fn with_catalog_cooldown(mut self, cooldown: Duration) -> Self {
        self.catalog_cooldown = cooldown;
        self
    }

    /// Set the maximum concurrent image downloads.
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Self {
        self.max_concurrent_fetches = max;
        self
    }

    /// Set the runtime worker thread count.
    pub fn with_worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Set the staleness threshold for the name index.
    pub fn with_names_max_age(mut self, age: Duration) -> Self {
        self.names_max_age = age;
        self
    }

    /// Set how long unobserved completed tasks are retained.
    pub fn with_completed_task_ttl(mut self, ttl: Duration) -> Self {
        self.completed_task_ttl = ttl;
        self
    }

    /// Set how many unobserved completed tasks are retained.
    pub fn with_max_retained_completed(mut self, max: usize) -> Self {
        self.max_retained_completed = max;
        self
    }

    /// Set the observer wake coalescing window.
    pub fn with_wake_coalesce_window(mut self, window: Duration) -> Self {
        self.wake_coalesce_window = window;
        self
    }

    /// Set the change queue capacity.
    pub fn with_max_queued_events(mut self, max: usize) -> Self {
        self.max_queued_events = max;
        self
    }

    /// Set the User-Agent header.
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = agent.into();
        self
    }

    /// Set the tracing filter directive.
    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }

    /// Directory holding image files and their index.
    pub fn image_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("images")
    }

    /// File holding persisted search results.
    pub fn search_cache_path(&self) -> PathBuf {
        self.cache_dir.join("search_results.json")
    }

    /// File holding the valid-name index.
    pub fn names_cache_path(&self) -> PathBuf {
        self.cache_dir.join("card_names.json")
    }

    /// Directory for rolling log files.
    pub fn log_dir(&self) -> PathBuf {
        self.cache_dir.join("logs")
    }

    /// Check the values an engine cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir == Path::new("") {
            return Err("cache_dir must not be empty".to_string());
        }
        if self.worker_threads == 0 {
            return Err("worker_threads must be at least 1".to_string());
        }
        if self.max_concurrent_fetches == 0 {
            return Err("max_concurrent_fetches must be at least 1".to_string());
        }
        if self.max_queued_events == 0 {
            return Err("max_queued_events must be at least 1".to_string());
        }
        if !self.catalog_base_url.starts_with("http://")
            && !self.catalog_base_url.starts_with("https://")
        {
            return Err(format!(
                "catalog_base_url must be an http(s) URL, got '{}'",
                self.catalog_base_url
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.catalog_base_url, DEFAULT_CATALOG_URL);
        assert_eq!(config.catalog_cooldown, Duration::from_millis(100));
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.names_max_age, Duration::from_secs(86_400));
        assert!(config.cache_dir.ends_with("proxysheet"));
        assert!(config.user_agent.starts_with("proxysheet/"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = EngineConfig::new("/tmp/proxies")
            .with_catalog_base_url("http://localhost:8080")
            .with_request_timeout(Duration::from_secs(5))
            .with_max_concurrent_fetches(2)
            .with_worker_threads(1)
            .with_wake_coalesce_window(Duration::from_millis(10))
            .with_log_filter("proxysheet=debug");

        assert_eq!(config.cache_dir, PathBuf::from("/tmp/proxies"));
        assert_eq!(config.catalog_base_url, "http://localhost:8080");
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.max_concurrent_fetches, 2);
        assert_eq!(config.worker_threads, 1);
        assert_eq!(config.log_filter.as_deref(), Some("proxysheet=debug"));
    }

    #[test]
    fn test_derived_paths() {
        let config = EngineConfig::new("/data/ps");
        assert_eq!(config.image_cache_dir(), PathBuf::from("/data/ps/images"));
        assert_eq!(
            config.search_cache_path(),
            PathBuf::from("/data/ps/search_results.json")
        );
        assert_eq!(
            config.names_cache_path(),
            PathBuf::from("/data/ps/card_names.json")
        );
        assert_eq!(config.log_dir(), PathBuf::from("/data/ps/logs"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(EngineConfig::new("/x")
            .with_worker_threads(0)
            .validate()
            .is_err());
        assert!(EngineConfig::new("/x")
            .with_max_concurrent_fetches(0)
            .validate()
            .is_err());
        assert!(EngineConfig::new("/x")
            .with_catalog_base_url("ftp://nope")
            .validate()
            .is_err());
        assert!(EngineConfig::new("").validate().is_err());
    }
}
