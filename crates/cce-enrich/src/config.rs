use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use cce_core::DEFAULT_MAX_ATTEMPTS;
use cce_providers::HttpProviderConfig;
use cce_storage::{BackoffPolicy, EligibilityFilter, HttpClientConfig};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::EnrichError;

#[derive(Debug, Clone)]
pub struct EnrichConfig {
    pub database_url: Option<String>,
    pub provider_api_key: Option<String>,
    pub provider_base_url: String,
    pub search_engine: String,
    pub detail_engine: String,
    pub region: String,
    pub retailer_base_url: String,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub run_limit: usize,
    pub max_attempts: u32,
    /// `0` disables the recency window.
    pub recency_days: i64,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    pub archive_dir: Option<PathBuf>,
    pub reports_dir: PathBuf,
    pub scheduler_enabled: bool,
    pub enrich_cron: String,
    pub workspace_root: PathBuf,
}

impl EnrichConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let parse_or = |key: &str, default: u64| get(key).and_then(|v| v.parse().ok()).unwrap_or(default);

        Self {
            database_url: get("DATABASE_URL"),
            provider_api_key: get("CCE_PROVIDER_API_KEY"),
            provider_base_url: get("CCE_PROVIDER_BASE_URL")
                .unwrap_or_else(|| "https://serpapi.com/search.json".to_string()),
            search_engine: get("CCE_PROVIDER_SEARCH_ENGINE").unwrap_or_else(|| "home_depot".to_string()),
            detail_engine: get("CCE_PROVIDER_DETAIL_ENGINE")
                .unwrap_or_else(|| "home_depot_product".to_string()),
            region: get("CCE_PROVIDER_REGION").unwrap_or_else(|| "30303".to_string()),
            retailer_base_url: get("CCE_RETAILER_BASE_URL")
                .unwrap_or_else(|| "https://www.homedepot.com".to_string()),
            http_timeout_secs: parse_or("CCE_HTTP_TIMEOUT_SECS", 30),
            user_agent: get("CCE_USER_AGENT").unwrap_or_else(|| "cce-bot/0.1".to_string()),
            run_limit: get("CCE_RUN_LIMIT").and_then(|v| v.parse().ok()).unwrap_or(10),
            max_attempts: get("CCE_MAX_ATTEMPTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_ATTEMPTS),
            recency_days: get("CCE_RECENCY_DAYS").and_then(|v| v.parse().ok()).unwrap_or(90),
            delay_min_ms: parse_or("CCE_DELAY_MIN_MS", 500),
            delay_max_ms: parse_or("CCE_DELAY_MAX_MS", 1500),
            archive_dir: get("CCE_ARCHIVE_DIR").map(PathBuf::from),
            reports_dir: get("CCE_REPORTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./reports")),
            scheduler_enabled: get("CCE_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            enrich_cron: get("CCE_ENRICH_CRON").unwrap_or_else(|| "0 0 */6 * * *".to_string()),
            workspace_root: get("CCE_WORKSPACE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
        }
    }

    pub fn database_url(&self) -> Result<&str, EnrichError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| EnrichError::Configuration("DATABASE_URL is not set".to_string()))
    }

    pub fn provider_api_key(&self) -> Result<&str, EnrichError> {
        self.provider_api_key
            .as_deref()
            .ok_or_else(|| EnrichError::Configuration("CCE_PROVIDER_API_KEY is not set".to_string()))
    }

    /// Everything a provider-backed run needs, checked before any record is touched.
    pub fn validate_for_enrich(&self) -> Result<(), EnrichError> {
        self.provider_api_key()?;
        if self.delay_min_ms > self.delay_max_ms {
            return Err(EnrichError::Configuration(format!(
                "CCE_DELAY_MIN_MS ({}) exceeds CCE_DELAY_MAX_MS ({})",
                self.delay_min_ms, self.delay_max_ms
            )));
        }
        if self.max_attempts == 0 {
            return Err(EnrichError::Configuration("CCE_MAX_ATTEMPTS must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn provider_config(&self) -> Result<HttpProviderConfig, EnrichError> {
        Ok(HttpProviderConfig {
            base_url: self.provider_base_url.clone(),
            api_key: self.provider_api_key()?.to_string(),
            search_engine: self.search_engine.clone(),
            detail_engine: self.detail_engine.clone(),
        })
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            // Each HTTP request is billed; one provider call must be one request.
            backoff: BackoffPolicy::none(),
        }
    }

    pub fn eligibility_filter(&self, now: DateTime<Utc>) -> EligibilityFilter {
        EligibilityFilter {
            max_attempts: self.max_attempts,
            submitted_after: (self.recency_days > 0)
                .then(|| now - chrono::Duration::days(self.recency_days)),
            require_missing_core: true,
        }
    }

    pub fn delay_range(&self) -> DelayRange {
        DelayRange {
            min: Duration::from_millis(self.delay_min_ms),
            max: Duration::from_millis(self.delay_max_ms.max(self.delay_min_ms)),
        }
    }
}

/// Randomized pause between records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayRange {
    pub min: Duration,
    pub max: Duration,
}

impl DelayRange {
    pub fn none() -> Self {
        Self {
            min: Duration::ZERO,
            max: Duration::ZERO,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.max.is_zero()
    }

    pub fn sample(&self) -> Duration {
        use rand::Rng;
        if self.max <= self.min {
            return self.min;
        }
        let millis = rand::thread_rng().gen_range(self.min.as_millis()..=self.max.as_millis());
        Duration::from_millis(u64::try_from(millis).unwrap_or(u64::MAX))
    }
}

const DEFAULT_STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "pack", "set", "kit", "from", "into", "each", "piece", "count",
];
const DEFAULT_FILLER_WORDS: &[&str] = &["the", "a", "an", "with", "for", "and", "or"];
const DEFAULT_UNIT_SUFFIXES: &[&str] = &["in", "ft", "mm", "cm", "oz", "lb", "gal", "qt", "pk", "ct"];

/// Matcher and cleaner vocabularies; `rules/matching.yaml` overrides any subset.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MatchRules {
    pub stop_words: Vec<String>,
    pub filler_words: Vec<String>,
    pub unit_suffixes: Vec<String>,
}

impl Default for MatchRules {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            stop_words: owned(DEFAULT_STOP_WORDS),
            filler_words: owned(DEFAULT_FILLER_WORDS),
            unit_suffixes: owned(DEFAULT_UNIT_SUFFIXES),
        }
    }
}

impl MatchRules {
    pub fn from_workspace_root(root: &Path) -> Result<Self> {
        let path = root.join("rules").join("matching.yaml");
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }
}
