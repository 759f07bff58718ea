use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::models::job::Utility;
use crate::scraper::chrome::ChromeConfig;
use crate::scraper::runner::ScrapeSettings;
use crate::scraper::sites::SiteDirectory;
use crate::services::proxy_pool::ProxyPoolConfig;
use crate::services::retry::RetryPolicy;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:8000"). Optional for worker processes.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Redis connection string for jobs, queues and the proxy cache
    pub redis_url: String,

    /// Bearer token API clients must present. Required by the API server only.
    pub api_token: Option<String>,

    /// Webshare API token. Required by workers only.
    pub webshare_token: Option<String>,

    #[serde(default = "default_webshare_url")]
    pub webshare_url: String,

    /// Queues in priority order, highest first. Submissions go to the first.
    #[serde(default = "default_queue_names")]
    pub queue_names: Vec<String>,

    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,

    #[serde(default = "default_proxy_ttl_secs")]
    pub proxy_ttl_secs: u64,

    #[serde(default = "default_proxy_failure_threshold")]
    pub proxy_failure_threshold: u32,

    #[serde(default = "default_proxy_attempts")]
    pub proxy_attempts: u32,

    #[serde(default = "default_navigation_retries")]
    pub navigation_retries: u32,

    #[serde(default = "default_selector_attempts")]
    pub selector_attempts: u32,

    #[serde(default = "default_true")]
    pub allow_proxyless: bool,

    #[serde(default = "default_first_check_timeout_ms")]
    pub first_check_timeout_ms: u64,

    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,

    #[serde(default = "default_results_timeout_ms")]
    pub results_timeout_ms: u64,

    #[serde(default = "default_true")]
    pub headless: bool,

    /// Chrome binary. Autodetected when unset.
    pub chrome_path: Option<PathBuf>,

    /// JSON array of user agent strings. Built-in pool when unset.
    pub user_agents_path: Option<PathBuf>,

    /// Comma-separated ITF portal URLs per utility
    #[serde(default)]
    pub itf_url_electricity: String,

    #[serde(default)]
    pub itf_url_gas: String,

    #[serde(default)]
    pub itf_url_water: String,

    /// Address for the worker's Prometheus listener. Disabled when unset.
    pub worker_metrics_addr: Option<String>,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_webshare_url() -> String {
    "https://proxy.webshare.io/api/v2/proxy/list/".to_string()
}

fn default_queue_names() -> Vec<String> {
    vec!["parser:high".to_string(), "parser:low".to_string()]
}

fn default_job_ttl_secs() -> u64 {
    3600
}

fn default_proxy_ttl_secs() -> u64 {
    900
}

fn default_proxy_failure_threshold() -> u32 {
    3
}

fn default_proxy_attempts() -> u32 {
    5
}

fn default_navigation_retries() -> u32 {
    3
}

fn default_selector_attempts() -> u32 {
    3
}

fn default_true() -> bool {
    true
}

fn default_first_check_timeout_ms() -> u64 {
    3500
}

fn default_check_timeout_ms() -> u64 {
    500
}

fn default_results_timeout_ms() -> u64 {
    5000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    /// `QUEUE_NAMES` without blank entries. Both binaries refuse to start
    /// when nothing is left, since a pop over zero queues always fails.
    pub fn queues(&self) -> Result<Vec<String>, ConfigError> {
        let queues: Vec<String> = self
            .queue_names
            .iter()
            .map(|q| q.trim())
            .filter(|q| !q.is_empty())
            .map(String::from)
            .collect();
        if queues.is_empty() {
            return Err(ConfigError::NoQueues);
        }
        Ok(queues)
    }

    pub fn proxy_pool_config(&self) -> ProxyPoolConfig {
        ProxyPoolConfig {
            ttl: Duration::from_secs(self.proxy_ttl_secs),
            failure_threshold: self.proxy_failure_threshold,
            refill_policy: RetryPolicy::new(3, Duration::from_secs(2)),
            ..ProxyPoolConfig::default()
        }
    }

    pub fn scrape_settings(&self) -> ScrapeSettings {
        ScrapeSettings {
            proxy_attempts: self.proxy_attempts,
            navigation_retries: self.navigation_retries,
            selector_attempts: self.selector_attempts,
            allow_proxyless: self.allow_proxyless,
            first_check_timeout: Duration::from_millis(self.first_check_timeout_ms),
            check_timeout: Duration::from_millis(self.check_timeout_ms),
            results_timeout: Duration::from_millis(self.results_timeout_ms),
        }
    }

    pub fn chrome_config(&self) -> ChromeConfig {
        ChromeConfig {
            headless: self.headless,
            chrome_path: self.chrome_path.clone(),
            ..Default::default()
        }
    }

    pub fn site_directory(&self) -> SiteDirectory {
        SiteDirectory::new()
            .with_urls(Utility::Electricity, &self.itf_url_electricity)
            .with_urls(Utility::Gas, &self.itf_url_gas)
            .with_urls(Utility::Water, &self.itf_url_water)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("QUEUE_NAMES must name at least one queue")]
    NoQueues,
}
