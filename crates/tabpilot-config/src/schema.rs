//! Configuration schema definitions.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub relay: RelayConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub host: HostConfig,

    #[serde(default)]
    pub timing: TimingConfig,

    /// Viewport override applied whenever a fresh instrumentation session attaches.
    #[serde(default)]
    pub viewport: Option<ViewportConfig>,
}

/// Orchestrator-side listener the agent connects to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_path")]
    pub path: String,

    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Where screenshots and HTML dumps are written. `None` disables saving.
    #[serde(default)]
    pub artifact_dir: Option<PathBuf>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    19988
}

fn default_path() -> String {
    "/agent".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_batch_timeout_ms() -> u64 {
    120_000
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            path: default_path(),
            request_timeout_ms: default_request_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
            artifact_dir: None,
        }
    }
}

impl RelayConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }
}

/// Agent-side connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_orchestrator_url")]
    pub orchestrator_url: String,

    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    /// 0 means retry forever.
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_orchestrator_url() -> String {
    "ws://127.0.0.1:19988/agent".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: default_orchestrator_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

impl AgentConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

/// Browser host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    #[serde(default = "default_cdp_endpoint")]
    pub cdp_endpoint: String,

    /// Upper bound for a single CDP call.
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,
}

fn default_call_timeout_ms() -> u64 {
    30_000
}

fn default_cdp_endpoint() -> String {
    "http://localhost:9222".to_string()
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            cdp_endpoint: default_cdp_endpoint(),
            call_timeout_ms: default_call_timeout_ms(),
        }
    }
}

impl HostConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }
}

/// Convergence parameters for the stability detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StabilityConfig {
    pub timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub required_samples: u32,
}

impl StabilityConfig {
    /// Fresh targets and fresh navigations.
    pub fn new_target() -> Self {
        Self {
            timeout_ms: 8000,
            poll_interval_ms: 250,
            required_samples: 3,
        }
    }

    /// Continuation of an already loaded target.
    pub fn existing_target() -> Self {
        Self {
            timeout_ms: 3000,
            poll_interval_ms: 200,
            required_samples: 2,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Timers used by the lifecycle coordinator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_fast_detect_ms")]
    pub fast_detect_ms: u64,

    #[serde(default = "default_long_wait_ms")]
    pub long_wait_ms: u64,

    #[serde(default = "default_busy_wait_ms")]
    pub busy_wait_ms: u64,

    #[serde(default = "default_attach_cache_secs")]
    pub attach_cache_secs: u64,

    #[serde(default = "default_attach_retries")]
    pub attach_retries: u32,

    #[serde(default = "default_attach_retry_delay_ms")]
    pub attach_retry_delay_ms: u64,

    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,

    #[serde(default = "default_navigation_timeout_ms")]
    pub navigation_timeout_ms: u64,

    #[serde(default = "default_batch_interval_ms")]
    pub batch_interval_ms: u64,

    #[serde(default = "default_max_wait_seconds")]
    pub max_wait_seconds: u64,

    #[serde(default = "default_scroll_step")]
    pub scroll_step: i32,

    #[serde(default = "StabilityConfig::new_target")]
    pub stability_new: StabilityConfig,

    #[serde(default = "StabilityConfig::existing_target")]
    pub stability_existing: StabilityConfig,
}

fn default_fast_detect_ms() -> u64 {
    500
}

fn default_long_wait_ms() -> u64 {
    5000
}

fn default_busy_wait_ms() -> u64 {
    10_000
}

fn default_attach_cache_secs() -> u64 {
    300
}

fn default_attach_retries() -> u32 {
    3
}

fn default_attach_retry_delay_ms() -> u64 {
    200
}

fn default_settle_ms() -> u64 {
    300
}

fn default_navigation_timeout_ms() -> u64 {
    30_000
}

fn default_batch_interval_ms() -> u64 {
    100
}

fn default_max_wait_seconds() -> u64 {
    60
}

fn default_scroll_step() -> i32 {
    400
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            fast_detect_ms: default_fast_detect_ms(),
            long_wait_ms: default_long_wait_ms(),
            busy_wait_ms: default_busy_wait_ms(),
            attach_cache_secs: default_attach_cache_secs(),
            attach_retries: default_attach_retries(),
            attach_retry_delay_ms: default_attach_retry_delay_ms(),
            settle_ms: default_settle_ms(),
            navigation_timeout_ms: default_navigation_timeout_ms(),
            batch_interval_ms: default_batch_interval_ms(),
            max_wait_seconds: default_max_wait_seconds(),
            scroll_step: default_scroll_step(),
            stability_new: StabilityConfig::new_target(),
            stability_existing: StabilityConfig::existing_target(),
        }
    }
}

impl TimingConfig {
    pub fn fast_detect(&self) -> Duration {
        Duration::from_millis(self.fast_detect_ms)
    }

    pub fn long_wait(&self) -> Duration {
        Duration::from_millis(self.long_wait_ms)
    }

    pub fn busy_wait(&self) -> Duration {
        Duration::from_millis(self.busy_wait_ms)
    }

    pub fn attach_cache(&self) -> Duration {
        Duration::from_secs(self.attach_cache_secs)
    }

    pub fn attach_retry_delay(&self) -> Duration {
        Duration::from_millis(self.attach_retry_delay_ms)
    }

    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }

    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_millis(self.navigation_timeout_ms)
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.batch_interval_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportConfig {
    pub width: u32,
    pub height: u32,
}
