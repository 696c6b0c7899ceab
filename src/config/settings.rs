use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// Real-time channel connection options
#[derive(Debug, Clone, Deserialize)]
pub struct RealtimeConfig {
    /// WebSocket endpoint of the event source
    #[serde(default = "default_realtime_url")]
    pub url: String,
    /// Whether the transport retries after a failed or lost connection
    #[serde(default = "default_reconnection")]
    pub reconnection: bool,
    /// Maximum number of consecutive reconnection attempts
    #[serde(default = "default_reconnection_attempts")]
    pub reconnection_attempts: u32,
    /// Initial backoff delay in milliseconds
    #[serde(default = "default_reconnection_delay_ms")]
    pub reconnection_delay_ms: u64,
    /// Backoff delay cap in milliseconds
    #[serde(default = "default_reconnection_delay_max_ms")]
    pub reconnection_delay_max_ms: u64,
    /// Jitter factor (0.0 to 1.0) applied to each backoff delay
    #[serde(default = "default_randomization_factor")]
    pub randomization_factor: f64,
}

fn default_realtime_url() -> String {
    "ws://localhost:8081/ws".to_string()
}

fn default_reconnection() -> bool {
    true
}

fn default_reconnection_attempts() -> u32 {
    5
}

fn default_reconnection_delay_ms() -> u64 {
    1000
}

fn default_reconnection_delay_max_ms() -> u64 {
    5000
}

fn default_randomization_factor() -> f64 {
    0.5
}

/// Identity the client announces presence for
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfig {
    /// Explicit subject id; ignored when `token` carries a `sub` claim
    pub user_id: Option<String>,
    /// Bearer token issued by the platform API
    pub token: Option<String>,
}

/// REST collaborator that supplies the initial roster snapshot
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_base_url")]
    pub base_url: String,
    #[serde(default = "default_roster_path")]
    pub roster_path: String,
    /// Request timeout in seconds
    #[serde(default = "default_api_timeout")]
    pub timeout_secs: u64,
}

fn default_api_base_url() -> String {
    "http://localhost:3000/api".to_string()
}

fn default_roster_path() -> String {
    "/users".to_string()
}

fn default_api_timeout() -> u64 {
    10
}

/// Local read-only status endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_enabled")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_status_enabled() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8090
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogConfig {
    #[serde(default)]
    pub format: LogFormat,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("realtime.url", default_realtime_url())?
            .set_default("api.base_url", default_api_base_url())?
            .set_default("status.port", default_port())?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // PRESENCE_REALTIME__URL, PRESENCE_SESSION__TOKEN, PRESENCE_STATUS__PORT, ...
            .add_source(
                Environment::with_prefix("PRESENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    pub fn status_addr(&self) -> String {
        format!("{}:{}", self.status.host, self.status.port)
    }
}

impl RealtimeConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection_delay_max_ms.max(self.reconnection_delay_ms))
    }
}

impl ApiConfig {
    pub fn roster_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.roster_path.trim_start_matches('/')
        )
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: default_realtime_url(),
            reconnection: default_reconnection(),
            reconnection_attempts: default_reconnection_attempts(),
            reconnection_delay_ms: default_reconnection_delay_ms(),
            reconnection_delay_max_ms: default_reconnection_delay_max_ms(),
            randomization_factor: default_randomization_factor(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_api_base_url(),
            roster_path: default_roster_path(),
            timeout_secs: default_api_timeout(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: default_status_enabled(),
            host: default_host(),
            port: default_port(),
        }
    }
}
