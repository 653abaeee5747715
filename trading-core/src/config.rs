// trading-core/src/config.rs
// Connectivity settings: defaults, optional config.toml, HL__* environment.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};
use url::Url;

use crate::exchange::directory::DirectoryConfig;
use crate::exchange::errors::ExchangeError;
use crate::exchange::rate_limit::{BucketConfig, RateLimiterConfig};
use crate::exchange::rest::RestConfig;
use crate::exchange::signing::{ActionSigner, Network};
use crate::exchange::ws::{BackoffPolicy, SupervisorConfig};
use crate::runtime::TimerRegistryConfig;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WalletSettings {
    #[serde(default)]
    pub private_key: Option<String>,
}

/// Alternative hosts (local node, proxy); the network's public endpoints
/// are used when unset
#[derive(Debug, Deserialize, Clone, Default)]
pub struct EndpointSettings {
    #[serde(default)]
    pub api_url: Option<String>,
    #[serde(default)]
    pub ws_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StreamSettings {
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub max_attempts: u32,
    pub buffer_capacity: usize,
    pub replay_interval_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    pub public_capacity: f64,
    pub public_refill_per_sec: f64,
    pub private_capacity: f64,
    pub private_refill_per_sec: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DirectorySettings {
    /// 0 disables the staleness check
    pub ttl_secs: u64,
    pub max_init_attempts: u32,
    pub retry_base_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RestSettings {
    pub request_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TimerSettings {
    pub shutdown_grace_ms: u64,
}

/// Logging configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl LoggingConfig {
    /// Installs the global tracing subscriber. `RUST_LOG` wins over `level`.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        match self.format.as_str() {
            "json" => {
                fmt().json().with_env_filter(filter).init();
            }
            _ => {
                fmt().with_env_filter(filter).init();
            }
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub network: Network,
    #[serde(default)]
    pub wallet: WalletSettings,
    #[serde(default)]
    pub endpoints: EndpointSettings,
    pub stream: StreamSettings,
    pub rate_limit: RateLimitSettings,
    pub directory: DirectorySettings,
    pub rest: RestSettings,
    pub timers: TimerSettings,
    pub logging: LoggingConfig,
}

impl Settings {
    /// Defaults, then `config.toml` (optional), then `HL_*` variables
    /// (`HL_WALLET__PRIVATE_KEY`, `HL_STREAM__MAX_ATTEMPTS`, ...)
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Settings = Self::defaults()?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("HL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Endpoint overrides must be http(s) / ws(s) URLs; the heartbeat
    /// timeout must be longer than the ping interval
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_url("endpoints.api_url", self.endpoints.api_url.as_deref(), &["http", "https"])?;
        check_url("endpoints.ws_url", self.endpoints.ws_url.as_deref(), &["ws", "wss"])?;
        if self.stream.heartbeat_timeout_ms <= self.stream.heartbeat_interval_ms {
            return Err(ConfigError::Message(format!(
                "stream.heartbeat_timeout_ms ({}) must exceed stream.heartbeat_interval_ms ({})",
                self.stream.heartbeat_timeout_ms, self.stream.heartbeat_interval_ms
            )));
        }
        Ok(())
    }

    pub fn api_url(&self) -> String {
        self.endpoints
            .api_url
            .clone()
            .unwrap_or_else(|| self.network.api_url().to_string())
    }

    pub fn ws_url(&self) -> String {
        self.endpoints
            .ws_url
            .clone()
            .unwrap_or_else(|| self.network.ws_url().to_string())
    }

    /// Builder preloaded with every default
    pub fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("network", "testnet")?
            .set_default("stream.heartbeat_interval_ms", 15_000)?
            .set_default("stream.heartbeat_timeout_ms", 45_000)?
            .set_default("stream.backoff_base_ms", 1_000)?
            .set_default("stream.backoff_max_ms", 30_000)?
            .set_default("stream.max_attempts", 10)?
            .set_default("stream.buffer_capacity", 100)?
            .set_default("stream.replay_interval_ms", 200)?
            .set_default("rate_limit.public_capacity", 10.0)?
            .set_default("rate_limit.public_refill_per_sec", 10.0)?
            .set_default("rate_limit.private_capacity", 5.0)?
            .set_default("rate_limit.private_refill_per_sec", 5.0)?
            .set_default("directory.ttl_secs", 0)?
            .set_default("directory.max_init_attempts", 3)?
            .set_default("directory.retry_base_ms", 1_000)?
            .set_default("rest.request_timeout_ms", 10_000)?
            .set_default("rest.max_retries", 5)?
            .set_default("rest.retry_delay_ms", 1_000)?
            .set_default("timers.shutdown_grace_ms", 5_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    pub fn init_logging(&self) {
        self.logging.init();
    }

    /// Signer for the configured wallet, `None` when no key is set
    pub fn signer(&self) -> Result<Option<ActionSigner>, ExchangeError> {
        match self.wallet.private_key.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(key) => Ok(Some(ActionSigner::from_private_key(key, self.network)?)),
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        let s = &self.stream;
        SupervisorConfig {
            url: self.ws_url(),
            heartbeat_interval: Duration::from_millis(s.heartbeat_interval_ms),
            heartbeat_timeout: Duration::from_millis(s.heartbeat_timeout_ms),
            backoff: BackoffPolicy {
                base: Duration::from_millis(s.backoff_base_ms),
                cap: Duration::from_millis(s.backoff_max_ms),
                max_attempts: s.max_attempts,
            },
            buffer_capacity: s.buffer_capacity,
            replay_interval: Duration::from_millis(s.replay_interval_ms),
        }
    }

    pub fn rate_limiter_config(&self) -> RateLimiterConfig {
        let r = &self.rate_limit;
        RateLimiterConfig {
            public: BucketConfig {
                capacity: r.public_capacity,
                refill_per_sec: r.public_refill_per_sec,
            },
            private: BucketConfig {
                capacity: r.private_capacity,
                refill_per_sec: r.private_refill_per_sec,
            },
        }
    }

    pub fn directory_config(&self) -> DirectoryConfig {
        let d = &self.directory;
        DirectoryConfig {
            ttl: (d.ttl_secs > 0).then(|| Duration::from_secs(d.ttl_secs)),
            max_init_attempts: d.max_init_attempts,
            retry_base: Duration::from_millis(d.retry_base_ms),
        }
    }

    pub fn rest_config(&self) -> RestConfig {
        RestConfig {
            request_timeout: Duration::from_millis(self.rest.request_timeout_ms),
            max_retries: self.rest.max_retries,
            retry_delay: Duration::from_millis(self.rest.retry_delay_ms),
        }
    }

    pub fn timer_config(&self) -> TimerRegistryConfig {
        TimerRegistryConfig {
            shutdown_grace: Duration::from_millis(self.timers.shutdown_grace_ms),
        }
    }
}

fn check_url(key: &str, raw: Option<&str>, schemes: &[&str]) -> Result<(), ConfigError> {
    let Some(raw) = raw else {
        return Ok(());
    };
    let parsed = Url::parse(raw).map_err(|e| ConfigError::Message(format!("{}: {}", key, e)))?;
    if !schemes.contains(&parsed.scheme()) {
        return Err(ConfigError::Message(format!(
            "{}: unsupported scheme '{}'",
            key,
            parsed.scheme()
        )));
    }
    Ok(())
}
