//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use saga::services::payment::MIDTRANS_SANDBOX_URL;

/// Output format of the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// How stock is reserved with the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReservationStrategy {
    /// Synchronous catalog call behind a circuit breaker.
    #[default]
    Rpc,
    /// Publish to the broker and wait for the catalog's reply.
    Broker,
}

impl FromStr for ReservationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rpc" | "http" => Ok(Self::Rpc),
            "broker" | "kafka" => Ok(Self::Broker),
            other => Err(format!("unknown reservation strategy: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `text` or `json`
/// - `DATABASE_URL`: PostgreSQL connection; in-memory storage when unset
/// - `CATALOG_URL`: catalog base URL; in-memory catalog when unset
/// - `MIDTRANS_BASE_URL`, `MIDTRANS_SERVER_KEY`: payment gateway; the
///   in-memory gateway is used when no key is set
/// - `KAFKA_BROKERS`, `BROKER_TOPIC`: broker connection (needs the `kafka`
///   feature); in-memory broker when unset
/// - `RESERVATION_STRATEGY`: `rpc` or `broker`
/// - `RESERVATION_TIMEOUT_SECS`, `SWEEP_INTERVAL_SECS`, `CATALOG_TIMEOUT_SECS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub catalog_url: Option<String>,
    pub midtrans_base_url: String,
    pub midtrans_server_key: Option<String>,
    pub kafka_brokers: Option<String>,
    pub broker_topic: String,
    pub reservation_strategy: ReservationStrategy,
    pub reservation_timeout: Duration,
    pub sweep_interval: Duration,
    pub catalog_timeout: Duration,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    ///
    /// Empty values count as unset. Values that fail to parse, and zero
    /// durations, fall back to the default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let secs = |key: &str| {
            parse::<u64>(get(key))
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
        };
        let defaults = Self::default();

        Self {
            host: get("HOST").unwrap_or(defaults.host),
            port: parse(get("PORT")).unwrap_or(defaults.port),
            log_level: get("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parse(get("LOG_FORMAT")).unwrap_or(defaults.log_format),
            database_url: get("DATABASE_URL"),
            catalog_url: get("CATALOG_URL"),
            midtrans_base_url: get("MIDTRANS_BASE_URL").unwrap_or(defaults.midtrans_base_url),
            midtrans_server_key: get("MIDTRANS_SERVER_KEY"),
            kafka_brokers: get("KAFKA_BROKERS"),
            broker_topic: get("BROKER_TOPIC").unwrap_or(defaults.broker_topic),
            reservation_strategy: parse(get("RESERVATION_STRATEGY"))
                .unwrap_or(defaults.reservation_strategy),
            reservation_timeout: secs("RESERVATION_TIMEOUT_SECS")
                .unwrap_or(defaults.reservation_timeout),
            sweep_interval: secs("SWEEP_INTERVAL_SECS").unwrap_or(defaults.sweep_interval),
            catalog_timeout: secs("CATALOG_TIMEOUT_SECS").unwrap_or(defaults.catalog_timeout),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            catalog_url: None,
            midtrans_base_url: MIDTRANS_SANDBOX_URL.to_string(),
            midtrans_server_key: None,
            kafka_brokers: None,
            broker_topic: "orders".to_string(),
            reservation_strategy: ReservationStrategy::Rpc,
            reservation_timeout: saga::services::DEFAULT_RESERVATION_TIMEOUT,
            sweep_interval: saga::DEFAULT_SWEEP_INTERVAL,
            catalog_timeout: Duration::from_secs(10),
        }
    }
}
