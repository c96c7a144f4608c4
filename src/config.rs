use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::hub::ForwardMode;

/// Top-level runtime configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub fix: FixSessionConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub hub: HubConfig,
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

/// FIX session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSessionConfig {
    pub host: String,
    pub port: u16,
    pub sender_comp_id: String,
    pub target_comp_id: String,

    /// Optional SenderSubID (tag 50)
    #[serde(default)]
    pub sender_sub_id: Option<String>,

    /// Optional TargetSubID (tag 57)
    #[serde(default)]
    pub target_sub_id: Option<String>,

    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,

    /// Heartbeat interval in seconds (tag 108)
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// How long to wait for the logon acknowledgment
    #[serde(default = "default_logon_timeout_secs")]
    pub logon_timeout_secs: u64,

    /// Largest gap recovered via resend before forcing a reset
    #[serde(default = "default_max_sequence_gap")]
    pub max_sequence_gap: u64,

    /// Time to wait for a resend to fill a gap before re-requesting
    #[serde(default = "default_gap_timeout_ms")]
    pub gap_timeout_ms: u64,

    /// Resend requests per gap before giving up and resetting
    #[serde(default = "default_max_resend_attempts")]
    pub max_resend_attempts: u32,

    /// Send ResetSeqNumFlag (141=Y) on logon
    #[serde(default = "default_true")]
    pub reset_on_logon: bool,

    /// Symbols subscribed automatically after every logon
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Source tag stamped on every tick from this session
    #[serde(default = "default_source")]
    pub source: String,

    /// Liquidity provider tag stamped on every tick from this session
    #[serde(default = "default_lp")]
    pub lp: String,

    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

/// Reconnection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Initial retry delay in milliseconds
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    /// Backoff multiplier
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Jitter as a fraction of the delay (0.1 = ±10%)
    #[serde(default = "default_jitter")]
    pub jitter_factor: f64,

    /// Maximum retry attempts (0 = infinite)
    #[serde(default)]
    pub max_attempts: u32,
}

/// Tick storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Ring buffer capacity per symbol
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Relative mid change below which a tick is not forwarded in throttled mode
    #[serde(default = "default_broadcast_epsilon")]
    pub broadcast_epsilon: f64,

    /// Ticks per persistence batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Sealed batches held before the oldest is dropped
    #[serde(default = "default_max_queued_batches")]
    pub max_queued_batches: usize,

    #[serde(default = "default_max_records_per_segment")]
    pub max_records_per_segment: usize,

    /// Closed bars retained per (symbol, timeframe)
    #[serde(default = "default_max_bars_per_series")]
    pub max_bars_per_series: usize,

    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    #[serde(default = "default_shutdown_flush_timeout_secs")]
    pub shutdown_flush_timeout_secs: u64,
}

/// Distribution hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Outbound queue capacity per subscriber
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Consecutive drops tolerated before a subscriber is disconnected
    #[serde(default = "default_max_drop_streak")]
    pub max_drop_streak: u32,

    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    #[serde(default)]
    pub forward_mode: ForwardMode,

    /// Static bearer tokens accepted by the built-in validator
    #[serde(default)]
    pub auth_tokens: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

impl Default for FixSessionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5201,
            sender_comp_id: "CLIENT".to_string(),
            target_comp_id: "SERVER".to_string(),
            sender_sub_id: None,
            target_sub_id: None,
            username: String::new(),
            password: String::new(),
            heartbeat_secs: default_heartbeat_secs(),
            logon_timeout_secs: default_logon_timeout_secs(),
            max_sequence_gap: default_max_sequence_gap(),
            gap_timeout_ms: default_gap_timeout_ms(),
            max_resend_attempts: default_max_resend_attempts(),
            reset_on_logon: true,
            symbols: Vec::new(),
            source: default_source(),
            lp: default_lp(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl FixSessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs.max(1))
    }

    pub fn logon_timeout(&self) -> Duration {
        Duration::from_secs(self.logon_timeout_secs)
    }

    pub fn gap_timeout(&self) -> Duration {
        Duration::from_millis(self.gap_timeout_ms)
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter_factor: default_jitter(),
            max_attempts: 0, // infinite
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            buffer_capacity: default_buffer_capacity(),
            broadcast_epsilon: default_broadcast_epsilon(),
            batch_size: default_batch_size(),
            flush_interval_secs: default_flush_interval_secs(),
            max_queued_batches: default_max_queued_batches(),
            max_records_per_segment: default_max_records_per_segment(),
            max_bars_per_series: default_max_bars_per_series(),
            retention_days: default_retention_days(),
            shutdown_flush_timeout_secs: default_shutdown_flush_timeout_secs(),
        }
    }
}

impl StoreConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn shutdown_flush_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_flush_timeout_secs)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_drop_streak: default_max_drop_streak(),
            ping_interval_secs: default_ping_interval_secs(),
            forward_mode: ForwardMode::default(),
            auth_tokens: Vec::new(),
        }
    }
}

impl HubConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs.max(1))
    }
}

impl AppConfig {
    /// Build configuration from defaults overridden by `QP_*` environment variables
    ///
    /// Loads `.env` first if present. Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let mut config = AppConfig::default();

        if let Ok(addr) = std::env::var("QP_BIND_ADDR") {
            config.server.bind_addr = addr;
        }

        let fix = &mut config.fix;
        if let Ok(host) = std::env::var("QP_FIX_HOST") {
            fix.host = host;
        }
        fix.port = env_or("QP_FIX_PORT", fix.port);
        if let Ok(v) = std::env::var("QP_FIX_SENDER_COMP_ID") {
            fix.sender_comp_id = v;
        }
        if let Ok(v) = std::env::var("QP_FIX_TARGET_COMP_ID") {
            fix.target_comp_id = v;
        }
        fix.sender_sub_id = std::env::var("QP_FIX_SENDER_SUB_ID").ok().or(fix.sender_sub_id.take());
        fix.target_sub_id = std::env::var("QP_FIX_TARGET_SUB_ID").ok().or(fix.target_sub_id.take());
        if let Ok(v) = std::env::var("QP_FIX_USERNAME") {
            fix.username = v;
        }
        if let Ok(v) = std::env::var("QP_FIX_PASSWORD") {
            fix.password = v;
        }
        fix.heartbeat_secs = env_or("QP_FIX_HEARTBEAT_SECS", fix.heartbeat_secs);
        fix.logon_timeout_secs = env_or("QP_FIX_LOGON_TIMEOUT_SECS", fix.logon_timeout_secs);
        fix.max_sequence_gap = env_or("QP_FIX_MAX_SEQUENCE_GAP", fix.max_sequence_gap);
        fix.gap_timeout_ms = env_or("QP_FIX_GAP_TIMEOUT_MS", fix.gap_timeout_ms);
        fix.max_resend_attempts = env_or("QP_FIX_MAX_RESEND_ATTEMPTS", fix.max_resend_attempts);
        fix.reset_on_logon = env_or("QP_FIX_RESET_ON_LOGON", fix.reset_on_logon);
        if let Ok(symbols) = std::env::var("QP_FIX_SYMBOLS") {
            fix.symbols = split_list(&symbols);
        }
        if let Ok(v) = std::env::var("QP_FIX_SOURCE") {
            fix.source = v;
        }
        if let Ok(v) = std::env::var("QP_FIX_LP") {
            fix.lp = v;
        }
        fix.reconnect.initial_delay_ms =
            env_or("QP_RECONNECT_INITIAL_DELAY_MS", fix.reconnect.initial_delay_ms);
        fix.reconnect.max_delay_ms = env_or("QP_RECONNECT_MAX_DELAY_MS", fix.reconnect.max_delay_ms);
        fix.reconnect.backoff_multiplier =
            env_or("QP_RECONNECT_BACKOFF_MULTIPLIER", fix.reconnect.backoff_multiplier);
        fix.reconnect.jitter_factor = env_or("QP_RECONNECT_JITTER_FACTOR", fix.reconnect.jitter_factor);
        fix.reconnect.max_attempts = env_or("QP_RECONNECT_MAX_ATTEMPTS", fix.reconnect.max_attempts);

        let store = &mut config.store;
        if let Ok(dir) = std::env::var("QP_DATA_DIR") {
            store.data_dir = PathBuf::from(dir);
        }
        store.buffer_capacity = env_or("QP_BUFFER_CAPACITY", store.buffer_capacity);
        store.broadcast_epsilon = env_or("QP_BROADCAST_EPSILON", store.broadcast_epsilon);
        store.batch_size = env_or("QP_BATCH_SIZE", store.batch_size);
        store.flush_interval_secs = env_or("QP_FLUSH_INTERVAL_SECS", store.flush_interval_secs);
        store.max_queued_batches = env_or("QP_MAX_QUEUED_BATCHES", store.max_queued_batches);
        store.max_records_per_segment =
            env_or("QP_MAX_RECORDS_PER_SEGMENT", store.max_records_per_segment);
        store.max_bars_per_series = env_or("QP_MAX_BARS_PER_SERIES", store.max_bars_per_series);
        store.retention_days = env_or("QP_RETENTION_DAYS", store.retention_days);
        store.shutdown_flush_timeout_secs =
            env_or("QP_SHUTDOWN_FLUSH_TIMEOUT_SECS", store.shutdown_flush_timeout_secs);

        let hub = &mut config.hub;
        hub.queue_capacity = env_or("QP_HUB_QUEUE_CAPACITY", hub.queue_capacity);
        hub.max_drop_streak = env_or("QP_HUB_MAX_DROP_STREAK", hub.max_drop_streak);
        hub.ping_interval_secs = env_or("QP_HUB_PING_INTERVAL_SECS", hub.ping_interval_secs);
        hub.forward_mode = env_or("QP_BROADCAST_MODE", hub.forward_mode);
        if let Ok(tokens) = std::env::var("QP_AUTH_TOKENS") {
            hub.auth_tokens = split_list(&tokens);
        }

        config
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

// Default value functions for serde
fn default_bind_addr() -> String {
    "127.0.0.1:3000".to_string()
}

fn default_true() -> bool {
    true
}

fn default_heartbeat_secs() -> u64 {
    30
}

fn default_logon_timeout_secs() -> u64 {
    10
}

fn default_max_sequence_gap() -> u64 {
    1000
}

fn default_gap_timeout_ms() -> u64 {
    500
}

fn default_max_resend_attempts() -> u32 {
    3
}

fn default_source() -> String {
    "fix".to_string()
}

fn default_lp() -> String {
    "default".to_string()
}

fn default_initial_delay() -> u64 {
    1000
}

fn default_max_delay() -> u64 {
    30000
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data/ticks")
}

fn default_buffer_capacity() -> usize {
    10_000
}

fn default_broadcast_epsilon() -> f64 {
    0.000001
}

fn default_batch_size() -> usize {
    500
}

fn default_flush_interval_secs() -> u64 {
    30
}

fn default_max_queued_batches() -> usize {
    20
}

fn default_max_records_per_segment() -> usize {
    50_000
}

fn default_max_bars_per_series() -> usize {
    500
}

fn default_retention_days() -> u32 {
    30
}

fn default_shutdown_flush_timeout_secs() -> u64 {
    5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_drop_streak() -> u32 {
    256
}

fn default_ping_interval_secs() -> u64 {
    30
}
