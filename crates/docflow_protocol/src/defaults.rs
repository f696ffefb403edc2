//! Canonical default values shared by the bus, the pipeline and the CLI.

pub const DEFAULT_BROKER_URL: &str = "memory://";
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.8;
pub const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_REDELIVERIES: u32 = 5;
pub const DEFAULT_PREFETCH: u16 = 1;
pub const DEFAULT_PUBLISH_RETRIES: u32 = 3;
pub const DEFAULT_PUBLISH_RETRY_BASE_MS: u64 = 200;
pub const MAX_PUBLISH_RETRY_DELAY_MS: u64 = 5_000;
pub const DEFAULT_CONFIG_FILE: &str = "docflow.toml";
