//! Worker tuning knobs, all env-overridable with the service defaults baked in.
use std::path::PathBuf;
use std::time::Duration;

use crate::util::env::{env_opt, env_parse};

#[derive(Debug, Clone)]
pub struct Settings {
    /// Concurrent fetch executors per region.
    pub worker_count: usize,
    /// Tasks popped per worker round.
    pub fetch_batch: usize,
    /// Rows requested per atomic claim.
    pub claim_batch: i64,
    /// Refill backpressure: no claim while the backlog is longer than this.
    pub backlog_cap: usize,
    /// Aggregated outcomes that trigger a flush.
    pub flush_threshold: usize,
    /// Refill loop cadence.
    pub refill_poll: Duration,
    /// Sleep after a claim that returned zero rows.
    pub idle_sleep: Duration,
    /// Worker sleep while stopped, suppressed, or out of tasks.
    pub worker_idle: Duration,
    /// Lifecycle signal poll cadence.
    pub signal_poll: Duration,
    /// Key/value table holding the lifecycle signals.
    pub config_table: String,
    /// NOTIFY channel for flush summaries.
    pub notify_channel: String,
    /// Raw-response dump directory; dumps are off when unset.
    pub dump_dir: Option<PathBuf>,
    /// Store pool size.
    pub db_max_conns: u32,
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            worker_count: env_parse("WORKER_COUNT", 10usize).max(1),
            fetch_batch: env_parse("FETCH_BATCH", 5usize).max(1),
            claim_batch: env_parse("CLAIM_BATCH", 500i64).max(1),
            backlog_cap: env_parse("BACKLOG_CAP", 200usize),
            flush_threshold: env_parse("FLUSH_THRESHOLD", 100usize).max(1),
            refill_poll: Duration::from_secs(env_parse("REFILL_POLL_SECS", 5u64).max(1)),
            idle_sleep: Duration::from_secs(env_parse("IDLE_SLEEP_SECS", 30u64).max(1)),
            worker_idle: Duration::from_secs(env_parse("WORKER_IDLE_SECS", 5u64).max(1)),
            signal_poll: Duration::from_secs(env_parse("SIGNAL_POLL_SECS", 5u64).max(1)),
            config_table: env_opt("SERVICE_CONFIG_TABLE")
                .unwrap_or_else(|| "public.service_config".to_string()),
            notify_channel: env_opt("NOTIFY_CHANNEL")
                .unwrap_or_else(|| "match_details".to_string()),
            dump_dir: env_opt("DETAILS_DUMP_DIR").map(PathBuf::from),
            db_max_conns: env_parse("DB_MAX_CONNS", 20u32).max(1),
        }
    }

    /// Regions this process is responsible for.
    pub fn regions() -> Vec<String> {
        env_opt("REGIONS")
            .unwrap_or_else(|| "europe,americas,asia".to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}
