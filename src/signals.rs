//! Externally-polled lifecycle signals: service-enabled flag, API
//! credential, per-region active map. They gate claiming and new fetches
//! only; in-flight requests are never interrupted by a signal change.
//!
//! Signals live in a shared key/value table (see `SERVICE_CONFIG_TABLE`),
//! with env-var overrides for each key so a single worker can run without
//! the control plane.

use std::collections::HashMap;

use serde_json::Value;
use sqlx::Row;
use tracing::warn;

use crate::db::Db;
use crate::util::env::{env_flag, env_opt};

const KEY_ENABLED: &str = "service_match_details";
const KEY_API_KEY: &str = "api_key";
const KEY_REGIONS: &str = "regions";

#[derive(Debug, Clone, Default)]
pub struct Signals {
    pub service_enabled: bool,
    pub api_key: Option<String>,
    /// region -> active; regions missing from the map stay as they are.
    pub region_active: HashMap<String, bool>,
}

impl Signals {
    pub fn valid_api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| api_key_valid(k))
    }

    pub fn region_enabled(&self, region: &str) -> bool {
        self.region_active.get(region).copied().unwrap_or(true)
    }
}

/// Credentials must carry the provider prefix to be considered usable.
pub fn api_key_valid(key: &str) -> bool {
    key.starts_with("RGAPI")
}

/// One poll. Store errors degrade to the env-var overrides; a completely
/// unreachable control plane reads as "disabled", never as a crash.
pub async fn fetch(db: &Db, table: &str) -> Signals {
    let mut signals = Signals {
        service_enabled: env_flag("SERVICE_ENABLED", false),
        api_key: env_opt("RIOT_API_KEY"),
        region_active: HashMap::new(),
    };

    let sql = format!("SELECT key, value FROM {table} WHERE key = ANY($1)");
    let rows = sqlx::query(&sql)
        .persistent(false)
        .bind(vec![KEY_ENABLED, KEY_API_KEY, KEY_REGIONS])
        .fetch_all(&db.pool)
        .await;
    let rows = match rows {
        Ok(rows) => rows,
        Err(err) => {
            warn!(error = %err, table, "signal poll failed; using env fallbacks");
            return signals;
        }
    };

    for row in rows {
        let key: String = row.get("key");
        let value: String = row.get("value");
        match key.as_str() {
            KEY_ENABLED => signals.service_enabled = value.trim() == "true",
            KEY_API_KEY => signals.api_key = Some(value.trim().to_string()),
            KEY_REGIONS => signals.region_active = parse_region_map(&value),
            _ => {}
        }
    }
    signals
}

/// `{"europe": {"status": true}, ...}` -> region -> active.
fn parse_region_map(raw: &str) -> HashMap<String, bool> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) else {
        warn!("unparseable regions signal payload");
        return HashMap::new();
    };
    map.into_iter()
        .filter_map(|(region, data)| {
            data.get("status")
                .and_then(Value::as_bool)
                .map(|status| (region.to_lowercase(), status))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_foreign_credentials() {
        assert!(api_key_valid("RGAPI-1234-abcd"));
        assert!(!api_key_valid("HSAPI-1234"));
        assert!(!api_key_valid(""));
    }

    #[test]
    fn parses_region_status_map() {
        let map = parse_region_map(
            r#"{"EUROPE": {"status": true}, "americas": {"status": false}, "asia": {}}"#,
        );
        assert_eq!(map.get("europe"), Some(&true));
        assert_eq!(map.get("americas"), Some(&false));
        // entries without a status are skipped, not defaulted
        assert!(!map.contains_key("asia"));
    }

    #[test]
    fn missing_regions_default_to_active() {
        let signals = Signals {
            service_enabled: true,
            api_key: Some("RGAPI-x".into()),
            region_active: HashMap::from([("asia".to_string(), false)]),
        };
        assert!(signals.region_enabled("europe"));
        assert!(!signals.region_enabled("asia"));
    }
}
