//! Publish-only notification sink for downstream consumers (NOTIFY fan-out).
//! Delivery problems are the consumer's concern; a failed publish is logged
//! and never affects the flush that triggered it.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Db;

#[derive(Debug, Serialize)]
struct FlushNotice<'a> {
    region: &'a str,
    applied: usize,
    not_found: usize,
    at: DateTime<Utc>,
}

pub async fn publish_flush(
    db: &Db,
    channel: &str,
    region: &str,
    applied: usize,
    not_found: usize,
) -> Result<()> {
    let notice = FlushNotice {
        region,
        applied,
        not_found,
        at: Utc::now(),
    };
    let payload = serde_json::to_string(&notice).context("serialize flush notice")?;
    sqlx::query("SELECT pg_notify($1, $2)")
        .persistent(false)
        .bind(channel)
        .bind(payload)
        .execute(&db.pool)
        .await
        .context("pg_notify failed")?;
    Ok(())
}
