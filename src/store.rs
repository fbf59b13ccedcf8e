//! Task store client: the atomic claim and the transactional batch apply.
//!
//! Match rows live in one schema per region (`<region>.match` /
//! `<region>.participant`), so statements are assembled with the schema name
//! inlined. Region names are validated before they touch SQL text.

use anyhow::{bail, Context, Result};
use sqlx::{QueryBuilder, Row};
use tracing::debug;

use crate::db::Db;
use crate::model::{SuccessRecord, Task};

/// A row stays claimable this many failed lookups before it is parked.
const FIND_FAIL_CEILING: i32 = 10;
const LEASE: &str = "10 minutes";
const PARTICIPANT_INSERT_CHUNK: usize = 500;

/// Region names come from configuration, but they are interpolated into SQL
/// as schema identifiers, so reject anything that is not a plain word.
pub fn schema_ident(region: &str) -> Result<&str> {
    if region.is_empty()
        || !region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
    {
        bail!("invalid region schema name: {region:?}");
    }
    Ok(region)
}

/// Atomically lease up to `limit` eligible rows for this region and return
/// them. Eligible: no details yet, under the fail ceiling, lease absent or
/// expired. `FOR UPDATE SKIP LOCKED` keeps concurrent claimers (same or
/// other processes) disjoint.
pub async fn claim_batch(db: &Db, region: &str, limit: i64) -> Result<Vec<Task>> {
    let schema = schema_ident(region)?;
    let sql = format!(
        "UPDATE {schema}.match \
         SET reserved_details = now() + INTERVAL '{LEASE}' \
         FROM ( \
             SELECT platform, match_id \
             FROM {schema}.match \
             WHERE details IS NULL \
               AND find_fails <= {FIND_FAIL_CEILING} \
               AND (reserved_details IS NULL OR reserved_details < now()) \
             ORDER BY find_fails, match_id DESC \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) selection \
         WHERE match.platform = selection.platform \
           AND match.match_id = selection.match_id \
         RETURNING match.platform, match.match_id"
    );
    let rows = sqlx::query(&sql)
        .persistent(false)
        .bind(limit)
        .fetch_all(&db.pool)
        .await
        .context("claim query failed")?;
    let tasks = rows
        .into_iter()
        .map(|row| Task {
            platform: row.get("platform"),
            match_id: row.get("match_id"),
        })
        .collect::<Vec<_>>();
    debug!(region, claimed = tasks.len(), "claimed tasks");
    Ok(tasks)
}

/// Apply one flush in a single transaction: successes mark their rows
/// complete and insert participant rows (duplicates are a no-op); not-found
/// rows take a fail-count bump and a fresh cool-down lease.
pub async fn apply_results(
    db: &Db,
    region: &str,
    successes: &[SuccessRecord],
    not_found: &[Task],
) -> Result<()> {
    let schema = schema_ident(region)?;
    let mut tx = db.pool.begin().await.context("begin flush tx")?;

    if !successes.is_empty() {
        let update_sql = format!(
            "UPDATE {schema}.match \
             SET queue = $1, \
                 \"timestamp\" = $2, \
                 duration = $3, \
                 win = $4, \
                 details = TRUE, \
                 reserved_details = NULL \
             WHERE platform = $5 AND match_id = $6"
        );
        for record in successes {
            let m = &record.summary;
            sqlx::query(&update_sql)
                .persistent(false)
                .bind(m.queue)
                .bind(m.timestamp)
                .bind(m.duration)
                .bind(m.win)
                .bind(&m.platform)
                .bind(m.match_id)
                .execute(&mut *tx)
                .await
                .context("match update failed")?;
        }

        let participants: Vec<_> = successes
            .iter()
            .flat_map(|record| record.participants.iter())
            .collect();
        for chunk in participants.chunks(PARTICIPANT_INSERT_CHUNK) {
            let mut qb = QueryBuilder::new(format!(
                "INSERT INTO {schema}.participant \
                 (platform, match_id, puuid, enemy_side, champion_id) "
            ));
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(&p.platform)
                    .push_bind(p.match_id)
                    .push_bind(&p.puuid)
                    .push_bind(p.enemy_side)
                    .push_bind(p.champion_id);
            });
            qb.push(" ON CONFLICT DO NOTHING");
            qb.build()
                .persistent(false)
                .execute(&mut *tx)
                .await
                .context("participant insert failed")?;
        }
    }

    if !not_found.is_empty() {
        let nf_sql = format!(
            "UPDATE {schema}.match \
             SET find_fails = find_fails + 1, \
                 reserved_details = now() + INTERVAL '{LEASE}' \
             WHERE platform = $1 AND match_id = $2"
        );
        for task in not_found {
            sqlx::query(&nf_sql)
                .persistent(false)
                .bind(&task.platform)
                .bind(task.match_id)
                .execute(&mut *tx)
                .await
                .context("not-found update failed")?;
        }
    }

    tx.commit().await.context("commit flush tx")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_ident_accepts_plain_regions() {
        for region in ["europe", "americas", "asia", "sea_2"] {
            assert!(schema_ident(region).is_ok());
        }
    }

    #[test]
    fn schema_ident_rejects_injection() {
        for region in ["", "Europe", "eu-west", "eu.match; DROP TABLE x", "eu rope"] {
            assert!(schema_ident(region).is_err(), "accepted {region:?}");
        }
    }
}
