//! Data model for one unit of fetch work and the outcome taxonomy.
//!
//! Every fetch ends in exactly one `FetchOutcome` variant; `classify` is the
//! single place a raw endpoint result turns into one. Retryable conditions
//! never mutate the task, so a retried task re-enters the backlog unchanged.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use tracing::{debug, error};

use crate::endpoint::{FetchError, FetchResult, SuppressionGate};

/// One (platform, match id) unit of work, claimed under lease from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub platform: String,
    pub match_id: i64,
}

impl Task {
    pub fn new(platform: impl Into<String>, match_id: i64) -> Self {
        Self {
            platform: platform.into(),
            match_id,
        }
    }
}

/// Parsed projection of a successful match fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSummary {
    pub queue: i64,
    pub timestamp: DateTime<Utc>,
    pub duration: i64,
    pub win: bool,
    pub platform: String,
    pub match_id: i64,
}

/// Per-player row for a fetched match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub platform: String,
    pub match_id: i64,
    pub puuid: String,
    /// True when the player is not on team 100.
    pub enemy_side: bool,
    /// -1 sentinel when the raw id is a placeholder (>= 30000).
    pub champion_id: i64,
}

/// A success batch entry kept by the aggregator until the next flush.
#[derive(Debug, Clone)]
pub struct SuccessRecord {
    pub summary: MatchSummary,
    pub participants: Vec<Participant>,
}

/// Closed classification of one fetch attempt.
#[derive(Debug)]
pub enum FetchOutcome {
    Success {
        summary: MatchSummary,
        participants: Vec<Participant>,
        /// gameVersion major.minor, used for the raw dump path.
        patch: String,
        raw: Value,
    },
    /// 404 or a non-competitive (queue 0) match; bumps find_fails on flush.
    NotFound(Task),
    /// Transient condition; the task goes back to the backlog unchanged.
    Retry(Task),
}

/// Classify one endpoint result. Soft local-limits additionally arm the
/// region's suppression gate so no further requests go out before the
/// provider-given deadline.
pub fn classify(task: Task, result: FetchResult, gate: &SuppressionGate) -> FetchOutcome {
    match result {
        Ok(body) => match parse_match(&task, &body) {
            Ok(Parsed {
                summary,
                participants,
                patch,
            }) => FetchOutcome::Success {
                summary,
                participants,
                patch,
                raw: body,
            },
            Err(ParseError::NonCompetitive) => {
                debug!(platform = %task.platform, match_id = task.match_id, "queue 0, treating as not found");
                FetchOutcome::NotFound(task)
            }
            Err(ParseError::Malformed(err)) => {
                // Treated as transient; the fail counter is only touched by
                // the NotFound path.
                error!(platform = %task.platform, match_id = task.match_id, error = %err, "unparseable match payload");
                FetchOutcome::Retry(task)
            }
        },
        Err(FetchError::NotFound) => FetchOutcome::NotFound(task),
        Err(FetchError::SoftLimit { retry_after }) => {
            gate.suppress_for(retry_after);
            FetchOutcome::Retry(task)
        }
        Err(FetchError::RateLimited) => {
            error!(platform = %task.platform, match_id = task.match_id, "provider ratelimit");
            FetchOutcome::Retry(task)
        }
        Err(FetchError::Status(status)) => {
            error!(platform = %task.platform, match_id = task.match_id, status, "non-success status");
            FetchOutcome::Retry(task)
        }
        Err(FetchError::Transport(err)) => {
            error!(platform = %task.platform, match_id = task.match_id, error = %err, "transport failure");
            FetchOutcome::Retry(task)
        }
    }
}

struct Parsed {
    summary: MatchSummary,
    participants: Vec<Participant>,
    patch: String,
}

enum ParseError {
    /// queueId 0: custom game, excluded from further fetching.
    NonCompetitive,
    Malformed(anyhow::Error),
}

impl From<anyhow::Error> for ParseError {
    fn from(err: anyhow::Error) -> Self {
        ParseError::Malformed(err)
    }
}

fn parse_match(task: &Task, body: &Value) -> std::result::Result<Parsed, ParseError> {
    let info = body.get("info").context("missing info")?;
    let queue = info
        .get("queueId")
        .and_then(Value::as_i64)
        .context("missing queueId")?;
    if queue == 0 {
        return Err(ParseError::NonCompetitive);
    }

    let creation_ms = info
        .get("gameCreation")
        .and_then(Value::as_i64)
        .context("missing gameCreation")?;
    let timestamp = Utc
        .timestamp_opt(creation_ms.div_euclid(1000), 0)
        .single()
        .context("gameCreation out of range")?;

    let start = info.get("gameStartTimestamp").and_then(Value::as_i64);
    let end = info.get("gameEndTimestamp").and_then(Value::as_i64);
    let duration = match (start, end) {
        (Some(start), Some(end)) => (end - start) / 1000,
        _ => {
            let raw = info
                .get("gameDuration")
                .and_then(Value::as_i64)
                .context("missing gameDuration")?;
            // ms-era payloads report milliseconds
            if raw >= 30_000 {
                raw / 1000
            } else {
                raw
            }
        }
    };

    let win = info
        .get("teams")
        .and_then(Value::as_array)
        .and_then(|teams| {
            teams
                .iter()
                .find(|t| t.get("teamId").and_then(Value::as_i64) == Some(100))
        })
        .and_then(|t| t.get("win"))
        .and_then(Value::as_bool)
        .context("missing win flag for team 100")?;

    let patch = info
        .get("gameVersion")
        .and_then(Value::as_str)
        .map(|v| {
            v.split('.')
                .take(2)
                .collect::<Vec<_>>()
                .join(".")
        })
        .unwrap_or_default();

    let participants = info
        .get("participants")
        .and_then(Value::as_array)
        .context("missing participants")?
        .iter()
        .map(|p| parse_participant(task, p))
        .collect::<Result<Vec<_>>>()?;

    Ok(Parsed {
        summary: MatchSummary {
            queue,
            timestamp,
            duration,
            win,
            platform: task.platform.clone(),
            match_id: task.match_id,
        },
        participants,
        patch,
    })
}

fn parse_participant(task: &Task, player: &Value) -> Result<Participant> {
    let puuid = player
        .get("puuid")
        .and_then(Value::as_str)
        .context("missing puuid")?
        .to_string();
    let team_id = player
        .get("teamId")
        .and_then(Value::as_i64)
        .context("missing teamId")?;
    let champion_id = player
        .get("championId")
        .and_then(Value::as_i64)
        .context("missing championId")?;
    Ok(Participant {
        platform: task.platform.clone(),
        match_id: task.match_id,
        puuid,
        enemy_side: team_id != 100,
        champion_id: if champion_id >= 30_000 { -1 } else { champion_id },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn task() -> Task {
        Task::new("NA", 4_711)
    }

    fn ranked_body() -> Value {
        json!({
            "info": {
                "queueId": 420,
                "gameCreation": 1_690_000_000_000i64,
                "gameDuration": 1_800,
                "gameVersion": "13.14.523.1234",
                "teams": [
                    { "teamId": 100, "win": true },
                    { "teamId": 200, "win": false }
                ],
                "participants": [
                    { "puuid": "a-1", "teamId": 100, "championId": 64 },
                    { "puuid": "b-1", "teamId": 200, "championId": 30_001 }
                ]
            }
        })
    }

    #[test]
    fn parses_ranked_match() {
        let gate = SuppressionGate::default();
        match classify(task(), Ok(ranked_body()), &gate) {
            FetchOutcome::Success {
                summary,
                participants,
                patch,
                ..
            } => {
                assert_eq!(summary.queue, 420);
                assert_eq!(summary.timestamp.to_rfc3339(), "2023-07-22T04:26:40+00:00");
                assert_eq!(summary.duration, 1_800);
                assert!(summary.win);
                assert_eq!(patch, "13.14");
                assert_eq!(participants.len(), 2);
                assert!(!participants[0].enemy_side);
                assert_eq!(participants[0].champion_id, 64);
                assert!(participants[1].enemy_side);
                // placeholder champion ids collapse to the sentinel
                assert_eq!(participants[1].champion_id, -1);
            }
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn duration_from_start_end_timestamps() {
        let mut body = ranked_body();
        body["info"]["gameStartTimestamp"] = json!(1_690_000_060_000i64);
        body["info"]["gameEndTimestamp"] = json!(1_690_001_860_000i64);
        let gate = SuppressionGate::default();
        match classify(task(), Ok(body), &gate) {
            FetchOutcome::Success { summary, .. } => assert_eq!(summary.duration, 1_800),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn millisecond_duration_is_normalized() {
        let mut body = ranked_body();
        body["info"]["gameDuration"] = json!(1_800_000);
        let gate = SuppressionGate::default();
        match classify(task(), Ok(body), &gate) {
            FetchOutcome::Success { summary, .. } => assert_eq!(summary.duration, 1_800),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[test]
    fn queue_zero_is_not_found() {
        let mut body = ranked_body();
        body["info"]["queueId"] = json!(0);
        let gate = SuppressionGate::default();
        match classify(task(), Ok(body), &gate) {
            FetchOutcome::NotFound(t) => assert_eq!(t, task()),
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[test]
    fn http_not_found_is_not_found() {
        let gate = SuppressionGate::default();
        match classify(task(), Err(FetchError::NotFound), &gate) {
            FetchOutcome::NotFound(t) => assert_eq!(t, task()),
            other => panic!("expected not-found, got {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_retries_unchanged() {
        let gate = SuppressionGate::default();
        match classify(task(), Ok(json!({"info": {"queueId": 420}})), &gate) {
            FetchOutcome::Retry(t) => assert_eq!(t, task()),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn soft_limit_retries_unchanged_and_arms_suppression() {
        use std::time::Duration;
        use tokio::time::advance;

        let gate = SuppressionGate::default();
        let result = Err(FetchError::SoftLimit {
            retry_after: Duration::from_secs(5),
        });
        match classify(task(), result, &gate) {
            FetchOutcome::Retry(t) => assert_eq!(t, task()),
            other => panic!("expected retry, got {other:?}"),
        }
        let remaining = gate.remaining().expect("suppression deadline armed");
        assert!(remaining <= Duration::from_secs(5));
        assert!(remaining > Duration::from_secs(4));
        advance(Duration::from_secs(5)).await;
        assert!(gate.remaining().is_none());
    }

    #[test]
    fn transient_statuses_retry_unchanged() {
        let gate = SuppressionGate::default();
        for err in [FetchError::RateLimited, FetchError::Status(500)] {
            match classify(task(), Err(err), &gate) {
                FetchOutcome::Retry(t) => assert_eq!(t, task()),
                other => panic!("expected retry, got {other:?}"),
            }
        }
        assert!(gate.remaining().is_none());
    }
}
