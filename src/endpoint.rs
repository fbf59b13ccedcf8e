//! Rate-limit coordinator and the per-(region, zone) endpoint handle.
//!
//! The endpoint keeps a local sliding request window. When the window is
//! full it declines to send at all and reports a soft limit with the time
//! until the oldest slot frees up; a provider-confirmed 429 is reported
//! separately. Window bookkeeping uses `tokio::time::Instant` so the paused
//! test clock applies.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::util::env::env_parse;

/// Non-success fetch classifications. `SoftLimit` is local (the request
/// never went out); everything else came back from the wire.
#[derive(Debug)]
pub enum FetchError {
    SoftLimit { retry_after: Duration },
    RateLimited,
    NotFound,
    Status(u16),
    Transport(reqwest::Error),
}

pub type FetchResult = std::result::Result<Value, FetchError>;

/// Shared coordinator handing out one endpoint per (region, zone).
pub struct RateLimiter {
    endpoints: Mutex<HashMap<(String, String), Arc<Endpoint>>>,
    limit: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn from_env() -> Self {
        Self {
            endpoints: Mutex::new(HashMap::new()),
            // Riot app limit is 500/10s per region; keep headroom by default.
            limit: env_parse("RATE_WINDOW_LIMIT", 450usize).max(1),
            window: Duration::from_secs(env_parse("RATE_WINDOW_SECS", 10u64).max(1)),
        }
    }

    pub fn get_endpoint(&self, region: &str, zone: &str) -> Arc<Endpoint> {
        let key = (region.to_string(), zone.to_string());
        let mut guard = self.endpoints.lock().unwrap();
        guard
            .entry(key)
            .or_insert_with(|| {
                Arc::new(Endpoint {
                    region: region.to_string(),
                    zone: zone.to_string(),
                    limit: self.limit,
                    window: self.window,
                    sent: Mutex::new(VecDeque::new()),
                })
            })
            .clone()
    }
}

/// Issues one fetch at a time against a single logical API zone.
pub struct Endpoint {
    region: String,
    zone: String,
    limit: usize,
    window: Duration,
    sent: Mutex<VecDeque<Instant>>,
}

impl Endpoint {
    /// Reserve a window slot, or say how long until one frees up.
    fn reserve(&self) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let mut sent = self.sent.lock().unwrap();
        while let Some(front) = sent.front() {
            if now.duration_since(*front) >= self.window {
                sent.pop_front();
            } else {
                break;
            }
        }
        if sent.len() >= self.limit {
            let oldest = *sent.front().unwrap();
            let retry_after = self.window.saturating_sub(now.duration_since(oldest));
            return Err(retry_after.max(Duration::from_millis(1)));
        }
        sent.push_back(now);
        Ok(())
    }

    /// Issue one GET and classify the response.
    pub async fn fetch(&self, client: &reqwest::Client, url: &str) -> FetchResult {
        if let Err(retry_after) = self.reserve() {
            debug!(region = %self.region, zone = %self.zone, retry_after_ms = retry_after.as_millis() as u64, "local window full, declining request");
            return Err(FetchError::SoftLimit { retry_after });
        }
        let response = client.get(url).send().await.map_err(FetchError::Transport)?;
        match response.status().as_u16() {
            404 => Err(FetchError::NotFound),
            429 => Err(FetchError::RateLimited),
            status if response.status().is_success() => {
                response.json::<Value>().await.map_err(|err| {
                    debug!(region = %self.region, status, error = %err, "body decode failed");
                    FetchError::Transport(err)
                })
            }
            status => Err(FetchError::Status(status)),
        }
    }
}

/// Per-region advisory suppression deadline, armed by soft local-limits.
/// Other regions are unaffected.
#[derive(Default)]
pub struct SuppressionGate {
    until: Mutex<Option<Instant>>,
}

impl SuppressionGate {
    pub fn suppress_for(&self, retry_after: Duration) {
        let deadline = Instant::now() + retry_after;
        let mut until = self.until.lock().unwrap();
        // never shorten an existing deadline
        if until.map_or(true, |current| deadline > current) {
            *until = Some(deadline);
        }
    }

    /// Time left until requests may resume, if currently suppressed.
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.until.lock().unwrap();
        until.and_then(|deadline| {
            let now = Instant::now();
            if deadline > now {
                Some(deadline - now)
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    #[tokio::test(start_paused = true)]
    async fn suppression_lifts_after_deadline() {
        let gate = SuppressionGate::default();
        assert!(gate.remaining().is_none());
        gate.suppress_for(Duration::from_secs(2));
        assert!(gate.remaining().is_some());
        advance(Duration::from_millis(1_999)).await;
        assert!(gate.remaining().is_some());
        advance(Duration::from_millis(2)).await;
        assert!(gate.remaining().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn longer_deadline_wins() {
        let gate = SuppressionGate::default();
        gate.suppress_for(Duration::from_secs(5));
        gate.suppress_for(Duration::from_secs(1));
        advance(Duration::from_secs(2)).await;
        assert!(gate.remaining().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn window_declines_when_full_and_recovers() {
        let ep = Endpoint {
            region: "europe".into(),
            zone: "match-details-v5".into(),
            limit: 2,
            window: Duration::from_secs(10),
            sent: Mutex::new(VecDeque::new()),
        };
        assert!(ep.reserve().is_ok());
        assert!(ep.reserve().is_ok());
        let retry_after = ep.reserve().expect_err("window should be full");
        assert!(retry_after <= Duration::from_secs(10));
        advance(Duration::from_secs(10)).await;
        assert!(ep.reserve().is_ok());
    }
}
