use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::binding::{Topic, TopicBinding};
use crate::scheduler::TickOutcome;

/// Where a topic's poller is in its life: `Idle -> Scheduled -> Firing ->
/// Scheduled -> ... -> Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollerState {
    Idle,
    Scheduled,
    Firing,
    Cancelled,
}

impl PollerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => PollerState::Scheduled,
            2 => PollerState::Firing,
            3 => PollerState::Cancelled,
            _ => PollerState::Idle,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            PollerState::Idle => 0,
            PollerState::Scheduled => 1,
            PollerState::Firing => 2,
            PollerState::Cancelled => 3,
        }
    }
}

const NO_OFFSET: i64 = -1;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Per-topic bookkeeping written by exactly one poller and read by the
/// status endpoints. Atomics only, so readers never block a tick.
pub struct PollerSlot {
    topic: Topic,
    state: AtomicU8,
    healthy_until_ms: AtomicI64,
    liveness_deadline: Duration,
    ticks: AtomicU64,
    records_logged: AtomicU64,
    empty_polls: AtomicU64,
    fetch_errors: AtomicU64,
    decode_errors: AtomicU64,
    last_offset: AtomicI64,
}

impl PollerSlot {
    fn new(topic: Topic, liveness_deadline: Duration) -> Self {
        Self {
            topic,
            state: AtomicU8::new(PollerState::Idle.as_u8()),
            healthy_until_ms: AtomicI64::new(0),
            liveness_deadline,
            ticks: AtomicU64::new(0),
            records_logged: AtomicU64::new(0),
            empty_polls: AtomicU64::new(0),
            fetch_errors: AtomicU64::new(0),
            decode_errors: AtomicU64::new(0),
            last_offset: AtomicI64::new(NO_OFFSET),
        }
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }

    pub fn state(&self) -> PollerState {
        PollerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: PollerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Push the liveness deadline forward. Called when the poller is armed
    /// and after every tick.
    pub(crate) fn report_healthy(&self) {
        let until = now_ms().saturating_add(self.liveness_deadline.as_millis() as i64);
        self.healthy_until_ms.store(until, Ordering::Relaxed);
    }

    pub(crate) fn record(&self, outcome: &TickOutcome) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        match outcome {
            TickOutcome::Empty => {
                self.empty_polls.fetch_add(1, Ordering::Relaxed);
            }
            TickOutcome::Logged { offset } => {
                self.records_logged.fetch_add(1, Ordering::Relaxed);
                self.last_offset.store(*offset, Ordering::Relaxed);
            }
            TickOutcome::DecodeFailed { offset } => {
                self.decode_errors.fetch_add(1, Ordering::Relaxed);
                self.last_offset.store(*offset, Ordering::Relaxed);
            }
            TickOutcome::FetchFailed => {
                self.fetch_errors.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn is_healthy(&self) -> bool {
        let until = self.healthy_until_ms.load(Ordering::Relaxed);
        self.state() != PollerState::Cancelled && until > now_ms()
    }

    pub fn snapshot(&self) -> PollerSnapshot {
        let last_offset = self.last_offset.load(Ordering::Relaxed);
        PollerSnapshot {
            topic: self.topic,
            state: self.state(),
            healthy: self.is_healthy(),
            ticks: self.ticks.load(Ordering::Relaxed),
            records_logged: self.records_logged.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            last_offset: (last_offset != NO_OFFSET).then_some(last_offset),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PollerSnapshot {
    pub topic: Topic,
    pub state: PollerState,
    pub healthy: bool,
    pub ticks: u64,
    pub records_logged: u64,
    pub empty_polls: u64,
    pub fetch_errors: u64,
    pub decode_errors: u64,
    pub last_offset: Option<i64>,
}

/// Liveness verdict over all pollers; usable directly as an axum response.
#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub healthy: bool,
    pub pollers: Vec<PollerSnapshot>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let code = match self.healthy {
            true => StatusCode::OK,
            false => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (code, Json(self)).into_response()
    }
}

/// Read side of every poller slot, plus the service-wide shutdown flag.
/// The set of slots is fixed when the service starts.
#[derive(Clone)]
pub struct PollerStatus {
    slots: Arc<BTreeMap<Topic, Arc<PollerSlot>>>,
    shutdown: CancellationToken,
}

impl PollerStatus {
    /// A poller counts as stalled when it has not finished a tick within two
    /// intervals plus one fetch timeout.
    pub fn new(
        bindings: &[TopicBinding],
        fetch_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        let slots = bindings
            .iter()
            .map(|binding| {
                let deadline =
                    binding.poll_interval() * 2 + binding.fetch_timeout(fetch_timeout);
                (
                    binding.topic(),
                    Arc::new(PollerSlot::new(binding.topic(), deadline)),
                )
            })
            .collect();

        Self {
            slots: Arc::new(slots),
            shutdown,
        }
    }

    pub fn slot(&self, topic: Topic) -> Option<Arc<PollerSlot>> {
        self.slots.get(&topic).cloned()
    }

    pub fn snapshot(&self) -> Vec<PollerSnapshot> {
        self.slots.values().map(|slot| slot.snapshot()).collect()
    }

    pub fn liveness(&self) -> HealthStatus {
        let pollers = self.snapshot();
        let healthy = !pollers.is_empty() && pollers.iter().all(|p| p.healthy);
        if !healthy {
            warn!(?pollers, "liveness check failed");
        }
        HealthStatus { healthy, pollers }
    }

    /// 200 while running, 503 once shutdown has begun.
    pub fn readiness(&self) -> StatusCode {
        if self.shutdown.is_cancelled() {
            StatusCode::SERVICE_UNAVAILABLE
        } else {
            StatusCode::OK
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(token: CancellationToken) -> PollerStatus {
        let bindings = vec![
            TopicBinding::new(Topic::Users, "users-v1", 5).unwrap(),
            TopicBinding::new(Topic::Orders, "orders-v1", 5).unwrap(),
        ];
        PollerStatus::new(&bindings, Duration::from_secs(1), token)
    }

    #[test]
    fn unhealthy_until_every_poller_reports() {
        let status = status(CancellationToken::new());
        assert!(!status.liveness().healthy);

        status.slot(Topic::Users).unwrap().report_healthy();
        assert!(!status.liveness().healthy);

        status.slot(Topic::Orders).unwrap().report_healthy();
        assert!(status.liveness().healthy);
    }

    #[test]
    fn stalled_poller_fails_liveness() {
        let status = status(CancellationToken::new());
        for topic in Topic::ALL {
            status.slot(topic).unwrap().report_healthy();
        }

        let orders = status.slot(Topic::Orders).unwrap();
        orders.healthy_until_ms.store(now_ms() - 1, Ordering::Relaxed);

        let health = status.liveness();
        assert!(!health.healthy);
        assert!(health
            .pollers
            .iter()
            .any(|p| p.topic == Topic::Orders && !p.healthy));
    }

    #[test]
    fn cancelled_poller_is_not_live() {
        let status = status(CancellationToken::new());
        let users = status.slot(Topic::Users).unwrap();
        users.report_healthy();
        users.set_state(PollerState::Cancelled);

        assert!(!users.is_healthy());
    }

    #[test]
    fn readiness_flips_on_shutdown() {
        let token = CancellationToken::new();
        let status = status(token.clone());
        assert_eq!(status.readiness(), StatusCode::OK);

        token.cancel();
        assert_eq!(status.readiness(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn counts_tick_outcomes() {
        let status = status(CancellationToken::new());
        let slot = status.slot(Topic::Orders).unwrap();

        slot.record(&TickOutcome::Empty);
        slot.record(&TickOutcome::Logged { offset: 42 });
        slot.record(&TickOutcome::DecodeFailed { offset: 43 });
        slot.record(&TickOutcome::FetchFailed);

        let snapshot = slot.snapshot();
        assert_eq!(snapshot.ticks, 4);
        assert_eq!(snapshot.empty_polls, 1);
        assert_eq!(snapshot.records_logged, 1);
        assert_eq!(snapshot.decode_errors, 1);
        assert_eq!(snapshot.fetch_errors, 1);
        assert_eq!(snapshot.last_offset, Some(43));
        assert_eq!(snapshot.state, PollerState::Idle);
    }
}
