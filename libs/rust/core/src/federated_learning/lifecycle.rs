//! Round lifecycle controller.
//!
//! Sequences collect -> aggregate -> apply -> reset so callers see a round
//! trigger as one step, and keeps per-phase timings for the rounds it closed.
//!
//! Phases:
//! - Collecting
//! - Aggregating
//! - Applying

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{info, warn};

use super::buffer::Contribution;
use super::coordinator::{Accepted, AggregationCoordinator, RoundState, RoundStatus};
use super::model::{GlobalModelStore, ModelVersion};
use super::RoundId;
use crate::crypto_he::AdditiveHomomorphic;
use crate::error::SecureAggError;

pub const HISTORY_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RoundSummary {
    pub round_id: RoundId,
    pub contributors: usize,
    pub model_version: ModelVersion,
    pub collecting_ms: f64,
    pub aggregating_ms: f64,
    pub applying_ms: f64,
    pub closed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct PhaseTimer {
    phase: RoundState,
    phase_started_at: Instant,
    durations: Vec<(RoundState, Duration)>,
}

impl PhaseTimer {
    fn new() -> Self { Self { phase: RoundState::Collecting, phase_started_at: Instant::now(), durations: Vec::new() } }

    fn advance(&mut self, next: RoundState) {
        let now = Instant::now();
        self.durations.push((self.phase, now - self.phase_started_at));
        self.phase = next;
        self.phase_started_at = now;
    }

    fn millis(&self, phase: RoundState) -> f64 {
        self.durations.iter().filter(|(p, _)| *p == phase).map(|(_, d)| d.as_secs_f64() * 1000.0).sum()
    }

    fn restart(&mut self) { *self = Self::new(); }
}

pub struct RoundController<H: AdditiveHomomorphic, M: GlobalModelStore> {
    coordinator: Arc<AggregationCoordinator<H, M>>,
    finalizing: Mutex<()>,
    timer: Mutex<PhaseTimer>,
    history: RwLock<VecDeque<RoundSummary>>,
}

impl<H: AdditiveHomomorphic, M: GlobalModelStore> RoundController<H, M> {
    pub fn new(coordinator: Arc<AggregationCoordinator<H, M>>) -> Self {
        Self { coordinator, finalizing: Mutex::new(()), timer: Mutex::new(PhaseTimer::new()), history: RwLock::new(VecDeque::with_capacity(HISTORY_CAPACITY)) }
    }

    pub fn coordinator(&self) -> &Arc<AggregationCoordinator<H, M>> { &self.coordinator }

    pub fn submit(&self, client_id: &str, contribution: Contribution<H::Ciphertext>) -> Result<Accepted, SecureAggError> {
        self.coordinator.receive_update(client_id, contribution)
    }

    pub fn status(&self) -> RoundStatus { self.coordinator.status() }

    /// Aggregates and applies the current round as one step.
    ///
    /// A trigger that arrives while another is finalizing gets
    /// `RoundNotCollecting` immediately rather than waiting behind it.
    pub fn run_round(&self) -> Result<RoundSummary, SecureAggError> {
        let Some(_guard) = self.finalizing.try_lock() else {
            return Err(SecureAggError::RoundNotCollecting { state: RoundState::Aggregating });
        };

        let aggregate = match self.coordinator.aggregate_updates() {
            Ok(a) => a,
            Err(e) => {
                if matches!(e, SecureAggError::RoundAborted { .. }) { self.timer.lock().restart(); }
                return Err(e);
            }
        };
        {
            let mut timer = self.timer.lock();
            timer.advance(RoundState::Aggregating);
            timer.advance(RoundState::Applying);
        }

        let applied = self.coordinator.update_global_model(&aggregate);
        let mut timer = self.timer.lock();
        timer.advance(RoundState::Collecting);
        let applied = match applied {
            Ok(a) => a,
            Err(e) => {
                timer.restart();
                warn!(round_id = aggregate.round_id(), code = e.code(), "round_not_closed");
                return Err(e);
            }
        };

        let summary = RoundSummary {
            round_id: applied.round_id,
            contributors: applied.contributors,
            model_version: applied.model_version,
            collecting_ms: timer.millis(RoundState::Collecting),
            aggregating_ms: timer.millis(RoundState::Aggregating),
            applying_ms: timer.millis(RoundState::Applying),
            closed_at: Utc::now(),
        };
        timer.restart();
        drop(timer);

        let mut history = self.history.write();
        if history.len() == HISTORY_CAPACITY { history.pop_front(); }
        history.push_back(summary.clone());
        info!(round_id = summary.round_id, contributors = summary.contributors, model_version = summary.model_version, "round_completed");
        Ok(summary)
    }

    /// Operator recovery from `Failed` or a stranded `Applying`; see [`AggregationCoordinator::recover`].
    pub fn recover(&self) -> Result<bool, SecureAggError> {
        let _guard = self.finalizing.lock();
        let recovered = self.coordinator.recover()?;
        if recovered { self.timer.lock().restart(); }
        Ok(recovered)
    }

    /// Closed rounds, oldest first.
    pub fn history(&self) -> Vec<RoundSummary> { self.history.read().iter().cloned().collect() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto_he::{MaskedSumScheme, KEY_LEN};
    use crate::error::ModelError;
    use crate::federated_learning::model::{InMemoryModel, Tensor};
    use std::collections::{BTreeMap, BTreeSet};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn controller(threshold: usize) -> (RoundController<MaskedSumScheme, InMemoryModel>, MaskedSumScheme) {
        let he = MaskedSumScheme::new([9u8; KEY_LEN]);
        let model = Arc::new(InMemoryModel::new(BTreeMap::from([("w".to_string(), vec![0.0])])));
        let coord = AggregationCoordinator::new(he.clone(), model, threshold).unwrap();
        (RoundController::new(Arc::new(coord)), he)
    }

    #[test]
    fn timer_accumulates_per_phase() {
        let mut t = PhaseTimer::new();
        t.advance(RoundState::Aggregating);
        t.advance(RoundState::Applying);
        t.advance(RoundState::Collecting);
        assert_eq!(t.durations.len(), 3);
        assert!(t.millis(RoundState::Collecting) >= 0.0);
        t.restart();
        assert!(t.durations.is_empty());
    }

    #[test]
    fn run_round_records_history() {
        let (ctl, he) = controller(2);
        for round in 1..=2u64 {
            for c in ["a", "b"] {
                let contribution = Contribution::new(round, BTreeMap::from([("w".to_string(), he.encode(&[2.0]).unwrap())]));
                ctl.submit(c, contribution).unwrap();
            }
            let summary = ctl.run_round().unwrap();
            assert_eq!(summary.round_id, round);
            assert_eq!(summary.contributors, 2);
        }
        let history = ctl.history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].model_version, 3);
        assert_eq!(ctl.coordinator().model().get("w"), Some(vec![-4.0]));
        assert_eq!(ctl.status().round_id, 3);
    }

    #[test]
    fn run_round_below_threshold_keeps_collecting() {
        let (ctl, he) = controller(2);
        ctl.submit("a", Contribution::new(1, BTreeMap::from([("w".to_string(), he.encode(&[1.0]).unwrap())]))).unwrap();
        assert!(matches!(ctl.run_round(), Err(SecureAggError::InsufficientContributions { have: 1, need: 2 })));
        assert_eq!(ctl.status().state, RoundState::Collecting);
        assert!(ctl.history().is_empty());
        assert_eq!(ctl.recover(), Ok(false));
    }

    /// Store that rejects every batch write while `reject` is set.
    struct RejectingStore {
        model: InMemoryModel,
        reject: AtomicBool,
    }

    impl GlobalModelStore for RejectingStore {
        fn parameter_names(&self) -> BTreeSet<String> { self.model.parameter_names() }
        fn get(&self, name: &str) -> Option<Tensor> { self.model.get(name) }
        fn subtract_in_place(&self, name: &str, delta: &[f64]) -> Result<(), ModelError> { self.model.subtract_in_place(name, delta) }
        fn subtract_all(&self, deltas: &BTreeMap<String, Tensor>) -> Result<ModelVersion, ModelError> {
            if self.reject.load(Ordering::SeqCst) {
                return Err(ModelError::UnknownParameter("read-only".into()));
            }
            self.model.subtract_all(deltas)
        }
        fn version(&self) -> ModelVersion { self.model.version() }
    }

    #[test]
    fn failed_apply_resets_phase_timer() {
        let he = MaskedSumScheme::new([9u8; KEY_LEN]);
        let store = Arc::new(RejectingStore {
            model: InMemoryModel::new(BTreeMap::from([("w".to_string(), vec![0.0])])),
            reject: AtomicBool::new(true),
        });
        let ctl = RoundController::new(Arc::new(AggregationCoordinator::new(he.clone(), store.clone(), 2).unwrap()));
        let submit_round = |round: u64| {
            for c in ["a", "b"] {
                ctl.submit(c, Contribution::new(round, BTreeMap::from([("w".to_string(), he.encode(&[2.0]).unwrap())]))).unwrap();
            }
        };

        submit_round(1);
        assert!(matches!(ctl.run_round(), Err(SecureAggError::ApplyFailed { round_id: 1, .. })));
        assert_eq!(ctl.status().state, RoundState::Failed);
        assert!(ctl.timer.lock().durations.is_empty());
        assert!(ctl.history().is_empty());

        // recovering on the coordinator directly must not leave stale timings behind
        assert_eq!(ctl.coordinator().recover(), Ok(true));
        store.reject.store(false, Ordering::SeqCst);
        submit_round(2);
        let summary = ctl.run_round().unwrap();
        assert_eq!(summary.round_id, 2);
        assert_eq!(store.get("w"), Some(vec![-2.0]));
        assert!(ctl.timer.lock().durations.is_empty());
    }
}
