use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::buffer::{Contribution, ContributionBuffer};
use super::model::{GlobalModelStore, ModelVersion, Tensor};
use super::schema::ParameterSchema;
use super::RoundId;
use crate::crypto_he::AdditiveHomomorphic;
use crate::error::SecureAggError;
use crate::metrics::{record_rejection, SECAGG_METRICS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState { Collecting, Aggregating, Applying, Failed }

impl fmt::Display for RoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoundState::Collecting => "collecting",
            RoundState::Aggregating => "aggregating",
            RoundState::Applying => "applying",
            RoundState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Accepted {
    pub round_id: RoundId,
    pub contributors: usize,
    pub ready: bool,
}

/// Decrypted per-parameter sums of one round. Only valid until applied.
#[derive(Debug, Clone)]
pub struct AggregateResult {
    round_id: RoundId,
    aggregate_id: Uuid,
    contributor_count: usize,
    sums: BTreeMap<String, Tensor>,
}

impl AggregateResult {
    pub fn round_id(&self) -> RoundId { self.round_id }
    pub fn aggregate_id(&self) -> Uuid { self.aggregate_id }
    /// Contributors folded into this aggregate, captured when folding began.
    pub fn contributor_count(&self) -> usize { self.contributor_count }
    pub fn sums(&self) -> &BTreeMap<String, Tensor> { &self.sums }
    pub fn get(&self, name: &str) -> Option<&[f64]> { self.sums.get(name).map(Vec::as_slice) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedRound {
    pub round_id: RoundId,
    pub contributors: usize,
    pub model_version: ModelVersion,
    pub next_round: RoundId,
}

#[derive(Debug, Clone, Serialize)]
pub struct RoundStatus {
    pub round_id: RoundId,
    pub state: RoundState,
    pub contributors: usize,
    pub threshold: usize,
    pub ready: bool,
    pub failure: Option<String>,
}

#[derive(Debug)]
struct Failure {
    reason: String,
    aggregate: Option<AggregateResult>,
}

#[derive(Debug)]
struct Inner<C> {
    state: RoundState,
    round_id: RoundId,
    schema: ParameterSchema,
    buffer: ContributionBuffer<C>,
    pending: Option<Uuid>,
    failure: Option<Failure>,
}

impl<C> Inner<C> {
    /// Discards anything left of the current round and opens the next one.
    fn open_next_round(&mut self) {
        self.buffer.clear();
        self.pending = None;
        self.round_id += 1;
        self.state = RoundState::Collecting;
    }
}

/// Collects encrypted contributions, folds them once enough clients took part,
/// and applies the decrypted mean to the global model.
///
/// All round bookkeeping sits behind one mutex. Folding and decryption run with
/// the lock released while the state is `Aggregating`, so no contribution can
/// join a round that is being folded.
pub struct AggregationCoordinator<H: AdditiveHomomorphic, M: GlobalModelStore> {
    scheme: H,
    model: Arc<M>,
    threshold: usize,
    inner: Mutex<Inner<H::Ciphertext>>,
}

impl<H: AdditiveHomomorphic, M: GlobalModelStore> AggregationCoordinator<H, M> {
    pub fn new(scheme: H, model: Arc<M>, threshold: usize) -> Result<Self, SecureAggError> {
        if threshold < 2 { return Err(SecureAggError::InvalidThreshold(threshold)); }
        let schema = ParameterSchema::new(model.parameter_names())?;
        info!(threshold, parameters = schema.len(), "secure_aggregation_coordinator_initialized");
        Ok(Self {
            scheme,
            model,
            threshold,
            inner: Mutex::new(Inner {
                state: RoundState::Collecting,
                round_id: 1,
                schema,
                buffer: ContributionBuffer::default(),
                pending: None,
                failure: None,
            }),
        })
    }

    pub fn threshold(&self) -> usize { self.threshold }
    pub fn model(&self) -> &Arc<M> { &self.model }
    pub fn current_round(&self) -> RoundId { self.inner.lock().round_id }
    pub fn state(&self) -> RoundState { self.inner.lock().state }
    pub fn schema(&self) -> ParameterSchema { self.inner.lock().schema.clone() }
    pub fn contributor_count(&self) -> usize { self.inner.lock().buffer.contributor_count() }

    pub fn status(&self) -> RoundStatus {
        let inner = self.inner.lock();
        let contributors = inner.buffer.contributor_count();
        RoundStatus {
            round_id: inner.round_id,
            state: inner.state,
            contributors,
            threshold: self.threshold,
            ready: contributors >= self.threshold,
            failure: inner.failure.as_ref().map(|f| f.reason.clone()),
        }
    }

    /// True once at least `threshold` distinct clients contributed this round.
    pub fn is_ready(&self) -> bool { self.inner.lock().buffer.contributor_count() >= self.threshold }

    pub fn receive_update(&self, client_id: &str, contribution: Contribution<H::Ciphertext>) -> Result<Accepted, SecureAggError> {
        let mut inner = self.inner.lock();
        let checked = Self::check_contribution(&inner, client_id, &contribution);
        if let Err(e) = checked {
            record_rejection(e.code());
            warn!(client_id, round_id = inner.round_id, reason = e.code(), "contribution_rejected");
            return Err(e);
        }
        inner.buffer.append(client_id.to_string(), contribution.gradients);
        let contributors = inner.buffer.contributor_count();
        SECAGG_METRICS.contributions_accepted.add(1, &[]);
        debug!(client_id, round_id = inner.round_id, contributors, "contribution_accepted");
        Ok(Accepted { round_id: inner.round_id, contributors, ready: contributors >= self.threshold })
    }

    fn check_contribution(inner: &Inner<H::Ciphertext>, client_id: &str, contribution: &Contribution<H::Ciphertext>) -> Result<(), SecureAggError> {
        if inner.state != RoundState::Collecting {
            return Err(SecureAggError::RoundNotCollecting { state: inner.state });
        }
        if contribution.round_id != inner.round_id {
            return Err(SecureAggError::RoundMismatch { expected: inner.round_id, received: contribution.round_id });
        }
        if inner.buffer.has_contributed(client_id) {
            return Err(SecureAggError::DuplicateClient { client_id: client_id.to_string(), round_id: inner.round_id });
        }
        inner.schema.validate(contribution.gradients.keys())
    }

    /// Folds and decrypts the round. Fails without touching any state when the
    /// round is not collecting or is below threshold.
    pub fn aggregate_updates(&self) -> Result<AggregateResult, SecureAggError> {
        let (round_id, lists, contributor_count) = {
            let mut inner = self.inner.lock();
            if inner.state != RoundState::Collecting {
                return Err(SecureAggError::RoundNotCollecting { state: inner.state });
            }
            let have = inner.buffer.contributor_count();
            if have < self.threshold {
                return Err(SecureAggError::InsufficientContributions { have, need: self.threshold });
            }
            inner.state = RoundState::Aggregating;
            let (lists, count) = inner.buffer.drain();
            (inner.round_id, lists, count)
        };
        info!(round_id, contributors = contributor_count, "round_aggregating");

        let started = Instant::now();
        let folded = self.fold_and_decrypt(lists);
        SECAGG_METRICS.aggregation_latency_ms.record(started.elapsed().as_secs_f64() * 1000.0, &[]);

        let mut inner = self.inner.lock();
        match folded {
            Ok(sums) => {
                let aggregate_id = Uuid::new_v4();
                inner.pending = Some(aggregate_id);
                inner.state = RoundState::Applying;
                info!(round_id, %aggregate_id, "round_aggregated");
                Ok(AggregateResult { round_id, aggregate_id, contributor_count, sums })
            }
            Err(reason) => {
                inner.open_next_round();
                SECAGG_METRICS.rounds_aborted.add(1, &[]);
                error!(round_id, next_round = inner.round_id, %reason, "round_aborted_operator_attention");
                Err(SecureAggError::RoundAborted { round_id, reason })
            }
        }
    }

    fn fold_and_decrypt(&self, lists: BTreeMap<String, Vec<H::Ciphertext>>) -> Result<BTreeMap<String, Tensor>, String> {
        let scheme = &self.scheme;
        let model = &self.model;
        lists
            .into_par_iter()
            .map(|(name, ciphertexts)| {
                let mut iter = ciphertexts.iter();
                let first = iter.next().ok_or_else(|| format!("no ciphertexts for {name}"))?;
                let sum = iter
                    .try_fold(first.clone(), |acc, ct| scheme.add(&acc, ct))
                    .map_err(|e| format!("folding {name}: {e}"))?;
                let plain = scheme.decrypt(&sum).map_err(|e| format!("decrypting {name}: {e}"))?;
                let expected = model.get(&name).map_or(0, |t| t.len());
                if plain.len() != expected {
                    return Err(format!("aggregate for {name} has {} values, model has {expected}", plain.len()));
                }
                Ok((name, plain))
            })
            .collect()
    }

    /// Applies `aggregate / contributor_count` as a subtraction to the model and
    /// opens the next round. Only the pending aggregate of the current round is
    /// accepted; anything else is `StaleAggregate` and changes nothing.
    pub fn update_global_model(&self, aggregate: &AggregateResult) -> Result<AppliedRound, SecureAggError> {
        let mut inner = self.inner.lock();
        let is_pending = inner.state == RoundState::Applying
            && inner.pending == Some(aggregate.aggregate_id)
            && inner.round_id == aggregate.round_id;
        if !is_pending {
            warn!(aggregate_id = %aggregate.aggregate_id, round_id = aggregate.round_id, "stale_aggregate_rejected");
            return Err(SecureAggError::StaleAggregate { aggregate_id: aggregate.aggregate_id.to_string() });
        }
        let round_id = inner.round_id;
        let divisor = aggregate.contributor_count as f64;
        let deltas: BTreeMap<String, Tensor> = aggregate
            .sums
            .iter()
            .map(|(name, sum)| (name.clone(), sum.iter().map(|v| v / divisor).collect()))
            .collect();

        let model_version = match self.model.subtract_all(&deltas) {
            Ok(v) => v,
            Err(e) => {
                let reason = e.to_string();
                inner.pending = None;
                inner.state = RoundState::Failed;
                inner.failure = Some(Failure { reason: reason.clone(), aggregate: Some(aggregate.clone()) });
                error!(round_id, %reason, "round_apply_failed_operator_attention");
                return Err(SecureAggError::ApplyFailed { round_id, reason });
            }
        };

        let contributors = aggregate.contributor_count;
        SECAGG_METRICS.rounds_completed.add(1, &[]);
        SECAGG_METRICS.round_participants.add(contributors as u64, &[]);

        let fresh = ParameterSchema::new(self.model.parameter_names());
        if fresh.as_ref() != Ok(&inner.schema) {
            inner.pending = None;
            inner.state = RoundState::Failed;
            inner.failure = Some(Failure { reason: format!("model schema changed after round {round_id}"), aggregate: None });
            error!(round_id, model_version, "model_schema_changed_operator_attention");
            return Err(SecureAggError::SchemaChanged { round_id });
        }

        inner.open_next_round();
        info!(round_id, contributors, model_version, next_round = inner.round_id, "round_closed");
        Ok(AppliedRound { round_id, contributors, model_version, next_round: inner.round_id })
    }

    /// Operator action: leaves `Failed`, re-derives the schema and opens a new round.
    ///
    /// Also releases a round stuck in `Applying` whose aggregate was never
    /// applied; that aggregate becomes stale. Returns `false` when there was
    /// nothing to recover from.
    pub fn recover(&self) -> Result<bool, SecureAggError> {
        let mut inner = self.inner.lock();
        if inner.state == RoundState::Applying {
            let round_id = inner.round_id;
            let discarded = inner.pending.take();
            inner.open_next_round();
            SECAGG_METRICS.rounds_aborted.add(1, &[]);
            warn!(round_id, next_round = inner.round_id, discarded_aggregate = ?discarded, "unapplied_round_released");
            return Ok(true);
        }
        if inner.state != RoundState::Failed { return Ok(false); }
        inner.schema = ParameterSchema::new(self.model.parameter_names())?;
        let failure = inner.failure.take();
        inner.open_next_round();
        info!(
            next_round = inner.round_id,
            discarded_aggregate = failure.as_ref().is_some_and(|f| f.aggregate.is_some()),
            "round_recovered"
        );
        Ok(true)
    }

    /// The aggregate that could not be applied, if the coordinator is `Failed` because of one.
    pub fn failed_aggregate(&self) -> Option<AggregateResult> {
        self.inner.lock().failure.as_ref().and_then(|f| f.aggregate.clone())
    }
}
