//! Snapshot recalculation
//!
//! Orchestrates one estimator call, derives the computed summary and
//! appends a new snapshot. History is strictly additive: an estimator
//! failure writes nothing and the previous snapshot stays the latest
//! valid one.

use anyhow::anyhow;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

mod estimator;

pub use estimator::{Estimator, HttpEstimator};

use crate::config::Config;
use crate::snapshot::{EntityKind, GENERAL_KEY};
use crate::storage::{SnapshotRecord, SnapshotStore};

/// Recalculation failure taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum RecalcError {
    /// The estimator call failed after retries; nothing was written.
    #[error("estimator call failed: {0}")]
    Estimator(anyhow::Error),
    /// A recalculation for the same (user, course) pair is in flight.
    #[error("recalculation already running for {user_id}/{course_id}")]
    AlreadyRunning { user_id: String, course_id: String },
    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

/// Published after each successful append. The analytics core only emits
/// these; dashboard consumers subscribe.
#[derive(Debug, Clone)]
pub struct RecalcEvent {
    pub user_id: String,
    pub course_id: String,
    pub snapshot_id: i64,
    /// Fresh overall mastery in [0,1].
    pub general_progress: f64,
    /// Change against the previous snapshot, when one existed.
    pub general_delta: Option<f64>,
}

type FlightKey = (String, String);

/// Orchestrates estimator calls and append-only snapshot writes.
pub struct Recalculator<E: Estimator> {
    store: SnapshotStore,
    estimator: E,
    timeout: Duration,
    retries: u32,
    inflight: Arc<Mutex<HashSet<FlightKey>>>,
    events: broadcast::Sender<RecalcEvent>,
}

impl<E: Estimator> Recalculator<E> {
    pub fn new(store: SnapshotStore, estimator: E, config: &Config) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            store,
            estimator,
            timeout: config.estimator_timeout(),
            retries: config.estimator.retries,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            events,
        }
    }

    /// Subscribe to snapshot-recorded events.
    pub fn subscribe(&self) -> broadcast::Receiver<RecalcEvent> {
        self.events.subscribe()
    }

    /// Run one recalculation for a (user, course) pair.
    ///
    /// Holds a single-flight guard for the pair so a double-click or rapid
    /// retry cannot append duplicate snapshots. The guard is released on
    /// every exit path, including drop of the returned future.
    pub async fn recalculate(
        &self,
        user_id: &str,
        course_id: &str,
    ) -> Result<SnapshotRecord, RecalcError> {
        let _guard = InflightGuard::acquire(&self.inflight, user_id, course_id).ok_or_else(
            || RecalcError::AlreadyRunning {
                user_id: user_id.to_string(),
                course_id: course_id.to_string(),
            },
        )?;

        let previous = self
            .store
            .query_latest(user_id, course_id)
            .map_err(RecalcError::Storage)?;

        let raw_entities = self
            .call_estimator(user_id, course_id)
            .await
            .map_err(RecalcError::Estimator)?;

        let general_progress = general_progress_of(&raw_entities);
        let computed_summary = build_summary(&raw_entities, general_progress);

        let run_timestamp = Utc::now();
        let id = self
            .store
            .insert(user_id, course_id, run_timestamp, &raw_entities, &computed_summary)
            .map_err(RecalcError::Storage)?;

        info!(
            "Recorded snapshot {} for {}/{} ({} entities, general {:.3})",
            id,
            user_id,
            course_id,
            raw_entities.len(),
            general_progress
        );

        let general_delta = previous
            .as_ref()
            .map(|p| general_progress - general_progress_of(&p.raw_entities));

        // No subscribers is fine; the send result only reports that.
        let _ = self.events.send(RecalcEvent {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            snapshot_id: id,
            general_progress,
            general_delta,
        });

        Ok(SnapshotRecord {
            id,
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            run_timestamp,
            raw_entities,
            computed_summary,
        })
    }

    /// Estimator call with an explicit timeout and one bounded retry for
    /// transient failures; estimator latency is unbounded in principle.
    async fn call_estimator(&self, user_id: &str, course_id: &str) -> anyhow::Result<Vec<Value>> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.estimator.estimate(user_id, course_id))
                .await
            {
                Ok(Ok(entities)) => {
                    debug!("Estimator returned {} entities", entities.len());
                    return Ok(entities);
                }
                Ok(Err(err)) if attempt < self.retries => {
                    warn!("Estimator attempt {} failed: {}; retrying", attempt + 1, err);
                }
                Ok(Err(err)) => return Err(err),
                Err(_) if attempt < self.retries => {
                    warn!("Estimator attempt {} timed out after {:?}; retrying", attempt + 1, self.timeout);
                }
                Err(_) => {
                    return Err(anyhow!("estimator timed out after {:?}", self.timeout));
                }
            }
            attempt += 1;
        }
    }
}

/// Mean probability over topic entities only; tasks and skills do not
/// contribute to general progress. Empty input averages to 0.
fn general_progress_of(raw_entities: &[Value]) -> f64 {
    let probs: Vec<f64> = raw_entities
        .iter()
        .filter_map(|record| match EntityKind::classify(record) {
            EntityKind::Topic { prob, .. } => Some(prob),
            _ => None,
        })
        .collect();

    if probs.is_empty() {
        0.0
    } else {
        probs.iter().sum::<f64>() / probs.len() as f64
    }
}

/// Summary list: the general record first by convention, then the raw
/// entities unchanged.
fn build_summary(raw_entities: &[Value], general_progress: f64) -> Vec<Value> {
    let mut summary = Vec::with_capacity(raw_entities.len() + 1);
    let mut general = serde_json::Map::new();
    general.insert(GENERAL_KEY.to_string(), general_progress.into());
    summary.push(Value::Object(general));
    summary.extend(raw_entities.iter().cloned());
    summary
}

/// RAII single-flight guard keyed by (user, course).
struct InflightGuard {
    set: Arc<Mutex<HashSet<FlightKey>>>,
    key: FlightKey,
}

impl InflightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<FlightKey>>>, user_id: &str, course_id: &str) -> Option<Self> {
        let key = (user_id.to_string(), course_id.to_string());
        let mut flights = set.lock().expect("inflight lock poisoned");
        if !flights.insert(key.clone()) {
            return None;
        }
        Some(Self { set: Arc::clone(set), key })
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        if let Ok(mut flights) = self.set.lock() {
            flights.remove(&self.key);
        }
    }
}
