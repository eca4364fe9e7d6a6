//! Mastery-progress analytics engine
//!
//! Ingests periodic, append-only snapshots of a learner's estimated
//! per-topic and per-task mastery probabilities, aggregates them into a
//! topic -> module hierarchy and supports time-windowed trend analysis
//! (deltas, rankings, per-item time series).
//!
//! Read paths (`snapshot::parse`, `taxonomy::aggregate`, `trends::analyze`)
//! are pure and safely callable concurrently; the only mutating operation
//! is the append inside `recalc::Recalculator`.

pub mod config;
pub mod recalc;
pub mod snapshot;
pub mod storage;
pub mod taxonomy;
pub mod trends;
