//! Snapshot parsing
//!
//! Turns one raw `SnapshotRecord` into a typed `ParsedSnapshot`.
//! Pure function of its input: no storage access, no clock reads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::entity::EntityKind;
use crate::storage::SnapshotRecord;

/// Typed view of one snapshot, ready for aggregation and trend math.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedSnapshot {
    pub date: DateTime<Utc>,
    /// Overall mastery scalar in [0,1]; 0.0 when the summary record is absent.
    pub general_progress: f64,
    pub topics: Vec<TopicEstimate>,
    pub tasks: Vec<TaskEstimate>,
    pub skills: Vec<SkillEstimate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEstimate {
    pub code: String,
    pub prob: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEstimate {
    pub id: String,
    pub prob: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkillEstimate {
    pub id: String,
    pub prob: f64,
}

/// Parse a stored snapshot into its typed view.
///
/// Malformed entities are dropped, never fatal: the rest of the snapshot
/// still parses. Duplicate topic codes within one snapshot are preserved
/// as-is; consumers that need a keyed lookup apply last-seen-wins.
pub fn parse(snapshot: &SnapshotRecord) -> ParsedSnapshot {
    let mut topics = Vec::new();
    let mut tasks = Vec::new();
    let mut skills = Vec::new();
    let mut dropped = 0usize;

    for record in &snapshot.raw_entities {
        match EntityKind::classify(record) {
            EntityKind::Topic { code, prob } => topics.push(TopicEstimate { code, prob }),
            EntityKind::Task { id, prob } => tasks.push(TaskEstimate { id, prob }),
            EntityKind::Skill { id, prob } => skills.push(SkillEstimate { id, prob }),
            // General records only belong in computed_summary; ignore here.
            EntityKind::General { .. } => {}
            EntityKind::Unrecognized => dropped += 1,
        }
    }

    if dropped > 0 {
        debug!(
            "Dropped {} malformed entities from snapshot {}",
            dropped, snapshot.id
        );
    }

    // The general record is first in computed_summary by convention, but
    // scan the whole list; absence is a legitimate state, not an error.
    let general_progress = snapshot
        .computed_summary
        .iter()
        .find_map(|record| match EntityKind::classify(record) {
            EntityKind::General { value } => Some(value),
            _ => None,
        })
        .unwrap_or(0.0);

    ParsedSnapshot {
        date: snapshot.run_timestamp,
        general_progress,
        topics,
        tasks,
        skills,
    }
}
