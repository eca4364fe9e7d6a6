//! Entity classification for raw snapshot records
//!
//! The estimator returns heterogeneous key/value records whose kind is
//! only implied by which label key is present. Classification happens
//! exactly once here, producing a tagged `EntityKind` so downstream code
//! pattern-matches instead of re-inspecting raw keys.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Wire key carried by topic records.
pub const TOPIC_KEY: &str = "topic";
/// Wire key carried by exam-task records (fixed for stored-history compatibility).
pub const TASK_KEY: &str = "задача ФИПИ";
/// Wire key carried by skill records (fixed for stored-history compatibility).
pub const SKILL_KEY: &str = "навык";
/// Wire key carried by the computed-summary general record.
pub const GENERAL_KEY: &str = "general_progress";

/// Leading topic-code pattern: "2.3" plus an optional variant designator
/// letter ("2.3E"). Latin and Cyrillic designators both occur in stored data.
static TOPIC_CODE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+\.\d+[A-Za-zА-Яа-я]?)").unwrap());

/// One raw entity record, classified.
#[derive(Debug, Clone, PartialEq)]
pub enum EntityKind {
    /// Curriculum topic with a dotted numeric code.
    Topic { code: String, prob: f64 },
    /// Exam task keyed by task identifier.
    Task { id: String, prob: f64 },
    /// Skill keyed by skill identifier.
    Skill { id: String, prob: f64 },
    /// Scalar summary record, only present in `computed_summary`.
    General { value: f64 },
    /// Malformed or unknown record shape; dropped by the parser.
    Unrecognized,
}

impl EntityKind {
    /// Classify a raw entity record by key presence.
    ///
    /// Total function: anything that does not match one of the known
    /// shapes (including out-of-range probabilities) classifies as
    /// `Unrecognized` rather than failing.
    pub fn classify(record: &Value) -> Self {
        let Some(obj) = record.as_object() else {
            return EntityKind::Unrecognized;
        };

        if let Some(value) = obj.get(GENERAL_KEY).and_then(Value::as_f64) {
            if in_unit_range(value) {
                return EntityKind::General { value };
            }
            return EntityKind::Unrecognized;
        }

        let Some(prob) = obj.get("prob").and_then(Value::as_f64) else {
            return EntityKind::Unrecognized;
        };
        if !in_unit_range(prob) {
            return EntityKind::Unrecognized;
        }

        if let Some(label) = obj.get(TOPIC_KEY).and_then(Value::as_str) {
            return match extract_topic_code(label) {
                Some(code) => EntityKind::Topic { code, prob },
                None => EntityKind::Unrecognized,
            };
        }

        if let Some(id) = label_string(obj.get(TASK_KEY)) {
            return EntityKind::Task { id, prob };
        }

        if let Some(id) = label_string(obj.get(SKILL_KEY)) {
            return EntityKind::Skill { id, prob };
        }

        EntityKind::Unrecognized
    }
}

/// Extract the leading topic code from a free-form topic label.
///
/// Returns `None` for labels that do not start with a dotted code;
/// those records are dropped at the ingestion boundary and the code
/// is never re-derived downstream.
pub fn extract_topic_code(label: &str) -> Option<String> {
    TOPIC_CODE
        .captures(label.trim())
        .map(|c| c[1].to_string())
}

/// Task and skill identifiers arrive as strings or bare numbers.
fn label_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn in_unit_range(p: f64) -> bool {
    p.is_finite() && (0.0..=1.0).contains(&p)
}
