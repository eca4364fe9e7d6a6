//! Snapshot ingestion
//!
//! Classifies the heterogeneous entity records inside a raw snapshot and
//! produces the typed view the aggregation and trend layers consume.

mod entity;
mod parser;

pub use entity::{extract_topic_code, EntityKind, GENERAL_KEY, SKILL_KEY, TASK_KEY, TOPIC_KEY};
pub use parser::{parse, ParsedSnapshot, SkillEstimate, TaskEstimate, TopicEstimate};
