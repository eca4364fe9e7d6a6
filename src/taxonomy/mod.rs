//! Module taxonomy and progress aggregation
//!
//! The curriculum groups topic codes into named modules. The taxonomy is a
//! static, versioned lookup table loaded once from `taxonomy.toml`; topic
//! codes are matched literally here, the code-extraction regex lives only
//! at the ingestion boundary.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::snapshot::ParsedSnapshot;

/// Progress percentage at or above which a topic counts as mastered.
pub const MASTERY_THRESHOLD: u8 = 80;

/// A named group of topic codes, the top level of progress reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDefinition {
    pub id: String,
    pub name: String,
    pub topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TaxonomyFile {
    #[allow(dead_code)]
    version: u32,
    #[serde(rename = "module", default)]
    modules: Vec<ModuleDefinition>,
}

/// Load the module taxonomy from a versioned TOML file.
pub fn load_taxonomy(path: &Path) -> Result<Vec<ModuleDefinition>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read taxonomy at {:?}", path))?;
    let file: TaxonomyFile =
        toml::from_str(&text).with_context(|| format!("Invalid taxonomy at {:?}", path))?;
    debug!("Loaded {} modules from {:?}", file.modules.len(), path);
    Ok(file.modules)
}

/// Fallback for a module whose topic codes have no data in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoDataPolicy {
    /// Report 0% progress.
    Zero,
    /// Skip the module entirely.
    Omit,
    /// Report a fixed placeholder percent.
    Placeholder(u8),
}

/// Derived per-module progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleProgress {
    pub module_id: String,
    pub name: String,
    /// Rounded mean of available topic percentages, 0..=100.
    pub progress: u8,
    /// Topic codes with data at or above the mastery threshold.
    pub mastered_count: usize,
    /// All topic codes defined for the module, present or not.
    pub total_count: usize,
}

/// Aggregate a parsed snapshot into per-module progress.
///
/// Topic codes defined for a module but absent from the snapshot are
/// excluded from its average, not treated as zero. Result order matches
/// the module input order. Deterministic and side-effect free.
pub fn aggregate(
    parsed: &ParsedSnapshot,
    modules: &[ModuleDefinition],
    policy: NoDataPolicy,
) -> Vec<ModuleProgress> {
    // Last-seen-wins for duplicate codes within one snapshot.
    let mut percent_by_code: HashMap<&str, i64> = HashMap::new();
    for topic in &parsed.topics {
        percent_by_code.insert(topic.code.as_str(), (topic.prob * 100.0).round() as i64);
    }

    let mut result = Vec::with_capacity(modules.len());

    for module in modules {
        let present: Vec<i64> = module
            .topics
            .iter()
            .filter_map(|code| percent_by_code.get(code.as_str()).copied())
            .collect();

        let progress = if present.is_empty() {
            match policy {
                NoDataPolicy::Zero => 0,
                NoDataPolicy::Placeholder(value) => value.min(100),
                NoDataPolicy::Omit => continue,
            }
        } else {
            let mean = present.iter().sum::<i64>() as f64 / present.len() as f64;
            mean.round().clamp(0.0, 100.0) as u8
        };

        let mastered_count = present
            .iter()
            .filter(|&&p| p >= MASTERY_THRESHOLD as i64)
            .count();

        result.push(ModuleProgress {
            module_id: module.id.clone(),
            name: module.name.clone(),
            progress,
            mastered_count,
            total_count: module.topics.len(),
        });
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::TopicEstimate;
    use chrono::{TimeZone, Utc};

    fn snapshot_with(topics: Vec<(&str, f64)>) -> ParsedSnapshot {
        ParsedSnapshot {
            date: Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap(),
            general_progress: 0.0,
            topics: topics
                .into_iter()
                .map(|(code, prob)| TopicEstimate { code: code.into(), prob })
                .collect(),
            tasks: vec![],
            skills: vec![],
        }
    }

    fn module(id: &str, topics: &[&str]) -> ModuleDefinition {
        ModuleDefinition {
            id: id.into(),
            name: id.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn missing_topics_are_excluded_not_zeroed() {
        // Scenario: two of three module topics have data.
        let parsed = snapshot_with(vec![("1.1", 0.8), ("1.2", 0.4)]);
        let modules = [module("m1", &["1.1", "1.2", "1.3"])];

        let result = aggregate(&parsed, &modules, NoDataPolicy::Zero);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].progress, 60); // round((80 + 40) / 2)
        assert_eq!(result[0].mastered_count, 1);
        assert_eq!(result[0].total_count, 3);
    }

    #[test]
    fn empty_module_follows_policy() {
        let parsed = snapshot_with(vec![("1.1", 0.5)]);
        let modules = [module("m1", &["1.1"]), module("m2", &["9.9"])];

        let zero = aggregate(&parsed, &modules, NoDataPolicy::Zero);
        assert_eq!(zero[1].progress, 0);
        assert_eq!(zero[1].mastered_count, 0);
        assert_eq!(zero[1].total_count, 1);

        let placeholder = aggregate(&parsed, &modules, NoDataPolicy::Placeholder(1));
        assert_eq!(placeholder[1].progress, 1);

        let omitted = aggregate(&parsed, &modules, NoDataPolicy::Omit);
        assert_eq!(omitted.len(), 1);
        assert_eq!(omitted[0].module_id, "m1");
    }

    #[test]
    fn bounds_hold_for_any_module() {
        let parsed = snapshot_with(vec![("1.1", 1.0), ("1.2", 0.0), ("1.1", 0.95)]);
        let modules = [module("m1", &["1.1", "1.2"])];

        let result = aggregate(&parsed, &modules, NoDataPolicy::Zero);
        assert!(result[0].progress <= 100);
        assert!(result[0].mastered_count <= result[0].total_count);
        // Last-seen-wins on the duplicated "1.1".
        assert_eq!(result[0].progress, 48); // round((95 + 0) / 2)
    }

    #[test]
    fn result_order_matches_module_order() {
        let parsed = snapshot_with(vec![("1.1", 0.5), ("2.1", 0.5)]);
        let modules = [module("b", &["2.1"]), module("a", &["1.1"])];
        let result = aggregate(&parsed, &modules, NoDataPolicy::Zero);
        assert_eq!(result[0].module_id, "b");
        assert_eq!(result[1].module_id, "a");
    }

    #[test]
    fn loads_versioned_taxonomy() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("taxonomy.toml");
        std::fs::write(
            &path,
            r#"
            version = 1

            [[module]]
            id = "algebra"
            name = "Алгебра"
            topics = ["1.1", "1.2"]

            [[module]]
            id = "geometry"
            name = "Геометрия"
            topics = ["7.1"]
            "#,
        )?;

        let modules = load_taxonomy(&path)?;
        assert_eq!(modules.len(), 2);
        assert_eq!(modules[0].topics, vec!["1.1", "1.2"]);
        Ok(())
    }
}
