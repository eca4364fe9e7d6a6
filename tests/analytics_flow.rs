//! End-to-end analytics flow
//!
//! Drives the full pipeline with a scripted estimator and an on-disk
//! store: recalculate -> append -> parse -> aggregate -> analyze.

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tempfile::NamedTempFile;

use mastery::config::Config;
use mastery::recalc::{Estimator, Recalculator};
use mastery::snapshot;
use mastery::taxonomy::{self, ModuleDefinition, NoDataPolicy};
use mastery::storage::SnapshotStore;
use mastery::trends::{self, Direction, Mode, Period, TrendOutcome};

/// Returns one scripted entity list per call, then errors.
struct ScriptedEstimator {
    responses: Mutex<VecDeque<Vec<Value>>>,
}

impl ScriptedEstimator {
    fn new(responses: Vec<Vec<Value>>) -> Self {
        Self { responses: Mutex::new(responses.into()) }
    }
}

impl Estimator for ScriptedEstimator {
    async fn estimate(&self, _user: &str, _course: &str) -> Result<Vec<Value>> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted response left"))
    }
}

fn modules() -> Vec<ModuleDefinition> {
    vec![
        ModuleDefinition {
            id: "m1".into(),
            name: "Числа и вычисления".into(),
            topics: vec!["1.1".into(), "1.2".into(), "1.3".into()],
        },
        ModuleDefinition {
            id: "m2".into(),
            name: "Геометрия".into(),
            topics: vec!["7.1".into()],
        },
    ]
}

#[tokio::test]
async fn recalculate_then_aggregate_and_analyze() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let estimator = ScriptedEstimator::new(vec![
        vec![
            json!({"topic": "1.1", "prob": 0.4}),
            json!({"topic": "1.2", "prob": 0.2}),
            json!({"задача ФИПИ": "7", "prob": 0.1}),
        ],
        vec![
            json!({"topic": "1.1", "prob": 0.8}),
            json!({"topic": "1.2", "prob": 0.4}),
            json!({"задача ФИПИ": "7", "prob": 0.6}),
            json!({"это не сущность": true}),
        ],
    ]);

    let store = SnapshotStore::open(temp.path())?;
    let recalculator = Recalculator::new(store, estimator, &Config::default());

    recalculator.recalculate("u1", "oge-math").await?;
    recalculator.recalculate("u1", "oge-math").await?;

    // Append-only: two runs, two records, oldest first.
    let reader = SnapshotStore::open_readonly(temp.path())?;
    let history = reader.query_history("u1", "oge-math")?;
    assert_eq!(history.len(), 2);
    assert!(history[0].run_timestamp <= history[1].run_timestamp);

    // Summary was derived from topics only and prefixed to the list.
    let latest_general = history[1].computed_summary[0]
        .get("general_progress")
        .and_then(Value::as_f64)
        .unwrap();
    assert!((latest_general - 0.6).abs() < 1e-9);

    // The malformed record is dropped at parse time, the rest survives.
    let parsed: Vec<_> = history.iter().map(snapshot::parse).collect();
    assert_eq!(parsed[1].topics.len(), 2);
    assert_eq!(parsed[1].tasks.len(), 1);

    // Module view of the latest snapshot.
    let progress = taxonomy::aggregate(&parsed[1], &modules(), NoDataPolicy::Zero);
    assert_eq!(progress[0].progress, 60); // round((80 + 40) / 2)
    assert_eq!(progress[0].mastered_count, 1);
    assert_eq!(progress[0].total_count, 3);
    assert_eq!(progress[1].progress, 0); // no geometry data, Zero policy

    // Time view across the whole history.
    let TrendOutcome::Report(report) = trends::analyze(&parsed, Period::All, Mode::Modules, None)
    else {
        panic!("expected a trend report");
    };
    assert_eq!(report.series.len(), 2);
    assert!((report.series[0].value - 30.0).abs() < 1e-9); // (0.4 + 0.2) / 2
    assert!((report.series[1].value - 60.0).abs() < 1e-9);
    assert!((report.delta - 30.0).abs() < 1e-9);

    // Per-task ranking over the same window.
    let TrendOutcome::Report(tasks) = trends::analyze(&parsed, Period::All, Mode::Tasks, None)
    else {
        panic!("expected a trend report");
    };
    let top = trends::top_movers(&tasks.items, 1, Direction::Gainers);
    assert_eq!(top[0].id, "7");
    assert!((top[0].delta - 50.0).abs() < 1e-9);

    Ok(())
}

#[tokio::test]
async fn estimator_exhaustion_leaves_history_intact() -> Result<()> {
    let temp = NamedTempFile::new()?;
    let estimator = ScriptedEstimator::new(vec![vec![json!({"topic": "1.1", "prob": 0.5})]]);

    let store = SnapshotStore::open(temp.path())?;
    let recalculator = Recalculator::new(store, estimator, &Config::default());

    recalculator.recalculate("u1", "oge-math").await?;
    let before = SnapshotStore::open_readonly(temp.path())?.query_history("u1", "oge-math")?;

    // Script is exhausted: both the call and its retry fail, nothing is written.
    assert!(recalculator.recalculate("u1", "oge-math").await.is_err());

    let after = SnapshotStore::open_readonly(temp.path())?.query_history("u1", "oge-math")?;
    assert_eq!(before.len(), after.len());
    assert_eq!(before[0].id, after[0].id);
    Ok(())
}
