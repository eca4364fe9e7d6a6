//! Time-windowed trend analysis
//!
//! Given an ordered snapshot history and a time window, builds an averaged
//! progress series, an endpoint delta, and per-item time series with
//! rankable deltas. All pure functions over already-parsed snapshots.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::snapshot::ParsedSnapshot;

/// Time window for trend analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Period {
    /// Last 7 days.
    Week,
    /// Last 30 days.
    Month,
    /// Full history.
    All,
}

impl Period {
    fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            Period::Week => Some(now - Duration::days(7)),
            Period::Month => Some(now - Duration::days(30)),
            Period::All => None,
        }
    }
}

/// Which estimate family drives the series values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    /// Overall mastery: each point is general_progress as a percent.
    Modules,
    /// Exam tasks: mean task probability, or one selected task.
    Tasks,
    /// Curriculum topics: mean topic probability, or one selected topic.
    Topics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub date_label: String,
    pub value: f64,
}

/// Per-item trend over the selected window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendItem {
    pub id: String,
    pub label: String,
    /// Item's value in the window's most recent snapshot, rounded.
    pub current_percent: u8,
    /// Net movement: last series value minus first.
    pub delta: f64,
    pub series: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub series: Vec<TrendPoint>,
    /// Endpoint-to-endpoint change across the window, not a fitted slope.
    pub delta: f64,
    /// One entry per item observed in the window's last snapshot
    /// (modes Tasks and Topics only).
    pub items: Vec<TrendItem>,
}

/// Analysis result. Degenerate inputs get explicit states so callers
/// never attempt delta math on fewer than two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrendOutcome {
    /// No snapshots at all: first-time-user state.
    NoData,
    /// Fewer than two snapshots inside the window.
    Insufficient { points: usize },
    Report(TrendReport),
}

/// Analyze a snapshot history over the given window, `now` taken at call time.
///
/// `history` must be ordered by date ascending (as returned by
/// `SnapshotStore::query_history`).
pub fn analyze(
    history: &[ParsedSnapshot],
    period: Period,
    mode: Mode,
    selected_item: Option<&str>,
) -> TrendOutcome {
    analyze_at(history, period, mode, selected_item, Utc::now())
}

/// Like [`analyze`] with an explicit clock, so windowing is testable.
pub fn analyze_at(
    history: &[ParsedSnapshot],
    period: Period,
    mode: Mode,
    selected_item: Option<&str>,
    now: DateTime<Utc>,
) -> TrendOutcome {
    if history.is_empty() {
        return TrendOutcome::NoData;
    }

    let window: Vec<&ParsedSnapshot> = match period.cutoff(now) {
        Some(cutoff) => history.iter().filter(|s| s.date >= cutoff).collect(),
        None => history.iter().collect(),
    };

    if window.len() < 2 {
        return TrendOutcome::Insufficient { points: window.len() };
    }

    let series: Vec<TrendPoint> = window
        .iter()
        .map(|snapshot| TrendPoint {
            date_label: snapshot.date.format("%Y-%m-%d").to_string(),
            value: snapshot_value(snapshot, mode, selected_item),
        })
        .collect();

    let delta = series[series.len() - 1].value - series[0].value;

    let items = match mode {
        Mode::Modules => Vec::new(),
        Mode::Tasks | Mode::Topics => build_items(&window, mode),
    };

    TrendOutcome::Report(TrendReport { series, delta, items })
}

/// One point's value for a snapshot under the given mode.
///
/// A snapshot contributing zero entities of the requested kind yields 0,
/// never a silent exclusion; a selected item absent from a snapshot also
/// yields 0 ("no estimate that run").
fn snapshot_value(snapshot: &ParsedSnapshot, mode: Mode, selected_item: Option<&str>) -> f64 {
    match mode {
        Mode::Modules => snapshot.general_progress * 100.0,
        Mode::Tasks => match selected_item {
            Some(id) => item_value(snapshot, mode, id),
            None => mean_percent(snapshot.tasks.iter().map(|t| t.prob)),
        },
        Mode::Topics => match selected_item {
            Some(code) => item_value(snapshot, mode, code),
            None => mean_percent(snapshot.topics.iter().map(|t| t.prob)),
        },
    }
}

fn mean_percent(probs: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = probs.fold((0.0, 0usize), |(s, c), p| (s + p, c + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64 * 100.0
    }
}

/// A single item's percent in one snapshot; duplicates resolve
/// last-seen-wins, absence resolves to 0.
fn item_value(snapshot: &ParsedSnapshot, mode: Mode, id: &str) -> f64 {
    let prob = match mode {
        Mode::Tasks => snapshot
            .tasks
            .iter()
            .rev()
            .find(|t| t.id == id)
            .map(|t| t.prob),
        Mode::Topics => snapshot
            .topics
            .iter()
            .rev()
            .find(|t| t.code == id)
            .map(|t| t.prob),
        Mode::Modules => None,
    };
    prob.map(|p| p * 100.0).unwrap_or(0.0)
}

/// Build one TrendItem per distinct id observed in the window's most
/// recent snapshot, in discovery order. Items that disappeared before the
/// last snapshot are excluded from ranking even if present earlier.
fn build_items(window: &[&ParsedSnapshot], mode: Mode) -> Vec<TrendItem> {
    let last = window[window.len() - 1];

    let mut seen = std::collections::HashSet::new();
    let ids: Vec<(String, String)> = match mode {
        Mode::Tasks => last
            .tasks
            .iter()
            .filter(|t| seen.insert(t.id.clone()))
            .map(|t| (t.id.clone(), format!("Задача {}", t.id)))
            .collect(),
        Mode::Topics => last
            .topics
            .iter()
            .filter(|t| seen.insert(t.code.clone()))
            .map(|t| (t.code.clone(), t.code.clone()))
            .collect(),
        Mode::Modules => Vec::new(),
    };

    ids.into_iter()
        .map(|(id, label)| {
            let series: Vec<f64> = window
                .iter()
                .map(|snapshot| item_value(snapshot, mode, &id))
                .collect();
            let current = series[series.len() - 1];
            let delta = current - series[0];
            TrendItem {
                id,
                label,
                current_percent: current.round().clamp(0.0, 100.0) as u8,
                delta,
                series,
            }
        })
        .collect()
}

/// Ranking direction for [`top_movers`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Gainers,
    Decliners,
}

/// Top-K items by delta. Stable sort: ties keep discovery order.
pub fn top_movers(items: &[TrendItem], k: usize, direction: Direction) -> Vec<TrendItem> {
    let mut ranked = items.to_vec();
    match direction {
        Direction::Gainers => {
            ranked.sort_by(|a, b| b.delta.partial_cmp(&a.delta).unwrap_or(std::cmp::Ordering::Equal))
        }
        Direction::Decliners => {
            ranked.sort_by(|a, b| a.delta.partial_cmp(&b.delta).unwrap_or(std::cmp::Ordering::Equal))
        }
    }
    ranked.truncate(k);
    ranked
}
