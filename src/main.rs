use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mastery::config::Config;
use mastery::recalc::{HttpEstimator, Recalculator};
use mastery::snapshot;
use mastery::storage::{self, SnapshotStore};
use mastery::taxonomy;
use mastery::trends::{self, Direction, Mode, Period, TrendOutcome};

/// Mastery - per-topic mastery analytics for tutoring dashboards
#[derive(Parser)]
#[command(name = "mastery")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Snapshot ingestion, module aggregation and trend analysis", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the snapshot store and default configuration
    Init,

    /// Call the estimator and append a fresh snapshot
    Recalc {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
    },

    /// Show per-module progress from the latest snapshot
    Modules {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
    },

    /// Show a progress trend over a time window
    Trends {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
        /// Time window
        #[arg(long, value_enum, default_value = "all")]
        period: Period,
        /// Which estimates drive the series
        #[arg(long, value_enum, default_value = "modules")]
        mode: Mode,
        /// Restrict the series to one task id or topic code
        #[arg(long)]
        item: Option<String>,
        /// How many top gainers/decliners to list
        #[arg(long, default_value = "5")]
        top: usize,
    },

    /// List stored snapshots for a learner
    History {
        #[arg(long)]
        user: String,
        #[arg(long)]
        course: String,
        /// Most recent N snapshots (0 = all)
        #[arg(long, default_value = "0")]
        limit: usize,
    },

    /// Show store status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            info!("Initializing mastery store");
            storage::init().await?;
        }
        Commands::Recalc { user, course } => {
            recalc_command(&user, &course).await?;
        }
        Commands::Modules { user, course } => {
            modules_command(&user, &course)?;
        }
        Commands::Trends { user, course, period, mode, item, top } => {
            trends_command(&user, &course, period, mode, item.as_deref(), top)?;
        }
        Commands::History { user, course, limit } => {
            history_command(&user, &course, limit)?;
        }
        Commands::Status => {
            storage::show_status().await?;
        }
    }

    Ok(())
}

fn open_readonly() -> Result<Option<SnapshotStore>> {
    let db = storage::db_path()?;
    if !db.exists() {
        println!("No database found. Run 'mastery init' first.");
        return Ok(None);
    }
    Ok(Some(SnapshotStore::open_readonly(&db)?))
}

async fn recalc_command(user: &str, course: &str) -> Result<()> {
    let config = Config::load(&storage::config_path()?)?;
    let store = SnapshotStore::open(&storage::db_path()?)?;
    let estimator = HttpEstimator::new(config.estimator.url.clone());
    let recalculator = Recalculator::new(store, estimator, &config);

    let record = recalculator.recalculate(user, course).await?;
    let parsed = snapshot::parse(&record);

    println!("Recorded snapshot #{}", record.id);
    println!("  Timestamp: {}", record.run_timestamp.format("%Y-%m-%d %H:%M:%S"));
    println!("  General progress: {:.0}%", parsed.general_progress * 100.0);
    println!(
        "  Entities: {} topics, {} tasks, {} skills",
        parsed.topics.len(),
        parsed.tasks.len(),
        parsed.skills.len()
    );

    Ok(())
}

fn modules_command(user: &str, course: &str) -> Result<()> {
    let Some(store) = open_readonly()? else {
        return Ok(());
    };
    let config = Config::load(&storage::config_path()?)?;

    let Some(latest) = store.query_latest(user, course)? else {
        println!("No snapshots yet for {}/{}.", user, course);
        println!("Run 'mastery recalc --user {} --course {}' first.", user, course);
        return Ok(());
    };

    let parsed = snapshot::parse(&latest);
    let modules = taxonomy::load_taxonomy(&storage::taxonomy_path()?)?;
    let progress = taxonomy::aggregate(&parsed, &modules, config.no_data_policy());

    println!("Module progress for {}/{}", user, course);
    println!("(snapshot #{} at {})", latest.id, latest.run_timestamp.format("%Y-%m-%d %H:%M"));
    println!();
    for module in &progress {
        println!(
            "  {:<30} {:>3}%  mastered {}/{}",
            module.name, module.progress, module.mastered_count, module.total_count
        );
    }
    println!();
    println!("  Overall: {:.0}%", parsed.general_progress * 100.0);

    Ok(())
}

fn trends_command(
    user: &str,
    course: &str,
    period: Period,
    mode: Mode,
    item: Option<&str>,
    top: usize,
) -> Result<()> {
    let Some(store) = open_readonly()? else {
        return Ok(());
    };
    let history: Vec<_> = store
        .query_history(user, course)?
        .iter()
        .map(snapshot::parse)
        .collect();

    match trends::analyze(&history, period, mode, item) {
        TrendOutcome::NoData => {
            println!("No snapshots yet for {}/{}.", user, course);
        }
        TrendOutcome::Insufficient { points } => {
            println!(
                "Not enough data in this window ({} snapshot{}). At least 2 are needed for a trend.",
                points,
                if points == 1 { "" } else { "s" }
            );
        }
        TrendOutcome::Report(report) => {
            println!("Trend for {}/{}", user, course);
            println!();
            for point in &report.series {
                println!("  {}  {:>5.1}%", point.date_label, point.value);
            }
            println!();
            let sign = if report.delta >= 0.0 { "+" } else { "" };
            println!("  Net change: {}{:.1} pts", sign, report.delta);

            if !report.items.is_empty() && top > 0 {
                println!();
                println!("  Top gainers:");
                for item in trends::top_movers(&report.items, top, Direction::Gainers) {
                    println!(
                        "    {:<24} {:>3}%  ({}{:.1})",
                        item.label,
                        item.current_percent,
                        if item.delta >= 0.0 { "+" } else { "" },
                        item.delta
                    );
                }
                println!("  Top decliners:");
                for item in trends::top_movers(&report.items, top, Direction::Decliners) {
                    println!(
                        "    {:<24} {:>3}%  ({}{:.1})",
                        item.label,
                        item.current_percent,
                        if item.delta >= 0.0 { "+" } else { "" },
                        item.delta
                    );
                }
            }
        }
    }

    Ok(())
}

fn history_command(user: &str, course: &str, limit: usize) -> Result<()> {
    let Some(store) = open_readonly()? else {
        return Ok(());
    };
    let history = store.query_history(user, course)?;

    if history.is_empty() {
        println!("No snapshots yet for {}/{}.", user, course);
        return Ok(());
    }

    let skip = if limit > 0 && history.len() > limit {
        history.len() - limit
    } else {
        0
    };

    println!("Snapshot history for {}/{}:", user, course);
    for record in &history[skip..] {
        let parsed = snapshot::parse(record);
        println!(
            "  #{:<5} {}  general {:>3.0}%  ({} topics, {} tasks)",
            record.id,
            record.run_timestamp.format("%Y-%m-%d %H:%M"),
            parsed.general_progress * 100.0,
            parsed.topics.len(),
            parsed.tasks.len()
        );
    }

    Ok(())
}
