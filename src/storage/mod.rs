//! Storage module
//!
//! Owns the append-only snapshot log in SQLite and the data directory
//! with its configuration and taxonomy files.

use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

pub mod snapshots;

pub use snapshots::{SnapshotRecord, SnapshotStore};

/// Initialize the data directory, database schema and default config files
pub async fn init() -> Result<()> {
    let data_dir = get_data_dir()?;
    std::fs::create_dir_all(&data_dir)?;

    // Opening the store creates the schema.
    let _ = SnapshotStore::open(&data_dir.join("snapshots.sqlite"))?;

    info!("Mastery store initialized at {:?}", data_dir);

    let config_path = data_dir.join("config.toml");
    if !config_path.exists() {
        let default_config = r#"# Mastery configuration

[estimator]
# Scoring-service endpoint called during recalculation
url = "http://localhost:8090/estimate"
# Maximum time to wait for one estimator call in milliseconds
timeout_ms = 10000
# Bounded retries for transient estimator failures
retries = 1

[aggregation]
# Module fallback when a snapshot has no matching topics: zero | omit | placeholder
no_data_policy = "zero"
# Percent reported when no_data_policy = "placeholder"
placeholder_percent = 1
"#;
        std::fs::write(&config_path, default_config)?;
        info!("Created default configuration at {:?}", config_path);
    }

    let taxonomy_path = data_dir.join("taxonomy.toml");
    if !taxonomy_path.exists() {
        let default_taxonomy = r#"# Module taxonomy: module -> ordered topic codes.
# Bump the version whenever the curriculum mapping changes.
version = 1

[[module]]
id = "numbers"
name = "Числа и вычисления"
topics = ["1.1", "1.2", "1.3", "1.4", "1.5"]

[[module]]
id = "algebra"
name = "Алгебраические выражения"
topics = ["2.1", "2.2", "2.3", "2.3E", "2.4"]

[[module]]
id = "equations"
name = "Уравнения и неравенства"
topics = ["3.1", "3.2", "3.3"]

[[module]]
id = "functions"
name = "Функции и графики"
topics = ["5.1", "5.2", "5.3"]

[[module]]
id = "geometry"
name = "Геометрия"
topics = ["7.1", "7.2", "7.3", "7.4"]
"#;
        std::fs::write(&taxonomy_path, default_taxonomy)?;
        info!("Created default taxonomy at {:?}", taxonomy_path);
    }

    Ok(())
}

/// Show current store status
pub async fn show_status() -> Result<()> {
    let data_dir = get_data_dir()?;

    println!("Mastery Status");
    println!("==============");
    println!();

    if !data_dir.exists() {
        println!("Status: NOT INITIALIZED");
        println!("Run 'mastery init' to initialize the store");
        return Ok(());
    }

    println!("Status: INITIALIZED");
    println!("Data directory: {:?}", data_dir);

    let db = db_path()?;
    if !db.exists() {
        println!("Database: NOT FOUND");
        return Ok(());
    }

    let store = SnapshotStore::open_readonly(&db)?;
    println!("Snapshots stored: {}", store.count_all()?);

    let pairs = store.tracked_pairs()?;
    if pairs.is_empty() {
        println!("No learners tracked yet. Run 'mastery recalc' to record a snapshot.");
    } else {
        println!("Tracked learners:");
        for (user, course) in pairs {
            let count = store.count(&user, &course)?;
            match store.query_latest(&user, &course)? {
                Some(latest) => println!(
                    "  {}/{}: {} snapshots, latest {}",
                    user,
                    course,
                    count,
                    latest.run_timestamp.format("%Y-%m-%d %H:%M")
                ),
                None => println!("  {}/{}: {} snapshots", user, course, count),
            }
        }
    }

    Ok(())
}

/// Resolve the data directory: project-local `.mastery` first, then the
/// home directory fallback.
pub fn get_data_dir() -> Result<PathBuf> {
    let cwd = std::env::current_dir()?;
    let project_dir = cwd.join(".mastery");
    if project_dir.exists() {
        return Ok(project_dir);
    }

    let home = dirs::home_dir()
        .ok_or_else(|| anyhow::anyhow!("Could not find home directory"))?;
    Ok(home.join(".mastery"))
}

pub fn db_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("snapshots.sqlite"))
}

pub fn config_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("config.toml"))
}

pub fn taxonomy_path() -> Result<PathBuf> {
    Ok(get_data_dir()?.join("taxonomy.toml"))
}
