// lotmatch CLI - duplicate detection over vehicle listing feeds

mod exit_codes;

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};

use lotmatch_engine::{
    load_listings_csv, summarize_matches, DedupConfig, DedupError, DetectionResult, ReviewStatus,
};
use lotmatch_service::{AccuracyTracker, ConfigManager, Detector, ReviewQueue};
use lotmatch_store::{
    AuditLog, ConfigStore, EventSink, ListingSource, MatchStore, MemoryStore, NullSink,
    ReviewStore, SqliteStore,
};

use exit_codes::{error_exit_code, EXIT_DUPLICATES, EXIT_REVIEW, EXIT_SUCCESS, EXIT_USAGE};

#[derive(Parser)]
#[command(name = "lotmatch")]
#[command(about = "Duplicate detection for multi-source vehicle listings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run detection over a listings CSV
    #[command(after_help = "\
Examples:
  lotmatch detect listings.csv
  lotmatch detect listings.csv --config weights.toml --json
  lotmatch detect listings.csv --listing-id at_101
  lotmatch detect listings.csv --db lotmatch.db --output result.json")]
    Detect {
        /// Listings CSV (header: listing_id,source,make,model,trim,year,
        /// price_cents,mileage_km,latitude,longitude,postal_code,image_hash)
        listings: PathBuf,

        /// Detection config TOML; omitted means the active stored config,
        /// or built-in defaults on a fresh store
        #[arg(long)]
        config: Option<PathBuf>,

        /// Detect for one listing only instead of the whole file
        #[arg(long)]
        listing_id: Option<String>,

        /// SQLite database for persistent matches/reviews (in-memory if omitted)
        #[arg(long)]
        db: Option<PathBuf>,

        /// Output JSON to stdout instead of human summary
        #[arg(long)]
        json: bool,

        /// Write JSON output to file
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Config administration
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Review queue operations
    #[command(subcommand)]
    Reviews(ReviewCommands),

    /// Accuracy metrics for a config version
    Accuracy {
        /// SQLite database written by `detect --db`
        db: PathBuf,

        /// Config version (defaults to the active version)
        #[arg(long)]
        version: Option<u64>,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate a config TOML without publishing it
    Validate {
        config: PathBuf,
    },

    /// Publish a config TOML as the next active version
    Publish {
        config: PathBuf,

        /// SQLite database holding the config history
        #[arg(long)]
        db: PathBuf,
    },
}

#[derive(Subcommand)]
enum ReviewCommands {
    /// List pending review items in queue order
    List {
        /// SQLite database written by `detect --db`
        db: PathBuf,

        /// Output JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Resolve a pending review item
    Resolve {
        /// SQLite database written by `detect --db`
        db: PathBuf,

        /// Review item id
        id: String,

        /// Decision to record
        #[arg(long, value_enum)]
        decision: Decision,

        /// Who is resolving
        #[arg(long)]
        reviewer: String,

        /// Free-form note attached to the resolution
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Decision {
    /// The pair is the same vehicle
    Confirm,
    /// The pair is not the same vehicle
    Reject,
    /// Leave the match as classified
    Skip,
}

impl Decision {
    fn status(self) -> ReviewStatus {
        match self {
            Decision::Confirm => ReviewStatus::ConfirmedDuplicate,
            Decision::Reject => ReviewStatus::ConfirmedNotDuplicate,
            Decision::Skip => ReviewStatus::Skipped,
        }
    }
}

struct CliError {
    code: u8,
    message: String,
}

impl From<DedupError> for CliError {
    fn from(err: DedupError) -> Self {
        CliError { code: error_exit_code(&err), message: err.to_string() }
    }
}

fn usage_err(msg: impl Into<String>) -> CliError {
    CliError { code: EXIT_USAGE, message: msg.into() }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("error: {}", e.message);
            ExitCode::from(e.code)
        }
    }
}

fn run(command: Commands) -> Result<u8, CliError> {
    match command {
        Commands::Detect { listings, config, listing_id, db, json, output } => {
            cmd_detect(listings, config, listing_id, db, json, output)
        }
        Commands::Config(cmd) => cmd_config(cmd),
        Commands::Reviews(cmd) => cmd_reviews(cmd),
        Commands::Accuracy { db, version, json } => cmd_accuracy(db, version, json),
    }
}

// ---------------------------------------------------------------------------
// Backends
// ---------------------------------------------------------------------------

/// One store object implements every persistence trait; the services each
/// borrow the seam they need.
trait Backend:
    ListingSource + MatchStore + ReviewStore + AuditLog + ConfigStore + 'static
{
    fn store_listing(&self, listing: &lotmatch_engine::ListingSnapshot) -> Result<(), DedupError>;
}

impl Backend for MemoryStore {
    fn store_listing(&self, listing: &lotmatch_engine::ListingSnapshot) -> Result<(), DedupError> {
        self.put_listing(listing.clone());
        Ok(())
    }
}

impl Backend for SqliteStore {
    fn store_listing(&self, listing: &lotmatch_engine::ListingSnapshot) -> Result<(), DedupError> {
        self.put_listing(listing)
    }
}

fn open_db(path: &Path) -> Result<Arc<SqliteStore>, CliError> {
    Ok(Arc::new(SqliteStore::open(path)?))
}

fn read_config(path: &Path) -> Result<DedupConfig, CliError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| usage_err(format!("cannot read {}: {e}", path.display())))?;
    Ok(DedupConfig::from_toml(&text)?)
}

// ---------------------------------------------------------------------------
// detect
// ---------------------------------------------------------------------------

fn cmd_detect(
    listings_path: PathBuf,
    config_path: Option<PathBuf>,
    listing_id: Option<String>,
    db: Option<PathBuf>,
    json: bool,
    output: Option<PathBuf>,
) -> Result<u8, CliError> {
    let csv_text = std::fs::read_to_string(&listings_path)
        .map_err(|e| usage_err(format!("cannot read {}: {e}", listings_path.display())))?;
    let listings = load_listings_csv(&csv_text)?;

    match db {
        Some(path) => {
            let store = open_db(&path)?;
            run_detect(store, listings, config_path, listing_id, json, output)
        }
        None => {
            let store = Arc::new(MemoryStore::new());
            run_detect(store, listings, config_path, listing_id, json, output)
        }
    }
}

fn run_detect<S: Backend>(
    store: Arc<S>,
    listings: Vec<lotmatch_engine::ListingSnapshot>,
    config_path: Option<PathBuf>,
    listing_id: Option<String>,
    json: bool,
    output: Option<PathBuf>,
) -> Result<u8, CliError> {
    for listing in &listings {
        store.store_listing(listing)?;
    }

    let manager = ConfigManager::new(store.clone(), store.clone());
    match config_path {
        Some(path) => {
            manager.publish(read_config(&path)?, "cli")?;
        }
        None => {
            if manager.active().is_err() {
                manager.publish(DedupConfig::default(), "cli")?;
            }
        }
    }

    let sink: Arc<dyn EventSink> = Arc::new(NullSink);
    let detector = Detector::new(
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        sink,
    )?;

    let results: Vec<DetectionResult> = match listing_id {
        Some(id) => vec![detector.detect(&id)?],
        None => detector.detect_all()?,
    };

    let duplicates: usize = results.iter().map(|r| r.duplicates_found).sum();
    let reviews: usize = results.iter().map(|r| r.reviews_created).sum();
    let scored: usize = results.iter().map(|r| r.candidates_scored).sum();
    let summary = summarize_matches(&MatchStore::all(&*store)?);

    let json_value = serde_json::json!({ "results": results, "summary": summary });
    let json_str = serde_json::to_string_pretty(&json_value)
        .map_err(|e| CliError { code: exit_codes::EXIT_ERROR, message: e.to_string() })?;

    if let Some(ref path) = output {
        std::fs::write(path, &json_str)
            .map_err(|e| usage_err(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if json {
        println!("{json_str}");
    }

    eprintln!(
        "detection: {} run(s), {} candidates scored — {} auto-confirmed, {} queued for review",
        results.len(),
        scored,
        duplicates,
        reviews,
    );
    eprintln!(
        "matches: {} total ({} auto-confirmed, {} pending review, {} rejected)",
        summary.total, summary.auto_confirmed, summary.pending_review, summary.rejected,
    );

    if duplicates > 0 {
        Ok(EXIT_DUPLICATES)
    } else if reviews > 0 {
        Ok(EXIT_REVIEW)
    } else {
        Ok(EXIT_SUCCESS)
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

fn cmd_config(cmd: ConfigCommands) -> Result<u8, CliError> {
    match cmd {
        ConfigCommands::Validate { config } => {
            let parsed = read_config(&config)?;
            eprintln!(
                "ok: '{}' — {} weighted signals, auto-confirm {}, review floor {}",
                parsed.name,
                parsed.weights.len(),
                parsed.auto_confirm,
                parsed.review_floor,
            );
            Ok(EXIT_SUCCESS)
        }
        ConfigCommands::Publish { config, db } => {
            let parsed = read_config(&config)?;
            let store = open_db(&db)?;
            let manager = ConfigManager::new(store.clone(), store.clone());
            let version = manager.publish(parsed, "cli")?;
            eprintln!("published v{version}");
            Ok(EXIT_SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// reviews
// ---------------------------------------------------------------------------

fn cmd_reviews(cmd: ReviewCommands) -> Result<u8, CliError> {
    match cmd {
        ReviewCommands::List { db, json } => {
            let store = open_db(&db)?;
            let queue = ReviewQueue::new(store.clone(), store.clone(), store.clone());
            let pending = queue.pending()?;
            if json {
                let json_str = serde_json::to_string_pretty(&pending)
                    .map_err(|e| CliError { code: exit_codes::EXIT_ERROR, message: e.to_string() })?;
                println!("{json_str}");
            } else {
                for item in &pending {
                    println!(
                        "{}  {}  score {:.3}  created {}",
                        item.id,
                        item.pair,
                        item.score,
                        item.created_at.format("%Y-%m-%d %H:%M"),
                    );
                }
                eprintln!("{} pending", pending.len());
            }
            Ok(EXIT_SUCCESS)
        }
        ReviewCommands::Resolve { db, id, decision, reviewer, notes } => {
            let store = open_db(&db)?;
            let queue = ReviewQueue::new(store.clone(), store.clone(), store.clone());
            let item = queue.resolve(&id, decision.status(), &reviewer, notes)?;
            eprintln!("{} resolved as {}", item.id, item.status);
            Ok(EXIT_SUCCESS)
        }
    }
}

// ---------------------------------------------------------------------------
// accuracy
// ---------------------------------------------------------------------------

fn cmd_accuracy(db: PathBuf, version: Option<u64>, json: bool) -> Result<u8, CliError> {
    let store = open_db(&db)?;
    let version = match version {
        Some(v) => v,
        None => ConfigStore::active(&*store)?.version,
    };
    let tracker = AccuracyTracker::new(store.clone(), store.clone(), store.clone());
    let snapshot = tracker.snapshot(version)?;

    if json {
        let json_str = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CliError { code: exit_codes::EXIT_ERROR, message: e.to_string() })?;
        println!("{json_str}");
    } else {
        let rate = |r: Option<f64>| match r {
            Some(v) => format!("{:.3}", v),
            None => "n/a".to_string(),
        };
        eprintln!(
            "v{}: {} TP, {} FP, {} FN — precision {}, recall {}",
            snapshot.config_version,
            snapshot.true_positives,
            snapshot.false_positives,
            snapshot.false_negatives,
            rate(snapshot.precision),
            rate(snapshot.recall),
        );
    }
    Ok(EXIT_SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decision_maps_to_review_status() {
        assert_eq!(Decision::Confirm.status(), ReviewStatus::ConfirmedDuplicate);
        assert_eq!(Decision::Reject.status(), ReviewStatus::ConfirmedNotDuplicate);
        assert_eq!(Decision::Skip.status(), ReviewStatus::Skipped);
    }

    #[test]
    fn cli_parses_detect_flags() {
        let cli = Cli::try_parse_from([
            "lotmatch",
            "detect",
            "listings.csv",
            "--config",
            "weights.toml",
            "--listing-id",
            "at_101",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Commands::Detect { listings, config, listing_id, json, .. } => {
                assert_eq!(listings, PathBuf::from("listings.csv"));
                assert_eq!(config, Some(PathBuf::from("weights.toml")));
                assert_eq!(listing_id.as_deref(), Some("at_101"));
                assert!(json);
            }
            _ => panic!("wrong subcommand"),
        }
    }
}
