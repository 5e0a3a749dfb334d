use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use worktrail::cli::{embeddings, event, metrics, project, rule, sweep};
use worktrail::config::Config;
use worktrail::engine::AssignmentEngine;
use worktrail::model::{EventRef, MatchType, PatternType};
use worktrail::store::ActivityStore;

#[derive(Parser)]
#[command(name = "worktrail")]
#[command(about = "Assign tracked desktop activity to projects")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "worktrail.yaml")]
    config: String,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Matching rules
    Rule {
        #[command(subcommand)]
        command: RuleCommands,
    },

    /// Assign, pin or clear single events
    Event {
        #[command(subcommand)]
        command: EventCommands,
    },

    /// Re-evaluate events in checkpointed batches
    Sweep {
        /// Also revisit rule and ai decisions, not just unassigned events
        #[arg(long)]
        all: bool,

        /// Events per batch (defaults to sweep.batch_size)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Start over instead of resuming from the last checkpoint
        #[arg(long)]
        reset: bool,
    },

    /// Assignment accuracy for a date range
    Metrics {
        /// First day, YYYY-MM-DD
        #[arg(long)]
        from: NaiveDate,

        /// Last day (inclusive), YYYY-MM-DD
        #[arg(long)]
        to: NaiveDate,
    },

    /// Count events still waiting for a project
    Unassigned,

    /// Embedding index maintenance
    Embeddings {
        #[command(subcommand)]
        command: EmbeddingCommands,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a new project
    Create {
        /// Project name
        name: String,
        #[arg(long)]
        color: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// List all projects
    List,
    /// Rename or recolor a project
    Update {
        /// Project ID or Name
        project: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        color: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
    },
    /// Delete a project; its events become unassigned
    Delete {
        /// Project ID or Name
        project: String,
    },
    /// Show event counts and focus time
    Stats {
        /// Project ID or Name
        project: String,
    },
    /// List learned and manual rules
    Patterns {
        /// Project ID or Name
        project: String,
    },
    /// Create projects for recent repositories and recurring apps
    Discover {
        /// How far back to look (defaults to discovery.lookback_days)
        #[arg(long)]
        days: Option<u32>,
    },
}

#[derive(Subcommand)]
enum RuleCommands {
    /// Add a rule to a project
    Add {
        /// Project ID or Name
        project: String,
        /// app_name, window_title, git_repo, domain or path
        pattern_type: PatternType,
        value: String,
        /// exact, contains, prefix, suffix or regex
        #[arg(short, long)]
        match_type: Option<MatchType>,
        #[arg(short, long)]
        weight: Option<f64>,
    },
    /// Edit an existing rule
    Update {
        id: i64,
        /// Move the rule to this project (ID or Name)
        #[arg(long)]
        project: Option<String>,
        #[arg(long)]
        pattern_type: Option<PatternType>,
        #[arg(long)]
        value: Option<String>,
        #[arg(short, long)]
        match_type: Option<MatchType>,
        #[arg(short, long)]
        weight: Option<f64>,
    },
    /// Set a rule's weight (clamped to 0.1..2.0)
    Weight { id: i64, weight: f64 },
    /// Delete a rule
    Delete { id: i64 },
    /// Show which events a rule would match, without saving it
    Preview {
        pattern_type: PatternType,
        value: String,
        #[arg(short, long)]
        match_type: Option<MatchType>,
    },
    /// Re-assign past events a stored rule matches
    Apply { id: i64 },
}

#[derive(Subcommand)]
enum EventCommands {
    /// Run automatic assignment on one event (e.g. focus:12)
    Assign { event: EventRef },
    /// Pin an event to a project and learn from it
    Pin {
        event: EventRef,
        /// Project ID or Name
        project: String,
    },
    /// Clear an event's assignment
    Unassign { event: EventRef },
}

#[derive(Subcommand)]
enum EmbeddingCommands {
    /// List events whose embedding is missing or stale
    Pending {
        #[arg(short, long, default_value_t = 100)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Store a vector for an event
    Store {
        event: EventRef,
        /// JSON array, e.g. "[0.1, 0.2]"
        vector: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config)?;

    let level = if cli.verbose { "debug" } else { config.logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("worktrail={}", level)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Initialize store
    let db_path = config.database_path();
    debug!(path = %db_path.display(), "Opening database");
    let store = ActivityStore::open(&db_path)?;
    let engine = AssignmentEngine::new(store, config);

    match cli.command {
        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                color,
                description,
            } => project::create(&engine, name, color, description)?,
            ProjectCommands::List => project::list(&engine)?,
            ProjectCommands::Update {
                project,
                name,
                color,
                description,
            } => project::update(&engine, project, name, color, description)?,
            ProjectCommands::Delete { project } => project::delete(&engine, project)?,
            ProjectCommands::Stats { project } => project::stats(&engine, project)?,
            ProjectCommands::Patterns { project } => project::patterns(&engine, project)?,
            ProjectCommands::Discover { days } => project::discover(&engine, days)?,
        },
        Commands::Rule { command } => match command {
            RuleCommands::Add {
                project,
                pattern_type,
                value,
                match_type,
                weight,
            } => rule::add(&engine, project, pattern_type, value, match_type, weight)?,
            RuleCommands::Update {
                id,
                project,
                pattern_type,
                value,
                match_type,
                weight,
            } => rule::update(&engine, id, project, pattern_type, value, match_type, weight)?,
            RuleCommands::Weight { id, weight } => rule::weight(&engine, id, weight)?,
            RuleCommands::Delete { id } => rule::delete(&engine, id)?,
            RuleCommands::Preview {
                pattern_type,
                value,
                match_type,
            } => rule::preview(&engine, pattern_type, value, match_type)?,
            RuleCommands::Apply { id } => rule::apply(&engine, id)?,
        },
        Commands::Event { command } => match command {
            EventCommands::Assign { event } => event::assign(&engine, event)?,
            EventCommands::Pin { event, project } => event::pin(&engine, event, project)?,
            EventCommands::Unassign { event } => event::unassign(&engine, event)?,
        },
        Commands::Sweep {
            all,
            batch_size,
            reset,
        } => sweep::run(&engine, all, batch_size, reset)?,
        Commands::Metrics { from, to } => metrics::run(&engine, from, to)?,
        Commands::Unassigned => event::unassigned_count(&engine)?,
        Commands::Embeddings { command } => match command {
            EmbeddingCommands::Pending { limit, json } => embeddings::pending(&engine, limit, json)?,
            EmbeddingCommands::Store { event, vector } => embeddings::store(&engine, event, &vector)?,
        },
    }

    Ok(())
}
