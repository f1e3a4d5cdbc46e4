//! # sightline
//!
//! Operator CLI over the trace store, the retention jobs and the breakpoint
//! file. Output is pretty-printed JSON on stdout; logs go to stderr.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use chrono::TimeDelta;
use clap::{Parser, Subcommand};
use serde_json::Value;
use sightline_breakpoints::{BreakpointManager, NewBreakpoint};
use sightline_core::logging::{LogFormat, init_subscriber};
use sightline_core::{BreakpointId, TraceStatus};
use sightline_settings::{SightlineSettings, load_settings, load_settings_from_path};
use sightline_store::{RetentionManager, TraceDatabase, TraceFilter};
use tracing::debug;

const STATS_CACHE_KEY: &str = "database_stats";
const STATS_CACHE_MINUTES: i64 = 5;

/// Inspect recorded traces, run retention and manage breakpoints.
#[derive(Parser, Debug)]
#[command(name = "sightline", version, about)]
struct Cli {
    /// Settings file (defaults to `$SIGHTLINE_CONFIG` or `config/sightline.json`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level, overriding the settings file.
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored traces, newest first.
    History {
        /// Maximum rows.
        #[arg(long, default_value_t = 20)]
        limit: usize,
        /// Rows to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
        /// Only this user's traces.
        #[arg(long)]
        user: Option<String>,
        /// Only traces in this status (`active`, `completed`, `failed`).
        #[arg(long)]
        status: Option<TraceStatus>,
        /// Only traces whose query contains this text.
        #[arg(long)]
        contains: Option<String>,
    },
    /// Print the events of one trace.
    Events {
        /// Trace ID.
        trace_id: String,
        /// Maximum events.
        #[arg(long, default_value_t = 100)]
        limit: usize,
        /// Events to skip.
        #[arg(long, default_value_t = 0)]
        offset: usize,
    },
    /// Row counts and time span of the store.
    Stats {
        /// Skip the analytics cache.
        #[arg(long)]
        fresh: bool,
    },
    /// Retention jobs.
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },
    /// Saved breakpoints.
    Breakpoints {
        #[command(subcommand)]
        action: BreakpointAction,
    },
}

#[derive(Subcommand, Debug)]
enum RetentionAction {
    /// Apply every retention rule now.
    Run,
    /// Archive without deleting.
    Archive,
    /// Rules, schedule and recent results.
    Status,
}

#[derive(Subcommand, Debug)]
enum BreakpointAction {
    /// List breakpoints.
    List,
    /// Create a breakpoint.
    Create {
        /// Display name.
        #[arg(long)]
        name: String,
        /// Module glob.
        #[arg(long, default_value = "*")]
        module: String,
        /// Event type glob.
        #[arg(long, default_value = "*")]
        event_type: String,
        /// Condition expression; empty matches every event.
        #[arg(long, default_value = "")]
        condition: String,
        /// Free-form description.
        #[arg(long, default_value = "")]
        description: String,
        /// Author.
        #[arg(long, default_value = "cli")]
        created_by: String,
        /// Disable after this many hits.
        #[arg(long)]
        max_hits: Option<u64>,
        /// Expire after this many hours.
        #[arg(long)]
        expires_in_hours: Option<f64>,
    },
    /// Delete a breakpoint.
    Delete {
        /// Breakpoint ID.
        id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = match &cli.config {
        Some(path) => load_settings_from_path(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => load_settings().context("failed to load settings")?,
    };
    if let Some(level) = &cli.log_level {
        settings.logging.level.clone_from(level);
    }
    if cli.json_logs {
        settings.logging.json = true;
    }
    let format = if settings.logging.json { LogFormat::Json } else { LogFormat::Compact };
    init_subscriber(&settings.logging.level, format);
    debug!(command = ?cli.command, "starting");

    match cli.command {
        Command::History { limit, offset, user, status, contains } => {
            let db = open_store(&settings)?;
            let filter =
                TraceFilter { user_id: user, status, query_contains: contains, ..TraceFilter::default() };
            print_json(&db.get_trace_history(limit, offset, &filter)?)
        }
        Command::Events { trace_id, limit, offset } => {
            let db = open_store(&settings)?;
            if db.get_trace(&trace_id)?.is_none() {
                bail!("no trace with id {trace_id}");
            }
            print_json(&db.get_trace_events(&trace_id, limit, offset)?)
        }
        Command::Stats { fresh } => {
            let db = open_store(&settings)?;
            print_json(&database_stats(&db, fresh)?)
        }
        Command::Retention { action } => {
            let db = open_store(&settings)?;
            let manager = RetentionManager::new(db, &settings.retention);
            match action {
                RetentionAction::Run => print_json(&manager.run_cleanup()),
                RetentionAction::Archive => print_json(&manager.run_archive()),
                RetentionAction::Status => print_json(&manager.get_retention_status()),
            }
        }
        Command::Breakpoints { action } => run_breakpoints(&settings, action),
    }
}

fn open_store(settings: &SightlineSettings) -> Result<TraceDatabase> {
    TraceDatabase::open(&settings.store)
        .with_context(|| format!("failed to open trace store at {}", settings.store.db_path))
}

fn database_stats(db: &TraceDatabase, fresh: bool) -> Result<Value> {
    if !fresh {
        if let Some(cached) = db.cache_get(STATS_CACHE_KEY)? {
            debug!("stats served from cache");
            return Ok(cached);
        }
    }
    let stats = serde_json::to_value(db.get_database_stats()?)?;
    db.cache_put(STATS_CACHE_KEY, &stats, TimeDelta::try_minutes(STATS_CACHE_MINUTES))?;
    Ok(stats)
}

fn run_breakpoints(settings: &SightlineSettings, action: BreakpointAction) -> Result<()> {
    if settings.breakpoints.storage_path.is_none() {
        bail!("breakpoints.storage_path is not set; nothing to manage");
    }
    let manager = BreakpointManager::new(settings.breakpoints.clone()).context("failed to load breakpoints")?;
    match action {
        BreakpointAction::List => print_json(&manager.get_breakpoints()),
        BreakpointAction::Create {
            name,
            module,
            event_type,
            condition,
            description,
            created_by,
            max_hits,
            expires_in_hours,
        } => {
            let mut new = NewBreakpoint::new(name, module, event_type, condition)
                .description(description)
                .created_by(created_by);
            if let Some(max) = max_hits {
                new = new.max_hits(max);
            }
            if let Some(hours) = expires_in_hours {
                new = new.expires_in_hours(hours);
            }
            let id = manager.create_breakpoint(new)?;
            manager.flush()?;
            print_json(&manager.get_breakpoint(&id))
        }
        BreakpointAction::Delete { id } => {
            manager.delete_breakpoint(&BreakpointId::from_string(id))?;
            manager.flush()?;
            Ok(())
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
