//! recap: a local-first development journal.
//!
//! recap captures immutable snapshots ("capsules") of your working state -
//! what changed since the last capture, which TODO/FIXME markers you left in
//! the changes, and a short narrative summary - and makes those capsules
//! queryable across time and across every tracked project on the machine.
//!
//! # Architecture
//!
//! ## Dual-Store Model
//!
//! - **Project store** (`<root>/.recap/data/`): append-only capsule log
//!   (`capsules.jsonl`, source of truth) plus a rebuildable SQLite index.
//! - **User store** (`~/.recap/data/`): workspace registry event log and
//!   user configuration. `RECAP_HOME` overrides the location for tests.
//!
//! ## Write discipline
//!
//! All store mutations route through `DbBroker`: writers are serialized by
//! an IMMEDIATE transaction on the index database, id allocation through the
//! durable log flush happens inside that critical section, and every
//! brokered operation lands in `broker.events.jsonl`.
//!
//! ## Subsystems (plugins)
//!
//! - `capsule`: the immutable record and its per-project store
//! - `capture`: extraction -> markers -> summary -> append pipeline
//! - `registry`: machine-wide workspace catalogue, discovery, query fan-out
//! - `stats`: derived analytics over one store
//! - `summarize`: the external summarization collaborator boundary
//!
//! # Examples
//!
//! ```bash
//! # Start tracking a project
//! recap start
//!
//! # Capture your working state
//! recap capture --tag bugfix -m "auth refresh handling"
//!
//! # Look back
//! recap history --since "1 week ago"
//! recap search auth --all-projects
//! recap stats
//! ```

pub mod core;
pub mod plugins;

use crate::core::config::RecapConfig;
use crate::core::store::{self, Store};
use crate::core::{error, output, time};
use crate::plugins::capsule::{self, CapsuleStore, ListFilter};
use crate::plugins::capture::{self, CaptureOptions};
use crate::plugins::registry::Registry;
use crate::plugins::{registry, stats};

use chrono::Duration;
use chrono::Utc;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "recap",
    version = env!("CARGO_PKG_VERSION"),
    about = "recap is the local-first development journal: capture immutable snapshots of your working state and search them across every project on your machine."
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start tracking the current project (creates the capsule store)
    Start {
        /// Project root (defaults to the current working directory).
        #[clap(short, long)]
        path: Option<PathBuf>,
    },
    /// Capture the current working state as a new capsule
    Capture {
        /// Tag this capture (repeatable).
        #[clap(long = "tag", short = 't')]
        tags: Vec<String>,
        /// Short note stored with the capsule.
        #[clap(long, short = 'm')]
        message: Option<String>,
        /// Skip summarization entirely.
        #[clap(long)]
        no_summary: bool,
        /// Upper bound on the summarization call, in seconds.
        #[clap(long)]
        timeout_secs: Option<u64>,
    },
    /// List recent capture sessions
    History {
        /// Only capsules at or after this point ('yesterday', '2 weeks ago', YYYY-MM-DD).
        #[clap(long)]
        since: Option<String>,
        /// Only capsules carrying at least one of these tags (repeatable).
        #[clap(long = "tag")]
        tags: Vec<String>,
        /// Maximum sessions to show.
        #[clap(long, default_value = "10")]
        limit: usize,
    },
    /// Show one capsule in full
    Show {
        #[clap(value_name = "ID")]
        id: u64,
    },
    /// Search session history by keyword
    Search {
        #[clap(value_name = "KEYWORD")]
        keyword: String,
        /// Fan the search out across every registered project.
        #[clap(long, short = 'a')]
        all_projects: bool,
    },
    /// List tracked workspaces across the machine
    Workspaces {
        /// Walk the configured scan roots and register any project found.
        #[clap(long)]
        discover: bool,
        /// Override the configured scan roots (repeatable).
        #[clap(long = "scan-root")]
        scan_roots: Vec<PathBuf>,
        /// Drop a project from the registry (its store is left on disk).
        #[clap(long)]
        forget: Option<PathBuf>,
    },
    /// Show session statistics and analytics for this project
    Stats,
    /// Export session history to a markdown file
    Export {
        /// Output file name.
        #[clap(long, short = 'o', default_value = "recap_sessions.md")]
        output: PathBuf,
        /// Only capsules carrying at least one of these tags (repeatable).
        #[clap(long = "tag")]
        tags: Vec<String>,
        /// Only capsules at or after this point.
        #[clap(long)]
        since: Option<String>,
    },
    /// Remove capsules older than a cutoff (destructive, explicit)
    Cleanup {
        /// Remove capsules older than N days.
        #[clap(long, default_value = "30")]
        days: i64,
        /// Report what would be removed without deleting.
        #[clap(long)]
        dry_run: bool,
    },
    /// Rebuild the SQLite index from the capsule log
    Rebuild,
}

fn project_store() -> Result<Store, error::RecapError> {
    let current_dir = std::env::current_dir()?;
    let root = store::find_project_root(&current_dir)?;
    Ok(Store::project(&root))
}

pub fn run() -> Result<(), error::RecapError> {
    let cli = Cli::parse();
    let config = RecapConfig::load()?;

    match cli.command {
        Command::Start { path } => {
            let raw = match path {
                Some(p) => p,
                None => std::env::current_dir()?,
            };
            let root = fs::canonicalize(&raw).map_err(error::RecapError::IoError)?;
            capture::start(&root)?;
            println!(
                "{} Tracking initialized for {}",
                "ok:".green().bold(),
                root.display()
            );
            println!("  Run {} to save your progress", "recap capture".cyan());
        }
        Command::Capture {
            tags,
            message,
            no_summary,
            timeout_secs,
        } => {
            let current_dir = std::env::current_dir()?;
            let root = store::find_project_root(&current_dir)?;
            let opts = CaptureOptions {
                tags,
                message,
                no_summary,
                timeout_secs,
            };
            let capsule = capture::capture(&root, &config, &opts)?;
            if capsule.files_changed.is_empty() {
                println!(
                    "{} No changes since the last capture; recorded an empty session.",
                    "note:".yellow().bold()
                );
            }
            println!(
                "{} Captured capsule {} ({} file(s), {} marker(s))",
                "ok:".green().bold(),
                capsule.id,
                capsule.files_changed.len(),
                capsule.markers.len()
            );
            if !capsule.summary.is_empty() {
                println!("  {}", output::compact_line(&capsule.summary, 120));
            }
        }
        Command::History { since, tags, limit } => {
            let store = project_store()?;
            let filter = ListFilter {
                since: since.as_deref().map(time::parse_since_expr).transpose()?,
                until: None,
                tags,
            };
            let capsule_store = CapsuleStore::open(&store);
            let capsules = capsule_store.list(&filter)?;
            if capsules.is_empty() {
                println!("No sessions recorded yet. Run {} first.", "recap capture".cyan());
                return Ok(());
            }
            let shown = capsules.iter().rev().take(limit);
            println!(
                "{} recent sessions (of {}):\n",
                limit.min(capsules.len()),
                capsules.len()
            );
            for capsule in shown {
                let summary = if capsule.summary.is_empty() {
                    "(no summary)".to_string()
                } else {
                    output::compact_line(&capsule.summary, 100)
                };
                println!(
                    "{:>5}  {}  {} file(s)  {}",
                    capsule.id.to_string().yellow(),
                    capsule.created_at.format("%b %d %H:%M").to_string().dimmed(),
                    capsule.files_changed.len(),
                    summary
                );
                if !capsule.tags.is_empty() {
                    println!("       tags: {}", capsule.tags.join(", ").magenta());
                }
            }
        }
        Command::Show { id } => {
            let store = project_store()?;
            let capsule = CapsuleStore::open(&store).get(id)?;
            println!("{} {}", "capsule".bold(), capsule.id);
            println!("created: {}", capsule.created_at.to_rfc3339());
            if let Some(message) = &capsule.message {
                println!("note:    {}", message);
            }
            if !capsule.tags.is_empty() {
                println!("tags:    {}", capsule.tags.join(", "));
            }
            println!("summary: {}", if capsule.summary.is_empty() { "(none)" } else { &capsule.summary });
            if !capsule.files_changed.is_empty() {
                println!("\nfiles changed:");
                for fc in &capsule.files_changed {
                    match (fc.lines_added, fc.lines_removed) {
                        (Some(a), Some(r)) => println!(
                            "  {:?} {} {}{}",
                            fc.status,
                            fc.path,
                            format!("+{}", a).green(),
                            format!(" -{}", r).red()
                        ),
                        _ => println!("  {:?} {} (binary)", fc.status, fc.path),
                    }
                }
            }
            if !capsule.markers.is_empty() {
                println!("\nmarkers:");
                for m in &capsule.markers {
                    println!("  {}:{}  {}", m.file, m.line, m.text);
                }
            }
        }
        Command::Search {
            keyword,
            all_projects,
        } => {
            if all_projects {
                let registry = Registry::open()?;
                let results = registry::search_all(&registry, &keyword)?;
                let mut any = false;
                for (root, result) in results {
                    match result {
                        Ok(capsules) if capsules.is_empty() => {}
                        Ok(capsules) => {
                            any = true;
                            println!("{}", root.display().to_string().cyan().bold());
                            print_search_hits(&capsules);
                        }
                        Err(e) => {
                            any = true;
                            output::warn(&format!("{}: {}", root.display(), e));
                        }
                    }
                }
                if !any {
                    println!("No results for '{}' in any project.", keyword);
                }
            } else {
                let store = project_store()?;
                let capsules = CapsuleStore::open(&store).search(&keyword)?;
                if capsules.is_empty() {
                    println!("No results for '{}'.", keyword);
                    println!("  Use {} to search every project.", "--all-projects".cyan());
                } else {
                    println!("Found {} session(s):\n", capsules.len());
                    print_search_hits(&capsules);
                }
            }
        }
        Command::Workspaces {
            discover,
            scan_roots,
            forget,
        } => {
            let registry = Registry::open()?;
            if let Some(path) = forget {
                let path = fs::canonicalize(&path).unwrap_or(path);
                registry.remove(&path)?;
                println!(
                    "{} Forgot workspace {} (store left on disk)",
                    "ok:".green().bold(),
                    path.display()
                );
                return Ok(());
            }
            if discover {
                let roots = if scan_roots.is_empty() {
                    config.scan_roots.clone()
                } else {
                    scan_roots
                };
                let outcome = registry.discover(&roots, config.discovery_max_depth)?;
                for warning in &outcome.warnings {
                    let partial = error::RecapError::DiscoveryPartial(warning.clone());
                    output::warn(&partial.to_string());
                }
                println!(
                    "Discovered {} tracked project(s).",
                    outcome.found.len()
                );
            }
            let workspaces = registry.list()?;
            if workspaces.is_empty() {
                println!("No tracked workspaces. Run {} in a project first.", "recap start".cyan());
                return Ok(());
            }
            println!("{} tracked workspace(s):\n", workspaces.len());
            for ws in workspaces {
                let activity = match ws.last_activity {
                    Some(t) => output::relative_age(t),
                    None => "never".to_string(),
                };
                println!(
                    "  {:>4} capsule(s)  {:<14} {}",
                    ws.capsule_count,
                    activity.yellow(),
                    ws.root_path.display()
                );
            }
        }
        Command::Stats => {
            let store = project_store()?;
            let capsule_store = CapsuleStore::open(&store);
            let report = stats::stats(&capsule_store)?;
            println!("{}", "session statistics".bold());
            println!("  sessions:       {}", report.session_count);
            println!("  files changed:  {}", report.files_changed_total);
            println!(
                "  code changes:   {} {}",
                format!("+{}", report.lines_added_total).green(),
                format!("-{}", report.lines_removed_total).red()
            );
            println!("  markers:        {}", report.marker_count);
            if !report.per_file_change_count.is_empty() {
                println!("\n{}", "most active files".bold());
                for (path, count) in report.per_file_change_count.iter().take(5) {
                    println!("  {}x {}", count, path.cyan());
                }
            }
            if !report.tag_distribution.is_empty() {
                println!("\n{}", "most used tags".bold());
                for (tag, count) in report.tag_distribution.iter().take(5) {
                    println!("  {}x {}", count, tag.magenta());
                }
            }
        }
        Command::Export {
            output: output_path,
            tags,
            since,
        } => {
            let store = project_store()?;
            let filter = ListFilter {
                since: since.as_deref().map(time::parse_since_expr).transpose()?,
                until: None,
                tags,
            };
            let capsules = CapsuleStore::open(&store).list(&filter)?;
            if capsules.is_empty() {
                println!("No sessions to export.");
                return Ok(());
            }
            let project_name = store
                .project_root
                .as_deref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "project".to_string());
            let md = capsule::export_markdown(&project_name, &capsules);
            fs::write(&output_path, md).map_err(error::RecapError::IoError)?;
            println!(
                "{} Exported {} session(s) to {}",
                "ok:".green().bold(),
                capsules.len(),
                output_path.display()
            );
        }
        Command::Cleanup { days, dry_run } => {
            let store = project_store()?;
            let cutoff = Utc::now() - Duration::days(days);
            let removed = CapsuleStore::open(&store).cleanup_before(cutoff, dry_run)?;
            if dry_run {
                println!(
                    "Would remove {} capsule(s) older than {} days.",
                    removed, days
                );
            } else {
                println!(
                    "{} Removed {} capsule(s) older than {} days.",
                    "ok:".green().bold(),
                    removed,
                    days
                );
            }
        }
        Command::Rebuild => {
            let store = project_store()?;
            let indexed = CapsuleStore::open(&store).rebuild()?;
            println!(
                "{} Index rebuilt from the log ({} capsule(s)).",
                "ok:".green().bold(),
                indexed
            );
        }
    }

    Ok(())
}

fn print_search_hits(capsules: &[capsule::Capsule]) {
    for capsule in capsules {
        let summary = if capsule.summary.is_empty() {
            "(no summary)".to_string()
        } else {
            output::compact_line(&capsule.summary, 100)
        };
        println!(
            "{:>5}  {}  {}",
            capsule.id.to_string().yellow(),
            capsule.created_at.format("%b %d %H:%M").to_string().dimmed(),
            summary
        );
    }
}
