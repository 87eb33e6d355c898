//! # Vellum CLI - Version history for JSON asset manifests
//!
//! A command-line front end for the Vellum library.
//!
//! ## Features
//! - Save and roll back versions of individual assets
//! - Snapshot whole manifest collections and compare snapshots
//! - Rebuild the history of one entity across snapshots
//! - Diff and hash arbitrary JSON files
//!
//! ## Usage
//! ```bash
//! # Initialize a vault in the current directory
//! vellum init
//!
//! # Save a version of an asset from a JSON file
//! vellum save sword-1 sword.json -m "Buff damage"
//!
//! # Snapshot every collection
//! vellum snapshot manifests.json -m "Balance pass"
//!
//! # Compare two snapshots
//! vellum compare <from-id> <to-id>
//! ```

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use colored::*;
use humantime::format_duration;
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use vellum::diff::diff_values;
use vellum::format::{
    format_asset_history, format_changes, format_snapshot_diff, format_summary, FormatOptions,
};
use vellum::hash::{content_hash, manifests_hash};
use vellum::types::{AssetVersion, DiffSummary, HistoryOptions, Manifests, SaveOptions};
use vellum::{Vault, VaultBuilder, VellumError};

/// Vellum CLI - Versioning and structural diffs for JSON asset manifests
#[derive(Parser)]
#[command(name = "vellum")]
#[command(version)]
#[command(about = "Version, snapshot and diff JSON asset manifests")]
#[command(long_about = None)]
struct Cli {
    /// Vault directory (defaults to .vellum)
    #[arg(short, long, global = true)]
    storage: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a vault
    Init {
        /// Versions kept per asset
        #[arg(long, default_value_t = vellum::DEFAULT_MAX_VERSIONS_PER_ASSET)]
        max_versions: usize,

        /// Snapshots kept before the oldest are evicted
        #[arg(long, default_value_t = vellum::DEFAULT_MAX_SNAPSHOTS)]
        max_snapshots: usize,

        /// Discard unreadable indexes instead of keeping them as .corrupt
        #[arg(long)]
        no_quarantine: bool,
    },

    /// Save a version of an asset from a JSON file
    Save {
        /// Asset id
        asset: String,

        /// JSON file with the full asset state
        file: PathBuf,

        /// Description of the change
        #[arg(short, long)]
        message: Option<String>,

        /// Author of the change
        #[arg(long)]
        author: Option<String>,

        /// Label instead of the next vN
        #[arg(long)]
        label: Option<String>,
    },

    /// List versions of an asset
    #[command(alias = "log")]
    History {
        /// Asset id
        asset: String,

        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Print the data of a version
    Show {
        /// Asset id
        asset: String,

        /// Version id prefix or label (defaults to current)
        version: Option<String>,
    },

    /// Compare two versions of an asset
    DiffVersions {
        /// Asset id
        asset: String,

        /// From version (id prefix or label)
        from: String,

        /// To version (id prefix or label)
        to: String,

        /// Print the diff as JSON
        #[arg(long)]
        json: bool,
    },

    /// Save an older version as the newest one
    Rollback {
        /// Asset id
        asset: String,

        /// Target version (id prefix or label)
        version: String,
    },

    /// Delete every version of an asset
    Forget {
        /// Asset id
        asset: String,
    },

    /// Snapshot every collection from a manifests JSON file
    #[command(alias = "snap")]
    Snapshot {
        /// JSON object mapping collection names to entity arrays
        file: PathBuf,

        /// Description message
        #[arg(short, long)]
        message: Option<String>,

        /// Skip the snapshot when nothing changed
        #[arg(long)]
        if_changed: bool,
    },

    /// List snapshots
    #[command(alias = "ls")]
    Snapshots {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,

        /// Limit results
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Compare two snapshots
    Compare {
        /// From snapshot
        from: String,

        /// To snapshot
        to: String,

        /// Print the comparison as JSON
        #[arg(long)]
        json: bool,
    },

    /// Restore an older snapshot as a new one
    Restore {
        /// Snapshot id
        snapshot: String,

        /// Write the restored manifests to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Delete a snapshot
    DropSnapshot {
        /// Snapshot id
        snapshot: String,
    },

    /// Rebuild the history of one entity from snapshots
    AssetHistory {
        /// Entity id
        asset: String,

        /// Only look in this collection
        #[arg(short, long)]
        collection: Option<String>,
    },

    /// Diff two JSON files
    Diff {
        /// Old JSON file
        old: PathBuf,

        /// New JSON file
        new: PathBuf,

        /// Print the changes as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the content hash of a JSON file
    Hash {
        /// JSON file
        file: PathBuf,

        /// Hash the file as a manifests object
        #[arg(long)]
        manifests: bool,
    },

    /// Show status
    Status,
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("vellum=debug")),
            )
            .with_writer(std::io::stderr)
            .init();
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        let message = match e.downcast_ref::<VellumError>() {
            Some(error) => error.user_message(),
            None => format!("{:#}", e),
        };
        eprintln!("{}: {}", "Error".red().bold(), message);
        std::process::exit(1);
    }
}

/// Main command runner
fn run(cli: Cli) -> anyhow::Result<()> {
    let storage_path = cli.storage.unwrap_or_else(|| PathBuf::from(".vellum"));

    match cli.command {
        Commands::Init { max_versions, max_snapshots, no_quarantine } => {
            cmd_init(storage_path, max_versions, max_snapshots, no_quarantine)
        }
        Commands::Save { asset, file, message, author, label } => {
            cmd_save(storage_path, asset, file, message, author, label)
        }
        Commands::History { asset, limit } => cmd_history(storage_path, asset, limit),
        Commands::Show { asset, version } => cmd_show(storage_path, asset, version),
        Commands::DiffVersions { asset, from, to, json } => {
            cmd_diff_versions(storage_path, asset, from, to, json)
        }
        Commands::Rollback { asset, version } => cmd_rollback(storage_path, asset, version),
        Commands::Forget { asset } => cmd_forget(storage_path, asset),
        Commands::Snapshot { file, message, if_changed } => {
            cmd_snapshot(storage_path, file, message, if_changed)
        }
        Commands::Snapshots { detailed, limit } => cmd_snapshots(storage_path, detailed, limit),
        Commands::Compare { from, to, json } => cmd_compare(storage_path, from, to, json),
        Commands::Restore { snapshot, output } => cmd_restore(storage_path, snapshot, output),
        Commands::DropSnapshot { snapshot } => cmd_drop_snapshot(storage_path, snapshot),
        Commands::AssetHistory { asset, collection } => {
            cmd_asset_history(storage_path, asset, collection)
        }
        Commands::Diff { old, new, json } => cmd_diff(old, new, json),
        Commands::Hash { file, manifests } => cmd_hash(file, manifests),
        Commands::Status => cmd_status(storage_path),
    }
}

/// Initialize a vault directory
///
/// The directory contains:
/// - metadata.json: Configuration and version info
/// - versions/: One version chain per asset
/// - snapshots/: Snapshot index and bodies
fn cmd_init(
    storage_path: PathBuf,
    max_versions: usize,
    max_snapshots: usize,
    no_quarantine: bool,
) -> anyhow::Result<()> {
    println!("{}", "Initializing vault...".blue().bold());

    let vault = VaultBuilder::new()
        .max_versions_per_asset(max_versions)
        .max_snapshots(max_snapshots)
        .quarantine_corrupt_index(!no_quarantine)
        .init(storage_path.clone())?;

    println!("{} Initialized vault", "✓".green().bold());
    println!("  Storage: {}", storage_path.display().to_string().cyan());
    println!("  Versions per asset: {}", vault.config().max_versions_per_asset);
    println!("  Snapshots kept: {}", vault.config().max_snapshots);
    println!("\nNext steps:");
    println!("  - Save an asset: {}", "vellum save <asset-id> <file.json>".yellow());
    println!("  - Snapshot collections: {}", "vellum snapshot manifests.json -m \"Initial\"".yellow());

    Ok(())
}

/// Save a new version of one asset
fn cmd_save(
    storage_path: PathBuf,
    asset: String,
    file: PathBuf,
    message: Option<String>,
    author: Option<String>,
    label: Option<String>,
) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let data = read_json_file(&file)?;

    let previous = vault.current_version(&asset)?;
    let options = SaveOptions {
        description: message,
        created_by: author,
        label,
    };
    let version = vault.save_version(&asset, &data, options)?;

    if previous.as_ref().map(|p| &p.id) == Some(&version.id) {
        println!(
            "{} No changes, {} is still at {}",
            "=".dimmed(),
            asset.cyan(),
            version.label.yellow()
        );
        return Ok(());
    }

    println!(
        "{} Saved {} of {} ({})",
        "✓".green().bold(),
        version.label.yellow().bold(),
        asset.cyan(),
        version.short_id().dimmed()
    );
    if let Some(previous) = previous {
        if let Some(diff) = vault.diff_versions(&asset, &previous.id, &version.id)? {
            println!("  {}", format_summary(&diff.summary));
        }
    }

    Ok(())
}

/// List the versions of one asset, newest first
fn cmd_history(storage_path: PathBuf, asset: String, limit: Option<usize>) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let versions = vault.version_history(
        &asset,
        HistoryOptions {
            limit,
            include_data: false,
        },
    )?;

    if versions.is_empty() {
        println!("{}", format!("No versions of {}.", asset).yellow());
        return Ok(());
    }

    let current_id = vault.current_version(&asset)?.map(|v| v.id);
    println!("{} {}", "Versions of".blue().bold(), asset.cyan().bold());
    println!();

    for version in &versions {
        let marker = if current_id.as_ref() == Some(&version.id) {
            "*".green().bold()
        } else {
            " ".normal()
        };
        print!("{} {:<6} {} ", marker, version.label.yellow().bold(), version.short_id().dimmed());
        print!("{} ", format_age(version.created_at).dimmed());
        print!("{} ", version.created_by.dimmed());
        if let Some(description) = &version.description {
            print!("{}", description.cyan());
        }
        println!();
    }

    Ok(())
}

/// Print the full data of one version
fn cmd_show(storage_path: PathBuf, asset: String, version: Option<String>) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let version = match version {
        Some(reference) => resolve_version(&vault, &asset, &reference)?,
        None => vault
            .current_version(&asset)?
            .ok_or_else(|| anyhow!("Asset {} has no versions", asset))?,
    };

    println!("{}", serde_json::to_string_pretty(&version.data.unwrap_or(Value::Null))?);
    Ok(())
}

/// Show the field changes between two versions
fn cmd_diff_versions(
    storage_path: PathBuf,
    asset: String,
    from: String,
    to: String,
    json: bool,
) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let from = resolve_version(&vault, &asset, &from)?;
    let to = resolve_version(&vault, &asset, &to)?;

    let diff = vault
        .diff_versions(&asset, &from.id, &to.id)?
        .ok_or_else(|| anyhow!("Version not found"))?;

    if json {
        return print_json(&diff);
    }

    println!(
        "{} {} {} → {}",
        "Comparing".blue().bold(),
        asset.cyan(),
        from.label.yellow(),
        to.label.yellow()
    );
    println!();
    print!("{}", format_changes(&diff.changes, &format_options()));
    Ok(())
}

/// Roll an asset back to an older version
fn cmd_rollback(storage_path: PathBuf, asset: String, version: String) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let target = resolve_version(&vault, &asset, &version)?;

    vault
        .rollback(&asset, &target.id)?
        .ok_or_else(|| anyhow!("Version not found: {}", version))?;
    let current = vault
        .current_version(&asset)?
        .ok_or_else(|| anyhow!("Asset {} has no versions", asset))?;

    println!(
        "{} Rolled {} back to {} (now {})",
        "✓".green().bold(),
        asset.cyan(),
        target.label.yellow(),
        current.label.yellow().bold()
    );
    Ok(())
}

/// Drop the whole version chain of one asset
fn cmd_forget(storage_path: PathBuf, asset: String) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    if vault.delete_asset_versions(&asset)? {
        println!("{} Deleted every version of {}", "✓".green().bold(), asset.cyan());
    } else {
        println!("{}", format!("No versions of {}.", asset).yellow());
    }
    Ok(())
}

/// Snapshot every collection in a manifests file
fn cmd_snapshot(
    storage_path: PathBuf,
    file: PathBuf,
    message: Option<String>,
    if_changed: bool,
) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let manifests = read_manifests_file(&file)?;
    let description = message.unwrap_or_else(|| "Snapshot".to_string());

    let snapshot = if if_changed {
        match vault.create_snapshot_if_changed(manifests, &description)? {
            Some(snapshot) => snapshot,
            None => {
                println!("{} Nothing changed since the current snapshot", "=".dimmed());
                return Ok(());
            }
        }
    } else {
        vault.create_snapshot(manifests, &description)?
    };

    println!(
        "{} Created snapshot {}",
        "✓".green().bold(),
        snapshot.short_id().yellow().bold()
    );
    println!("  Message: {}", snapshot.description.cyan());
    println!("  Assets: {}", snapshot.metadata.total_assets.to_string().cyan());
    if snapshot.metadata.changes_from_previous > 0 {
        println!(
            "  Changed: {} entities",
            snapshot.metadata.changes_from_previous.to_string().yellow()
        );
    }
    Ok(())
}

/// List snapshots, newest first
fn cmd_snapshots(storage_path: PathBuf, detailed: bool, limit: Option<usize>) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let snapshots = vault.list_snapshots()?;

    if snapshots.is_empty() {
        println!("{}", "No snapshots found.".yellow());
        return Ok(());
    }

    let current_id = vault.current_snapshot()?.map(|s| s.id);
    println!("{}", "Snapshots:".blue().bold());
    println!();

    let display_count = limit.unwrap_or(snapshots.len()).min(snapshots.len());
    for snapshot in snapshots.iter().take(display_count) {
        let marker = if current_id.as_ref() == Some(&snapshot.id) {
            "*".green().bold()
        } else {
            " ".normal()
        };

        print!("{} {} ", marker, short(&snapshot.id).yellow().bold());
        print!("{} ", snapshot.timestamp.format("%Y-%m-%d %H:%M:%S").to_string().dimmed());
        println!("{}", snapshot.description.cyan());

        if detailed {
            println!(
                "    Assets: {} | Changed: {} | Hash: {}",
                snapshot.metadata.total_assets.to_string().dimmed(),
                snapshot.metadata.changes_from_previous.to_string().dimmed(),
                snapshot.metadata.hash.dimmed()
            );
            println!();
        }
    }

    if display_count < snapshots.len() {
        println!(
            "\n{}",
            format!("Showing {} of {} snapshots", display_count, snapshots.len()).dimmed()
        );
    }
    Ok(())
}

/// Entity-level comparison of two snapshots
fn cmd_compare(storage_path: PathBuf, from: String, to: String, json: bool) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let from = resolve_snapshot(&vault, &from)?;
    let to = resolve_snapshot(&vault, &to)?;

    let diff = vault
        .compare_snapshots(&from, &to)?
        .ok_or_else(|| anyhow!("Snapshot not found"))?;

    if json {
        return print_json(&diff);
    }

    println!(
        "{} {} → {}",
        "Comparing".blue().bold(),
        short(&from).yellow(),
        short(&to).yellow()
    );
    println!();
    print!("{}", format_snapshot_diff(&diff, &format_options()));
    Ok(())
}

/// Restore an older snapshot
fn cmd_restore(storage_path: PathBuf, snapshot: String, output: Option<PathBuf>) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let snapshot_id = resolve_snapshot(&vault, &snapshot)?;

    let manifests = vault
        .restore_snapshot(&snapshot_id)?
        .ok_or_else(|| anyhow!("Snapshot not found: {}", snapshot))?;

    println!(
        "{} Restored snapshot {} ({} assets)",
        "✓".green().bold(),
        short(&snapshot_id).yellow().bold(),
        manifests.total_assets()
    );

    if let Some(path) = output {
        fs::write(&path, serde_json::to_string_pretty(&manifests)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("  Written to {}", path.display().to_string().cyan());
    }
    Ok(())
}

/// Delete one snapshot
fn cmd_drop_snapshot(storage_path: PathBuf, snapshot: String) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let snapshot_id = resolve_snapshot(&vault, &snapshot)?;

    if vault.delete_snapshot(&snapshot_id)? {
        println!("{} Deleted snapshot {}", "✓".green().bold(), short(&snapshot_id).yellow());
    }
    Ok(())
}

/// Rebuild the history of one entity
fn cmd_asset_history(storage_path: PathBuf, asset: String, collection: Option<String>) -> anyhow::Result<()> {
    let vault = open_vault(storage_path)?;
    let entries = vault.asset_history(&asset, collection.as_deref())?;

    println!("{} {}", "History of".blue().bold(), asset.cyan().bold());
    println!();
    print!("{}", format_asset_history(&entries, &format_options()));
    Ok(())
}

/// Diff two JSON files without a vault
fn cmd_diff(old: PathBuf, new: PathBuf, json: bool) -> anyhow::Result<()> {
    let old_value = read_json_file(&old)?;
    let new_value = read_json_file(&new)?;
    let changes = diff_values(&old_value, &new_value);

    if json {
        #[derive(Serialize)]
        struct Output<'a> {
            changes: &'a [vellum::types::FieldChange],
            summary: DiffSummary,
        }
        return print_json(&Output {
            summary: DiffSummary::from_changes(&changes),
            changes: &changes,
        });
    }

    print!("{}", format_changes(&changes, &format_options()));
    Ok(())
}

/// Print the content hash of a JSON file
fn cmd_hash(file: PathBuf, manifests: bool) -> anyhow::Result<()> {
    let hash = if manifests {
        manifests_hash(&read_manifests_file(&file)?)
    } else {
        content_hash(&read_json_file(&file)?)
    };
    println!("{}", hash);
    Ok(())
}

/// Summarize the vault
fn cmd_status(storage_path: PathBuf) -> anyhow::Result<()> {
    let vault = open_vault(storage_path.clone())?;
    let status = vault.status()?;

    println!("{}", "Vault Status:".blue().bold());
    println!();

    if let Some(current) = &status.current_snapshot {
        println!("{}", "Current snapshot:".bold());
        println!("  ID: {}", short(&current.id).yellow());
        println!(
            "  Created: {} ({})",
            current.timestamp.format("%Y-%m-%d %H:%M:%S"),
            format_age(current.timestamp)
        );
        println!("  Message: {}", current.description.cyan());
        println!("  Assets: {}", current.metadata.total_assets);
    } else {
        println!("{}", "No current snapshot".yellow());
    }

    if let Some(reason) = &status.index_reset {
        println!("\n{} Snapshot index was reset: {}", "!".red().bold(), reason);
    }

    println!("\n{}", "Contents:".bold());
    println!("  Snapshots: {}", status.snapshot_count);
    println!("  Versioned assets: {}", status.asset_count);

    println!("\n{}", "Storage:".bold());
    println!("  Location: {}", storage_path.display());
    println!("  Versions per asset: {}", status.config.max_versions_per_asset);
    println!("  Snapshots kept: {}", status.config.max_snapshots);
    Ok(())
}

// Helper functions

/// Open an existing vault
fn open_vault(storage_path: PathBuf) -> anyhow::Result<Vault> {
    Ok(Vault::open(storage_path)?)
}

fn read_json_file(path: &Path) -> anyhow::Result<Value> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path.display()))
}

fn read_manifests_file(path: &Path) -> anyhow::Result<Manifests> {
    let value = read_json_file(path)?;
    serde_json::from_value(value)
        .with_context(|| format!("{} must map collection names to arrays of entities", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn format_options() -> FormatOptions {
    FormatOptions {
        color: colored::control::SHOULD_COLORIZE.should_colorize(),
        ..Default::default()
    }
}

/// Find a version by id prefix or exact label
fn resolve_version(vault: &Vault, asset: &str, reference: &str) -> anyhow::Result<AssetVersion> {
    let versions = vault.version_history(asset, HistoryOptions::default())?;
    versions
        .iter()
        .find(|v| v.label == reference)
        .or_else(|| versions.iter().find(|v| v.id.starts_with(reference)))
        .cloned()
        .ok_or_else(|| anyhow!("Version not found: {}", reference))
}

/// Resolve a snapshot id prefix to a full id
fn resolve_snapshot(vault: &Vault, prefix: &str) -> anyhow::Result<String> {
    let snapshots = vault.list_snapshots()?;
    let matches: Vec<_> = snapshots.iter().filter(|s| s.id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [single] => Ok(single.id.clone()),
        [] => Err(anyhow!("Snapshot not found: {}", prefix)),
        _ => Err(anyhow!("Snapshot prefix {} is ambiguous", prefix)),
    }
}

fn short(id: &str) -> &str {
    &id[..8.min(id.len())]
}

/// Age of a timestamp in human-readable form
fn format_age(timestamp: DateTime<Utc>) -> String {
    let seconds = (Utc::now() - timestamp).num_seconds().max(0) as u64;
    if seconds == 0 {
        return "just now".to_string();
    }
    format!("{} ago", format_duration(Duration::from_secs(seconds)))
}
