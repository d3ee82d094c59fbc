//! Tidemark Migration CLI Tool
//!
//! Command-line interface for applying and inspecting document store migrations.
//! Supports both manual use and CI/CD pipelines: the exit code is non-zero on
//! any failure.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tidemark::config::{TidemarkConfig, DEFAULT_CONFIG_FILE};
use tidemark::connection::connect;
use tidemark::migration::{MigrationError, MigrationStatus, Migrator};
use tidemark_migrate::generate::generate_migration;

#[derive(Parser)]
#[command(name = "tidemark-migrate")]
#[command(about = "Migration management tool for Tidemark")]
#[command(version = "0.1.0")]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Store base URL (overrides configuration)
    #[arg(long)]
    url: Option<String>,

    /// Migration key namespacing the history (overrides configuration)
    #[arg(long)]
    migration_key: Option<String>,

    /// Operator recorded on applied migrations
    #[arg(long)]
    user: Option<String>,

    /// Migrations directory path (overrides configuration)
    #[arg(long)]
    migrations_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Quiet output (errors only)
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending migrations
    Up {
        /// Dry run - show what would be executed without running
        #[arg(long)]
        dry_run: bool,
    },

    /// Show migration status (applied vs pending)
    Status,

    /// Verify applied migrations against migration files
    Validate,

    /// Show detailed information for one migration version
    Info {
        version: String,
    },

    /// Delete an orphaned lock document left by a crashed process
    Unlock,

    /// Generate a new migration file
    Generate {
        /// Migration description (e.g., "create orders index")
        description: String,

        /// Explicit version (default: last version bumped)
        #[arg(long)]
        version: Option<String>,
    },
}

fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli) {
        Ok(()) => {
            if !cli.quiet {
                println!("{}", "✅ Success".green());
            }
            process::exit(0);
        }
        Err(e) => {
            match e.downcast_ref::<MigrationError>() {
                Some(migration_error) => eprintln!("{} {}", "❌".red(), migration_error.format_detailed()),
                None => eprintln!("{} {:#}", "❌ Error:".red(), e),
            }
            process::exit(1);
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli)?;

    if let Commands::Generate { description, version } = &cli.command {
        let path = generate_migration(&config.migrations_dir, description, version.as_deref())?;
        println!("✅ Generated migration: {}", path.display());
        println!("   Add the requests to run, then apply with `tidemark-migrate up`");
        return Ok(());
    }

    config.validate().context("invalid configuration")?;
    let store = connect(&config).context("failed to create store client")?;
    let migrator = Migrator::from_config(Arc::new(store), &config)?;

    let result = match &cli.command {
        Commands::Up { dry_run: true } => handle_dry_run(&migrator),
        Commands::Up { dry_run: false } => handle_up(&migrator),
        Commands::Status => handle_status(&migrator),
        Commands::Validate => handle_validate(&migrator),
        Commands::Info { version } => handle_info(&migrator, version),
        Commands::Unlock => handle_unlock(&migrator),
        Commands::Generate { .. } => Ok(()),
    };
    migrator.close();

    Ok(result?)
}

/// Configuration file and env, overridden by command-line flags
fn resolve_config(cli: &Cli) -> anyhow::Result<TidemarkConfig> {
    let mut config = TidemarkConfig::read_from(&cli.config)
        .with_context(|| format!("failed to read configuration from {}", cli.config.display()))?;

    if let Some(url) = &cli.url {
        config.url = url.clone();
    }
    if let Some(key) = &cli.migration_key {
        config.migration_key = key.clone();
    }
    if let Some(user) = &cli.user {
        config.migration_user = Some(user.clone());
    }
    if let Some(dir) = &cli.migrations_dir {
        config.migrations_dir = dir.clone();
    }

    Ok(config)
}

fn handle_up(migrator: &Migrator) -> Result<(), MigrationError> {
    println!("Applying migrations for key [{}]...", migrator.migration_key());
    let report = migrator.execute()?;

    for filename in &report.skipped {
        println!("  {} {} (applied by another process)", "↷".yellow(), filename);
    }
    if report.applied.is_empty() {
        println!("✅ No migrations to apply");
    } else {
        for filename in &report.applied {
            println!("  {} {}", "✓".green(), filename);
        }
        println!("✅ Successfully applied {} migration(s)", report.applied.len());
    }

    Ok(())
}

fn handle_dry_run(migrator: &Migrator) -> Result<(), MigrationError> {
    let status = migrator.status()?;
    if status.pending.is_empty() {
        println!("No pending migrations to apply");
        return Ok(());
    }

    println!("Would apply {} migration(s):", status.pending_count);
    for (i, pending) in status.pending.iter().enumerate() {
        println!("  {}. {} ({} request(s))", i + 1, pending.filename, pending.steps);
    }
    Ok(())
}

fn handle_status(migrator: &Migrator) -> Result<(), MigrationError> {
    let status = migrator.status()?;
    print_status(migrator.migration_key(), &status);
    Ok(())
}

fn print_status(migration_key: &str, status: &MigrationStatus) {
    println!("\n📊 Migration Status [{}]\n", migration_key);

    if !status.applied.is_empty() {
        println!("{}", format!("✅ Applied Migrations ({}):", status.applied_count).green());
        for record in &status.applied {
            println!(
                "  ✓ {} ({}, {}ms{})",
                record.filename,
                record.installed_on.format("%Y-%m-%d %H:%M:%S"),
                record.execution_time,
                record
                    .installed_by
                    .as_deref()
                    .map(|user| format!(", by {user}"))
                    .unwrap_or_default()
            );
        }
    } else {
        println!("✅ Applied Migrations: None");
    }

    println!();

    if !status.pending.is_empty() {
        println!("{}", format!("⏳ Pending Migrations ({}):", status.pending_count).yellow());
        for pending in &status.pending {
            println!("  ⏳ {} (pending)", pending.filename);
        }
    } else {
        println!("⏳ Pending Migrations: None");
    }

    println!("\n📈 Summary: {} applied, {} pending", status.applied_count, status.pending_count);
}

fn handle_validate(migrator: &Migrator) -> Result<(), MigrationError> {
    println!("Validating migration history...");
    migrator.validate()?;
    println!("✅ History matches migration files");
    Ok(())
}

fn handle_info(migrator: &Migrator, version: &str) -> Result<(), MigrationError> {
    let status = migrator.status()?;

    if let Some(record) = status.applied.iter().find(|r| r.version == version) {
        println!("\n📋 Migration Information\n");
        println!("File: {}", record.filename);
        println!("Version: {}", record.version);
        println!("Description: {}", record.description);
        println!("Order: {}", record.order);
        println!("Checksum: {}", record.checksum);
        println!("Installed On: {}", record.installed_on.format("%Y-%m-%d %H:%M:%S UTC"));
        if let Some(user) = &record.installed_by {
            println!("Installed By: {}", user);
        }
        println!("Execution Time: {}ms", record.execution_time);
    } else if let Some(pending) = status.pending.iter().find(|p| p.version == version) {
        println!("\n📋 Migration Information (Pending)\n");
        println!("File: {}", pending.filename);
        println!("Version: {}", pending.version);
        println!("Description: {}", pending.description);
        println!("Order: {}", pending.order);
        println!("Checksum: {}", pending.checksum);
        println!("Requests: {}", pending.steps);
        println!("Status: Pending");
    } else {
        return Err(MigrationError::Config(format!("no migration with version {version}")));
    }

    Ok(())
}

fn handle_unlock(migrator: &Migrator) -> Result<(), MigrationError> {
    println!(
        "{}",
        "Deleting the lock document. Make sure no migration is running for this key.".yellow()
    );
    migrator.force_unlock()?;
    println!("✅ Released lock [{}]", migrator.lock().lock_id());
    Ok(())
}
