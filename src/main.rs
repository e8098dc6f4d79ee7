//! Binary entry point for curricula.
//!
//! Thin CLI over the engine: imports a file, exports a selection, or lists the
//! registered formats, against the `SQLite` database from configuration.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use curricula::config::EngineConfig;
use curricula::observability::{self, LoggingConfig};
use curricula::{
    Engine, EntitySelector, ImportFlags, ResolutionStrategy, SourceDocument, SqliteGateway,
    StaticTenantContext, TenantScope,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

/// Curricula - tenant-scoped import/export for institutional course records.
#[derive(Parser)]
#[command(name = "curricula")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to configuration file.
    #[arg(short, long, global = true, env = "CURRICULA_CONFIG_PATH")]
    config: Option<PathBuf>,

    /// Override the database path.
    #[arg(long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Tenant selection shared by import and export.
#[derive(clap::Args)]
struct TenantArgs {
    /// Institution identifier.
    #[arg(long, env = "CURRICULA_INSTITUTION")]
    institution: String,

    /// Program within the institution.
    #[arg(long)]
    program: Option<String>,
}

impl TenantArgs {
    fn context(&self) -> StaticTenantContext {
        let mut scope = TenantScope::institution(&self.institution);
        if let Some(program) = &self.program {
            scope = scope.with_program(program);
        }
        StaticTenantContext::new(scope)
    }
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Import a file.
    Import {
        /// Source file.
        file: PathBuf,

        /// Format key (detected from the extension when omitted).
        #[arg(short, long)]
        format: Option<String>,

        /// Classify and report without writing.
        #[arg(long)]
        dry_run: bool,

        /// Abort at the first error.
        #[arg(long)]
        strict: bool,

        /// Resolution strategy: overwrite, merge, or skip.
        #[arg(long)]
        strategy: Option<String>,

        #[command(flatten)]
        tenant: TenantArgs,
    },

    /// Export records.
    Export {
        /// Selector, e.g. `all`, `courses,sections` or `courses:bio`.
        #[arg(short, long, default_value = "all")]
        selector: String,

        /// Format key.
        #[arg(short, long)]
        format: String,

        /// Output file (stdout when omitted).
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[command(flatten)]
        tenant: TenantArgs,
    },

    /// List registered formats.
    Formats,
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref(), cli.database.clone()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e:#}");
            return ExitCode::FAILURE;
        },
    };

    if let Err(e) = observability::init(&LoggingConfig::from_settings(&config.logging, cli.verbose)) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run_command(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

fn load_config(path: Option<&Path>, database: Option<PathBuf>) -> Result<EngineConfig> {
    let mut config = match path {
        Some(path) => {
            let mut config = EngineConfig::load_from_file(path)
                .with_context(|| format!("reading {}", path.display()))?;
            config.apply_env_overrides();
            config
        },
        None => EngineConfig::load_default(),
    };
    if let Some(database) = database {
        config.database_path = database;
    }
    Ok(config)
}

fn open_engine(config: EngineConfig) -> Result<Engine> {
    let gateway = SqliteGateway::new(&config.database_path)
        .with_context(|| format!("opening {}", config.database_path.display()))?;
    Ok(Engine::with_default_adapters(config, Arc::new(gateway))?)
}

fn run_command(command: Commands, config: EngineConfig) -> Result<ExitCode> {
    match command {
        Commands::Import {
            file,
            format,
            dry_run,
            strict,
            strategy,
            tenant,
        } => {
            let engine = open_engine(config)?;
            let format = match format {
                Some(format) => format,
                None => engine.registry().format_for_path(&file)?,
            };
            let mut flags = if dry_run {
                ImportFlags::dry_run()
            } else {
                ImportFlags::real()
            }
            .with_strict(strict || engine.config().strict_by_default);
            if let Some(strategy) = strategy {
                let Some(strategy) = ResolutionStrategy::parse(&strategy) else {
                    bail!("unknown strategy '{strategy}' (expected overwrite, merge, or skip)");
                };
                flags = flags.with_strategy(strategy);
            }

            let source = SourceDocument::from_path(&file)?;
            match engine.submit_import(&source, &format, flags, &tenant.context()) {
                Ok(report) => {
                    print_json(&report)?;
                    eprintln!("{}", report.summary());
                    Ok(ExitCode::SUCCESS)
                },
                Err(e) if e.partial_report().is_some() => {
                    if let Some(report) = e.partial_report() {
                        print_json(report)?;
                    }
                    eprintln!("Error: {e}");
                    Ok(ExitCode::FAILURE)
                },
                Err(e) => Err(e.into()),
            }
        },

        Commands::Export {
            selector,
            format,
            output,
            tenant,
        } => {
            let engine = open_engine(config)?;
            let selector: EntitySelector = selector.parse()?;
            let (bytes, manifest) = engine.submit_export(&selector, &format, &tenant.context())?;
            match output {
                Some(path) => std::fs::write(&path, &bytes)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => std::io::stdout().lock().write_all(&bytes)?,
            }
            eprintln!("{}", serde_json::to_string_pretty(&manifest)?);
            Ok(if manifest.complete {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        },

        Commands::Formats => {
            let registry = curricula::AdapterRegistry::with_defaults()?;
            print_json(&registry.descriptors())?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    let mut out = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    Ok(())
}
