//! # Quaff CLI (`quaff`)
//!
//! The `quaff` binary drives endpoint synchronization from the command line.
//!
//! ## Usage
//!
//! ```bash
//! quaff --config ./config/quaff.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `quaff init` | Create the SQLite database and run schema migrations |
//! | `quaff endpoints` | List configured endpoints and how they resolve |
//! | `quaff fetch <alias>` | Fetch the first page of an endpoint and print its items |
//! | `quaff sync [alias...]` | Fetch, map, and persist endpoints (`all` for every api) |
//! | `quaff history` | Show recent sync runs |
//!
//! ## Examples
//!
//! ```bash
//! quaff init
//! quaff fetch list:items --param q=shoes
//! quaff sync list:items list:tags --json-progress
//! RUST_LOG=quaff=debug quaff sync all --timeout-secs 300
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use quaff::api::{sync_aliases, sync_all};
use quaff::config::load_config;
use quaff::endpoint::SyncControl;
use quaff::models::SyncReport;
use quaff::progress::ProgressMode;
use quaff::store::sqlite::SqliteStore;
use quaff::transport::QueryParams;
use quaff::{db, migrate, sources, Quaff};

/// Quaff CLI: declarative remote API synchronization.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file describing apis, endpoints, and models.
#[derive(Parser)]
#[command(
    name = "quaff",
    about = "Quaff: pull remote API data into local entities",
    version,
    long_about = "Quaff resolves configured endpoints (with parent inheritance), fetches \
    paginated JSON, XML, or HTML responses over HTTP or from local files, maps each item onto \
    a local entity through path-based field maps, and persists the result."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/quaff.toml")]
    config: PathBuf,

    /// Log at debug level unless `RUST_LOG` says otherwise.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; safe to run repeatedly.
    Init,

    /// List configured endpoints, their model, transport, and resolved URI.
    Endpoints,

    /// Fetch the first page of an endpoint and print its decoded items.
    ///
    /// Nothing is mapped or persisted.
    Fetch {
        /// Endpoint alias, e.g. `list:items`, `url:https://...`, or `path:data.json`.
        alias: String,

        /// Query parameter as `key=value`; repeatable.
        #[arg(long = "param", value_parser = parse_key_val)]
        params: Vec<(String, String)>,
    },

    /// Sync endpoints into the local store.
    ///
    /// With no aliases, or the single alias `all`, every enabled api syncs
    /// its default endpoints.
    Sync {
        aliases: Vec<String>,

        /// Emit progress as JSON lines on stderr.
        #[arg(long)]
        json_progress: bool,

        /// Suppress progress output.
        #[arg(long, conflicts_with = "json_progress")]
        quiet: bool,

        /// Abort remaining passes after this many seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
    },

    /// Show recent sync runs.
    History {
        #[arg(long, default_value = "20")]
        limit: i64,
    },
}

/// Parse a `key=value` pair for `--param` arguments.
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no '=' found in '{}'", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn print_reports(reports: &[SyncReport]) {
    for r in reports {
        let failed = r.failures.len();
        match &r.error {
            Some(e) => println!(
                "{:<24} {:<10} pages={} written={} failed={} error: {}",
                r.alias,
                r.outcome.as_str(),
                r.pages,
                r.written,
                failed,
                e
            ),
            None => println!(
                "{:<24} {:<10} pages={} written={} failed={}",
                r.alias,
                r.outcome.as_str(),
                r.pages,
                r.written,
                failed
            ),
        }
        for f in &r.failures {
            println!("    item {}: {}", f.index, f.reason);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Endpoints => {
            sources::list_endpoints(&cfg)?;
        }
        Commands::Fetch { alias, params } => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            let quaff = Quaff::new(cfg, Arc::new(SqliteStore::new(pool)))?;
            let params: QueryParams = params.into_iter().collect();
            let endpoint = quaff.endpoint(&alias)?.with_params(params);
            let response = endpoint.fetch().await?;
            if response.is_error() {
                bail!(
                    "{} returned {} {}: {}",
                    alias,
                    response.label(),
                    response.result_code(),
                    response.result_message()
                );
            }
            let items = response.items()?;
            println!("{}", serde_json::to_string_pretty(items)?);
        }
        Commands::Sync {
            aliases,
            json_progress,
            quiet,
            timeout_secs,
        } => {
            migrate::run_migrations(&cfg).await?;
            let pool = db::connect(&cfg).await?;
            let mode = if quiet {
                ProgressMode::Off
            } else if json_progress {
                ProgressMode::Json
            } else {
                ProgressMode::default_for_tty()
            };
            let quaff = Quaff::new(cfg, Arc::new(SqliteStore::new(pool)))?
                .with_progress(mode.reporter());

            let control = match timeout_secs {
                Some(secs) => SyncControl::with_timeout(Duration::from_secs(secs)),
                None => SyncControl::new(),
            };
            let ctrl_c = control.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    ctrl_c.cancel();
                }
            });

            let all = aliases.is_empty() || (aliases.len() == 1 && aliases[0] == "all");
            let reports = if all {
                sync_all(&quaff, &control).await
            } else {
                sync_aliases(&quaff, &aliases, &control).await
            };

            print_reports(&reports);
            let failed = reports.iter().filter(|r| !r.is_ok()).count();
            if failed > 0 {
                bail!("{} of {} endpoint(s) did not sync cleanly", failed, reports.len());
            }
        }
        Commands::History { limit } => {
            let pool = db::connect(&cfg).await?;
            let store = SqliteStore::new(pool);
            let rows = store
                .recent_syncs(limit)
                .await
                .context("cannot read sync log (run `quaff init` first)")?;
            if rows.is_empty() {
                println!("No syncs recorded.");
            }
            for (alias, outcome, written, failed) in rows {
                println!("{:<24} {:<10} written={} failed={}", alias, outcome, written, failed);
            }
        }
    }

    Ok(())
}
