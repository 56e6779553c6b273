//! OrgForge operator CLI
//!
//! Runs the engine's operations directly against the configured backends,
//! without going through the gateway. `sync-all` is the periodic job that
//! propagates catalog changes to every onboarded organization.
//!
//! Results are printed to stdout as JSON; logs go to stderr.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::stream::{self, StreamExt};
use orgforge_common::{slug, AppConfig, Platform, SyncOptions};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// OrgForge administration.
#[derive(Debug, Parser)]
#[command(name = "orgforge-admin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file; otherwise config/ and APP__ variables are used.
    #[arg(long, env = "ORGFORGE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create the shared dataset and any missing meta tables.
    Bootstrap,
    /// Show the status of the shared dataset or of one organization.
    Status {
        /// Organization slug; omit for the shared dataset.
        #[arg(long)]
        org: Option<String>,
    },
    /// Add whatever one organization's dataset is missing.
    SyncOrg {
        org_slug: String,
        #[command(flatten)]
        flags: SyncFlags,
    },
    /// Sync every onboarded organization.
    SyncAll {
        /// Organizations synced in parallel; defaults to sync_job.concurrency.
        #[arg(long)]
        concurrency: Option<usize>,
        #[command(flatten)]
        flags: SyncFlags,
    },
    /// Decrypt and print an organization's active API key.
    RecoverKey { org_slug: String },
    /// Suggest a slug for a company name.
    SuggestSlug { company_name: String },
}

#[derive(Debug, Clone, Copy, Args)]
struct SyncFlags {
    /// Do not create missing tables.
    #[arg(long)]
    no_tables: bool,
    /// Do not add missing columns.
    #[arg(long)]
    no_columns: bool,
    /// Do not recreate materialized views.
    #[arg(long)]
    no_views: bool,
}

impl From<SyncFlags> for SyncOptions {
    fn from(flags: SyncFlags) -> Self {
        SyncOptions {
            sync_missing_tables: !flags.no_tables,
            sync_missing_columns: !flags.no_columns,
            recreate_views: !flags.no_views,
        }
    }
}

/// One org's line in the `sync-all` summary
#[derive(Debug, Serialize)]
struct OrgOutcome {
    org_slug: String,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    recovered: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    changes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Debug, Serialize)]
struct SyncAllSummary {
    total: usize,
    succeeded: usize,
    failed: usize,
    orgs: Vec<OrgOutcome>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .context("failed to load configuration")?;

    // Purely local, no backends needed
    if let Commands::SuggestSlug { company_name } = &cli.command {
        println!("{}", json!({ "org_slug": slug::generate(company_name) }));
        return Ok(());
    }

    let platform = Platform::from_config(&config).await?;
    let output = execute(cli.command, &platform, &config).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

async fn execute(command: Commands, platform: &Platform, config: &AppConfig) -> Result<Value> {
    let value = match command {
        Commands::Bootstrap => serde_json::to_value(platform.central.bootstrap().await?)?,
        Commands::Status { org: None } => serde_json::to_value(platform.central.status().await?)?,
        Commands::Status { org: Some(org_slug) } => {
            serde_json::to_value(platform.provisioner.status(&org_slug).await?)?
        }
        Commands::SyncOrg { org_slug, flags } => {
            serde_json::to_value(platform.provisioner.sync(&org_slug, flags.into()).await?)?
        }
        Commands::SyncAll { concurrency, flags } => {
            let concurrency = concurrency.unwrap_or(config.sync_job.concurrency);
            let summary = sync_all(platform, flags.into(), concurrency).await?;
            if summary.failed > 0 {
                // Print the details before failing the process
                println!("{}", serde_json::to_string_pretty(&summary)?);
                anyhow::bail!("{} of {} organizations failed to sync", summary.failed, summary.total);
            }
            serde_json::to_value(summary)?
        }
        Commands::RecoverKey { org_slug } => {
            let key = platform.credentials.recover(&org_slug).await?;
            warn!(%org_slug, "API key recovered by operator");
            json!({ "org_slug": org_slug, "api_key": key.into_inner() })
        }
        Commands::SuggestSlug { company_name } => json!({ "org_slug": slug::generate(&company_name) }),
    };
    Ok(value)
}

/// Sync every org with bounded parallelism. One org failing does not stop
/// the others.
async fn sync_all(platform: &Platform, options: SyncOptions, concurrency: usize) -> Result<SyncAllSummary> {
    let slugs = platform.provisioner.list_orgs().await?;
    info!(orgs = slugs.len(), concurrency, "Syncing all organizations");

    let mut orgs: Vec<OrgOutcome> = stream::iter(slugs)
        .map(|org_slug| async move {
            match platform.provisioner.sync(&org_slug, options).await {
                Ok(report) => OrgOutcome {
                    recovered: Some(report.recovered),
                    changes: Some(report.report.changes()),
                    org_slug,
                    ok: true,
                    error: None,
                },
                Err(e) => {
                    warn!(%org_slug, error = %e, "Organization sync failed");
                    OrgOutcome {
                        org_slug,
                        ok: false,
                        recovered: None,
                        changes: None,
                        error: Some(e.to_string()),
                    }
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;
    orgs.sort_by(|a, b| a.org_slug.cmp(&b.org_slug));

    let failed = orgs.iter().filter(|o| !o.ok).count();
    Ok(SyncAllSummary {
        total: orgs.len(),
        succeeded: orgs.len() - failed,
        failed,
        orgs,
    })
}
