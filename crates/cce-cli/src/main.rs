use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use cce_core::Sku;
use cce_enrich::{
    build_governor, connect_store, maybe_build_scheduler, parse_manual_payload, EnrichConfig, EnrichError,
    ManualIngest, MergeMode, MergePolicy, RunRequest,
};
use cce_storage::{run_migrations, PgCatalogStore};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "cce-cli")]
#[command(about = "Crowd catalog enrichment command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Enrich eligible records from the search provider.
    Enrich {
        #[arg(long)]
        limit: Option<usize>,
        /// Process a single SKU.
        #[arg(long)]
        sku: Option<String>,
        /// Overwrite present fields with provider values.
        #[arg(long)]
        force: bool,
        #[arg(long)]
        dry_run: bool,
    },
    /// Apply operator-supplied field values. Reads stdin when no input is given.
    Manual {
        #[arg(long, conflicts_with = "input")]
        json: Option<String>,
        #[arg(long)]
        input: Option<PathBuf>,
        #[arg(long)]
        dry_run: bool,
    },
    Migrate,
    /// Run scheduled enrichment until interrupted.
    Schedule,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cce_cli=info,cce_enrich=info,cce_providers=info,cce_storage=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_configuration() => {
            error!(error = %err, "invalid configuration");
            ExitCode::from(2)
        }
        Err(err) => {
            error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<(), EnrichError> {
    let config = EnrichConfig::from_env();
    match command {
        Commands::Enrich {
            limit,
            sku,
            force,
            dry_run,
        } => {
            let sku = sku
                .map(|raw| Sku::parse(&raw).map_err(|err| EnrichError::Configuration(format!("--sku {raw}: {err}"))))
                .transpose()?;
            config.validate_for_enrich()?;
            let store = connect_store(&config).await?;
            let governor = build_governor(&config, store)?;
            let summary = governor
                .run(RunRequest {
                    limit: limit.unwrap_or(config.run_limit),
                    sku,
                    mode: if force { MergeMode::Force } else { MergeMode::FillBlanksOnly },
                    dry_run,
                })
                .await?;
            print_json(&summary)?;
        }
        Commands::Manual { json, input, dry_run } => {
            let text = match (json, input) {
                (Some(text), _) => text,
                (None, Some(path)) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("reading {}", path.display()))?,
                (None, None) => std::io::read_to_string(std::io::stdin()).context("reading stdin")?,
            };
            let batch = parse_manual_payload(&text)?;
            let store = connect_store(&config).await?;
            let summary = ManualIngest::new(store, MergePolicy::new(config.retailer_base_url.clone()))
                .with_reports_dir(config.reports_dir.clone())
                .apply(batch, dry_run)
                .await?;
            print_json(&summary)?;
        }
        Commands::Migrate => {
            let store = PgCatalogStore::connect(config.database_url()?).await?;
            run_migrations(store.pool()).await?;
        }
        Commands::Schedule => {
            let store = connect_store(&config).await?;
            let governor = Arc::new(build_governor(&config, store)?);
            let request = RunRequest {
                limit: config.run_limit,
                sku: None,
                mode: MergeMode::FillBlanksOnly,
                dry_run: false,
            };
            let Some(mut sched) = maybe_build_scheduler(&config, governor, request).await? else {
                return Err(EnrichError::Configuration(
                    "scheduling is disabled; set CCE_SCHEDULER_ENABLED=true".to_string(),
                ));
            };
            sched.start().await.context("starting scheduler")?;
            info!(cron = %config.enrich_cron, "scheduler running; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            sched.shutdown().await.context("stopping scheduler")?;
        }
    }
    Ok(())
}

fn print_json(value: &impl serde::Serialize) -> Result<(), EnrichError> {
    let text = serde_json::to_string_pretty(value).context("serializing summary")?;
    println!("{text}");
    Ok(())
}
