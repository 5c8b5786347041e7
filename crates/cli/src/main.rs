use crate::{commands::Commands, error::CliError, shutdown::ShutdownCoordinator};
use catalog::{CatalogStore, postgres::PgCatalog, sled_store::SledCatalog};
use clap::Parser;
use connectors::SqlConnectorFactory;
use engine::{
    EngineConfig, JobService, MaintenanceRunner, WorkerRuntime, generate_worker_id,
};
use model::{
    core::ids::{ChunkId, JobId, WorkerId},
    spec::job::JobSpec,
};
use serde_json::json;
use std::{process, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod output;
mod shutdown;
mod spec;

#[derive(Parser)]
#[command(name = "migrate", version = "0.1.0", about = "Bulk relational-data migration engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            process::exit(1);
        }
    };

    let filter = EnvFilter::try_new(config.log_level.to_ascii_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let exit_code = match run_cli(config).await {
        Ok(()) => 0,
        Err(err) => {
            tracing::error!("{err}");
            err.exit_code()
        }
    };

    process::exit(exit_code);
}

async fn run_cli(config: EngineConfig) -> Result<(), CliError> {
    let cli = Cli::parse();
    let catalog = open_catalog(&config).await?;
    let factory = Arc::new(SqlConnectorFactory);
    let service = JobService::new(catalog.clone(), factory.clone());

    match cli.command {
        Commands::Plan { spec } => {
            let spec = load_job_spec(&spec, &config).await?;
            let (job, summary) = service.create_and_plan(&spec).await?;
            for (table, reason) in &summary.failed_tables {
                eprintln!("table {table} failed planning: {reason}");
            }
            info!(
                tables = summary.planned_tables,
                skipped = summary.skipped_empty_tables,
                chunks = summary.total_chunks,
                "job planned"
            );
            println!("{}", job.id);
            Ok(())
        }
        Commands::Worker { id } => {
            let worker_id = id.map(WorkerId::new).unwrap_or_else(generate_worker_id);
            run_worker(worker_id, catalog, config).await
        }
        Commands::Status { job_id, json } => {
            let job_id = JobId::parse(&job_id).map_err(|_| CliError::InvalidId(job_id))?;
            let report = service.job_status(job_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status_json(&report))?);
            } else {
                output::print_status(&report);
            }
            Ok(())
        }
        Commands::RetryChunk { chunk_id } => {
            let chunk_id = ChunkId::parse(&chunk_id).map_err(|_| CliError::InvalidId(chunk_id))?;
            service.retry_chunk(chunk_id).await?;
            info!(%chunk_id, "chunk reset to pending");
            Ok(())
        }
        Commands::Pause { job_id } => {
            let job_id = JobId::parse(&job_id).map_err(|_| CliError::InvalidId(job_id))?;
            service.pause_job(job_id).await?;
            info!(%job_id, "job paused");
            Ok(())
        }
        Commands::Resume { job_id } => {
            let job_id = JobId::parse(&job_id).map_err(|_| CliError::InvalidId(job_id))?;
            service.resume_job(job_id).await?;
            info!(%job_id, "job resumed");
            Ok(())
        }
    }
}

/// Relational catalog when METADATA_DB_URL is set, embedded store in
/// the user's home directory otherwise.
async fn open_catalog(config: &EngineConfig) -> Result<Arc<dyn CatalogStore>, CliError> {
    match &config.metadata_db_url {
        Some(url) => {
            let store = PgCatalog::connect(url).await?;
            Ok(Arc::new(store))
        }
        None => {
            let home = dirs::home_dir()
                .ok_or_else(|| CliError::Config("could not determine home directory".into()))?;
            let path = home.join(".rowhaul/catalog");
            let store = SledCatalog::open(&path).map_err(|err| {
                CliError::Config(format!(
                    "failed to open catalog at {}: {err}",
                    path.display()
                ))
            })?;
            Ok(Arc::new(store))
        }
    }
}

async fn load_job_spec(path: &str, config: &EngineConfig) -> Result<JobSpec, CliError> {
    let raw = tokio::fs::read_to_string(path).await?;
    let file: spec::JobSpecFile = serde_yaml::from_str(&raw)?;
    let spec = file.resolve(config);
    spec.validate_spec()?;
    Ok(spec)
}

/// Worker loop plus the maintenance loop; the catalog lease decides
/// which node's maintenance actually acts.
async fn run_worker(
    worker_id: WorkerId,
    catalog: Arc<dyn CatalogStore>,
    config: EngineConfig,
) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    ShutdownCoordinator::new(cancel.clone()).register_handlers();

    let factory = Arc::new(SqlConnectorFactory);
    let maintenance = MaintenanceRunner::new(
        worker_id.to_string(),
        catalog.clone(),
        factory.clone(),
        config.clone(),
    );
    let maintenance_cancel = cancel.clone();
    let maintenance_handle = tokio::spawn(async move {
        maintenance.run(maintenance_cancel).await;
    });

    let worker = WorkerRuntime::new(worker_id, catalog, factory, config);
    let result = worker.run(cancel.clone()).await;

    cancel.cancel();
    let _ = maintenance_handle.await;

    result.map_err(CliError::from)
}

/// Status JSON keeps connection endpoints but never credentials.
fn status_json(report: &engine::JobStatusReport) -> serde_json::Value {
    let job = &report.job;
    json!({
        "job": {
            "id": job.id,
            "status": job.status,
            "source": job.source.endpoint(),
            "target": job.target.endpoint(),
            "total_tables": job.total_tables,
            "total_chunks": job.total_chunks,
            "completed_chunks": job.completed_chunks,
            "failed_chunks": job.failed_chunks,
            "running_chunks": job.running_chunks,
            "failure_rate_percent": job.failure_rate_percent(),
            "avg_throughput_rows_per_sec": job.avg_throughput_rows_per_sec,
            "peak_memory_mb": job.peak_memory_mb,
            "total_bytes": job.total_bytes,
            "created_at": job.created_at,
            "started_at": job.started_at,
            "completed_at": job.completed_at,
            "auto_failed_at": job.auto_failed_at,
            "last_error": job.last_error,
        },
        "tables": report.tables.iter().map(|t| json!({
            "name": t.table_name,
            "target_table": t.target_table,
            "status": t.status,
            "total_chunks": t.total_chunks,
            "completed_chunks": t.completed_chunks,
            "failed_chunks": t.failed_chunks,
            "last_error": t.last_error,
        })).collect::<Vec<_>>(),
    })
}
