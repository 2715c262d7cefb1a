use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use futures::StreamExt;
use storyreel_core::job::{JobStatus, JobStatusView};
use storyreel_db::{DurableStore, MemoryDurableStore, PgDurableStore};
use storyreel_events::{MemoryFastStore, ProgressLedger};
use storyreel_pipeline::Orchestrator;
use storyreel_worker::config::{LogFormat, WorkerConfig};
use storyreel_worker::{load_job, load_profiles, simulated};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env()?;
    init_tracing(config.log_format);

    let job_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| config.job_file.clone())
        .context("usage: storyreel-worker <job.json> (or set JOB_FILE)")?;
    let job = load_job(&job_path)?;
    let profiles = load_profiles(config.profiles_path.as_deref())?;

    let durable: Arc<dyn DurableStore> = match &config.database_url {
        Some(url) => {
            let pool = storyreel_db::create_pool(url)
                .await
                .context("Failed to connect to database")?;
            storyreel_db::health_check(&pool).await?;
            storyreel_db::run_migrations(&pool)
                .await
                .context("Failed to run migrations")?;
            tracing::info!("Using Postgres durable store");
            Arc::new(PgDurableStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, job records will not outlive this process");
            Arc::new(MemoryDurableStore::new())
        }
    };

    let ledger = ProgressLedger::new(Arc::new(MemoryFastStore::new()), durable, config.pipeline.fast_store_ttl);
    let orchestrator = Orchestrator::new(
        config.pipeline.clone(),
        profiles,
        ledger,
        simulated::services(config.simulated_latency),
    );

    tracing::info!(
        concurrency = config.pipeline.concurrency,
        job_file = %job_path.display(),
        "Worker starting",
    );

    let handle = orchestrator.submit(job).await?;
    let mut updates = orchestrator.subscribe(handle.job_id).await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!(job_id = %handle.job_id, "Interrupted, cancelling job");
                handle.cancel();
            }
            next = updates.next() => match next {
                Some(state) => println!("{}", serde_json::to_string(&JobStatusView::from(&state))?),
                None => break,
            },
        }
    }

    let state = handle.join().await?;
    orchestrator.shutdown().await;

    tracing::info!(
        job_id = %state.job_id,
        status = %state.status,
        cost = state.cost,
        "Worker finished",
    );
    if state.status == JobStatus::Failed {
        anyhow::bail!(
            "job {} failed: {}",
            state.job_id,
            state.error.map(|e| e.message).unwrap_or_default()
        );
    }
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "storyreel_worker=debug,storyreel_pipeline=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}
