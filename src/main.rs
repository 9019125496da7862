use anyhow::{Context, Result};
use axum::Router;
use home_storage::{
    config::{AppConfig, Command, StoreSettings},
    db, routes,
    services::{
        file_service::FileService,
        object_store::{MemoryStore, ObjectStore, S3Store},
        reconciler::Reconciler,
        scheduler::{self, Job, Schedule},
        side_effects::{CachePurger, CloudflarePurger, NoopPurger, SideEffects},
        user_repository::UserRepository,
    },
    state::AppState,
};
use std::{ffi::OsString, io::ErrorKind, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

const RECONCILE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + subcommand ---
    let (cfg, command) = AppConfig::from_env_and_args()?;

    tracing::info!("Starting home-storage ({:?}) with config: {:?}", command, cfg);

    if command == Command::Cron {
        return scheduler::run(cron_jobs(&cfg)?).await;
    }

    // --- Initialize SQLite connection ---
    let db = db::connect(&cfg.database_url).await?;

    // --- Handle migration mode ---
    if command == Command::Migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    let store = build_store(&cfg.store)?;
    let users = UserRepository::new(db.clone());

    if command == Command::Reconcile {
        let report = Reconciler::new(store, users, cfg.reconciler)
            .run_all()
            .await?;
        if report.failed > 0 {
            tracing::warn!("{} of {} users failed", report.failed, report.failed + report.processed);
        }
        return Ok(());
    }

    // --- Initialize core services ---
    let purger: Arc<dyn CachePurger> = match &cfg.purge {
        Some(purge) => Arc::new(CloudflarePurger::new(
            purge.zone_id.clone(),
            purge.api_token.clone(),
            purge.public_domain.clone(),
        )?),
        None => {
            tracing::warn!("CDN purge not configured; cache invalidation disabled");
            Arc::new(NoopPurger)
        }
    };
    let side_effects = SideEffects::new(purger, Arc::new(users.clone()));
    let files = FileService::new(store, side_effects);

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(AppState::new(files, users));

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_store(settings: &StoreSettings) -> Result<Arc<dyn ObjectStore>> {
    let store: Arc<dyn ObjectStore> = match settings {
        StoreSettings::Memory => {
            tracing::warn!("Using the in-memory object store; nothing will be persisted");
            Arc::new(MemoryStore::new())
        }
        StoreSettings::S3(s3) => {
            Arc::new(S3Store::new(s3.clone()).context("creating the S3 client")?)
        }
    };
    Ok(store)
}

/// The nightly reconciliation re-runs this binary with the `reconcile`
/// subcommand, forwarding the settings that only exist as flags.
fn cron_jobs(cfg: &AppConfig) -> Result<Vec<Job>> {
    let program: OsString = std::env::current_exe()
        .context("locating the current executable")?
        .into();
    let mut args: Vec<OsString> = vec![
        "reconcile".into(),
        "--database-url".into(),
        cfg.database_url.clone().into(),
        "--batch-size".into(),
        cfg.reconciler.batch_size.to_string().into(),
        "--concurrent-batches".into(),
        cfg.reconciler.concurrent_batches.to_string().into(),
    ];
    if matches!(cfg.store, StoreSettings::Memory) {
        args.push("--store".into());
        args.push("memory".into());
    }

    Ok(vec![Job {
        name: "reconcile-home-directory-sizes".into(),
        schedule: Schedule::DailyAt { hour: 22, minute: 0 },
        program,
        args,
        timeout: RECONCILE_TIMEOUT,
    }])
}
