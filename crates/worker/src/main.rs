use std::process::ExitCode;
use std::sync::Arc;

use alaska_core::config::ConfigError;
use alaska_db::{PgRegistry, WorkRegistry};
use alaska_events::delivery::email::EmailError;
use alaska_events::delivery::webhook::WebhookError;
use alaska_events::bus::event_types;
use alaska_events::{
    EmailConfig, EmailDelivery, EventBus, EventServices, Notifier, PlatformEvent,
};
use alaska_sandbox::{DockerEngine, Sandbox, SandboxError, SandboxSettings};
use alaska_worker::dispatcher::DispatcherConfig;
use alaska_worker::preflight::{self, PreflightError};
use alaska_worker::{reconcile, Dispatcher, RegistryJobHooks, WorkerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Sandbox engine unavailable: {0}")]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Registry(#[from] alaska_db::RegistryError),

    #[error(transparent)]
    Preflight(#[from] PreflightError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Email(#[from] EmailError),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Worker aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alaska_worker=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run() -> Result<(), StartupError> {
    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    let settings = SandboxSettings::from_env()?;
    tracing::info!(worker_id = %config.worker_id, "Loaded worker configuration");

    // --- Database ---
    let pool = alaska_db::create_pool(&config.database_url).await?;
    alaska_db::health_check(&pool).await?;
    tracing::info!("Database health check passed");
    alaska_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let registry: Arc<dyn WorkRegistry> = Arc::new(PgRegistry::new(pool.clone()));
    let sandbox: Arc<dyn Sandbox> = Arc::new(DockerEngine::connect()?);

    // --- Preflight ---
    preflight::check_images(
        registry.as_ref(),
        sandbox.as_ref(),
        config.index_image.as_deref(),
    )
    .await?;
    tracing::info!("All sandbox images present");

    // --- Event services ---
    let bus = Arc::new(EventBus::default());
    let services = EventServices::start(
        pool.clone(),
        &bus,
        std::env::var("NOTIFY_WEBHOOK_URL").ok(),
    )?;
    let email = EmailConfig::from_env()?
        .map(EmailDelivery::new)
        .transpose()?;
    let notifier = Notifier::new(Arc::clone(&bus), email, settings.environment.clone());

    // --- Startup reconciliation ---
    let report =
        reconcile::startup(registry.as_ref(), sandbox.as_ref(), &config.worker_id).await?;
    tracing::info!(
        requeued = report.requeued_jobs.len(),
        rolled_back = report.rolled_back_projects.len(),
        "Startup reconciliation complete"
    );
    for project_id in &report.rolled_back_projects {
        notifier.publish(
            PlatformEvent::project(event_types::PROGRESS_ROLLED_BACK, *project_id),
        );
    }

    // --- Dispatcher ---
    let hooks = Arc::new(RegistryJobHooks::new(Arc::clone(&registry), notifier.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        Arc::clone(&registry),
        Arc::clone(&sandbox),
        hooks,
        settings,
        DispatcherConfig {
            worker_id: config.worker_id.clone(),
            poll_interval: config.poll_interval,
            tail_lines: config.tail_lines,
        },
    ));
    let slot = dispatcher.slot();

    let cancel = CancellationToken::new();
    let loop_handle = {
        let dispatcher = Arc::clone(&dispatcher);
        let cancel = cancel.clone();
        tokio::spawn(async move { dispatcher.run(cancel).await })
    };

    shutdown_signal().await;
    cancel.cancel();
    if let Err(e) = loop_handle.await {
        tracing::error!(error = %e, "Dispatcher task ended abnormally");
    }

    // --- Shutdown reconciliation ---
    if let Err(e) = dispatcher.settle_pending().await {
        tracing::error!(error = %e, "Deferred settlement still failing, returning job to queue");
    }
    if let Some(run) = reconcile::shutdown(&slot, registry.as_ref(), sandbox.as_ref()).await? {
        tracing::info!(job_id = run.job_id, "Interrupted job returned to queue");
        notifier.publish(
            PlatformEvent::job(event_types::JOB_INTERRUPTED, run.job_id)
                .with_payload(serde_json::json!({ "project_id": run.project_id })),
        );
    }

    drop(dispatcher);
    drop(notifier);
    services.shutdown(bus).await;
    tracing::info!("Worker shut down");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}
