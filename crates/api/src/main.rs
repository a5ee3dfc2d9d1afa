use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use alaska_api::config::ApiConfig;
use alaska_api::router::build_app_router;
use alaska_api::state::AppState;
use alaska_api::tasks::{recovery, ReferenceBuilder, TaskSupervisor};
use alaska_core::config::ConfigError;
use alaska_db::{PgRegistry, WorkRegistry};
use alaska_events::bus::event_types;
use alaska_events::delivery::email::EmailError;
use alaska_events::delivery::webhook::WebhookError;
use alaska_events::{
    EmailConfig, EmailDelivery, EventBus, EventServices, Notifier, PlatformEvent,
};
use alaska_sandbox::{DockerEngine, Sandbox, SandboxError, SandboxSettings};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How long shutdown waits for each running task to stop its sandbox.
const TASK_GRACE: Duration = Duration::from_secs(15);

#[derive(Debug, thiserror::Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Database unavailable: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migrations failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error(transparent)]
    Registry(#[from] alaska_db::RegistryError),

    #[error("Sandbox engine unavailable: {0}")]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Email(#[from] EmailError),

    #[error("Invalid listen address {0}")]
    Address(String),

    #[error("Server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "API server aborted");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "alaska_api=debug,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

async fn run() -> Result<(), StartupError> {
    // --- Configuration ---
    let config = ApiConfig::from_env()?;
    let settings = SandboxSettings::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|_| StartupError::Address(format!("{}:{}", config.host, config.port)))?;

    // --- Database ---
    let pool = alaska_db::create_pool(&config.database_url).await?;
    alaska_db::health_check(&pool).await?;
    tracing::info!("Database health check passed");
    alaska_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    let registry: Arc<dyn WorkRegistry> = Arc::new(PgRegistry::new(pool.clone()));
    let sandbox: Arc<dyn Sandbox> = Arc::new(DockerEngine::connect()?);

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

    // --- Startup recovery ---
    let rolled_back = recovery::rollback_orphaned(registry.as_ref()).await?;
    tracing::info!(rolled_back = rolled_back.len(), "Task checkpoint recovery complete");
    for project_id in rolled_back {
        notifier.publish(
            PlatformEvent::project(event_types::PROGRESS_ROLLED_BACK, project_id),
        );
    }

    // --- Server ---
    let references = Arc::new(ReferenceBuilder::new(
        Arc::clone(&registry),
        Arc::clone(&sandbox),
        settings.clone(),
        &config.tasks,
        notifier.clone(),
    ));
    let supervisor = Arc::new(TaskSupervisor::new(Arc::clone(&registry), notifier));
    let state = AppState {
        registry,
        sandbox,
        supervisor: Arc::clone(&supervisor),
        references: Arc::clone(&references),
        config: Arc::new(config.clone()),
        settings: Arc::new(settings),
    };
    let app = build_app_router(state, &config);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Starting server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Shutdown ---
    let interrupted = supervisor.shutdown(TASK_GRACE).await;
    tracing::info!(interrupted, "Supervised tasks stopped");
    if references.shutdown(TASK_GRACE).await {
        tracing::info!("Reference build interrupted");
    }
    drop(supervisor);
    drop(references);
    services.shutdown(bus).await;
    tracing::info!("API server shut down");
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
