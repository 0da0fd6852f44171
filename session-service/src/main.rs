use service_core::error::AppError;
use service_core::observability::logging::init_tracing;
use session_service::{
    build_router,
    config::SessionConfig,
    db,
    services::{
        sweep::run_sweeper, IdentityStore, MailQueue, MailWorker, Mailer, Notifier,
        PayloadCiphers, PgIdentityStore, RetryPolicy, SessionService, SmtpMailer, TokenCodec,
    },
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = SessionConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )
    .map_err(AppError::ConfigError)?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting session service"
    );

    let main_pool = db::create_pool("main", &config.main_database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    let ephemeral_pool = db::create_pool("ephemeral", &config.ephemeral_database)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;

    db::run_main_migrations(&main_pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;
    db::run_ephemeral_migrations(&ephemeral_pool)
        .await
        .map_err(|e| AppError::DatabaseError(e.into()))?;

    let store: Arc<dyn IdentityStore> = Arc::new(PgIdentityStore::new(main_pool, ephemeral_pool));

    // Mail delivery runs on its own task; handlers only enqueue.
    let mailer: Arc<dyn Mailer> =
        Arc::new(SmtpMailer::new(&config.smtp).map_err(AppError::ConfigError)?);
    let (queue, rx) = MailQueue::new(config.mail.queue_capacity);
    let worker = MailWorker::new(
        rx,
        mailer,
        RetryPolicy::new(Duration::from_secs(config.mail.max_retry_seconds)),
    );
    tokio::spawn(worker.run());
    tracing::info!("Mail worker initialized");

    tokio::spawn(run_sweeper(
        store.clone(),
        Duration::from_secs(config.sweep_interval_seconds.max(1)),
    ));

    let tokens = TokenCodec::new(config.token_settings());
    let ciphers: PayloadCiphers = config.payload_ciphers();
    let notifier: Arc<dyn Notifier> = Arc::new(queue);

    let sessions = SessionService::new(
        store.clone(),
        tokens,
        ciphers,
        notifier,
        config.session_settings(),
    );

    let state = AppState {
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
        environment: config.environment.clone(),
        sessions,
        store,
    };
    let app = build_router(state, &config.allowed_origins);

    let addr = config.common.socket_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
