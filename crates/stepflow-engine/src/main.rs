//! Stepflow engine server
//!
//! Consumes submissions, step and worker-response subjects from NATS
//! JetStream, keeps execution state in PostgreSQL and serves the execution
//! query/cancel API.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stepflow_engine::{
    bus::MessageHandler,
    config::{AppConfig, DatabaseConfig, ElectionMode, ServiceRegistry},
    db::{create_pool, ensure_schema, DbPool},
    engine::{EngineContext, ResponseHandler, StepDispatcher, SubmissionHandler},
    handlers,
    nats::{NatsBus, NatsConsumer},
    repository::{ExecutionRepository, PgExecutionRepository},
    scheduler::{replica_identity, JobScheduler, LeaderElector, PgLeaseElector, StandaloneElector},
    services::ExecutionService,
    state::AppState,
    telemetry::Telemetry,
};

/// Initialize tracing/logging. `STEPFLOW_LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,stepflow_engine=debug,tower_http=debug".into());
    let json = std::env::var("STEPFLOW_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_router(state: AppState, execution_service: ExecutionService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let health_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/health", get(handlers::api_health))
        .with_state(state);

    let executions_routes = Router::new()
        .route(
            "/api/executions/cancel",
            post(handlers::executions::cancel_by_tags),
        )
        .route("/api/executions/{uuid}", get(handlers::executions::get))
        .route(
            "/api/executions/{uuid}/cancel",
            post(handlers::executions::cancel),
        )
        .with_state(execution_service);

    Router::new()
        .merge(health_routes)
        .merge(executions_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
}

/// Every subject the engine stream must capture.
fn stream_subjects(config: &AppConfig, services: &ServiceRegistry) -> Vec<String> {
    let mut subjects = vec![
        config.submissions_subject.clone(),
        config.steps_subject.clone(),
    ];
    for endpoint in services.iter() {
        subjects.push(endpoint.input_subject.clone());
        subjects.push(endpoint.output_subject.clone());
    }
    subjects
}

struct Election {
    elector: Arc<dyn LeaderElector>,
    lease: Option<(Arc<PgLeaseElector>, JoinHandle<()>)>,
}

async fn start_election(config: &AppConfig, pool: &DbPool) -> Election {
    match config.election_mode {
        ElectionMode::Standalone => {
            tracing::info!("Standalone election, this replica always leads");
            Election {
                elector: Arc::new(StandaloneElector),
                lease: None,
            }
        }
        ElectionMode::Postgres => {
            let elector = Arc::new(PgLeaseElector::new(
                pool.clone(),
                config.election_name.clone(),
                replica_identity(),
                Duration::from_secs(config.lease_ttl_secs),
                Duration::from_secs(config.lease_renew_secs),
            ));
            tracing::info!(holder = %elector.holder(), election = %config.election_name, "Campaigning for scheduler lease");
            elector.campaign_once().await;
            let handle = elector.start_campaign();
            Election {
                elector: elector.clone(),
                lease: Some((elector, handle)),
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    init_tracing();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Stepflow engine"
    );

    let app_config = AppConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load app config, using defaults");
        AppConfig::default()
    });

    let db_config = DatabaseConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load database config, using defaults");
        DatabaseConfig::default()
    });

    let services = ServiceRegistry::load(&app_config.services_file)?;

    tracing::info!(
        host = %app_config.host,
        port = app_config.port,
        services = services.len(),
        write_mode = ?app_config.state_write_mode,
        election = ?app_config.election_mode,
        "Configuration loaded"
    );

    let db_pool = create_pool(&db_config).await?;
    ensure_schema(&db_pool, &db_config.schema).await?;

    let nats_client = async_nats::connect(&app_config.nats_url).await?;
    tracing::info!(url = %app_config.nats_url, "Connected to NATS");

    let bus = NatsBus::new(nats_client.clone());
    bus.ensure_stream(
        &app_config.stream_name,
        stream_subjects(&app_config, &services),
    )
    .await?;

    let election = start_election(&app_config, &db_pool).await;
    let scheduler = Arc::new(JobScheduler::new(Arc::clone(&election.elector)));

    let repository: Arc<dyn ExecutionRepository> =
        Arc::new(PgExecutionRepository::new(db_pool.clone()));
    let ctx = Arc::new(EngineContext {
        repository: Arc::clone(&repository),
        bus: Arc::new(bus.clone()),
        services: Arc::new(services),
        telemetry: Telemetry::new(app_config.server_name.clone()),
        steps_subject: app_config.steps_subject.clone(),
        write_mode: app_config.state_write_mode,
    });

    let consumer = NatsConsumer::new(
        bus.context().clone(),
        app_config.stream_name.clone(),
        app_config.max_concurrent_handlers,
    );

    let submissions: Arc<dyn MessageHandler> = Arc::new(SubmissionHandler::new(
        Arc::clone(&ctx),
        Arc::clone(&scheduler),
    ));
    let dispatcher: Arc<dyn MessageHandler> = Arc::new(StepDispatcher::new(Arc::clone(&ctx)));
    let responses: Arc<dyn MessageHandler> = Arc::new(ResponseHandler::new(Arc::clone(&ctx)));

    let mut consumers = vec![
        consumer
            .spawn(
                &app_config.submissions_subject,
                &app_config.consumer_name("submissions"),
                submissions,
            )
            .await?,
        consumer
            .spawn(
                &app_config.steps_subject,
                &app_config.consumer_name("steps"),
                dispatcher,
            )
            .await?,
    ];
    for endpoint in ctx.services.iter() {
        let handle = consumer
            .spawn(
                &endpoint.output_subject,
                &app_config.consumer_name(&format!("responses-{}", endpoint.name)),
                Arc::clone(&responses),
            )
            .await?;
        consumers.push(handle);
    }

    let execution_service = ExecutionService::new(
        repository,
        Arc::clone(&scheduler),
        app_config.state_write_mode,
    );
    let state = AppState::new(db_pool, app_config.clone(), nats_client);
    let app = build_router(state, execution_service);

    let addr: SocketAddr = app_config.bind_address().parse()?;
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(address = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in consumers {
        handle.abort();
    }
    scheduler.shutdown();
    if let Some((elector, campaign)) = election.lease {
        campaign.abort();
        elector.resign().await;
    }

    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
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
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
