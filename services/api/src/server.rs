use crate::cli::ServeArgs;
use crate::infra::{demo_catalog, AppState, LoggingEventPublisher};
use crate::routes::with_submission_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use eco_tasks::config::AppConfig;
use eco_tasks::error::AppError;
use eco_tasks::telemetry;
use eco_tasks::workflows::submissions::{
    HeuristicScorer, InMemorySubmissionStore, SubmissionService,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let catalog = Arc::new(demo_catalog());
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemorySubmissionStore::default());
    let submission_service = Arc::new(
        SubmissionService::new(store, catalog, config.verification.clone())
            .with_events(Arc::new(LoggingEventPublisher))
            .with_scorer(Arc::new(HeuristicScorer::default())),
    );

    let app = with_submission_routes(submission_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        scorer_timeout_ms = config.verification.scorer_timeout.as_millis() as u64,
        "task settlement engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
