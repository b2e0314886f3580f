use crate::cli::ServeArgs;
use crate::infra::{build_stack, seed_reference_data, spawn_queue_worker, AppState};
use crate::routes::with_eligibility_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use benefit_review::clock::{Clock, SystemClock};
use benefit_review::config::AppConfig;
use benefit_review::error::AppError;
use benefit_review::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const QUEUE_POLL_INTERVAL: Duration = Duration::from_secs(2);

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
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stack = build_stack(&config.policy, config.environment, clock.clone());
    let sample = seed_reference_data(&stack.store, clock.now())?;
    spawn_queue_worker(&stack, QUEUE_POLL_INTERVAL);

    let app = with_eligibility_routes(stack.api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(?config.environment, %addr, sample_application = %sample, "eligibility review service ready");

    axum::serve(listener, app).await?;
    Ok(())
}
