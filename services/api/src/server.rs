use crate::cli::ServeArgs;
use crate::infra::{read_feedback_csv, ApiDecisionService, AppState, InMemoryFeedbackRepository};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use triage_engine::clinical::calibration::InMemoryCalibrationStore;
use triage_engine::clinical::{DecisionService, FsRulePackStore};
use triage_engine::config::AppConfig;
use triage_engine::error::AppError;
use triage_engine::telemetry;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }
    if let Some(root) = args.rule_pack_root.take() {
        config.engine.rule_pack_root = root;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let history = match args.feedback_csv.take() {
        Some(path) => read_feedback_csv(&path)?,
        None => Vec::new(),
    };
    let feedback = Arc::new(InMemoryFeedbackRepository::with_records(history));
    info!(records = feedback.len(), "feedback history loaded");

    let store = Arc::new(FsRulePackStore::from_config(&config.engine));
    let decision_service = Arc::new(DecisionService::new(
        store,
        feedback,
        Arc::new(InMemoryCalibrationStore::new()),
        &config.engine,
    ));

    if let Some(hours) = args.decay_every_hours.filter(|hours| *hours > 0) {
        spawn_decay(decision_service.clone(), Duration::from_secs(hours * 3600));
    }

    let app = with_operational_routes(decision_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        rule_packs = %config.engine.rule_pack_root.display(),
        "clinical decision service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}

/// Periodically ages calibration counts. The first pass runs one period after startup.
fn spawn_decay(service: Arc<ApiDecisionService>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match service.decay() {
                Ok(report) => info!(
                    examined = report.examined,
                    decayed = report.decayed,
                    skipped = report.skipped,
                    "calibration decay pass finished"
                ),
                Err(err) => warn!(error = %err, "calibration decay pass failed"),
            }
        }
    });
}
