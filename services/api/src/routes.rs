use crate::infra::{ApiDecisionService, AppState};
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Extension;
use axum::Json;
use serde_json::json;
use std::sync::Arc;
use triage_engine::clinical::clinical_router;

pub(crate) fn with_operational_routes(service: Arc<ApiDecisionService>) -> axum::Router {
    clinical_router(service)
        .route("/health", axum::routing::get(healthcheck))
        .route("/ready", axum::routing::get(readiness_endpoint))
        .route("/metrics", axum::routing::get(metrics_endpoint))
}

pub(crate) async fn healthcheck() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

pub(crate) async fn readiness_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let ready = state.readiness.load(std::sync::atomic::Ordering::Relaxed);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let payload = if ready {
        json!({ "status": "ready" })
    } else {
        json!({ "status": "initializing" })
    };

    (status, Json(payload))
}

pub(crate) async fn metrics_endpoint(Extension(state): Extension<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::InMemoryFeedbackRepository;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tower::ServiceExt;
    use triage_engine::clinical::calibration::InMemoryCalibrationStore;
    use triage_engine::clinical::{DecisionService, FsRulePackStore};
    use triage_engine::config::EngineConfig;

    fn app(dir: &tempfile::TempDir) -> (Arc<AtomicBool>, axum::Router) {
        let config = EngineConfig {
            rule_pack_root: dir.path().to_path_buf(),
            ..EngineConfig::default()
        };
        let service = Arc::new(DecisionService::new(
            Arc::new(FsRulePackStore::from_config(&config)),
            Arc::new(InMemoryFeedbackRepository::default()),
            Arc::new(InMemoryCalibrationStore::new()),
            &config,
        ));
        let readiness = Arc::new(AtomicBool::new(false));
        let state = AppState {
            readiness: readiness.clone(),
            metrics: Arc::new(PrometheusBuilder::new().build_recorder().handle()),
        };
        let router = with_operational_routes(service).layer(Extension(state));
        (readiness, router)
    }

    async fn read_json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body readable");
        serde_json::from_slice(&bytes).expect("valid JSON body")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request builds")
    }

    #[tokio::test]
    async fn readiness_follows_flag() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (readiness, router) = app(&dir);

        let response = router
            .clone()
            .oneshot(get("/ready"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        readiness.store(true, Ordering::Release);
        let response = router.oneshot(get("/ready")).await.expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(read_json_body(response).await["status"], "ready");
    }

    #[tokio::test]
    async fn clinical_routes_are_mounted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let (_, router) = app(&dir);

        let response = router
            .clone()
            .oneshot(get("/health"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);

        // An empty storage root is a miss, not a failure.
        let response = router
            .oneshot(get("/api/v1/rules/chest_pain"))
            .await
            .expect("route executes");
        assert_eq!(response.status(), StatusCode::OK);
        let payload = read_json_body(response).await;
        assert_eq!(payload["success"], false);
        assert_eq!(payload["coverage"], "none");
    }
}
