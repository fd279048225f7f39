use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use super::assessment::{AgeGroup, Avpu, PatientAssessment, Vitals};
use super::calibration::{ActualOutcome, CalibrationKey, CalibrationStore};
use super::feedback::{FeedbackQuery, FeedbackRepository};
use super::rulepack::RulePackStore;
use super::scores::{calc_map, mews_breakdown};
use super::service::{DecisionRequest, DecisionService, FeedbackSubmission};
use crate::error::AppError;

type SharedService<S, F, C> = Arc<DecisionService<S, F, C>>;

/// Router exposing rule resolution, scoring, decisions, calibration, and feedback.
pub fn clinical_router<S, F, C>(service: SharedService<S, F, C>) -> Router
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    Router::new()
        .route("/api/v1/rules/:topic", get(resolve_handler::<S, F, C>))
        .route("/api/v1/rules/:topic/apply", post(apply_handler::<S, F, C>))
        .route("/api/v1/triage/score", post(triage_handler::<S, F, C>))
        .route("/api/v1/scores/map", post(map_handler))
        .route("/api/v1/scores/mews", post(mews_handler))
        .route("/api/v1/decisions", post(decision_handler::<S, F, C>))
        .route(
            "/api/v1/calibration",
            post(calibration_update_handler::<S, F, C>)
                .get(calibration_get_handler::<S, F, C>)
                .delete(calibration_reset_handler::<S, F, C>),
        )
        .route(
            "/api/v1/calibration/decay",
            post(calibration_decay_handler::<S, F, C>),
        )
        .route("/api/v1/feedback", post(feedback_handler::<S, F, C>))
        .route("/api/v1/feedback/stats", get(feedback_stats_handler::<S, F, C>))
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ResolveParams {
    #[serde(default)]
    force_refresh: bool,
}

pub(crate) async fn resolve_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Path(topic): Path<String>,
    Query(params): Query<ResolveParams>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    let result = service.resolve(&topic, params.force_refresh).await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

pub(crate) async fn apply_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Path(topic): Path<String>,
    Json(assessment): Json<PatientAssessment>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    validate_vitals(&assessment.vitals)?;
    let result = service.apply_rules(&topic, &assessment).await?;
    Ok((StatusCode::OK, Json(result)).into_response())
}

pub(crate) async fn triage_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Json(assessment): Json<PatientAssessment>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    validate_vitals(&assessment.vitals)?;
    let result = service.score_triage(&assessment);
    Ok((StatusCode::OK, Json(result)).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct MapRequest {
    sbp: u16,
    dbp: u16,
}

pub(crate) async fn map_handler(Json(request): Json<MapRequest>) -> Result<Response, AppError> {
    validate_vitals(&Vitals {
        sbp: Some(request.sbp),
        dbp: Some(request.dbp),
        ..Vitals::default()
    })?;
    let map = calc_map(request.sbp, request.dbp);
    Ok((StatusCode::OK, Json(json!({ "map": map }))).into_response())
}

#[derive(Debug, Deserialize)]
pub(crate) struct MewsRequest {
    vitals: Vitals,
    #[serde(default)]
    avpu: Option<Avpu>,
}

pub(crate) async fn mews_handler(Json(request): Json<MewsRequest>) -> Result<Response, AppError> {
    validate_vitals(&request.vitals)?;
    let breakdown = mews_breakdown(&request.vitals, request.avpu);
    let payload = json!({
        "mews": breakdown.total(),
        "breakdown": breakdown,
    });
    Ok((StatusCode::OK, Json(payload)).into_response())
}

pub(crate) async fn decision_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Json(request): Json<DecisionRequest>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    validate_vitals(&request.assessment.vitals)?;
    let outcome = service.decide(request).await?;
    Ok((StatusCode::OK, Json(outcome)).into_response())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CalibrationUpdateRequest {
    #[serde(flatten)]
    key: CalibrationKey,
    outcome: ActualOutcome,
    predicted_confidence: f64,
}

pub(crate) async fn calibration_update_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Json(request): Json<CalibrationUpdateRequest>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    let modifier =
        service
            .calibration()
            .update(&request.key, request.outcome, request.predicted_confidence)?;
    Ok((StatusCode::OK, Json(modifier)).into_response())
}

pub(crate) async fn calibration_get_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Query(key): Query<CalibrationKey>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    match service.calibration().get(&key)? {
        Some(modifier) => Ok((StatusCode::OK, Json(modifier)).into_response()),
        None => {
            let payload = json!({
                "key": key.normalized().to_string(),
                "error": "no calibration recorded for key",
            });
            Ok((StatusCode::NOT_FOUND, Json(payload)).into_response())
        }
    }
}

pub(crate) async fn calibration_reset_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Query(key): Query<CalibrationKey>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    let modifier = service.calibration().reset(&key)?;
    let payload = json!({
        "status": "ok",
        "modifier": modifier,
    });
    Ok((StatusCode::OK, Json(payload)).into_response())
}

pub(crate) async fn calibration_decay_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    let report = service.decay()?;
    Ok((StatusCode::OK, Json(report)).into_response())
}

pub(crate) async fn feedback_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Json(submission): Json<FeedbackSubmission>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    let receipt = service.submit_feedback(submission)?;
    let payload = json!({
        "status": "recorded",
        "confirmedDiagnosis": receipt.record.confirmed_diagnosis,
        "modifier": receipt.modifier,
    });
    Ok((StatusCode::CREATED, Json(payload)).into_response())
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatsParams {
    #[serde(default)]
    chief_complaint: Option<String>,
    #[serde(default)]
    age_group: Option<AgeGroup>,
    #[serde(default)]
    since: Option<DateTime<Utc>>,
}

pub(crate) async fn feedback_stats_handler<S, F, C>(
    State(service): State<SharedService<S, F, C>>,
    Query(params): Query<StatsParams>,
) -> Result<Response, AppError>
where
    S: RulePackStore + 'static,
    F: FeedbackRepository + 'static,
    C: CalibrationStore + 'static,
{
    let summary = service.feedback_summary(&FeedbackQuery {
        chief_complaint: params.chief_complaint,
        age_group: params.age_group,
        since: params.since,
        limit: None,
    })?;
    Ok((StatusCode::OK, Json(summary)).into_response())
}

/// Rejects physiologically impossible values before they reach scoring.
pub fn validate_vitals(vitals: &Vitals) -> Result<(), AppError> {
    fn check<T: PartialOrd + Copy + std::fmt::Display>(
        name: &str,
        value: Option<T>,
        low: T,
        high: T,
    ) -> Result<(), AppError> {
        match value {
            Some(value) if value < low || value > high => Err(AppError::Input(format!(
                "{name} {value} outside {low}..={high}"
            ))),
            _ => Ok(()),
        }
    }

    check("hr", vitals.hr, 1, 300)?;
    check("rr", vitals.rr, 1, 80)?;
    check("sbp", vitals.sbp, 30, 300)?;
    check("dbp", vitals.dbp, 10, 200)?;
    check("spo2", vitals.spo2, 30, 100)?;
    check("temp", vitals.temp, 25.0, 45.0)?;
    check("gcs", vitals.gcs, 3, 15)?;

    if let (Some(sbp), Some(dbp)) = (vitals.sbp, vitals.dbp) {
        if dbp > sbp {
            return Err(AppError::Input(format!(
                "dbp {dbp} exceeds sbp {sbp}"
            )));
        }
    }
    Ok(())
}
