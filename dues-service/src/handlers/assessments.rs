use crate::dtos::{AssessRequest, ListAssessmentsQuery};
use crate::middleware::Actor;
use crate::models::Assessment;
use crate::services::AssessmentReport;
use crate::startup::AppState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use validator::Validate;

/// Bulk-assess a plan for a period. Members already assessed for the period
/// come back in `skipped`, so reruns are safe.
#[tracing::instrument(skip(state, actor, request), fields(user_id))]
pub async fn create_assessment(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<AssessRequest>,
) -> Result<(StatusCode, Json<AssessmentReport>), AppError> {
    request.validate()?;
    let command = request.into_command(actor.into_inner())?;

    let report = state.ledger.assess(command).await?;
    Ok((StatusCode::CREATED, Json(report)))
}

pub async fn list_assessments(
    State(state): State<AppState>,
    Query(query): Query<ListAssessmentsQuery>,
) -> Result<Json<Vec<Assessment>>, AppError> {
    Ok(Json(state.store.list_assessments(query.plan_id).await?))
}
