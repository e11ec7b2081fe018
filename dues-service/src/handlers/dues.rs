use crate::dtos::{ListDuesQuery, SyncResponse, WaiveDueRequest};
use crate::models::{AssignedDue, ListDuesFilter};
use crate::services::DueDetail;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub async fn list_assigned_dues(
    State(state): State<AppState>,
    Query(query): Query<ListDuesQuery>,
) -> Result<Json<Vec<AssignedDue>>, AppError> {
    let filter = ListDuesFilter::try_from(query)?;
    Ok(Json(state.store.list_assigned_dues(&filter).await?))
}

pub async fn get_assigned_due(
    State(state): State<AppState>,
    Path(assigned_due_id): Path<Uuid>,
) -> Result<Json<DueDetail>, AppError> {
    Ok(Json(state.ledger.due_detail(assigned_due_id).await?))
}

#[tracing::instrument(skip(state))]
pub async fn sync_assigned_due(
    State(state): State<AppState>,
    Path(assigned_due_id): Path<Uuid>,
) -> Result<Json<SyncResponse>, AppError> {
    let outcome = state.ledger.sync_due_status(assigned_due_id).await?;
    Ok(Json(SyncResponse { outcome }))
}

#[tracing::instrument(skip(state, request))]
pub async fn waive_assigned_due(
    State(state): State<AppState>,
    Path(assigned_due_id): Path<Uuid>,
    Json(request): Json<WaiveDueRequest>,
) -> Result<Json<AssignedDue>, AppError> {
    request.validate()?;
    Ok(Json(
        state.ledger.waive_due(assigned_due_id, &request.reason).await?,
    ))
}
