use crate::dtos::{CreatePlanRequest, ListPlansQuery, UpdatePlanRequest};
use crate::ledger::LedgerError;
use crate::models::{CreatePlan, DuesPlan, UpdatePlan};
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, request), fields(code = %request.code))]
pub async fn create_plan(
    State(state): State<AppState>,
    Json(request): Json<CreatePlanRequest>,
) -> Result<(StatusCode, Json<DuesPlan>), AppError> {
    request.validate()?;

    let plan = state
        .ledger
        .create_plan(CreatePlan {
            code: request.code,
            name: request.name.trim().to_string(),
            description: request.description,
            amount: request.amount.ok_or(LedgerError::MissingField("amount"))?,
            currency: request
                .currency
                .unwrap_or_else(|| state.ledger.base_currency().to_string()),
            billing_cycle: request.billing_cycle,
            category_id: request.category_id,
        })
        .await?;

    tracing::info!(plan_id = %plan.plan_id, amount = %plan.amount, "Dues plan created");
    Ok((StatusCode::CREATED, Json(plan)))
}

pub async fn list_plans(
    State(state): State<AppState>,
    Query(query): Query<ListPlansQuery>,
) -> Result<Json<Vec<DuesPlan>>, AppError> {
    Ok(Json(state.store.list_plans(&query.into()).await?))
}

pub async fn get_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
) -> Result<Json<DuesPlan>, AppError> {
    let plan = state
        .store
        .get_plan(plan_id)
        .await?
        .ok_or(LedgerError::PlanNotFound(plan_id))?;
    Ok(Json(plan))
}

#[tracing::instrument(skip(state, request))]
pub async fn update_plan(
    State(state): State<AppState>,
    Path(plan_id): Path<Uuid>,
    Json(request): Json<UpdatePlanRequest>,
) -> Result<Json<DuesPlan>, AppError> {
    request.validate()?;

    let plan = state
        .ledger
        .update_plan(
            plan_id,
            UpdatePlan {
                name: request.name.map(|n| n.trim().to_string()),
                description: request.description,
                amount: request.amount,
                is_active: request.is_active,
            },
        )
        .await?;
    Ok(Json(plan))
}
