use crate::dtos::{CreateMemberRequest, UpdateMemberStatusRequest};
use crate::ledger::LedgerError;
use crate::models::{CreateMember, Member};
use crate::services::MemberBalance;
use crate::startup::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

#[tracing::instrument(skip(state, request), fields(member_number = %request.member_number))]
pub async fn create_member(
    State(state): State<AppState>,
    Json(request): Json<CreateMemberRequest>,
) -> Result<(StatusCode, Json<Member>), AppError> {
    request.validate()?;

    if let Some(category_id) = request.category_id {
        let known = state
            .store
            .list_categories()
            .await?
            .iter()
            .any(|c| c.category_id == category_id);
        if !known {
            return Err(AppError::NotFound(anyhow::anyhow!(
                "Category not found: {}",
                category_id
            )));
        }
    }

    let member = state
        .store
        .create_member(&CreateMember {
            member_number: request.member_number.trim().to_string(),
            full_name: request.full_name.trim().to_string(),
            email: request.email,
            category_id: request.category_id,
            status: request.status,
        })
        .await?;

    tracing::info!(member_id = %member.member_id, "Member registered");
    Ok((StatusCode::CREATED, Json(member)))
}

pub async fn list_members(State(state): State<AppState>) -> Result<Json<Vec<Member>>, AppError> {
    Ok(Json(state.store.list_members().await?))
}

pub async fn get_member(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<Json<Member>, AppError> {
    let member = state
        .store
        .get_member(member_id)
        .await?
        .ok_or(LedgerError::MemberNotFound(member_id))?;
    Ok(Json(member))
}

#[tracing::instrument(skip(state, request))]
pub async fn update_member_status(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
    Json(request): Json<UpdateMemberStatusRequest>,
) -> Result<Json<Member>, AppError> {
    let member = state
        .store
        .update_member_status(member_id, request.status)
        .await?
        .ok_or(LedgerError::MemberNotFound(member_id))?;

    tracing::info!(status = %request.status, "Member status updated");
    Ok(Json(member))
}

#[tracing::instrument(skip(state))]
pub async fn delete_member(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    if state.store.delete_member(member_id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(LedgerError::MemberNotFound(member_id).into())
    }
}

/// Balance derived from the ledger, never from the cached member column.
pub async fn member_balance(
    State(state): State<AppState>,
    Path(member_id): Path<Uuid>,
) -> Result<Json<MemberBalance>, AppError> {
    Ok(Json(state.ledger.member_balance(member_id).await?))
}
