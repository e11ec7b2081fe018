use crate::dtos::{ListPaymentsQuery, PaymentResponse, RecordPaymentRequest};
use crate::middleware::Actor;
use crate::models::Payment;
use crate::startup::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

/// Append a payment. When it is linked to a due, the due's status is synced
/// in the same unit of work; a failed sync is reported, never fatal.
#[tracing::instrument(skip(state, actor, request), fields(user_id))]
pub async fn record_payment(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<RecordPaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>), AppError> {
    request.validate()?;
    let command = request.into_command(actor.into_inner())?;

    let recorded = state.ledger.record_payment(command).await?;
    Ok((StatusCode::CREATED, Json(recorded.into())))
}

pub async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListPaymentsQuery>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.store.list_payments(&query.into()).await?))
}

pub async fn get_payment(
    State(state): State<AppState>,
    Path(payment_id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    let payment = state.store.get_payment(payment_id).await?.ok_or_else(|| {
        AppError::NotFound(anyhow::anyhow!("Payment not found: {}", payment_id))
    })?;
    Ok(Json(payment))
}
