use crate::services::{OutstandingEntry, SweepReport};
use crate::startup::AppState;
use axum::{extract::State, Json};
use service_core::error::AppError;

/// Re-sync every due against its payments.
#[tracing::instrument(skip(state))]
pub async fn reconcile(State(state): State<AppState>) -> Result<Json<SweepReport>, AppError> {
    Ok(Json(state.ledger.reconcile_all().await?))
}

pub async fn outstanding_report(
    State(state): State<AppState>,
) -> Result<Json<Vec<OutstandingEntry>>, AppError> {
    Ok(Json(state.ledger.outstanding_report().await?))
}
