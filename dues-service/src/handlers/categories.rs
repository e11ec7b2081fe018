use crate::dtos::CreateCategoryRequest;
use crate::models::{Category, CreateCategory};
use crate::startup::AppState;
use axum::{extract::State, http::StatusCode, Json};
use service_core::error::AppError;
use validator::Validate;

#[tracing::instrument(skip(state, request))]
pub async fn create_category(
    State(state): State<AppState>,
    Json(request): Json<CreateCategoryRequest>,
) -> Result<(StatusCode, Json<Category>), AppError> {
    request.validate()?;

    let category = state
        .store
        .create_category(&CreateCategory {
            name: request.name.trim().to_string(),
            description: request.description,
        })
        .await?;

    tracing::info!(category_id = %category.category_id, name = %category.name, "Category created");
    Ok((StatusCode::CREATED, Json(category)))
}

pub async fn list_categories(
    State(state): State<AppState>,
) -> Result<Json<Vec<Category>>, AppError> {
    Ok(Json(state.store.list_categories().await?))
}
