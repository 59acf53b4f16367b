//! Runtime configuration endpoints for the grader: model selection and
//! prompt text live in the database and can be swapped without a restart.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, put},
};
use serde::Serialize;
use tracing::error;

use crate::{
    config::{self, GraderModels, GraderPrompts},
    web::{ApiMessage, AppState, json_error},
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/settings/grader", get(current_settings))
        .route("/api/settings/grader/models", put(save_models))
        .route("/api/settings/grader/prompts", put(save_prompts))
}

#[derive(Serialize)]
struct GraderSettingsResponse {
    models: GraderModels,
    prompts: GraderPrompts,
}

async fn current_settings(
    State(state): State<AppState>,
) -> Result<Json<GraderSettingsResponse>, (StatusCode, Json<ApiMessage>)> {
    let Some(settings) = state.grader_settings().await else {
        return Err(json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Grader settings are not configured.",
        ));
    };
    Ok(Json(GraderSettingsResponse {
        models: settings.models,
        prompts: settings.prompts,
    }))
}

async fn save_models(
    State(state): State<AppState>,
    Json(models): Json<GraderModels>,
) -> Result<StatusCode, (StatusCode, Json<ApiMessage>)> {
    config::update_grader_models(state.pool_ref(), &models)
        .await
        .map_err(|err| {
            error!(?err, "failed to update grader models");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save models.")
        })?;
    reload(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn save_prompts(
    State(state): State<AppState>,
    Json(prompts): Json<GraderPrompts>,
) -> Result<StatusCode, (StatusCode, Json<ApiMessage>)> {
    config::update_grader_prompts(state.pool_ref(), &prompts)
        .await
        .map_err(|err| {
            error!(?err, "failed to update grader prompts");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Failed to save prompts.")
        })?;
    reload(&state).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn reload(state: &AppState) -> Result<(), (StatusCode, Json<ApiMessage>)> {
    state.reload_settings().await.map_err(|err| {
        error!(?err, "failed to reload settings");
        json_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Settings were saved but could not be reloaded.",
        )
    })
}
