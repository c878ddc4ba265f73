// src/routes/schedule_block_routes.rs

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, ScheduleBlock},
    services::{
        permissions,
        schedule_blocks::{self, NewScheduleBlock},
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/schedule_blocks", post(create_block).get(list_blocks))
        .route("/schedule_blocks/{block_id}", get(get_block).delete(delete_block))
}

pub async fn create_block(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<NewScheduleBlock>,
) -> Result<Json<ApiOk<ScheduleBlock>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::SCHEDULE_BLOCKS_CREATE)?;
    let block = schedule_blocks::create_block(&state.db, &auth.principal, scope, req, Utc::now()).await?;
    Ok(Json(ApiOk { data: block }))
}

pub async fn list_blocks(
    State(state): State<AppState>,
    auth: AuthContext,
) -> Result<Json<ApiOk<Vec<ScheduleBlock>>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::SCHEDULE_BLOCKS_VIEW)?;
    let blocks = schedule_blocks::list_blocks(&state.db, &auth.principal, scope).await?;
    Ok(Json(ApiOk { data: blocks }))
}

pub async fn get_block(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(block_id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleBlock>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::SCHEDULE_BLOCKS_VIEW)?;
    let block = schedule_blocks::block_by_id(&state.db, &auth.principal, scope, block_id).await?;
    Ok(Json(ApiOk { data: block }))
}

pub async fn delete_block(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(block_id): Path<Uuid>,
) -> Result<Json<ApiOk<ScheduleBlock>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::SCHEDULE_BLOCKS_DELETE)?;
    let block =
        schedule_blocks::delete_block(&state.db, &auth.principal, scope, block_id, Utc::now()).await?;
    Ok(Json(ApiOk { data: block }))
}
