use axum::{Json, Router, routing::get};

use crate::models::{ApiOk, AppState, OkData};

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

pub async fn health() -> Json<ApiOk<OkData>> {
    Json(ApiOk {
        data: OkData { ok: true },
    })
}
