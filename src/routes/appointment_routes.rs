// src/routes/appointment_routes.rs

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use uuid::Uuid;

use crate::{
    error::ApiError,
    middleware::auth_context::AuthContext,
    models::{ApiOk, AppState, AppointmentRow, AppointmentStateRow},
    services::{
        appointments::{self, AppointmentFilter, NewAppointment},
        permissions::{self, Actor},
        state_machine::AppointmentEvent,
    },
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/appointments", post(create_appointment).get(list_appointments))
        .route("/appointments/{appointment_id}", get(get_appointment))
        .route("/appointments/{appointment_id}/{action}", post(apply_action))
        .route("/appointment_states", get(list_states))
}

/* ============================================================
   POST /appointments
   ============================================================ */

pub async fn create_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Json(req): Json<NewAppointment>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::APPOINTMENTS_CREATE)?;
    let row = appointments::create_appointment(
        &state.db,
        req,
        Actor::User(&auth.principal),
        scope,
        Utc::now(),
    )
    .await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   GET /appointments
   ============================================================ */

pub async fn list_appointments(
    State(state): State<AppState>,
    auth: AuthContext,
    Query(filter): Query<AppointmentFilter>,
) -> Result<Json<ApiOk<Vec<AppointmentRow>>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::APPOINTMENTS_VIEW)?;
    let rows = appointments::filtered_appointments(&state.db, &auth.principal, scope, &filter).await?;
    Ok(Json(ApiOk { data: rows }))
}

/* ============================================================
   GET /appointments/{id}
   ============================================================ */

pub async fn get_appointment(
    State(state): State<AppState>,
    auth: AuthContext,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let scope = auth.principal.resolve_scope(permissions::APPOINTMENTS_VIEW)?;
    let row = appointments::by_id(&state.db, &auth.principal, scope, appointment_id).await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   POST /appointments/{id}/{confirm|cancel|complete|no_show}
   ============================================================ */

pub async fn apply_action(
    State(state): State<AppState>,
    auth: AuthContext,
    Path((appointment_id, action)): Path<(Uuid, String)>,
) -> Result<Json<ApiOk<AppointmentRow>>, ApiError> {
    let (event, code) = AppointmentEvent::from_action(&action)?;
    let scope = auth.principal.resolve_scope(code)?;
    let row = appointments::apply_event(
        &state.db,
        appointment_id,
        event,
        Actor::User(&auth.principal),
        scope,
        Utc::now(),
    )
    .await?;
    Ok(Json(ApiOk { data: row }))
}

/* ============================================================
   GET /appointment_states
   ============================================================ */

pub async fn list_states(
    State(state): State<AppState>,
    _auth: AuthContext,
) -> Result<Json<ApiOk<Vec<AppointmentStateRow>>>, ApiError> {
    Ok(Json(ApiOk {
        data: appointments::list_states(&state.db).await?,
    }))
}
