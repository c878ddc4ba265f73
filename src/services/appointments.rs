// src/services/appointments.rs

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{APPOINTMENT_SELECT, AppointmentRow, AppointmentStateRow, StateCode};
use crate::services::conflicts;
use crate::services::notifications;
use crate::services::ownership::{ensure_owner, own_professional_id};
use crate::services::permissions::{Actor, Principal, Scope};
use crate::services::state_machine::{self, AppointmentEvent};

pub const DEFAULT_LIST_LIMIT: i64 = 200;
pub const MAX_LIST_LIMIT: i64 = 1000;

#[derive(Debug, Clone, Deserialize)]
pub struct NewAppointment {
    pub patient_id: Uuid,
    pub professional_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppointmentFilter {
    pub professional_id: Option<Uuid>,
    pub patient_id: Option<Uuid>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub patient_name: Option<String>,
    pub professional_name: Option<String>,
    pub state: Option<String>,
    pub active_only: Option<bool>,
    pub limit: Option<i64>,
}

/* ============================================================
   State catalog
   ============================================================ */

pub async fn state_id(conn: &mut PgConnection, code: StateCode) -> Result<i16, ApiError> {
    let id: Option<i16> = sqlx::query_scalar("SELECT state_id FROM appointment_state WHERE code = $1")
        .bind(code.as_code())
        .fetch_optional(&mut *conn)
        .await?;
    id.ok_or_else(|| {
        ApiError::Internal(format!("appointment state '{}' missing from catalog", code.as_code()))
    })
}

pub async fn list_states(pool: &PgPool) -> Result<Vec<AppointmentStateRow>, ApiError> {
    let rows = sqlx::query_as::<_, AppointmentStateRow>(
        "SELECT state_id, code, description FROM appointment_state ORDER BY state_id ASC",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/* ============================================================
   Loading
   ============================================================ */

async fn fetch_row(
    conn: &mut PgConnection,
    appointment_id: Uuid,
) -> Result<Option<AppointmentRow>, ApiError> {
    let sql = format!("{APPOINTMENT_SELECT} WHERE a.appointment_id = $1");
    let row = sqlx::query_as::<_, AppointmentRow>(&sql)
        .bind(appointment_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

/// Locks the bare appointment row, then reads the joined view in a fresh
/// statement. A lock taken through the joins can drop a row whose state changed
/// while waiting.
async fn lock_row(
    conn: &mut PgConnection,
    appointment_id: Uuid,
) -> Result<Option<AppointmentRow>, ApiError> {
    let locked: Option<Uuid> = sqlx::query_scalar(
        "SELECT appointment_id FROM appointment WHERE appointment_id = $1 FOR UPDATE",
    )
    .bind(appointment_id)
    .fetch_optional(&mut *conn)
    .await?;

    match locked {
        Some(id) => fetch_row(conn, id).await,
        None => Ok(None),
    }
}

fn not_found() -> ApiError {
    ApiError::NotFound("NOT_FOUND", "appointment not found".into())
}

/// `is_active` of a patient or professional, `None` when the id is unknown.
async fn person_active(
    conn: &mut PgConnection,
    table: &str,
    id_column: &str,
    id: Uuid,
) -> Result<Option<bool>, ApiError> {
    let sql = format!("SELECT is_active FROM {table} WHERE {id_column} = $1");
    let active = sqlx::query_scalar::<_, bool>(&sql)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(active)
}

/// Both people must exist before either is checked for being active.
async fn ensure_people_bookable(
    conn: &mut PgConnection,
    patient_id: Uuid,
    professional_id: Uuid,
) -> Result<(), ApiError> {
    let patient = person_active(conn, "patient", "patient_id", patient_id).await?;
    let professional = person_active(conn, "professional", "professional_id", professional_id).await?;

    let (Some(patient_active), Some(professional_active)) = (patient, professional) else {
        let label = if patient.is_none() { "patient" } else { "professional" };
        return Err(ApiError::NotFound("NOT_FOUND", format!("{label} not found")));
    };

    if !patient_active {
        return Err(ApiError::Validation("INACTIVE", "patient is inactive".into()));
    }
    if !professional_active {
        return Err(ApiError::Validation("INACTIVE", "professional is inactive".into()));
    }
    Ok(())
}

/* ============================================================
   Create
   ============================================================ */

/// Books a new RESERVED appointment and queues the confirmation request in the
/// same transaction.
pub async fn create_appointment(
    pool: &PgPool,
    req: NewAppointment,
    actor: Actor<'_>,
    scope: Scope,
    now: DateTime<Utc>,
) -> Result<AppointmentRow, ApiError> {
    if req.end_at <= req.start_at {
        return Err(ApiError::validation("end_at must be > start_at"));
    }

    // OWN callers can only book on their own agenda.
    let professional_id = match scope {
        Scope::Own => own_professional_id(actor.principal())?,
        Scope::Any => req.professional_id,
    };

    let mut tx = pool.begin().await?;

    ensure_people_bookable(&mut tx, req.patient_id, professional_id).await?;

    conflicts::ensure_slot_free(&mut tx, req.patient_id, professional_id, req.start_at, req.end_at)
        .await?;

    let reserved = state_id(&mut tx, StateCode::Reserved).await?;
    let user_id = actor.user_id();

    let appointment_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO appointment (
          patient_id,
          professional_id,
          state_id,
          start_at,
          end_at,
          created_at,
          created_by_user_id,
          updated_at,
          updated_by_user_id
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, CASE WHEN $7::uuid IS NULL THEN NULL ELSE $6 END, $7)
        RETURNING appointment_id
        "#,
    )
    .bind(req.patient_id)
    .bind(professional_id)
    .bind(reserved)
    .bind(req.start_at)
    .bind(req.end_at)
    .bind(now)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    let row = fetch_row(&mut tx, appointment_id).await?.ok_or_else(not_found)?;
    notifications::schedule_for_state(&mut tx, &row, StateCode::Reserved, now).await?;

    tx.commit().await?;

    tracing::info!(
        %appointment_id,
        patient_id = %row.patient_id,
        professional_id = %row.professional_id,
        actor = %actor.label(),
        "appointment reserved"
    );
    Ok(row)
}

/* ============================================================
   Transitions
   ============================================================ */

/// Applies `event` under a row lock held until commit, so concurrent
/// transitions on one appointment are serialized.
pub async fn apply_event(
    pool: &PgPool,
    appointment_id: Uuid,
    event: AppointmentEvent,
    actor: Actor<'_>,
    scope: Scope,
    now: DateTime<Utc>,
) -> Result<AppointmentRow, ApiError> {
    let mut tx = pool.begin().await?;

    let current = lock_row(&mut tx, appointment_id).await?.ok_or_else(not_found)?;
    ensure_owner(scope, actor.principal(), &current)?;

    let from = current.state()?;
    let to = state_machine::transition(from, event)?;
    let to_id = state_id(&mut tx, to).await?;

    sqlx::query(
        r#"
        UPDATE appointment
        SET state_id = $2,
            confirmed_at = CASE WHEN $3 THEN $5 ELSE confirmed_at END,
            cancelled_at = CASE WHEN $4 THEN $5 ELSE cancelled_at END,
            updated_at = CASE WHEN $6::uuid IS NULL THEN updated_at ELSE $5 END,
            updated_by_user_id = COALESCE($6, updated_by_user_id)
        WHERE appointment_id = $1
        "#,
    )
    .bind(appointment_id)
    .bind(to_id)
    .bind(to == StateCode::Confirmed)
    .bind(to == StateCode::Cancelled)
    .bind(now)
    .bind(actor.user_id())
    .execute(&mut *tx)
    .await?;

    let updated = fetch_row(&mut tx, appointment_id).await?.ok_or_else(not_found)?;
    notifications::schedule_for_state(&mut tx, &updated, to, now).await?;

    tx.commit().await?;

    tracing::info!(
        %appointment_id,
        from = from.as_code(),
        to = to.as_code(),
        event = event.name(),
        actor = %actor.label(),
        "appointment transitioned"
    );
    Ok(updated)
}

/* ============================================================
   Queries
   ============================================================ */

pub async fn by_id(
    pool: &PgPool,
    principal: &Principal,
    scope: Scope,
    appointment_id: Uuid,
) -> Result<AppointmentRow, ApiError> {
    let mut conn = pool.acquire().await?;
    let row = fetch_row(&mut conn, appointment_id).await?.ok_or_else(not_found)?;
    ensure_owner(scope, Some(principal), &row)?;
    Ok(row)
}

pub async fn filtered_appointments(
    pool: &PgPool,
    principal: &Principal,
    scope: Scope,
    filter: &AppointmentFilter,
) -> Result<Vec<AppointmentRow>, ApiError> {
    let limit = filter.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if !(1..=MAX_LIST_LIMIT).contains(&limit) {
        return Err(ApiError::validation(format!(
            "limit must be between 1 and {MAX_LIST_LIMIT}"
        )));
    }

    let state = match filter.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(code) => Some(
            StateCode::from_code(code)
                .ok_or_else(|| ApiError::validation(format!("unknown state '{code}'")))?,
        ),
        None => None,
    };

    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if to <= from {
            return Err(ApiError::validation("to must be greater than from"));
        }
    }

    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(APPOINTMENT_SELECT);
    qb.push(" WHERE 1=1 ");

    // Ownership narrows first; business filters only refine it.
    if scope == Scope::Own {
        let mine = own_professional_id(Some(principal))?;
        qb.push(" AND a.professional_id = ");
        qb.push_bind(mine);
    }

    if let Some(pid) = filter.professional_id {
        qb.push(" AND a.professional_id = ");
        qb.push_bind(pid);
    }
    if let Some(pid) = filter.patient_id {
        qb.push(" AND a.patient_id = ");
        qb.push_bind(pid);
    }

    match (filter.from, filter.to) {
        (Some(from), Some(to)) => {
            qb.push(" AND a.end_at > ");
            qb.push_bind(from);
            qb.push(" AND a.start_at < ");
            qb.push_bind(to);
        }
        (Some(from), None) => {
            qb.push(" AND a.end_at > ");
            qb.push_bind(from);
        }
        (None, Some(to)) => {
            qb.push(" AND a.start_at < ");
            qb.push_bind(to);
        }
        (None, None) => {}
    }

    if let Some(name) = filter.patient_name.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        qb.push(" AND p.full_name ILIKE ");
        qb.push_bind(format!("%{name}%"));
    }
    if let Some(name) = filter
        .professional_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    {
        qb.push(" AND d.full_name ILIKE ");
        qb.push_bind(format!("%{name}%"));
    }

    if let Some(state) = state {
        qb.push(" AND s.code = ");
        qb.push_bind(state.as_code());
    }
    if filter.active_only.unwrap_or(false) {
        let active: Vec<&str> = StateCode::ACTIVE.iter().map(|s| s.as_code()).collect();
        qb.push(" AND s.code = ANY(");
        qb.push_bind(active);
        qb.push(")");
    }

    qb.push(" ORDER BY a.start_at ASC LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build_query_as::<AppointmentRow>().fetch_all(pool).await?;
    Ok(rows)
}

/* ============================================================
   Sweeper selections
   ============================================================ */

/// RESERVED appointments created before `cutoff`.
pub async fn stale_reservation_ids(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<Vec<Uuid>, ApiError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT a.appointment_id
        FROM appointment a
        JOIN appointment_state s ON s.state_id = a.state_id
        WHERE s.code = $1
          AND a.created_at < $2
        ORDER BY a.created_at ASC
        "#,
    )
    .bind(StateCode::Reserved.as_code())
    .bind(cutoff)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}

/// CONFIRMED appointments whose slot already ended.
pub async fn elapsed_confirmed_ids(
    pool: &PgPool,
    now: DateTime<Utc>,
) -> Result<Vec<Uuid>, ApiError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT a.appointment_id
        FROM appointment a
        JOIN appointment_state s ON s.state_id = a.state_id
        WHERE s.code = $1
          AND a.end_at < $2
        ORDER BY a.end_at ASC
        "#,
    )
    .bind(StateCode::Confirmed.as_code())
    .bind(now)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
