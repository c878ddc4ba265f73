// src/services/conflicts.rs

use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::StateCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Patient(Uuid),
    Professional(Uuid),
}

fn active_codes() -> Vec<&'static str> {
    StateCode::ACTIVE.iter().map(|s| s.as_code()).collect()
}

/// An active (not soft-deleted) block of the professional intersects the interval.
pub async fn has_block(
    conn: &mut PgConnection,
    professional_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<bool, ApiError> {
    let hit: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
          SELECT 1
          FROM schedule_block b
          WHERE b.professional_id = $1
            AND b.is_active = true
            AND $2 < b.end_at
            AND $3 > b.start_at
        )
        "#,
    )
    .bind(professional_id)
    .bind(start)
    .bind(end)
    .fetch_one(&mut *conn)
    .await?;
    Ok(hit)
}

/// An active appointment of the subject intersects the interval.
pub async fn has_overlap(
    conn: &mut PgConnection,
    subject: Subject,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<bool, ApiError> {
    let (column, id) = match subject {
        Subject::Patient(id) => ("patient_id", id),
        Subject::Professional(id) => ("professional_id", id),
    };

    let sql = format!(
        r#"
        SELECT EXISTS (
          SELECT 1
          FROM appointment a
          JOIN appointment_state s ON s.state_id = a.state_id
          WHERE a.{column} = $1
            AND s.code = ANY($2)
            AND $3 < a.end_at
            AND $4 > a.start_at
        )
        "#
    );

    let hit: bool = sqlx::query_scalar(&sql)
        .bind(id)
        .bind(active_codes())
        .bind(start)
        .bind(end)
        .fetch_one(&mut *conn)
        .await?;
    Ok(hit)
}

/// Schedule block, then patient overlap, then professional overlap. First hit wins.
pub async fn ensure_slot_free(
    conn: &mut PgConnection,
    patient_id: Uuid,
    professional_id: Uuid,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), ApiError> {
    if has_block(conn, professional_id, start, end).await? {
        tracing::debug!(%professional_id, %start, %end, "slot rejected: schedule block");
        return Err(ApiError::Conflict(
            "SCHEDULE_BLOCKED",
            "the professional's agenda is blocked for that time".into(),
        ));
    }

    if has_overlap(conn, Subject::Patient(patient_id), start, end).await? {
        tracing::debug!(%patient_id, %start, %end, "slot rejected: patient overlap");
        return Err(ApiError::Conflict(
            "PATIENT_OVERLAP",
            "the patient already has an appointment at that time".into(),
        ));
    }

    if has_overlap(conn, Subject::Professional(professional_id), start, end).await? {
        tracing::debug!(%professional_id, %start, %end, "slot rejected: professional overlap");
        return Err(ApiError::Conflict(
            "PROFESSIONAL_OVERLAP",
            "the professional already has an appointment at that time".into(),
        ));
    }

    Ok(())
}
