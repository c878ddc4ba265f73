// src/services/notifications.rs
//
// Outbound messages are only ever queued here, inside the caller's transaction.
// Delivery happens later in workers::dispatcher.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgConnection};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AppointmentRow, StateCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Whatsapp,
    Telegram,
    Sms,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Whatsapp => "whatsapp",
            Channel::Telegram => "telegram",
            Channel::Sms => "sms",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "whatsapp" => Some(Channel::Whatsapp),
            "telegram" => Some(Channel::Telegram),
            "sms" => Some(Channel::Sms),
            _ => None,
        }
    }

    /// Patient preference, whatsapp when unset.
    pub fn for_patient(preference: Option<&str>) -> Self {
        preference.and_then(Channel::parse).unwrap_or(Channel::Whatsapp)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    ConfirmationRequest,
    Confirmation,
    #[serde(rename = "REMINDER_24H")]
    Reminder24h,
    #[serde(rename = "REMINDER_2H")]
    Reminder2h,
    Cancellation,
}

impl NotificationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationKind::ConfirmationRequest => "CONFIRMATION_REQUEST",
            NotificationKind::Confirmation => "CONFIRMATION",
            NotificationKind::Reminder24h => "REMINDER_24H",
            NotificationKind::Reminder2h => "REMINDER_2H",
            NotificationKind::Cancellation => "CANCELLATION",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Failed,
    Cancelled,
}

impl NotificationStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "PENDING" => Some(NotificationStatus::Pending),
            "SENT" => Some(NotificationStatus::Sent),
            "FAILED" => Some(NotificationStatus::Failed),
            "CANCELLED" => Some(NotificationStatus::Cancelled),
            _ => None,
        }
    }
}

pub fn dedupe_key(appointment_id: Uuid, kind: NotificationKind) -> String {
    format!("appointment:{appointment_id}:{}", kind.as_str())
}

/// Full queue row. The dispatcher reads the delivery fields; the rest is
/// there for inspection.
#[derive(Debug, Clone, FromRow)]
#[allow(dead_code)]
pub struct NotificationRow {
    pub appointment_id: Option<Uuid>,
    pub channel: String,
    pub kind: String,
    pub message: String,
    pub scheduled_for: DateTime<Utc>,
    pub status: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub sent_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub dedupe_key: String,
}

const NOTIFICATION_COLUMNS: &str = r#"
    appointment_id, channel, kind, message, scheduled_for, status,
    attempts, last_error, provider_message_id, sent_at, cancelled_at, dedupe_key
"#;

/* ============================================================
   Scheduling policy
   ============================================================ */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedNotification {
    pub kind: NotificationKind,
    pub scheduled_for: DateTime<Utc>,
}

/// What a state change does to the appointment's queue.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueuePlan {
    pub cancel_pending: bool,
    pub enqueue: Vec<PlannedNotification>,
}

/// Pure policy keyed on the state the appointment just entered.
/// `Reserved` is only ever entered at creation.
pub fn plan_for_state(state: StateCode, start_at: DateTime<Utc>, now: DateTime<Utc>) -> QueuePlan {
    let immediate = |kind| PlannedNotification { kind, scheduled_for: now };

    match state {
        StateCode::Reserved => QueuePlan {
            cancel_pending: false,
            enqueue: vec![immediate(NotificationKind::ConfirmationRequest)],
        },
        StateCode::Confirmed => {
            let mut enqueue = vec![immediate(NotificationKind::Confirmation)];
            let reminders = [
                (NotificationKind::Reminder24h, Duration::hours(24)),
                (NotificationKind::Reminder2h, Duration::hours(2)),
            ];
            for (kind, lead) in reminders {
                let at = start_at - lead;
                if at > now {
                    enqueue.push(PlannedNotification { kind, scheduled_for: at });
                }
            }
            QueuePlan { cancel_pending: false, enqueue }
        }
        StateCode::Cancelled => QueuePlan {
            cancel_pending: true,
            enqueue: vec![immediate(NotificationKind::Cancellation)],
        },
        StateCode::NoShow | StateCode::Completed => QueuePlan {
            cancel_pending: true,
            enqueue: Vec::new(),
        },
    }
}

pub fn render_message(kind: NotificationKind, appt: &AppointmentRow) -> String {
    let when = appt.start_at.format("%Y-%m-%d %H:%M UTC");
    let patient = &appt.patient_name;
    let professional = &appt.professional_name;

    match kind {
        NotificationKind::ConfirmationRequest => format!(
            "Hi {patient}. You have a booking with {professional} on {when}. \
             Please reply to confirm or cancel."
        ),
        NotificationKind::Confirmation => {
            format!("Confirmed: {patient}, your appointment with {professional} is on {when}.")
        }
        NotificationKind::Reminder24h => {
            format!("Reminder (24h): {patient}, your appointment with {professional} is on {when}.")
        }
        NotificationKind::Reminder2h => {
            format!("Reminder (2h): {patient}, your appointment with {professional} is on {when}.")
        }
        NotificationKind::Cancellation => format!(
            "Cancelled: {patient}, your appointment with {professional} on {when} was cancelled."
        ),
    }
}

/* ============================================================
   Queue writes (caller owns the transaction)
   ============================================================ */

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub appointment_id: Option<Uuid>,
    pub patient_id: Uuid,
    pub channel: Channel,
    pub kind: NotificationKind,
    pub message: String,
    pub scheduled_for: DateTime<Utc>,
    pub dedupe_key: String,
}

/// Inserts a PENDING row. A repeated dedupe key fails the surrounding transaction
/// through the unique constraint.
pub async fn enqueue(
    conn: &mut PgConnection,
    n: &NewNotification,
    now: DateTime<Utc>,
) -> Result<Uuid, ApiError> {
    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO notification (
          appointment_id, patient_id, channel, kind, message,
          scheduled_for, status, attempts, created_at, dedupe_key
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'PENDING', 0, $7, $8)
        RETURNING notification_id
        "#,
    )
    .bind(n.appointment_id)
    .bind(n.patient_id)
    .bind(n.channel.as_str())
    .bind(n.kind.as_str())
    .bind(&n.message)
    .bind(n.scheduled_for)
    .bind(now)
    .bind(&n.dedupe_key)
    .fetch_one(&mut *conn)
    .await?;
    Ok(id)
}

pub async fn cancel_pending_for_appointment(
    conn: &mut PgConnection,
    appointment_id: Uuid,
    now: DateTime<Utc>,
) -> Result<u64, ApiError> {
    let res = sqlx::query(
        r#"
        UPDATE notification
        SET status = 'CANCELLED',
            cancelled_at = $2
        WHERE appointment_id = $1
          AND status = 'PENDING'
        "#,
    )
    .bind(appointment_id)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(res.rows_affected())
}

/// Applies [`plan_for_state`] for an appointment that just entered `state`.
pub async fn schedule_for_state(
    conn: &mut PgConnection,
    appt: &AppointmentRow,
    state: StateCode,
    now: DateTime<Utc>,
) -> Result<QueuePlan, ApiError> {
    let plan = plan_for_state(state, appt.start_at, now);

    if plan.cancel_pending {
        let cancelled = cancel_pending_for_appointment(conn, appt.appointment_id, now).await?;
        tracing::debug!(appointment_id = %appt.appointment_id, cancelled, "pending notifications cancelled");
    }

    let channel = Channel::for_patient(appt.patient_channel.as_deref());
    for planned in &plan.enqueue {
        let new = NewNotification {
            appointment_id: Some(appt.appointment_id),
            patient_id: appt.patient_id,
            channel,
            kind: planned.kind,
            message: render_message(planned.kind, appt),
            scheduled_for: planned.scheduled_for,
            dedupe_key: dedupe_key(appt.appointment_id, planned.kind),
        };
        enqueue(conn, &new, now).await?;
    }

    Ok(plan)
}

#[cfg(test)]
pub async fn list_for_appointment(
    conn: &mut PgConnection,
    appointment_id: Uuid,
) -> Result<Vec<NotificationRow>, ApiError> {
    let sql = format!(
        "SELECT {NOTIFICATION_COLUMNS} FROM notification WHERE appointment_id = $1 ORDER BY scheduled_for ASC, kind ASC"
    );
    let rows = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(appointment_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows)
}

/* ============================================================
   Draining (used by the dispatcher)
   ============================================================ */

/// Due PENDING notifications still under the attempt ceiling, oldest first.
pub async fn due_ids(
    conn: &mut PgConnection,
    now: DateTime<Utc>,
    max_attempts: i32,
    limit: i64,
) -> Result<Vec<Uuid>, ApiError> {
    let ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT notification_id
        FROM notification
        WHERE status = 'PENDING'
          AND scheduled_for <= $1
          AND attempts < $2
        ORDER BY scheduled_for ASC
        LIMIT $3
        "#,
    )
    .bind(now)
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;
    Ok(ids)
}

/// Locks one notification if it is still deliverable. Rows held by another
/// dispatcher are skipped rather than waited on.
pub async fn claim(
    conn: &mut PgConnection,
    notification_id: Uuid,
    max_attempts: i32,
) -> Result<Option<NotificationRow>, ApiError> {
    let sql = format!(
        r#"
        SELECT {NOTIFICATION_COLUMNS}
        FROM notification
        WHERE notification_id = $1
          AND status = 'PENDING'
          AND attempts < $2
        FOR UPDATE SKIP LOCKED
        "#
    );
    let row = sqlx::query_as::<_, NotificationRow>(&sql)
        .bind(notification_id)
        .bind(max_attempts)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row)
}

pub async fn mark_sent(
    conn: &mut PgConnection,
    notification_id: Uuid,
    provider_message_id: &str,
    now: DateTime<Utc>,
) -> Result<(), ApiError> {
    sqlx::query(
        r#"
        UPDATE notification
        SET attempts = attempts + 1,
            status = 'SENT',
            sent_at = $2,
            provider_message_id = $3,
            last_error = NULL
        WHERE notification_id = $1
        "#,
    )
    .bind(notification_id)
    .bind(now)
    .bind(provider_message_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Counts the failed attempt and gives up (FAILED) once the ceiling is reached.
pub async fn record_failure(
    conn: &mut PgConnection,
    notification_id: Uuid,
    error: &str,
    max_attempts: i32,
) -> Result<NotificationStatus, ApiError> {
    let status: String = sqlx::query_scalar(
        r#"
        UPDATE notification
        SET attempts = attempts + 1,
            last_error = $2,
            status = CASE WHEN attempts + 1 >= $3 THEN 'FAILED' ELSE 'PENDING' END
        WHERE notification_id = $1
        RETURNING status
        "#,
    )
    .bind(notification_id)
    .bind(error)
    .bind(max_attempts)
    .fetch_one(&mut *conn)
    .await?;

    NotificationStatus::parse(&status)
        .ok_or_else(|| ApiError::Internal(format!("unknown notification status '{status}'")))
}
