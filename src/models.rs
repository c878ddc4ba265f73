use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
}

/* -------------------------
   API envelopes
--------------------------*/

#[derive(Debug, Serialize)]
pub struct ApiOk<T> {
    pub data: T,
}

#[derive(Debug, Serialize)]
pub struct OkData {
    pub ok: bool,
}

/* -------------------------
   Appointment state catalog
--------------------------*/

/// Stable codes of the `appointment_state` catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateCode {
    #[serde(rename = "RESERVADO")]
    Reserved,
    #[serde(rename = "CONFIRMADO")]
    Confirmed,
    #[serde(rename = "CANCELADO")]
    Cancelled,
    #[serde(rename = "NO_ASISTIO")]
    NoShow,
    #[serde(rename = "COMPLETADO")]
    Completed,
}

impl StateCode {
    pub const ALL: [StateCode; 5] = [
        StateCode::Reserved,
        StateCode::Confirmed,
        StateCode::Cancelled,
        StateCode::NoShow,
        StateCode::Completed,
    ];

    /// States that hold a slot on the calendar.
    pub const ACTIVE: [StateCode; 2] = [StateCode::Reserved, StateCode::Confirmed];

    pub fn as_code(self) -> &'static str {
        match self {
            StateCode::Reserved => "RESERVADO",
            StateCode::Confirmed => "CONFIRMADO",
            StateCode::Cancelled => "CANCELADO",
            StateCode::NoShow => "NO_ASISTIO",
            StateCode::Completed => "COMPLETADO",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        StateCode::ALL.into_iter().find(|s| s.as_code() == code)
    }

    pub fn is_active(self) -> bool {
        StateCode::ACTIVE.contains(&self)
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentStateRow {
    pub state_id: i16,
    pub code: String,
    pub description: String,
}

/* -------------------------
   Appointments
--------------------------*/

/// An appointment joined with its state code and the people involved.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AppointmentRow {
    pub appointment_id: Uuid,
    pub patient_id: Uuid,
    pub patient_name: String,
    #[serde(skip_serializing)]
    pub patient_channel: Option<String>,
    pub professional_id: Uuid,
    pub professional_name: String,
    pub state_id: i16,
    pub state_code: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_by_user_id: Option<Uuid>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by_user_id: Option<Uuid>,
}

impl AppointmentRow {
    pub fn state(&self) -> Result<StateCode, ApiError> {
        StateCode::from_code(&self.state_code).ok_or_else(|| {
            ApiError::Internal(format!("unknown appointment state '{}'", self.state_code))
        })
    }
}

/// Shared SELECT list for [`AppointmentRow`]; callers append WHERE/ORDER clauses.
pub const APPOINTMENT_SELECT: &str = r#"
    SELECT
      a.appointment_id,
      a.patient_id,
      p.full_name AS patient_name,
      p.contact_channel AS patient_channel,
      a.professional_id,
      d.full_name AS professional_name,
      a.state_id,
      s.code AS state_code,
      a.start_at,
      a.end_at,
      a.created_at,
      a.confirmed_at,
      a.cancelled_at,
      a.created_by_user_id,
      a.updated_at,
      a.updated_by_user_id
    FROM appointment a
    JOIN appointment_state s ON s.state_id = a.state_id
    JOIN patient p ON p.patient_id = a.patient_id
    JOIN professional d ON d.professional_id = a.professional_id
"#;

/* -------------------------
   Schedule blocks
--------------------------*/

/// Soft-delete status. A deleted block always carries its deletion audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BlockStatus {
    Active,
    Deleted {
        #[serde(rename = "deleted_at")]
        at: DateTime<Utc>,
        #[serde(rename = "deleted_by_user_id")]
        by: Uuid,
    },
}

#[derive(Debug, Clone, FromRow)]
pub struct ScheduleBlockRow {
    pub block_id: Uuid,
    pub professional_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: Option<Uuid>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by_user_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleBlock {
    pub block_id: Uuid,
    pub professional_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub created_by_user_id: Option<Uuid>,
    #[serde(flatten)]
    pub status: BlockStatus,
}

impl ScheduleBlock {
    pub fn is_active(&self) -> bool {
        self.status == BlockStatus::Active
    }
}

impl TryFrom<ScheduleBlockRow> for ScheduleBlock {
    type Error = ApiError;

    fn try_from(row: ScheduleBlockRow) -> Result<Self, Self::Error> {
        let status = match (row.is_active, row.deleted_at, row.deleted_by_user_id) {
            (true, None, None) => BlockStatus::Active,
            (false, Some(at), Some(by)) => BlockStatus::Deleted { at, by },
            _ => {
                return Err(ApiError::Internal(format!(
                    "schedule block {} has inconsistent deletion audit",
                    row.block_id
                )));
            }
        };

        Ok(ScheduleBlock {
            block_id: row.block_id,
            professional_id: row.professional_id,
            start_at: row.start_at,
            end_at: row.end_at,
            reason: row.reason,
            created_at: row.created_at,
            created_by_user_id: row.created_by_user_id,
            status,
        })
    }
}
