// src/services/state_machine.rs

use serde::Serialize;

use crate::error::ApiError;
use crate::models::StateCode;
use crate::services::permissions;

/// Events that move an appointment through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentEvent {
    Confirm,
    Cancel,
    /// Reservation outlived its TTL. Raised by the sweeper only.
    Expire,
    NoShow,
    Complete,
}

impl AppointmentEvent {
    pub const ALL: [AppointmentEvent; 5] = [
        AppointmentEvent::Confirm,
        AppointmentEvent::Cancel,
        AppointmentEvent::Expire,
        AppointmentEvent::NoShow,
        AppointmentEvent::Complete,
    ];

    pub fn name(self) -> &'static str {
        match self {
            AppointmentEvent::Confirm => "confirm",
            AppointmentEvent::Cancel => "cancel",
            AppointmentEvent::Expire => "expire",
            AppointmentEvent::NoShow => "no_show",
            AppointmentEvent::Complete => "complete",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        AppointmentEvent::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Events callers may raise through the API, with the permission each needs.
    pub fn from_action(action: &str) -> Result<(Self, &'static str), ApiError> {
        use AppointmentEvent as E;

        match AppointmentEvent::parse(action) {
            Some(E::Confirm) => Ok((E::Confirm, permissions::APPOINTMENTS_CONFIRM)),
            Some(E::Cancel) => Ok((E::Cancel, permissions::APPOINTMENTS_CANCEL)),
            Some(E::NoShow) => Ok((E::NoShow, permissions::APPOINTMENTS_NO_SHOW)),
            Some(E::Complete) => Ok((E::Complete, permissions::APPOINTMENTS_COMPLETE)),
            Some(E::Expire) | None => Err(ApiError::validation(format!("unknown action '{action}'"))),
        }
    }
}

/// The full allow-list. Anything not matched here is illegal.
pub fn next_state(from: StateCode, event: AppointmentEvent) -> Option<StateCode> {
    use AppointmentEvent as E;
    use StateCode as S;

    match (from, event) {
        (S::Reserved, E::Confirm) => Some(S::Confirmed),
        (S::Reserved, E::Cancel) => Some(S::Cancelled),
        (S::Reserved, E::Expire) => Some(S::Cancelled),
        (S::Confirmed, E::Cancel) => Some(S::Cancelled),
        (S::Confirmed, E::NoShow) => Some(S::NoShow),
        (S::Confirmed, E::Complete) => Some(S::Completed),
        _ => None,
    }
}

pub fn transition(from: StateCode, event: AppointmentEvent) -> Result<StateCode, ApiError> {
    next_state(from, event).ok_or_else(|| {
        ApiError::Conflict(
            "ILLEGAL_TRANSITION",
            format!(
                "illegal transition: {} + {} is not allowed",
                from.as_code(),
                event.name()
            ),
        )
    })
}
