// src/services/ownership.rs

use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AppointmentRow, ScheduleBlock};
use crate::services::permissions::{Principal, Scope};

/// Records that belong to a professional's agenda.
pub trait ProfessionalOwned {
    fn owner_professional_id(&self) -> Uuid;
}

impl ProfessionalOwned for AppointmentRow {
    fn owner_professional_id(&self) -> Uuid {
        self.professional_id
    }
}

impl ProfessionalOwned for ScheduleBlock {
    fn owner_professional_id(&self) -> Uuid {
        self.professional_id
    }
}

/// The caller's professional identity, required by every OWN-scoped operation.
pub fn own_professional_id(principal: Option<&Principal>) -> Result<Uuid, ApiError> {
    principal.and_then(|p| p.professional_id).ok_or_else(|| {
        ApiError::Forbidden(
            "NO_PROFESSIONAL_PROFILE",
            "user has no associated professional".into(),
        )
    })
}

/// Runs after the record was loaded: a missing record is NotFound before it is Forbidden.
pub fn ensure_owner<R: ProfessionalOwned>(
    scope: Scope,
    principal: Option<&Principal>,
    record: &R,
) -> Result<(), ApiError> {
    match scope {
        Scope::Any => Ok(()),
        Scope::Own => {
            let mine = own_professional_id(principal)?;
            if mine == record.owner_professional_id() {
                Ok(())
            } else {
                Err(ApiError::Forbidden(
                    "NOT_OWNER",
                    "record belongs to another professional".into(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::permissions::PermissionMap;
    use assert_matches::assert_matches;

    struct Owned(Uuid);

    impl ProfessionalOwned for Owned {
        fn owner_professional_id(&self) -> Uuid {
            self.0
        }
    }

    fn principal(professional_id: Option<Uuid>) -> Principal {
        Principal {
            user_id: Uuid::new_v4(),
            professional_id,
            permissions: PermissionMap::default(),
        }
    }

    #[test]
    fn any_scope_ignores_ownership() {
        let record = Owned(Uuid::new_v4());
        assert!(ensure_owner(Scope::Any, None, &record).is_ok());
        assert!(ensure_owner(Scope::Any, Some(&principal(None)), &record).is_ok());
    }

    #[test]
    fn own_scope_accepts_matching_professional() {
        let prof = Uuid::new_v4();
        assert!(ensure_owner(Scope::Own, Some(&principal(Some(prof))), &Owned(prof)).is_ok());
    }

    #[test]
    fn own_scope_rejects_other_professional() {
        let p = principal(Some(Uuid::new_v4()));
        assert_matches!(
            ensure_owner(Scope::Own, Some(&p), &Owned(Uuid::new_v4())),
            Err(ApiError::Forbidden("NOT_OWNER", _))
        );
    }

    #[test]
    fn own_scope_requires_professional_identity() {
        let p = principal(None);
        assert_matches!(
            ensure_owner(Scope::Own, Some(&p), &Owned(Uuid::new_v4())),
            Err(ApiError::Forbidden("NO_PROFESSIONAL_PROFILE", _))
        );
        assert_matches!(
            own_professional_id(None),
            Err(ApiError::Forbidden("NO_PROFESSIONAL_PROFILE", _))
        );
    }
}
