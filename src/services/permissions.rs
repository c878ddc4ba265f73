// src/services/permissions.rs

use std::collections::{HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::error::ApiError;

pub const APPOINTMENTS_CREATE: &str = "appointments.create";
pub const APPOINTMENTS_VIEW: &str = "appointments.view";
pub const APPOINTMENTS_CONFIRM: &str = "appointments.confirm";
pub const APPOINTMENTS_CANCEL: &str = "appointments.cancel";
pub const APPOINTMENTS_COMPLETE: &str = "appointments.complete";
pub const APPOINTMENTS_NO_SHOW: &str = "appointments.no_show";
pub const SCHEDULE_BLOCKS_CREATE: &str = "schedule_blocks.create";
pub const SCHEDULE_BLOCKS_VIEW: &str = "schedule_blocks.view";
pub const SCHEDULE_BLOCKS_DELETE: &str = "schedule_blocks.delete";

/// How far a granted permission reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Scope {
    /// Only records tied to the caller's own professional identity.
    Own,
    /// Any record.
    Any,
}

impl Scope {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OWN" => Some(Scope::Own),
            "ANY" => Some(Scope::Any),
            _ => None,
        }
    }
}

/// Permission code -> granted scopes, built once per request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionMap {
    grants: HashMap<String, HashSet<Scope>>,
}

impl PermissionMap {
    pub fn from_grants<I, S>(grants: I) -> Self
    where
        I: IntoIterator<Item = (S, Scope)>,
        S: Into<String>,
    {
        let mut map: HashMap<String, HashSet<Scope>> = HashMap::new();
        for (code, scope) in grants {
            map.entry(code.into()).or_default().insert(scope);
        }
        Self { grants: map }
    }

    pub fn scopes(&self, code: &str) -> Option<&HashSet<Scope>> {
        self.grants.get(code)
    }

    /// Effective scope for `code`: ANY wins over OWN, nothing granted is Forbidden.
    pub fn resolve(&self, code: &str) -> Result<Scope, ApiError> {
        let scopes = self.scopes(code);
        if scopes.is_some_and(|s| s.contains(&Scope::Any)) {
            return Ok(Scope::Any);
        }
        if scopes.is_some_and(|s| s.contains(&Scope::Own)) {
            return Ok(Scope::Own);
        }
        Err(ApiError::Forbidden(
            "MISSING_PERMISSION",
            format!("missing permission: {code}"),
        ))
    }
}

/// Authenticated caller. Immutable once resolved.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub professional_id: Option<Uuid>,
    pub permissions: PermissionMap,
}

impl Principal {
    pub fn resolve_scope(&self, code: &str) -> Result<Scope, ApiError> {
        self.permissions.resolve(code)
    }
}

/// Who drives an operation.
#[derive(Debug, Clone, Copy)]
pub enum Actor<'a> {
    User(&'a Principal),
    /// Background jobs. Always ANY scope, no user attribution.
    System,
}

impl<'a> Actor<'a> {
    pub fn principal(&self) -> Option<&'a Principal> {
        match self {
            Actor::User(p) => Some(p),
            Actor::System => None,
        }
    }

    pub fn user_id(&self) -> Option<Uuid> {
        self.principal().map(|p| p.user_id)
    }

    pub fn label(&self) -> String {
        match self {
            Actor::User(p) => format!("user:{}", p.user_id),
            Actor::System => "system".to_string(),
        }
    }
}
