use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::TypedHeader;
use headers::{Authorization, authorization::Bearer};
use sqlx::PgPool;
use uuid::Uuid;

use crate::auth::hash_access_token;
use crate::error::ApiError;
use crate::models::AppState;
use crate::services::permissions::{PermissionMap, Principal, Scope};

/// Resolved caller for a request.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub principal: Principal,
}

#[derive(Debug, sqlx::FromRow)]
struct SessionLookupRow {
    session_token_id: Uuid,
    user_id: Uuid,
    professional_id: Option<Uuid>,
}

#[derive(Debug, sqlx::FromRow)]
struct GrantRow {
    code: String,
    scope: String,
}

pub async fn load_permissions(db: &PgPool, user_id: Uuid) -> Result<PermissionMap, ApiError> {
    let rows: Vec<GrantRow> = sqlx::query_as::<_, GrantRow>(
        r#"
        SELECT DISTINCT p.code, rp.scope
        FROM user_role ur
        JOIN role_permission rp ON rp.role_id = ur.role_id
        JOIN permission p ON p.permission_id = rp.permission_id
        WHERE ur.user_id = $1
        "#,
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    let grants = rows
        .into_iter()
        .map(|r| {
            Scope::parse(&r.scope)
                .map(|scope| (r.code, scope))
                .ok_or_else(|| ApiError::Internal(format!("unknown permission scope '{}'", r.scope)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(PermissionMap::from_grants(grants))
}

impl FromRequestParts<AppState> for AuthContext {
    type Rejection = ApiError;

    fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> impl std::future::Future<Output = Result<Self, Self::Rejection>> + Send {
        async move {
            // Extract Authorization: Bearer <token>
            let TypedHeader(authz): TypedHeader<Authorization<Bearer>> =
                TypedHeader::from_request_parts(parts, state)
                    .await
                    .map_err(|_| ApiError::session_expired())?;

            let token_hash = hash_access_token(authz.token());

            // Live session of an active user
            let row: SessionLookupRow = sqlx::query_as::<_, SessionLookupRow>(
                r#"
                SELECT st.session_token_id, st.user_id, u.professional_id
                FROM session_token st
                JOIN app_user u ON u.user_id = st.user_id
                WHERE st.session_token_hash = $1
                  AND st.revoked_at IS NULL
                  AND st.expires_at > now()
                  AND u.is_active = true
                "#,
            )
            .bind(&token_hash)
            .fetch_optional(&state.db)
            .await?
            .ok_or_else(ApiError::session_expired)?;

            // Touch last_seen_at (best-effort)
            let _ = sqlx::query(
                r#"
                UPDATE session_token
                SET last_seen_at = now()
                WHERE session_token_id = $1
                "#,
            )
            .bind(row.session_token_id)
            .execute(&state.db)
            .await;

            let permissions = load_permissions(&state.db, row.user_id).await?;
            tracing::debug!(
                session_token_id = %row.session_token_id,
                user_id = %row.user_id,
                "session resolved"
            );

            Ok(AuthContext {
                principal: Principal {
                    user_id: row.user_id,
                    professional_id: row.professional_id,
                    permissions,
                },
            })
        }
    }
}
