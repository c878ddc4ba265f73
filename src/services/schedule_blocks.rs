// src/services/schedule_blocks.rs

use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{ScheduleBlock, ScheduleBlockRow};
use crate::services::ownership::{ensure_owner, own_professional_id};
use crate::services::permissions::{Principal, Scope};

#[derive(Debug, Clone, Deserialize)]
pub struct NewScheduleBlock {
    pub professional_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: Option<String>,
}

const BLOCK_COLUMNS: &str = r#"
    block_id, professional_id, start_at, end_at, reason, is_active,
    created_at, created_by_user_id, deleted_at, deleted_by_user_id
"#;

fn not_found() -> ApiError {
    ApiError::NotFound("NOT_FOUND", "schedule block not found".into())
}

async fn fetch_block(
    conn: &mut PgConnection,
    block_id: Uuid,
    for_update: bool,
) -> Result<Option<ScheduleBlock>, ApiError> {
    let lock = if for_update { " FOR UPDATE" } else { "" };
    let sql = format!("SELECT {BLOCK_COLUMNS} FROM schedule_block WHERE block_id = $1{lock}");
    let row = sqlx::query_as::<_, ScheduleBlockRow>(&sql)
        .bind(block_id)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(ScheduleBlock::try_from).transpose()
}

pub async fn create_block(
    pool: &PgPool,
    principal: &Principal,
    scope: Scope,
    req: NewScheduleBlock,
    now: DateTime<Utc>,
) -> Result<ScheduleBlock, ApiError> {
    if req.end_at <= req.start_at {
        return Err(ApiError::validation("end_at must be > start_at"));
    }

    let professional_id = match scope {
        Scope::Own => own_professional_id(Some(principal))?,
        Scope::Any => req.professional_id,
    };

    let reason = req
        .reason
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut tx = pool.begin().await?;

    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM professional WHERE professional_id = $1)")
            .bind(professional_id)
            .fetch_one(&mut *tx)
            .await?;
    if !exists {
        return Err(ApiError::NotFound("NOT_FOUND", "professional not found".into()));
    }

    let sql = format!(
        r#"
        INSERT INTO schedule_block (professional_id, start_at, end_at, reason, is_active, created_at, created_by_user_id)
        VALUES ($1, $2, $3, $4, true, $5, $6)
        RETURNING {BLOCK_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ScheduleBlockRow>(&sql)
        .bind(professional_id)
        .bind(req.start_at)
        .bind(req.end_at)
        .bind(reason)
        .bind(now)
        .bind(principal.user_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(block_id = %row.block_id, %professional_id, "schedule block created");
    ScheduleBlock::try_from(row)
}

/// Active blocks only.
pub async fn list_blocks(
    pool: &PgPool,
    principal: &Principal,
    scope: Scope,
) -> Result<Vec<ScheduleBlock>, ApiError> {
    let own = match scope {
        Scope::Own => Some(own_professional_id(Some(principal))?),
        Scope::Any => None,
    };

    let sql = format!(
        r#"
        SELECT {BLOCK_COLUMNS}
        FROM schedule_block
        WHERE is_active = true
          AND ($1::uuid IS NULL OR professional_id = $1)
        ORDER BY start_at ASC
        "#
    );
    let rows = sqlx::query_as::<_, ScheduleBlockRow>(&sql)
        .bind(own)
        .fetch_all(pool)
        .await?;

    rows.into_iter().map(ScheduleBlock::try_from).collect()
}

pub async fn block_by_id(
    pool: &PgPool,
    principal: &Principal,
    scope: Scope,
    block_id: Uuid,
) -> Result<ScheduleBlock, ApiError> {
    let mut conn = pool.acquire().await?;
    let block = fetch_block(&mut conn, block_id, false).await?.ok_or_else(not_found)?;
    ensure_owner(scope, Some(principal), &block)?;
    Ok(block)
}

/// Soft delete: the row stays, flagged and audited.
pub async fn delete_block(
    pool: &PgPool,
    principal: &Principal,
    scope: Scope,
    block_id: Uuid,
    now: DateTime<Utc>,
) -> Result<ScheduleBlock, ApiError> {
    let mut tx = pool.begin().await?;

    let block = fetch_block(&mut tx, block_id, true)
        .await?
        .filter(ScheduleBlock::is_active)
        .ok_or_else(not_found)?;
    ensure_owner(scope, Some(principal), &block)?;

    let sql = format!(
        r#"
        UPDATE schedule_block
        SET is_active = false,
            deleted_at = $2,
            deleted_by_user_id = $3
        WHERE block_id = $1
        RETURNING {BLOCK_COLUMNS}
        "#
    );
    let row = sqlx::query_as::<_, ScheduleBlockRow>(&sql)
        .bind(block_id)
        .bind(now)
        .bind(principal.user_id)
        .fetch_one(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(%block_id, deleted_by = %principal.user_id, "schedule block removed");
    ScheduleBlock::try_from(row)
}
