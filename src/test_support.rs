// Shared fixtures for database-backed tests.
//
// These tests need a disposable Postgres reachable through TEST_DATABASE_URL.
// When it is unset they return early and pass, so `cargo test` stays usable
// without a database.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db;
use crate::services::permissions::{self, PermissionMap, Principal, Scope};

pub const ALL_CODES: [&str; 9] = [
    permissions::APPOINTMENTS_CREATE,
    permissions::APPOINTMENTS_VIEW,
    permissions::APPOINTMENTS_CONFIRM,
    permissions::APPOINTMENTS_CANCEL,
    permissions::APPOINTMENTS_COMPLETE,
    permissions::APPOINTMENTS_NO_SHOW,
    permissions::SCHEDULE_BLOCKS_CREATE,
    permissions::SCHEDULE_BLOCKS_VIEW,
    permissions::SCHEDULE_BLOCKS_DELETE,
];

pub async fn test_pool() -> Option<PgPool> {
    let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
        eprintln!("TEST_DATABASE_URL not set, skipping database test");
        return None;
    };
    let pool = db::connect_pg(&url, 5).await.expect("connect to test database");
    db::migrate(&pool).await.expect("migrate test database");
    Some(pool)
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0).unwrap()
}

pub async fn seed_professional(pool: &PgPool) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO professional (full_name, specialty) VALUES ($1, 'General') RETURNING professional_id",
    )
    .bind(format!("Dr. Test {}", &Uuid::new_v4().to_string()[..8]))
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn seed_patient(pool: &PgPool, channel: Option<&str>) -> Uuid {
    sqlx::query_scalar(
        "INSERT INTO patient (full_name, phone, contact_channel) VALUES ($1, '+5491100000000', $2) RETURNING patient_id",
    )
    .bind(format!("Patient {}", &Uuid::new_v4().to_string()[..8]))
    .bind(channel)
    .fetch_one(pool)
    .await
    .unwrap()
}

pub async fn deactivate_patient(pool: &PgPool, patient_id: Uuid) {
    sqlx::query("UPDATE patient SET is_active = false WHERE patient_id = $1")
        .bind(patient_id)
        .execute(pool)
        .await
        .unwrap();
}

/// Inserts an app_user and returns a principal holding `grants`.
pub async fn seed_principal(
    pool: &PgPool,
    professional_id: Option<Uuid>,
    grants: &[(&str, Scope)],
) -> Principal {
    let user_id: Uuid = sqlx::query_scalar(
        "INSERT INTO app_user (username, professional_id) VALUES ($1, $2) RETURNING user_id",
    )
    .bind(format!("user-{}", Uuid::new_v4()))
    .bind(professional_id)
    .fetch_one(pool)
    .await
    .unwrap();

    Principal {
        user_id,
        professional_id,
        permissions: PermissionMap::from_grants(grants.iter().map(|(c, s)| (*c, *s))),
    }
}

/// Receptionist-style caller: every permission with ANY scope.
pub async fn seed_admin(pool: &PgPool) -> Principal {
    let grants: Vec<(&str, Scope)> = ALL_CODES.iter().map(|c| (*c, Scope::Any)).collect();
    seed_principal(pool, None, &grants).await
}

/// Professional-style caller: every permission with OWN scope.
pub async fn seed_own_professional(pool: &PgPool, professional_id: Uuid) -> Principal {
    let grants: Vec<(&str, Scope)> = ALL_CODES.iter().map(|c| (*c, Scope::Own)).collect();
    seed_principal(pool, Some(professional_id), &grants).await
}
