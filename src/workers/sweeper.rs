// src/workers/sweeper.rs

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::services::appointments;
use crate::services::permissions::{Actor, Scope};
use crate::services::state_machine::AppointmentEvent;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub no_shows: usize,
    pub failures: usize,
}

/// Expires stale reservations and marks finished-but-unattended appointments
/// as no-shows, acting as the system.
pub struct Sweeper {
    pool: PgPool,
    interval: StdDuration,
    reservation_ttl: Duration,
}

impl Sweeper {
    pub fn new(pool: PgPool, interval: StdDuration, reservation_ttl: Duration) -> Self {
        Self {
            pool,
            interval,
            reservation_ttl,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = self.interval.as_secs(), "sweeper started");
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.run_once(Utc::now()).await;
                    if report != SweepReport::default() {
                        info!(?report, "sweep finished");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("sweeper stopped");
    }

    /// The expiry pass and the no-show pass are independent: a failed lookup
    /// in one is counted and logged, and the other still runs.
    pub async fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        let cutoff = now - self.reservation_ttl;
        match appointments::stale_reservation_ids(&self.pool, cutoff).await {
            Ok(stale) => {
                for id in stale {
                    if self.drive(id, AppointmentEvent::Expire, now).await {
                        report.expired += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "stale reservation lookup failed");
                report.failures += 1;
            }
        }

        match appointments::elapsed_confirmed_ids(&self.pool, now).await {
            Ok(elapsed) => {
                for id in elapsed {
                    if self.drive(id, AppointmentEvent::NoShow, now).await {
                        report.no_shows += 1;
                    } else {
                        report.failures += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "elapsed appointment lookup failed");
                report.failures += 1;
            }
        }

        report
    }

    /// One appointment per transaction; a failure is logged and the sweep moves on.
    async fn drive(&self, appointment_id: Uuid, event: AppointmentEvent, now: DateTime<Utc>) -> bool {
        match appointments::apply_event(&self.pool, appointment_id, event, Actor::System, Scope::Any, now)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(%appointment_id, event = event.name(), error = %e, "sweeper transition failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StateCode;
    use crate::services::appointments::{NewAppointment, by_id, create_appointment};
    use crate::services::notifications::list_for_appointment;
    use crate::test_support::*;

    // Runs in its own stretch of time so sweeps here never reach rows
    // created by the other database tests.
    #[tokio::test]
    async fn expires_stale_reservations_and_marks_no_shows() {
        let Some(pool) = test_pool().await else { return };
        let admin = seed_admin(&pool).await;
        let prof = seed_professional(&pool).await;
        let (p1, p2) = (seed_patient(&pool, None).await, seed_patient(&pool, None).await);
        let t0 = at(2001, 1, 10, 8, 0);

        let reserved = create_appointment(
            &pool,
            NewAppointment {
                patient_id: p1,
                professional_id: prof,
                start_at: t0 + Duration::days(5),
                end_at: t0 + Duration::days(5) + Duration::minutes(30),
            },
            Actor::User(&admin),
            Scope::Any,
            t0,
        )
        .await
        .unwrap();

        let attended = create_appointment(
            &pool,
            NewAppointment {
                patient_id: p2,
                professional_id: prof,
                start_at: at(2001, 1, 11, 10, 0),
                end_at: at(2001, 1, 11, 10, 30),
            },
            Actor::User(&admin),
            Scope::Any,
            t0,
        )
        .await
        .unwrap();
        appointments::apply_event(
            &pool,
            attended.appointment_id,
            AppointmentEvent::Confirm,
            Actor::User(&admin),
            Scope::Any,
            t0,
        )
        .await
        .unwrap();

        let sweeper = Sweeper::new(pool.clone(), StdDuration::from_secs(60), Duration::hours(48));

        // 47h: the reservation is still inside its TTL, the confirmed slot is over.
        sweeper.run_once(t0 + Duration::hours(47)).await;

        let r = by_id(&pool, &admin, Scope::Any, reserved.appointment_id).await.unwrap();
        assert_eq!(r.state().unwrap(), StateCode::Reserved);

        let a = by_id(&pool, &admin, Scope::Any, attended.appointment_id).await.unwrap();
        assert_eq!(a.state().unwrap(), StateCode::NoShow);
        let mut conn = pool.acquire().await.unwrap();
        let queued = list_for_appointment(&mut conn, attended.appointment_id).await.unwrap();
        assert!(!queued.is_empty());
        assert!(queued.iter().all(|n| n.status != "PENDING"));

        // 49h: past the TTL.
        let report = sweeper.run_once(t0 + Duration::hours(49)).await;
        assert!(report.expired >= 1);

        let r = by_id(&pool, &admin, Scope::Any, reserved.appointment_id).await.unwrap();
        assert_eq!(r.state().unwrap(), StateCode::Cancelled);
        assert_eq!(r.cancelled_at, Some(t0 + Duration::hours(49)));
        // System transitions leave no user attribution.
        assert_eq!(r.updated_by_user_id, reserved.updated_by_user_id);

        let queued = list_for_appointment(&mut conn, reserved.appointment_id).await.unwrap();
        let cancellation: Vec<_> = queued.iter().filter(|n| n.kind == "CANCELLATION").collect();
        assert_eq!(cancellation.len(), 1);
        assert_ne!(cancellation[0].status, "CANCELLED");
    }

    #[tokio::test]
    async fn one_failing_expiry_does_not_stop_the_others() {
        let Some(pool) = test_pool().await else { return };
        let admin = seed_admin(&pool).await;
        let prof = seed_professional(&pool).await;
        let (p1, p2) = (seed_patient(&pool, None).await, seed_patient(&pool, None).await);
        let t0 = at(2000, 6, 1, 8, 0);

        let mut booked = Vec::new();
        for (patient, hour) in [(p1, 9), (p2, 11)] {
            let row = create_appointment(
                &pool,
                NewAppointment {
                    patient_id: patient,
                    professional_id: prof,
                    start_at: at(2000, 6, 10, hour, 0),
                    end_at: at(2000, 6, 10, hour, 30),
                },
                Actor::User(&admin),
                Scope::Any,
                t0,
            )
            .await
            .unwrap();
            booked.push(row);
        }
        let (stuck, fine) = (&booked[0], &booked[1]);

        // Occupy the cancellation key so expiring `stuck` fails at enqueue.
        sqlx::query(
            r#"
            INSERT INTO notification (patient_id, channel, kind, message, scheduled_for, dedupe_key)
            VALUES ($1, 'whatsapp', 'CANCELLATION', 'taken', $2, $3)
            "#,
        )
        .bind(p1)
        .bind(t0)
        .bind(format!("appointment:{}:CANCELLATION", stuck.appointment_id))
        .execute(&pool)
        .await
        .unwrap();

        let sweeper = Sweeper::new(pool.clone(), StdDuration::from_secs(60), Duration::hours(48));
        let report = sweeper.run_once(t0 + Duration::hours(49)).await;
        assert!(report.failures >= 1);

        let s = by_id(&pool, &admin, Scope::Any, stuck.appointment_id).await.unwrap();
        assert_eq!(s.state().unwrap(), StateCode::Reserved);
        assert!(s.cancelled_at.is_none());

        let f = by_id(&pool, &admin, Scope::Any, fine.appointment_id).await.unwrap();
        assert_eq!(f.state().unwrap(), StateCode::Cancelled);
    }

    #[tokio::test]
    async fn a_failed_lookup_still_runs_the_other_pass() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap();
        pool.close().await;

        let sweeper = Sweeper::new(pool, StdDuration::from_secs(60), Duration::hours(48));
        let report = sweeper.run_once(at(2030, 1, 1, 0, 0)).await;
        assert_eq!(
            report,
            SweepReport {
                expired: 0,
                no_shows: 0,
                failures: 2,
            }
        );
    }
}
