// Copyright 2026 Pardosa Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::runtime::Shutdown;
use sqlx::{PgPool, Row};
use std::time::Duration as StdDuration;
use time::OffsetDateTime;
use uuid::Uuid;

/// What one recovery pass did and saw.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JanitorReport {
    /// Expired leases put back to PENDING.
    pub reclaimed: u64,
    /// Expired leases moved to FAILED because their attempts ran out.
    pub failed_out: u64,
    /// Terminal rows past retention that were deleted.
    pub purged: u64,
    pub pending: u64,
    pub in_flight: u64,
    pub done: u64,
    pub failed: u64,
    pub skipped: u64,
    pub oldest_pending_age: Option<time::Duration>,
    pub oldest_in_flight_age: Option<time::Duration>,
}

/// Periodic janitor for the durable queue: reclaims stuck leases, prunes
/// old terminal rows and reports a health snapshot. Idempotent, safe to run
/// at session start to absorb orphans of a crashed process.
#[derive(Debug, Clone)]
pub struct QueueJanitor {
    pool: PgPool,
    session_id: Uuid,
    max_retries: u32,
    retention: time::Duration,
}

impl QueueJanitor {
    pub fn new(pool: PgPool, session_id: Uuid, max_retries: u32, retention: time::Duration) -> Self {
        Self {
            pool,
            session_id,
            max_retries,
            retention,
        }
    }

    pub async fn run_once(&self) -> Result<JanitorReport, sqlx::Error> {
        let now = OffsetDateTime::now_utc();
        let mut report = JanitorReport::default();

        // Order matters for idempotence: exhausted rows must fail out
        // before the reclaim pass would hand them another attempt.
        report.failed_out = sqlx::query(
            r#"
            UPDATE url_queue
            SET status = 'FAILED', attempts = attempts + 1, leased_until = NULL,
                last_error = 'lease expired'
            WHERE session_id = $1 AND status = 'IN_FLIGHT' AND leased_until < $2
              AND attempts + 1 > $3
            "#,
        )
        .bind(self.session_id)
        .bind(now)
        .bind(self.max_retries as i32)
        .execute(&self.pool)
        .await?
        .rows_affected();

        report.reclaimed = sqlx::query(
            r#"
            UPDATE url_queue
            SET status = 'PENDING', attempts = attempts + 1, leased_until = NULL
            WHERE session_id = $1 AND status = 'IN_FLIGHT' AND leased_until < $2
            "#,
        )
        .bind(self.session_id)
        .bind(now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        report.purged = sqlx::query(
            r#"
            DELETE FROM url_queue
            WHERE session_id = $1 AND status IN ('DONE','FAILED','SKIPPED')
              AND discovered_at < $2
            "#,
        )
        .bind(self.session_id)
        .bind(now - self.retention)
        .execute(&self.pool)
        .await?
        .rows_affected();

        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS n, MIN(discovered_at) AS oldest
            FROM url_queue WHERE session_id = $1 GROUP BY status
            "#,
        )
        .bind(self.session_id)
        .fetch_all(&self.pool)
        .await?;
        for row in rows {
            let status: String = row.get("status");
            let n = row.get::<i64, _>("n").max(0) as u64;
            let age = row
                .get::<Option<OffsetDateTime>, _>("oldest")
                .map(|oldest| now - oldest);
            match status.as_str() {
                "PENDING" => {
                    report.pending = n;
                    report.oldest_pending_age = age;
                }
                "IN_FLIGHT" => {
                    report.in_flight = n;
                    report.oldest_in_flight_age = age;
                }
                "DONE" => report.done = n,
                "FAILED" => report.failed = n,
                "SKIPPED" => report.skipped = n,
                other => log::warn!("Unknown status {other:?} in url_queue"),
            }
        }

        if report.reclaimed > 0 || report.failed_out > 0 || report.purged > 0 {
            log::info!(
                "Recovery: reclaimed {}, failed out {}, purged {} (pending {}, in flight {})",
                report.reclaimed,
                report.failed_out,
                report.purged,
                report.pending,
                report.in_flight
            );
        }
        Ok(report)
    }

    /// Releases every lease of the session regardless of expiry. Used on
    /// cancellation and fatal shutdown, where workers will not come back
    /// for their urls.
    pub async fn release_all_in_flight(&self) -> Result<u64, sqlx::Error> {
        let released = sqlx::query(
            r#"
            UPDATE url_queue
            SET status = 'PENDING', leased_until = NULL
            WHERE session_id = $1 AND status = 'IN_FLIGHT'
            "#,
        )
        .bind(self.session_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(released)
    }

    /// Runs `run_once` on the given cadence until the token cancels.
    pub fn spawn(self, interval: StdDuration, shutdown: Shutdown) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.wait() => break,
                    _ = tokio::time::sleep(interval) => {
                        if let Err(err) = self.run_once().await {
                            log::error!("Recovery pass failed: {err}");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    /// Database-backed tests; they need `PARDOSA_TEST_DATABASE_URL` and
    /// pass vacuously without it.
    async fn test_pool() -> Option<PgPool> {
        let dsn = std::env::var("PARDOSA_TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&dsn).await.ok()?;
        crate::store::schema::apply(&pool).await.ok()?;
        Some(pool)
    }

    async fn seed_in_flight(
        pool: &PgPool,
        session: Uuid,
        url: &str,
        attempts: i32,
        leased_until: OffsetDateTime,
    ) {
        sqlx::query(
            r#"
            INSERT INTO url_queue
                (session_id, url, depth, priority, status, attempts, discovered_at, leased_until)
            VALUES ($1, $2, 0, 0, 'IN_FLIGHT', $3, now(), $4)
            "#,
        )
        .bind(session)
        .bind(url)
        .bind(attempts)
        .bind(leased_until)
        .execute(pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn expired_leases_are_reclaimed_or_failed_out() {
        let Some(pool) = test_pool().await else { return };
        let session = Uuid::new_v4();
        let expired = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        seed_in_flight(&pool, session, "http://h/retryable", 0, expired).await;
        seed_in_flight(&pool, session, "http://h/exhausted", 3, expired).await;
        // A live lease stays untouched.
        seed_in_flight(
            &pool,
            session,
            "http://h/live",
            0,
            OffsetDateTime::now_utc() + time::Duration::minutes(5),
        )
        .await;

        let janitor = QueueJanitor::new(pool, session, 3, time::Duration::days(7));
        let report = janitor.run_once().await.unwrap();
        assert_eq!(1, report.reclaimed);
        assert_eq!(1, report.failed_out);
        assert_eq!(1, report.pending);
        assert_eq!(1, report.in_flight);
        assert_eq!(1, report.failed);
    }

    #[tokio::test]
    async fn recovery_is_idempotent() {
        let Some(pool) = test_pool().await else { return };
        let session = Uuid::new_v4();
        let expired = OffsetDateTime::now_utc() - time::Duration::minutes(5);
        seed_in_flight(&pool, session, "http://h/a", 0, expired).await;

        let janitor = QueueJanitor::new(pool, session, 3, time::Duration::days(7));
        let first = janitor.run_once().await.unwrap();
        assert_eq!(1, first.reclaimed);
        let second = janitor.run_once().await.unwrap();
        assert_eq!(0, second.reclaimed);
        assert_eq!(0, second.failed_out);
        assert_eq!(first.pending, second.pending);
    }

    #[tokio::test]
    async fn old_terminal_rows_are_purged() {
        let Some(pool) = test_pool().await else { return };
        let session = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO url_queue
                (session_id, url, depth, priority, status, attempts, discovered_at)
            VALUES ($1, 'http://h/old', 0, 0, 'DONE', 0, now() - interval '30 days'),
                   ($1, 'http://h/fresh', 0, 0, 'DONE', 0, now())
            "#,
        )
        .bind(session)
        .execute(&pool)
        .await
        .unwrap();

        let janitor = QueueJanitor::new(pool, session, 3, time::Duration::days(7));
        let report = janitor.run_once().await.unwrap();
        assert_eq!(1, report.purged);
        assert_eq!(1, report.done);
    }

    #[tokio::test]
    async fn release_all_in_flight_ignores_expiry() {
        let Some(pool) = test_pool().await else { return };
        let session = Uuid::new_v4();
        seed_in_flight(
            &pool,
            session,
            "http://h/live",
            0,
            OffsetDateTime::now_utc() + time::Duration::minutes(5),
        )
        .await;
        let janitor = QueueJanitor::new(pool, session, 3, time::Duration::days(7));
        assert_eq!(1, janitor.release_all_in_flight().await.unwrap());
        let report = janitor.run_once().await.unwrap();
        assert_eq!(1, report.pending);
        assert_eq!(0, report.in_flight);
    }
}
