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

use super::errors::QueueError;
use super::{
    EnqueueOutcome, LeaseOutcome, QueueStats, QueueTuning, QueuedUrl, UrlCandidate, UrlOutcome,
    UrlQueue, UrlStatus,
};
use crate::url::NormalizedUrl;
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration as StdDuration;
use time::OffsetDateTime;
use uuid::Uuid;

/// How often an idle leaser re-polls the table. The database cannot push.
const POLL_INTERVAL: StdDuration = StdDuration::from_millis(200);

/// The relational queue backend. Isolation comes from the database: the
/// lease statement locks its candidate row with `SKIP LOCKED`, so any number
/// of leasers in any number of processes never double-deliver. Rows survive
/// a crash; recovery reclaims their leases.
#[derive(Debug)]
pub struct DurableUrlQueue {
    pool: PgPool,
    session_id: Uuid,
    tuning: QueueTuning,
    /// Process-local admission count, seeded from the table on open so a
    /// resumed session keeps honoring the cap.
    accepted: AtomicU64,
    closed: AtomicBool,
}

impl DurableUrlQueue {
    /// Expects the schema to exist (the store applies it on session open).
    pub async fn open(
        pool: PgPool,
        session_id: Uuid,
        tuning: QueueTuning,
    ) -> Result<Self, QueueError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM url_queue WHERE session_id = $1")
            .bind(session_id)
            .fetch_one(&pool)
            .await?;
        let accepted: i64 = row.get("n");
        Ok(Self {
            pool,
            session_id,
            tuning,
            accepted: AtomicU64::new(accepted.max(0) as u64),
            closed: AtomicBool::new(false),
        })
    }

    fn decode(&self, row: &PgRow) -> Result<QueuedUrl, QueueError> {
        let raw: String = row.get("url");
        let url = url::Url::parse(&raw).map_err(|_| QueueError::UnknownUrl(raw.clone()))?;
        let parent = row
            .get::<Option<String>, _>("parent_url")
            .and_then(|p| url::Url::parse(&p).ok())
            .map(NormalizedUrl::from_canonical);
        Ok(QueuedUrl {
            session_id: self.session_id,
            url: NormalizedUrl::from_canonical(url),
            parent,
            depth: row.get::<i32, _>("depth").clamp(0, u16::MAX as i32) as u16,
            priority: row.get("priority"),
            discovered_at: row.get("discovered_at"),
            attempts: row.get::<i32, _>("attempts").max(0) as u32,
        })
    }

    async fn try_lease(&self) -> Result<Option<QueuedUrl>, QueueError> {
        let now = OffsetDateTime::now_utc();
        let leased_until = now + self.tuning.lease_duration;
        let row = sqlx::query(
            r#"
            WITH candidate AS (
                SELECT url FROM url_queue
                WHERE session_id = $1
                  AND status = 'PENDING'
                  AND (not_before IS NULL OR not_before <= $2)
                ORDER BY priority DESC, depth ASC, discovered_at ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE url_queue q
            SET status = 'IN_FLIGHT', leased_until = $3
            FROM candidate c
            WHERE q.session_id = $1 AND q.url = c.url
            RETURNING q.url, q.parent_url, q.depth, q.priority, q.discovered_at, q.attempts
            "#,
        )
        .bind(self.session_id)
        .bind(now)
        .bind(leased_until)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| self.decode(&row)).transpose()
    }

    /// Terminal status of a url, for inspection after the crawl.
    pub async fn status_of(
        &self,
        url: &NormalizedUrl,
    ) -> Result<Option<(UrlStatus, Option<String>)>, QueueError> {
        let row = sqlx::query(
            "SELECT status, last_error FROM url_queue WHERE session_id = $1 AND url = $2",
        )
        .bind(self.session_id)
        .bind(url.as_str())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|row| {
            let status: String = row.get("status");
            let status = UrlStatus::from_str(&status)
                .map_err(|_| QueueError::UnknownUrl(url.to_string()))?;
            Ok((status, row.get("last_error")))
        })
        .transpose()
    }
}

#[async_trait]
impl UrlQueue for DurableUrlQueue {
    async fn enqueue(&self, candidate: UrlCandidate) -> Result<EnqueueOutcome, QueueError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed);
        }
        if candidate.depth > self.tuning.max_depth {
            return Ok(EnqueueOutcome::DepthExceeded);
        }
        if self.accepted.load(Ordering::Acquire) >= self.tuning.max_items {
            return Ok(EnqueueOutcome::LimitReached);
        }
        let done = sqlx::query(
            r#"
            INSERT INTO url_queue
                (session_id, url, parent_url, depth, priority, status, attempts, discovered_at)
            VALUES ($1, $2, $3, $4, $5, 'PENDING', 0, $6)
            ON CONFLICT (session_id, url) DO NOTHING
            "#,
        )
        .bind(self.session_id)
        .bind(candidate.url.as_str())
        .bind(candidate.parent.as_ref().map(|p| p.as_str()))
        .bind(candidate.depth as i32)
        .bind(candidate.priority)
        .bind(OffsetDateTime::now_utc())
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return Ok(EnqueueOutcome::Duplicate);
        }
        self.accepted.fetch_add(1, Ordering::AcqRel);
        Ok(EnqueueOutcome::Accepted)
    }

    async fn lease(&self, timeout: StdDuration) -> Result<LeaseOutcome, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Ok(LeaseOutcome::Closed);
            }
            if let Some(leased) = self.try_lease().await? {
                return Ok(LeaseOutcome::Leased(leased));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(LeaseOutcome::Empty);
            }
            tokio::time::sleep_until(now.checked_add(POLL_INTERVAL).unwrap_or(deadline).min(deadline))
                .await;
        }
    }

    async fn complete(&self, url: &NormalizedUrl, outcome: UrlOutcome) -> Result<(), QueueError> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT status, attempts FROM url_queue WHERE session_id = $1 AND url = $2 FOR UPDATE",
        )
        .bind(self.session_id)
        .bind(url.as_str())
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| QueueError::UnknownUrl(url.to_string()))?;

        let status: String = row.get("status");
        let status =
            UrlStatus::from_str(&status).map_err(|_| QueueError::UnknownUrl(url.to_string()))?;
        if status != UrlStatus::InFlight {
            return Err(QueueError::InvalidTransition {
                url: url.to_string(),
                actual: status,
                expected: UrlStatus::InFlight,
            });
        }
        let attempts = row.get::<i32, _>("attempts").max(0) as u32;

        match &outcome {
            UrlOutcome::Failed { error, retryable }
                if *retryable && attempts + 1 <= self.tuning.max_retries =>
            {
                let not_before =
                    OffsetDateTime::now_utc() + self.tuning.backoff(attempts + 1);
                sqlx::query(
                    r#"
                    UPDATE url_queue
                    SET status = 'PENDING', attempts = attempts + 1, last_error = $3,
                        leased_until = NULL, not_before = $4
                    WHERE session_id = $1 AND url = $2
                    "#,
                )
                .bind(self.session_id)
                .bind(url.as_str())
                .bind(error.to_string())
                .bind(not_before)
                .execute(&mut *tx)
                .await?;
            }
            outcome => {
                let attempts_bump = matches!(outcome, UrlOutcome::Failed { retryable: true, .. });
                sqlx::query(
                    r#"
                    UPDATE url_queue
                    SET status = $3, attempts = attempts + $4, last_error = $5,
                        leased_until = NULL, not_before = NULL
                    WHERE session_id = $1 AND url = $2
                    "#,
                )
                .bind(self.session_id)
                .bind(url.as_str())
                .bind(outcome.terminal_status().to_string())
                .bind(if attempts_bump { 1i32 } else { 0i32 })
                .bind(outcome.last_error())
                .execute(&mut *tx)
                .await?;
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn release(&self, url: &NormalizedUrl) -> Result<(), QueueError> {
        let done = sqlx::query(
            r#"
            UPDATE url_queue
            SET status = 'PENDING', attempts = attempts + 1, leased_until = NULL
            WHERE session_id = $1 AND url = $2 AND status = 'IN_FLIGHT'
            "#,
        )
        .bind(self.session_id)
        .bind(url.as_str())
        .execute(&self.pool)
        .await?;
        if done.rows_affected() == 0 {
            return match self.status_of(url).await? {
                Some((actual, _)) => Err(QueueError::InvalidTransition {
                    url: url.to_string(),
                    actual,
                    expected: UrlStatus::InFlight,
                }),
                None => Err(QueueError::UnknownUrl(url.to_string())),
            };
        }
        Ok(())
    }

    async fn size(&self) -> Result<QueueStats, QueueError> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS n FROM url_queue WHERE session_id = $1 GROUP BY status",
        )
        .bind(self.session_id)
        .fetch_all(&self.pool)
        .await?;
        let mut stats = QueueStats::default();
        for row in rows {
            let status: String = row.get("status");
            let n = row.get::<i64, _>("n").max(0) as u64;
            match UrlStatus::from_str(&status) {
                Ok(UrlStatus::Pending) => stats.pending += n,
                Ok(UrlStatus::InFlight) => stats.in_flight += n,
                Ok(_) => stats.terminal += n,
                Err(_) => {
                    log::warn!("Unknown status {status:?} in url_queue, counting as terminal");
                    stats.terminal += n;
                }
            }
        }
        Ok(stats)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{CrawlError, CrawlErrorKind};
    use crate::url::UrlNormalizer;

    /// These tests need a database. Point `PARDOSA_TEST_DATABASE_URL` at a
    /// scratch postgres to run them; without it they pass vacuously.
    async fn test_pool() -> Option<PgPool> {
        let dsn = std::env::var("PARDOSA_TEST_DATABASE_URL").ok()?;
        let pool = PgPool::connect(&dsn).await.ok()?;
        crate::store::schema::apply(&pool).await.ok()?;
        Some(pool)
    }

    fn url(raw: &str) -> NormalizedUrl {
        UrlNormalizer::new(&[], 2048, false).normalize(raw).unwrap()
    }

    fn tuning() -> QueueTuning {
        QueueTuning {
            max_depth: 3,
            max_items: 100,
            max_retries: 3,
            lease_duration: time::Duration::seconds(120),
            backoff_base: time::Duration::milliseconds(10),
        }
    }

    fn candidate(raw: &str, depth: u16, priority: i32) -> UrlCandidate {
        UrlCandidate {
            url: url(raw),
            parent: None,
            depth,
            priority,
        }
    }

    async fn lease_url(queue: &DurableUrlQueue) -> QueuedUrl {
        match queue.lease(StdDuration::from_secs(1)).await.unwrap() {
            LeaseOutcome::Leased(leased) => leased,
            other => panic!("expected a lease, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn enqueue_is_an_idempotent_upsert() {
        let Some(pool) = test_pool().await else { return };
        let q = DurableUrlQueue::open(pool, Uuid::new_v4(), tuning()).await.unwrap();
        assert_eq!(
            EnqueueOutcome::Accepted,
            q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap()
        );
        assert_eq!(
            EnqueueOutcome::Duplicate,
            q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap()
        );
        assert_eq!(
            EnqueueOutcome::DepthExceeded,
            q.enqueue(candidate("http://h/deep", 9, 0)).await.unwrap()
        );
    }

    #[tokio::test]
    async fn lease_order_matches_the_index() {
        let Some(pool) = test_pool().await else { return };
        let q = DurableUrlQueue::open(pool, Uuid::new_v4(), tuning()).await.unwrap();
        q.enqueue(candidate("http://h/low", 0, 1)).await.unwrap();
        q.enqueue(candidate("http://h/deep", 2, 5)).await.unwrap();
        q.enqueue(candidate("http://h/shallow", 1, 5)).await.unwrap();
        assert_eq!("http://h/shallow", lease_url(&q).await.url.as_str());
        assert_eq!("http://h/deep", lease_url(&q).await.url.as_str());
        assert_eq!("http://h/low", lease_url(&q).await.url.as_str());
    }

    #[tokio::test]
    async fn no_double_delivery_under_concurrent_leasers() {
        let Some(pool) = test_pool().await else { return };
        let q = std::sync::Arc::new(
            DurableUrlQueue::open(pool, Uuid::new_v4(), tuning()).await.unwrap(),
        );
        for i in 0..8 {
            q.enqueue(candidate(&format!("http://h/{i}"), 0, 0)).await.unwrap();
        }
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let LeaseOutcome::Leased(leased) =
                    q.lease(StdDuration::from_millis(300)).await.unwrap()
                {
                    seen.push(leased.url.to_string());
                }
                seen
            }));
        }
        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        let before = all.len();
        all.dedup();
        assert_eq!(before, all.len(), "a url was delivered twice");
        assert_eq!(8, all.len());
    }

    #[tokio::test]
    async fn retryable_failure_sets_backoff_and_recounts() {
        let Some(pool) = test_pool().await else { return };
        let q = DurableUrlQueue::open(pool, Uuid::new_v4(), tuning()).await.unwrap();
        q.enqueue(candidate("http://h/flaky", 0, 0)).await.unwrap();
        let leased = lease_url(&q).await;
        q.complete(
            &leased.url,
            UrlOutcome::Failed {
                error: CrawlError::new(CrawlErrorKind::HttpServerError, "http status 503"),
                retryable: true,
            },
        )
        .await
        .unwrap();
        // Backoff base is 10ms, so the retry shows up quickly.
        let leased = lease_url(&q).await;
        assert_eq!(1, leased.attempts);
        q.complete(&leased.url, UrlOutcome::Done).await.unwrap();
        let (status, _) = q.status_of(&leased.url).await.unwrap().unwrap();
        assert_eq!(UrlStatus::Done, status);
    }

    #[tokio::test]
    async fn skip_and_size_round_trip() {
        let Some(pool) = test_pool().await else { return };
        let q = DurableUrlQueue::open(pool, Uuid::new_v4(), tuning()).await.unwrap();
        q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap();
        q.enqueue(candidate("http://h/b", 0, 0)).await.unwrap();
        let leased = lease_url(&q).await;
        q.complete(
            &leased.url,
            UrlOutcome::Skipped {
                reason: CrawlErrorKind::DisallowedByRobots,
            },
        )
        .await
        .unwrap();
        let stats = q.size().await.unwrap();
        assert_eq!(
            QueueStats {
                pending: 1,
                in_flight: 0,
                terminal: 1
            },
            stats
        );
        let (status, reason) = q.status_of(&leased.url).await.unwrap().unwrap();
        assert_eq!(UrlStatus::Skipped, status);
        assert_eq!(Some("DISALLOWED_BY_ROBOTS".to_string()), reason);
    }

    #[tokio::test]
    async fn accepted_count_survives_reopen() {
        let Some(pool) = test_pool().await else { return };
        let session = Uuid::new_v4();
        let limited = QueueTuning {
            max_items: 2,
            ..tuning()
        };
        {
            let q = DurableUrlQueue::open(pool.clone(), session, limited.clone()).await.unwrap();
            q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap();
            q.enqueue(candidate("http://h/b", 0, 0)).await.unwrap();
        }
        let q = DurableUrlQueue::open(pool, session, limited).await.unwrap();
        assert_eq!(
            EnqueueOutcome::LimitReached,
            q.enqueue(candidate("http://h/c", 0, 0)).await.unwrap()
        );
    }
}
