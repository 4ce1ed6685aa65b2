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

use super::{
    millis, ErrorEvent, LinkRecord, PageRecord, QueueCompletion, SessionMeta, SessionSummary,
    Storage, StoreError,
};
use crate::analyze::WordStats;
use crate::session::metrics::MetricsSnapshot;
use crate::session::SessionState;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::time::Duration as StdDuration;
use time::OffsetDateTime;
use uuid::Uuid;

/// Pause between store retries; short, the budget is what bounds it.
const RETRY_PAUSE: StdDuration = StdDuration::from_millis(250);

/// The postgres persistence layer. Every operation runs inside its own
/// transaction and is retried up to the configured budget; exhaustion is a
/// fatal [`StoreError::Exhausted`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
    retry_budget: u32,
}

impl PgStore {
    /// Connects, applies the schema and returns the store.
    pub async fn connect(config: &crate::config::DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.connection_string())
            .await?;
        super::schema::apply(&pool).await?;
        Ok(Self {
            pool,
            retry_budget: config.store_retry_budget,
        })
    }

    pub fn with_pool(pool: PgPool, retry_budget: u32) -> Self {
        Self { pool, retry_budget }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn retryable(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed
        )
    }

    /// Runs `op`, retrying transient failures within the budget.
    async fn with_retries<T, F, Fut>(&self, mut op: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
    {
        let mut attempt = 0u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if Self::retryable(&err) && attempt < self.retry_budget => {
                    attempt += 1;
                    log::warn!("Store operation failed (attempt {attempt}): {err}. Retrying.");
                    tokio::time::sleep(RETRY_PAUSE).await;
                }
                Err(err) if Self::retryable(&err) => {
                    return Err(StoreError::Exhausted {
                        attempts: attempt + 1,
                        last: err.to_string(),
                    });
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn insert_page_tx(
        pool: &PgPool,
        page: &PageRecord,
        words: &WordStats,
        links: &[LinkRecord],
        completion: Option<&QueueCompletion>,
    ) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO pages
                (session_id, url, final_url, http_status, content_type, title,
                 text_length, word_count, unique_words, body_size,
                 fetch_ms, first_byte_ms, parse_ms, extract_ms, analyze_ms,
                 crawled_at)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16)
            ON CONFLICT (session_id, url) DO UPDATE SET
                final_url = EXCLUDED.final_url,
                http_status = EXCLUDED.http_status,
                content_type = EXCLUDED.content_type,
                title = EXCLUDED.title,
                text_length = EXCLUDED.text_length,
                word_count = EXCLUDED.word_count,
                unique_words = EXCLUDED.unique_words,
                body_size = EXCLUDED.body_size,
                crawled_at = EXCLUDED.crawled_at
            "#,
        )
        .bind(page.session_id)
        .bind(page.url.as_str())
        .bind(page.final_url.as_deref())
        .bind(page.http_status as i32)
        .bind(page.content_type.as_deref())
        .bind(page.title.as_deref())
        .bind(page.text_length as i64)
        .bind(page.word_count as i64)
        .bind(page.unique_words as i64)
        .bind(page.body_size as i64)
        .bind(millis(page.timings.fetch))
        .bind(millis(page.timings.first_byte))
        .bind(millis(page.timings.parse))
        .bind(millis(page.timings.extract))
        .bind(millis(page.timings.analyze))
        .bind(page.crawled_at)
        .execute(&mut *tx)
        .await?;

        // Re-crawls (lease reclaimed after a crash) fully replace the word
        // set, stale rows from the first pass must not survive.
        sqlx::query("DELETE FROM word_frequencies WHERE session_id = $1 AND url = $2")
            .bind(page.session_id)
            .bind(page.url.as_str())
            .execute(&mut *tx)
            .await?;
        let (mut word_col, mut count_col) = (Vec::new(), Vec::new());
        for (word, count) in &words.frequencies {
            word_col.push(word.as_str().to_string());
            count_col.push(*count as i64);
        }
        if !word_col.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO word_frequencies (session_id, url, word, count)
                SELECT $1, $2, w, c FROM UNNEST($3::TEXT[], $4::BIGINT[]) AS t(w, c)
                "#,
            )
            .bind(page.session_id)
            .bind(page.url.as_str())
            .bind(&word_col)
            .bind(&count_col)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("DELETE FROM links WHERE session_id = $1 AND source_url = $2")
            .bind(page.session_id)
            .bind(page.url.as_str())
            .execute(&mut *tx)
            .await?;
        let (mut dest_col, mut kind_col) = (Vec::new(), Vec::new());
        for link in links {
            dest_col.push(link.dest_url.clone());
            kind_col.push(link.kind.to_string());
        }
        if !dest_col.is_empty() {
            sqlx::query(
                r#"
                INSERT INTO links (session_id, source_url, dest_url, kind)
                SELECT $1, $2, d, k FROM UNNEST($3::TEXT[], $4::TEXT[]) AS t(d, k)
                ON CONFLICT (session_id, source_url, dest_url) DO NOTHING
                "#,
            )
            .bind(page.session_id)
            .bind(page.url.as_str())
            .bind(&dest_col)
            .bind(&kind_col)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(completion) = completion {
            sqlx::query(
                r#"
                UPDATE url_queue
                SET status = $3, last_error = $4, leased_until = NULL, not_before = NULL
                WHERE session_id = $1 AND url = $2
                "#,
            )
            .bind(page.session_id)
            .bind(completion.url.as_str())
            .bind(completion.status.to_string())
            .bind(completion.last_error.as_deref())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}

#[async_trait]
impl Storage for PgStore {
    async fn open_session(&self, meta: &SessionMeta) -> Result<(), StoreError> {
        self.with_retries(|| async {
            sqlx::query(
                r#"
                INSERT INTO crawl_sessions
                    (session_id, name, seed_urls, max_depth, max_pages, worker_count,
                     rate_limit_delay_ms, user_agent, state, started_at)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,'RUNNING',$9)
                ON CONFLICT (session_id) DO UPDATE SET state = 'RUNNING'
                "#,
            )
            .bind(meta.session_id)
            .bind(&meta.name)
            .bind(&meta.seed_urls)
            .bind(meta.max_depth as i32)
            .bind(meta.max_pages as i64)
            .bind(meta.worker_count as i32)
            .bind(meta.rate_limit_delay.whole_milliseconds() as i64)
            .bind(&meta.user_agent)
            .bind(meta.started_at)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn record_page(
        &self,
        page: &PageRecord,
        words: &WordStats,
        links: &[LinkRecord],
        completion: Option<&QueueCompletion>,
    ) -> Result<(), StoreError> {
        self.with_retries(|| Self::insert_page_tx(&self.pool, page, words, links, completion))
            .await
    }

    async fn record_metric(
        &self,
        session_id: Uuid,
        snapshot: &MetricsSnapshot,
    ) -> Result<(), StoreError> {
        self.with_retries(|| async {
            sqlx::query(
                r#"
                INSERT INTO session_metrics
                    (session_id, recorded_at, pages_crawled, bytes_processed, errors,
                     pages_per_sec, bytes_per_sec, in_flight, queue_length)
                VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9)
                "#,
            )
            .bind(session_id)
            .bind(snapshot.recorded_at)
            .bind(snapshot.pages_crawled as i64)
            .bind(snapshot.bytes_processed as i64)
            .bind(snapshot.errors as i64)
            .bind(snapshot.pages_per_sec)
            .bind(snapshot.bytes_per_sec)
            .bind(snapshot.in_flight as i64)
            .bind(snapshot.queue_length as i64)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn record_error_event(
        &self,
        session_id: Uuid,
        event: &ErrorEvent,
    ) -> Result<(), StoreError> {
        self.with_retries(|| async {
            sqlx::query(
                r#"
                INSERT INTO error_events (session_id, url, kind, message, occurred_at)
                VALUES ($1,$2,$3,$4,$5)
                "#,
            )
            .bind(session_id)
            .bind(&event.url)
            .bind(event.kind.to_string())
            .bind(&event.message)
            .bind(event.occurred_at)
            .execute(&self.pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        state: SessionState,
        summary: &SessionSummary,
    ) -> Result<(), StoreError> {
        let payload = serde_json::to_value(summary)
            .unwrap_or_else(|_| serde_json::Value::Null);
        let done = self
            .with_retries(|| async {
                sqlx::query(
                    r#"
                    UPDATE crawl_sessions
                    SET state = $2, finished_at = $3, summary = $4
                    WHERE session_id = $1
                    "#,
                )
                .bind(session_id)
                .bind(state.to_string())
                .bind(OffsetDateTime::now_utc())
                .bind(&payload)
                .execute(&self.pool)
                .await
            })
            .await?;
        if done.rows_affected() == 0 {
            return Err(StoreError::UnknownSession(session_id));
        }
        Ok(())
    }
}
