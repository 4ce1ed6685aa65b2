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

mod memory;
mod pg;
pub mod schema;

pub use memory::MemoryStore;
pub use pg::PgStore;

use crate::analyze::WordStats;
use crate::queue::UrlStatus;
use crate::session::metrics::MetricsSnapshot;
use crate::session::SessionState;
use crate::url::NormalizedUrl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use strum::{Display, EnumString};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Immutable configuration snapshot written when a session opens.
#[derive(Debug, Clone)]
pub struct SessionMeta {
    pub session_id: Uuid,
    pub name: String,
    pub seed_urls: Vec<String>,
    pub max_depth: u16,
    pub max_pages: u64,
    pub worker_count: usize,
    pub rate_limit_delay: time::Duration,
    pub user_agent: String,
    pub started_at: OffsetDateTime,
}

/// Per-stage durations of one processed url, all optional because the
/// pipeline may end early. `persist` is measured by the session around the
/// store call and surfaces in logs; the page row keeps the pipeline stages.
#[derive(Debug, Default, Clone, Copy)]
pub struct StageTimings {
    pub dns: Option<StdDuration>,
    pub connect: Option<StdDuration>,
    pub first_byte: Option<StdDuration>,
    pub fetch: Option<StdDuration>,
    pub parse: Option<StdDuration>,
    pub extract: Option<StdDuration>,
    pub analyze: Option<StdDuration>,
    pub persist: Option<StdDuration>,
}

/// The persisted record of one successful fetch.
#[derive(Debug, Clone)]
pub struct PageRecord {
    pub session_id: Uuid,
    pub url: NormalizedUrl,
    pub final_url: Option<String>,
    pub http_status: u16,
    pub content_type: Option<String>,
    pub title: Option<String>,
    pub text_length: u64,
    pub word_count: u64,
    pub unique_words: u64,
    pub body_size: u64,
    pub timings: StageTimings,
    pub crawled_at: OffsetDateTime,
}

/// Whether a link leaves its source host.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LinkKind {
    Internal,
    External,
}

#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub dest_url: String,
    pub kind: LinkKind,
}

/// One failed or skipped url, kept for the post-mortem.
#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub url: String,
    pub kind: crate::error::CrawlErrorKind,
    pub message: String,
    pub occurred_at: OffsetDateTime,
}

/// The queue transition that belongs to a page persist. The durable store
/// applies it inside the same transaction, making page persistence and
/// queue completion atomic.
#[derive(Debug, Clone)]
pub struct QueueCompletion {
    pub url: NormalizedUrl,
    pub status: UrlStatus,
    pub last_error: Option<String>,
}

/// Terminal counters written into `crawl_sessions` on close.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub pages_crawled: u64,
    pub bytes_processed: u64,
    pub errors: u64,
    pub fatal_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("store retry budget exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },
    #[error("session {0} is not open")]
    UnknownSession(Uuid),
}

impl StoreError {
    /// Errors beyond the store's own retry budget are fatal to the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }
}

/// Transactional persistence of pages, links, word counts and metrics.
#[async_trait]
pub trait Storage: Send + Sync + std::fmt::Debug {
    async fn open_session(&self, meta: &SessionMeta) -> Result<(), StoreError>;

    /// Upserts the page and bulk-inserts its words and links in one
    /// transaction; `completion`, when given, joins that transaction.
    async fn record_page(
        &self,
        page: &PageRecord,
        words: &WordStats,
        links: &[LinkRecord],
        completion: Option<&QueueCompletion>,
    ) -> Result<(), StoreError>;

    async fn record_metric(
        &self,
        session_id: Uuid,
        snapshot: &MetricsSnapshot,
    ) -> Result<(), StoreError>;

    async fn record_error_event(
        &self,
        session_id: Uuid,
        event: &ErrorEvent,
    ) -> Result<(), StoreError>;

    async fn close_session(
        &self,
        session_id: Uuid,
        state: SessionState,
        summary: &SessionSummary,
    ) -> Result<(), StoreError>;
}

pub(crate) fn millis(duration: Option<StdDuration>) -> Option<i64> {
    duration.map(|d| d.as_millis().min(i64::MAX as u128) as i64)
}
