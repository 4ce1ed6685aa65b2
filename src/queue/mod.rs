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

mod durable;
mod errors;
mod memory;

pub use durable::DurableUrlQueue;
pub use errors::QueueError;
pub use memory::MemoryUrlQueue;

use crate::error::{CrawlError, CrawlErrorKind};
use crate::url::NormalizedUrl;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration as StdDuration;
use strum::{Display, EnumString};
use time::OffsetDateTime;
use uuid::Uuid;

/// Lifecycle of one queued url. The names double as the column values of
/// the durable backend.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum UrlStatus {
    Pending,
    InFlight,
    Done,
    Failed,
    Skipped,
}

impl UrlStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Skipped)
    }
}

/// A url offered to the queue.
#[derive(Debug, Clone)]
pub struct UrlCandidate {
    pub url: NormalizedUrl,
    pub parent: Option<NormalizedUrl>,
    pub depth: u16,
    pub priority: i32,
}

impl UrlCandidate {
    pub fn seed(url: NormalizedUrl, priority: i32) -> Self {
        Self {
            url,
            parent: None,
            depth: 0,
            priority,
        }
    }
}

/// A leased work item, exclusively owned until completed or released.
#[derive(Debug, Clone)]
pub struct QueuedUrl {
    pub session_id: Uuid,
    pub url: NormalizedUrl,
    pub parent: Option<NormalizedUrl>,
    pub depth: u16,
    pub priority: i32,
    pub discovered_at: OffsetDateTime,
    pub attempts: u32,
}

/// Answer of [`UrlQueue::enqueue`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
pub enum EnqueueOutcome {
    Accepted,
    Duplicate,
    DepthExceeded,
    LimitReached,
}

/// Answer of [`UrlQueue::lease`].
#[derive(Debug)]
pub enum LeaseOutcome {
    Leased(QueuedUrl),
    /// Nothing eligible within the timeout.
    Empty,
    /// The queue was closed.
    Closed,
}

/// How a leased url ended.
#[derive(Debug, Clone)]
pub enum UrlOutcome {
    Done,
    Skipped { reason: CrawlErrorKind },
    Failed { error: CrawlError, retryable: bool },
}

impl UrlOutcome {
    pub fn terminal_status(&self) -> UrlStatus {
        match self {
            Self::Done => UrlStatus::Done,
            Self::Skipped { .. } => UrlStatus::Skipped,
            Self::Failed { .. } => UrlStatus::Failed,
        }
    }

    pub fn last_error(&self) -> Option<String> {
        match self {
            Self::Done => None,
            Self::Skipped { reason } => Some(reason.to_string()),
            Self::Failed { error, .. } => Some(error.to_string()),
        }
    }
}

/// Counts per bucket as reported by [`UrlQueue::size`].
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct QueueStats {
    pub pending: u64,
    pub in_flight: u64,
    pub terminal: u64,
}

/// The knobs both backends share.
#[derive(Debug, Clone)]
pub struct QueueTuning {
    pub max_depth: u16,
    /// Admission cap; mirrors the session's page budget.
    pub max_items: u64,
    pub max_retries: u32,
    pub lease_duration: time::Duration,
    /// Base of the retry backoff, the configured rate-limit delay.
    pub backoff_base: time::Duration,
}

impl QueueTuning {
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            max_depth: config.crawl.max_depth,
            max_items: config.crawl.max_pages,
            max_retries: config.crawl.max_retries,
            lease_duration: config.queue.queue_lease_duration,
            backoff_base: config.crawl.rate_limit_delay,
        }
    }

    /// `base * 2^attempts`, capped at one minute.
    pub fn backoff(&self, attempts: u32) -> StdDuration {
        let base = self.backoff_base.unsigned_abs().max(StdDuration::from_millis(1));
        let factor = 2u32.saturating_pow(attempts.min(16));
        base.saturating_mul(factor).min(BACKOFF_CAP)
    }
}

pub const BACKOFF_CAP: StdDuration = StdDuration::from_secs(60);

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let tuning = QueueTuning {
            max_depth: 1,
            max_items: 1,
            max_retries: 10,
            lease_duration: time::Duration::seconds(120),
            backoff_base: time::Duration::seconds(1),
        };
        assert_eq!(StdDuration::from_secs(2), tuning.backoff(1));
        assert_eq!(StdDuration::from_secs(4), tuning.backoff(2));
        assert_eq!(StdDuration::from_secs(8), tuning.backoff(3));
        assert_eq!(BACKOFF_CAP, tuning.backoff(6));
        assert_eq!(BACKOFF_CAP, tuning.backoff(32));
    }
}

/// Priority-ordered FIFO of pending urls. Ordering of `lease`: priority
/// descending, then depth ascending, then discovery time ascending. Both
/// backends apply the retry state machine in `complete`: a retryable
/// failure below the attempt budget re-enters Pending with a backoff
/// timestamp, everything else is terminal.
#[async_trait]
pub trait UrlQueue: Send + Sync + std::fmt::Debug {
    async fn enqueue(&self, candidate: UrlCandidate) -> Result<EnqueueOutcome, QueueError>;

    /// Leases the best eligible item, waiting up to `timeout` for one to
    /// appear. The caller owns the item until `complete` or `release`.
    async fn lease(&self, timeout: StdDuration) -> Result<LeaseOutcome, QueueError>;

    async fn complete(&self, url: &NormalizedUrl, outcome: UrlOutcome) -> Result<(), QueueError>;

    /// Puts an in-flight url back to Pending, counting an attempt. Used on
    /// cooperative cancel and by crash recovery.
    async fn release(&self, url: &NormalizedUrl) -> Result<(), QueueError>;

    async fn size(&self) -> Result<QueueStats, QueueError>;

    /// Rejects further enqueues and unblocks waiting leasers.
    async fn close(&self);
}
