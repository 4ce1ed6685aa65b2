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
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Duration as StdDuration;
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::time::Instant;
use uuid::Uuid;

/// Heap key implementing the lease order: priority descending, depth
/// ascending, discovery ascending. `seq` breaks exact timestamp ties so the
/// order stays FIFO.
#[derive(Debug, Eq, PartialEq)]
struct HeapEntry {
    priority: i32,
    depth: u16,
    discovered_at: OffsetDateTime,
    seq: u64,
    url: NormalizedUrl,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.depth.cmp(&self.depth))
            .then_with(|| other.discovered_at.cmp(&self.discovered_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A retry waiting out its backoff.
#[derive(Debug)]
struct Parked {
    wake_at: Instant,
    entry: HeapEntry,
}

#[derive(Debug)]
struct Entry {
    parent: Option<NormalizedUrl>,
    depth: u16,
    priority: i32,
    discovered_at: OffsetDateTime,
    attempts: u32,
    status: UrlStatus,
    last_error: Option<String>,
}

#[derive(Debug, Default)]
struct State {
    ready: BinaryHeap<HeapEntry>,
    parked: Vec<Parked>,
    entries: HashMap<NormalizedUrl, Entry>,
    accepted: u64,
    in_flight: u64,
    terminal: u64,
    seq: u64,
}

impl State {
    fn wake_parked(&mut self, now: Instant) -> Option<Instant> {
        let mut next_wake = None;
        let mut index = 0;
        while index < self.parked.len() {
            if self.parked[index].wake_at <= now {
                let parked = self.parked.swap_remove(index);
                self.ready.push(parked.entry);
            } else {
                next_wake = match next_wake {
                    Some(at) if at < self.parked[index].wake_at => next_wake,
                    _ => Some(self.parked[index].wake_at),
                };
                index += 1;
            }
        }
        next_wake
    }

    fn pending(&self) -> u64 {
        self.ready.len() as u64 + self.parked.len() as u64
    }
}

/// The in-memory queue backend. One coarse lock over an ordered heap plus a
/// url map; every operation is O(log n) and dwarfed by the I/O around it.
/// Work that is in flight when the process dies is lost, there is no lease
/// recovery here.
#[derive(Debug)]
pub struct MemoryUrlQueue {
    session_id: Uuid,
    tuning: QueueTuning,
    state: Mutex<State>,
    notify: Notify,
    closed: AtomicBool,
}

impl MemoryUrlQueue {
    pub fn new(session_id: Uuid, tuning: QueueTuning) -> Self {
        Self {
            session_id,
            tuning,
            state: Mutex::new(State::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Terminal status of a url, for inspection after the crawl.
    pub fn status_of(&self, url: &NormalizedUrl) -> Option<(UrlStatus, Option<String>)> {
        self.lock()
            .entries
            .get(url)
            .map(|e| (e.status, e.last_error.clone()))
    }
}

#[async_trait]
impl UrlQueue for MemoryUrlQueue {
    async fn enqueue(&self, candidate: UrlCandidate) -> Result<EnqueueOutcome, QueueError> {
        if self.closed.load(AtomicOrdering::Acquire) {
            return Err(QueueError::Closed);
        }
        if candidate.depth > self.tuning.max_depth {
            return Ok(EnqueueOutcome::DepthExceeded);
        }
        let mut state = self.lock();
        if state.entries.contains_key(&candidate.url) {
            return Ok(EnqueueOutcome::Duplicate);
        }
        if state.accepted >= self.tuning.max_items {
            return Ok(EnqueueOutcome::LimitReached);
        }
        let discovered_at = OffsetDateTime::now_utc();
        state.seq += 1;
        let seq = state.seq;
        state.entries.insert(
            candidate.url.clone(),
            Entry {
                parent: candidate.parent,
                depth: candidate.depth,
                priority: candidate.priority,
                discovered_at,
                attempts: 0,
                status: UrlStatus::Pending,
                last_error: None,
            },
        );
        state.ready.push(HeapEntry {
            priority: candidate.priority,
            depth: candidate.depth,
            discovered_at,
            seq,
            url: candidate.url,
        });
        state.accepted += 1;
        drop(state);
        self.notify.notify_one();
        Ok(EnqueueOutcome::Accepted)
    }

    async fn lease(&self, timeout: StdDuration) -> Result<LeaseOutcome, QueueError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(AtomicOrdering::Acquire) {
                return Ok(LeaseOutcome::Closed);
            }
            // Register interest before looking, otherwise an enqueue between
            // the look and the wait is lost.
            let notified = self.notify.notified();
            let next_wake = {
                let mut state = self.lock();
                let now = Instant::now();
                let next_wake = state.wake_parked(now);
                if let Some(top) = state.ready.pop() {
                    let entry = state
                        .entries
                        .get_mut(&top.url)
                        .ok_or_else(|| QueueError::UnknownUrl(top.url.to_string()))?;
                    entry.status = UrlStatus::InFlight;
                    let leased = QueuedUrl {
                        session_id: self.session_id,
                        parent: entry.parent.clone(),
                        depth: entry.depth,
                        priority: entry.priority,
                        discovered_at: entry.discovered_at,
                        attempts: entry.attempts,
                        url: top.url,
                    };
                    state.in_flight += 1;
                    return Ok(LeaseOutcome::Leased(leased));
                }
                next_wake
            };
            let now = Instant::now();
            if now >= deadline {
                return Ok(LeaseOutcome::Empty);
            }
            let wake_at = next_wake.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(wake_at) => {
                    if Instant::now() >= deadline {
                        return Ok(LeaseOutcome::Empty);
                    }
                }
            }
        }
    }

    async fn complete(&self, url: &NormalizedUrl, outcome: UrlOutcome) -> Result<(), QueueError> {
        let mut state = self.lock();
        let max_retries = self.tuning.max_retries;
        let entry = state
            .entries
            .get_mut(url)
            .ok_or_else(|| QueueError::UnknownUrl(url.to_string()))?;
        if entry.status != UrlStatus::InFlight {
            return Err(QueueError::InvalidTransition {
                url: url.to_string(),
                actual: entry.status,
                expected: UrlStatus::InFlight,
            });
        }
        match &outcome {
            UrlOutcome::Failed { error, retryable } if *retryable => {
                entry.attempts += 1;
                entry.last_error = Some(error.to_string());
                if entry.attempts <= max_retries {
                    entry.status = UrlStatus::Pending;
                    let backoff = self.tuning.backoff(entry.attempts);
                    let (priority, depth, discovered_at) =
                        (entry.priority, entry.depth, entry.discovered_at);
                    state.seq += 1;
                    let seq = state.seq;
                    state.parked.push(Parked {
                        wake_at: Instant::now() + backoff,
                        entry: HeapEntry {
                            priority,
                            depth,
                            discovered_at,
                            seq,
                            url: url.clone(),
                        },
                    });
                    state.in_flight -= 1;
                    drop(state);
                    self.notify.notify_one();
                    return Ok(());
                }
                entry.status = UrlStatus::Failed;
            }
            outcome => {
                entry.status = outcome.terminal_status();
                entry.last_error = outcome.last_error();
            }
        }
        state.in_flight -= 1;
        state.terminal += 1;
        Ok(())
    }

    async fn release(&self, url: &NormalizedUrl) -> Result<(), QueueError> {
        let mut state = self.lock();
        let entry = state
            .entries
            .get_mut(url)
            .ok_or_else(|| QueueError::UnknownUrl(url.to_string()))?;
        if entry.status != UrlStatus::InFlight {
            return Err(QueueError::InvalidTransition {
                url: url.to_string(),
                actual: entry.status,
                expected: UrlStatus::InFlight,
            });
        }
        entry.status = UrlStatus::Pending;
        entry.attempts += 1;
        let (priority, depth, discovered_at) = (entry.priority, entry.depth, entry.discovered_at);
        state.seq += 1;
        let seq = state.seq;
        state.ready.push(HeapEntry {
            priority,
            depth,
            discovered_at,
            seq,
            url: url.clone(),
        });
        state.in_flight -= 1;
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn size(&self) -> Result<QueueStats, QueueError> {
        let state = self.lock();
        Ok(QueueStats {
            pending: state.pending(),
            in_flight: state.in_flight,
            terminal: state.terminal,
        })
    }

    async fn close(&self) {
        self.closed.store(true, AtomicOrdering::Release);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::error::{CrawlError, CrawlErrorKind};
    use crate::url::UrlNormalizer;
    use std::sync::Arc;

    fn url(raw: &str) -> NormalizedUrl {
        UrlNormalizer::new(&[], 2048, false).normalize(raw).unwrap()
    }

    fn tuning() -> QueueTuning {
        QueueTuning {
            max_depth: 3,
            max_items: 100,
            max_retries: 3,
            lease_duration: time::Duration::seconds(120),
            backoff_base: time::Duration::seconds(1),
        }
    }

    fn queue() -> MemoryUrlQueue {
        MemoryUrlQueue::new(Uuid::new_v4(), tuning())
    }

    fn candidate(raw: &str, depth: u16, priority: i32) -> UrlCandidate {
        UrlCandidate {
            url: url(raw),
            parent: None,
            depth,
            priority,
        }
    }

    async fn lease_url(queue: &MemoryUrlQueue) -> QueuedUrl {
        match queue.lease(StdDuration::from_millis(10)).await.unwrap() {
            LeaseOutcome::Leased(leased) => leased,
            other => panic!("expected a lease, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn enqueue_answers_cover_the_contract() {
        let q = MemoryUrlQueue::new(
            Uuid::new_v4(),
            QueueTuning {
                max_items: 2,
                ..tuning()
            },
        );
        assert_eq!(
            EnqueueOutcome::Accepted,
            q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap()
        );
        assert_eq!(
            EnqueueOutcome::Duplicate,
            q.enqueue(candidate("http://h/a", 1, 0)).await.unwrap()
        );
        assert_eq!(
            EnqueueOutcome::DepthExceeded,
            q.enqueue(candidate("http://h/deep", 4, 0)).await.unwrap()
        );
        assert_eq!(
            EnqueueOutcome::Accepted,
            q.enqueue(candidate("http://h/b", 0, 0)).await.unwrap()
        );
        assert_eq!(
            EnqueueOutcome::LimitReached,
            q.enqueue(candidate("http://h/c", 0, 0)).await.unwrap()
        );
    }

    #[tokio::test]
    async fn lease_order_is_priority_depth_discovery() {
        let q = queue();
        q.enqueue(candidate("http://h/low", 0, 1)).await.unwrap();
        q.enqueue(candidate("http://h/deep", 2, 5)).await.unwrap();
        q.enqueue(candidate("http://h/shallow", 1, 5)).await.unwrap();
        q.enqueue(candidate("http://h/later", 1, 5)).await.unwrap();

        assert_eq!("http://h/shallow", lease_url(&q).await.url.as_str());
        assert_eq!("http://h/later", lease_url(&q).await.url.as_str());
        assert_eq!("http://h/deep", lease_url(&q).await.url.as_str());
        assert_eq!("http://h/low", lease_url(&q).await.url.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn empty_lease_times_out() {
        let q = queue();
        assert!(matches!(
            q.lease(StdDuration::from_millis(50)).await.unwrap(),
            LeaseOutcome::Empty
        ));
    }

    #[tokio::test]
    async fn lease_wakes_on_enqueue() {
        let q = Arc::new(queue());
        let leaser = {
            let q = q.clone();
            tokio::spawn(async move { q.lease(StdDuration::from_secs(5)).await.unwrap() })
        };
        tokio::task::yield_now().await;
        q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap();
        assert!(matches!(leaser.await.unwrap(), LeaseOutcome::Leased(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_backs_off_then_reappears() {
        let q = queue();
        q.enqueue(candidate("http://h/flaky", 0, 0)).await.unwrap();
        let leased = lease_url(&q).await;
        assert_eq!(0, leased.attempts);
        q.complete(
            &leased.url,
            UrlOutcome::Failed {
                error: CrawlError::new(CrawlErrorKind::HttpServerError, "http status 503"),
                retryable: true,
            },
        )
        .await
        .unwrap();

        // Before the backoff elapses the queue is empty.
        assert!(matches!(
            q.lease(StdDuration::from_millis(100)).await.unwrap(),
            LeaseOutcome::Empty
        ));
        // Backoff for attempt 1 is base * 2 = 2s; after that it is leasable.
        let leased = match q.lease(StdDuration::from_secs(5)).await.unwrap() {
            LeaseOutcome::Leased(leased) => leased,
            other => panic!("expected a lease, got {other:?}"),
        };
        assert_eq!(1, leased.attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_beyond_budget_fail_terminally() {
        let q = queue();
        q.enqueue(candidate("http://h/dead", 0, 0)).await.unwrap();
        for _ in 0..4 {
            let leased = match q.lease(StdDuration::from_secs(120)).await.unwrap() {
                LeaseOutcome::Leased(leased) => leased,
                other => panic!("expected a lease, got {other:?}"),
            };
            q.complete(
                &leased.url,
                UrlOutcome::Failed {
                    error: CrawlError::new(CrawlErrorKind::NetworkTimeout, "timed out"),
                    retryable: true,
                },
            )
            .await
            .unwrap();
        }
        let (status, last_error) = q.status_of(&url("http://h/dead")).unwrap();
        assert_eq!(UrlStatus::Failed, status);
        assert!(last_error.unwrap().contains("NETWORK_TIMEOUT"));
        assert!(matches!(
            q.lease(StdDuration::from_millis(10)).await.unwrap(),
            LeaseOutcome::Empty
        ));
    }

    #[tokio::test]
    async fn release_requeues_with_an_attempt() {
        let q = queue();
        q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap();
        let leased = lease_url(&q).await;
        q.release(&leased.url).await.unwrap();
        let again = lease_url(&q).await;
        assert_eq!(1, again.attempts);
        assert_eq!(leased.url, again.url);
    }

    #[tokio::test]
    async fn double_complete_is_rejected() {
        let q = queue();
        q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap();
        let leased = lease_url(&q).await;
        q.complete(&leased.url, UrlOutcome::Done).await.unwrap();
        assert!(matches!(
            q.complete(&leased.url, UrlOutcome::Done).await,
            Err(QueueError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn close_unblocks_waiting_leasers() {
        let q = Arc::new(queue());
        let leaser = {
            let q = q.clone();
            tokio::spawn(async move { q.lease(StdDuration::from_secs(60)).await.unwrap() })
        };
        tokio::task::yield_now().await;
        q.close().await;
        assert!(matches!(leaser.await.unwrap(), LeaseOutcome::Closed));
        assert!(matches!(
            q.enqueue(candidate("http://h/a", 0, 0)).await,
            Err(QueueError::Closed)
        ));
    }

    #[tokio::test]
    async fn stats_track_the_buckets() {
        let q = queue();
        q.enqueue(candidate("http://h/a", 0, 0)).await.unwrap();
        q.enqueue(candidate("http://h/b", 0, 0)).await.unwrap();
        let leased = lease_url(&q).await;
        assert_eq!(
            QueueStats {
                pending: 1,
                in_flight: 1,
                terminal: 0
            },
            q.size().await.unwrap()
        );
        q.complete(&leased.url, UrlOutcome::Done).await.unwrap();
        assert_eq!(
            QueueStats {
                pending: 1,
                in_flight: 0,
                terminal: 1
            },
            q.size().await.unwrap()
        );
    }
}
