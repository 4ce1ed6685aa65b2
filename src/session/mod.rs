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

pub mod metrics;

use crate::analyze::WordAnalyzer;
use crate::client::{ClassicClient, Client, ClientError};
use crate::config::{Config, QueueBackend};
use crate::dedup::VisitedFilter;
use crate::error::CrawlErrorKind;
use crate::extract::ContentExtractor;
use crate::politeness::HostRateLimiter;
use crate::queue::{
    DurableUrlQueue, EnqueueOutcome, LeaseOutcome, MemoryUrlQueue, QueueError, QueueTuning,
    QueuedUrl, UrlCandidate, UrlQueue, UrlStatus,
};
use crate::recovery::QueueJanitor;
use crate::robots::RobotsPolicy;
use crate::runtime::Shutdown;
use crate::store::{
    ErrorEvent, MemoryStore, PageRecord, PgStore, QueueCompletion, SessionMeta, SessionSummary,
    Storage, StoreError,
};
use crate::url::UrlNormalizer;
use crate::worker::pool::WorkerPool;
use crate::worker::{CrawlHandles, FetchResult};
use metrics::SessionCounters;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration as StdDuration;
use strum::{Display, EnumString};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use uuid::Uuid;

/// How long one lease call blocks before the loop re-evaluates termination.
const LEASE_TIMEOUT: StdDuration = StdDuration::from_millis(250);

/// Terminal lifecycle of one crawl run.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no usable seed urls")]
    NoSeeds,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Client(#[from] ClientError),
}

/// What a finished run reports back to the caller.
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub state: SessionState,
    pub pages_crawled: u64,
    pub bytes_processed: u64,
    pub errors: u64,
    pub duration: time::Duration,
}

/// One crawl run. Owns the queue, the worker pool, the rate limiter, the
/// dedup filter and the robots policy; shares the transport and the store
/// by reference. Dropping the session after `run` tears everything down.
#[derive(Debug)]
pub struct CrawlSession {
    id: Uuid,
    name: String,
    config: Config,
    seeds: Vec<String>,
    store: Arc<dyn Storage>,
    queue: Arc<dyn UrlQueue>,
    janitor: Option<QueueJanitor>,
    handles: Arc<CrawlHandles>,
    shutdown: Shutdown,
}

impl CrawlSession {
    /// Wires a fresh session from configuration: postgres-backed store and
    /// queue for the durable backend, in-process implementations otherwise.
    pub async fn bootstrap(
        name: impl Into<String>,
        seeds: Vec<String>,
        config: Config,
    ) -> Result<Self, SessionError> {
        Self::bootstrap_with_id(Uuid::new_v4(), name, seeds, config).await
    }

    /// Same, but under a caller-chosen id. Reusing the id of a crashed run
    /// against the durable backend resumes its queue.
    pub async fn bootstrap_with_id(
        id: Uuid,
        name: impl Into<String>,
        seeds: Vec<String>,
        config: Config,
    ) -> Result<Self, SessionError> {
        let client: Arc<dyn Client> = Arc::new(ClassicClient::from_config(&config.crawl)?);
        let tuning = QueueTuning::from_config(&config);
        match config.queue.queue_backend {
            QueueBackend::Memory => Ok(Self::assemble(
                id,
                name,
                seeds,
                config,
                client,
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryUrlQueue::new(id, tuning)),
                None,
            )),
            QueueBackend::Durable => {
                let store = PgStore::connect(&config.database).await?;
                let pool = store.pool().clone();
                let queue = DurableUrlQueue::open(pool.clone(), id, tuning).await?;
                let janitor = QueueJanitor::new(
                    pool,
                    id,
                    config.crawl.max_retries,
                    config.queue.queue_retention,
                );
                Ok(Self::assemble(
                    id,
                    name,
                    seeds,
                    config,
                    client,
                    Arc::new(store),
                    Arc::new(queue),
                    Some(janitor),
                ))
            }
        }
    }

    /// Assembles a session from explicit parts. Tests inject the scripted
    /// client and in-process store/queue here.
    #[allow(clippy::too_many_arguments)]
    pub fn assemble(
        id: Uuid,
        name: impl Into<String>,
        seeds: Vec<String>,
        config: Config,
        client: Arc<dyn Client>,
        store: Arc<dyn Storage>,
        queue: Arc<dyn UrlQueue>,
        janitor: Option<QueueJanitor>,
    ) -> Self {
        let shutdown = Shutdown::new();
        let handles = Arc::new(CrawlHandles {
            session_id: id,
            robots: RobotsPolicy::new(
                client.clone(),
                config.crawl.user_agent.clone(),
                config.crawl.robots_ttl,
            ),
            limiter: HostRateLimiter::new(config.crawl.rate_limit_delay),
            normalizer: UrlNormalizer::from_config(&config.crawl),
            extractor: ContentExtractor::from_config(&config.crawl),
            analyzer: WordAnalyzer::from_config(&config.text),
            visited: VisitedFilter::new(config.crawl.max_pages),
            shutdown: shutdown.child(),
            client,
            config: config.crawl.clone(),
        });
        Self {
            id,
            name: name.into(),
            config,
            seeds,
            store,
            queue,
            janitor,
            handles,
            shutdown,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// A handle the caller keeps to cancel the run from outside.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Drives the crawl to termination: page limit, cancellation, fatal
    /// error, or a drained queue with nothing in flight.
    pub async fn run(self) -> Result<SessionReport, SessionError> {
        let Self {
            id,
            name,
            config,
            seeds,
            store,
            queue,
            janitor,
            handles,
            shutdown,
        } = self;

        log::info!("Session {id} ({name}) starting with {} seeds", seeds.len());
        let counters = SessionCounters::new();
        store
            .open_session(&SessionMeta {
                session_id: id,
                name: name.clone(),
                seed_urls: seeds.clone(),
                max_depth: config.crawl.max_depth,
                max_pages: config.crawl.max_pages,
                worker_count: config.crawl.concurrent_workers.get(),
                rate_limit_delay: config.crawl.rate_limit_delay,
                user_agent: config.crawl.user_agent.clone(),
                started_at: counters.started_at(),
            })
            .await?;

        // Absorb orphans of a prior process before leasing anything.
        if let Some(janitor) = &janitor {
            if let Err(err) = janitor.run_once().await {
                log::error!("Initial recovery pass failed: {err}");
            }
            janitor.clone().spawn(
                config.queue.queue_recovery_interval.unsigned_abs(),
                shutdown.child(),
            );
        }

        let mut seeded = 0u64;
        for raw in &seeds {
            match handles.normalizer.normalize(raw) {
                Ok(url) => {
                    handles.visited.add(&url);
                    match queue
                        .enqueue(UrlCandidate::seed(url, config.crawl.seed_priority))
                        .await
                    {
                        Ok(EnqueueOutcome::Accepted) => seeded += 1,
                        Ok(outcome) => log::debug!("Seed {raw}: {outcome}"),
                        Err(err) => log::error!("Seed {raw} not enqueued: {err}"),
                    }
                }
                Err(err) => log::warn!("Ignoring seed {raw}: {err}"),
            }
        }
        let start_stats = queue.size().await?;
        if seeded == 0 && start_stats.pending == 0 && start_stats.in_flight == 0 {
            let summary = SessionSummary {
                fatal_error: Some("no usable seed urls".to_string()),
                ..Default::default()
            };
            if let Err(err) = store.close_session(id, SessionState::Failed, &summary).await {
                log::error!("Session {id}: closing failed too: {err}");
            }
            shutdown.cancel();
            return Err(SessionError::NoSeeds);
        }

        let (mut pool, mut results) = WorkerPool::new(
            handles.clone(),
            config.crawl.concurrent_workers.get(),
        );
        pool.start();

        let mut driver = Driver {
            id,
            durable: config.queue.queue_backend == QueueBackend::Durable,
            max_pages: config.crawl.max_pages,
            store: store.clone(),
            queue: queue.clone(),
            counters,
            outstanding: 0,
            fatal: None,
        };

        let metrics_interval = config.crawl.metrics_interval.unsigned_abs();
        let mut next_metric = tokio::time::Instant::now() + metrics_interval;
        let mut cancelled = false;

        'crawl: loop {
            pool.maintain();
            if driver.fatal.is_some() {
                break;
            }
            if driver.counters.pages_crawled >= driver.max_pages {
                log::info!("Session {id}: page limit reached");
                break;
            }
            if shutdown.is_shutdown() {
                log::info!("Session {id}: cancellation requested");
                cancelled = true;
                break;
            }

            while let Ok(result) = results.try_recv() {
                driver.handle_result(result).await;
                if driver.fatal.is_some() {
                    break 'crawl;
                }
            }

            if tokio::time::Instant::now() >= next_metric {
                driver.record_metric().await;
                next_metric += metrics_interval;
            }

            match queue.lease(LEASE_TIMEOUT).await {
                Ok(LeaseOutcome::Leased(task)) => {
                    driver.submit(&mut pool, &mut results, task).await;
                }
                Ok(LeaseOutcome::Empty) => {
                    if driver.outstanding == 0 {
                        match queue.size().await {
                            Ok(stats) if stats.pending == 0 && stats.in_flight == 0 => {
                                log::info!("Session {id}: queue drained");
                                break;
                            }
                            Ok(_) => {}
                            Err(err) => {
                                driver.fatal = Some(err.to_string());
                                break;
                            }
                        }
                    }
                }
                Ok(LeaseOutcome::Closed) => break,
                Err(err) => {
                    log::error!("Session {id}: lease failed: {err}");
                    driver.fatal = Some(err.to_string());
                    break;
                }
            }
        }

        // Cooperative wind-down: no new tasks, wait for in-flight pages,
        // persist their results.
        let grace = config.crawl.request_timeout.unsigned_abs() + StdDuration::from_secs(5);
        pool.begin_drain();
        let deadline = tokio::time::Instant::now() + grace;
        loop {
            match tokio::time::timeout_at(deadline, results.recv()).await {
                Ok(Some(result)) => driver.handle_result(result).await,
                Ok(None) => break,
                Err(_) => {
                    log::warn!("Session {id}: result drain hit the grace deadline");
                    break;
                }
            }
        }
        pool.finish(StdDuration::from_secs(5)).await;
        shutdown.cancel();

        let state = if driver.fatal.is_some() {
            SessionState::Failed
        } else if cancelled {
            SessionState::Cancelled
        } else {
            SessionState::Completed
        };

        // On an abnormal end the durable backend gives its leases back so a
        // follow-up run does not have to wait them out. The memory backend
        // simply forgets them with the process.
        if state != SessionState::Completed {
            if let Some(janitor) = &janitor {
                match janitor.release_all_in_flight().await {
                    Ok(released) if released > 0 => {
                        log::info!("Session {id}: released {released} leases")
                    }
                    Ok(_) => {}
                    Err(err) => log::error!("Session {id}: releasing leases failed: {err}"),
                }
            }
        }

        queue.close().await;
        driver.record_metric().await;

        let summary = SessionSummary {
            pages_crawled: driver.counters.pages_crawled,
            bytes_processed: driver.counters.bytes_processed,
            errors: driver.counters.errors,
            fatal_error: driver.fatal.clone(),
        };
        if let Err(err) = store.close_session(id, state, &summary).await {
            log::error!("Session {id}: close_session failed: {err}");
        }
        let duration = OffsetDateTime::now_utc() - driver.counters.started_at();
        log::info!(
            "Session {id} {state}: {} pages, {} errors, {} bytes in {:.1}s",
            summary.pages_crawled,
            summary.errors,
            summary.bytes_processed,
            duration.as_seconds_f64(),
        );
        Ok(SessionReport {
            session_id: id,
            state,
            pages_crawled: summary.pages_crawled,
            bytes_processed: summary.bytes_processed,
            errors: summary.errors,
            duration,
        })
    }
}

/// The mutable heart of the loop, separated so result handling can be
/// called from the submit path and the drain path alike.
struct Driver {
    id: Uuid,
    durable: bool,
    max_pages: u64,
    store: Arc<dyn Storage>,
    queue: Arc<dyn UrlQueue>,
    counters: SessionCounters,
    /// Tasks handed to the pool whose results have not come back yet.
    outstanding: u64,
    fatal: Option<String>,
}

impl Driver {
    /// Hands a leased url to the pool, consuming results while the task
    /// channel is full so producers and consumers cannot deadlock.
    async fn submit(
        &mut self,
        pool: &mut WorkerPool,
        results: &mut mpsc::Receiver<FetchResult>,
        task: QueuedUrl,
    ) {
        let Some(sender) = pool.task_sender() else {
            let _ = self.queue.release(&task.url).await;
            return;
        };
        let mut slot = Some(task);
        while let Some(task) = slot.take() {
            tokio::select! {
                permit = sender.reserve() => match permit {
                    Ok(permit) => {
                        permit.send(task);
                        self.outstanding += 1;
                    }
                    Err(_) => {
                        if let Err(err) = self.queue.release(&task.url).await {
                            log::warn!("Releasing {} failed: {err}", task.url);
                        }
                    }
                },
                maybe = results.recv() => match maybe {
                    Some(result) => {
                        self.handle_result(result).await;
                        if self.fatal.is_some() {
                            if let Err(err) = self.queue.release(&task.url).await {
                                log::warn!("Releasing {} failed: {err}", task.url);
                            }
                            return;
                        }
                        slot = Some(task);
                    }
                    None => {
                        if let Err(err) = self.queue.release(&task.url).await {
                            log::warn!("Releasing {} failed: {err}", task.url);
                        }
                        return;
                    }
                },
            }
        }
    }

    async fn record_metric(&mut self) {
        let stats = self.queue.size().await.unwrap_or_default();
        let snapshot = self.counters.snapshot(self.outstanding, stats.pending);
        if let Err(err) = self.store.record_metric(self.id, &snapshot).await {
            if err.is_fatal() {
                self.fatal = Some(err.to_string());
            } else {
                log::warn!("Metric snapshot not recorded: {err}");
            }
        }
    }

    async fn handle_result(&mut self, result: FetchResult) {
        self.outstanding = self.outstanding.saturating_sub(1);

        if result.was_cancelled() {
            // The url was never processed; put it back for a later run.
            if let Err(err) = self.queue.release(&result.url).await {
                log::warn!("Releasing cancelled {} failed: {err}", result.url);
            }
            return;
        }

        match &result.error {
            None => self.handle_success(result).await,
            Some(error) => {
                log::debug!("{}: {error}", result.url);
                self.counters.errors += 1;
                let event = ErrorEvent {
                    url: result.url.as_str().to_string(),
                    kind: error.kind,
                    message: error.message.clone(),
                    occurred_at: OffsetDateTime::now_utc(),
                };
                if let Err(err) = self.store.record_error_event(self.id, &event).await {
                    if err.is_fatal() {
                        self.fatal = Some(err.to_string());
                        return;
                    }
                    log::warn!("Error event for {} not recorded: {err}", result.url);
                }
                if let Err(err) = self.queue.complete(&result.url, result.outcome()).await {
                    log::warn!("Completing {} failed: {err}", result.url);
                }
            }
        }
    }

    async fn handle_success(&mut self, mut result: FetchResult) {
        if self.counters.pages_crawled >= self.max_pages {
            // The page budget filled while this url was in flight. Its
            // work is not admitted; the row goes back to PENDING.
            log::debug!("{} finished over the page budget, releasing", result.url);
            if let Err(err) = self.queue.release(&result.url).await {
                log::warn!("Releasing {} failed: {err}", result.url);
            }
            return;
        }

        let page = PageRecord {
            session_id: result.session_id,
            url: result.url.clone(),
            final_url: result.final_url.clone(),
            http_status: result.http_status.unwrap_or(200),
            content_type: result.content_type.clone(),
            title: result.title.clone(),
            text_length: result.text_length,
            word_count: result.words.total_words,
            unique_words: result.words.unique_words,
            body_size: result.body_size,
            timings: result.timings,
            crawled_at: OffsetDateTime::now_utc(),
        };
        let completion = QueueCompletion {
            url: result.url.clone(),
            status: UrlStatus::Done,
            last_error: None,
        };
        let persist_started = std::time::Instant::now();
        let stored = self
            .store
            .record_page(
                &page,
                &result.words,
                &result.outbound,
                self.durable.then_some(&completion),
            )
            .await;
        match stored {
            Ok(()) => {
                result.timings.persist = Some(persist_started.elapsed());
                log::trace!(
                    "Persisted {} in {:?}",
                    result.url,
                    result.timings.persist.unwrap_or_default()
                );
                if !self.durable {
                    if let Err(err) = self.queue.complete(&result.url, result.outcome()).await {
                        log::warn!("Completing {} failed: {err}", result.url);
                    }
                }
                self.counters.pages_crawled += 1;
                self.counters.bytes_processed += result.body_size;

                // Children enter the queue only after their page is safely
                // persisted.
                for candidate in result.links {
                    match self.queue.enqueue(candidate).await {
                        Ok(EnqueueOutcome::Accepted) => {}
                        Ok(outcome) => log::trace!("Link not enqueued: {outcome}"),
                        Err(QueueError::Closed) => break,
                        Err(err) => {
                            self.fatal = Some(err.to_string());
                            return;
                        }
                    }
                }
            }
            Err(err) if err.is_fatal() => {
                log::error!("Persisting {} failed fatally: {err}", result.url);
                self.fatal = Some(err.to_string());
            }
            Err(err) => {
                log::error!("Persisting {} failed: {err}", result.url);
                self.counters.errors += 1;
                let outcome = crate::queue::UrlOutcome::Failed {
                    error: crate::error::CrawlError::new(
                        CrawlErrorKind::Persistence,
                        err.to_string(),
                    ),
                    retryable: true,
                };
                if let Err(err) = self.queue.complete(&result.url, outcome).await {
                    log::warn!("Completing {} failed: {err}", result.url);
                }
            }
        }
    }
}
