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

use super::{CrawlHandles, FetchResult, Worker};
use crate::queue::QueuedUrl;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use strum::Display;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Display)]
pub enum PoolState {
    Initialized,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("the task channel is closed")]
    Closed,
}

/// Owns the worker routines and the two bounded channels between them and
/// the session. `submit` blocks when the task channel is full, which is the
/// backpressure that keeps the session from leasing faster than the workers
/// drain. A worker that dies while Running is replaced; during Draining it
/// is not.
#[derive(Debug)]
pub struct WorkerPool {
    handles: Arc<CrawlHandles>,
    state: PoolState,
    worker_count: usize,
    tasks_tx: Option<mpsc::Sender<QueuedUrl>>,
    tasks_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<QueuedUrl>>>,
    results_tx: Option<mpsc::Sender<FetchResult>>,
    join: JoinSet<usize>,
    next_worker_id: usize,
}

impl WorkerPool {
    /// Channels are sized at twice the worker count, enough to keep workers
    /// busy without hiding backpressure.
    pub fn new(
        handles: Arc<CrawlHandles>,
        worker_count: usize,
    ) -> (Self, mpsc::Receiver<FetchResult>) {
        let cap = worker_count.max(1) * 2;
        let (tasks_tx, tasks_rx) = mpsc::channel(cap);
        let (results_tx, results_rx) = mpsc::channel(cap);
        (
            Self {
                handles,
                state: PoolState::Initialized,
                worker_count: worker_count.max(1),
                tasks_tx: Some(tasks_tx),
                tasks_rx: Arc::new(tokio::sync::Mutex::new(tasks_rx)),
                results_tx: Some(results_tx),
                join: JoinSet::new(),
                next_worker_id: 0,
            },
            results_rx,
        )
    }

    pub fn state(&self) -> PoolState {
        self.state
    }

    pub fn start(&mut self) {
        if self.state != PoolState::Initialized {
            return;
        }
        for _ in 0..self.worker_count {
            self.spawn_worker();
        }
        self.state = PoolState::Running;
        log::info!("Worker pool running with {} workers", self.worker_count);
    }

    fn spawn_worker(&mut self) {
        let Some(results_tx) = self.results_tx.clone() else {
            return;
        };
        let id = self.next_worker_id;
        self.next_worker_id += 1;
        let worker = Worker::new(id, self.handles.clone());
        let tasks_rx = self.tasks_rx.clone();
        self.join.spawn(async move {
            loop {
                // Holding the lock across recv serializes task pickup, not
                // task processing.
                let task = { tasks_rx.lock().await.recv().await };
                let Some(task) = task else { break };
                let result = worker.process(task).await;
                if results_tx.send(result).await.is_err() {
                    break;
                }
            }
            id
        });
    }

    /// Reaps exited workers; replaces them while Running.
    pub fn maintain(&mut self) {
        while let Some(exited) = self.join.try_join_next() {
            match exited {
                Err(err) if self.state == PoolState::Running => {
                    log::error!("A worker died: {err}. Replacing it.");
                    self.spawn_worker();
                }
                Ok(id) if self.state == PoolState::Running && self.results_tx.is_some() => {
                    log::warn!("Worker {id} exited while running. Replacing it.");
                    self.spawn_worker();
                }
                _ => {}
            }
        }
    }

    /// Hands one leased url to the workers. Blocks while the task channel
    /// is full.
    pub async fn submit(&mut self, task: QueuedUrl) -> Result<(), PoolError> {
        self.maintain();
        let tx = self.tasks_tx.as_ref().ok_or(PoolError::Closed)?;
        tx.send(task).await.map_err(|_| PoolError::Closed)
    }

    /// A sender handle for callers that need to select over submission and
    /// result consumption at once.
    pub fn task_sender(&self) -> Option<mpsc::Sender<QueuedUrl>> {
        self.tasks_tx.clone()
    }

    /// Closes the task channel. Workers finish what they hold, then exit;
    /// once the last one is gone the result channel closes too.
    pub fn begin_drain(&mut self) {
        if matches!(self.state, PoolState::Draining | PoolState::Stopped) {
            return;
        }
        self.state = PoolState::Draining;
        self.tasks_tx = None;
        self.results_tx = None;
        log::info!("Worker pool draining");
    }

    /// Waits for the drain to finish, aborting stragglers at the deadline.
    /// Returns `true` when every worker exited on its own.
    pub async fn finish(mut self, grace: StdDuration) -> bool {
        self.begin_drain();
        let deadline = tokio::time::Instant::now() + grace;
        let mut clean = true;
        loop {
            match tokio::time::timeout_at(deadline, self.join.join_next()).await {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    log::warn!(
                        "{} workers missed the drain deadline, aborting them",
                        self.join.len()
                    );
                    self.join.abort_all();
                    while self.join.join_next().await.is_some() {}
                    clean = false;
                    break;
                }
            }
        }
        self.state = PoolState::Stopped;
        log::info!("Worker pool stopped");
        clean
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::analyze::WordAnalyzer;
    use crate::config::{CrawlConfig, TextConfig};
    use crate::dedup::VisitedFilter;
    use crate::extract::ContentExtractor;
    use crate::politeness::HostRateLimiter;
    use crate::robots::RobotsPolicy;
    use crate::runtime::Shutdown;
    use crate::test_impls::FakeClient;
    use crate::url::UrlNormalizer;
    use reqwest::StatusCode;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn handles(client: Arc<FakeClient>) -> Arc<CrawlHandles> {
        let config = CrawlConfig::default();
        Arc::new(CrawlHandles {
            session_id: Uuid::new_v4(),
            client: client.clone(),
            robots: RobotsPolicy::new(client, "pardosa", config.robots_ttl),
            limiter: HostRateLimiter::new(time::Duration::ZERO),
            normalizer: UrlNormalizer::new(&[], 2048, false),
            extractor: ContentExtractor::from_config(&config),
            analyzer: WordAnalyzer::from_config(&TextConfig::default()),
            visited: VisitedFilter::new(100),
            shutdown: Shutdown::new(),
            config,
        })
    }

    fn task(handles: &CrawlHandles, raw: &str) -> QueuedUrl {
        QueuedUrl {
            session_id: handles.session_id,
            url: handles.normalizer.normalize(raw).unwrap(),
            parent: None,
            depth: 0,
            priority: 0,
            discovered_at: OffsetDateTime::now_utc(),
            attempts: 0,
        }
    }

    #[tokio::test]
    async fn lifecycle_and_results_flow() {
        let client = Arc::new(FakeClient::new("pardosa"));
        for i in 0..5 {
            client.insert_ok(
                &format!("http://h/{i}"),
                StatusCode::OK,
                Some("text/html"),
                b"<html><body>w</body></html>".to_vec(),
            );
        }
        let handles = handles(client);
        let (mut pool, mut results) = WorkerPool::new(handles.clone(), 2);
        assert_eq!(PoolState::Initialized, pool.state());
        pool.start();
        assert_eq!(PoolState::Running, pool.state());

        for i in 0..5 {
            pool.submit(task(&handles, &format!("http://h/{i}"))).await.unwrap();
        }
        pool.begin_drain();
        assert_eq!(PoolState::Draining, pool.state());

        let mut seen = 0;
        while let Some(result) = results.recv().await {
            assert!(result.is_success());
            seen += 1;
        }
        assert_eq!(5, seen);
        assert!(pool.finish(StdDuration::from_secs(5)).await);
    }

    #[tokio::test]
    async fn submit_after_drain_is_rejected() {
        let client = Arc::new(FakeClient::new("pardosa"));
        let handles = handles(client);
        let (mut pool, _results) = WorkerPool::new(handles.clone(), 1);
        pool.start();
        pool.begin_drain();
        assert!(matches!(
            pool.submit(task(&handles, "http://h/a")).await,
            Err(PoolError::Closed)
        ));
    }
}
