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

pub mod pool;
mod result;

pub use result::FetchResult;

use crate::analyze::{WordAnalyzer, WordStats};
use crate::client::{Client, ClientError, RequestLimits};
use crate::config::CrawlConfig;
use crate::dedup::VisitedFilter;
use crate::error::{CrawlError, CrawlErrorKind};
use crate::extract::{ContentExtractor, ExtractError};
use crate::politeness::HostRateLimiter;
use crate::queue::{QueuedUrl, UrlCandidate};
use crate::robots::RobotsPolicy;
use crate::runtime::Shutdown;
use crate::store::{LinkKind, LinkRecord, StageTimings};
use crate::url::{NormalizedUrl, UrlNormalizer};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// The read-only handles every worker shares. Workers mutate nothing here
/// beyond the limiter's per-host slots and the visited filter, both of
/// which are concurrent-safe by construction.
#[derive(Debug)]
pub struct CrawlHandles {
    pub session_id: Uuid,
    pub config: CrawlConfig,
    pub client: Arc<dyn Client>,
    pub robots: RobotsPolicy,
    pub limiter: HostRateLimiter,
    pub normalizer: UrlNormalizer,
    pub extractor: ContentExtractor,
    pub analyzer: WordAnalyzer,
    pub visited: VisitedFilter,
    pub shutdown: Shutdown,
}

/// Runs one url through robots check, rate limit, fetch, extract, analyze
/// and link filtering. Every exit path is a [`FetchResult`]; a worker never
/// dies because of a single bad url.
#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    handles: Arc<CrawlHandles>,
}

impl Worker {
    pub fn new(id: usize, handles: Arc<CrawlHandles>) -> Self {
        Self { id, handles }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub async fn process(&self, task: QueuedUrl) -> FetchResult {
        let handles = &*self.handles;
        let mut out = self.blank_result(&task);

        // Robots first; a denied url must cause no request at all.
        if !handles.robots.allowed(&task.url).await {
            out.error = Some(CrawlError::new(
                CrawlErrorKind::DisallowedByRobots,
                "denied by robots.txt",
            ));
            return out;
        }

        let origin = task.url.origin_key();
        let crawl_delay = handles.robots.crawl_delay(&task.url).await;
        let interval = handles.limiter.interval_for(crawl_delay);
        if handles
            .limiter
            .acquire(&origin, interval, &handles.shutdown)
            .await
            .is_err()
        {
            out.error = Some(CrawlError::new(CrawlErrorKind::Cancelled, "shutdown"));
            return out;
        }

        log::debug!("Worker {}: fetch {}", self.id, task.url);
        let limits = RequestLimits {
            timeout: handles.config.request_timeout.unsigned_abs(),
            max_body: handles.config.max_page_size,
        };
        if handles.shutdown.is_shutdown() {
            out.error = Some(CrawlError::new(CrawlErrorKind::Cancelled, "shutdown"));
            return out;
        }
        let fetch_started = Instant::now();
        let fetched = tokio::select! {
            fetched = handles.client.get(task.url.as_str(), limits) => fetched,
            _ = handles.shutdown.wait() => {
                out.error = Some(CrawlError::new(CrawlErrorKind::Cancelled, "shutdown"));
                return out;
            }
        };
        out.timings.fetch = Some(fetch_started.elapsed());

        let response = match fetched {
            Ok(response) => response,
            Err(err) => {
                out.error = Some(CrawlError::from_transport(&err));
                if let ClientError::BodyTooLarge { .. } = err {
                    out.body_size = handles.config.max_page_size;
                }
                return out;
            }
        };
        out.timings.first_byte = Some(response.first_byte);
        out.timings.fetch = Some(response.total);
        out.http_status = Some(response.status.as_u16());
        out.content_type = response.content_type.clone();
        out.body_size = response.body.len() as u64;
        if response.final_url != task.url.as_str() {
            out.final_url = Some(response.final_url.clone());
        }

        if !response.status.is_success() {
            out.error = Some(CrawlError::from_status(response.status.as_u16()));
            return out;
        }

        // Links resolve against where the body actually came from.
        let base = handles
            .normalizer
            .normalize(&response.final_url)
            .unwrap_or_else(|_| task.url.clone());

        let parse_started = Instant::now();
        let document = match handles.extractor.extract(
            &response.body,
            response.content_type.as_deref(),
            &base,
        ) {
            Ok(document) => document,
            Err(err) => {
                out.timings.parse = Some(parse_started.elapsed());
                let kind = match err {
                    ExtractError::DisallowedContentType(_) => CrawlErrorKind::DisallowedContentType,
                    ExtractError::BodyTooLarge(_) => CrawlErrorKind::BodyTooLarge,
                };
                out.error = Some(CrawlError::new(kind, err.to_string()));
                return out;
            }
        };
        out.timings.parse = Some(parse_started.elapsed());
        out.parse_errors = document.parse_errors;
        out.title = document.title.clone();
        out.text_length = document.text.chars().count() as u64;

        if out.text_length as usize >= handles.config.min_text_length {
            let analyze_started = Instant::now();
            out.words = handles.analyzer.analyze(&document.text);
            out.timings.analyze = Some(analyze_started.elapsed());
        } else {
            log::debug!(
                "Worker {}: {} has {} chars of text, below the analysis floor",
                self.id,
                task.url,
                out.text_length
            );
        }

        let filter_started = Instant::now();
        let (outbound, accepted) = self.process_links(&task, document.links);
        out.outbound = outbound;
        out.links = accepted;
        out.timings.extract = Some(filter_started.elapsed());
        out
    }

    fn blank_result(&self, task: &QueuedUrl) -> FetchResult {
        FetchResult {
            session_id: task.session_id,
            url: task.url.clone(),
            parent: task.parent.clone(),
            depth: task.depth,
            priority: task.priority,
            attempts: task.attempts,
            http_status: None,
            final_url: None,
            content_type: None,
            body_size: 0,
            title: None,
            text_length: 0,
            words: WordStats::default(),
            outbound: Vec::new(),
            links: Vec::new(),
            timings: StageTimings::default(),
            parse_errors: 0,
            error: None,
        }
    }

    /// Splits the page's links into the full outbound set (for the link
    /// graph) and the enqueue candidates: normalized, domain lists applied,
    /// depth bounded, deduplicated. Candidates inherit the parent's
    /// priority minus one.
    fn process_links(
        &self,
        task: &QueuedUrl,
        raw_links: Vec<String>,
    ) -> (Vec<LinkRecord>, Vec<UrlCandidate>) {
        let handles = &*self.handles;
        let child_depth = task
            .depth
            .checked_add(1)
            .filter(|depth| *depth <= handles.config.max_depth);
        let child_priority = (task.priority - 1).max(0);
        let mut seen = std::collections::HashSet::new();
        let mut outbound = Vec::new();
        let mut accepted = Vec::new();
        for raw in raw_links {
            let url = match handles.normalizer.normalize(&raw) {
                Ok(url) => url,
                Err(err) => {
                    log::trace!("Dropping {raw}: {err}");
                    continue;
                }
            };
            if seen.insert(url.clone()) {
                outbound.push(LinkRecord {
                    dest_url: url.as_str().to_string(),
                    kind: if url.same_host(&task.url) {
                        LinkKind::Internal
                    } else {
                        LinkKind::External
                    },
                });
            }
            let Some(depth) = child_depth else { continue };
            if !domain_permitted(&handles.config, url.host()) {
                log::trace!("Dropping {url}: domain not permitted");
                continue;
            }
            if !handles.visited.add(&url) {
                continue;
            }
            accepted.push(UrlCandidate {
                url,
                parent: Some(task.url.clone()),
                depth,
                priority: child_priority,
            });
        }
        (outbound, accepted)
    }
}

/// A host passes when it is under none of the blocked domains and, if an
/// allow-list is configured, under at least one of those.
pub(crate) fn domain_permitted(config: &CrawlConfig, host: &str) -> bool {
    let under = |domain: &String| {
        host.eq_ignore_ascii_case(domain)
            || (host.len() > domain.len()
                && host[..host.len() - domain.len()].ends_with('.')
                && host[host.len() - domain.len()..].eq_ignore_ascii_case(domain))
    };
    if config.blocked_domains.iter().any(under) {
        return false;
    }
    config.allowed_domains.is_empty() || config.allowed_domains.iter().any(under)
}
