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

use crate::client::{Client, ClientError, RequestLimits};
use crate::url::NormalizedUrl;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use texting_robots::{get_robots_url, Robot};
use time::OffsetDateTime;

/// robots.txt bodies above this size are cut off by the transport cap.
const MAX_ROBOTS_BODY: u64 = 512 * 1024;
/// robots.txt gets a short fuse, it must not stall page workers.
const FETCH_TIMEOUT: StdDuration = StdDuration::from_secs(10);

/// What a fetched robots.txt boiled down to.
#[derive(Debug)]
enum Verdict {
    /// 2xx with parseable directives for our agent (or `*`).
    Rules(Box<Robot>),
    /// 4xx, or a body we could not make sense of.
    AllowAll,
    /// Network failure or 5xx. Stays until the cache entry expires.
    DenyAll,
}

/// One cached robots.txt decision for an origin.
#[derive(Debug)]
pub struct CachedRobots {
    verdict: Verdict,
    retrieved_at: OffsetDateTime,
}

impl CachedRobots {
    pub fn retrieved_at(&self) -> OffsetDateTime {
        self.retrieved_at
    }

    fn allowed(&self, url: &str) -> bool {
        match &self.verdict {
            Verdict::Rules(robot) => robot.allowed(url),
            Verdict::AllowAll => true,
            Verdict::DenyAll => false,
        }
    }

    fn crawl_delay(&self) -> Option<time::Duration> {
        match &self.verdict {
            Verdict::Rules(robot) => robot.delay.map(time::Duration::seconds_f32),
            _ => None,
        }
    }
}

/// Per-origin robots.txt fetch, cache and access check. The cache is
/// future-aware, concurrent lookups for the same origin share one fetch.
pub struct RobotsPolicy {
    client: Arc<dyn Client>,
    agent: String,
    cache: moka::future::Cache<String, Arc<CachedRobots>>,
}

impl RobotsPolicy {
    pub fn new(client: Arc<dyn Client>, agent: impl Into<String>, ttl: time::Duration) -> Self {
        Self {
            client,
            agent: agent.into(),
            cache: moka::future::Cache::builder()
                .max_capacity(16 * 1024)
                .time_to_live(ttl.unsigned_abs())
                .build(),
        }
    }

    /// Whether the configured agent may fetch `url`. First access per origin
    /// fetches `/robots.txt`.
    pub async fn allowed(&self, url: &NormalizedUrl) -> bool {
        self.entry(url).await.allowed(url.as_str())
    }

    /// The crawl-delay directive for the url's origin, if any. Callers take
    /// the max of this and the global rate-limit floor.
    pub async fn crawl_delay(&self, url: &NormalizedUrl) -> Option<time::Duration> {
        self.entry(url).await.crawl_delay()
    }

    async fn entry(&self, url: &NormalizedUrl) -> Arc<CachedRobots> {
        let key = url.origin_key();
        self.cache
            .get_with(key, async { Arc::new(self.retrieve(url).await) })
            .await
    }

    async fn retrieve(&self, url: &NormalizedUrl) -> CachedRobots {
        let retrieved_at = OffsetDateTime::now_utc();
        let robots_url = match get_robots_url(url.as_str()) {
            Ok(found) => found,
            Err(err) => {
                log::warn!("No robots.txt location for {url}: {err}");
                return CachedRobots {
                    verdict: Verdict::DenyAll,
                    retrieved_at,
                };
            }
        };
        let limits = RequestLimits {
            timeout: FETCH_TIMEOUT,
            max_body: MAX_ROBOTS_BODY,
        };
        let verdict = match self.client.get(&robots_url, limits).await {
            Ok(response) if response.status.is_success() => {
                match Robot::new(&self.agent, &response.body) {
                    Ok(robot) => Verdict::Rules(Box::new(robot)),
                    Err(err) => {
                        log::debug!("Unparseable robots.txt on {robots_url}: {err}");
                        Verdict::AllowAll
                    }
                }
            }
            Ok(response) if response.status.is_client_error() => Verdict::AllowAll,
            Ok(response) => {
                log::debug!(
                    "robots.txt on {robots_url} answered {}, denying the host",
                    response.status
                );
                Verdict::DenyAll
            }
            Err(ClientError::BodyTooLarge { .. }) => Verdict::DenyAll,
            Err(err) => {
                log::debug!("robots.txt fetch for {robots_url} failed: {err}");
                Verdict::DenyAll
            }
        };
        CachedRobots {
            verdict,
            retrieved_at,
        }
    }
}

impl std::fmt::Debug for RobotsPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RobotsPolicy")
            .field("agent", &self.agent)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test_impls::FakeClient;
    use crate::url::UrlNormalizer;
    use reqwest::StatusCode;

    fn normalize(raw: &str) -> NormalizedUrl {
        UrlNormalizer::new(&[], 2048, false).normalize(raw).unwrap()
    }

    fn policy(client: Arc<FakeClient>) -> RobotsPolicy {
        RobotsPolicy::new(client, "pardosa", time::Duration::hours(1))
    }

    #[tokio::test]
    async fn parsed_rules_are_applied() {
        let client = Arc::new(FakeClient::new("pardosa"));
        client.insert_ok(
            "http://h/robots.txt",
            StatusCode::OK,
            Some("text/plain"),
            b"User-agent: *\nDisallow: /admin/\nCrawl-delay: 4\n".to_vec(),
        );
        let policy = policy(client.clone());
        assert!(policy.allowed(&normalize("http://h/public")).await);
        assert!(!policy.allowed(&normalize("http://h/admin/users")).await);
        assert_eq!(
            Some(time::Duration::seconds(4)),
            policy.crawl_delay(&normalize("http://h/public")).await
        );
        // Three checks, one fetch.
        assert_eq!(1, client.hits("http://h/robots.txt"));
    }

    #[tokio::test]
    async fn missing_robots_means_allow_all() {
        let client = Arc::new(FakeClient::new("pardosa"));
        // FakeClient answers 404 for everything unscripted.
        let policy = policy(client);
        assert!(policy.allowed(&normalize("http://h/anything")).await);
    }

    #[tokio::test]
    async fn server_error_denies_the_host() {
        let client = Arc::new(FakeClient::new("pardosa"));
        client.insert_ok(
            "http://h/robots.txt",
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
            Vec::new(),
        );
        let policy = policy(client);
        assert!(!policy.allowed(&normalize("http://h/anything")).await);
    }

    #[tokio::test]
    async fn network_failure_denies_the_host() {
        let client = Arc::new(FakeClient::new("pardosa"));
        client.insert_err("http://h/robots.txt", || ClientError::Timeout);
        let policy = policy(client);
        assert!(!policy.allowed(&normalize("http://h/anything")).await);
    }
}
