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

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::num::NonZeroUsize;
use strum::{Display, EnumString};
use thiserror::Error;
use time::Duration;

/// The full configuration surface of the crawl core. Unknown keys are a hard
/// deserialization error on every level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub crawl: CrawlConfig,
    pub text: TextConfig,
    pub queue: QueueConfig,
    pub database: DatabaseConfig,
}

/// Crawl-wide limits and network behaviour.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CrawlConfig {
    /// Maximum link depth measured from the seed. (default: 3)
    pub max_depth: u16,
    /// Maximum number of pages persisted by one session. (default: 1000)
    pub max_pages: u64,
    /// Number of concurrent workers. (default: 8)
    pub concurrent_workers: NonZeroUsize,
    /// Minimum interval between two requests against the same host.
    /// Also the base of the retry backoff. (default: 1s)
    pub rate_limit_delay: Duration,
    /// Total per-request timeout. (default: 30s)
    pub request_timeout: Duration,
    /// How often a retryable failure may re-enter the queue. (default: 3)
    pub max_retries: u32,
    /// The user agent sent with every request and matched against robots.txt.
    pub user_agent: String,
    /// Upper bound of the connection pool. (default: 64)
    pub max_connections: usize,
    /// Upper bound of the connection pool per host. (default: 4)
    pub max_connections_per_host: usize,
    /// How long resolved connections may idle in the pool. (default: 60s)
    pub dns_cache_ttl: Duration,
    /// The max redirections allowed for a request. (default: 5)
    pub redirect_limit: usize,
    /// When non-empty, only hosts equal to or under one of these domains are followed.
    pub allowed_domains: Vec<String>,
    /// Hosts equal to or under one of these domains are never followed.
    pub blocked_domains: Vec<String>,
    /// Only bodies whose media type is listed here are processed.
    /// (default: text/html, application/xhtml+xml)
    pub allowed_content_types: Vec<String>,
    /// The maximum body size in bytes. (default: 2 MiB)
    pub max_page_size: u64,
    /// Pages with less extracted text than this skip word analysis. (default: 0)
    pub min_text_length: usize,
    /// Query parameters stripped during normalization, exact names or `foo*` prefixes.
    pub tracking_params: Vec<String>,
    /// Urls longer than this are rejected as invalid. (default: 2048)
    pub max_url_len: usize,
    /// Priority assigned to seed urls; children inherit parent minus one. (default: 100)
    pub seed_priority: i32,
    /// Maximum age of a cached robots.txt entry. (default: 1h)
    pub robots_ttl: Duration,
    /// Interval between two metric snapshots. (default: 10s)
    pub metrics_interval: Duration,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_pages: 1000,
            concurrent_workers: NonZeroUsize::new(8).unwrap(),
            rate_limit_delay: Duration::seconds(1),
            request_timeout: Duration::seconds(30),
            max_retries: 3,
            user_agent: default_user_agent().to_string(),
            max_connections: 64,
            max_connections_per_host: 4,
            dns_cache_ttl: Duration::seconds(60),
            redirect_limit: 5,
            allowed_domains: Vec::new(),
            blocked_domains: Vec::new(),
            allowed_content_types: vec![
                "text/html".to_string(),
                "application/xhtml+xml".to_string(),
            ],
            max_page_size: 2 * 1024 * 1024,
            min_text_length: 0,
            tracking_params: default_tracking_params(),
            max_url_len: 2048,
            seed_priority: 100,
            robots_ttl: Duration::hours(1),
            metrics_interval: Duration::seconds(10),
        }
    }
}

/// The default user agent, derived from the crate identity.
pub fn default_user_agent() -> &'static str {
    concat!("Crawler/", env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

fn default_tracking_params() -> Vec<String> {
    ["utm_*", "fbclid", "gclid", "msclkid", "ref_src"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Tokenizer and word counting settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TextConfig {
    /// Tokens shorter than this are discarded. (default: 2)
    pub min_word_len: usize,
    /// Tokens longer than this are discarded. (default: 48)
    pub max_word_len: usize,
    /// Distinct words tracked per page; later unseen words are dropped. (default: 10000)
    pub max_words_per_page: usize,
    /// Lowercased stop words removed before counting. (default: empty)
    pub stop_words: HashSet<String>,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            min_word_len: 2,
            max_word_len: 48,
            max_words_per_page: 10_000,
            stop_words: HashSet::new(),
        }
    }
}

/// Which queue implementation backs the session.
#[derive(
    Debug, Copy, Clone, Default, Deserialize, Serialize, Eq, PartialEq, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Memory,
    Durable,
}

/// Queue and recovery settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// The backing implementation. (default: memory)
    pub queue_backend: QueueBackend,
    /// How long an IN_FLIGHT row may live before recovery reclaims it. (default: 120s)
    pub queue_lease_duration: Duration,
    /// Interval of the recovery task against the durable queue. (default: 60s)
    pub queue_recovery_interval: Duration,
    /// Terminal rows older than this are purged by recovery. (default: 7d)
    pub queue_retention: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_backend: QueueBackend::default(),
            queue_lease_duration: Duration::seconds(120),
            queue_recovery_interval: Duration::seconds(60),
            queue_retention: Duration::days(7),
        }
    }
}

/// Connection parameters of the relational store.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    /// Size of the sqlx pool. (default: 8)
    pub pool_size: u32,
    /// Store operations are retried this often before the session fails. (default: 3)
    pub store_retry_budget: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            name: "pardosa".to_string(),
            user: "pardosa".to_string(),
            password: String::new(),
            pool_size: 8,
            store_retry_budget: 3,
        }
    }
}

impl DatabaseConfig {
    /// Renders the postgres connection string.
    pub fn connection_string(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.name
        )
    }
}

/// A config value from the environment that did not parse.
#[derive(Debug, Error)]
#[error("invalid value {value:?} for {variable}: {reason}")]
pub struct EnvOverrideError {
    pub variable: String,
    pub value: String,
    pub reason: String,
}

impl Config {
    /// Applies `PARDOSA_*` overrides on top of the current values. Durations
    /// are given in seconds (fractions allowed). Unknown `PARDOSA_` variables
    /// are ignored here; they belong to the front-end, not the core.
    pub fn apply_env_overrides(&mut self) -> Result<(), EnvOverrideError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::apply_env_overrides`] but with an injectable source,
    /// so tests do not touch the process environment.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), EnvOverrideError>
    where
        F: Fn(&str) -> Option<String>,
    {
        macro_rules! take {
            ($field:expr, $name:literal, $parse:expr) => {
                if let Some(raw) = lookup(concat!("PARDOSA_", $name)) {
                    $field = $parse(&raw).map_err(|reason: String| EnvOverrideError {
                        variable: concat!("PARDOSA_", $name).to_string(),
                        value: raw.clone(),
                        reason,
                    })?;
                }
            };
        }

        fn num<T: std::str::FromStr>(raw: &str) -> Result<T, String>
        where
            T::Err: std::fmt::Display,
        {
            raw.trim().parse().map_err(|e: T::Err| e.to_string())
        }

        fn dur(raw: &str) -> Result<Duration, String> {
            let secs: f64 = raw.trim().parse().map_err(|_| "not a number".to_string())?;
            if !secs.is_finite() || secs < 0.0 {
                return Err("must be a non-negative number of seconds".to_string());
            }
            Ok(Duration::seconds_f64(secs))
        }

        fn text(raw: &str) -> Result<String, String> {
            Ok(raw.to_string())
        }

        fn list(raw: &str) -> Result<Vec<String>, String> {
            Ok(raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect())
        }

        take!(self.crawl.max_depth, "MAX_DEPTH", num::<u16>);
        take!(self.crawl.max_pages, "MAX_PAGES", num::<u64>);
        take!(
            self.crawl.concurrent_workers,
            "CONCURRENT_WORKERS",
            num::<NonZeroUsize>
        );
        take!(self.crawl.rate_limit_delay, "RATE_LIMIT_DELAY", dur);
        take!(self.crawl.request_timeout, "REQUEST_TIMEOUT", dur);
        take!(self.crawl.max_retries, "MAX_RETRIES", num::<u32>);
        take!(self.crawl.user_agent, "USER_AGENT", text);
        take!(self.crawl.max_connections, "MAX_CONNECTIONS", num::<usize>);
        take!(
            self.crawl.max_connections_per_host,
            "MAX_CONNECTIONS_PER_HOST",
            num::<usize>
        );
        take!(self.crawl.dns_cache_ttl, "DNS_CACHE_TTL", dur);
        take!(self.crawl.allowed_domains, "ALLOWED_DOMAINS", list);
        take!(self.crawl.blocked_domains, "BLOCKED_DOMAINS", list);
        take!(
            self.crawl.allowed_content_types,
            "ALLOWED_CONTENT_TYPES",
            list
        );
        take!(self.crawl.max_page_size, "MAX_PAGE_SIZE", num::<u64>);
        take!(self.crawl.min_text_length, "MIN_TEXT_LENGTH", num::<usize>);
        take!(self.crawl.max_url_len, "MAX_URL_LEN", num::<usize>);
        take!(self.crawl.seed_priority, "SEED_PRIORITY", num::<i32>);
        take!(self.crawl.robots_ttl, "ROBOTS_TTL", dur);
        take!(self.crawl.metrics_interval, "METRICS_INTERVAL", dur);
        take!(self.text.min_word_len, "MIN_WORD_LEN", num::<usize>);
        take!(self.text.max_word_len, "MAX_WORD_LEN", num::<usize>);
        take!(
            self.text.max_words_per_page,
            "MAX_WORDS_PER_PAGE",
            num::<usize>
        );
        take!(self.queue.queue_backend, "QUEUE_BACKEND", |raw: &str| raw
            .parse::<QueueBackend>()
            .map_err(|e| e.to_string()));
        take!(self.queue.queue_lease_duration, "QUEUE_LEASE_DURATION", dur);
        take!(
            self.queue.queue_recovery_interval,
            "QUEUE_RECOVERY_INTERVAL",
            dur
        );
        take!(self.queue.queue_retention, "QUEUE_RETENTION", dur);
        take!(self.database.host, "DB_HOST", text);
        take!(self.database.port, "DB_PORT", num::<u16>);
        take!(self.database.name, "DB_NAME", text);
        take!(self.database.user, "DB_USER", text);
        take!(self.database.password, "DB_PASSWORD", text);
        take!(self.database.pool_size, "DB_POOL_SIZE", num::<u32>);
        take!(
            self.database.store_retry_budget,
            "STORE_RETRY_BUDGET",
            num::<u32>
        );
        Ok(())
    }
}
