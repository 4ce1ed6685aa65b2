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

mod bloom;

pub use bloom::BloomFilter;

use crate::url::NormalizedUrl;
use std::collections::HashSet;
use std::hash::Hasher;
use std::sync::Mutex;
use twox_hash::XxHash64;

const SHARDS: usize = 16;

/// Visited-url membership for one session. Layer one is a Bloom filter
/// sized for the session's page budget, layer two a sharded exact set of
/// normalized urls. The exact insert is the linearization point of `add`:
/// two workers racing on the same link get exactly one `true` between them.
#[derive(Debug)]
pub struct VisitedFilter {
    bloom: BloomFilter,
    shards: [Mutex<HashSet<Box<str>>>; SHARDS],
}

impl VisitedFilter {
    /// Sized for `expected_urls` at a 1% false-positive target. The bloom
    /// layer is generously oversized because discovered-but-never-crawled
    /// urls pass through here too.
    pub fn new(expected_urls: u64) -> Self {
        Self {
            bloom: BloomFilter::for_capacity(expected_urls.saturating_mul(8).max(1024), 0.01),
            shards: std::array::from_fn(|_| Mutex::new(HashSet::new())),
        }
    }

    fn shard(&self, url: &NormalizedUrl) -> &Mutex<HashSet<Box<str>>> {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(url.as_str().as_bytes());
        &self.shards[hasher.finish() as usize % SHARDS]
    }

    /// Returns `true` iff the url was newly added.
    pub fn add(&self, url: &NormalizedUrl) -> bool {
        self.bloom.insert(url.as_str().as_bytes());
        let mut shard = self.shard(url).lock().unwrap_or_else(|e| e.into_inner());
        shard.insert(Box::from(url.as_str()))
    }

    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        if !self.bloom.contains(url.as_str().as_bytes()) {
            return false;
        }
        self.shard(url)
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(url.as_str())
    }

    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::url::UrlNormalizer;
    use std::sync::Arc;

    fn url(raw: &str) -> NormalizedUrl {
        UrlNormalizer::new(&[], 2048, false).normalize(raw).unwrap()
    }

    #[test]
    fn add_is_first_wins() {
        let filter = VisitedFilter::new(100);
        assert!(filter.add(&url("http://h/a")));
        assert!(!filter.add(&url("http://h/a")));
        assert!(filter.contains(&url("http://h/a")));
        assert!(!filter.contains(&url("http://h/b")));
        assert_eq!(1, filter.len());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_discoverers_get_one_true() {
        let filter = Arc::new(VisitedFilter::new(1000));
        let handles = (0..8).map(|_| {
            let filter = filter.clone();
            tokio::spawn(async move {
                (0..250)
                    .filter(|i| filter.add(&url(&format!("http://h/{i}"))))
                    .count()
            })
        });
        let total_new: usize = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .sum();
        // 8 tasks race over the same 250 urls; every url is won exactly once.
        assert_eq!(250, total_new);
        assert_eq!(250, filter.len());
    }
}
