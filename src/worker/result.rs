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

use crate::analyze::WordStats;
use crate::error::{CrawlError, CrawlErrorKind};
use crate::queue::{UrlCandidate, UrlOutcome};
use crate::store::{LinkRecord, StageTimings};
use crate::url::NormalizedUrl;
use uuid::Uuid;

/// Everything a worker has to say about one url. Errors ride inside, never
/// across the channel as a failure, which is what keeps a bad url from
/// taking a worker down.
#[derive(Debug)]
pub struct FetchResult {
    pub session_id: Uuid,
    pub url: NormalizedUrl,
    pub parent: Option<NormalizedUrl>,
    pub depth: u16,
    pub priority: i32,
    pub attempts: u32,
    pub http_status: Option<u16>,
    /// Destination after redirects when it differs from the request url.
    pub final_url: Option<String>,
    pub content_type: Option<String>,
    pub body_size: u64,
    pub title: Option<String>,
    pub text_length: u64,
    pub words: WordStats,
    /// Every outbound link of the page in document order, classified
    /// against the source host. This is what the link graph persists.
    pub outbound: Vec<LinkRecord>,
    /// The subset that survived filtering, ready to enqueue.
    pub links: Vec<UrlCandidate>,
    pub timings: StageTimings,
    pub parse_errors: usize,
    pub error: Option<CrawlError>,
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn was_cancelled(&self) -> bool {
        matches!(
            self.error,
            Some(CrawlError {
                kind: CrawlErrorKind::Cancelled,
                ..
            })
        )
    }

    /// The queue transition this result asks for. Cancelled results have no
    /// outcome, the session releases those instead.
    pub fn outcome(&self) -> UrlOutcome {
        match &self.error {
            None => UrlOutcome::Done,
            Some(error) if error.kind.is_skip() => UrlOutcome::Skipped { reason: error.kind },
            Some(error) => UrlOutcome::Failed {
                error: error.clone(),
                retryable: error.kind.retryable(self.http_status),
            },
        }
    }
}
