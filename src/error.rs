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
use strum::{Display, EnumString};

/// The taxonomy of everything that can go wrong while processing one url.
/// Workers never propagate these as errors across the result channel, they
/// embed them in the emitted [`crate::worker::FetchResult`].
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CrawlErrorKind {
    InvalidUrl,
    DisallowedByRobots,
    DisallowedContentType,
    BodyTooLarge,
    HttpClientError,
    HttpServerError,
    NetworkTimeout,
    NetworkReset,
    DnsFailure,
    ParseError,
    Persistence,
    Cancelled,
}

impl CrawlErrorKind {
    /// Whether a retry of the same url may succeed. 408 and 429 are the two
    /// client statuses that behave like transient conditions.
    pub fn retryable(&self, http_status: Option<u16>) -> bool {
        match self {
            Self::HttpServerError | Self::NetworkTimeout | Self::NetworkReset | Self::DnsFailure => {
                true
            }
            Self::HttpClientError => matches!(http_status, Some(408) | Some(429)),
            Self::Persistence => true,
            _ => false,
        }
    }

    /// Kinds that end a url as SKIPPED instead of FAILED.
    pub fn is_skip(&self) -> bool {
        matches!(
            self,
            Self::DisallowedByRobots | Self::DisallowedContentType | Self::BodyTooLarge
        )
    }
}

/// An error kind together with the human readable cause.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct CrawlError {
    pub kind: CrawlErrorKind,
    pub message: String,
}

impl CrawlError {
    pub fn new(kind: CrawlErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Maps a transport error onto the taxonomy.
    pub fn from_transport(err: &crate::client::ClientError) -> Self {
        use crate::client::ClientError;
        let kind = match err {
            ClientError::Timeout => CrawlErrorKind::NetworkTimeout,
            ClientError::Dns(_) => CrawlErrorKind::DnsFailure,
            ClientError::Connect(_) => CrawlErrorKind::NetworkReset,
            ClientError::BodyTooLarge { .. } => CrawlErrorKind::BodyTooLarge,
            ClientError::InvalidUrl(_) => CrawlErrorKind::InvalidUrl,
            ClientError::Other(_) => CrawlErrorKind::NetworkReset,
        };
        Self::new(kind, err.to_string())
    }

    /// Maps a http status outside 2xx onto the taxonomy.
    pub fn from_status(status: u16) -> Self {
        let kind = if status >= 500 {
            CrawlErrorKind::HttpServerError
        } else {
            CrawlErrorKind::HttpClientError
        };
        Self::new(kind, format!("http status {status}"))
    }
}

impl std::fmt::Display for CrawlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retryability_follows_the_taxonomy() {
        assert!(CrawlErrorKind::HttpServerError.retryable(Some(503)));
        assert!(CrawlErrorKind::NetworkTimeout.retryable(None));
        assert!(CrawlErrorKind::HttpClientError.retryable(Some(429)));
        assert!(CrawlErrorKind::HttpClientError.retryable(Some(408)));
        assert!(!CrawlErrorKind::HttpClientError.retryable(Some(404)));
        assert!(!CrawlErrorKind::DisallowedByRobots.retryable(None));
        assert!(!CrawlErrorKind::ParseError.retryable(None));
    }

    #[test]
    fn skip_kinds() {
        assert!(CrawlErrorKind::DisallowedByRobots.is_skip());
        assert!(CrawlErrorKind::BodyTooLarge.is_skip());
        assert!(!CrawlErrorKind::HttpServerError.is_skip());
    }

    #[test]
    fn kind_names_are_stable() {
        assert_eq!("DISALLOWED_BY_ROBOTS", CrawlErrorKind::DisallowedByRobots.to_string());
        assert_eq!(
            CrawlErrorKind::NetworkTimeout,
            "NETWORK_TIMEOUT".parse().unwrap()
        );
    }
}
