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

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;

/// Per-call bounds; the caller decides, not the transport. Page fetches use
/// the session's request timeout and body cap, robots fetches a short one.
#[derive(Debug, Copy, Clone)]
pub struct RequestLimits {
    pub timeout: Duration,
    pub max_body: u64,
}

/// The response of a fetch, body fully read.
#[derive(Debug)]
pub struct FetchedResponse {
    pub status: StatusCode,
    /// The final destination after any redirects.
    pub final_url: String,
    /// The media type essence from the Content-Type header, if any.
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    /// Time until response headers arrived.
    pub first_byte: Duration,
    /// Time until the body was fully read.
    pub total: Duration,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request timed out")]
    Timeout,
    #[error("dns resolution failed: {0}")]
    Dns(String),
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("body exceeds the {limit} byte cap")]
    BodyTooLarge { limit: u64 },
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("transport error: {0}")]
    Other(String),
}

/// The transport used to download data. A trait so that tests substitute a
/// scripted fake; the production implementation is
/// [`super::ClassicClient`].
#[async_trait]
pub trait Client: Send + Sync + std::fmt::Debug + 'static {
    fn user_agent(&self) -> &str;

    /// Performs a GET and reads the whole body, honoring the given limits.
    /// Non-2xx statuses are a successful fetch, not an error.
    async fn get(&self, url: &str, limits: RequestLimits)
        -> Result<FetchedResponse, ClientError>;
}
