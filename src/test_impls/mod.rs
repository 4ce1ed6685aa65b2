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

//! Scripted stand-ins for the network, shared by the unit tests.

use crate::client::{Client, ClientError, FetchedResponse, RequestLimits};
use async_trait::async_trait;
use reqwest::StatusCode;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration as StdDuration;

#[derive(Debug, Clone)]
struct CannedResponse {
    status: StatusCode,
    content_type: Option<String>,
    body: Vec<u8>,
    final_url: Option<String>,
}

#[derive(Debug, Clone)]
enum Scripted {
    Respond(CannedResponse),
    Fail(fn() -> ClientError),
}

/// A transport that serves canned responses per url and counts every hit.
/// Responses queue in insertion order; the last one repeats. Unscripted
/// urls answer an empty 404, which conveniently makes robots.txt allow-all.
#[derive(Debug)]
pub struct FakeClient {
    user_agent: String,
    scripts: Mutex<HashMap<String, VecDeque<Scripted>>>,
    hits: Mutex<HashMap<String, u64>>,
}

impl FakeClient {
    pub fn new(user_agent: impl Into<String>) -> Self {
        Self {
            user_agent: user_agent.into(),
            scripts: Mutex::new(HashMap::new()),
            hits: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert_ok(
        &self,
        url: &str,
        status: StatusCode,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) {
        self.push(
            url,
            Scripted::Respond(CannedResponse {
                status,
                content_type: content_type.map(String::from),
                body,
                final_url: None,
            }),
        );
    }

    /// Scripts a redirect: the fetch reports `final_url` as its destination.
    pub fn insert_redirected(
        &self,
        url: &str,
        final_url: &str,
        status: StatusCode,
        content_type: Option<&str>,
        body: Vec<u8>,
    ) {
        self.push(
            url,
            Scripted::Respond(CannedResponse {
                status,
                content_type: content_type.map(String::from),
                body,
                final_url: Some(final_url.to_string()),
            }),
        );
    }

    pub fn insert_err(&self, url: &str, make: fn() -> ClientError) {
        self.push(url, Scripted::Fail(make));
    }

    fn push(&self, url: &str, scripted: Scripted) {
        self.scripts
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .push_back(scripted);
    }

    /// How often `url` was requested.
    pub fn hits(&self, url: &str) -> u64 {
        self.hits.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_hits(&self) -> u64 {
        self.hits.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl Client for FakeClient {
    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn get(&self, url: &str, limits: RequestLimits)
        -> Result<FetchedResponse, ClientError> {
        *self.hits.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            }
        };

        match scripted {
            Some(Scripted::Fail(make)) => Err(make()),
            Some(Scripted::Respond(canned)) => {
                if canned.body.len() as u64 > limits.max_body {
                    return Err(ClientError::BodyTooLarge {
                        limit: limits.max_body,
                    });
                }
                Ok(FetchedResponse {
                    status: canned.status,
                    final_url: canned.final_url.unwrap_or_else(|| url.to_string()),
                    content_type: canned.content_type,
                    body: canned.body,
                    first_byte: StdDuration::from_millis(1),
                    total: StdDuration::from_millis(2),
                })
            }
            None => Ok(FetchedResponse {
                status: StatusCode::NOT_FOUND,
                final_url: url.to_string(),
                content_type: None,
                body: Vec::new(),
                first_byte: StdDuration::from_millis(1),
                total: StdDuration::from_millis(1),
            }),
        }
    }
}
