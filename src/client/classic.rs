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

use super::traits::{Client, ClientError, FetchedResponse, RequestLimits};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use std::error::Error as _;
use std::time::Instant;
use tokio::sync::Semaphore;

/// The classic reqwest-backed transport. Transparent gzip/deflate, bounded
/// redirects, no cookie store. The pool is capped per host by reqwest and in
/// total by a semaphore, reqwest itself only bounds idle connections.
#[derive(Debug)]
pub struct ClassicClient {
    client: reqwest::Client,
    user_agent: String,
    connection_slots: Semaphore,
}

impl ClassicClient {
    pub fn from_config(config: &crate::config::CrawlConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(Policy::limited(config.redirect_limit))
            .pool_max_idle_per_host(config.max_connections_per_host)
            .pool_idle_timeout(config.dns_cache_ttl.unsigned_abs())
            .build()
            .map_err(|e| ClientError::Other(e.to_string()))?;
        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
            connection_slots: Semaphore::new(config.max_connections.max(1)),
        })
    }

    fn map_error(err: reqwest::Error) -> ClientError {
        if err.is_timeout() {
            return ClientError::Timeout;
        }
        if err.is_builder() {
            return ClientError::InvalidUrl(err.to_string());
        }
        if err.is_connect() {
            // reqwest folds resolver failures into connect errors, the
            // source chain is the only place the distinction survives.
            let mut source: Option<&(dyn std::error::Error + 'static)> = err.source();
            while let Some(inner) = source {
                if inner.to_string().to_ascii_lowercase().contains("dns") {
                    return ClientError::Dns(err.to_string());
                }
                source = inner.source();
            }
            return ClientError::Connect(err.to_string());
        }
        ClientError::Other(err.to_string())
    }
}

#[async_trait]
impl Client for ClassicClient {
    fn user_agent(&self) -> &str {
        &self.user_agent
    }

    async fn get(
        &self,
        url: &str,
        limits: RequestLimits,
    ) -> Result<FetchedResponse, ClientError> {
        let _slot = self
            .connection_slots
            .acquire()
            .await
            .map_err(|_| ClientError::Other("connection pool closed".to_string()))?;

        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(limits.timeout)
            .send()
            .await
            .map_err(Self::map_error)?;
        let first_byte = started.elapsed();

        if let Some(len) = response.content_length() {
            if len > limits.max_body {
                return Err(ClientError::BodyTooLarge {
                    limit: limits.max_body,
                });
            }
        }

        let status = response.status();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(';')
                    .next()
                    .unwrap_or_default()
                    .trim()
                    .to_ascii_lowercase()
            });

        let mut response = response;
        let mut body: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(Self::map_error)? {
            if body.len() as u64 + chunk.len() as u64 > limits.max_body {
                return Err(ClientError::BodyTooLarge {
                    limit: limits.max_body,
                });
            }
            body.extend_from_slice(&chunk);
        }

        Ok(FetchedResponse {
            status,
            final_url,
            content_type,
            body,
            first_byte,
            total: started.elapsed(),
        })
    }
}
