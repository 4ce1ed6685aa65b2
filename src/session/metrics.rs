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
use time::OffsetDateTime;

/// Session counters, mutated only by the session task. Workers report
/// through the result channel; nothing here is shared.
#[derive(Debug)]
pub struct SessionCounters {
    pub pages_crawled: u64,
    pub bytes_processed: u64,
    pub errors: u64,
    started_at: OffsetDateTime,
}

impl SessionCounters {
    pub fn new() -> Self {
        Self {
            pages_crawled: 0,
            bytes_processed: 0,
            errors: 0,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }

    /// A point-in-time snapshot; rates are averaged over the session so far.
    /// Readers may observe values slightly behind the queue, snapshots are
    /// not linearizable with persistence.
    pub fn snapshot(&self, in_flight: u64, queue_length: u64) -> MetricsSnapshot {
        let now = OffsetDateTime::now_utc();
        let elapsed = (now - self.started_at).as_seconds_f64().max(f64::EPSILON);
        MetricsSnapshot {
            recorded_at: now,
            pages_crawled: self.pages_crawled,
            bytes_processed: self.bytes_processed,
            errors: self.errors,
            pages_per_sec: self.pages_crawled as f64 / elapsed,
            bytes_per_sec: self.bytes_processed as f64 / elapsed,
            in_flight,
            queue_length,
        }
    }
}

impl Default for SessionCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// One row of the session metrics time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub recorded_at: OffsetDateTime,
    pub pages_crawled: u64,
    pub bytes_processed: u64,
    pub errors: u64,
    pub pages_per_sec: f64,
    pub bytes_per_sec: f64,
    pub in_flight: u64,
    pub queue_length: u64,
}
