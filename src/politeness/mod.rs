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

use crate::runtime::Shutdown;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;
use thiserror::Error;
use tokio::time::Instant;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Error)]
#[error("rate limit wait was cancelled")]
pub struct Cancelled;

/// One gate per origin. The tokio mutex queues waiters in arrival order, so
/// dispatch against a single host is fair; hosts never contend with each
/// other beyond the short map lookup.
#[derive(Debug, Default)]
struct HostSlot {
    next_available_at: tokio::sync::Mutex<Option<Instant>>,
}

/// Per-host minimum-interval gate. `acquire` blocks cooperatively until the
/// host is due, then books the next slot. A cancelled waiter leaves the
/// booking untouched.
#[derive(Debug)]
pub struct HostRateLimiter {
    floor: StdDuration,
    slots: Mutex<HashMap<String, Arc<HostSlot>>>,
}

impl HostRateLimiter {
    /// `floor` is the global minimum interval; per-host robots crawl-delays
    /// only ever raise it.
    pub fn new(floor: time::Duration) -> Self {
        Self {
            floor: floor.unsigned_abs(),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, origin: &str) -> Arc<HostSlot> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.entry(origin.to_string()).or_default().clone()
    }

    /// The effective interval for a host given its robots crawl-delay.
    pub fn interval_for(&self, crawl_delay: Option<time::Duration>) -> StdDuration {
        match crawl_delay {
            Some(delay) => self.floor.max(delay.unsigned_abs()),
            None => self.floor,
        }
    }

    /// Waits until the origin is due and books `interval` ahead. Waiters for
    /// one origin are served in arrival order. On cancellation the wait ends
    /// immediately and `next_available_at` does not advance.
    pub async fn acquire(
        &self,
        origin: &str,
        interval: StdDuration,
        shutdown: &Shutdown,
    ) -> Result<(), Cancelled> {
        if shutdown.is_shutdown() {
            return Err(Cancelled);
        }
        let slot = self.slot(origin);
        let mut next = tokio::select! {
            guard = slot.next_available_at.lock() => guard,
            _ = shutdown.wait() => return Err(Cancelled),
        };
        if let Some(due) = *next {
            if due > Instant::now() {
                tokio::select! {
                    _ = tokio::time::sleep_until(due) => {}
                    _ = shutdown.wait() => return Err(Cancelled),
                }
            }
        }
        *next = Some(Instant::now() + interval);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn second_acquire_waits_out_the_interval() {
        let limiter = HostRateLimiter::new(time::Duration::seconds(1));
        let shutdown = Shutdown::new();
        let interval = StdDuration::from_secs(1);

        let started = Instant::now();
        limiter.acquire("http://h", interval, &shutdown).await.unwrap();
        limiter.acquire("http://h", interval, &shutdown).await.unwrap();
        assert!(started.elapsed() >= interval);
    }

    #[tokio::test(start_paused = true)]
    async fn hosts_do_not_interfere() {
        let limiter = HostRateLimiter::new(time::Duration::seconds(5));
        let shutdown = Shutdown::new();
        let interval = StdDuration::from_secs(5);

        let started = Instant::now();
        limiter.acquire("http://a", interval, &shutdown).await.unwrap();
        limiter.acquire("http://b", interval, &shutdown).await.unwrap();
        assert!(started.elapsed() < StdDuration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_without_booking() {
        let limiter = Arc::new(HostRateLimiter::new(time::Duration::seconds(10)));
        let shutdown = Shutdown::new();
        let interval = StdDuration::from_secs(10);

        limiter.acquire("http://h", interval, &shutdown).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                limiter.acquire("http://h", interval, &shutdown).await
            })
        };
        tokio::task::yield_now().await;
        shutdown.cancel();
        assert_eq!(Err(Cancelled), waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_served_in_arrival_order() {
        let limiter = Arc::new(HostRateLimiter::new(time::Duration::seconds(1)));
        let shutdown = Shutdown::new();
        let interval = StdDuration::from_secs(1);
        let order = Arc::new(Mutex::new(Vec::new()));

        limiter.acquire("http://h", interval, &shutdown).await.unwrap();

        let mut handles = Vec::new();
        for id in 0..3 {
            let limiter = limiter.clone();
            let shutdown = shutdown.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire("http://h", interval, &shutdown).await.unwrap();
                order.lock().unwrap().push(id);
            }));
            // Let the waiter enqueue before spawning the next one.
            tokio::task::yield_now().await;
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(vec![0, 1, 2], *order.lock().unwrap());
    }
}
