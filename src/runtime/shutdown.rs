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

use tokio_util::sync::CancellationToken;

/// The cancellation plumbing of one session. The session holds the root
/// token; every task it spawns gets a child so that cancelling the session
/// reaches workers, recovery and any rate-limit wait in flight.
#[derive(Debug, Clone)]
#[repr(transparent)]
pub struct Shutdown {
    token: CancellationToken,
}

impl Shutdown {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Returns `true` once cancellation was requested.
    #[inline]
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Requests cancellation of everything hanging off this token.
    pub fn cancel(&self) {
        self.token.cancel()
    }

    /// Resolves once cancellation was requested.
    pub async fn wait(&self) {
        self.token.cancelled().await
    }

    /// A token handed to spawned tasks. Cancelling the child does not cancel
    /// the session.
    pub fn child(&self) -> Shutdown {
        Shutdown {
            token: self.token.child_token(),
        }
    }

    /// Wires SIGINT to this token. Used by front-ends, harmless in tests.
    pub fn cancel_on_ctrl_c(&self) {
        let token = self.token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Received interrupt, shutting down.");
                token.cancel();
            }
        });
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn child_sees_parent_cancellation() {
        let root = Shutdown::new();
        let child = root.child();
        assert!(!child.is_shutdown());
        root.cancel();
        assert!(child.is_shutdown());
        child.wait().await;
    }

    #[tokio::test]
    async fn child_cancellation_stays_local() {
        let root = Shutdown::new();
        let child = root.child();
        child.cancel();
        assert!(child.is_shutdown());
        assert!(!root.is_shutdown());
    }
}
