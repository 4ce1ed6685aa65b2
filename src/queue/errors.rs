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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("the queue is closed")]
    Closed,
    #[error("{0} is not known to the queue")]
    UnknownUrl(String),
    #[error("{url} is {actual}, expected {expected}")]
    InvalidTransition {
        url: String,
        actual: crate::queue::UrlStatus,
        expected: crate::queue::UrlStatus,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}
