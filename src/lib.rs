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

//! Pardosa is a polite, concurrent, breadth-first web crawler. Starting from
//! a set of seeds it fetches, parses and analyzes pages and persists pages,
//! discovered links and per-page word frequencies into a relational store,
//! together with a running stream of session metrics.
//!
//! The entry point is [`session::CrawlSession`]; everything else hangs off
//! the handles a session owns.

pub mod analyze;
pub mod app_logging;
pub mod client;
pub mod config;
pub mod dedup;
pub mod error;
pub mod extract;
pub mod politeness;
pub mod queue;
pub mod recovery;
pub mod robots;
pub mod runtime;
pub mod session;
pub mod store;
pub mod url;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_impls;

pub use config::Config;
pub use error::{CrawlError, CrawlErrorKind};
pub use session::CrawlSession;
