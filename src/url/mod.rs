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

mod normalizer;

pub use normalizer::{NormalizeError, UrlNormalizer};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// A url in canonical form. The wrapped string is the sole identity used for
/// deduplication and storage; two urls that normalize to the same string are
/// the same page.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct NormalizedUrl(url::Url);

impl NormalizedUrl {
    /// Only the normalizer constructs these.
    pub(crate) fn from_canonical(url: url::Url) -> Self {
        Self(url)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    #[inline]
    pub fn as_url(&self) -> &url::Url {
        &self.0
    }

    /// The lowercased host. Present by construction, http(s) urls without a
    /// host are rejected during normalization.
    pub fn host(&self) -> &str {
        self.0.host_str().unwrap_or_default()
    }

    /// Key for everything that is scoped per host: robots cache, rate
    /// limiter, link classification. Carries scheme and any explicit port.
    pub fn origin_key(&self) -> String {
        self.0.origin().ascii_serialization()
    }

    /// Whether `other` points at the same host.
    pub fn same_host(&self, other: &NormalizedUrl) -> bool {
        self.host().eq_ignore_ascii_case(other.host())
    }
}

impl Display for NormalizedUrl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl AsRef<str> for NormalizedUrl {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
