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

use super::NormalizedUrl;
use crate::config::CrawlConfig;
use std::net::IpAddr;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Parse(#[from] url::ParseError),
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("url has no host")]
    EmptyHost,
    #[error("host {0} is in a denied ip range")]
    DeniedIp(IpAddr),
    #[error("url length {0} exceeds the configured maximum")]
    TooLong(usize),
}

/// Canonicalizes urls for stable identity: lowercase scheme and host (done
/// by the parser), no default ports, no fragments, tracking parameters
/// stripped, remaining query pairs sorted, consistent percent encoding.
/// `normalize(normalize(u)) == normalize(u)` holds for every accepted input.
#[derive(Debug, Clone)]
pub struct UrlNormalizer {
    tracking_exact: Vec<String>,
    tracking_prefixes: Vec<String>,
    max_url_len: usize,
    deny_local_ips: bool,
}

impl UrlNormalizer {
    pub fn from_config(config: &CrawlConfig) -> Self {
        Self::new(&config.tracking_params, config.max_url_len, true)
    }

    /// `tracking_params` are exact query parameter names, or prefixes when
    /// written with a trailing `*`.
    pub fn new(tracking_params: &[String], max_url_len: usize, deny_local_ips: bool) -> Self {
        let (prefixes, exact): (Vec<_>, Vec<_>) = tracking_params
            .iter()
            .partition(|p| p.ends_with('*'));
        Self {
            tracking_exact: exact.into_iter().map(|p| p.to_ascii_lowercase()).collect(),
            tracking_prefixes: prefixes
                .into_iter()
                .map(|p| p.trim_end_matches('*').to_ascii_lowercase())
                .collect(),
            max_url_len,
            deny_local_ips,
        }
    }

    /// Canonicalizes an absolute url.
    pub fn normalize(&self, raw: &str) -> Result<NormalizedUrl, NormalizeError> {
        self.canonicalize(Url::parse(raw.trim())?)
    }

    /// Resolves `href` against `base` and canonicalizes the result.
    pub fn normalize_with_base(
        &self,
        base: &NormalizedUrl,
        href: &str,
    ) -> Result<NormalizedUrl, NormalizeError> {
        self.canonicalize(base.as_url().join(href.trim())?)
    }

    fn canonicalize(&self, mut url: Url) -> Result<NormalizedUrl, NormalizeError> {
        match url.scheme() {
            "http" | "https" => {}
            other => return Err(NormalizeError::UnsupportedScheme(other.to_string())),
        }
        let host = url.host_str().ok_or(NormalizeError::EmptyHost)?;
        if host.is_empty() {
            return Err(NormalizeError::EmptyHost);
        }
        if self.deny_local_ips {
            if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
                if ip_is_local(&ip) {
                    return Err(NormalizeError::DeniedIp(ip));
                }
            }
        }

        url.set_fragment(None);

        if url.query().is_some() {
            let mut pairs: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| !self.is_tracking_param(key))
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect();
            pairs.sort();
            if pairs.is_empty() {
                url.set_query(None);
            } else {
                url.query_pairs_mut().clear().extend_pairs(&pairs);
            }
        }

        if url.as_str().len() > self.max_url_len {
            return Err(NormalizeError::TooLong(url.as_str().len()));
        }
        Ok(NormalizedUrl::from_canonical(url))
    }

    fn is_tracking_param(&self, key: &str) -> bool {
        let key = key.to_ascii_lowercase();
        self.tracking_exact.iter().any(|p| *p == key)
            || self.tracking_prefixes.iter().any(|p| key.starts_with(p.as_str()))
    }
}

fn ip_is_local(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback() || v4.is_private() || v4.is_link_local() || v4.is_unspecified()
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 and fe80::/10
                || (seg[0] & 0xfe00) == 0xfc00
                || (seg[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CrawlConfig;

    fn normalizer() -> UrlNormalizer {
        UrlNormalizer::from_config(&CrawlConfig::default())
    }

    #[test]
    fn strips_fragment_and_default_port() {
        let n = normalizer();
        assert_eq!(
            "http://example.com/a",
            n.normalize("HTTP://EXAMPLE.com:80/a#section").unwrap().as_str()
        );
        assert_eq!(
            "https://example.com/",
            n.normalize("https://example.com:443").unwrap().as_str()
        );
    }

    #[test]
    fn sorts_query_and_drops_tracking_params() {
        let n = normalizer();
        let url = n
            .normalize("http://example.com/x?b=2&utm_source=mail&a=1&fbclid=abc")
            .unwrap();
        assert_eq!("http://example.com/x?a=1&b=2", url.as_str());
        // A query that is nothing but tracking noise vanishes entirely.
        let url = n.normalize("http://example.com/x?utm_campaign=y").unwrap();
        assert_eq!("http://example.com/x", url.as_str());
    }

    #[test]
    fn normalization_is_idempotent() {
        let n = normalizer();
        for raw in [
            "http://Example.com:80/path/?z=1&a=2#frag",
            "https://example.com/%7Euser/a b",
            "http://example.com/x?utm_source=t&k=v",
        ] {
            let once = n.normalize(raw).unwrap();
            let twice = n.normalize(once.as_str()).unwrap();
            assert_eq!(once, twice, "not idempotent for {raw}");
        }
    }

    #[test]
    fn rejects_foreign_schemes_and_missing_hosts() {
        let n = normalizer();
        assert!(matches!(
            n.normalize("ftp://example.com/"),
            Err(NormalizeError::UnsupportedScheme(_))
        ));
        assert!(matches!(
            n.normalize("mailto:someone@example.com"),
            Err(NormalizeError::UnsupportedScheme(_)) | Err(NormalizeError::EmptyHost)
        ));
        assert!(n.normalize("not a url").is_err());
    }

    #[test]
    fn rejects_local_ip_literals() {
        let n = normalizer();
        assert!(matches!(
            n.normalize("http://127.0.0.1/x"),
            Err(NormalizeError::DeniedIp(_))
        ));
        assert!(matches!(
            n.normalize("http://192.168.1.4/"),
            Err(NormalizeError::DeniedIp(_))
        ));
        assert!(matches!(
            n.normalize("http://[::1]/"),
            Err(NormalizeError::DeniedIp(_))
        ));
        // Public addresses pass.
        assert!(n.normalize("http://93.184.216.34/").is_ok());
    }

    #[test]
    fn rejects_overlong_urls() {
        let n = UrlNormalizer::new(&[], 64, true);
        let raw = format!("http://example.com/{}", "a".repeat(100));
        assert!(matches!(n.normalize(&raw), Err(NormalizeError::TooLong(_))));
    }

    #[test]
    fn resolves_relative_links() {
        let n = normalizer();
        let base = n.normalize("http://example.com/dir/page.html").unwrap();
        assert_eq!(
            "http://example.com/dir/other.html",
            n.normalize_with_base(&base, "other.html").unwrap().as_str()
        );
        assert_eq!(
            "http://example.com/abs",
            n.normalize_with_base(&base, "/abs").unwrap().as_str()
        );
        assert_eq!(
            "http://other.org/",
            n.normalize_with_base(&base, "http://other.org/").unwrap().as_str()
        );
    }

    #[test]
    fn origin_key_carries_scheme_host_and_port() {
        let n = normalizer();
        let a = n.normalize("http://example.com/a").unwrap();
        let b = n.normalize("http://example.com:8080/b").unwrap();
        assert_eq!("http://example.com", a.origin_key());
        assert_eq!("http://example.com:8080", b.origin_key());
        assert_ne!(a.origin_key(), b.origin_key());
    }
}
