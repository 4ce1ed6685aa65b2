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

use crate::url::NormalizedUrl;
use itertools::Itertools;
use scraper::{Html, Node};
use smallvec::SmallVec;
use std::borrow::Cow;
use std::collections::HashSet;
use thiserror::Error;

mod selectors {
    use scraper::Selector;
    use std::sync::OnceLock;

    macro_rules! selector {
        ($name:ident, $query:literal) => {
            pub fn $name() -> &'static Selector {
                static CELL: OnceLock<Selector> = OnceLock::new();
                CELL.get_or_init(|| Selector::parse($query).expect("static selector"))
            }
        };
    }

    selector!(title, "title");
    selector!(base, "base[href]");
    selector!(anchors, "a[href]");
}

/// Elements whose text is never page content.
const EXCLUDED_TEXT_TAGS: [&str; 5] = ["script", "style", "noscript", "template", "head"];

#[derive(Debug, Error, Eq, PartialEq)]
pub enum ExtractError {
    #[error("content type {0:?} is not allowed")]
    DisallowedContentType(String),
    #[error("body of {0} bytes exceeds the configured maximum")]
    BodyTooLarge(u64),
}

/// What one page boiled down to.
#[derive(Debug, Default)]
pub struct ExtractedDocument {
    pub title: Option<String>,
    /// Whitespace-normalized plain text without scripts, styles or comments.
    pub text: String,
    /// Outbound absolute urls in document order, deduplicated within the page.
    pub links: Vec<String>,
    /// html5ever recovers from broken markup; this only counts what it
    /// complained about on the way.
    pub parse_errors: usize,
}

/// Html to text, link enumeration and metadata capture.
#[derive(Debug, Clone)]
pub struct ContentExtractor {
    allowed_content_types: Vec<String>,
    max_page_size: u64,
}

impl ContentExtractor {
    pub fn from_config(config: &crate::config::CrawlConfig) -> Self {
        Self {
            allowed_content_types: config
                .allowed_content_types
                .iter()
                .map(|t| t.trim().to_ascii_lowercase())
                .collect(),
            max_page_size: config.max_page_size,
        }
    }

    /// Checks type and size, then parses. Broken markup is recovered
    /// leniently rather than failing the page.
    pub fn extract(
        &self,
        body: &[u8],
        content_type: Option<&str>,
        final_url: &NormalizedUrl,
    ) -> Result<ExtractedDocument, ExtractError> {
        if body.len() as u64 > self.max_page_size {
            return Err(ExtractError::BodyTooLarge(body.len() as u64));
        }
        let declared = match content_type {
            Some(declared) => Cow::Borrowed(declared),
            // No header; accept only what plainly looks like an html document.
            None if looks_like_html(body) => Cow::Borrowed("text/html"),
            None => Cow::Owned(String::new()),
        };
        if !self
            .allowed_content_types
            .iter()
            .any(|allowed| allowed == declared.as_ref())
        {
            return Err(ExtractError::DisallowedContentType(declared.into_owned()));
        }

        let html = Html::parse_document(&String::from_utf8_lossy(body));
        let parse_errors = html.errors.len();

        let title = html
            .select(selectors::title())
            .next()
            .map(|t| t.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());

        let base = html
            .select(selectors::base())
            .next()
            .and_then(|b| b.value().attr("href"))
            .and_then(|href| final_url.as_url().join(href).ok());
        let base = base.as_ref().unwrap_or_else(|| final_url.as_url());

        let mut seen = HashSet::new();
        let mut links = Vec::new();
        for anchor in html.select(selectors::anchors()) {
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            let Ok(absolute) = base.join(href.trim()) else {
                continue;
            };
            let absolute = absolute.to_string();
            if seen.insert(absolute.clone()) {
                links.push(absolute);
            }
        }

        Ok(ExtractedDocument {
            title,
            text: collect_text(&html),
            links,
            parse_errors,
        })
    }
}

fn looks_like_html(body: &[u8]) -> bool {
    let head = String::from_utf8_lossy(&body[..body.len().min(512)]);
    let head = head.trim_start().to_ascii_lowercase();
    head.starts_with("<!doctype html") || head.starts_with("<html")
}

/// Walks the tree in document order, collecting text outside the excluded
/// elements and collapsing whitespace runs.
fn collect_text(html: &Html) -> String {
    let mut parts: SmallVec<[&str; 64]> = SmallVec::new();
    let mut stack = vec![html.tree.root()];
    while let Some(node) = stack.pop() {
        match node.value() {
            Node::Element(element) => {
                if EXCLUDED_TEXT_TAGS.contains(&element.name()) {
                    continue;
                }
            }
            Node::Text(text) => {
                parts.push(&**text);
                continue;
            }
            _ => {}
        }
        // Reverse so children pop in document order.
        let children: Vec<_> = node.children().collect();
        stack.extend(children.into_iter().rev());
    }
    parts
        .iter()
        .flat_map(|part| part.split_whitespace())
        .join(" ")
}
