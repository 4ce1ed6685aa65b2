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

use compact_str::{CompactString, ToCompactString};
use std::collections::HashMap;
use unicode_normalization::UnicodeNormalization;
use unicode_segmentation::UnicodeSegmentation;

/// The word statistics of one page.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WordStats {
    pub frequencies: HashMap<CompactString, u64>,
    /// Counted occurrences after filtering.
    pub total_words: u64,
    pub unique_words: u64,
}

/// Splits on Unicode word boundaries, NFC-normalizes, lowercases, gates on
/// length, drops stop words and accumulates counts. Deterministic for the
/// same input and configuration.
#[derive(Debug, Clone)]
pub struct WordAnalyzer {
    min_word_len: usize,
    max_word_len: usize,
    max_words_per_page: usize,
    stop_words: std::collections::HashSet<String>,
}

impl WordAnalyzer {
    pub fn from_config(config: &crate::config::TextConfig) -> Self {
        Self {
            min_word_len: config.min_word_len,
            max_word_len: config.max_word_len,
            max_words_per_page: config.max_words_per_page,
            stop_words: config
                .stop_words
                .iter()
                .map(|w| w.to_lowercase())
                .collect(),
        }
    }

    pub fn analyze(&self, text: &str) -> WordStats {
        let mut frequencies: HashMap<CompactString, u64> = HashMap::new();
        let mut total_words = 0u64;
        for raw in text.unicode_words() {
            let word: CompactString = raw.nfc().flat_map(char::to_lowercase).collect();
            let len = word.chars().count();
            if len < self.min_word_len || len > self.max_word_len {
                continue;
            }
            if self.stop_words.contains(word.as_str()) {
                continue;
            }
            if let Some(count) = frequencies.get_mut(&word) {
                *count += 1;
            } else if frequencies.len() < self.max_words_per_page {
                // The distinct-word cap drops unseen words once reached;
                // words tracked before it keep counting.
                frequencies.insert(word, 1);
            } else {
                continue;
            }
            total_words += 1;
        }
        WordStats {
            unique_words: frequencies.len() as u64,
            total_words,
            frequencies,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::TextConfig;

    fn analyzer(config: TextConfig) -> WordAnalyzer {
        WordAnalyzer::from_config(&config)
    }

    #[test]
    fn counts_lowercased_words() {
        let stats = analyzer(TextConfig::default()).analyze("Hello hello, WORLD!");
        assert_eq!(2, stats.frequencies["hello"]);
        assert_eq!(1, stats.frequencies["world"]);
        assert_eq!(3, stats.total_words);
        assert_eq!(2, stats.unique_words);
    }

    #[test]
    fn length_gate_applies_to_chars_not_bytes() {
        let config = TextConfig {
            min_word_len: 2,
            max_word_len: 5,
            ..Default::default()
        };
        let stats = analyzer(config).analyze("a über extraordinary däumling");
        assert!(stats.frequencies.contains_key("über"));
        assert!(!stats.frequencies.contains_key("a"));
        assert!(!stats.frequencies.contains_key("extraordinary"));
        assert!(!stats.frequencies.contains_key("däumling"));
    }

    #[test]
    fn stop_words_are_dropped_case_insensitively() {
        let config = TextConfig {
            stop_words: ["the".to_string(), "And".to_string()].into_iter().collect(),
            ..Default::default()
        };
        let stats = analyzer(config).analyze("The cat and THE dog");
        assert!(!stats.frequencies.contains_key("the"));
        assert!(!stats.frequencies.contains_key("and"));
        assert_eq!(1, stats.frequencies["cat"]);
        assert_eq!(1, stats.frequencies["dog"]);
        assert_eq!(2, stats.total_words);
    }

    #[test]
    fn distinct_cap_keeps_counting_known_words() {
        let config = TextConfig {
            max_words_per_page: 2,
            ..Default::default()
        };
        let stats = analyzer(config).analyze("alpha beta gamma alpha gamma alpha");
        assert_eq!(2, stats.unique_words);
        assert_eq!(3, stats.frequencies["alpha"]);
        assert_eq!(1, stats.frequencies["beta"]);
        assert!(!stats.frequencies.contains_key("gamma"));
        assert_eq!(4, stats.total_words);
    }

    #[test]
    fn deterministic_for_equal_input() {
        let a = analyzer(TextConfig::default()).analyze("x y x z y x");
        let b = analyzer(TextConfig::default()).analyze("x y x z y x");
        assert_eq!(a, b);
    }

    #[test]
    fn punctuation_does_not_produce_tokens() {
        let stats = analyzer(TextConfig::default()).analyze("-- ... !!! 42 end-of-line");
        assert!(stats.frequencies.contains_key("42"));
        // Word boundaries split hyphenated compounds.
        assert!(stats.frequencies.contains_key("end"));
        assert!(stats.frequencies.contains_key("line"));
        assert!(!stats.frequencies.contains_key("--"));
    }
}
