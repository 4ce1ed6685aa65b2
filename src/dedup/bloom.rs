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

use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use twox_hash::XxHash64;

const SEED_LOW: u64 = 0x51_7c_c1_b7_27_22_0a_95;
const SEED_HIGH: u64 = 0x9e_37_79_b9_7f_4a_7c_15;

/// A fixed-size Bloom filter over atomic words. No false negatives; the
/// false-positive rate holds as long as insertions stay near the capacity it
/// was sized for. Bit setting is a `fetch_or`, so concurrent inserts never
/// lose bits.
#[derive(Debug)]
pub struct BloomFilter {
    bits: Box<[AtomicU64]>,
    bit_count: u64,
    hashes: u32,
}

impl BloomFilter {
    /// Sizes the filter for `capacity` items at the given target
    /// false-positive rate (classic m/k formulas).
    pub fn for_capacity(capacity: u64, fp_rate: f64) -> Self {
        let capacity = capacity.max(1) as f64;
        let fp_rate = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let bit_count = ((capacity * fp_rate.ln()) / (-(ln2 * ln2))).ceil().max(64.0) as u64;
        let hashes = ((bit_count as f64 / capacity) * ln2).round().max(1.0) as u32;
        let words = bit_count.div_ceil(64) as usize;
        let mut bits = Vec::with_capacity(words);
        bits.resize_with(words, AtomicU64::default);
        Self {
            bits: bits.into_boxed_slice(),
            bit_count: words as u64 * 64,
            hashes,
        }
    }

    fn index_pair(item: &[u8]) -> (u64, u64) {
        let mut low = XxHash64::with_seed(SEED_LOW);
        low.write(item);
        let mut high = XxHash64::with_seed(SEED_HIGH);
        high.write(item);
        (low.finish(), high.finish())
    }

    /// Sets all bits for `item`. Returns `true` if at least one bit was
    /// previously unset, in which case the item was definitely never
    /// inserted before.
    pub fn insert(&self, item: &[u8]) -> bool {
        let (h1, h2) = Self::index_pair(item);
        let mut definitely_new = false;
        for i in 0..self.hashes {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.bit_count;
            let mask = 1u64 << (bit % 64);
            let previous = self.bits[(bit / 64) as usize].fetch_or(mask, Ordering::AcqRel);
            if previous & mask == 0 {
                definitely_new = true;
            }
        }
        definitely_new
    }

    /// `false` means definitely absent; `true` means possibly present.
    pub fn contains(&self, item: &[u8]) -> bool {
        let (h1, h2) = Self::index_pair(item);
        (0..self.hashes).all(|i| {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.bit_count;
            let mask = 1u64 << (bit % 64);
            self.bits[(bit / 64) as usize].load(Ordering::Acquire) & mask != 0
        })
    }
}
