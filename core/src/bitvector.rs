/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Fixed-width bit-vector edge labels and their wire codec.
//!
//! A [`BitVector`] is the edge label used while rank identity is still
//! tracked as individual bits: bit `k` set means rank `k` traversed that
//! edge. Wire format is 8-byte little-endian width-in-words `W` followed by
//! `W` little-endian 64-bit words (`8 + 8*W` bytes total).

use itertools::Itertools;

use crate::error::{Result, StatError};

/// Number of bits in one [`BitVector`] word.
pub const WORD_BITS: usize = 64;

/// A fixed-width, word-aligned bitmap. Bit `k` (0-indexed from the low end
/// of word 0) is set iff the rank at position `k` is present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BitVector {
    words: Vec<u64>,
}

impl BitVector {
    /// A zeroed vector of `width_words` 64-bit words.
    pub fn zeroed(width_words: usize) -> Self {
        BitVector {
            words: vec![0u64; width_words],
        }
    }

    /// A zeroed vector wide enough to hold `num_ranks` individually
    /// addressable bits, rounded up to a whole word.
    pub fn zeroed_for_ranks(num_ranks: usize) -> Self {
        Self::zeroed(words_for_bits(num_ranks))
    }

    /// Width in 64-bit words.
    pub fn width_words(&self) -> usize {
        self.words.len()
    }

    /// Width in bits (`width_words * 64`).
    pub fn width_bits(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    /// Read-only access to the backing words, low word first.
    pub fn words(&self) -> &[u64] {
        &self.words
    }

    /// Set bit `k`. Panics if `k` is out of range — callers size vectors
    /// from the topology plan and never address past their own width.
    pub fn set_bit(&mut self, k: usize) {
        let (word, bit) = (k / WORD_BITS, k % WORD_BITS);
        self.words[word] |= 1u64 << bit;
    }

    /// Test bit `k`.
    pub fn test_bit(&self, k: usize) -> bool {
        let (word, bit) = (k / WORD_BITS, k % WORD_BITS);
        match self.words.get(word) {
            Some(w) => (w >> bit) & 1 == 1,
            None => false,
        }
    }

    /// Number of set bits.
    pub fn count_ones(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Indices of every set bit, ascending.
    pub fn set_bits(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.count_ones() as usize);
        for (wi, &w) in self.words.iter().enumerate() {
            let mut remaining = w;
            while remaining != 0 {
                let bit = remaining.trailing_zeros() as usize;
                out.push(wi * WORD_BITS + bit);
                remaining &= remaining - 1;
            }
        }
        out
    }

    /// OR-merge `other` into `self`. The two vectors must have equal width —
    /// merging vectors of differing width is always a defect upstream
    /// (a mis-sized deserialize or a topology mismatch), so this is fatal
    /// rather than silently zero-extending.
    pub fn merge(&mut self, other: &BitVector) -> Result<()> {
        if self.words.len() != other.words.len() {
            return Err(StatError::FatalInternal(format!(
                "bit vector width mismatch in merge: {} words vs {} words",
                self.words.len(),
                other.words.len()
            )));
        }
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= *b;
        }
        Ok(())
    }

    /// Serialized length in bytes: `8 + 8*width_words`.
    pub fn serialized_length(&self) -> usize {
        8 + 8 * self.words.len()
    }

    /// Encode as 8-byte LE width-in-words, then that many LE 64-bit words.
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_length());
        buf.extend_from_slice(&(self.words.len() as u64).to_le_bytes());
        for w in &self.words {
            buf.extend_from_slice(&w.to_le_bytes());
        }
        buf
    }

    /// Decode the wire format produced by [`BitVector::serialize`].
    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() < 8 {
            return Err(StatError::MalformedPayload {
                expected: 8,
                actual: buf.len(),
            });
        }
        let width = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
        let expected = 8 + 8 * width;
        if buf.len() != expected {
            return Err(StatError::MalformedPayload {
                expected,
                actual: buf.len(),
            });
        }
        let mut words = Vec::with_capacity(width);
        for i in 0..width {
            let start = 8 + 8 * i;
            words.push(u64::from_le_bytes(buf[start..start + 8].try_into().unwrap()));
        }
        Ok(BitVector { words })
    }

    /// Decode `buf` (the serialized form of a child's own, narrower,
    /// vector) directly into a vector of width `total_width_words`, placing
    /// the child's bits at word offset `offset_words` and leaving
    /// everything else zero. This is the width-expanding deserializer used
    /// by the reduction filter (C4): it lets a parent slot each child's
    /// disjoint bit range into the joint vector without the child ever
    /// materializing a full-width buffer.
    ///
    /// `offset_words` and the child's own declared width (read from `buf`)
    /// must together fit inside `total_width_words`; any other combination
    /// means the caller's width accounting (built from the topology plan)
    /// is wrong, so it is treated as fatal rather than truncated.
    pub fn deserialize_at_offset(
        buf: &[u8],
        total_width_words: usize,
        offset_words: usize,
    ) -> Result<Self> {
        let child = Self::deserialize(buf)?;
        if offset_words + child.words.len() > total_width_words {
            return Err(StatError::FatalInternal(format!(
                "width-expanding deserialize out of range: offset {} + child width {} > total {}",
                offset_words,
                child.words.len(),
                total_width_words
            )));
        }
        let mut out = Self::zeroed(total_width_words);
        out.words[offset_words..offset_words + child.words.len()].copy_from_slice(&child.words);
        Ok(out)
    }

    /// Render as a sorted, run-length-compressed rank-range string, e.g.
    /// `[0-7]` or `[0,1,2,4,5,6]` or `[0-2,5,7-9]`.
    pub fn pretty_print(&self) -> String {
        let bits = self.set_bits();
        let parts = bits
            .iter()
            .enumerate()
            .chunk_by(|&(i, &b)| b - i)
            .into_iter()
            .map(|(_, mut group)| {
                let start = *group.next().unwrap().1;
                let end = group.last().map_or(start, |(_, &b)| b);
                if start == end {
                    format!("{start}")
                } else {
                    format!("{start}-{end}")
                }
            })
            .join(",");
        format!("[{parts}]")
    }
}

/// Ceil-divide `num_bits` by [`WORD_BITS`].
pub fn words_for_bits(num_bits: usize) -> usize {
    num_bits.div_ceil(WORD_BITS)
}

impl BitVector {
    /// Additive fold over this vector's words, mirroring the original's
    /// `statEdgeCheckSum`: computed once, at the point a bit-vector edge is
    /// downgraded to the count-and-representative form.
    pub fn checksum_fold(&self) -> i64 {
        self.words
            .iter()
            .fold(0i64, |acc, &w| acc.wrapping_add(w as i64))
    }
}

/// The lossy count-and-representative edge label: a running count of
/// traversing ranks, one representative rank, and an additive checksum
/// fold of all contributing ranks. Used instead of [`BitVector`] when the
/// count-rep sample flag is set — trades rank-level detail for a constant
/// per-edge footprint on very large runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CountAndRepresentative {
    pub count: i64,
    pub representative: i64,
    pub checksum: i64,
}

impl CountAndRepresentative {
    /// A single rank's contribution: count 1, itself as representative,
    /// itself as the checksum seed.
    pub fn singleton(rank: i64) -> Self {
        CountAndRepresentative {
            count: 1,
            representative: rank,
            checksum: rank,
        }
    }

    /// Merge rule: accumulate counts, keep the lower rank as
    /// representative, and fold checksums additively.
    pub fn merge(&mut self, other: &CountAndRepresentative) {
        self.count += other.count;
        self.representative = self.representative.min(other.representative);
        self.checksum = self.checksum.wrapping_add(other.checksum);
    }

    /// Fixed 24-byte wire record: count, representative, checksum, each an
    /// 8-byte little-endian i64.
    pub const SERIALIZED_LENGTH: usize = 24;

    pub fn serialize(&self) -> [u8; Self::SERIALIZED_LENGTH] {
        let mut buf = [0u8; Self::SERIALIZED_LENGTH];
        buf[0..8].copy_from_slice(&self.count.to_le_bytes());
        buf[8..16].copy_from_slice(&self.representative.to_le_bytes());
        buf[16..24].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }

    pub fn deserialize(buf: &[u8]) -> Result<Self> {
        if buf.len() != Self::SERIALIZED_LENGTH {
            return Err(StatError::MalformedPayload {
                expected: Self::SERIALIZED_LENGTH,
                actual: buf.len(),
            });
        }
        Ok(CountAndRepresentative {
            count: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
            representative: i64::from_le_bytes(buf[8..16].try_into().unwrap()),
            checksum: i64::from_le_bytes(buf[16..24].try_into().unwrap()),
        })
    }

    pub fn to_text(&self) -> String {
        format!(
            "count={} rep={} checksum={}",
            self.count, self.representative, self.checksum
        )
    }
}
