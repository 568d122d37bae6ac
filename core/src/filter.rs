/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! In-network reduction filter (C4): runs at every interior overlay node,
//! fusing a batch of child payloads into one payload for the parent.
//!
//! The reference implementation this is modeled on threads the
//! width-expanding deserializer's parameters (total width, per-child
//! widths, current index) through a handful of process-global variables,
//! set just before each merge call and read back during it. That is only
//! sound because the reference implementation never runs two merges on
//! the same thread concurrently; this crate's transport is free to run
//! multiple filter instances on different streams at once, so
//! [`ReduceContext`] bundles the same three values into a plain struct
//! built fresh for every [`reduce_batch`] call instead.

use rayon::prelude::*;

use crate::bitvector::BitVector;
use crate::error::Result;
use crate::graph::{EdgeLabel, EdgeVariant, Graph};
use crate::sampler::{DaemonPayload, SampleFlags};

/// One child's contribution to a reduction: identical in shape whether the
/// child is a daemon or another filter instance further down the tree.
#[derive(Debug, Clone)]
pub struct ChildPayload {
    pub graph_bytes: Vec<u8>,
    /// Ignored when `flags` carries [`SampleFlags::COUNT_REP`] — see the
    /// contract note on [`reduce_batch`].
    pub width_words: usize,
    pub lowest_global_rank: u64,
    pub flags: SampleFlags,
}

impl From<DaemonPayload> for ChildPayload {
    fn from(p: DaemonPayload) -> Self {
        ChildPayload {
            graph_bytes: p.graph_bytes,
            width_words: p.width_words,
            lowest_global_rank: p.lowest_global_rank,
            flags: p.flags,
        }
    }
}

/// The per-invocation replacement for the reference implementation's
/// global `total width / per-child widths / current index` trio: computed
/// once per [`reduce_batch`] call and passed explicitly to the
/// width-expanding deserializer it parameterizes, never shared across
/// concurrent invocations.
struct ReduceContext {
    total_width_words: usize,
    child_widths: Vec<usize>,
}

impl ReduceContext {
    fn offset_for(&self, index: usize) -> usize {
        self.child_widths[..index].iter().sum()
    }
}

/// Order a batch of child payloads deterministically (ascending
/// `lowest_global_rank`) and fuse them into one payload representing their
/// merge.
///
/// The batch's edge variant is fixed by the first child's
/// [`SampleFlags::COUNT_REP`] bit. In the bit-vector case, each child's
/// graph is deserialized into its own contiguous, word-aligned slice of
/// the output width (§4.1's width-expanding deserializer) — this is the
/// contract with C5: `offset_i` is the cumulative sum of the widths of
/// `c_0..c_{i-1}` in the same ascending-rank order C5 assigns. In the
/// count-and-representative case, `width_words` is meaningless and
/// ignored: every child is decoded at its own fixed 24-byte record size
/// and merged by the variant's accumulate-count / min-representative
/// rule.
pub fn reduce_batch(batch: &[ChildPayload]) -> Result<ChildPayload> {
    let mut ordered: Vec<&ChildPayload> = batch.iter().collect();
    ordered.sort_by_key(|c| c.lowest_global_rank);

    let flags = ordered
        .first()
        .map(|c| c.flags)
        .unwrap_or(SampleFlags::FUNCTION_ONLY);
    let lowest_global_rank = ordered
        .iter()
        .map(|c| c.lowest_global_rank)
        .min()
        .unwrap_or(0);

    let (output_graph, output_width_words) = if flags.edge_variant() == EdgeVariant::CountAndRepresentative
    {
        let mut output = Graph::new(EdgeVariant::CountAndRepresentative);
        for child in &ordered {
            let deserializer = |bytes: &[u8]| {
                Ok(EdgeLabel::CountAndRepresentative(
                    crate::bitvector::CountAndRepresentative::deserialize(bytes)?,
                ))
            };
            let decoded = Graph::deserialize(&child.graph_bytes, deserializer)?;
            output.merge(&decoded)?;
        }
        (output, 0)
    } else {
        let child_widths: Vec<usize> = ordered.iter().map(|c| c.width_words).collect();
        let total_width_words: usize = child_widths.iter().sum();
        let ctx = ReduceContext {
            total_width_words,
            child_widths,
        };

        // Each child's offset only depends on its own index, not on merge
        // order, so decoding is independent per child. Only the final
        // accumulation into `output` needs the deterministic ascending-rank
        // order C5 assigns.
        let decoded: Vec<Graph> = ordered
            .par_iter()
            .enumerate()
            .map(|(index, child)| {
                let offset = ctx.offset_for(index);
                let total = ctx.total_width_words;
                let deserializer = move |bytes: &[u8]| {
                    Ok(EdgeLabel::Bitvector(BitVector::deserialize_at_offset(
                        bytes, total, offset,
                    )?))
                };
                Graph::deserialize(&child.graph_bytes, deserializer)
            })
            .collect::<Result<Vec<_>>>()?;

        let mut output = Graph::new(EdgeVariant::Bitvector);
        for decoded_graph in &decoded {
            output.merge(decoded_graph)?;
        }
        (output, total_width_words)
    };

    Ok(ChildPayload {
        graph_bytes: output_graph.serialize(),
        width_words: output_width_words,
        lowest_global_rank,
        flags,
    })
}
