/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Topology planner (C5): computes the merge order, per-daemon bit
//! offsets, and the rank permutation from an overlay-tree description.
//!
//! The plan is computed once, before a gather begins, and handed to both
//! the reduction filter (as the contract for per-child offsets) and the
//! front-end reorderer (C6, as the rank permutation).

use crate::bitvector::words_for_bits;
use crate::error::{Result, StatError};

/// One daemon attached to a leaf of the overlay tree: its identity, and
/// the global MPI ranks of the local processes it covers, in their
/// original ascending order. Ranks need not be contiguous (daemons may own
/// an interleaved slice of the global rank space).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DaemonSpec {
    pub id: String,
    pub ranks: Vec<u64>,
}

impl DaemonSpec {
    pub fn new(id: impl Into<String>, ranks: Vec<u64>) -> Self {
        DaemonSpec { id: id.into(), ranks }
    }

    /// The lowest global rank this daemon covers; undefined (fatal) for a
    /// daemon with no ranks.
    fn lowest_rank(&self) -> Result<u64> {
        self.ranks.iter().min().copied().ok_or_else(|| {
            StatError::FatalInternal(format!("daemon {} has an empty rank list", self.id))
        })
    }

    fn local_rank_count(&self) -> usize {
        self.ranks.len()
    }
}

/// A node of the overlay tree used to plan the reduction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverlayNode {
    Interior { children: Vec<OverlayNode> },
    Leaf { daemons: Vec<DaemonSpec> },
}

impl OverlayNode {
    /// The lowest global rank anywhere in this subtree — the key used to
    /// order siblings during the merge-order traversal.
    fn lowest_rank(&self) -> Result<u64> {
        match self {
            OverlayNode::Leaf { daemons } => daemons
                .iter()
                .map(DaemonSpec::lowest_rank)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .min()
                .ok_or_else(|| StatError::FatalInternal("leaf with no daemons".into())),
            OverlayNode::Interior { children } => children
                .iter()
                .map(OverlayNode::lowest_rank)
                .collect::<Result<Vec<_>>>()?
                .into_iter()
                .min()
                .ok_or_else(|| StatError::FatalInternal("interior node with no children".into())),
        }
    }
}

/// Where one daemon's bits land in the final, merge-ordered vector.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DaemonPlacement {
    pub daemon_id: String,
    /// Offset of this daemon's slice, in 64-bit words, from the start of
    /// the final vector.
    pub layout_offset_words: usize,
    /// This daemon's ranks, in their original ascending order — the
    /// `ranks` list C6 uses to translate this slice's bit positions back
    /// to global rank identity.
    pub ranks: Vec<u64>,
}

/// The computed plan: the merge-ordered rank list, each daemon's
/// placement, and the final total width.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopologyPlan {
    pub rank_list: Vec<u64>,
    pub placements: Vec<DaemonPlacement>,
    pub total_width_words: usize,
}

impl TopologyPlan {
    /// Build the plan from a rooted overlay tree: a depth-first traversal
    /// visiting children (and same-leaf daemons) in ascending order of
    /// their subtree's lowest contained rank, accumulating a
    /// ceil-rounded, word-aligned offset per daemon as we go.
    pub fn build(root: &OverlayNode) -> Result<TopologyPlan> {
        let mut rank_list = Vec::new();
        let mut placements = Vec::new();
        let mut offset_words = 0usize;

        visit(root, &mut rank_list, &mut placements, &mut offset_words)?;

        Ok(TopologyPlan {
            rank_list,
            placements,
            total_width_words: offset_words,
        })
    }

    /// Look up a daemon's placement by id.
    pub fn placement(&self, daemon_id: &str) -> Option<&DaemonPlacement> {
        self.placements.iter().find(|p| p.daemon_id == daemon_id)
    }
}

fn visit(
    node: &OverlayNode,
    rank_list: &mut Vec<u64>,
    placements: &mut Vec<DaemonPlacement>,
    offset_words: &mut usize,
) -> Result<()> {
    match node {
        OverlayNode::Leaf { daemons } => {
            let mut ordered = daemons.clone();
            ordered.sort_by_key(|d| d.lowest_rank().unwrap_or(u64::MAX));
            for daemon in &ordered {
                let mut ranks = daemon.ranks.clone();
                ranks.sort_unstable();
                rank_list.extend_from_slice(&ranks);
                placements.push(DaemonPlacement {
                    daemon_id: daemon.id.clone(),
                    layout_offset_words: *offset_words,
                    ranks,
                });
                *offset_words += words_for_bits(daemon.local_rank_count());
            }
            Ok(())
        }
        OverlayNode::Interior { children } => {
            let mut ordered: Vec<&OverlayNode> = children.iter().collect();
            let mut keys = Vec::with_capacity(ordered.len());
            for child in &ordered {
                keys.push(child.lowest_rank()?);
            }
            let mut indices: Vec<usize> = (0..ordered.len()).collect();
            indices.sort_by_key(|&i| keys[i]);
            ordered = indices.into_iter().map(|i| ordered[i]).collect();

            for child in ordered {
                visit(child, rank_list, placements, offset_words)?;
            }
            Ok(())
        }
    }
}

/// A minimal, whitespace-tolerant parser for the external topology file
/// format (§6): each line is either
///
/// - `<id> => <child_id>[, <child_id>]*;` for an interior node, or
/// - `<id> : <rank>[,<rank>]*;` for a leaf daemon and its covered global
///   ranks.
///
/// This generalizes the original single-daemon-per-leaf `host:0;` line
/// with an explicit rank list, since a daemon's MPI rank assignment is not
/// otherwise recoverable from a bare topology description.
pub fn parse_topology_file(text: &str) -> Result<OverlayNode> {
    use std::collections::HashMap;

    enum RawNode {
        Interior(Vec<String>),
        Leaf(DaemonSpec),
    }

    let mut raw: HashMap<String, RawNode> = HashMap::new();
    let mut first_id: Option<String> = None;

    for (lineno, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim().trim_end_matches(';').trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((parent, children)) = line.split_once("=>") {
            let parent = parent.trim().to_string();
            let children: Vec<String> = children
                .split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();
            if first_id.is_none() {
                first_id = Some(parent.clone());
            }
            raw.insert(parent, RawNode::Interior(children));
        } else if let Some((id, ranks)) = line.split_once(':') {
            let id = id.trim().to_string();
            let ranks: Result<Vec<u64>> = ranks
                .split(',')
                .map(|r| r.trim())
                .filter(|r| !r.is_empty())
                .map(|r| {
                    r.parse::<u64>().map_err(|e| {
                        StatError::FatalInternal(format!(
                            "topology file line {}: invalid rank {r:?}: {e}",
                            lineno + 1
                        ))
                    })
                })
                .collect();
            let ranks = ranks?;
            if first_id.is_none() {
                first_id = Some(id.clone());
            }
            raw.insert(id.clone(), RawNode::Leaf(DaemonSpec::new(id, ranks)));
        } else {
            return Err(StatError::FatalInternal(format!(
                "topology file line {}: unrecognized syntax {line:?}",
                lineno + 1
            )));
        }
    }

    let root_id = first_id
        .ok_or_else(|| StatError::FatalInternal("topology file has no nodes".into()))?;

    fn build(id: &str, raw: &std::collections::HashMap<String, RawNode>) -> Result<OverlayNode> {
        match raw.get(id) {
            Some(RawNode::Leaf(daemon)) => Ok(OverlayNode::Leaf {
                daemons: vec![daemon.clone()],
            }),
            Some(RawNode::Interior(children)) => {
                let mut built = Vec::with_capacity(children.len());
                for child in children {
                    built.push(build(child, raw)?);
                }
                Ok(OverlayNode::Interior { children: built })
            }
            None => Err(StatError::FatalInternal(format!(
                "topology file references undefined node {id:?}"
            ))),
        }
    }

    build(&root_id, &raw)
}
