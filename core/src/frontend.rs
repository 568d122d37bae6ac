/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Front-end reorderer (C6): turns the overlay root's tree-layout bit
//! order back into canonical MPI-rank order, using the plan from C5.
//!
//! The reduced graph handed up by the root filter has edge vectors whose
//! bit positions reflect the reduction tree's left-to-right layout, not
//! rank identity — two daemons merged in rank order 4 then 0 still land in
//! whatever slot the tree visited them. This pass is the one place that
//! undoes that: for every edge and every daemon placement in the plan, it
//! copies each layout bit to the output position named by that daemon's
//! rank list.

use crate::bitvector::{words_for_bits, BitVector};
use crate::error::{Result, StatError};
use crate::graph::{EdgeLabel, EdgeVariant, Graph};
use crate::topology::TopologyPlan;

/// Build an "empty-edges copy" of `graph`: same nodes and edge endpoints,
/// but every bit-vector label replaced with a zero-filled vector of
/// `width_words`. Step 1 of the reorder pass, and reusable on its own
/// wherever a caller needs the reduced graph's shape without its bits.
pub fn empty_edges_copy(graph: &Graph, width_words: usize) -> Result<Graph> {
    if graph.variant() != EdgeVariant::Bitvector {
        return Err(StatError::FatalInternal(
            "empty_edges_copy only applies to bit-vector graphs".into(),
        ));
    }
    let mut out = Graph::new(EdgeVariant::Bitvector);
    for (&id, attrs) in graph.nodes() {
        out.add_node(id, attrs.clone());
    }
    for &(parent, child) in graph.edges().keys() {
        out.add_edge(
            parent,
            child,
            EdgeLabel::Bitvector(BitVector::zeroed(width_words)),
        )?;
    }
    Ok(out)
}

/// Translate `graph` (in tree-layout bit order) into MPI-rank order per
/// `plan`. The output's bit index for a rank equals that rank's numeric
/// value directly: after this pass, "bit k set" means "rank k present",
/// with no further indirection.
pub fn reorder(graph: &Graph, plan: &TopologyPlan) -> Result<Graph> {
    let final_width_words = words_for_bits(plan.rank_list.len());
    let mut output = empty_edges_copy(graph, final_width_words)?;

    for placement in &plan.placements {
        let base = placement.layout_offset_words * crate::bitvector::WORD_BITS;
        for &(parent, child) in graph.edges().keys() {
            let input_label = match graph.edges().get(&(parent, child)) {
                Some(EdgeLabel::Bitvector(bv)) => bv,
                _ => {
                    return Err(StatError::FatalInternal(
                        "reorder expects every edge to carry a bit-vector label".into(),
                    ))
                }
            };
            let output_label = match output.edges().get(&(parent, child)) {
                Some(EdgeLabel::Bitvector(bv)) => bv.clone(),
                _ => unreachable!("empty_edges_copy preserves every input edge"),
            };

            let mut updated = output_label;
            for (i, &rank) in placement.ranks.iter().enumerate() {
                if input_label.test_bit(base + i) {
                    updated.set_bit(rank as usize);
                }
            }
            output.add_edge(parent, child, EdgeLabel::Bitvector(updated))?;
        }
    }

    Ok(output)
}

/// Color the reordered graph by leading-edge identity and write it to
/// `path`. Convenience wrapper used by the CLI's `gather` subcommand.
pub fn reorder_and_export(
    graph: &Graph,
    plan: &TopologyPlan,
    path: &std::path::Path,
) -> Result<Graph> {
    let reordered = reorder(graph, plan)?;
    reordered
        .export_dot(path)
        .map_err(|e| StatError::FatalInternal(format!("failed to write {}: {e}", path.display())))?;
    Ok(reordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{hash_path, NodeAttrs};
    use crate::topology::{DaemonSpec, OverlayNode};

    fn leaf(id: &str, ranks: &[u64]) -> OverlayNode {
        OverlayNode::Leaf {
            daemons: vec![DaemonSpec::new(id, ranks.to_vec())],
        }
    }

    fn reduced_graph(word0: u64, word1: u64) -> Graph {
        let mut g = Graph::new(EdgeVariant::Bitvector);
        let root = g.root();
        let main = hash_path("/main");
        g.add_node(main, NodeAttrs::new("/main"));
        let mut bv = BitVector::zeroed(2);
        for b in 0..64 {
            if (word0 >> b) & 1 == 1 {
                bv.set_bit(b);
            }
            if (word1 >> b) & 1 == 1 {
                bv.set_bit(64 + b);
            }
        }
        g.add_edge(root, main, EdgeLabel::Bitvector(bv)).unwrap();
        g
    }

    #[test]
    fn identity_permutation_preserves_bits() {
        let tree = OverlayNode::Interior {
            children: vec![leaf("d1", &[4, 5, 6, 7]), leaf("d0", &[0, 1, 2, 3])],
        };
        let plan = TopologyPlan::build(&tree).unwrap();
        let reduced = reduced_graph(0x0F, 0x0F);

        let out = reorder(&reduced, &plan).unwrap();
        let root = out.root();
        let main = hash_path("/main");
        match out.edges().get(&(root, main)).unwrap() {
            EdgeLabel::Bitvector(bv) => assert_eq!(bv.pretty_print(), "[0-7]"),
            _ => panic!("expected bitvector"),
        }
    }

    #[test]
    fn non_contiguous_rank_list_permutes_bits() {
        let tree = OverlayNode::Interior {
            children: vec![leaf("d1", &[1, 3, 5, 7]), leaf("d0", &[0, 2, 4, 6])],
        };
        let plan = TopologyPlan::build(&tree).unwrap();
        // D0 slice (word0) fully set; D1 slice (word1) has bits 0 and 2 set
        // (layout positions 64 and 66), matching the scenario's "ranks 1
        // and 5 sampled" case.
        let reduced = reduced_graph(0x0F, 0b0101);

        let out = reorder(&reduced, &plan).unwrap();
        let root = out.root();
        let main = hash_path("/main");
        match out.edges().get(&(root, main)).unwrap() {
            EdgeLabel::Bitvector(bv) => {
                assert_eq!(bv.set_bits(), vec![0, 1, 2, 4, 5, 6]);
                assert_eq!(bv.pretty_print(), "[0,1,2,4,5,6]");
            }
            _ => panic!("expected bitvector"),
        }
    }

    #[test]
    fn bit_count_is_preserved() {
        let tree = OverlayNode::Interior {
            children: vec![leaf("d0", &[0, 2, 4, 6]), leaf("d1", &[1, 3, 5, 7])],
        };
        let plan = TopologyPlan::build(&tree).unwrap();
        let reduced = reduced_graph(0b1010, 0b0101);
        let reduced_ones: u32 = match reduced.edges().values().next().unwrap() {
            EdgeLabel::Bitvector(bv) => bv.count_ones(),
            _ => unreachable!(),
        };

        let out = reorder(&reduced, &plan).unwrap();
        let out_ones: u32 = match out.edges().values().next().unwrap() {
            EdgeLabel::Bitvector(bv) => bv.count_ones(),
            _ => unreachable!(),
        };
        assert_eq!(reduced_ones, out_ones);
    }

    #[test]
    fn empty_edges_copy_zeros_every_label() {
        let reduced = reduced_graph(0x0F, 0x0F);
        let copy = empty_edges_copy(&reduced, 3).unwrap();
        for label in copy.edges().values() {
            match label {
                EdgeLabel::Bitvector(bv) => {
                    assert_eq!(bv.width_words(), 3);
                    assert_eq!(bv.count_ones(), 0);
                }
                _ => panic!("expected bitvector"),
            }
        }
    }
}
