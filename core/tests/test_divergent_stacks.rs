/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! §8 scenario 3: divergent stacks form distinct equivalence classes.
//! Ranks that walk the same call path collapse onto one leading edge;
//! ranks that diverge at the first frame land on a second.

mod common;

use std::time::Duration;

use stat_graph::graph::EdgeLabel;
use stat_graph::sampler::{merge_daemon_graphs, sample_process, Frame, SampleFlags, SampleRequest};

use common::FixedStackWalker;

fn graph_for(local_rank: usize, local_ranks: usize, path: &str) -> stat_graph::graph::Graph {
    let frames: Vec<Frame> = path.split(';').map(Frame::new).collect();
    let walker = FixedStackWalker { frames };
    let request = SampleRequest {
        process: local_rank as u64,
        threads: vec![0],
        flags: SampleFlags::FUNCTION_ONLY,
        local_rank,
        local_ranks,
        max_retries: 0,
        retry_delay: Duration::ZERO,
    };
    sample_process(&walker, &request).unwrap()
}

#[test]
fn divergent_stacks_form_two_equivalence_classes() {
    // Ranks 0-3 are in main;work, ranks 4-7 are stuck in main;wait.
    let graphs: Vec<_> = (0..8)
        .map(|rank| {
            if rank < 4 {
                graph_for(rank, 8, "main;work")
            } else {
                graph_for(rank, 8, "main;wait")
            }
        })
        .collect();
    let merged = merge_daemon_graphs(8, &graphs).unwrap();

    let colors = merged.color_by_leading_edge();
    let distinct: std::collections::BTreeSet<usize> = colors.values().copied().collect();
    assert_eq!(distinct.len(), 2, "two distinct call paths must get two colors");

    let root = merged.root();
    let main = stat_graph::graph::hash_path("/main");
    let work = stat_graph::graph::hash_path("/main/work");
    let wait = stat_graph::graph::hash_path("/main/wait");

    match merged.edges().get(&(main, work)).unwrap() {
        EdgeLabel::Bitvector(bv) => assert_eq!(bv.set_bits(), vec![0, 1, 2, 3]),
        _ => panic!("expected bitvector"),
    }
    match merged.edges().get(&(main, wait)).unwrap() {
        EdgeLabel::Bitvector(bv) => assert_eq!(bv.set_bits(), vec![4, 5, 6, 7]),
        _ => panic!("expected bitvector"),
    }
    // Both diverging paths still share the same leading edge (root -> main):
    // the divergence happens one frame further in, not at the root.
    match merged.edges().get(&(root, main)).unwrap() {
        EdgeLabel::Bitvector(bv) => assert_eq!(bv.set_bits(), vec![0, 1, 2, 3, 4, 5, 6, 7]),
        _ => panic!("expected bitvector"),
    }
}

#[test]
fn stacks_diverging_at_the_first_frame_get_distinct_leading_edges() {
    let graphs: Vec<_> = (0..4)
        .map(|rank| {
            if rank % 2 == 0 {
                graph_for(rank, 4, "alpha")
            } else {
                graph_for(rank, 4, "beta")
            }
        })
        .collect();
    let merged = merge_daemon_graphs(4, &graphs).unwrap();

    let colors = merged.color_by_leading_edge();
    let distinct: std::collections::BTreeSet<usize> = colors.values().copied().collect();
    assert_eq!(distinct.len(), 2);
}
