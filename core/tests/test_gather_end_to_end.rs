/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! §8 scenario 1 driven through the full front-end lifecycle: attach,
//! version check, sample, gather — starting from real stack walks rather
//! than hand-assembled graph bytes.

mod common;

use stat_graph::bitvector::BitVector;
use stat_graph::control::{GatherConfig, GatherController, GatherState, InProcessTransport, SimulatedDaemon};
use stat_graph::filter::ChildPayload;
use stat_graph::graph::{hash_path, EdgeLabel};
use stat_graph::sampler::SampleFlags;
use stat_graph::topology::{DaemonSpec, OverlayNode, TopologyPlan};

use common::daemon_graph_for;

fn two_daemon_plan() -> TopologyPlan {
    let tree = OverlayNode::Interior {
        children: vec![
            OverlayNode::Leaf {
                daemons: vec![DaemonSpec::new("d1", vec![4, 5, 6, 7])],
            },
            OverlayNode::Leaf {
                daemons: vec![DaemonSpec::new("d0", vec![0, 1, 2, 3])],
            },
        ],
    };
    TopologyPlan::build(&tree).unwrap()
}

fn payload_from_walked(local_ranks: usize, sampled: &[usize], path: &str, lowest_global_rank: u64) -> ChildPayload {
    let graph = daemon_graph_for(local_ranks, sampled, path);
    ChildPayload {
        graph_bytes: graph.serialize(),
        width_words: BitVector::zeroed(stat_graph::bitvector::words_for_bits(local_ranks)).width_words(),
        lowest_global_rank,
        flags: SampleFlags::FUNCTION_ONLY,
    }
}

#[test]
fn full_lifecycle_from_sampling_to_reordered_graph() {
    let daemons = vec![
        SimulatedDaemon {
            id: "d0".into(),
            version: (3, 0, 0),
            responsive: true,
            payload: payload_from_walked(4, &[0, 1, 2, 3], "main;foo", 0),
        },
        SimulatedDaemon {
            id: "d1".into(),
            version: (3, 0, 0),
            responsive: true,
            payload: payload_from_walked(4, &[0, 1, 2, 3], "main;foo", 4),
        },
    ];
    let mut transport = InProcessTransport::new(daemons);
    let plan = two_daemon_plan();
    let mut controller = GatherController::new((3, 0, 0), GatherConfig::default());

    controller.attach().unwrap();
    controller.check_version(&mut transport).unwrap();
    let acks = controller.sample(&mut transport).unwrap();
    assert!(acks.is_complete());

    let graph = controller.gather(&mut transport, &plan).unwrap();
    assert_eq!(controller.state(), GatherState::Idle);

    let root = graph.root();
    let main = hash_path("/main");
    let foo = hash_path("/main/foo");
    match graph.edges().get(&(root, main)).unwrap() {
        EdgeLabel::Bitvector(bv) => assert_eq!(bv.pretty_print(), "[0-7]"),
        _ => panic!("expected bitvector"),
    }
    match graph.edges().get(&(main, foo)).unwrap() {
        EdgeLabel::Bitvector(bv) => assert_eq!(bv.pretty_print(), "[0-7]"),
        _ => panic!("expected bitvector"),
    }

    controller.detach().unwrap();
}
