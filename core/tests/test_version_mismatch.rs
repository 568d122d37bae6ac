/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! §8 scenario 5: a daemon running a different protocol revision than the
//! front end must abort the round before any sampling happens, with the
//! mismatch count surfaced to the caller.

use stat_graph::control::{GatherConfig, GatherController, InProcessTransport, SimulatedDaemon};
use stat_graph::error::StatError;
use stat_graph::filter::ChildPayload;
use stat_graph::sampler::SampleFlags;

fn payload() -> ChildPayload {
    ChildPayload {
        graph_bytes: Vec::new(),
        width_words: 0,
        lowest_global_rank: 0,
        flags: SampleFlags::FUNCTION_ONLY,
    }
}

#[test]
fn mismatched_daemon_version_aborts_before_sampling() {
    let daemons = vec![
        SimulatedDaemon {
            id: "d0".into(),
            version: (3, 0, 0),
            responsive: true,
            payload: payload(),
        },
        SimulatedDaemon {
            id: "d1".into(),
            version: (3, 0, 1),
            responsive: true,
            payload: payload(),
        },
    ];
    let mut transport = InProcessTransport::new(daemons);
    let mut controller = GatherController::new((3, 0, 0), GatherConfig::default());

    controller.attach().unwrap();
    match controller.check_version(&mut transport) {
        Err(StatError::VersionMismatch {
            front_end,
            mismatched,
            checked,
        }) => {
            assert_eq!(front_end, (3, 0, 0));
            assert_eq!(mismatched, 1);
            assert_eq!(checked, 2);
        }
        other => panic!("expected VersionMismatch, got {other:?}"),
    }
}

#[test]
fn matching_versions_pass_the_handshake() {
    let daemons = vec![
        SimulatedDaemon {
            id: "d0".into(),
            version: (3, 0, 0),
            responsive: true,
            payload: payload(),
        },
        SimulatedDaemon {
            id: "d1".into(),
            version: (3, 0, 0),
            responsive: true,
            payload: payload(),
        },
    ];
    let mut transport = InProcessTransport::new(daemons);
    let mut controller = GatherController::new((3, 0, 0), GatherConfig::default());

    controller.attach().unwrap();
    assert!(controller.check_version(&mut transport).is_ok());
}

#[test]
fn unresponsive_daemons_are_excluded_from_the_version_count() {
    let daemons = vec![
        SimulatedDaemon {
            id: "d0".into(),
            version: (3, 0, 0),
            responsive: true,
            payload: payload(),
        },
        SimulatedDaemon {
            id: "d1".into(),
            version: (3, 0, 1),
            responsive: false,
            payload: payload(),
        },
    ];
    let mut transport = InProcessTransport::new(daemons);
    let mut controller = GatherController::new((3, 0, 0), GatherConfig::default());

    controller.attach().unwrap();
    assert!(controller.check_version(&mut transport).is_ok());
}
