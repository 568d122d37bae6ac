/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Control / lifecycle (C7): the front-end's gather-round state machine,
//! version handshake accounting, and a small in-process transport used to
//! drive both in tests and the CLI's demo `gather` subcommand.
//!
//! ```text
//! Idle → Broadcasting(sample) → AwaitingAck → Broadcasting(gather) →
//! AwaitingGraph → Reordering → Emitted → Idle
//! ```
//!
//! Every wait has a configurable timeout; on timeout the round continues
//! with whichever daemons responded, provided at least one did.

use std::collections::HashMap;
use std::time::Duration;

use crossbeam_channel::bounded;

use crate::error::{PartialResponse, Result, StatError};
use crate::filter::{reduce_batch, ChildPayload};
use crate::frontend::reorder;
use crate::graph::{EdgeVariant, Graph};
use crate::sampler::SampleFlags;
use crate::topology::TopologyPlan;
use crate::wire::plain_edge_deserializer;

/// Front-end view of a gather round's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherState {
    Idle,
    BroadcastingSample,
    AwaitingAck,
    BroadcastingGather,
    AwaitingGraph,
    Reordering,
    Emitted,
}

/// Tunables for a gather round — the ambient configuration knobs a real
/// deployment would read from a config file or CLI flags.
#[derive(Debug, Clone)]
pub struct GatherConfig {
    pub ack_timeout: Duration,
    pub graph_timeout: Duration,
    pub sample_max_retries: u32,
    pub sample_retry_delay: Duration,
    pub sample_flags: SampleFlags,
    /// Local-rank-count threshold above which a daemon is asked to use the
    /// count-and-representative variant instead of a full bit vector, even
    /// if `sample_flags` doesn't already request it. `None` disables the
    /// override.
    pub count_rep_threshold: Option<usize>,
}

impl Default for GatherConfig {
    fn default() -> Self {
        GatherConfig {
            ack_timeout: Duration::from_secs(30),
            graph_timeout: Duration::from_secs(30),
            sample_max_retries: 3,
            sample_retry_delay: Duration::from_millis(100),
            sample_flags: SampleFlags::FUNCTION_ONLY,
            count_rep_threshold: None,
        }
    }
}

/// The (major, minor, revision) triple exchanged during the version
/// handshake.
pub type Version = (u32, u32, u32);

/// Cumulative version-mismatch accounting, mirroring `STAT_checkVersion`'s
/// tree-wide sum: interior filters add their own mismatch count to their
/// children's before forwarding upstream, so the front end sees one total
/// regardless of tree depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VersionCheck {
    pub checked: u32,
    pub mismatched: u32,
}

impl VersionCheck {
    pub fn record(&mut self, daemon_version: Version, expected: Version) {
        self.checked += 1;
        if daemon_version != expected {
            self.mismatched += 1;
        }
    }

    pub fn fold(&mut self, other: &VersionCheck) {
        self.checked += other.checked;
        self.mismatched += other.mismatched;
    }

    pub fn into_result(self, front_end: Version) -> Result<()> {
        if self.mismatched > 0 {
            return Err(StatError::VersionMismatch {
                front_end,
                mismatched: self.mismatched,
                checked: self.checked,
            });
        }
        Ok(())
    }
}

/// The external transport collaborator: broadcasts to daemons and
/// collects their responses, reduced through the overlay tree on the way
/// back. A real deployment implements this over MRNet-style multicast
/// sockets; [`InProcessTransport`] below is a same-process stand-in used
/// for tests and the CLI demo.
pub trait Transport {
    fn daemon_ids(&self) -> Vec<String>;
    fn broadcast_sample(&mut self, flags: SampleFlags) -> Result<()>;
    fn poll_sample_acks(&mut self, timeout: Duration) -> Result<PartialResponse>;
    fn broadcast_gather(&mut self) -> Result<Vec<ChildPayload>>;
    fn broadcast_version_check(&mut self, front_end: Version, timeout: Duration) -> Result<VersionCheck>;
}

/// A daemon as seen by [`InProcessTransport`]: its fixed version, whether
/// it acknowledges in time, and the payload it contributes when gathered.
#[derive(Debug, Clone)]
pub struct SimulatedDaemon {
    pub id: String,
    pub version: Version,
    pub responsive: bool,
    pub payload: ChildPayload,
}

/// A same-process transport that hands back canned responses instead of
/// talking to real daemons over the network — enough to exercise C7's
/// state machine and drive C4/C6 end to end without a real overlay
/// network. Not a wire-compatible substitute for one.
pub struct InProcessTransport {
    daemons: Vec<SimulatedDaemon>,
}

impl InProcessTransport {
    pub fn new(daemons: Vec<SimulatedDaemon>) -> Self {
        InProcessTransport { daemons }
    }
}

impl Transport for InProcessTransport {
    fn daemon_ids(&self) -> Vec<String> {
        self.daemons.iter().map(|d| d.id.clone()).collect()
    }

    fn broadcast_sample(&mut self, _flags: SampleFlags) -> Result<()> {
        Ok(())
    }

    fn poll_sample_acks(&mut self, _timeout: Duration) -> Result<PartialResponse> {
        let mut responded = Vec::new();
        let mut missing = Vec::new();
        for (i, d) in self.daemons.iter().enumerate() {
            if d.responsive {
                responded.push(i as u64);
            } else {
                missing.push(i as u64);
            }
        }
        Ok(PartialResponse { responded, missing })
    }

    /// Fan out one sender thread per responsive daemon onto a bounded
    /// channel and fan the results back in on the receiving end. Stands in
    /// for the concurrent collection a real multicast transport performs,
    /// rather than a single-threaded sequential iteration.
    fn broadcast_gather(&mut self) -> Result<Vec<ChildPayload>> {
        let responsive: Vec<&SimulatedDaemon> =
            self.daemons.iter().filter(|d| d.responsive).collect();
        let (tx, rx) = bounded(responsive.len());
        std::thread::scope(|scope| {
            for daemon in &responsive {
                let tx = tx.clone();
                scope.spawn(move || {
                    let _ = tx.send(daemon.payload.clone());
                });
            }
        });
        drop(tx);
        Ok(rx.iter().collect())
    }

    fn broadcast_version_check(&mut self, front_end: Version, _timeout: Duration) -> Result<VersionCheck> {
        let mut check = VersionCheck::default();
        for d in &self.daemons {
            if d.responsive {
                check.record(d.version, front_end);
            }
        }
        Ok(check)
    }
}

/// The front end's gather-round driver.
pub struct GatherController {
    state: GatherState,
    attached: bool,
    paused: bool,
    pub config: GatherConfig,
    pub version: Version,
    last_emitted: Option<Graph>,
    samples_accumulated: u32,
}

impl GatherController {
    pub fn new(version: Version, config: GatherConfig) -> Self {
        GatherController {
            state: GatherState::Idle,
            attached: false,
            paused: false,
            config,
            version,
            last_emitted: None,
            samples_accumulated: 0,
        }
    }

    pub fn state(&self) -> GatherState {
        self.state
    }

    /// Attach to the daemon set. Idempotent: attaching while already
    /// attached is a warning, not an error.
    pub fn attach(&mut self) -> Result<()> {
        if self.attached {
            log::warn!("attach requested while already attached");
            return Ok(());
        }
        self.attached = true;
        Ok(())
    }

    /// Detach from the daemon set, returning the controller to `Idle`.
    pub fn detach(&mut self) -> Result<()> {
        if !self.attached {
            log::warn!("detach requested while already detached");
            return Ok(());
        }
        self.attached = false;
        self.state = GatherState::Idle;
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        if self.paused {
            log::warn!("pause requested while already paused");
            return Ok(());
        }
        self.paused = true;
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        if !self.paused {
            log::warn!("resume requested while not paused");
            return Ok(());
        }
        self.paused = false;
        Ok(())
    }

    /// Run the version handshake before the first sample. Fatal to setup
    /// on any mismatch — daemons must be detached before sampling.
    pub fn check_version(&mut self, transport: &mut dyn Transport) -> Result<()> {
        let check = transport.broadcast_version_check(self.version, self.config.ack_timeout)?;
        check.into_result(self.version)
    }

    /// `Idle → Broadcasting(sample) → AwaitingAck`, collapsing back to
    /// `Idle` once acks are in (or the ack timeout fires with at least one
    /// responder). Returns the ack accounting so the caller can decide
    /// whether to continue.
    pub fn sample(&mut self, transport: &mut dyn Transport) -> Result<PartialResponse> {
        self.state = GatherState::BroadcastingSample;
        transport.broadcast_sample(self.config.sample_flags)?;

        self.state = GatherState::AwaitingAck;
        let acks = transport.poll_sample_acks(self.config.ack_timeout)?;
        if !acks.has_quorum() {
            self.state = GatherState::Idle;
            return Err(StatError::TransportIo(
                "no daemon acknowledged the sample broadcast".into(),
            ));
        }
        if !acks.is_complete() {
            log::warn!(
                "partial sample ack: {} responded, {} missing",
                acks.responded.len(),
                acks.missing.len()
            );
        }
        self.state = GatherState::Idle;
        Ok(acks)
    }

    /// `Idle → Broadcasting(gather) → AwaitingGraph → Reordering →
    /// Emitted → Idle`. Runs the in-network reduction down to a single
    /// payload, reorders it into rank order via `plan`, and stores the
    /// result for [`GatherController::gather_last`].
    pub fn gather(&mut self, transport: &mut dyn Transport, plan: &TopologyPlan) -> Result<Graph> {
        self.state = GatherState::BroadcastingGather;
        let payloads = transport.broadcast_gather()?;

        self.state = GatherState::AwaitingGraph;
        if payloads.is_empty() {
            self.state = GatherState::Idle;
            return Err(StatError::TransportIo(
                "no daemon returned a graph for this gather".into(),
            ));
        }

        let reduced_payload = reduce_batch(&payloads)?;
        let variant = reduced_payload.flags.edge_variant();
        let reduced = Graph::deserialize(&reduced_payload.graph_bytes, plain_edge_deserializer(variant))?;

        self.state = GatherState::Reordering;
        let final_graph = if variant == EdgeVariant::Bitvector {
            reorder(&reduced, plan)?
        } else {
            reduced
        };

        self.state = GatherState::Emitted;
        self.samples_accumulated += 1;
        match &mut self.last_emitted {
            Some(accumulated) => accumulated.merge(&final_graph)?,
            None => self.last_emitted = Some(final_graph.clone()),
        }
        self.state = GatherState::Idle;
        Ok(final_graph)
    }

    /// The most recently emitted graph, accumulated across every `gather`
    /// call since the last [`GatherController::detach`] — this is what a
    /// multi-sample "3D" export walks.
    pub fn gather_last(&self) -> Option<&Graph> {
        self.last_emitted.as_ref()
    }

    pub fn samples_accumulated(&self) -> u32 {
        self.samples_accumulated
    }
}

/// Build a [`SimulatedDaemon`] table keyed by id, for tests that want to
/// look one up by name rather than index.
pub fn index_by_id(daemons: &[SimulatedDaemon]) -> HashMap<String, usize> {
    daemons
        .iter()
        .enumerate()
        .map(|(i, d)| (d.id.clone(), i))
        .collect()
}
