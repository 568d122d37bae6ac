/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Per-daemon sampler adapter (C3): turns a walked call stack into a
//! one-bit-set [`Graph`] and merges per-process graphs into a daemon graph.
//!
//! The actual stack walk — stopping a process, reading its registers,
//! unwinding frames — is an external collaborator's job (see
//! [`StackWalker`]); this module only knows how to turn the resulting
//! frames into graph structure and how to retry a failed walk.

use std::thread;
use std::time::Duration;

use bitflags::bitflags;
use dsi_progress_logger::prelude::*;
use rand::Rng;

use crate::bitvector::BitVector;
use crate::error::{Result, StatError};
use crate::graph::{EdgeLabel, EdgeVariant, Graph, NodeAttrs};

bitflags! {
    /// Sampling detail flags, carried end-to-end in the daemon→filter
    /// payload (§6) so the reduction filter can tell which edge variant
    /// and frame-rendering rule produced a given graph.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SampleFlags: u32 {
        const FUNCTION_ONLY    = 0x00;
        const LINE             = 0x01;
        const PC               = 0x02;
        const COUNT_REP        = 0x04;
        const THREADS          = 0x08;
        const CLEAR_ON_SAMPLE  = 0x10;
        const PYTHON           = 0x20;
        const MODULE_OFFSET    = 0x40;
    }
}

impl SampleFlags {
    /// The edge variant this sample produces: count-rep if that bit is
    /// set, a full bit vector otherwise.
    pub fn edge_variant(self) -> EdgeVariant {
        if self.contains(SampleFlags::COUNT_REP) {
            EdgeVariant::CountAndRepresentative
        } else {
            EdgeVariant::Bitvector
        }
    }
}

/// One stack frame as reported by the external stack walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub pc: Option<u64>,
    /// The loaded module (shared library or executable) this frame's PC
    /// falls in, and its byte offset from that module's load base. Set by
    /// the stack walker when it can locate the frame's module but not
    /// resolve it to a symbol.
    pub module: Option<String>,
    pub module_offset: Option<u64>,
}

impl Frame {
    pub fn new(function: impl Into<String>) -> Self {
        Frame {
            function: function.into(),
            file: None,
            line: None,
            pc: None,
            module: None,
            module_offset: None,
        }
    }

    /// Render this frame per `flags`: function-only uses just the function
    /// name, `LINE` appends `@file:line`, `PC` records the program counter
    /// instead, and `MODULE_OFFSET` renders `module+0xoffset` when the
    /// function name itself couldn't be resolved.
    pub fn render(&self, flags: SampleFlags) -> String {
        if flags.contains(SampleFlags::PC) {
            if let Some(pc) = self.pc {
                return format!("{}@0x{:x}", self.function, pc);
            }
        }
        if flags.contains(SampleFlags::LINE) {
            if let (Some(file), Some(line)) = (&self.file, self.line) {
                return format!("{}@{}:{}", self.function, file, line);
            }
        }
        if flags.contains(SampleFlags::MODULE_OFFSET) {
            if let (Some(module), Some(offset)) = (&self.module, self.module_offset) {
                return format!("{module}+0x{offset:x}");
            }
        }
        self.function.clone()
    }
}

/// Opaque external process and thread handles. The process-control
/// collaborator that actually stops/continues processes and unwinds
/// stacks is not implemented here — see §6's process-control interface.
pub type ProcessId = u64;
pub type ThreadId = u64;

/// The external capability this module calls into: stop a thread at a
/// sample point and return its call stack, outermost frame first.
pub trait StackWalker {
    fn walk_stack(&self, thread: ThreadId) -> Result<Vec<Frame>>;
}

/// Everything needed to sample one process's threads once.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub process: ProcessId,
    pub threads: Vec<ThreadId>,
    pub flags: SampleFlags,
    /// This process's rank within its daemon (0-based), the bit position
    /// set in the resulting per-process graph's leaf edges.
    pub local_rank: usize,
    /// Total local process count for this daemon. Every per-process graph
    /// is built at this same width so daemon-level merging never hits a
    /// width mismatch.
    pub local_ranks: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Walk every thread in `request` and build a one-bit-set [`Graph`]: each
/// traversed call path becomes a chain of edges, with `request.local_rank`
/// set in every leaf edge's bit vector. Retries a failing thread's walk up
/// to `max_retries` times, sleeping `retry_delay` between attempts.
pub fn sample_process(
    walker: &dyn StackWalker,
    request: &SampleRequest,
) -> Result<Graph> {
    let variant = request.flags.edge_variant();
    let mut graph = Graph::new(variant);
    let width_words = crate::bitvector::words_for_bits(request.local_ranks);

    for &thread in &request.threads {
        let frames = walk_with_retries(walker, thread, request.max_retries, request.retry_delay)
            .map_err(|reason| StatError::SampleFailed {
                daemon_rank: request.process,
                retries: request.max_retries,
                reason,
            })?;

        add_stack_to_graph(&mut graph, &frames, request.flags, request.local_rank, width_words)?;
    }

    Ok(graph)
}

fn walk_with_retries(
    walker: &dyn StackWalker,
    thread: ThreadId,
    max_retries: u32,
    retry_delay: Duration,
) -> std::result::Result<Vec<Frame>, String> {
    let mut last_error = String::new();
    for attempt in 0..=max_retries {
        match walker.walk_stack(thread) {
            Ok(frames) => return Ok(frames),
            Err(e) => {
                last_error = e.to_string();
                log::warn!("stack walk failed for thread {thread} (attempt {attempt}): {last_error}");
                if attempt < max_retries {
                    // Jitter the backoff so thousands of daemons retrying a
                    // failed walk at the same instant don't all hammer the
                    // target again in lockstep.
                    let jitter = rand::rng().random_range(0.8..=1.2);
                    thread::sleep(retry_delay.mul_f64(jitter));
                }
            }
        }
    }
    Err(last_error)
}

/// Fold one walked stack into `graph`: build the root-to-leaf path string,
/// hash each prefix for node identity, and set `local_rank`'s bit on the
/// leaf edge (and, transitively, every edge along the path).
fn add_stack_to_graph(
    graph: &mut Graph,
    frames: &[Frame],
    flags: SampleFlags,
    local_rank: usize,
    width_words: usize,
) -> Result<()> {
    let mut path = String::new();
    let mut parent = graph.root();

    for frame in frames {
        path.push('/');
        path.push_str(&frame.render(flags));
        let child = crate::graph::hash_path(&path);

        let mut attrs = NodeAttrs::new(path.clone());
        attrs.source_file = frame.file.clone();
        attrs.source_line = frame.line;
        graph.add_node_checked(child, attrs);

        let label = match flags.edge_variant() {
            EdgeVariant::Bitvector => {
                let mut bv = BitVector::zeroed(width_words);
                bv.set_bit(local_rank);
                EdgeLabel::Bitvector(bv)
            }
            EdgeVariant::CountAndRepresentative => EdgeLabel::CountAndRepresentative(
                crate::bitvector::CountAndRepresentative::singleton(local_rank as i64),
            ),
        };
        graph.add_edge(parent, child, label)?;
        parent = child;
    }

    Ok(())
}

/// Merge a daemon's per-process graphs into one daemon graph. The result's
/// edges have width exactly `ceil(local_ranks / 64)` words, one bit per
/// local process.
pub fn merge_daemon_graphs(local_ranks: usize, graphs: &[Graph]) -> Result<Graph> {
    let variant = graphs
        .first()
        .map(|g| g.variant())
        .unwrap_or(EdgeVariant::Bitvector);
    debug_assert!(graphs
        .iter()
        .all(|g| g.edges().values().all(|label| match label {
            EdgeLabel::Bitvector(bv) => bv.width_words() == crate::bitvector::words_for_bits(local_ranks),
            EdgeLabel::CountAndRepresentative(_) => true,
        })));
    let mut pl = ProgressLogger::default();
    pl.display_memory(false)
        .item_name("process graph")
        .expected_updates(Some(graphs.len()));
    pl.start("merging per-process graphs into daemon graph...");

    let mut daemon_graph = Graph::new(variant);
    for g in graphs {
        daemon_graph.merge(g)?;
        pl.light_update();
    }
    pl.done();
    Ok(daemon_graph)
}

/// The payload a daemon hands to its parent filter (§6): the serialized
/// graph plus enough metadata for the reduction filter to place this
/// daemon's bits in the joint vector.
#[derive(Debug, Clone)]
pub struct DaemonPayload {
    pub graph_bytes: Vec<u8>,
    pub width_words: usize,
    pub lowest_global_rank: u64,
    pub flags: SampleFlags,
}

impl DaemonPayload {
    /// Build the payload for a daemon covering global ranks starting at
    /// `lowest_global_rank`, with `local_ranks` local processes.
    pub fn from_daemon_graph(
        graph: &Graph,
        local_ranks: usize,
        lowest_global_rank: u64,
        flags: SampleFlags,
    ) -> Self {
        DaemonPayload {
            graph_bytes: graph.serialize(),
            width_words: crate::bitvector::words_for_bits(local_ranks),
            lowest_global_rank,
            flags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedWalker {
        attempts: RefCell<u32>,
        fail_until: u32,
        frames: Vec<Frame>,
    }

    impl StackWalker for ScriptedWalker {
        fn walk_stack(&self, _thread: ThreadId) -> Result<Vec<Frame>> {
            let mut attempts = self.attempts.borrow_mut();
            *attempts += 1;
            if *attempts <= self.fail_until {
                return Err(StatError::FatalInternal("stack unreadable".into()));
            }
            Ok(self.frames.clone())
        }
    }

    #[test]
    fn render_falls_back_to_module_offset_when_unresolved() {
        let mut frame = Frame::new("");
        frame.module = Some("libfoo.so".to_string());
        frame.module_offset = Some(0x2a);
        assert_eq!(frame.render(SampleFlags::MODULE_OFFSET), "libfoo.so+0x2a");
    }

    #[test]
    fn render_prefers_pc_over_module_offset() {
        let mut frame = Frame::new("main");
        frame.pc = Some(0xdead);
        frame.module = Some("libfoo.so".to_string());
        frame.module_offset = Some(0x2a);
        assert_eq!(
            frame.render(SampleFlags::PC | SampleFlags::MODULE_OFFSET),
            "main@0xdead"
        );
    }

    #[test]
    fn builds_path_chain_with_leaf_bit_set() {
        let walker = ScriptedWalker {
            attempts: RefCell::new(0),
            fail_until: 0,
            frames: vec![Frame::new("main"), Frame::new("foo")],
        };
        let request = SampleRequest {
            process: 0,
            threads: vec![1],
            flags: SampleFlags::FUNCTION_ONLY,
            local_rank: 2,
            local_ranks: 4,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        };
        let graph = sample_process(&walker, &request).unwrap();

        let root = graph.root();
        let main = crate::graph::hash_path("/main");
        let foo = crate::graph::hash_path("/main/foo");

        match graph.edges().get(&(root, main)).unwrap() {
            EdgeLabel::Bitvector(bv) => assert!(bv.test_bit(2)),
            _ => panic!("expected bitvector"),
        }
        match graph.edges().get(&(main, foo)).unwrap() {
            EdgeLabel::Bitvector(bv) => assert!(bv.test_bit(2)),
            _ => panic!("expected bitvector"),
        }
    }

    #[test]
    fn retries_then_succeeds_within_budget() {
        let walker = ScriptedWalker {
            attempts: RefCell::new(0),
            fail_until: 2,
            frames: vec![Frame::new("main")],
        };
        let request = SampleRequest {
            process: 0,
            threads: vec![1],
            flags: SampleFlags::FUNCTION_ONLY,
            local_rank: 0,
            local_ranks: 1,
            max_retries: 2,
            retry_delay: Duration::ZERO,
        };
        assert!(sample_process(&walker, &request).is_ok());
    }

    #[test]
    fn exhausting_retry_budget_is_sample_failed() {
        let walker = ScriptedWalker {
            attempts: RefCell::new(0),
            fail_until: 5,
            frames: vec![Frame::new("main")],
        };
        let request = SampleRequest {
            process: 7,
            threads: vec![1],
            flags: SampleFlags::FUNCTION_ONLY,
            local_rank: 0,
            local_ranks: 1,
            max_retries: 1,
            retry_delay: Duration::ZERO,
        };
        match sample_process(&walker, &request) {
            Err(StatError::SampleFailed { daemon_rank, .. }) => assert_eq!(daemon_rank, 7),
            other => panic!("expected SampleFailed, got {other:?}"),
        }
    }

    #[test]
    fn line_flag_renders_file_and_line() {
        let mut frame = Frame::new("foo");
        frame.file = Some("a.c".into());
        frame.line = Some(42);
        assert_eq!(frame.render(SampleFlags::LINE), "foo@a.c:42");
    }

    #[test]
    fn pc_flag_renders_address() {
        let mut frame = Frame::new("foo");
        frame.pc = Some(0xdead);
        assert_eq!(frame.render(SampleFlags::PC), "foo@0xdead");
    }

    #[test]
    fn merge_daemon_graphs_unions_per_process_graphs() {
        let walker = ScriptedWalker {
            attempts: RefCell::new(0),
            fail_until: 0,
            frames: vec![Frame::new("main")],
        };
        let mut graphs = Vec::new();
        for rank in 0..4 {
            let request = SampleRequest {
                process: rank as u64,
                threads: vec![1],
                flags: SampleFlags::FUNCTION_ONLY,
                local_rank: rank,
                local_ranks: 4,
                max_retries: 0,
                retry_delay: Duration::ZERO,
            };
            graphs.push(sample_process(&walker, &request).unwrap());
        }
        let daemon_graph = merge_daemon_graphs(4, &graphs).unwrap();
        let root = daemon_graph.root();
        let main = crate::graph::hash_path("/main");
        match daemon_graph.edges().get(&(root, main)).unwrap() {
            EdgeLabel::Bitvector(bv) => assert_eq!(bv.set_bits(), vec![0, 1, 2, 3]),
            _ => panic!("expected bitvector"),
        }
    }
}
