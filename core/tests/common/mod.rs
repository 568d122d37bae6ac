/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

//! Shared helpers for the integration tests in this directory: a
//! [`StackWalker`] whose answer is fixed at construction, and a couple of
//! small builders for the literal scenarios in spec §8.

use std::time::Duration;

use stat_graph::error::Result;
use stat_graph::graph::Graph;
use stat_graph::sampler::{
    merge_daemon_graphs, sample_process, Frame, SampleFlags, SampleRequest, StackWalker, ThreadId,
};

pub struct FixedStackWalker {
    pub frames: Vec<Frame>,
}

impl StackWalker for FixedStackWalker {
    fn walk_stack(&self, _thread: ThreadId) -> Result<Vec<Frame>> {
        Ok(self.frames.clone())
    }
}

/// Build the daemon graph for one daemon covering `local_ranks` ranks,
/// where the ranks in `sampled` each walk the same `path` (a `;`-separated
/// chain of frame names) and every other local rank contributes nothing.
pub fn daemon_graph_for(local_ranks: usize, sampled: &[usize], path: &str) -> Graph {
    let frames: Vec<Frame> = path.split(';').map(Frame::new).collect();
    let mut graphs = Vec::new();
    for &local_rank in sampled {
        let request = SampleRequest {
            process: local_rank as u64,
            threads: vec![0],
            flags: SampleFlags::FUNCTION_ONLY,
            local_rank,
            local_ranks,
            max_retries: 0,
            retry_delay: Duration::ZERO,
        };
        let walker = FixedStackWalker {
            frames: frames.clone(),
        };
        graphs.push(sample_process(&walker, &request).unwrap());
    }
    merge_daemon_graphs(local_ranks, &graphs).unwrap()
}
