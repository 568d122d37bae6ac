/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dsi_progress_logger::prelude::*;
use rayon::prelude::*;
use stat_graph::sampler::{
    merge_daemon_graphs, sample_process, Frame, SampleFlags, SampleRequest, StackWalker, ThreadId,
};

use crate::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "sample", about = "Sample a textual stack description and print the resulting daemon graph as DOT.", long_about = None)]
pub struct CliArgs {
    /// Number of local ranks (processes) this daemon covers.
    pub n_ranks: usize,
    /// Path to the stack file: one non-empty line per rank, a `;`-separated
    /// chain of frame names from outermost to innermost.
    pub stack_file: PathBuf,
}

/// A [`StackWalker`] whose answer is fixed at construction time, standing in
/// for the external process-control collaborator that would actually stop a
/// target and unwind its stack.
struct FixedStackWalker {
    frames: Vec<Frame>,
}

impl StackWalker for FixedStackWalker {
    fn walk_stack(&self, _thread: ThreadId) -> stat_graph::error::Result<Vec<Frame>> {
        Ok(self.frames.clone())
    }
}

fn parse_stack_line(line: &str) -> Vec<Frame> {
    line.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Frame::new)
        .collect()
}

pub fn main(global_args: GlobalArgs, args: CliArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.stack_file)
        .with_context(|| format!("could not read stack file {}", args.stack_file.display()))?;
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() != args.n_ranks {
        bail!(
            "stack file {} has {} rank line(s), expected {}",
            args.stack_file.display(),
            lines.len(),
            args.n_ranks
        );
    }

    let mut pl = ProgressLogger::default();
    pl.display_memory(false)
        .item_name("rank")
        .expected_updates(Some(args.n_ranks));
    if let Some(interval) = global_args.log_interval {
        pl.log_interval(interval);
    }
    pl.start("sampling ranks...");

    // Each rank's walk is independent of every other's, so fan them out
    // across threads rather than sampling one at a time.
    let graphs: Vec<_> = lines
        .par_iter()
        .enumerate()
        .map(|(rank, line)| {
            let walker = FixedStackWalker {
                frames: parse_stack_line(line),
            };
            let request = SampleRequest {
                process: rank as u64,
                threads: vec![0],
                flags: SampleFlags::FUNCTION_ONLY,
                local_rank: rank,
                local_ranks: args.n_ranks,
                max_retries: 0,
                retry_delay: Duration::ZERO,
            };
            sample_process(&walker, &request)
        })
        .collect::<stat_graph::error::Result<Vec<_>>>()?;
    pl.update_with_count(graphs.len());
    pl.done();

    let daemon_graph = merge_daemon_graphs(args.n_ranks, &graphs)?;
    print!("{}", daemon_graph.dot_string());
    Ok(())
}
