/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use dsi_progress_logger::prelude::*;
use rayon::prelude::*;
use stat_graph::control::{GatherConfig, GatherController, InProcessTransport, SimulatedDaemon};
use stat_graph::filter::ChildPayload;
use stat_graph::sampler::{
    merge_daemon_graphs, sample_process, DaemonPayload, Frame, SampleFlags, SampleRequest,
    StackWalker, ThreadId,
};
use stat_graph::topology::{parse_topology_file, TopologyPlan};

use crate::check_version::crate_version;
use crate::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "gather", about = "Run a full gather round over an in-process simulated transport and write the result as DOT.", long_about = None)]
pub struct CliArgs {
    /// Path to the topology file (§6's textual overlay-tree format).
    pub topology_file: PathBuf,
    /// Directory containing one stack file per daemon, named after the
    /// daemon's id in the topology file.
    pub samples_dir: PathBuf,
    /// Where to write the reordered, merged graph.
    #[arg(long, default_value = "gather.dot")]
    pub out: PathBuf,
}

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
    let topology_text = std::fs::read_to_string(&args.topology_file).with_context(|| {
        format!("could not read topology file {}", args.topology_file.display())
    })?;
    let tree = parse_topology_file(&topology_text)
        .with_context(|| format!("could not parse topology file {}", args.topology_file.display()))?;
    let plan: TopologyPlan = TopologyPlan::build(&tree).context("could not build topology plan")?;

    let mut pl = ProgressLogger::default();
    pl.display_memory(false)
        .item_name("daemon")
        .expected_updates(Some(plan.placements.len()));
    if let Some(interval) = global_args.log_interval {
        pl.log_interval(interval);
    }
    pl.start("sampling daemons...");

    let mut daemons = Vec::with_capacity(plan.placements.len());
    for placement in &plan.placements {
        let stack_path = args.samples_dir.join(&placement.daemon_id);
        let text = std::fs::read_to_string(&stack_path)
            .with_context(|| format!("could not read stack file {}", stack_path.display()))?;
        let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
        let local_ranks = placement.ranks.len();
        if lines.len() != local_ranks {
            bail!(
                "stack file {} has {} rank line(s), expected {} (daemon {})",
                stack_path.display(),
                lines.len(),
                local_ranks,
                placement.daemon_id
            );
        }

        let graphs: Vec<_> = lines
            .par_iter()
            .enumerate()
            .map(|(local_rank, line)| {
                let walker = FixedStackWalker {
                    frames: parse_stack_line(line),
                };
                let request = SampleRequest {
                    process: local_rank as u64,
                    threads: vec![0],
                    flags: SampleFlags::FUNCTION_ONLY,
                    local_rank,
                    local_ranks,
                    max_retries: 0,
                    retry_delay: Duration::ZERO,
                };
                sample_process(&walker, &request)
            })
            .collect::<stat_graph::error::Result<Vec<_>>>()?;
        let daemon_graph = merge_daemon_graphs(local_ranks, &graphs)?;
        let lowest_global_rank = *placement.ranks.iter().min().ok_or_else(|| {
            anyhow::anyhow!("daemon {} has an empty rank list", placement.daemon_id)
        })?;
        let payload = DaemonPayload::from_daemon_graph(
            &daemon_graph,
            local_ranks,
            lowest_global_rank,
            SampleFlags::FUNCTION_ONLY,
        );

        daemons.push(SimulatedDaemon {
            id: placement.daemon_id.clone(),
            version: crate_version(),
            responsive: true,
            payload: ChildPayload::from(payload),
        });
        pl.light_update();
    }
    pl.done();

    let mut transport = InProcessTransport::new(daemons);
    let mut controller = GatherController::new(crate_version(), GatherConfig::default());
    controller.attach()?;
    controller.check_version(&mut transport)?;
    controller.sample(&mut transport)?;
    let graph = controller.gather(&mut transport, &plan)?;
    controller.detach()?;

    graph
        .export_dot(&args.out)
        .with_context(|| format!("could not write {}", args.out.display()))?;
    log::info!("wrote {}", args.out.display());

    Ok(())
}
