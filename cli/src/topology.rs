/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use stat_graph::topology::{parse_topology_file, TopologyPlan};

use crate::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "topology", about = "Parse a topology file and print the computed merge plan.", long_about = None)]
pub struct CliArgs {
    /// Path to the topology file (§6's textual overlay-tree format).
    pub topology_file: PathBuf,
}

pub fn main(_global_args: GlobalArgs, args: CliArgs) -> Result<()> {
    let text = std::fs::read_to_string(&args.topology_file).with_context(|| {
        format!("could not read topology file {}", args.topology_file.display())
    })?;
    let tree = parse_topology_file(&text)
        .with_context(|| format!("could not parse topology file {}", args.topology_file.display()))?;
    let plan: TopologyPlan =
        TopologyPlan::build(&tree).context("could not build topology plan")?;

    println!("merge-ordered rank list: {:?}", plan.rank_list);
    println!("total width: {} word(s)", plan.total_width_words);
    for placement in &plan.placements {
        println!(
            "  daemon {:<16} offset={:>4} word(s)  ranks={:?}",
            placement.daemon_id, placement.layout_offset_words, placement.ranks
        );
    }

    Ok(())
}
