/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

use anyhow::{bail, Context, Result};
use clap::Parser;
use stat_graph::control::{Version, VersionCheck};

use crate::GlobalArgs;

#[derive(Parser, Debug)]
#[command(name = "check-version", about = "Run the version handshake accounting against this build's own version.", long_about = None)]
pub struct CliArgs {
    /// A daemon version to check, as "major.minor.revision".
    pub daemon_version: String,
}

/// Parse a "major.minor.revision" string into a [`Version`] triple.
pub(crate) fn parse_version(s: &str) -> Result<Version> {
    let parts: Vec<&str> = s.split('.').collect();
    let [major, minor, revision] = parts[..] else {
        bail!("expected \"major.minor.revision\", got {s:?}");
    };
    Ok((
        major.parse().with_context(|| format!("invalid major version in {s:?}"))?,
        minor.parse().with_context(|| format!("invalid minor version in {s:?}"))?,
        revision.parse().with_context(|| format!("invalid revision in {s:?}"))?,
    ))
}

/// This build's own version, used as the front end's expected version.
pub(crate) fn crate_version() -> Version {
    parse_version(env!("CARGO_PKG_VERSION")).unwrap_or((0, 1, 0))
}

pub fn main(_global_args: GlobalArgs, args: CliArgs) -> Result<()> {
    let front_end = crate_version();
    let daemon = parse_version(&args.daemon_version)?;

    let mut check = VersionCheck::default();
    check.record(daemon, front_end);

    match check.into_result(front_end) {
        Ok(()) => {
            println!("version match: front end {front_end:?}, daemon {daemon:?}");
            Ok(())
        }
        Err(e) => {
            println!("version mismatch: front end {front_end:?}, daemon {daemon:?}");
            Err(e.into())
        }
    }
}
