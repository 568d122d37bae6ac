/*
 * SPDX-License-Identifier: Apache-2.0 OR LGPL-2.1-or-later
 */

#![doc = include_str!("../README.md")]
#![deny(unstable_features)]
#![deny(trivial_casts)]
#![deny(unconditional_recursion)]
#![deny(clippy::empty_loop)]
#![deny(unreachable_code)]
#![deny(unreachable_pub)]
#![deny(unreachable_patterns)]
#![deny(unused_macro_rules)]
#![deny(unused_doc_comments)]
#![allow(clippy::type_complexity)]

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::io::Write as _;
use std::time::Duration;

pub mod check_version;
pub mod gather;
pub mod sample;
pub mod topology;

/// Parses a duration from a string. For compatibility with the rest of the
/// flag surface, a bare number with no suffix is assumed to be in
/// milliseconds. Suffixes: `s` seconds, `m` minutes, `h` hours, `d` days.
fn parse_duration(value: &str) -> Result<Duration> {
    if value.is_empty() {
        anyhow::bail!("empty duration string, use \"0\" for zero");
    }
    let mut duration = Duration::from_secs(0);
    let mut acc = String::new();
    for c in value.chars() {
        if c.is_ascii_digit() {
            acc.push(c);
        } else if c.is_whitespace() {
            continue;
        } else {
            let amount = acc.parse::<u64>()?;
            match c {
                's' => duration += Duration::from_secs(amount),
                'm' => duration += Duration::from_secs(amount * 60),
                'h' => duration += Duration::from_secs(amount * 60 * 60),
                'd' => duration += Duration::from_secs(amount * 60 * 60 * 24),
                _ => anyhow::bail!("invalid duration suffix: {c}"),
            }
            acc.clear();
        }
    }
    if !acc.is_empty() {
        duration += Duration::from_millis(acc.parse::<u64>()?);
    }
    Ok(duration)
}

/// Flags shared by every subcommand.
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    #[arg(long, value_parser = parse_duration, global = true, display_order = 1000)]
    /// How often to log progress against the sample/gather loops. Default is
    /// no periodic logging. Suffixes: "s", "m", "h", "d"; a bare number is
    /// milliseconds.
    pub log_interval: Option<Duration>,
}

#[derive(Subcommand, Debug)]
pub enum SubCommands {
    Topology(topology::CliArgs),
    Sample(sample::CliArgs),
    Gather(gather::CliArgs),
    CheckVersion(check_version::CliArgs),
}

#[derive(Parser, Debug)]
#[command(name = "statgraph", version = env!("CARGO_PKG_VERSION"))]
/// Demo command-line driver for the bit-vector-labeled stack-trace
/// aggregation core.
pub struct Cli {
    #[command(subcommand)]
    pub command: SubCommands,
    #[clap(flatten)]
    pub args: GlobalArgs,
}

/// The entry point of the command-line interface.
pub fn cli_main<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let start = std::time::Instant::now();
    let cli = Cli::parse_from(args);
    match cli.command {
        SubCommands::Topology(args) => topology::main(cli.args, args)?,
        SubCommands::Sample(args) => sample::main(cli.args, args)?,
        SubCommands::Gather(args) => gather::main(cli.args, args)?,
        SubCommands::CheckVersion(args) => check_version::main(cli.args, args)?,
    }

    log::info!(
        "The command took {}",
        pretty_print_elapsed(start.elapsed().as_secs_f64())
    );

    Ok(())
}

/// Initializes the `env_logger` logger with a custom format including
/// elapsed time since initialization.
pub fn init_env_logger() -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));

    let start = std::time::Instant::now();
    builder.format(move |buf, record| {
        let style = buf.default_level_style(record.level());
        writeln!(
            buf,
            "{} {style}{}{style:#} [{:?}] {} - {}",
            pretty_print_elapsed(start.elapsed().as_secs_f64()),
            record.level(),
            std::thread::current().id(),
            record.target(),
            record.args()
        )
    });
    builder.init();
    Ok(())
}

/// Pretty-prints seconds in a human-readable format.
fn pretty_print_elapsed(elapsed: f64) -> String {
    let mut result = String::new();
    let mut elapsed_seconds = elapsed as u64;
    let days = elapsed_seconds / (60 * 60 * 24);
    elapsed_seconds %= 60 * 60 * 24;
    let hours = elapsed_seconds / (60 * 60);
    elapsed_seconds %= 60 * 60;
    let minutes = elapsed_seconds / 60;

    match days {
        0 => {}
        1 => result.push_str("1 day "),
        _ => result.push_str(&format!("{days} days ")),
    }
    match hours {
        0 => {}
        1 => result.push_str("1 hour "),
        _ => result.push_str(&format!("{hours} hours ")),
    }
    match minutes {
        0 => {}
        1 => result.push_str("1 minute "),
        _ => result.push_str(&format!("{minutes} minutes ")),
    }

    result.push_str(&format!("{:.3} seconds ({elapsed}s)", elapsed % 60.0));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_number_as_milliseconds() {
        assert_eq!(parse_duration("1500").unwrap(), Duration::from_millis(1500));
    }

    #[test]
    fn parses_suffixed_duration() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("3m").unwrap(), Duration::from_secs(180));
    }

    #[test]
    fn rejects_empty_duration() {
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn pretty_print_has_no_unit_below_threshold() {
        assert_eq!(pretty_print_elapsed(0.25), "0.250 seconds (0.25s)");
    }
}
