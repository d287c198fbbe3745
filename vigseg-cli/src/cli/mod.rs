//! Command-line interface orchestration for vigseg.
//!
//! Offers two commands: `vig-info` builds the variable interaction graph of
//! a DIMACS CNF and reports its statistics; `segment` additionally runs FH
//! segmentation and summarises the resulting components.

mod commands;

pub use commands::{
    AmbiguousArg, BuildArgs, Cli, CliError, Command, ExecutionSummary, SegmentCommand,
    SegmentSummary, VigInfoCommand, VigInfoSummary, render_summary, run_cli,
};
