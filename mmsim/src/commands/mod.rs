//! Command modules for the mmsim CLI.
//!
//! Each subcommand lives in its own file with an args struct, a command
//! handler and a `run_*` entry point.

pub mod run;
pub mod stress;

pub use run::{run_run, RunArgs};
pub use stress::{run_stress, StressArgs};
