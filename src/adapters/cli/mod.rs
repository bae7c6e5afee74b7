//! CLI Adapter
//!
//! Command-line interface and console event rendering.
//! Uses clap derive macros for argument parsing.

mod commands;
mod console;

pub use commands::{BalanceCmd, CliApp, Command, ConditionsCmd, QuoteCmd, RunCmd};
pub use console::{render_event, run_presenter};
