//! CLI argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Condition-signal auto trader for KRX equities
#[derive(Parser, Debug)]
#[command(
    name = "sentry-trader",
    version = env!("CARGO_PKG_VERSION"),
    about = "Condition-signal auto trader for KRX equities",
    long_about = "Subscribes to a brokerage's server-side condition screening feed, \
                  market-buys on signal, and exits positions on take-profit/stop-loss \
                  thresholds evaluated against polled quotes."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the trading session
    Run(RunCmd),

    /// Fetch a one-shot price snapshot for a symbol
    Quote(QuoteCmd),

    /// Show the orderable cash balance
    Balance(BalanceCmd),

    /// List the saved condition channels
    Conditions(ConditionsCmd),
}

/// Start the trading session
#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,

    /// Enable auto trading immediately instead of waiting for a start command
    #[arg(long)]
    pub auto_start: bool,
}

/// Fetch a one-shot price snapshot
#[derive(Parser, Debug)]
pub struct QuoteCmd {
    /// Stock symbol (e.g. 005930)
    #[arg(value_name = "SYMBOL")]
    pub symbol: String,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

/// Show the orderable cash balance
#[derive(Parser, Debug)]
pub struct BalanceCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

/// List the saved condition channels
#[derive(Parser, Debug)]
pub struct ConditionsCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
    pub config: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run() {
        let app = CliApp::try_parse_from(["sentry-trader", "run", "--config", "test.toml"]).unwrap();
        match app.command {
            Command::Run(cmd) => {
                assert_eq!(cmd.config, PathBuf::from("test.toml"));
                assert!(!cmd.auto_start);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_parse_run_auto_start() {
        let app = CliApp::try_parse_from(["sentry-trader", "run", "--auto-start"]).unwrap();
        match app.command {
            Command::Run(cmd) => {
                assert!(cmd.auto_start);
                assert_eq!(cmd.config, PathBuf::from("config.toml"));
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_parse_quote() {
        let app = CliApp::try_parse_from(["sentry-trader", "quote", "005930"]).unwrap();
        match app.command {
            Command::Quote(cmd) => assert_eq!(cmd.symbol, "005930"),
            _ => panic!("Expected Quote command"),
        }
    }

    #[test]
    fn test_global_flags() {
        let app = CliApp::try_parse_from(["sentry-trader", "-v", "--debug", "balance"]).unwrap();
        assert!(app.verbose);
        assert!(app.debug);
        assert!(matches!(app.command, Command::Balance(_)));
    }
}
