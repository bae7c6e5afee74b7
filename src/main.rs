//! Sentry Trader - condition-signal auto trader for KRX equities
//!
//! Subscribes to the brokerage's condition screening feed, market-buys on
//! signal, and exits on take-profit/stop-loss thresholds.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use sentry_trader::adapters::cli::{
    self, BalanceCmd, CliApp, Command, ConditionsCmd, QuoteCmd, RunCmd,
};
use sentry_trader::adapters::rest::{RestBrokerClient, RestConfig};
use sentry_trader::adapters::stream::{WS_URL_MOCK, WS_URL_PROD};
use sentry_trader::application::TradingCoordinator;
use sentry_trader::config::{load_config, Config};
use sentry_trader::ports::broker::BrokerPort;
use sentry_trader::ports::events::CoordinatorCommand;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (credentials go here, not in config.toml)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    init_logging(app.verbose, app.debug);

    match app.command {
        Command::Run(cmd) => run_command(cmd).await,
        Command::Quote(cmd) => quote_command(cmd).await,
        Command::Balance(cmd) => balance_command(cmd).await,
        Command::Conditions(cmd) => conditions_command(cmd).await,
    }
}

fn init_logging(verbose: bool, debug: bool) {
    let filter = if debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    fmt().with_env_filter(filter).with_target(false).init();
}

fn build_broker(config: &Config) -> Result<RestBrokerClient> {
    let rest_config = RestConfig::new(
        config.broker.resolved_app_key(),
        config.broker.resolved_app_secret(),
        config.broker.use_mock,
    );
    RestBrokerClient::new(rest_config).context("Failed to create broker REST client")
}

async fn run_command(cmd: RunCmd) -> Result<()> {
    tracing::info!("starting sentry-trader");

    let config = load_config(&cmd.config).context("Failed to load configuration")?;
    let settings = config.coordinator_settings()?;
    let broker = build_broker(&config)?;
    let ws_url = if config.broker.use_mock {
        WS_URL_MOCK
    } else {
        WS_URL_PROD
    };

    let (ui_tx, ui_rx) = mpsc::unbounded_channel();
    let (command_tx, command_rx) = mpsc::channel(32);
    // placeholder stream sender; the coordinator installs the live one
    // once its stream session is up
    let (stream_seed_tx, _stream_seed_rx) = mpsc::channel(1);

    let coordinator =
        TradingCoordinator::new(Arc::new(broker), settings, ui_tx, stream_seed_tx);

    let presenter = tokio::spawn(cli::run_presenter(ui_rx));

    // ctrl-c funnels through the same command path as the UI
    let shutdown_tx = command_tx.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("shutdown signal received");
        let _ = shutdown_tx.send(CoordinatorCommand::Shutdown).await;
    });

    if cmd.auto_start {
        command_tx
            .send(CoordinatorCommand::StartTrading)
            .await
            .ok();
    }

    coordinator.run(ws_url.to_string(), command_rx).await?;

    let _ = presenter.await;
    tracing::info!("sentry-trader stopped");
    Ok(())
}

async fn quote_command(cmd: QuoteCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let broker = build_broker(&config)?;

    let quote = broker
        .get_price(&cmd.symbol)
        .await
        .context("Quote request failed")?;

    let name = quote.name.unwrap_or_else(|| quote.symbol.clone());
    println!("{} ({})", name, quote.symbol);
    println!("  price:       {} won", quote.price);
    println!("  change rate: {:+.2}%", quote.change_rate);
    println!("  volume:      {}", quote.volume);
    match (quote.best_bid, quote.best_ask) {
        (Some(bid), Some(ask)) => println!("  best bid/ask: {bid} / {ask}"),
        _ => println!("  best bid/ask: unavailable"),
    }

    Ok(())
}

async fn balance_command(cmd: BalanceCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let broker = build_broker(&config)?;

    let balance = broker
        .get_balance()
        .await
        .context("Balance request failed")?;

    println!("orderable cash: {} won", balance.cash);
    if !balance.holdings.is_empty() {
        println!("holdings:");
        for row in &balance.holdings {
            println!("  {} {}", row.symbol, row.name);
        }
    }

    Ok(())
}

async fn conditions_command(cmd: ConditionsCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let broker = build_broker(&config)?;

    let channels = broker
        .get_condition_list()
        .await
        .context("Condition list request failed")?;

    if channels.is_empty() {
        println!("no saved condition channels");
        return Ok(());
    }
    for channel in channels {
        println!("[{}] {}", channel.seq, channel.name);
    }

    Ok(())
}
