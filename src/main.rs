//! Kestrel - AI-assisted perpetual futures trading agent for OKX

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

use kestrel::adapters::blacklist::{AllowAll, BlacklistConfig, VolumeBlacklist};
use kestrel::adapters::cli::{CliApp, Command, ExportCmd, PerformanceCmd, ResetCmd, RunCmd, StatusCmd};
use kestrel::adapters::okx::{OkxClient, OkxConfig, OkxCredentials, OkxExecution, OkxMarketData};
use kestrel::adapters::oracle::{load_token, DeepSeekConfig, DeepSeekOracle, StubOracle};
use kestrel::application::{ControllerConfig, ExecutionEngine, LoopController, RetryPolicy};
use kestrel::config::{load_config, Config};
use kestrel::domain::performance;
use kestrel::domain::risk::RiskManager;
use kestrel::domain::state_store::StateStore;
use kestrel::ports::eligibility::EligibilityPort;
use kestrel::ports::market_data::MarketDataPort;
use kestrel::ports::oracle::OraclePort;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present (exchange credentials live there, not in config)
    dotenvy::dotenv().ok();

    let app = CliApp::parse();
    init_logging(app.verbose, app.debug);

    match app.command {
        Command::Run(cmd) => run_command(cmd).await,
        Command::Status(cmd) => status_command(cmd),
        Command::Performance(cmd) => performance_command(cmd),
        Command::Reset(cmd) => reset_command(cmd),
        Command::Export(cmd) => export_command(cmd),
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

async fn run_command(cmd: RunCmd) -> Result<()> {
    tracing::info!("starting kestrel...");

    let mut config = load_config(&cmd.config).context("Failed to load configuration")?;
    if let Some(minutes) = cmd.interval {
        config.trading.interval_minutes = minutes.max(1);
    }

    let initial_value = cmd.initial_value.unwrap_or(config.trading.initial_value);
    let store = StateStore::load(&config.state.path, initial_value)
        .context("Failed to load trading state; refusing to run with ungrounded state")?;

    // Both credentials are startup requirements: a missing secret must stop
    // the process before any trading logic runs
    let oracle = build_oracle(&config, cmd.offline, cmd.log_oracle)?;
    let credentials = OkxCredentials::from_env().context(
        "Missing OKX credentials.\n\n\
         Set the following environment variables (or put them in .env):\n  \
         OKX_API_KEY, OKX_SECRET_KEY, OKX_PASSPHRASE",
    )?;

    let okx_client = OkxClient::new(
        OkxConfig {
            rest_url: config.exchange.rest_url.clone(),
            timeout: Duration::from_secs(config.exchange.timeout_secs),
            sandbox: cmd.sandbox,
        },
        credentials,
    )
    .context("Failed to create exchange client")?;

    let market: Arc<dyn MarketDataPort> = Arc::new(OkxMarketData::new(okx_client.clone()));
    let exchange = Arc::new(OkxExecution::new(okx_client));

    let eligibility: Arc<dyn EligibilityPort> = if config.blacklist.enabled {
        Arc::new(VolumeBlacklist::new(
            BlacklistConfig {
                min_volume_usd: config.blacklist.min_volume_usd,
                recheck_interval: chrono::Duration::hours(config.blacklist.recheck_hours),
            },
            Arc::clone(&market),
        ))
    } else {
        Arc::new(AllowAll)
    };

    let engine = ExecutionEngine::new(
        exchange,
        RetryPolicy {
            max_attempts: config.exchange.max_retries,
            base_delay: Duration::from_millis(config.exchange.retry_base_ms),
        },
    );

    let analysis_only = cmd.analyze || cmd.offline;
    if cmd.sandbox {
        tracing::warn!("SANDBOX MODE - orders go to OKX simulated trading");
    }
    if analysis_only {
        tracing::warn!("ANALYSIS MODE - decisions are validated but never executed");
    }

    let controller = Arc::new(LoopController::new(
        market,
        oracle,
        eligibility,
        engine,
        store,
        RiskManager::new(config.risk_limits()),
        config.basket(),
        ControllerConfig {
            interval: Duration::from_secs(config.trading.interval_minutes * 60),
            execute_orders: !analysis_only,
            summary_every: 10,
        },
    ));

    // Graceful stop on ctrl-c: the in-flight cycle finishes first
    {
        let controller = Arc::clone(&controller);
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            controller.stop().await;
        });
    }

    controller.run().await.context("Trading loop faulted")?;
    tracing::info!("kestrel stopped");
    Ok(())
}

fn build_oracle(config: &Config, offline: bool, log_calls: bool) -> Result<Arc<dyn OraclePort>> {
    if offline {
        tracing::info!("using the no-decision stub oracle");
        return Ok(Arc::new(StubOracle::new()));
    }

    let token_path = shellexpand::tilde(&config.oracle.token_path).to_string();
    let token = load_token(Path::new(&token_path)).with_context(|| {
        format!(
            "Oracle credential missing.\n\n\
             Put your API key in {} (single line), or run with --offline \
             to use the no-decision stub.",
            token_path
        )
    })?;

    let oracle = DeepSeekOracle::new(
        DeepSeekConfig {
            api_url: config.oracle.api_url.clone(),
            model: config.oracle.model.clone(),
            temperature: config.oracle.temperature,
            timeout: Duration::from_secs(config.oracle.timeout_secs),
            log_calls,
        },
        token,
        config.basket(),
    )
    .context("Failed to create oracle client")?;
    Ok(Arc::new(oracle))
}

fn status_command(cmd: StatusCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let store = StateStore::load(&config.state.path, config.trading.initial_value)?;
    let state = store.state();

    // No live marks here; unrealized PnL is shown relative to entry
    let marks = BTreeMap::new();
    println!("State file:      {}", config.state.path);
    println!("Started:         {}", state.started_at);
    println!("Sessions:        {}", state.sessions.len());
    println!("Initial value:   {:.2}", state.initial_value);
    println!("Account value:   {:.2}", state.total_value(&marks));
    println!("Realized PnL:    {:.2}", state.account.realized_pnl);
    println!("Oracle calls:    {}", state.account.oracle_calls);
    println!("Closed trades:   {}", state.history.len());

    if state.account.open_positions.is_empty() {
        println!("Open positions:  none");
    } else {
        println!("Open positions:");
        for pos in state.account.open_positions.values() {
            println!(
                "  {} {} size={} entry={:.4} lev={}x sl={:?} tp={:?}",
                pos.symbol, pos.side, pos.size, pos.entry_price, pos.leverage,
                pos.stop_loss, pos.take_profit
            );
        }
    }
    Ok(())
}

fn performance_command(cmd: PerformanceCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let store = StateStore::load(&config.state.path, config.trading.initial_value)?;
    let state = store.state();
    let report = performance::analyze(&state.history);

    println!("{}", "=".repeat(60));
    println!("Trading performance summary");
    println!("{}", "=".repeat(60));
    println!("Started:              {}", state.started_at);
    println!("Initial value:        {:.2}", state.initial_value);
    println!("Realized PnL:         {:.2}", state.account.realized_pnl);
    println!("Closed trades:        {}", report.total_closed);
    println!(
        "Wins / losses / flat: {} / {} / {}",
        report.wins, report.losses, report.breakeven
    );
    println!("Win rate:             {:.2}%", report.win_rate * 100.0);
    println!("Max drawdown:         {:.2}", report.max_drawdown);
    println!("Best trade:           {:.2}", report.best_trade);
    println!("Worst trade:          {:.2}", report.worst_trade);
    println!("Risk-adjusted ratio:  {:.3}", report.risk_adjusted_return);
    println!("Sessions:             {}", state.sessions.len());
    println!("Oracle calls:         {}", state.account.oracle_calls);
    println!("{}", "=".repeat(60));
    Ok(())
}

fn reset_command(cmd: ResetCmd) -> Result<()> {
    use std::io::{self, Write};

    let config = load_config(&cmd.config)?;
    let mut store = StateStore::load(&config.state.path, config.trading.initial_value)?;
    let new_value = cmd.initial_value.unwrap_or(config.trading.initial_value);
    if new_value <= 0.0 {
        bail!("initial value must be positive, got {}", new_value);
    }

    if !cmd.yes {
        println!(
            "This destroys {} trade records and {} session markers.",
            store.state().history.len(),
            store.state().sessions.len()
        );
        print!("Type 'RESET' to confirm (or pass -y): ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if input.trim() != "RESET" {
            println!("Aborted. State unchanged.");
            return Ok(());
        }
    }

    store.reset(new_value)?;
    println!("Trading state reset. Initial value: {:.2}", new_value);
    Ok(())
}

fn export_command(cmd: ExportCmd) -> Result<()> {
    let config = load_config(&cmd.config)?;
    let store = StateStore::load(&config.state.path, config.trading.initial_value)?;
    store.export(&cmd.output)?;
    println!("History exported to {}", cmd.output.display());
    Ok(())
}
