//! Hierarchical threshold-market arbitrage bot entry point.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hierarchy_arb::api::{create_router, AppState};
use hierarchy_arb::arbitrage::{detect, widest_gap, ExecutorSettings, OrderExecutor};
use hierarchy_arb::bot::Bot;
use hierarchy_arb::config::Config;
use hierarchy_arb::feed::MarketFeed;
use hierarchy_arb::market::{scan_hierarchies, GammaDirectory, MarketDirectory, PolymarketClient};
use hierarchy_arb::metrics;
use hierarchy_arb::signing::address_from_private_key;
use hierarchy_arb::trading::{OrderApi, PaperExchange, TransactionLog};
use hierarchy_arb::utils::shutdown_signal;

/// Hierarchical threshold-market arbitrage bot.
#[derive(Parser, Debug)]
#[command(name = "hierarchy-arb")]
#[command(about = "Arbitrage bot for nested threshold markets on Polymarket")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// Run in dry-run mode (no real orders).
    #[arg(long)]
    dry_run: Option<bool>,

    /// HTTP server port for health/metrics.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the arbitrage bot (default).
    Run {
        /// Run in dry-run mode (no real orders).
        #[arg(long)]
        dry_run: Option<bool>,

        /// HTTP server port for health/metrics.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Check wallet balance and connection.
    CheckBalance,

    /// Scan the market directory once and print the hierarchies found.
    Scan,

    /// Stream prices for the scanned tokens (diagnostic).
    WsTest {
        /// How long to listen.
        #[arg(long, default_value = "10")]
        seconds: u64,
    },

    /// Print the transaction ledger summary.
    Report,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Configuration drives the log format; a load failure is reported after
    // logging is up.
    let config = Config::load();
    let json = config
        .as_ref()
        .map(|c| c.log_format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("hierarchy_arb=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let level = config.as_ref().map(|c| c.rust_log.as_str()).unwrap_or("info");
            EnvFilter::new(level)
        })
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config(config).await,
        Some(Command::CheckBalance) => cmd_check_balance(load(config)?).await,
        Some(Command::Scan) => cmd_scan(load(config)?).await,
        Some(Command::WsTest { seconds }) => cmd_ws_test(load(config)?, seconds).await,
        Some(Command::Report) => cmd_report(load(config)?),
        Some(Command::Run { dry_run, port }) => cmd_run(load(config)?, dry_run, port).await,
        None => cmd_run(load(config)?, args.dry_run, args.port).await,
    }
}

/// Unwrap a loaded configuration and validate it.
fn load(config: Result<Config, envy::Error>) -> anyhow::Result<Config> {
    let config = config.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;
    config.validate().map_err(|e| {
        error!("Invalid configuration: {}", e);
        anyhow::anyhow!("Configuration validation failed: {}", e)
    })?;
    Ok(config)
}

/// Check configuration validity.
async fn cmd_check_config(config: Result<Config, envy::Error>) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("HIERARCHY ARB BOT - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match config {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    // Check private key
    print!("Checking private key... ");
    match address_from_private_key(&config.polymarket_private_key) {
        Ok(addr) => {
            println!("OK");
            println!("  Wallet address: {}", addr);
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Private key invalid"));
        }
    }

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Signature Type: {} ({})", config.polymarket_signature_type,
        match config.polymarket_signature_type {
            0 => "EOA - Standard wallet",
            1 => "Magic.link - Proxy wallet",
            2 => "Gnosis Safe - Multi-sig",
            _ => "Unknown",
        });

    if config.polymarket_signature_type == 1 {
        match &config.polymarket_funder {
            Some(funder) => println!("  Funder Address: {}", funder),
            None => println!("  WARNING: Magic.link requires POLYMARKET_FUNDER to be set!"),
        }
    }

    println!("  Min Profit: ${}", config.min_profit);
    println!(
        "  Position Size: {}% of balance, ${}-${}",
        config.position_fraction * Decimal::ONE_HUNDRED,
        config.min_trade_usdc,
        config.max_trade_usdc
    );
    println!("  Slippage: {}%", config.slippage * Decimal::ONE_HUNDRED);
    println!("  Stop Loss: {}%", config.stop_loss_percent * Decimal::ONE_HUNDRED);
    println!("  Order Type: {}", config.order_type_upper());
    println!("  Cooldown: {}s", config.trade_cooldown_seconds);
    println!("  Max Price Age: {}s", config.max_price_age_seconds);
    println!("  Scan Interval: {}s", config.scan_interval_seconds);
    println!("  Dry Run: {}", config.dry_run);
    println!("  Ledger: {}", config.ledger_path);
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Check wallet balance and connection.
async fn cmd_check_balance(config: Config) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("HIERARCHY ARB BOT - BALANCE CHECK");
    println!("======================================================================");

    println!("Host: {}", config.polymarket_clob_url);
    println!("Signature Type: {}", config.polymarket_signature_type);
    println!("Private Key: present");
    println!("======================================================================");

    // Create client
    print!("\n1. Creating client... ");
    let client = PolymarketClient::new(&config)?;
    println!("OK");

    // Get wallet address
    print!("\n2. Getting wallet address... ");
    let address = client.get_address()?;
    println!("OK");
    println!("   Address: {}", address);

    // Get balance
    print!("\n3. Getting USDC balance... ");
    match client.get_balance().await {
        Ok(balance) => {
            println!("OK");
            println!("   USDC Balance: ${:.6}", balance);
            let per_trade = (balance * config.position_fraction)
                .min(config.max_trade_usdc)
                .max(config.min_trade_usdc.min(balance));
            println!("   Next trade size: ${:.2}", per_trade);
        }
        Err(e) => {
            println!("FAILED");
            println!("   Error: {}", e);
            println!("   Trading stays disabled until the balance can be verified.");
        }
    }

    println!("\n======================================================================");
    println!("BALANCE CHECK COMPLETED");
    println!("======================================================================");

    Ok(())
}

/// Scan the directory once and print what would be monitored.
async fn cmd_scan(config: Config) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("HIERARCHY ARB BOT - MARKET SCAN");
    println!("======================================================================");

    let directory = GammaDirectory::from_config(&config)?;
    println!("\nFetching active events from {}...\n", directory.base_url());

    let events = directory.list_active_events().await;
    let scan = scan_hierarchies(&events);

    // Last traded prices from the directory stand in for the stream.
    let last_prices: HashMap<String, Decimal> = events
        .iter()
        .flat_map(|e| &e.markets)
        .flat_map(|m| m.tokens.iter().cloned().zip(m.last_prices.iter().copied()))
        .filter_map(|(token, price)| price.map(|p| (token, p)))
        .collect();

    println!("Events scanned: {}", scan.events_seen);
    println!("Hierarchical events: {}", scan.hierarchies);
    println!("Pairs: {}", scan.pairs.len());
    println!("Tokens to subscribe: {}", scan.tokens.len());
    println!("----------------------------------------------------------------------");

    for pair in scan.pairs.iter().take(20) {
        println!(
            "  [{}] {} {} -> {}",
            pair.direction, pair.event_title, pair.parent_threshold, pair.child_threshold
        );
    }
    if scan.pairs.len() > 20 {
        println!("  ... and {} more", scan.pairs.len() - 20);
    }

    let inversions = detect(&scan.pairs, &last_prices, config.min_profit);
    println!("----------------------------------------------------------------------");
    println!("Inversions at last traded prices: {}", inversions.len());
    for opp in inversions.iter().take(10) {
        println!(
            "  {}: easy ${} / hard ${} -> margin ${} ({}%)",
            opp.event_title,
            opp.easy_price,
            opp.hard_price,
            opp.profit_margin,
            opp.profit_pct.round_dp(2)
        );
    }
    if let Some(gap) = widest_gap(&scan.pairs, &last_prices) {
        println!("Widest child-minus-parent gap: ${}", gap);
    }
    println!("======================================================================");

    Ok(())
}

/// Stream prices for the scanned tokens.
async fn cmd_ws_test(config: Config, seconds: u64) -> anyhow::Result<()> {
    println!("======================================================================");
    println!("HIERARCHY ARB BOT - WEBSOCKET TEST");
    println!("======================================================================");

    println!("\n1. Scanning market directory...");
    let directory = GammaDirectory::from_config(&config)?;
    let scan = scan_hierarchies(&directory.list_active_events().await);
    println!("   Pairs: {}  Tokens: {}", scan.pairs.len(), scan.tokens.len());
    if scan.tokens.is_empty() {
        return Err(anyhow::anyhow!("No hierarchical markets to subscribe to"));
    }

    println!("\n2. Connecting to {}...", config.market_ws_url());
    let tracker = TaskTracker::new();
    let cancel = CancellationToken::new();
    let (handle, mut updates, feed_task) = MarketFeed::from_config(&config)
        .with_tokens(scan.tokens)
        .spawn(&tracker, cancel.clone());

    println!("\n3. Waiting for price updates ({} seconds)...", seconds);
    let start = Instant::now();
    let deadline = tokio::time::sleep(Duration::from_secs(seconds));
    tokio::pin!(deadline);
    let mut update_count = 0u32;

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            update = updates.recv() => match update {
                Some(update) => {
                    update_count += 1;
                    if update_count <= 50 {
                        println!(
                            "   [{:.1}s] {} {} = {}",
                            start.elapsed().as_secs_f64(),
                            update.kind,
                            update.token_id,
                            update.price
                        );
                    }
                }
                None => break,
            },
        }
    }

    let connected = handle.is_connected();
    let messages = handle.messages_received();
    cancel.cancel();
    tracker.close();
    if let Ok(Err(e)) = feed_task.await {
        warn!(error = %e, "Feed ended with error");
    }

    println!("\n======================================================================");
    println!("WEBSOCKET TEST COMPLETE");
    println!("  Frames received: {}", messages);
    println!("  Price updates: {}", update_count);
    println!("  Connection status: {}", if connected { "Connected" } else { "Disconnected" });
    println!("======================================================================");

    Ok(())
}

/// Print the historical ledger summary.
fn cmd_report(config: Config) -> anyhow::Result<()> {
    let summary = TransactionLog::new(&config.ledger_path).summary()?;

    println!("======================================================================");
    println!("HIERARCHY ARB BOT - TRANSACTION REPORT");
    println!("======================================================================");
    println!("Ledger: {}", summary.path);
    println!("Total transactions: {}", summary.total_transactions);
    println!("Successful: {}", summary.successful);
    println!("Failed: {}", summary.failed);
    println!("Success rate: {}%", summary.success_rate_pct.round_dp(1));
    println!("Estimated total profit: ${}", summary.estimated_total_profit.round_dp(4));
    println!("Average per trade: ${}", summary.avg_profit_per_trade.round_dp(4));
    println!("======================================================================");

    Ok(())
}

/// Run the bot until a shutdown signal or a fatal feed failure.
async fn cmd_run(
    mut config: Config,
    dry_run_override: Option<bool>,
    port_override: Option<u16>,
) -> anyhow::Result<()> {
    // Override with CLI args if provided
    if let Some(dry_run) = dry_run_override {
        config.dry_run = dry_run;
    }
    if let Some(port) = port_override {
        config.port = port;
    }
    let config = Arc::new(config);

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.dry_run { "SIMULATION" } else { "LIVE TRADING" });
    info!("Min profit: ${}", config.min_profit);
    info!(
        "Position size: {}% of balance, ${}-${}",
        config.position_fraction * Decimal::ONE_HUNDRED,
        config.min_trade_usdc,
        config.max_trade_usdc
    );
    info!("Order type: {}", config.order_type_upper());

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    // Initialize metrics
    let prometheus = if config.metrics_enabled {
        match metrics::install_prometheus() {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "Prometheus recorder not installed");
                None
            }
        }
    } else {
        None
    };

    // Order API: simulated fills in dry-run, signed CLOB orders otherwise
    let api: Arc<dyn OrderApi> = if config.dry_run {
        info!("Simulated balance: ${}", config.sim_balance);
        Arc::new(PaperExchange::new(config.sim_balance))
    } else {
        Arc::new(PolymarketClient::new(&config)?)
    };

    let ledger = Arc::new(TransactionLog::new(&config.ledger_path));
    let executor = Arc::new(
        OrderExecutor::new(api, ExecutorSettings::from_config(&config)).with_ledger(ledger.clone()),
    );
    let directory = Arc::new(GammaDirectory::from_config(&config)?);
    let bot = Arc::new(
        Bot::new(config.clone(), directory, executor, cancel.clone()).with_ledger(ledger),
    );

    // Create app state
    let mut app_state = AppState::new(config.dry_run).with_bot(bot.ready_flag(), bot.stats());
    if let Some(handle) = prometheus {
        app_state = app_state.with_prometheus(handle);
    }

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state);
    let server_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { server_cancel.cancelled().await })
            .await
    });

    let result = bot.run(MarketFeed::from_config(&config)).await;

    cancel.cancel();
    match server_handle.await {
        Ok(Err(e)) => warn!(error = %e, "HTTP server error"),
        Err(e) => warn!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    match result {
        Ok(_) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("Bot stopped: {}", e);
            Err(e.into())
        }
    }
}
