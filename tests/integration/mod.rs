//! Integration tests for the hierarchical arbitrage bot.
//!
//! The mock pipeline tests run offline. Tests marked `#[ignore]` talk to the
//! real Polymarket APIs and need a valid POLYMARKET_PRIVATE_KEY.
//! Run with: cargo test --test integration -- --ignored

use std::sync::Arc;
use std::time::Duration;

use hierarchy_arb::arbitrage::{ExecutorSettings, OrderExecutor};
use hierarchy_arb::bot::Bot;
use hierarchy_arb::config::Config;
use hierarchy_arb::error::{BotError, WsError};
use hierarchy_arb::feed::{MarketFeed, PriceUpdate, ReconnectConfig, UpdateKind};
use hierarchy_arb::market::{
    scan_hierarchies, EventRecord, GammaDirectory, MarketDirectory, MarketRecord, MockDirectory,
    MockExchange, PolymarketClient,
};
use hierarchy_arb::trading::{Side, TimeInForce, TransactionLog};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use smallvec::smallvec;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OFFLINE_KEY: &str = "0x0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

fn offline_config() -> Config {
    Config::from_pairs([
        ("POLYMARKET_PRIVATE_KEY", OFFLINE_KEY),
        ("BALANCE_CACHE_SECONDS", "0"),
    ])
    .unwrap()
}

fn threshold_market(question: &str, yes: &str, no: &str) -> MarketRecord {
    MarketRecord {
        condition_id: format!("cond-{yes}"),
        question: question.to_string(),
        tokens: smallvec![yes.to_string(), no.to_string()],
        outcomes: smallvec!["Yes".to_string(), "No".to_string()],
        last_prices: smallvec![],
        active: true,
        closed: false,
        closes_at: None,
        neg_risk: false,
    }
}

fn btc_event() -> EventRecord {
    EventRecord {
        title: "Bitcoin above ___ on March 31?".to_string(),
        closes_at: None,
        neg_risk: false,
        markets: vec![
            threshold_market("Will Bitcoin be above $100,000 on March 31?", "y100", "n100"),
            threshold_market("Will Bitcoin be above $110,000 on March 31?", "y110", "n110"),
            threshold_market("Will Bitcoin be above $120,000 on March 31?", "y120", "n120"),
        ],
    }
}

struct Pipeline {
    bot: Arc<Bot>,
    exchange: Arc<MockExchange>,
    ledger: Arc<TransactionLog>,
    _dir: tempfile::TempDir,
}

fn pipeline(balance: Decimal) -> Pipeline {
    pipeline_with(MockExchange::new(balance))
}

fn pipeline_with(exchange: MockExchange) -> Pipeline {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Arc::new(TransactionLog::new(dir.path().join("transactions.csv")));
    let config = Arc::new(offline_config());
    let exchange = Arc::new(exchange);
    let executor = Arc::new(
        OrderExecutor::new(exchange.clone(), ExecutorSettings::from_config(&config))
            .with_ledger(ledger.clone()),
    );
    let bot = Arc::new(
        Bot::new(
            config,
            Arc::new(MockDirectory::new(vec![btc_event()])),
            executor,
            CancellationToken::new(),
        )
        .with_ledger(ledger.clone()),
    );

    Pipeline {
        bot,
        exchange,
        ledger,
        _dir: dir,
    }
}

fn price(token: &str, price: Decimal) -> PriceUpdate {
    PriceUpdate::new(token.to_string(), price, UpdateKind::PriceChange)
}

#[tokio::test]
async fn inversion_flows_from_price_to_ledger() {
    let p = pipeline(dec!(1000));
    let scan = p.bot.initial_scan().await.unwrap();
    assert_eq!(scan.pairs.len(), 2);
    assert_eq!(scan.tokens.len(), 6);

    // Correctly ordered chain: nothing to do.
    p.bot.handle_price_update(price("y100", dec!(0.60)));
    p.bot.handle_price_update(price("y110", dec!(0.40)));
    p.bot.handle_price_update(price("y120", dec!(0.20)));
    p.bot.wait_for_trades().await;
    assert_eq!(p.exchange.submission_count(), 0);

    // $120k jumps above $110k.
    assert_eq!(p.bot.handle_price_update(price("y120", dec!(0.45))), 1);
    p.bot.wait_for_trades().await;

    let submitted = p.exchange.submissions();
    assert_eq!(submitted.len(), 2);
    assert_eq!(submitted[0].token_id, "y110");
    assert_eq!(submitted[1].token_id, "n120");
    assert!(submitted.iter().all(|o| o.side == Side::Buy));

    let summary = p.ledger.summary().unwrap();
    assert_eq!(summary.total_transactions, 1);
    assert_eq!(summary.successful, 1);

    let report = p.bot.report();
    assert_eq!(report.session.trades_executed, 1);
    assert_eq!(report.ledger.map(|l| l.successful), Some(1));
}

#[tokio::test]
async fn failed_second_leg_is_unwound_and_recorded() {
    let p = pipeline(dec!(1000));
    p.exchange.fail_submission(1, "not enough liquidity");
    p.bot.initial_scan().await.unwrap();

    p.bot.handle_price_update(price("y100", dec!(0.25)));
    p.bot.handle_price_update(price("y110", dec!(0.40)));
    p.bot.wait_for_trades().await;

    let submitted = p.exchange.submissions();
    assert_eq!(submitted.len(), 3);
    let unwind = &submitted[2];
    assert_eq!(unwind.token_id, "y100");
    assert_eq!(unwind.side, Side::Sell);
    assert_eq!(unwind.tif, TimeInForce::FOK);
    assert_eq!(unwind.size, submitted[0].size);
    assert!(unwind.price < submitted[0].price);

    let snap = p.bot.stats().snapshot();
    assert_eq!(snap.compensations, 1);
    assert_eq!(snap.exposures, 0);
    assert!(snap.total_pnl < Decimal::ZERO);

    let summary = p.ledger.summary().unwrap();
    assert_eq!(summary.total_transactions, 1);
    assert_eq!(summary.failed, 1);
}

#[tokio::test]
async fn repeated_ticks_during_slow_fill_trade_once() {
    let p = pipeline_with(MockExchange::new(dec!(1000)).with_latency(Duration::from_millis(50)));
    p.bot.initial_scan().await.unwrap();

    p.bot.handle_price_update(price("y100", dec!(0.25)));
    assert_eq!(p.bot.handle_price_update(price("y110", dec!(0.40))), 1);
    p.bot.handle_price_update(price("y110", dec!(0.41)));
    p.bot.wait_for_trades().await;

    assert_eq!(p.exchange.submission_count(), 2);
    let snap = p.bot.stats().snapshot();
    assert_eq!(snap.trades_attempted, 1);
    assert_eq!(snap.cooldown_skips, 1);
}

#[tokio::test]
async fn run_stops_when_feed_gives_up() {
    let p = pipeline(dec!(1000));
    let feed = MarketFeed::new(
        "ws://127.0.0.1:9/ws/market",
        ReconnectConfig {
            initial_delay_ms: 10,
            max_attempts: 1,
            connect_timeout_s: 2,
            ..ReconnectConfig::default()
        },
        100,
    );

    let result = tokio::time::timeout(Duration::from_secs(20), p.bot.clone().run(feed))
        .await
        .unwrap();

    assert!(matches!(
        result,
        Err(BotError::WebSocket(WsError::RetriesExhausted { attempts: 1 }))
    ));
    assert!(p.bot.cancel_token().is_cancelled());
}

#[tokio::test]
async fn run_without_pairs_fails_fast() {
    let config = Arc::new(offline_config());
    let executor = Arc::new(OrderExecutor::new(
        Arc::new(MockExchange::new(dec!(100))),
        ExecutorSettings::from_config(&config),
    ));
    let bot = Arc::new(Bot::new(
        config.clone(),
        Arc::new(MockDirectory::new(vec![])),
        executor,
        CancellationToken::new(),
    ));

    let result = bot.run(MarketFeed::from_config(&config)).await;
    assert!(matches!(result, Err(BotError::NoPairsFound)));
}

#[tokio::test]
async fn directory_json_groups_into_pairs() {
    let server = MockServer::start().await;
    let market = |question: &str, yes: &str, no: &str| {
        json!({
            "question": question,
            "conditionId": format!("0x{yes}"),
            "clobTokenIds": format!("[\"{yes}\", \"{no}\"]"),
            "outcomes": "[\"Yes\", \"No\"]",
            "outcomePrices": "[\"0.3\", \"0.7\"]",
            "active": true,
            "closed": false
        })
    };
    Mock::given(method("GET"))
        .and(path("/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {
                "title": "Ethereum price on Friday",
                "endDate": "2026-03-01T00:00:00Z",
                "markets": [
                    market("ETH below $3,000?", "e3", "n3"),
                    market("ETH below $2,500?", "e25", "n25"),
                    market("ETH below $2,000?", "e2", "n2"),
                ]
            },
            {
                "title": "Who wins the election?",
                "markets": [market("Candidate A wins?", "a", "na")]
            }
        ])))
        .mount(&server)
        .await;

    let config = Config::from_pairs([
        ("POLYMARKET_PRIVATE_KEY", OFFLINE_KEY),
        ("POLYMARKET_GAMMA_URL", server.uri().as_str()),
        ("RETRY_DELAY_SECONDS", "0"),
    ])
    .unwrap();
    let directory = GammaDirectory::from_config(&config).unwrap();

    let events = directory.list_active_events().await;
    let scan = scan_hierarchies(&events);

    assert_eq!(scan.events_seen, 2);
    assert_eq!(scan.hierarchies, 1);
    let thresholds: Vec<_> = scan
        .pairs
        .iter()
        .map(|p| (p.parent_threshold, p.child_threshold))
        .collect();
    assert_eq!(thresholds, vec![(3000.0, 2500.0), (2500.0, 2000.0)]);
    assert!(scan.tokens.contains("n25"));
}

/// Get a live config from environment.
fn live_config() -> Option<Config> {
    dotenvy::dotenv().ok();

    let config = Config::load().ok()?;

    // Skip if using placeholder key
    if config.polymarket_private_key.starts_with("0x1234")
        || config.polymarket_private_key.len() < 64
    {
        return None;
    }
    Some(config)
}

/// Test that we can derive the wallet address.
#[tokio::test]
#[ignore = "requires POLYMARKET_PRIVATE_KEY"]
async fn test_get_address() {
    let config = match live_config() {
        Some(c) => c,
        None => {
            println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
            return;
        }
    };

    let client = PolymarketClient::new(&config).unwrap();

    let result = client.get_address();
    assert!(result.is_ok(), "Failed to get address: {:?}", result.err());

    let address = result.unwrap();
    assert!(address.starts_with("0x"), "Invalid address format");
    assert_eq!(address.len(), 42, "Address should be 42 characters");
}

/// Test that we can query the balance.
#[tokio::test]
#[ignore = "requires POLYMARKET_PRIVATE_KEY"]
async fn test_get_balance() {
    let config = match live_config() {
        Some(c) => c,
        None => {
            println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
            return;
        }
    };

    let client = PolymarketClient::new(&config).unwrap();
    let balance = client.get_balance().await;
    assert!(balance.is_ok(), "Failed to get balance: {:?}", balance.err());
    assert!(balance.unwrap() >= Decimal::ZERO);
}

/// Test a full scan of the live directory.
#[tokio::test]
#[ignore = "requires network access"]
async fn test_live_directory_scan() {
    let config = match live_config() {
        Some(c) => c,
        None => {
            println!("Skipping: POLYMARKET_PRIVATE_KEY not set or invalid");
            return;
        }
    };

    let directory = GammaDirectory::from_config(&config).unwrap();
    let events = directory.list_active_events().await;
    assert!(!events.is_empty(), "Directory returned no events");

    let scan = scan_hierarchies(&events);
    println!(
        "Events: {}  Hierarchies: {}  Pairs: {}",
        scan.events_seen,
        scan.hierarchies,
        scan.pairs.len()
    );
    for pair in &scan.pairs {
        assert!(pair.parent_token_id != pair.child_token_id);
    }
}
