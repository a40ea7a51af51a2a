//! In-memory exchange and directory for tests.
//!
//! [`MockExchange`] implements [`OrderApi`] with scripted per-call failures
//! and records every submission. [`MockDirectory`] serves a fixed event list.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rust_decimal::Decimal;

use super::discovery::MarketDirectory;
use super::types::EventRecord;
use crate::error::TradingError;
use crate::trading::execution::OrderApi;
use crate::trading::order::{OrderParams, Side};

/// Scriptable order API.
#[derive(Debug, Default)]
pub struct MockExchange {
    balance: Mutex<Decimal>,
    fail_balance: AtomicBool,
    holdings: DashMap<String, Decimal>,
    /// Submission index (0-based) -> rejection reason.
    failures: Mutex<HashMap<usize, String>>,
    submissions: Mutex<Vec<OrderParams>>,
    next_id: AtomicU64,
    latency: Option<Duration>,
    /// Accept sells without reducing holdings, like an unfilled FAK.
    sells_unfilled: AtomicBool,
}

impl MockExchange {
    /// Exchange holding `balance` USDC that accepts every order.
    pub fn new(balance: Decimal) -> Self {
        Self {
            balance: Mutex::new(balance),
            ..Default::default()
        }
    }

    /// Delay every submission by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Reject the `index`-th submission (0-based) with `reason`.
    pub fn fail_submission(&self, index: usize, reason: impl Into<String>) {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(index, reason.into());
    }

    /// Make balance queries fail.
    pub fn set_balance_failing(&self, failing: bool) {
        self.fail_balance.store(failing, Ordering::SeqCst);
    }

    /// Accept sell orders but leave holdings untouched.
    pub fn set_sells_unfilled(&self, unfilled: bool) {
        self.sells_unfilled.store(unfilled, Ordering::SeqCst);
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap_or_else(|e| e.into_inner()) = balance;
    }

    /// Set the shares held of `token_id`.
    pub fn set_holding(&self, token_id: &str, size: Decimal) {
        self.holdings.insert(token_id.to_string(), size);
    }

    /// Every order submitted so far, accepted or not.
    pub fn submissions(&self) -> Vec<OrderParams> {
        self.submissions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn submission_count(&self) -> usize {
        self.submissions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl OrderApi for MockExchange {
    async fn collateral_balance(&self) -> Result<Decimal, TradingError> {
        if self.fail_balance.load(Ordering::SeqCst) {
            return Err(TradingError::BalanceUnavailable(
                "mock balance failure".to_string(),
            ));
        }
        Ok(*self.balance.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn token_balance(&self, token_id: &str) -> Result<Decimal, TradingError> {
        Ok(self.holdings.get(token_id).map(|h| *h).unwrap_or_default())
    }

    async fn submit_order(&self, params: &OrderParams) -> Result<String, TradingError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let index = {
            let mut submissions = self.submissions.lock().unwrap_or_else(|e| e.into_inner());
            submissions.push(params.clone());
            submissions.len() - 1
        };

        let failure = self
            .failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&index)
            .cloned();
        if let Some(reason) = failure {
            return Err(TradingError::OrderRejected { reason });
        }

        let mut held = self.holdings.entry(params.token_id.clone()).or_default();
        match params.side {
            Side::Buy => *held += params.size,
            Side::Sell if self.sells_unfilled.load(Ordering::SeqCst) => {}
            Side::Sell => *held = (*held - params.size).max(Decimal::ZERO),
        }

        Ok(format!("mock-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1))
    }

    fn venue(&self) -> &'static str {
        "mock"
    }
}

/// Directory serving a fixed, replaceable event list.
#[derive(Debug, Default)]
pub struct MockDirectory {
    events: Mutex<Vec<EventRecord>>,
    calls: AtomicUsize,
}

impl MockDirectory {
    pub fn new(events: Vec<EventRecord>) -> Self {
        Self {
            events: Mutex::new(events),
            calls: AtomicUsize::new(0),
        }
    }

    /// Replace what the next scan returns.
    pub fn set_events(&self, events: Vec<EventRecord>) {
        *self.events.lock().unwrap_or_else(|e| e.into_inner()) = events;
    }

    /// Number of `list_active_events` calls served.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MarketDirectory for MockDirectory {
    async fn list_active_events(&self) -> Vec<EventRecord> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}
