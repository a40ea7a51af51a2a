//! Append-only CSV record of arbitrage transactions.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use csv::{ReaderBuilder, Writer};
use rust_decimal::Decimal;
use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::arbitrage::{ArbitrageTransaction, TradeOutcome};
use crate::error::LedgerError;

/// Column order of the transaction file.
pub const LEDGER_COLUMNS: [&str; 16] = [
    "timestamp",
    "transaction_id",
    "event_title",
    "easy_token_id",
    "hard_token_id",
    "easy_price",
    "hard_price",
    "profit_margin",
    "profit_pct",
    "order_size",
    "usdc_invested",
    "leg1_order_id",
    "leg2_order_id",
    "leg1_status",
    "leg2_status",
    "outcome",
];

/// Aggregate view over every transaction ever recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub total_transactions: usize,
    /// Both legs confirmed.
    pub successful: usize,
    pub failed: usize,
    pub success_rate_pct: Decimal,
    /// Sum of profit margin times size over successful trades.
    pub estimated_total_profit: Decimal,
    pub avg_profit_per_trade: Decimal,
    pub path: String,
}

/// CSV-backed transaction record.
#[derive(Debug)]
pub struct TransactionLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TransactionLog {
    /// Open (or lazily create) the record at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one transaction, writing the header if the file is new.
    pub fn append(&self, tx: &ArbitrageTransaction) -> Result<(), LedgerError> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let is_new = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = Writer::from_writer(file);

        if is_new {
            writer.write_record(LEDGER_COLUMNS)?;
        }

        let timestamp = tx
            .timestamp
            .format(&Rfc3339)
            .unwrap_or_else(|_| tx.timestamp.unix_timestamp().to_string());

        writer.write_record(&[
            timestamp,
            tx.transaction_id.clone(),
            tx.event_title.clone(),
            tx.easy_token_id.clone(),
            tx.hard_token_id.clone(),
            tx.easy_price.to_string(),
            tx.hard_price.to_string(),
            tx.profit_margin.to_string(),
            tx.profit_pct.round_dp(4).to_string(),
            tx.order_size.round_dp(6).to_string(),
            tx.usdc_invested().round_dp(6).to_string(),
            tx.leg1.order_id.clone().unwrap_or_default(),
            tx.leg2.order_id.clone().unwrap_or_default(),
            tx.leg1.status.to_string(),
            tx.leg2.status.to_string(),
            tx.outcome.to_string(),
        ])?;
        writer.flush()?;

        debug!(transaction_id = %tx.transaction_id, path = %self.path.display(), "Transaction recorded");
        Ok(())
    }

    /// Read the whole file back and aggregate it.
    pub fn summary(&self) -> Result<LedgerSummary, LedgerError> {
        let mut summary = LedgerSummary {
            path: self.path.display().to_string(),
            ..Default::default()
        };

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(summary),
            Err(e) => return Err(e.into()),
        };

        let mut reader = ReaderBuilder::new().has_headers(true).from_reader(file);
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h == name);
        let (Some(outcome_col), Some(margin_col), Some(size_col)) =
            (column("outcome"), column("profit_margin"), column("order_size"))
        else {
            warn!(path = %self.path.display(), "Transaction file has unexpected columns");
            return Ok(summary);
        };

        for record in reader.records() {
            let record = record?;
            summary.total_transactions += 1;

            let executed = record.get(outcome_col) == Some(TradeOutcome::Executed.as_ref());
            if !executed {
                summary.failed += 1;
                continue;
            }

            summary.successful += 1;
            let margin = record
                .get(margin_col)
                .and_then(|v| v.parse::<Decimal>().ok())
                .unwrap_or_default();
            let size = record
                .get(size_col)
                .and_then(|v| v.parse::<Decimal>().ok())
                .unwrap_or_default();
            summary.estimated_total_profit += margin * size;
        }

        if summary.total_transactions > 0 {
            summary.success_rate_pct = Decimal::from(summary.successful * 100)
                / Decimal::from(summary.total_transactions);
        }
        if summary.successful > 0 {
            summary.avg_profit_per_trade =
                summary.estimated_total_profit / Decimal::from(summary.successful);
        }

        Ok(summary)
    }
}
