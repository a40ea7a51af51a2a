//! Trading module for order management and execution.
//!
//! This module handles:
//! - Order types and validation
//! - The order API seam and signed CLOB submission
//! - Simulated fills for dry runs
//! - Open position tracking and the transaction ledger

pub mod execution;
pub mod ledger;
pub mod order;
pub mod paper;
pub mod position;

pub use execution::{submit_order, OrderApi, SubmitResult};
pub use ledger::{LedgerSummary, TransactionLog};
pub use order::{OrderParams, OrderRecord, OrderStatus, Side, TimeInForce};
pub use paper::PaperExchange;
pub use position::OpenPosition;
