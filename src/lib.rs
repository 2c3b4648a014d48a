//! Reckon - portfolio cash-flow reconciliation and performance analytics
//!
//! This library merges heterogeneous evidence of money movement (manual
//! entries, dividends, fees, inter-account share transfers, and deposits
//! inferred from valuation snapshots) into one consistent ledger, then
//! computes money-weighted and time-weighted returns, risk-adjusted
//! performance ratios, and tax-lot capital gains from that ledger.
//!
//! The engine performs no I/O: callers hand it already-fetched records and
//! receive derived values synchronously. Derived flows are never cached;
//! every call recomputes from the current source records.

pub mod analytics;
pub mod error;
pub mod holdings;
pub mod ledger;
pub mod model;
pub mod reconcile;
pub mod tax;
