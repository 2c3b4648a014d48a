//! Shared data model for the reconciliation and analytics engine
//!
//! All records arrive already fetched from the storage layer; the engine
//! treats them as immutable inputs. Account identity is owned by that
//! layer, so accounts are referenced by plain string ids here.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

/// Cash-flow category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FlowCategory {
    Deposit,
    Withdrawal,
    Dividend,
    Interest,
    Fee,
    Tax,
    TransferIn,
    TransferOut,
}

impl FlowCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowCategory::Deposit => "DEPOSIT",
            FlowCategory::Withdrawal => "WITHDRAWAL",
            FlowCategory::Dividend => "DIVIDEND",
            FlowCategory::Interest => "INTEREST",
            FlowCategory::Fee => "FEE",
            FlowCategory::Tax => "TAX",
            FlowCategory::TransferIn => "TRANSFER_IN",
            FlowCategory::TransferOut => "TRANSFER_OUT",
        }
    }
}

impl FromStr for FlowCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(FlowCategory::Deposit),
            "WITHDRAWAL" => Ok(FlowCategory::Withdrawal),
            "DIVIDEND" => Ok(FlowCategory::Dividend),
            "INTEREST" => Ok(FlowCategory::Interest),
            "FEE" => Ok(FlowCategory::Fee),
            "TAX" => Ok(FlowCategory::Tax),
            "TRANSFER_IN" => Ok(FlowCategory::TransferIn),
            "TRANSFER_OUT" => Ok(FlowCategory::TransferOut),
            _ => Err(()),
        }
    }
}

/// Where a cash-flow event came from
///
/// Only `Manual` events are durable records with their own lifecycle.
/// Every other provenance is a computed view over other records and is
/// rebuilt on each query, never persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum FlowProvenance {
    Manual,
    Dividend,
    TransactionFee,
    Transfer,
    Implied,
}

impl FlowProvenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowProvenance::Manual => "MANUAL",
            FlowProvenance::Dividend => "DIVIDEND",
            FlowProvenance::TransactionFee => "TRANSACTION_FEE",
            FlowProvenance::Transfer => "TRANSFER",
            FlowProvenance::Implied => "IMPLIED",
        }
    }
}

impl FromStr for FlowProvenance {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(FlowProvenance::Manual),
            "DIVIDEND" => Ok(FlowProvenance::Dividend),
            "TRANSACTION_FEE" => Ok(FlowProvenance::TransactionFee),
            "TRANSFER" => Ok(FlowProvenance::Transfer),
            "IMPLIED" => Ok(FlowProvenance::Implied),
            _ => Err(()),
        }
    }
}

/// A single cash-flow event in the merged ledger
///
/// `amount` is always a non-negative magnitude; direction is carried by
/// the category. Derived events are built through the provenance-stamped
/// constructors below so that each source keeps a disjoint
/// (category, provenance) combination and no two sources can collide.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CashFlowEvent {
    pub id: Option<i64>,
    pub account_id: String,
    pub flow_date: NaiveDate,
    pub amount: Decimal,
    pub category: FlowCategory,
    pub description: Option<String>,
    pub provenance: FlowProvenance,
}

impl CashFlowEvent {
    /// Dividend-derived flow: one per dividend record, gross amount.
    pub fn dividend(account_id: &str, pay_date: NaiveDate, gross_amount: Decimal) -> Self {
        CashFlowEvent {
            id: None,
            account_id: account_id.to_string(),
            flow_date: pay_date,
            amount: gross_amount.abs(),
            category: FlowCategory::Dividend,
            description: None,
            provenance: FlowProvenance::Dividend,
        }
    }

    /// Fee-derived flow: commission plus fees of one trade.
    pub fn fee(account_id: &str, trade_date: NaiveDate, amount: Decimal) -> Self {
        CashFlowEvent {
            id: None,
            account_id: account_id.to_string(),
            flow_date: trade_date,
            amount: amount.abs(),
            category: FlowCategory::Fee,
            description: None,
            provenance: FlowProvenance::TransactionFee,
        }
    }

    /// Outgoing half of a share transfer, valued at market value.
    pub fn transfer_out(account_id: &str, transfer: &ShareTransfer) -> Self {
        CashFlowEvent {
            id: None,
            account_id: account_id.to_string(),
            flow_date: transfer.transfer_date,
            amount: transfer.market_value.abs(),
            category: FlowCategory::TransferOut,
            description: Some(format!("{} x{} out", transfer.symbol, transfer.quantity)),
            provenance: FlowProvenance::Transfer,
        }
    }

    /// Incoming half of a share transfer, valued at market value.
    pub fn transfer_in(account_id: &str, transfer: &ShareTransfer) -> Self {
        CashFlowEvent {
            id: None,
            account_id: account_id.to_string(),
            flow_date: transfer.transfer_date,
            amount: transfer.market_value.abs(),
            category: FlowCategory::TransferIn,
            description: Some(format!("{} x{} in", transfer.symbol, transfer.quantity)),
            provenance: FlowProvenance::Transfer,
        }
    }

    /// Deposit or withdrawal inferred from a snapshot cost-basis delta.
    pub fn implied(account_id: &str, flow_date: NaiveDate, net_deposit: Decimal) -> Self {
        let category = if net_deposit > Decimal::ZERO {
            FlowCategory::Deposit
        } else {
            FlowCategory::Withdrawal
        };
        CashFlowEvent {
            id: None,
            account_id: account_id.to_string(),
            flow_date,
            amount: net_deposit.abs(),
            category,
            description: Some("Inferred from valuation snapshot change".to_string()),
            provenance: FlowProvenance::Implied,
        }
    }
}

/// Point-in-time valuation of an account
///
/// Immutable once created; a newer snapshot supersedes an older one, the
/// older one is never mutated in place. A missing `as_of_date` marks a
/// fresh, just-uploaded statement: it sorts after dated snapshots within
/// an account but is never used as the closing anchor of a
/// reconciliation pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationSnapshot {
    pub account_id: String,
    pub as_of_date: Option<NaiveDate>,
    pub total_market_value: Decimal,
    pub total_cost_basis: Decimal,
    pub total_unrealized_gain: Decimal,
    pub created_at: DateTime<Utc>,
}

impl ValuationSnapshot {
    /// The business date anchoring this snapshot when it opens a
    /// reconciliation period: the as-of date when present, otherwise the
    /// date the statement was recorded.
    pub fn anchor_date(&self) -> NaiveDate {
        self.as_of_date.unwrap_or_else(|| self.created_at.date_naive())
    }

    /// Snapshot ordering within an account: (as_of_date, created_at)
    /// ascending, null dates last.
    pub fn chronological_cmp(&self, other: &ValuationSnapshot) -> Ordering {
        match (self.as_of_date, other.as_of_date) {
            (Some(a), Some(b)) => a.cmp(&b).then(self.created_at.cmp(&other.created_at)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.created_at.cmp(&other.created_at),
        }
    }
}

/// Movement of shares between accounts (or to/from an external broker)
///
/// Created only by explicit user action, never auto-generated. A `None`
/// endpoint means the other side is outside the tracked accounts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ShareTransfer {
    pub from_account_id: Option<String>,
    pub to_account_id: Option<String>,
    pub symbol: String,
    pub quantity: Decimal,
    pub cost_basis: Decimal,
    pub market_value: Decimal,
    pub transfer_date: NaiveDate,
}

/// Investment return over one consecutive-snapshot period
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeriodReturn {
    pub account_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub net_deposits: Decimal,
    pub net_transfers: Decimal,
    pub period_return: Decimal,
    pub return_percent: Decimal,
}

/// Dividend payment record
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DividendRecord {
    pub account_id: String,
    pub symbol: String,
    pub pay_date: NaiveDate,
    pub gross_amount: Decimal,
    pub tax_withheld: Decimal,
    pub qualified: bool,
    pub description: Option<String>,
}

/// Trade direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeSide::Buy => "BUY",
            TradeSide::Sell => "SELL",
        }
    }
}

impl FromStr for TradeSide {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" | "B" => Ok(TradeSide::Buy),
            "SELL" | "S" => Ok(TradeSide::Sell),
            _ => Err(()),
        }
    }
}

/// A buy or sell transaction, source of fee-derived flows
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TradeRecord {
    pub account_id: String,
    pub symbol: String,
    pub side: TradeSide,
    pub trade_date: NaiveDate,
    pub quantity: Decimal,
    pub price_per_unit: Decimal,
    pub commission: Decimal,
    pub fees: Decimal,
}

impl TradeRecord {
    /// Commission plus exchange/regulatory fees for this trade.
    pub fn total_fees(&self) -> Decimal {
        self.commission + self.fees
    }
}

/// A sale to be matched against tax lots
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SaleTransaction {
    pub account_id: String,
    pub symbol: String,
    pub sale_date: NaiveDate,
    pub quantity: Decimal,
    pub sale_price: Decimal,
}

/// A discrete purchase batch with its own date and price
///
/// `quantity` and `cost_basis` shrink together as the lot is consumed by
/// sale matching; neither may go negative.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxLot {
    pub symbol: String,
    pub quantity: Decimal,
    pub purchase_date: NaiveDate,
    pub purchase_price: Decimal,
    pub cost_basis: Decimal,
}

/// Realized gain from one (sale, matched-lot) pairing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapitalGain {
    pub symbol: String,
    pub quantity: Decimal,
    pub purchase_date: NaiveDate,
    pub sale_date: NaiveDate,
    pub cost_basis: Decimal,
    pub proceeds: Decimal,
    pub gain: Decimal,
    pub holding_period_days: i64,
    pub is_long_term: bool,
    pub tax_rate: Decimal,
    pub tax_amount: Decimal,
}

/// Cost-basis method used when matching sales to lots
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CostBasisMethod {
    Fifo,
    Lifo,
    Hifo,
    Average,
}

impl CostBasisMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostBasisMethod::Fifo => "FIFO",
            CostBasisMethod::Lifo => "LIFO",
            CostBasisMethod::Hifo => "HIFO",
            CostBasisMethod::Average => "AVERAGE",
        }
    }
}

impl FromStr for CostBasisMethod {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "FIFO" => Ok(CostBasisMethod::Fifo),
            "LIFO" => Ok(CostBasisMethod::Lifo),
            "HIFO" => Ok(CostBasisMethod::Hifo),
            "AVERAGE" | "AVG" => Ok(CostBasisMethod::Average),
            _ => Err(()),
        }
    }
}
