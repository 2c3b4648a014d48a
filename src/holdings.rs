//! Holding views - per-account detail or per-symbol aggregation
//!
//! The reporting layer asks for one of two explicit shapes: a detailed
//! view keyed by (account, symbol) or an aggregated view that collapses a
//! symbol across accounts. Both share the symbol/quantity/value core; the
//! caller picks with a view mode rather than probing fields at runtime.

use itertools::Itertools;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One account's position in one symbol, as fetched from storage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PositionRecord {
    pub account_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
}

/// Which holding shape to build
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HoldingViewMode {
    Detailed,
    Aggregated,
}

/// Per account-symbol holding with derived cost figures
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DetailedHolding {
    pub account_id: String,
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub average_cost: Decimal,
    pub unrealized_gain: Decimal,
}

/// Per-symbol holding collapsed across accounts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AggregatedHolding {
    pub symbol: String,
    pub quantity: Decimal,
    pub market_value: Decimal,
    pub cost_basis: Decimal,
    pub account_count: usize,
}

/// The two explicit holding shapes
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum HoldingView {
    Detailed(Vec<DetailedHolding>),
    Aggregated(Vec<AggregatedHolding>),
}

/// Build the requested holding view from raw positions.
///
/// Detailed output is sorted by (account, symbol), aggregated output by
/// symbol, so repeated calls order identically.
pub fn build_holdings(positions: &[PositionRecord], mode: HoldingViewMode) -> HoldingView {
    match mode {
        HoldingViewMode::Detailed => {
            let holdings = positions
                .iter()
                .sorted_by(|a, b| {
                    a.account_id
                        .cmp(&b.account_id)
                        .then_with(|| a.symbol.cmp(&b.symbol))
                })
                .map(|p| DetailedHolding {
                    account_id: p.account_id.clone(),
                    symbol: p.symbol.clone(),
                    quantity: p.quantity,
                    market_value: p.market_value,
                    cost_basis: p.cost_basis,
                    average_cost: if p.quantity.is_zero() {
                        Decimal::ZERO
                    } else {
                        p.cost_basis / p.quantity
                    },
                    unrealized_gain: p.market_value - p.cost_basis,
                })
                .collect();
            HoldingView::Detailed(holdings)
        }
        HoldingViewMode::Aggregated => {
            let mut by_symbol: BTreeMap<&str, (AggregatedHolding, BTreeSet<&str>)> =
                BTreeMap::new();
            for position in positions {
                let entry = by_symbol
                    .entry(position.symbol.as_str())
                    .or_insert_with(|| {
                        (
                            AggregatedHolding {
                                symbol: position.symbol.clone(),
                                quantity: Decimal::ZERO,
                                market_value: Decimal::ZERO,
                                cost_basis: Decimal::ZERO,
                                account_count: 0,
                            },
                            BTreeSet::new(),
                        )
                    });
                entry.0.quantity += position.quantity;
                entry.0.market_value += position.market_value;
                entry.0.cost_basis += position.cost_basis;
                entry.1.insert(position.account_id.as_str());
            }

            let holdings = by_symbol
                .into_values()
                .map(|(mut aggregated, accounts)| {
                    aggregated.account_count = accounts.len();
                    aggregated
                })
                .collect();
            HoldingView::Aggregated(holdings)
        }
    }
}
