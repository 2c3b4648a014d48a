//! Tax-lot matching and realized capital gains
//!
//! Sales consume discrete purchase lots in an order chosen by the
//! cost-basis method. A lot's quantity and cost basis shrink together and
//! never go negative; selling more than the open lots hold reports the
//! shortfall instead of fabricating basis.

use chrono::Datelike;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

use crate::model::{CapitalGain, CostBasisMethod, SaleTransaction, TaxLot};

/// Holding periods beyond this many days qualify as long-term.
const LONG_TERM_DAYS: i64 = 365;

/// Tax rate assumptions
///
/// Estimates only; the engine makes no claim to filing-grade accuracy.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxConfig {
    pub short_term_rate: Decimal,
    pub long_term_rate: Decimal,
    pub dividend_withholding_rate: Decimal,
    pub dividend_tax_free_threshold: Decimal,
}

impl Default for TaxConfig {
    fn default() -> Self {
        TaxConfig {
            short_term_rate: dec!(0.22),
            long_term_rate: dec!(0.15),
            dividend_withholding_rate: dec!(0.15),
            dividend_tax_free_threshold: dec!(10000),
        }
    }
}

/// Result of matching one sale against the open lots
///
/// `unmatched_quantity` is non-zero when the lots ran out before the sale
/// was fully covered; the caller decides whether to warn the user.
#[derive(Debug, Clone, Default)]
pub struct MatchOutcome {
    pub gains: Vec<CapitalGain>,
    pub unmatched_quantity: Decimal,
}

/// Stateful lot matcher for consuming purchases across successive sales
#[derive(Debug, Clone, Default)]
pub struct LotMatcher {
    lots: Vec<TaxLot>,
}

impl LotMatcher {
    pub fn new() -> Self {
        Self { lots: Vec::new() }
    }

    pub fn with_lots(lots: Vec<TaxLot>) -> Self {
        Self { lots }
    }

    pub fn add_lot(&mut self, lot: TaxLot) {
        self.lots.push(lot);
    }

    /// Lots not yet fully consumed.
    pub fn open_lots(&self) -> &[TaxLot] {
        &self.lots
    }

    /// Remaining quantity across all open lots of a symbol.
    pub fn remaining_quantity(&self, symbol: &str) -> Decimal {
        self.lots
            .iter()
            .filter(|l| l.symbol == symbol)
            .map(|l| l.quantity)
            .sum()
    }

    /// Match a sale against the open lots of its symbol, consuming them
    /// in the order the method dictates.
    pub fn match_sale(
        &mut self,
        sale: &SaleTransaction,
        method: CostBasisMethod,
        config: &TaxConfig,
    ) -> MatchOutcome {
        if method == CostBasisMethod::Average {
            self.collapse_to_average(&sale.symbol);
        }

        let mut order: Vec<usize> = self
            .lots
            .iter()
            .enumerate()
            .filter(|(_, l)| l.symbol == sale.symbol && l.quantity > Decimal::ZERO)
            .map(|(i, _)| i)
            .collect();

        match method {
            CostBasisMethod::Fifo | CostBasisMethod::Average => {
                order.sort_by_key(|&i| self.lots[i].purchase_date);
            }
            CostBasisMethod::Lifo => {
                order.sort_by_key(|&i| std::cmp::Reverse(self.lots[i].purchase_date));
            }
            CostBasisMethod::Hifo => {
                order.sort_by(|&a, &b| {
                    self.lots[b]
                        .purchase_price
                        .cmp(&self.lots[a].purchase_price)
                });
            }
        }

        let mut outcome = MatchOutcome::default();
        let mut remaining = sale.quantity;

        for index in order {
            if remaining <= Decimal::ZERO {
                break;
            }
            let lot = &mut self.lots[index];

            let consumed = remaining.min(lot.quantity);
            let unit_cost = if lot.quantity.is_zero() {
                Decimal::ZERO
            } else {
                lot.cost_basis / lot.quantity
            };
            let cost_basis = unit_cost * consumed;
            let proceeds = consumed * sale.sale_price;
            let gain = proceeds - cost_basis;

            let holding_period_days = (sale.sale_date - lot.purchase_date).num_days();
            let is_long_term = holding_period_days > LONG_TERM_DAYS;
            let tax_rate = if is_long_term {
                config.long_term_rate
            } else {
                config.short_term_rate
            };
            // Losses never produce a negative tax
            let tax_amount = (gain * tax_rate).max(Decimal::ZERO);

            outcome.gains.push(CapitalGain {
                symbol: sale.symbol.clone(),
                quantity: consumed,
                purchase_date: lot.purchase_date,
                sale_date: sale.sale_date,
                cost_basis,
                proceeds,
                gain,
                holding_period_days,
                is_long_term,
                tax_rate,
                tax_amount,
            });

            lot.quantity -= consumed;
            lot.cost_basis -= cost_basis;
            remaining -= consumed;
        }

        self.lots.retain(|l| l.quantity > Decimal::ZERO);

        if remaining > Decimal::ZERO {
            warn!(
                symbol = %sale.symbol,
                unmatched = %remaining,
                "sale exceeds open lots; reporting shortfall"
            );
            outcome.unmatched_quantity = remaining;
        }

        outcome
    }

    /// Replace a symbol's lots with one synthetic average-cost lot whose
    /// price is the blended cost and whose date is the earliest purchase
    /// (a conservative holding-period approximation).
    fn collapse_to_average(&mut self, symbol: &str) {
        let (total_quantity, total_cost, earliest) = self
            .lots
            .iter()
            .filter(|l| l.symbol == symbol)
            .fold(
                (Decimal::ZERO, Decimal::ZERO, None::<chrono::NaiveDate>),
                |(qty, cost, earliest), lot| {
                    let date = match earliest {
                        Some(d) => Some(d.min(lot.purchase_date)),
                        None => Some(lot.purchase_date),
                    };
                    (qty + lot.quantity, cost + lot.cost_basis, date)
                },
            );

        let Some(purchase_date) = earliest else {
            return;
        };
        if total_quantity <= Decimal::ZERO {
            return;
        }

        self.lots.retain(|l| l.symbol != symbol);
        self.lots.push(TaxLot {
            symbol: symbol.to_string(),
            quantity: total_quantity,
            purchase_date,
            purchase_price: total_cost / total_quantity,
            cost_basis: total_cost,
        });
    }
}

/// Match a single sale against a lot set without keeping matcher state.
pub fn calculate_capital_gains(
    lots: &[TaxLot],
    sale: &SaleTransaction,
    method: CostBasisMethod,
    config: &TaxConfig,
) -> MatchOutcome {
    let mut matcher = LotMatcher::with_lots(lots.to_vec());
    matcher.match_sale(sale, method, config)
}

/// Filter capital gains to one fiscal year by sale date.
pub fn gains_for_fiscal_year(gains: &[CapitalGain], fiscal_year: i32) -> Vec<CapitalGain> {
    gains
        .iter()
        .filter(|g| g.sale_date.year() == fiscal_year)
        .cloned()
        .collect()
}
