//! Fiscal-year tax summary and its plain-text report
//!
//! Aggregates realized capital gains into short/long-term buckets, nets
//! them against losses, and layers in dividend withholding. Figures are
//! estimates for planning, not filings.

use chrono::Datelike;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::lots::TaxConfig;
use crate::model::{CapitalGain, DividendRecord};

/// One fiscal year's estimated tax picture
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaxSummary {
    pub fiscal_year: i32,
    pub short_term_gains: Decimal,
    pub long_term_gains: Decimal,
    pub total_gains: Decimal,
    pub short_term_losses: Decimal,
    pub long_term_losses: Decimal,
    pub total_losses: Decimal,
    pub net_gain: Decimal,
    pub qualified_dividends: Decimal,
    pub ordinary_dividends: Decimal,
    pub total_dividends: Decimal,
    pub dividend_tax_withheld: Decimal,
    pub estimated_tax_liability: Decimal,
}

/// Summarize one fiscal year from realized gains and dividend records.
///
/// Gains are bucketed by sale date, dividends by pay date. Dividend tax
/// is owed on the portion above the tax-free threshold at the standard
/// withholding rate; only the part not already withheld adds to the
/// estimated liability.
pub fn fiscal_year_summary(
    gains: &[CapitalGain],
    dividends: &[DividendRecord],
    fiscal_year: i32,
    config: &TaxConfig,
) -> TaxSummary {
    let mut summary = TaxSummary {
        fiscal_year,
        ..TaxSummary::default()
    };

    for gain in gains.iter().filter(|g| g.sale_date.year() == fiscal_year) {
        match (gain.gain >= Decimal::ZERO, gain.is_long_term) {
            (true, true) => summary.long_term_gains += gain.gain,
            (true, false) => summary.short_term_gains += gain.gain,
            (false, true) => summary.long_term_losses += gain.gain.abs(),
            (false, false) => summary.short_term_losses += gain.gain.abs(),
        }
    }
    summary.total_gains = summary.short_term_gains + summary.long_term_gains;
    summary.total_losses = summary.short_term_losses + summary.long_term_losses;
    summary.net_gain = summary.total_gains - summary.total_losses;

    for dividend in dividends
        .iter()
        .filter(|d| d.pay_date.year() == fiscal_year)
    {
        if dividend.qualified {
            summary.qualified_dividends += dividend.gross_amount;
        } else {
            summary.ordinary_dividends += dividend.gross_amount;
        }
        summary.dividend_tax_withheld += dividend.tax_withheld;
    }
    summary.total_dividends = summary.qualified_dividends + summary.ordinary_dividends;

    let taxable_dividends =
        (summary.total_dividends - config.dividend_tax_free_threshold).max(Decimal::ZERO);
    let dividend_tax_due = taxable_dividends * config.dividend_withholding_rate;
    let additional_dividend_tax =
        (dividend_tax_due - summary.dividend_tax_withheld).max(Decimal::ZERO);

    let net_short = summary.short_term_gains - summary.short_term_losses;
    let net_long = summary.long_term_gains - summary.long_term_losses;
    summary.estimated_tax_liability = net_short.max(Decimal::ZERO) * config.short_term_rate
        + net_long.max(Decimal::ZERO) * config.long_term_rate
        + additional_dividend_tax;

    summary
}

/// Render the summary as a plain-text report.
pub fn format_tax_report(summary: &TaxSummary) -> String {
    let mut output = format!("Tax summary for fiscal year {}\n\n", summary.fiscal_year);

    output.push_str("Capital gains\n");
    output.push_str(&format!(
        "  Short-term gains:  {:.2}\n",
        summary.short_term_gains
    ));
    output.push_str(&format!(
        "  Long-term gains:   {:.2}\n",
        summary.long_term_gains
    ));
    output.push_str(&format!(
        "  Short-term losses: {:.2}\n",
        summary.short_term_losses
    ));
    output.push_str(&format!(
        "  Long-term losses:  {:.2}\n",
        summary.long_term_losses
    ));
    output.push_str(&format!("  Net gain:          {:.2}\n\n", summary.net_gain));

    output.push_str("Dividends\n");
    output.push_str(&format!(
        "  Qualified:         {:.2}\n",
        summary.qualified_dividends
    ));
    output.push_str(&format!(
        "  Ordinary:          {:.2}\n",
        summary.ordinary_dividends
    ));
    output.push_str(&format!(
        "  Tax withheld:      {:.2}\n\n",
        summary.dividend_tax_withheld
    ));

    output.push_str(&format!(
        "Estimated tax liability: {:.2}\n",
        summary.estimated_tax_liability
    ));

    output
}
