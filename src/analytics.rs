//! Performance analytics - return and risk metrics over in-memory series
//!
//! Every function here is pure and none calls another: each metric can be
//! unit-tested against hand-computed values in isolation, and a bug in one
//! cannot leak into its neighbours.
//!
//! Degenerate inputs (empty or singleton series, zero denominators) yield
//! neutral defaults rather than errors - these metrics feed a dashboard
//! that must render something for a brand-new account. Mismatched series
//! lengths, by contrast, indicate a caller bug and fail loudly.
//!
//! Unit conventions: valuation and flow series carry currency amounts;
//! return series and the risk-free rate are fractional period returns
//! (0.02 = 2%). `calculate_money_weighted_return` and
//! `calculate_time_weighted_return` return percentages.

use chrono::NaiveDate;
use rust_decimal::{Decimal, MathematicalOps};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

const MAX_IRR_ITERATIONS: usize = 100;
const NPV_TOLERANCE: Decimal = dec!(0.0001);
const DAYS_PER_YEAR: Decimal = dec!(365.25);

/// Portfolio value on a date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValuationPoint {
    pub date: NaiveDate,
    pub value: Decimal,
}

/// A dated, signed cash flow: contributions positive, withdrawals negative
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlowPoint {
    pub date: NaiveDate,
    pub amount: Decimal,
}

/// Largest peak-to-trough decline over a valuation series
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MaxDrawdown {
    pub drawdown: Decimal,
    pub trough_date: Option<NaiveDate>,
}

/// Money-weighted return (IRR) in percent.
///
/// Newton-Raphson root of sum(CF_i / (1+r)^t_i) = 0 where t_i is years
/// from the earliest flow and a synthetic outflow of `final_value` is
/// appended at `as_of`. Sensitive to the timing and size of flows, which
/// is exactly what distinguishes it from the time-weighted return.
///
/// Non-convergence is not an error: after 100 iterations the last rate is
/// returned, clamped to [-99%, 1000%]. An empty flow list returns 0.
pub fn calculate_money_weighted_return(
    flows: &[FlowPoint],
    final_value: Decimal,
    as_of: NaiveDate,
) -> Decimal {
    let Some(origin) = flows.iter().map(|f| f.date).min() else {
        return Decimal::ZERO;
    };

    let years_from_origin = |date: NaiveDate| -> Decimal {
        Decimal::from((date - origin).num_days()) / DAYS_PER_YEAR
    };

    let mut dated: Vec<(Decimal, Decimal)> = flows
        .iter()
        .map(|f| (years_from_origin(f.date), f.amount))
        .collect();
    dated.push((years_from_origin(as_of), -final_value));

    let mut rate = dec!(0.1);
    let mut converged = false;

    for _ in 0..MAX_IRR_ITERATIONS {
        let one_plus = Decimal::ONE + rate;
        let mut npv = Decimal::ZERO;
        let mut derivative = Decimal::ZERO;

        for (t, amount) in &dated {
            let Some(discount) = one_plus.checked_powd(*t) else {
                continue;
            };
            if discount.is_zero() {
                continue;
            }
            npv += amount / discount;
            // d/dr of a(1+r)^-t
            derivative += -*t * amount / (discount * one_plus);
        }

        if npv.abs() < NPV_TOLERANCE {
            converged = true;
            break;
        }
        if derivative.is_zero() {
            break;
        }

        rate -= npv / derivative;
        rate = rate.clamp(dec!(-0.99), dec!(10));
    }

    if !converged {
        debug!(rate = %rate, "IRR did not fully converge; returning last iterate");
    }

    (rate * dec!(100)).clamp(dec!(-99), dec!(1000))
}

/// Time-weighted return in percent: chain-linked sub-period returns.
///
/// Deliberately insensitive to contribution timing and size - it isolates
/// investment skill from cash-flow behaviour, so it is computed on the
/// valuation series alone rather than derived from the IRR. Fewer than two
/// points returns 0; a zero-valued base point contributes a flat
/// sub-period.
pub fn calculate_time_weighted_return(points: &[ValuationPoint]) -> Decimal {
    if points.len() < 2 {
        return Decimal::ZERO;
    }

    let mut sorted: Vec<&ValuationPoint> = points.iter().collect();
    sorted.sort_by_key(|p| p.date);

    let mut cumulative = Decimal::ONE;
    for pair in sorted.windows(2) {
        let (prev, curr) = (pair[0], pair[1]);
        if prev.value.is_zero() {
            continue;
        }
        cumulative *= curr.value / prev.value;
    }

    (cumulative - Decimal::ONE) * dec!(100)
}

/// Compound annual growth rate as a fractional rate.
///
/// (end/start)^(1/years) - 1; any non-positive input returns 0.
pub fn calculate_cagr(start_value: Decimal, end_value: Decimal, years: Decimal) -> Decimal {
    if start_value <= Decimal::ZERO || end_value <= Decimal::ZERO || years <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    match (end_value / start_value).checked_powd(Decimal::ONE / years) {
        Some(grown) => grown - Decimal::ONE,
        None => Decimal::ZERO,
    }
}

/// Sample standard deviation (n-1 denominator) of a return series.
pub fn calculate_std_dev(returns: &[Decimal]) -> Decimal {
    if returns.len() < 2 {
        return Decimal::ZERO;
    }

    let count = Decimal::from(returns.len());
    let mean = returns.iter().sum::<Decimal>() / count;
    let sum_squared_diff: Decimal = returns
        .iter()
        .map(|r| {
            let diff = *r - mean;
            diff * diff
        })
        .sum();

    let variance = sum_squared_diff / (count - Decimal::ONE);
    variance.sqrt().unwrap_or(Decimal::ZERO)
}

/// Downside deviation: population deviation of returns below `target`.
///
/// Only below-target returns enter the sum and the denominator is their
/// count (Sortino convention). No below-target returns means 0.
pub fn calculate_downside_deviation(returns: &[Decimal], target: Decimal) -> Decimal {
    let downside: Vec<Decimal> = returns.iter().filter(|r| **r < target).copied().collect();
    if downside.is_empty() {
        return Decimal::ZERO;
    }

    let count = Decimal::from(downside.len());
    let sum_squared: Decimal = downside
        .iter()
        .map(|r| {
            let diff = *r - target;
            diff * diff
        })
        .sum();

    (sum_squared / count).sqrt().unwrap_or(Decimal::ZERO)
}

/// Sharpe ratio: excess return per unit of total volatility.
pub fn calculate_sharpe_ratio(
    period_return: Decimal,
    risk_free_rate: Decimal,
    std_dev: Decimal,
) -> Decimal {
    if std_dev.is_zero() {
        return Decimal::ZERO;
    }
    (period_return - risk_free_rate) / std_dev
}

/// Sortino ratio: excess return per unit of downside deviation.
pub fn calculate_sortino_ratio(
    period_return: Decimal,
    risk_free_rate: Decimal,
    downside_deviation: Decimal,
) -> Decimal {
    if downside_deviation.is_zero() {
        return Decimal::ZERO;
    }
    (period_return - risk_free_rate) / downside_deviation
}

/// Treynor ratio: excess return per unit of systematic risk.
pub fn calculate_treynor_ratio(
    period_return: Decimal,
    risk_free_rate: Decimal,
    beta: Decimal,
) -> Decimal {
    if beta.is_zero() {
        return Decimal::ZERO;
    }
    (period_return - risk_free_rate) / beta
}

/// Maximum drawdown over a valuation series, with the trough date.
///
/// Scans in date order tracking the running peak; fewer than two points
/// yields the zero result.
pub fn calculate_max_drawdown(points: &[ValuationPoint]) -> MaxDrawdown {
    if points.len() < 2 {
        return MaxDrawdown::default();
    }

    let mut sorted: Vec<&ValuationPoint> = points.iter().collect();
    sorted.sort_by_key(|p| p.date);

    let mut peak = sorted[0].value;
    let mut worst = MaxDrawdown::default();

    for point in sorted {
        if point.value > peak {
            peak = point.value;
        }
        if peak.is_zero() {
            continue;
        }
        let drawdown = (peak - point.value) / peak;
        if drawdown > worst.drawdown {
            worst.drawdown = drawdown;
            worst.trough_date = Some(point.date);
        }
    }

    worst
}

/// Beta: covariance of portfolio and benchmark returns over benchmark
/// variance.
///
/// A zero-variance benchmark yields 1 (market-neutral rather than
/// undefined), as does a series too short to measure. Mismatched lengths
/// are a caller bug and fail.
pub fn calculate_beta(portfolio: &[Decimal], benchmark: &[Decimal]) -> Result<Decimal> {
    if portfolio.len() != benchmark.len() {
        return Err(EngineError::MismatchedSeries {
            left: portfolio.len(),
            right: benchmark.len(),
        }
        .into());
    }
    if portfolio.len() < 2 {
        return Ok(Decimal::ONE);
    }

    let count = Decimal::from(portfolio.len());
    let mean_portfolio = portfolio.iter().sum::<Decimal>() / count;
    let mean_benchmark = benchmark.iter().sum::<Decimal>() / count;

    let covariance: Decimal = portfolio
        .iter()
        .zip(benchmark.iter())
        .map(|(p, b)| (*p - mean_portfolio) * (*b - mean_benchmark))
        .sum::<Decimal>()
        / (count - Decimal::ONE);

    let variance: Decimal = benchmark
        .iter()
        .map(|b| {
            let diff = *b - mean_benchmark;
            diff * diff
        })
        .sum::<Decimal>()
        / (count - Decimal::ONE);

    if variance.is_zero() {
        return Ok(Decimal::ONE);
    }
    Ok(covariance / variance)
}

/// Jensen's alpha: return beyond what beta-scaled benchmark exposure
/// predicts.
pub fn calculate_alpha(
    portfolio_return: Decimal,
    benchmark_return: Decimal,
    risk_free_rate: Decimal,
    beta: Decimal,
) -> Decimal {
    portfolio_return - (risk_free_rate + beta * (benchmark_return - risk_free_rate))
}

/// Tracking error: sample deviation of per-period active returns.
pub fn calculate_tracking_error(portfolio: &[Decimal], benchmark: &[Decimal]) -> Result<Decimal> {
    if portfolio.len() != benchmark.len() {
        return Err(EngineError::MismatchedSeries {
            left: portfolio.len(),
            right: benchmark.len(),
        }
        .into());
    }
    if portfolio.len() < 2 {
        return Ok(Decimal::ZERO);
    }

    let diffs: Vec<Decimal> = portfolio
        .iter()
        .zip(benchmark.iter())
        .map(|(p, b)| *p - *b)
        .collect();

    let count = Decimal::from(diffs.len());
    let mean = diffs.iter().sum::<Decimal>() / count;
    let sum_squared_diff: Decimal = diffs
        .iter()
        .map(|d| {
            let diff = *d - mean;
            diff * diff
        })
        .sum();

    let variance = sum_squared_diff / (count - Decimal::ONE);
    Ok(variance.sqrt().unwrap_or(Decimal::ZERO))
}

/// Information ratio: active return over tracking error.
pub fn calculate_information_ratio(
    portfolio_return: Decimal,
    benchmark_return: Decimal,
    tracking_error: Decimal,
) -> Decimal {
    if tracking_error.is_zero() {
        return Decimal::ZERO;
    }
    (portfolio_return - benchmark_return) / tracking_error
}

/// Pearson correlation of paired return series.
///
/// Needs at least two equal-length pairs; shorter series yield 0 and
/// mismatched lengths fail.
pub fn calculate_correlation(portfolio: &[Decimal], benchmark: &[Decimal]) -> Result<Decimal> {
    if portfolio.len() != benchmark.len() {
        return Err(EngineError::MismatchedSeries {
            left: portfolio.len(),
            right: benchmark.len(),
        }
        .into());
    }
    if portfolio.len() < 2 {
        return Ok(Decimal::ZERO);
    }

    let count = Decimal::from(portfolio.len());
    let mean_portfolio = portfolio.iter().sum::<Decimal>() / count;
    let mean_benchmark = benchmark.iter().sum::<Decimal>() / count;

    let covariance: Decimal = portfolio
        .iter()
        .zip(benchmark.iter())
        .map(|(p, b)| (*p - mean_portfolio) * (*b - mean_benchmark))
        .sum();

    let portfolio_spread: Decimal = portfolio
        .iter()
        .map(|p| {
            let diff = *p - mean_portfolio;
            diff * diff
        })
        .sum();
    let benchmark_spread: Decimal = benchmark
        .iter()
        .map(|b| {
            let diff = *b - mean_benchmark;
            diff * diff
        })
        .sum();

    let denominator = (portfolio_spread * benchmark_spread)
        .sqrt()
        .unwrap_or(Decimal::ZERO);
    if denominator.is_zero() {
        return Ok(Decimal::ZERO);
    }
    Ok(covariance / denominator)
}

/// Coefficient of determination: squared Pearson correlation.
pub fn calculate_r_squared(portfolio: &[Decimal], benchmark: &[Decimal]) -> Result<Decimal> {
    if portfolio.len() != benchmark.len() {
        return Err(EngineError::MismatchedSeries {
            left: portfolio.len(),
            right: benchmark.len(),
        }
        .into());
    }
    if portfolio.len() < 2 {
        return Ok(Decimal::ZERO);
    }

    let count = Decimal::from(portfolio.len());
    let mean_portfolio = portfolio.iter().sum::<Decimal>() / count;
    let mean_benchmark = benchmark.iter().sum::<Decimal>() / count;

    let covariance: Decimal = portfolio
        .iter()
        .zip(benchmark.iter())
        .map(|(p, b)| (*p - mean_portfolio) * (*b - mean_benchmark))
        .sum();
    let portfolio_spread: Decimal = portfolio
        .iter()
        .map(|p| {
            let diff = *p - mean_portfolio;
            diff * diff
        })
        .sum();
    let benchmark_spread: Decimal = benchmark
        .iter()
        .map(|b| {
            let diff = *b - mean_benchmark;
            diff * diff
        })
        .sum();

    let spread_product = portfolio_spread * benchmark_spread;
    if spread_product.is_zero() {
        return Ok(Decimal::ZERO);
    }
    // correlation^2 == covariance^2 / (spread_p * spread_b), no sqrt needed
    Ok(covariance * covariance / spread_product)
}

/// Inputs for the full metrics bundle
#[derive(Debug, Clone, Copy)]
pub struct MetricsInput<'a> {
    pub valuations: &'a [ValuationPoint],
    /// Signed external flows (contributions positive) for the IRR
    pub flows: &'a [FlowPoint],
    /// Fractional per-period returns of the portfolio
    pub portfolio_returns: &'a [Decimal],
    /// Fractional per-period returns of the benchmark, same periods
    pub benchmark_returns: &'a [Decimal],
    /// Fractional risk-free rate over the measured period
    pub risk_free_rate: Decimal,
    pub as_of: NaiveDate,
}

/// The metrics bundle handed to the reporting layer
///
/// `irr`, `twr` and `total_return` are percentages; the remaining rates
/// and ratios are fractional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub irr: Decimal,
    pub twr: Decimal,
    pub cagr: Decimal,
    pub total_return: Decimal,
    pub std_dev: Decimal,
    pub downside_dev: Decimal,
    pub sharpe: Decimal,
    pub sortino: Decimal,
    pub max_drawdown: MaxDrawdown,
    pub beta: Decimal,
    pub alpha: Decimal,
    pub treynor: Decimal,
    pub tracking_error: Decimal,
    pub info_ratio: Decimal,
    pub correlation: Decimal,
    pub r_squared: Decimal,
}

/// Assemble the full bundle by independent metric calls.
pub fn calculate_performance_summary(input: &MetricsInput) -> Result<PerformanceSummary> {
    let mut sorted: Vec<&ValuationPoint> = input.valuations.iter().collect();
    sorted.sort_by_key(|p| p.date);

    let final_value = sorted.last().map(|p| p.value).unwrap_or(Decimal::ZERO);
    let (total_return, years) = match (sorted.first(), sorted.last()) {
        (Some(first), Some(last)) if !first.value.is_zero() => (
            (last.value / first.value - Decimal::ONE) * dec!(100),
            Decimal::from((last.date - first.date).num_days()) / DAYS_PER_YEAR,
        ),
        _ => (Decimal::ZERO, Decimal::ZERO),
    };

    let irr = calculate_money_weighted_return(input.flows, final_value, input.as_of);
    let twr = calculate_time_weighted_return(input.valuations);
    let cagr = calculate_cagr(
        sorted.first().map(|p| p.value).unwrap_or(Decimal::ZERO),
        final_value,
        years,
    );
    let std_dev = calculate_std_dev(input.portfolio_returns);
    let downside_dev = calculate_downside_deviation(input.portfolio_returns, Decimal::ZERO);
    let max_drawdown = calculate_max_drawdown(input.valuations);
    let beta = calculate_beta(input.portfolio_returns, input.benchmark_returns)?;
    let tracking_error =
        calculate_tracking_error(input.portfolio_returns, input.benchmark_returns)?;
    let correlation = calculate_correlation(input.portfolio_returns, input.benchmark_returns)?;
    let r_squared = calculate_r_squared(input.portfolio_returns, input.benchmark_returns)?;

    // Ratios compare fractional returns, so feed them the fractional TWR
    let period_return = twr / dec!(100);
    let benchmark_return = input
        .benchmark_returns
        .iter()
        .fold(Decimal::ONE, |acc, r| acc * (Decimal::ONE + *r))
        - Decimal::ONE;

    let sharpe = calculate_sharpe_ratio(period_return, input.risk_free_rate, std_dev);
    let sortino = calculate_sortino_ratio(period_return, input.risk_free_rate, downside_dev);
    let treynor = calculate_treynor_ratio(period_return, input.risk_free_rate, beta);
    let alpha = calculate_alpha(period_return, benchmark_return, input.risk_free_rate, beta);
    let info_ratio = calculate_information_ratio(period_return, benchmark_return, tracking_error);

    Ok(PerformanceSummary {
        irr,
        twr,
        cagr,
        total_return,
        std_dev,
        downside_dev,
        sharpe,
        sortino,
        max_drawdown,
        beta,
        alpha,
        treynor,
        tracking_error,
        info_ratio,
        correlation,
        r_squared,
    })
}
