//! Flow aggregator - one time-ordered ledger from five evidence sources
//!
//! Manual entries, dividend records, trade fees, share transfers and the
//! reconciler's implied flows each carry a distinct (category, provenance)
//! combination, so the union needs no deduplication. That disjointness is
//! enforced by the provenance-stamped constructors on `CashFlowEvent`; a
//! new source must mint its own combination there rather than reuse one.
//!
//! The aggregator is a pure function of its inputs: the same inputs
//! produce byte-identical output ordering and values on every call.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use tracing::warn;

use crate::model::{
    CashFlowEvent, DividendRecord, FlowCategory, FlowProvenance, PeriodReturn, ShareTransfer,
    TradeRecord, ValuationSnapshot,
};
use crate::reconcile;

/// Read-only source records feeding the combined ledger
///
/// Passed explicitly on every call; the engine holds no session or other
/// ambient state between queries.
#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerInputs<'a> {
    pub manual_flows: &'a [CashFlowEvent],
    pub dividends: &'a [DividendRecord],
    pub trades: &'a [TradeRecord],
    pub transfers: &'a [ShareTransfer],
    pub snapshots: &'a [ValuationSnapshot],
}

/// Merged ledger plus the period returns derived alongside it
#[derive(Debug, Clone, Default)]
pub struct CombinedLedger {
    pub flows: Vec<CashFlowEvent>,
    pub period_returns: Vec<PeriodReturn>,
}

/// Category totals over a set of flows
///
/// Transfers are excluded: a transfer is balance-neutral at the portfolio
/// level and must not show up as income or expense.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NetCashFlows {
    pub deposits: Decimal,
    pub withdrawals: Decimal,
    pub income: Decimal,
    pub expenses: Decimal,
    pub net_flow: Decimal,
}

/// Merge every flow source into one ledger, newest first.
///
/// When `range` is given, flows are kept if `start <= flow_date <= end`
/// and period returns if their `end_date` falls in the same range.
pub fn combined_ledger(
    inputs: &LedgerInputs,
    range: Option<(NaiveDate, NaiveDate)>,
) -> CombinedLedger {
    let mut flows: Vec<CashFlowEvent> = Vec::new();

    for flow in inputs.manual_flows {
        if flow.provenance != FlowProvenance::Manual {
            // Derived provenances are recomputed below; a stored event
            // claiming one is inconsistent source data
            warn!(
                provenance = flow.provenance.as_str(),
                "ignoring stored flow with derived provenance"
            );
            continue;
        }
        flows.push(flow.clone());
    }

    for dividend in inputs.dividends {
        let mut event = CashFlowEvent::dividend(
            &dividend.account_id,
            dividend.pay_date,
            dividend.gross_amount,
        );
        event.description = dividend
            .description
            .clone()
            .or_else(|| Some(format!("{} dividend", dividend.symbol)));
        flows.push(event);
    }

    for trade in inputs.trades {
        let total_fees = trade.total_fees();
        if total_fees.is_zero() {
            continue;
        }
        let mut event = CashFlowEvent::fee(&trade.account_id, trade.trade_date, total_fees);
        event.description = Some(format!("{} trade fees", trade.symbol));
        flows.push(event);
    }

    for transfer in inputs.transfers {
        if let Some(from) = transfer.from_account_id.as_deref() {
            flows.push(CashFlowEvent::transfer_out(from, transfer));
        }
        if let Some(to) = transfer.to_account_id.as_deref() {
            flows.push(CashFlowEvent::transfer_in(to, transfer));
        }
    }

    let derived = reconcile::derive_flows(inputs.snapshots, inputs.transfers);
    flows.extend(derived.implied_flows);

    let mut period_returns = derived.period_returns;
    if let Some((start, end)) = range {
        flows.retain(|f| f.flow_date >= start && f.flow_date <= end);
        period_returns.retain(|p| p.end_date >= start && p.end_date <= end);
    }

    // Stable sort keeps the fixed source order within a date, so output
    // ordering is reproducible call to call
    flows.sort_by(|a, b| b.flow_date.cmp(&a.flow_date));

    CombinedLedger {
        flows,
        period_returns,
    }
}

/// Net the ledger into deposit/withdrawal/income/expense totals.
pub fn net_cash_flows(flows: &[CashFlowEvent]) -> NetCashFlows {
    let mut summary = NetCashFlows::default();

    for flow in flows {
        match flow.category {
            FlowCategory::Deposit => {
                summary.deposits += flow.amount;
                summary.net_flow += flow.amount;
            }
            FlowCategory::Withdrawal => {
                summary.withdrawals += flow.amount;
                summary.net_flow -= flow.amount;
            }
            FlowCategory::Dividend | FlowCategory::Interest => {
                summary.income += flow.amount;
                summary.net_flow += flow.amount;
            }
            FlowCategory::Fee | FlowCategory::Tax => {
                summary.expenses += flow.amount;
                summary.net_flow -= flow.amount;
            }
            FlowCategory::TransferIn | FlowCategory::TransferOut => {}
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TradeSide;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn manual_deposit(account_id: &str, flow_date: NaiveDate, amount: Decimal) -> CashFlowEvent {
        CashFlowEvent {
            id: Some(1),
            account_id: account_id.to_string(),
            flow_date,
            amount,
            category: FlowCategory::Deposit,
            description: Some("payroll".to_string()),
            provenance: FlowProvenance::Manual,
        }
    }

    fn dividend(account_id: &str, pay_date: NaiveDate, gross: Decimal) -> DividendRecord {
        DividendRecord {
            account_id: account_id.to_string(),
            symbol: "VTI".to_string(),
            pay_date,
            gross_amount: gross,
            tax_withheld: Decimal::ZERO,
            qualified: true,
            description: None,
        }
    }

    fn trade_with_fees(account_id: &str, trade_date: NaiveDate, fees: Decimal) -> TradeRecord {
        TradeRecord {
            account_id: account_id.to_string(),
            symbol: "VTI".to_string(),
            side: TradeSide::Buy,
            trade_date,
            quantity: dec!(10),
            price_per_unit: dec!(200),
            commission: fees,
            fees: Decimal::ZERO,
        }
    }

    fn snapshot(
        account_id: &str,
        as_of: NaiveDate,
        market_value: Decimal,
        cost_basis: Decimal,
    ) -> ValuationSnapshot {
        ValuationSnapshot {
            account_id: account_id.to_string(),
            as_of_date: Some(as_of),
            total_market_value: market_value,
            total_cost_basis: cost_basis,
            total_unrealized_gain: market_value - cost_basis,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        }
    }

    fn internal_transfer(from: &str, to: &str, transfer_date: NaiveDate) -> ShareTransfer {
        ShareTransfer {
            from_account_id: Some(from.to_string()),
            to_account_id: Some(to.to_string()),
            symbol: "VTI".to_string(),
            quantity: dec!(5),
            cost_basis: dec!(900),
            market_value: dec!(1000),
            transfer_date,
        }
    }

    #[test]
    fn test_all_five_sources_merge() {
        let manual = vec![manual_deposit("a", date(2024, 1, 5), dec!(1000))];
        let dividends = vec![dividend("a", date(2024, 2, 10), dec!(25))];
        let trades = vec![trade_with_fees("a", date(2024, 2, 15), dec!(5))];
        let transfers = vec![internal_transfer("a", "b", date(2024, 3, 10))];
        let snapshots = vec![
            snapshot("a", date(2024, 1, 31), dec!(1000), dec!(1000)),
            snapshot("a", date(2024, 2, 29), dec!(1500), dec!(1400)),
        ];

        let ledger = combined_ledger(
            &LedgerInputs {
                manual_flows: &manual,
                dividends: &dividends,
                trades: &trades,
                transfers: &transfers,
                snapshots: &snapshots,
            },
            None,
        );

        // manual + dividend + fee + transfer out + transfer in + implied
        assert_eq!(ledger.flows.len(), 6);
        let provenances: Vec<FlowProvenance> =
            ledger.flows.iter().map(|f| f.provenance).collect();
        assert!(provenances.contains(&FlowProvenance::Manual));
        assert!(provenances.contains(&FlowProvenance::Dividend));
        assert!(provenances.contains(&FlowProvenance::TransactionFee));
        assert!(provenances.contains(&FlowProvenance::Transfer));
        assert!(provenances.contains(&FlowProvenance::Implied));
        assert_eq!(ledger.period_returns.len(), 1);
    }

    #[test]
    fn test_output_sorted_newest_first() {
        let manual = vec![
            manual_deposit("a", date(2024, 1, 5), dec!(100)),
            manual_deposit("a", date(2024, 3, 5), dec!(200)),
        ];
        let dividends = vec![dividend("a", date(2024, 2, 10), dec!(25))];

        let ledger = combined_ledger(
            &LedgerInputs {
                manual_flows: &manual,
                dividends: &dividends,
                ..Default::default()
            },
            None,
        );

        let dates: Vec<NaiveDate> = ledger.flows.iter().map(|f| f.flow_date).collect();
        assert_eq!(
            dates,
            vec![date(2024, 3, 5), date(2024, 2, 10), date(2024, 1, 5)]
        );
    }

    #[test]
    fn test_range_filter_is_inclusive() {
        let manual = vec![
            manual_deposit("a", date(2024, 1, 1), dec!(1)),
            manual_deposit("a", date(2024, 1, 31), dec!(2)),
            manual_deposit("a", date(2024, 2, 1), dec!(3)),
        ];

        let ledger = combined_ledger(
            &LedgerInputs {
                manual_flows: &manual,
                ..Default::default()
            },
            Some((date(2024, 1, 1), date(2024, 1, 31))),
        );

        assert_eq!(ledger.flows.len(), 2);
        assert!(ledger.flows.iter().all(|f| f.flow_date <= date(2024, 1, 31)));
    }

    #[test]
    fn test_period_returns_filtered_on_end_date() {
        let snapshots = vec![
            snapshot("a", date(2024, 1, 31), dec!(1000), dec!(1000)),
            snapshot("a", date(2024, 2, 29), dec!(1100), dec!(1000)),
            snapshot("a", date(2024, 3, 31), dec!(1200), dec!(1000)),
        ];

        let ledger = combined_ledger(
            &LedgerInputs {
                snapshots: &snapshots,
                ..Default::default()
            },
            Some((date(2024, 3, 1), date(2024, 3, 31))),
        );

        assert_eq!(ledger.period_returns.len(), 1);
        assert_eq!(ledger.period_returns[0].end_date, date(2024, 3, 31));
    }

    #[test]
    fn test_external_transfer_end_omitted() {
        let transfers = vec![ShareTransfer {
            from_account_id: None,
            to_account_id: Some("a".to_string()),
            symbol: "VTI".to_string(),
            quantity: dec!(5),
            cost_basis: dec!(900),
            market_value: dec!(1000),
            transfer_date: date(2024, 3, 10),
        }];

        let ledger = combined_ledger(
            &LedgerInputs {
                transfers: &transfers,
                ..Default::default()
            },
            None,
        );

        assert_eq!(ledger.flows.len(), 1);
        assert_eq!(ledger.flows[0].category, FlowCategory::TransferIn);
        assert_eq!(ledger.flows[0].amount, dec!(1000));
    }

    #[test]
    fn test_zero_fee_trades_emit_nothing() {
        let trades = vec![trade_with_fees("a", date(2024, 2, 15), Decimal::ZERO)];
        let ledger = combined_ledger(
            &LedgerInputs {
                trades: &trades,
                ..Default::default()
            },
            None,
        );
        assert!(ledger.flows.is_empty());
    }

    #[test]
    fn test_stored_derived_provenance_rejected() {
        let bogus = vec![CashFlowEvent {
            provenance: FlowProvenance::Implied,
            ..manual_deposit("a", date(2024, 1, 5), dec!(1000))
        }];
        let ledger = combined_ledger(
            &LedgerInputs {
                manual_flows: &bogus,
                ..Default::default()
            },
            None,
        );
        assert!(ledger.flows.is_empty());
    }

    #[test]
    fn test_idempotent_output() {
        let manual = vec![
            manual_deposit("a", date(2024, 1, 5), dec!(100)),
            manual_deposit("a", date(2024, 1, 5), dec!(200)),
        ];
        let dividends = vec![dividend("a", date(2024, 1, 5), dec!(25))];
        let transfers = vec![internal_transfer("a", "b", date(2024, 1, 5))];
        let inputs = LedgerInputs {
            manual_flows: &manual,
            dividends: &dividends,
            transfers: &transfers,
            ..Default::default()
        };

        let first = combined_ledger(&inputs, None);
        let second = combined_ledger(&inputs, None);
        assert_eq!(first.flows, second.flows);
        assert_eq!(first.period_returns, second.period_returns);
    }

    #[test]
    fn test_net_cash_flows_excludes_transfers() {
        let transfers = vec![internal_transfer("a", "b", date(2024, 3, 10))];
        let ledger = combined_ledger(
            &LedgerInputs {
                transfers: &transfers,
                ..Default::default()
            },
            None,
        );

        let summary = net_cash_flows(&ledger.flows);
        assert_eq!(summary.deposits, Decimal::ZERO);
        assert_eq!(summary.withdrawals, Decimal::ZERO);
        assert_eq!(summary.income, Decimal::ZERO);
        assert_eq!(summary.expenses, Decimal::ZERO);
        assert_eq!(summary.net_flow, Decimal::ZERO);
    }

    #[test]
    fn test_net_cash_flows_directions() {
        let flows = vec![
            manual_deposit("a", date(2024, 1, 5), dec!(1000)),
            CashFlowEvent {
                category: FlowCategory::Withdrawal,
                amount: dec!(300),
                ..manual_deposit("a", date(2024, 1, 6), dec!(300))
            },
            CashFlowEvent::dividend("a", date(2024, 1, 7), dec!(50)),
            CashFlowEvent::fee("a", date(2024, 1, 8), dec!(10)),
        ];

        let summary = net_cash_flows(&flows);
        assert_eq!(summary.deposits, dec!(1000));
        assert_eq!(summary.withdrawals, dec!(300));
        assert_eq!(summary.income, dec!(50));
        assert_eq!(summary.expenses, dec!(10));
        assert_eq!(summary.net_flow, dec!(740));
    }
}
