//! Snapshot reconciler - implied cash flows from valuation deltas
//!
//! Between two consecutive valuation snapshots of an account, the change
//! in total cost basis is evidence of owner deposits or withdrawals -
//! except where securities moved in or out through a share transfer, which
//! shifts cost basis without any cash changing hands. Backing transfers
//! out of the cost-basis delta isolates the implied deposit; backing both
//! deposits and transfers out of the market-value delta isolates the
//! investment return of the period.
//!
//! Nothing computed here is persisted; callers re-derive from the current
//! snapshot and transfer set on every query.

use itertools::Itertools;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::model::{CashFlowEvent, PeriodReturn, ShareTransfer, ValuationSnapshot};

/// Net deposits smaller than this are treated as snapshot rounding noise
/// and produce no implied flow. A PeriodReturn is still emitted.
const FLOW_TOLERANCE: Decimal = dec!(0.01);

/// Implied flows and per-period returns derived from snapshot history
#[derive(Debug, Clone, Default)]
pub struct DerivedFlows {
    pub implied_flows: Vec<CashFlowEvent>,
    pub period_returns: Vec<PeriodReturn>,
}

/// Derive implied deposit/withdrawal events and period returns from
/// ordered snapshots and the explicit share transfers between accounts.
///
/// Works per account over snapshots sorted by (as_of_date, created_at)
/// with null dates last. A pair is only reconciled when its closing
/// snapshot carries an as-of date; the entire net effect of a period is
/// attributed to that date. Accounts with fewer than two snapshots emit
/// nothing.
pub fn derive_flows(
    snapshots: &[ValuationSnapshot],
    transfers: &[ShareTransfer],
) -> DerivedFlows {
    let mut derived = DerivedFlows::default();

    let by_account = snapshots
        .iter()
        .sorted_by(|a, b| {
            a.account_id
                .cmp(&b.account_id)
                .then_with(|| a.chronological_cmp(b))
        })
        .chunk_by(|s| s.account_id.clone());

    for (account_id, group) in &by_account {
        let ordered: Vec<&ValuationSnapshot> = group.collect();
        if ordered.len() < 2 {
            debug!(
                account_id = %account_id,
                snapshots = ordered.len(),
                "not enough snapshots to reconcile"
            );
            continue;
        }

        for pair in ordered.windows(2) {
            let (prev, curr) = (pair[0], pair[1]);
            let Some(end_date) = curr.as_of_date else {
                // An undated snapshot cannot anchor a period
                debug!(account_id = %account_id, "skipping undated closing snapshot");
                continue;
            };

            let window_start = prev.anchor_date();
            let (transfer_in, transfer_out) =
                transfer_totals(transfers, &account_id, window_start, end_date);

            let cost_basis_change = curr.total_cost_basis - prev.total_cost_basis;
            let net_deposit = cost_basis_change - transfer_in + transfer_out;
            let net_transfer = transfer_in - transfer_out;
            let market_value_change = curr.total_market_value - prev.total_market_value;
            let period_return = market_value_change - net_deposit - net_transfer;

            let denominator = prev.total_market_value + net_deposit / dec!(2);
            let return_percent = if denominator.is_zero() {
                Decimal::ZERO
            } else {
                period_return / denominator * dec!(100)
            };

            if net_deposit.abs() > FLOW_TOLERANCE {
                derived
                    .implied_flows
                    .push(CashFlowEvent::implied(&account_id, end_date, net_deposit));
            }

            derived.period_returns.push(PeriodReturn {
                account_id: account_id.clone(),
                start_date: window_start,
                end_date,
                start_value: prev.total_market_value,
                end_value: curr.total_market_value,
                net_deposits: net_deposit,
                net_transfers: net_transfer,
                period_return,
                return_percent,
            });
        }
    }

    derived
}

/// Sum of transfer cost basis into and out of an account within
/// (window_start, end_date]. Cost basis, not market value: the implied
/// deposit is reconstructed from the cost-basis delta, which transfers
/// move at cost.
fn transfer_totals(
    transfers: &[ShareTransfer],
    account_id: &str,
    window_start: chrono::NaiveDate,
    end_date: chrono::NaiveDate,
) -> (Decimal, Decimal) {
    let mut transfer_in = Decimal::ZERO;
    let mut transfer_out = Decimal::ZERO;

    for transfer in transfers {
        if transfer.transfer_date <= window_start || transfer.transfer_date > end_date {
            continue;
        }
        if transfer.from_account_id.as_deref() == Some(account_id) {
            transfer_out += transfer.cost_basis;
        }
        if transfer.to_account_id.as_deref() == Some(account_id) {
            transfer_in += transfer.cost_basis;
        }
    }

    (transfer_in, transfer_out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FlowCategory, FlowProvenance};
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn snapshot(
        account_id: &str,
        as_of: Option<(i32, u32, u32)>,
        market_value: Decimal,
        cost_basis: Decimal,
    ) -> ValuationSnapshot {
        ValuationSnapshot {
            account_id: account_id.to_string(),
            as_of_date: as_of.map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap()),
            total_market_value: market_value,
            total_cost_basis: cost_basis,
            total_unrealized_gain: market_value - cost_basis,
            created_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_single_snapshot_emits_nothing() {
        let snapshots = vec![snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(900))];
        let derived = derive_flows(&snapshots, &[]);
        assert!(derived.implied_flows.is_empty());
        assert!(derived.period_returns.is_empty());
    }

    #[test]
    fn test_pure_deposit_is_implied() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("a", Some((2024, 2, 29)), dec!(1600), dec!(1500)),
        ];
        let derived = derive_flows(&snapshots, &[]);

        assert_eq!(derived.implied_flows.len(), 1);
        let flow = &derived.implied_flows[0];
        assert_eq!(flow.category, FlowCategory::Deposit);
        assert_eq!(flow.provenance, FlowProvenance::Implied);
        assert_eq!(flow.amount, dec!(500));
        assert_eq!(flow.flow_date, NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        // Market moved 600, deposits explain 500, the rest is return
        let period = &derived.period_returns[0];
        assert_eq!(period.period_return, dec!(100));
        assert_eq!(period.net_transfers, Decimal::ZERO);
    }

    #[test]
    fn test_withdrawal_direction() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(2000), dec!(2000)),
            snapshot("a", Some((2024, 2, 29)), dec!(1200), dec!(1300)),
        ];
        let derived = derive_flows(&snapshots, &[]);
        assert_eq!(derived.implied_flows.len(), 1);
        assert_eq!(derived.implied_flows[0].category, FlowCategory::Withdrawal);
        assert_eq!(derived.implied_flows[0].amount, dec!(700));
    }

    #[test]
    fn test_incoming_transfer_is_not_a_deposit() {
        // Cost basis rises by exactly the transferred basis: no cash moved
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("a", Some((2024, 2, 29)), dec!(1550), dec!(1500)),
        ];
        let transfers = vec![ShareTransfer {
            from_account_id: Some("b".to_string()),
            to_account_id: Some("a".to_string()),
            symbol: "VTI".to_string(),
            quantity: dec!(5),
            cost_basis: dec!(500),
            market_value: dec!(520),
            transfer_date: NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
        }];

        let derived = derive_flows(&snapshots, &transfers);
        assert!(derived.implied_flows.is_empty());

        let period = &derived.period_returns[0];
        assert_eq!(period.net_deposits, Decimal::ZERO);
        assert_eq!(period.net_transfers, dec!(500));
        // 1550 - 1000 - 0 - 500
        assert_eq!(period.period_return, dec!(50));
    }

    #[test]
    fn test_outgoing_transfer_is_not_a_withdrawal() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("a", Some((2024, 2, 29)), dec!(530), dec!(500)),
        ];
        let transfers = vec![ShareTransfer {
            from_account_id: Some("a".to_string()),
            to_account_id: None,
            symbol: "VTI".to_string(),
            quantity: dec!(5),
            cost_basis: dec!(500),
            market_value: dec!(520),
            transfer_date: NaiveDate::from_ymd_opt(2024, 2, 10).unwrap(),
        }];

        let derived = derive_flows(&snapshots, &transfers);
        assert!(derived.implied_flows.is_empty());
        assert_eq!(derived.period_returns[0].net_transfers, dec!(-500));
    }

    #[test]
    fn test_transfer_outside_window_ignored() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("a", Some((2024, 2, 29)), dec!(1500), dec!(1500)),
        ];
        // Dated exactly on the opening snapshot: window is exclusive there
        let transfers = vec![ShareTransfer {
            from_account_id: Some("b".to_string()),
            to_account_id: Some("a".to_string()),
            symbol: "VTI".to_string(),
            quantity: dec!(5),
            cost_basis: dec!(500),
            market_value: dec!(500),
            transfer_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }];

        let derived = derive_flows(&snapshots, &transfers);
        assert_eq!(derived.implied_flows.len(), 1);
        assert_eq!(derived.implied_flows[0].amount, dec!(500));
        assert_eq!(derived.implied_flows[0].category, FlowCategory::Deposit);
    }

    #[test]
    fn test_undated_closing_snapshot_skipped() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("a", None, dec!(1500), dec!(1500)),
        ];
        let derived = derive_flows(&snapshots, &[]);
        assert!(derived.implied_flows.is_empty());
        assert!(derived.period_returns.is_empty());
    }

    #[test]
    fn test_rounding_noise_below_tolerance() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000.00)),
            snapshot("a", Some((2024, 2, 29)), dec!(1010), dec!(1000.01)),
        ];
        let derived = derive_flows(&snapshots, &[]);
        // 0.01 is within tolerance: no implied flow, but the period exists
        assert!(derived.implied_flows.is_empty());
        assert_eq!(derived.period_returns.len(), 1);
        assert_eq!(derived.period_returns[0].net_deposits, dec!(0.01));
    }

    #[test]
    fn test_return_percent_uses_half_deposit_denominator() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("a", Some((2024, 2, 29)), dec!(2200), dec!(2000)),
        ];
        let derived = derive_flows(&snapshots, &[]);
        let period = &derived.period_returns[0];
        // return 200 over (1000 + 1000/2)
        assert_eq!(period.period_return, dec!(200));
        let expected = dec!(200) / dec!(1500) * dec!(100);
        assert_eq!(period.return_percent, expected);
    }

    #[test]
    fn test_zero_denominator_yields_zero_percent() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(0), dec!(0)),
            snapshot("a", Some((2024, 2, 29)), dec!(0), dec!(0)),
        ];
        let derived = derive_flows(&snapshots, &[]);
        assert_eq!(derived.period_returns[0].return_percent, Decimal::ZERO);
    }

    #[test]
    fn test_netting_invariant_holds() {
        let snapshots = vec![
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(900)),
            snapshot("a", Some((2024, 2, 29)), dec!(1777.35), dec!(1450.10)),
            snapshot("a", Some((2024, 3, 31)), dec!(1621.04), dec!(1300)),
        ];
        let transfers = vec![ShareTransfer {
            from_account_id: Some("a".to_string()),
            to_account_id: Some("b".to_string()),
            symbol: "VTI".to_string(),
            quantity: dec!(2),
            cost_basis: dec!(120.55),
            market_value: dec!(140),
            transfer_date: NaiveDate::from_ymd_opt(2024, 3, 15).unwrap(),
        }];

        let derived = derive_flows(&snapshots, &transfers);
        assert_eq!(derived.period_returns.len(), 2);
        for period in &derived.period_returns {
            let market_value_change = period.end_value - period.start_value;
            assert_eq!(
                period.period_return + period.net_deposits + period.net_transfers,
                market_value_change
            );
        }
    }

    #[test]
    fn test_accounts_reconciled_independently() {
        let snapshots = vec![
            snapshot("b", Some((2024, 1, 31)), dec!(500), dec!(500)),
            snapshot("a", Some((2024, 1, 31)), dec!(1000), dec!(1000)),
            snapshot("b", Some((2024, 2, 29)), dec!(700), dec!(700)),
            snapshot("a", Some((2024, 2, 29)), dec!(1100), dec!(1000)),
        ];
        let derived = derive_flows(&snapshots, &[]);

        // Only account b deposited; account a's change is pure return
        assert_eq!(derived.implied_flows.len(), 1);
        assert_eq!(derived.implied_flows[0].account_id, "b");
        assert_eq!(derived.implied_flows[0].amount, dec!(200));
        assert_eq!(derived.period_returns.len(), 2);
    }
}
