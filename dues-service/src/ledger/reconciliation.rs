//! Reconciliation calculator.
//!
//! Pure functions over an assigned due (or a member's dues) and a set of
//! payments. Results depend only on the set of payments, never on the order
//! they were recorded in, and are recomputed from scratch on every call.
//! Decimal arithmetic is exact, so no rounding tolerance is applied.

use crate::models::{AssignedDue, DueStatus, Payment};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

/// Normalise a monetary amount to two decimal places for reporting.
pub fn money(amount: Decimal) -> Decimal {
    let mut amount = amount;
    amount.rescale(2);
    amount
}

/// Sum of payments explicitly linked to `due`. Unlinked payments never count.
pub fn due_paid_amount(due: &AssignedDue, payments: &[Payment]) -> Decimal {
    payments
        .iter()
        .filter(|p| p.assigned_due_id == Some(due.assigned_due_id))
        .map(|p| p.amount)
        .sum()
}

/// Status of `due` given the amount paid against it. A waived due stays
/// waived whatever has been paid.
pub fn derive_status(due: &AssignedDue, paid: Decimal) -> DueStatus {
    if due.is_waived() {
        DueStatus::Waived
    } else if paid >= due.amount {
        DueStatus::Paid
    } else if paid > Decimal::ZERO {
        DueStatus::Partial
    } else {
        DueStatus::Pending
    }
}

pub fn due_status(due: &AssignedDue, payments: &[Payment]) -> DueStatus {
    derive_status(due, due_paid_amount(due, payments))
}

/// Full reconciliation view of one due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DueReconciliation {
    pub assigned_due_id: Uuid,
    pub amount: Decimal,
    pub paid_amount: Decimal,
    pub remaining: Decimal,
    pub status: DueStatus,
}

pub fn reconcile_due(due: &AssignedDue, payments: &[Payment]) -> DueReconciliation {
    let paid = due_paid_amount(due, payments);
    let status = derive_status(due, paid);
    let remaining = if status == DueStatus::Waived {
        Decimal::ZERO
    } else {
        (due.amount - paid).max(Decimal::ZERO)
    };

    DueReconciliation {
        assigned_due_id: due.assigned_due_id,
        amount: money(due.amount),
        paid_amount: money(paid),
        remaining: money(remaining),
        status,
    }
}

/// Amount paid per linked due id.
pub fn paid_by_due(payments: &[Payment]) -> HashMap<Uuid, Decimal> {
    let mut paid: HashMap<Uuid, Decimal> = HashMap::new();
    for payment in payments {
        if let Some(due_id) = payment.assigned_due_id {
            *paid.entry(due_id).or_insert(Decimal::ZERO) += payment.amount;
        }
    }
    paid
}

/// Outstanding balance over `dues`: the amounts of dues still PENDING or
/// PARTIAL minus the payments linked to exactly those dues, clamped at zero.
/// Overpayment is absorbed, never turned into a credit.
///
/// Callers pass dues of a single currency.
pub fn member_outstanding_balance(dues: &[AssignedDue], payments: &[Payment]) -> Decimal {
    let paid = paid_by_due(payments);
    let (assessed, settled) = dues
        .iter()
        .filter_map(|due| {
            let paid = paid.get(&due.assigned_due_id).copied().unwrap_or(Decimal::ZERO);
            derive_status(due, paid).is_open().then_some((due.amount, paid))
        })
        .fold((Decimal::ZERO, Decimal::ZERO), |(a, s), (amount, paid)| {
            (a + amount, s + paid)
        });

    money((assessed - settled).max(Decimal::ZERO))
}

/// Balance figures of a member in one currency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyBalance {
    pub currency: String,
    /// Sum of every non-waived due.
    pub total_assessed: Decimal,
    /// Sum of every payment, linked or not.
    pub total_paid: Decimal,
    pub outstanding_balance: Decimal,
    pub open_dues: usize,
}

/// Per-currency balances of one member, ordered by currency code. Currencies
/// are never mixed in a sum.
pub fn member_balances(dues: &[AssignedDue], payments: &[Payment]) -> Vec<CurrencyBalance> {
    let mut dues_by_currency: BTreeMap<&str, Vec<AssignedDue>> = BTreeMap::new();
    for due in dues {
        dues_by_currency
            .entry(due.currency.as_str())
            .or_default()
            .push(due.clone());
    }

    let mut paid_by_currency: BTreeMap<&str, Decimal> = BTreeMap::new();
    for payment in payments {
        *paid_by_currency
            .entry(payment.currency.as_str())
            .or_insert(Decimal::ZERO) += payment.amount;
        dues_by_currency.entry(payment.currency.as_str()).or_default();
    }

    let paid = paid_by_due(payments);

    dues_by_currency
        .into_iter()
        .map(|(currency, dues)| {
            let total_assessed = dues
                .iter()
                .filter(|d| !d.is_waived())
                .map(|d| d.amount)
                .sum::<Decimal>();
            let open_dues = dues
                .iter()
                .filter(|d| {
                    let p = paid.get(&d.assigned_due_id).copied().unwrap_or(Decimal::ZERO);
                    derive_status(d, p).is_open()
                })
                .count();

            CurrencyBalance {
                currency: currency.to_string(),
                total_assessed: money(total_assessed),
                total_paid: money(paid_by_currency.get(currency).copied().unwrap_or_default()),
                outstanding_balance: member_outstanding_balance(&dues, payments),
                open_dues,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn due(amount: Decimal) -> AssignedDue {
        let member_id = Uuid::new_v4();
        AssignedDue {
            assigned_due_id: Uuid::new_v4(),
            member_id,
            plan_id: Uuid::new_v4(),
            category_id: None,
            assessment_id: None,
            amount,
            currency: "GHS".to_string(),
            period: "2024-Q4".to_string(),
            period_start: NaiveDate::from_ymd_opt(2024, 10, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            due_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            status: DueStatus::Pending.as_str().to_string(),
            reference: format!("SILVER_QUARTERLY-2024-Q4-{}", member_id),
            notes: None,
            waived_reason: None,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn payment(member_id: Uuid, due_id: Option<Uuid>, amount: Decimal) -> Payment {
        Payment {
            payment_id: Uuid::new_v4(),
            member_id,
            plan_id: None,
            assigned_due_id: due_id,
            amount,
            currency: "GHS".to_string(),
            method: "CASH".to_string(),
            paid_at: NaiveDate::from_ymd_opt(2024, 10, 5).unwrap(),
            reference: None,
            description: None,
            recorded_by: None,
            created_utc: Utc::now(),
        }
    }

    #[test]
    fn due_without_payments_is_pending() {
        let d = due(dec!(90.00));
        assert_eq!(due_paid_amount(&d, &[]), Decimal::ZERO);
        assert_eq!(due_status(&d, &[]), DueStatus::Pending);
    }

    #[test]
    fn partial_then_paid() {
        let d = due(dec!(90.00));
        let first = payment(d.member_id, Some(d.assigned_due_id), dec!(45.00));
        let second = payment(d.member_id, Some(d.assigned_due_id), dec!(45.00));

        let after_first = reconcile_due(&d, &[first.clone()]);
        assert_eq!(after_first.status, DueStatus::Partial);
        assert_eq!(after_first.paid_amount, dec!(45.00));
        assert_eq!(after_first.remaining, dec!(45.00));

        let after_second = reconcile_due(&d, &[first, second]);
        assert_eq!(after_second.status, DueStatus::Paid);
        assert_eq!(after_second.paid_amount, dec!(90.00));
        assert_eq!(after_second.remaining.to_string(), "0.00");
    }

    #[test]
    fn payments_linked_elsewhere_are_ignored() {
        let d = due(dec!(50.00));
        let other = payment(d.member_id, Some(Uuid::new_v4()), dec!(50.00));
        let unlinked = payment(d.member_id, None, dec!(50.00));
        assert_eq!(due_status(&d, &[other, unlinked]), DueStatus::Pending);
    }

    #[test]
    fn waived_due_is_not_recomputed() {
        let mut d = due(dec!(50.00));
        d.status = DueStatus::Waived.as_str().to_string();
        let p = payment(d.member_id, Some(d.assigned_due_id), dec!(10.00));

        let rec = reconcile_due(&d, &[p]);
        assert_eq!(rec.status, DueStatus::Waived);
        assert_eq!(rec.remaining, Decimal::ZERO);
        assert_eq!(member_outstanding_balance(&[d], &[]), Decimal::ZERO);
    }

    #[test]
    fn unlinked_payment_does_not_reduce_outstanding() {
        let a = due(dec!(100.00));
        let mut b = due(dec!(200.00));
        b.member_id = a.member_id;
        let donation = payment(a.member_id, None, dec!(500.00));

        let dues = [a, b];
        let payments = [donation];
        assert_eq!(member_outstanding_balance(&dues, &payments), dec!(300.00));

        let balances = member_balances(&dues, &payments);
        assert_eq!(balances.len(), 1);
        assert_eq!(balances[0].total_assessed, dec!(300.00));
        assert_eq!(balances[0].total_paid, dec!(500.00));
        assert_eq!(balances[0].outstanding_balance, dec!(300.00));
        assert_eq!(balances[0].open_dues, 2);
    }

    #[test]
    fn paid_dues_drop_out_of_outstanding() {
        let a = due(dec!(100.00));
        let mut b = due(dec!(60.00));
        b.member_id = a.member_id;
        let payments = [
            payment(a.member_id, Some(a.assigned_due_id), dec!(150.00)),
            payment(a.member_id, Some(b.assigned_due_id), dec!(20.00)),
        ];

        // a is overpaid and PAID; only b's remaining 40 is outstanding.
        assert_eq!(member_outstanding_balance(&[a, b], &payments), dec!(40.00));
    }

    #[test]
    fn balances_never_mix_currencies() {
        let a = due(dec!(100.00));
        let mut b = due(dec!(25.00));
        b.member_id = a.member_id;
        b.currency = "USD".to_string();

        let balances = member_balances(&[a, b], &[]);
        let currencies: Vec<&str> = balances.iter().map(|b| b.currency.as_str()).collect();
        assert_eq!(currencies, vec!["GHS", "USD"]);
        assert_eq!(balances[0].outstanding_balance, dec!(100.00));
        assert_eq!(balances[1].outstanding_balance, dec!(25.00));
    }

    fn amount_strategy() -> impl Strategy<Value = Decimal> {
        (1i64..50_000i64).prop_map(|cents| Decimal::new(cents, 2))
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn status_is_idempotent_and_order_independent(
            due_amount in amount_strategy(),
            amounts in prop::collection::vec(amount_strategy(), 0..8),
            rotation in 0usize..8,
        ) {
            let d = due(due_amount);
            let mut payments: Vec<Payment> = amounts
                .iter()
                .map(|a| payment(d.member_id, Some(d.assigned_due_id), *a))
                .collect();

            let first = reconcile_due(&d, &payments);
            prop_assert_eq!(&first, &reconcile_due(&d, &payments));

            if !payments.is_empty() {
                let len = payments.len();
                payments.rotate_left(rotation % len);
            }
            payments.reverse();
            prop_assert_eq!(&first, &reconcile_due(&d, &payments));

            let total: Decimal = amounts.iter().copied().sum();
            if total >= due_amount {
                prop_assert_eq!(first.status, DueStatus::Paid);
            } else if total > Decimal::ZERO {
                prop_assert_eq!(first.status, DueStatus::Partial);
            } else {
                prop_assert_eq!(first.status, DueStatus::Pending);
            }
        }

        #[test]
        fn outstanding_balance_is_never_negative(
            due_amounts in prop::collection::vec(amount_strategy(), 1..6),
            paid in prop::collection::vec((0usize..6, amount_strategy()), 0..12),
            unlinked in prop::collection::vec(amount_strategy(), 0..3),
        ) {
            let member_id = Uuid::new_v4();
            let dues: Vec<AssignedDue> = due_amounts
                .iter()
                .map(|a| {
                    let mut d = due(*a);
                    d.member_id = member_id;
                    d
                })
                .collect();
            let mut payments: Vec<Payment> = paid
                .iter()
                .map(|(idx, amount)| {
                    let target = &dues[idx % dues.len()];
                    payment(member_id, Some(target.assigned_due_id), *amount)
                })
                .collect();
            payments.extend(unlinked.iter().map(|a| payment(member_id, None, *a)));

            let balance = member_outstanding_balance(&dues, &payments);
            prop_assert!(balance >= Decimal::ZERO);

            let assessed: Decimal = due_amounts.iter().copied().sum();
            prop_assert!(balance <= assessed);

            payments.reverse();
            prop_assert_eq!(balance, member_outstanding_balance(&dues, &payments));
        }
    }
}
