//! Ledger core: pure assessment planning, period derivation and
//! reconciliation arithmetic. Nothing in here touches storage.

pub mod assessment;
pub mod error;
pub mod period;
pub mod reconciliation;

pub use assessment::{
    due_reference, plan_assessment, AssessmentPlan, AssessmentRequest, AssessmentTarget,
    EligibilityPolicy, SkipReason, SkippedMember,
};
pub use error::{normalize_currency, validate_amount, validate_plan_amount, LedgerError};
pub use period::{parse_period, PeriodWindow};
pub use reconciliation::{
    derive_status, due_paid_amount, due_status, member_balances, member_outstanding_balance,
    money, paid_by_due, reconcile_due, CurrencyBalance, DueReconciliation,
};
