//! Ledger service: orchestrates the pure engine and calculator over a store.

use crate::ledger::{
    member_balances, money, normalize_currency, plan_assessment, reconcile_due,
    validate_amount, validate_plan_amount, AssessmentRequest, AssessmentTarget,
    CurrencyBalance, DueReconciliation, EligibilityPolicy, LedgerError, SkipReason,
    SkippedMember,
};
use crate::models::{
    AssignedDue, CreatePlan, DueStatus, DuesPlan, ListDuesFilter, ListPaymentsFilter,
    NewAssessment, NewPayment, Payment, PaymentMethod, TargetType, UpdatePlan,
};
use crate::services::metrics::{
    record_assigned_due, record_error, record_ledger_operation, record_payment,
    record_status_sync, SWEEP_DURATION,
};
use crate::services::store::{DueInsert, DueSync, LedgerStore, RecordedPayment, SyncOutcome};
use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Dues synced concurrently by a sweep.
const SWEEP_CONCURRENCY: usize = 8;

/// Target selector as received from callers, before category names are resolved.
#[derive(Debug, Clone)]
pub enum TargetSelector {
    Category(String),
    Individual(Vec<Uuid>),
}

#[derive(Debug, Clone)]
pub struct AssessCommand {
    pub plan_id: Uuid,
    pub period: String,
    pub target: TargetSelector,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AssessmentReport {
    pub assessment_id: Uuid,
    pub plan_id: Uuid,
    pub period: String,
    pub assigned_dues_count: usize,
    pub skipped: Vec<SkippedMember>,
    pub interrupted: bool,
}

#[derive(Debug, Clone)]
pub struct RecordPaymentCommand {
    pub member_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub assigned_due_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: Option<String>,
    pub method: PaymentMethod,
    pub paid_at: Option<NaiveDate>,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub examined: usize,
    pub changed: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// A member's balance in the ledger base currency, plus any other currency
/// the member has dues or payments in.
#[derive(Debug, Clone, Serialize)]
pub struct MemberBalance {
    pub member_id: Uuid,
    pub currency: String,
    pub total_assessed: Decimal,
    pub total_paid: Decimal,
    pub outstanding_balance: Decimal,
    pub open_dues: usize,
    pub other_currencies: Vec<CurrencyBalance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DueDetail {
    #[serde(flatten)]
    pub due: AssignedDue,
    pub paid_amount: Decimal,
    pub remaining: Decimal,
    /// Status derived from the payments right now; differs from the stored
    /// status only while a sync is pending.
    pub derived_status: DueStatus,
    pub payments: Vec<Payment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutstandingEntry {
    pub member_id: Uuid,
    pub member_number: String,
    pub full_name: String,
    pub outstanding_balance: Decimal,
    pub open_dues: usize,
}

pub struct LedgerService {
    store: Arc<dyn LedgerStore>,
    policy: EligibilityPolicy,
    base_currency: String,
    shutdown: CancellationToken,
}

impl LedgerService {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        policy: EligibilityPolicy,
        base_currency: impl Into<String>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            policy,
            base_currency: base_currency.into(),
            shutdown,
        }
    }

    pub fn base_currency(&self) -> &str {
        &self.base_currency
    }

    // =========================================================================
    // Plan catalog
    // =========================================================================

    #[instrument(skip(self, input), fields(code = %input.code))]
    pub async fn create_plan(&self, input: CreatePlan) -> Result<DuesPlan, AppError> {
        let input = CreatePlan {
            code: input.code.trim().to_string(),
            amount: validate_plan_amount(input.amount)?,
            currency: normalize_currency(&input.currency)?,
            ..input
        };
        self.store.create_plan(&input).await
    }

    /// Amount changes apply to future assessments only; assigned dues keep
    /// their snapshot.
    #[instrument(skip(self, input))]
    pub async fn update_plan(&self, plan_id: Uuid, input: UpdatePlan) -> Result<DuesPlan, AppError> {
        if let Some(amount) = input.amount {
            validate_plan_amount(amount)?;
        }
        self.store
            .update_plan(plan_id, &input)
            .await?
            .ok_or_else(|| LedgerError::PlanNotFound(plan_id).into())
    }

    // =========================================================================
    // Assessment engine
    // =========================================================================

    /// Assess a plan for a period over a target group. Each member's due is
    /// inserted on its own; a failure for one member is reported in `skipped`
    /// and the others proceed. Stops between members when shutting down.
    #[instrument(skip(self, command), fields(plan_id = %command.plan_id, period = %command.period))]
    pub async fn assess(&self, command: AssessCommand) -> Result<AssessmentReport, AppError> {
        let result = self.assess_inner(command).await;
        match &result {
            Ok(_) => record_ledger_operation("assess", "success"),
            Err(e) => {
                record_ledger_operation("assess", "rejected");
                record_error(e.kind());
            }
        }
        result
    }

    async fn assess_inner(&self, command: AssessCommand) -> Result<AssessmentReport, AppError> {
        let plan = self
            .store
            .get_plan(command.plan_id)
            .await?
            .ok_or(LedgerError::PlanNotFound(command.plan_id))?;

        let (target, members, target_category_id, requested_ids) = match &command.target {
            TargetSelector::Category(name) => {
                let category = self
                    .store
                    .get_category_by_name(name.trim())
                    .await?
                    .ok_or_else(|| LedgerError::UnknownTargetCategory(name.clone()))?;
                if plan.category_id.is_some_and(|id| id != category.category_id) {
                    warn!(
                        plan = %plan.code,
                        category = %category.name,
                        "Assessing a plan outside its own category"
                    );
                }
                let members = self
                    .store
                    .list_members_in_category(category.category_id)
                    .await?;
                (
                    AssessmentTarget::Category(category.category_id),
                    members,
                    Some(category.category_id),
                    Vec::new(),
                )
            }
            TargetSelector::Individual(ids) => {
                let members = self.store.get_members(ids).await?;
                (
                    AssessmentTarget::Individual(ids.clone()),
                    members,
                    None,
                    ids.clone(),
                )
            }
        };

        let period = command.period.trim().to_string();
        let already_assessed = self
            .store
            .assessed_member_ids(plan.plan_id, &period)
            .await?;

        let request = AssessmentRequest {
            assessment_id: Uuid::new_v4(),
            plan,
            period,
            target,
            due_date: command.due_date,
            notes: command.notes,
        };
        let planned = plan_assessment(&request, &members, &already_assessed, self.policy)?;

        let mut skipped = planned.skipped;
        let mut assigned = 0usize;
        let mut interrupted = false;

        for draft in &planned.dues {
            if self.shutdown.is_cancelled() {
                interrupted = true;
                warn!(
                    assigned = assigned,
                    remaining = planned.dues.len() - assigned,
                    "Assessment interrupted by shutdown"
                );
                break;
            }

            match self.store.insert_assigned_due(draft).await {
                Ok(DueInsert::Inserted(_)) => {
                    assigned += 1;
                    record_assigned_due("created");
                }
                Ok(DueInsert::Duplicate) => {
                    record_assigned_due("duplicate");
                    skipped.push(SkippedMember::new(
                        draft.member_id,
                        SkipReason::AlreadyAssessed,
                    ));
                }
                Err(e) => {
                    warn!(member_id = %draft.member_id, error = %e, "Failed to assign due");
                    record_assigned_due("failed");
                    skipped.push(
                        SkippedMember::new(draft.member_id, SkipReason::Error)
                            .with_detail(e.to_string()),
                    );
                }
            }
        }

        let target_type = match request.target {
            AssessmentTarget::Category(_) => TargetType::Category,
            AssessmentTarget::Individual(_) => TargetType::Individual,
        };
        let audit = NewAssessment {
            assessment_id: request.assessment_id,
            plan_id: request.plan.plan_id,
            period: request.period.clone(),
            target_type,
            target_category_id,
            member_ids: requested_ids,
            assigned_count: i32::try_from(assigned).unwrap_or(i32::MAX),
            skipped_count: i32::try_from(skipped.len()).unwrap_or(i32::MAX),
            interrupted,
            actor: command.actor,
        };
        if let Err(e) = self.store.record_assessment(&audit).await {
            // The dues are the canonical record; a lost audit row is only logged.
            warn!(assessment_id = %audit.assessment_id, error = %e, "Failed to record assessment");
            record_error(e.kind());
        }

        info!(
            assessment_id = %request.assessment_id,
            assigned = assigned,
            skipped = skipped.len(),
            interrupted = interrupted,
            "Assessment completed"
        );

        Ok(AssessmentReport {
            assessment_id: request.assessment_id,
            plan_id: request.plan.plan_id,
            period: request.period,
            assigned_dues_count: assigned,
            skipped,
            interrupted,
        })
    }

    // =========================================================================
    // Payment recorder
    // =========================================================================

    /// Validate and append a payment. Every check runs before anything is
    /// written; the linked due (if any) is synced in the same unit of work.
    #[instrument(skip(self, command), fields(member_id = %command.member_id, amount = %command.amount))]
    pub async fn record_payment(
        &self,
        command: RecordPaymentCommand,
    ) -> Result<RecordedPayment, AppError> {
        let amount = validate_amount(command.amount)?;

        self.store
            .get_member(command.member_id)
            .await?
            .ok_or(LedgerError::MemberNotFound(command.member_id))?;

        let plan = match command.plan_id {
            Some(plan_id) => Some(
                self.store
                    .get_plan(plan_id)
                    .await?
                    .ok_or(LedgerError::PlanNotFound(plan_id))?,
            ),
            None => None,
        };

        let due = match command.assigned_due_id {
            Some(due_id) => Some(
                self.store
                    .get_assigned_due(due_id)
                    .await?
                    .ok_or(LedgerError::AssignedDueNotFound(due_id))?,
            ),
            None => None,
        };

        if let Some(due) = &due {
            if due.member_id != command.member_id {
                return Err(LedgerError::MismatchedAssignedDue {
                    assigned_due_id: due.assigned_due_id,
                    member_id: command.member_id,
                }
                .into());
            }
            if let Some(plan_id) = command.plan_id {
                if due.plan_id != plan_id {
                    return Err(LedgerError::MismatchedPlan {
                        assigned_due_id: due.assigned_due_id,
                        plan_id,
                    }
                    .into());
                }
            }
        }

        let currency = match command.currency.as_deref() {
            Some(currency) => normalize_currency(currency)?,
            None => due
                .as_ref()
                .map(|d| d.currency.clone())
                .or_else(|| plan.as_ref().map(|p| p.currency.clone()))
                .unwrap_or_else(|| self.base_currency.clone()),
        };
        if let Some(due) = &due {
            if due.currency != currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: due.currency.clone(),
                    actual: currency,
                }
                .into());
            }
        }

        let payment = NewPayment {
            member_id: command.member_id,
            plan_id: command.plan_id.or(due.as_ref().map(|d| d.plan_id)),
            assigned_due_id: command.assigned_due_id,
            amount,
            currency,
            method: command.method,
            paid_at: command.paid_at.unwrap_or_else(|| Utc::now().date_naive()),
            reference: command.reference,
            description: command.description,
            recorded_by: command.recorded_by,
        };

        let recorded = self.store.record_payment(&payment).await.map_err(|e| {
            record_ledger_operation("record_payment", "error");
            record_error(e.kind());
            e
        })?;

        record_ledger_operation("record_payment", "success");
        record_payment(payment.method.as_str());
        match &recorded.due_sync {
            DueSync::Unlinked => {}
            DueSync::Applied(outcome) => record_status_sync(sync_label(outcome)),
            DueSync::Deferred(_) => record_status_sync("deferred"),
        }

        Ok(recorded)
    }

    // =========================================================================
    // Status synchronizer
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn sync_due_status(&self, assigned_due_id: Uuid) -> Result<SyncOutcome, AppError> {
        match self.store.sync_due_status(assigned_due_id).await {
            Ok(outcome) => {
                record_status_sync(sync_label(&outcome));
                if outcome.changed {
                    info!(
                        assigned_due_id = %assigned_due_id,
                        previous = %outcome.previous,
                        current = %outcome.current,
                        "Due status synchronized"
                    );
                }
                Ok(outcome)
            }
            Err(e) => {
                record_status_sync("failed");
                Err(e)
            }
        }
    }

    /// Re-sync every assigned due. Individual failures are counted and logged;
    /// they never abort the sweep. Stops early on shutdown.
    #[instrument(skip(self))]
    pub async fn reconcile_all(&self) -> Result<SweepReport, AppError> {
        let timer = SWEEP_DURATION.start_timer();
        let ids = self.store.list_assigned_due_ids().await?;
        let total = ids.len();

        let results: Vec<(Uuid, Result<SyncOutcome, AppError>)> = stream::iter(ids)
            .map(|id| {
                let store = Arc::clone(&self.store);
                async move { (id, store.sync_due_status(id).await) }
            })
            .buffer_unordered(SWEEP_CONCURRENCY)
            .take_until(self.shutdown.cancelled())
            .collect()
            .await;

        let mut report = SweepReport {
            examined: results.len(),
            interrupted: results.len() < total,
            ..SweepReport::default()
        };
        for (id, result) in results {
            match result {
                Ok(outcome) => {
                    record_status_sync(sync_label(&outcome));
                    if outcome.changed {
                        report.changed += 1;
                    }
                }
                Err(e) => {
                    record_status_sync("failed");
                    warn!(assigned_due_id = %id, error = %e, "Sweep failed to sync due");
                    report.failed += 1;
                }
            }
        }

        timer.observe_duration();
        record_ledger_operation("reconcile_all", "success");
        info!(
            examined = report.examined,
            changed = report.changed,
            failed = report.failed,
            "Reconciliation sweep finished"
        );

        Ok(report)
    }

    // =========================================================================
    // Reconciliation reads
    // =========================================================================

    #[instrument(skip(self))]
    pub async fn member_balance(&self, member_id: Uuid) -> Result<MemberBalance, AppError> {
        self.store
            .get_member(member_id)
            .await?
            .ok_or(LedgerError::MemberNotFound(member_id))?;

        let dues = self
            .store
            .list_assigned_dues(&ListDuesFilter {
                member_id: Some(member_id),
                ..ListDuesFilter::default()
            })
            .await?;
        let payments = self
            .store
            .list_payments(&ListPaymentsFilter {
                member_id: Some(member_id),
                ..ListPaymentsFilter::default()
            })
            .await?;

        let (primary, other_currencies): (Vec<CurrencyBalance>, Vec<CurrencyBalance>) =
            member_balances(&dues, &payments)
                .into_iter()
                .partition(|b| b.currency == self.base_currency);

        let primary = primary.into_iter().next().unwrap_or_else(|| CurrencyBalance {
            currency: self.base_currency.clone(),
            total_assessed: money(Decimal::ZERO),
            total_paid: money(Decimal::ZERO),
            outstanding_balance: money(Decimal::ZERO),
            open_dues: 0,
        });

        Ok(MemberBalance {
            member_id,
            currency: primary.currency,
            total_assessed: primary.total_assessed,
            total_paid: primary.total_paid,
            outstanding_balance: primary.outstanding_balance,
            open_dues: primary.open_dues,
            other_currencies,
        })
    }

    #[instrument(skip(self))]
    pub async fn due_detail(&self, assigned_due_id: Uuid) -> Result<DueDetail, AppError> {
        let due = self
            .store
            .get_assigned_due(assigned_due_id)
            .await?
            .ok_or(LedgerError::AssignedDueNotFound(assigned_due_id))?;
        let payments = self
            .store
            .list_payments(&ListPaymentsFilter {
                assigned_due_id: Some(assigned_due_id),
                ..ListPaymentsFilter::default()
            })
            .await?;

        let DueReconciliation {
            paid_amount,
            remaining,
            status,
            ..
        } = reconcile_due(&due, &payments);

        Ok(DueDetail {
            due,
            paid_amount,
            remaining,
            derived_status: status,
            payments,
        })
    }

    #[instrument(skip(self, reason))]
    pub async fn waive_due(&self, assigned_due_id: Uuid, reason: &str) -> Result<AssignedDue, AppError> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LedgerError::MissingField("reason").into());
        }
        let waived = self.store.waive_assigned_due(assigned_due_id, reason).await?;
        record_ledger_operation("waive", "success");
        Ok(waived)
    }

    /// Members owing money in the base currency, largest balance first.
    #[instrument(skip(self))]
    pub async fn outstanding_report(&self) -> Result<Vec<OutstandingEntry>, AppError> {
        let members = self.store.list_members().await?;
        let dues = self.store.list_assigned_dues(&ListDuesFilter::default()).await?;
        let payments = self
            .store
            .list_payments(&ListPaymentsFilter::default())
            .await?;

        let mut dues_by_member: HashMap<Uuid, Vec<AssignedDue>> = HashMap::new();
        for due in dues.into_iter().filter(|d| d.currency == self.base_currency) {
            dues_by_member.entry(due.member_id).or_default().push(due);
        }
        let mut payments_by_member: HashMap<Uuid, Vec<Payment>> = HashMap::new();
        for payment in payments {
            payments_by_member
                .entry(payment.member_id)
                .or_default()
                .push(payment);
        }

        let mut entries: Vec<OutstandingEntry> = members
            .into_iter()
            .filter_map(|member| {
                let dues = dues_by_member.remove(&member.member_id)?;
                let payments = payments_by_member
                    .remove(&member.member_id)
                    .unwrap_or_default();
                let balance = member_balances(&dues, &payments)
                    .into_iter()
                    .find(|b| b.currency == self.base_currency)?;
                (balance.outstanding_balance > Decimal::ZERO).then(|| OutstandingEntry {
                    member_id: member.member_id,
                    member_number: member.member_number,
                    full_name: member.full_name,
                    outstanding_balance: balance.outstanding_balance,
                    open_dues: balance.open_dues,
                })
            })
            .collect();

        entries.sort_by(|a, b| {
            b.outstanding_balance
                .cmp(&a.outstanding_balance)
                .then_with(|| a.member_number.cmp(&b.member_number))
        });
        Ok(entries)
    }
}

fn sync_label(outcome: &SyncOutcome) -> &'static str {
    if outcome.changed {
        "changed"
    } else {
        "unchanged"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BillingCycle, CreateMember, MemberStatus};
    use crate::services::MemoryStore;
    use rust_decimal_macros::dec;

    type Seeded = (LedgerService, Arc<dyn LedgerStore>, Uuid, Vec<Uuid>);

    /// Three active members and a quarterly plan.
    async fn seeded(shutdown: CancellationToken) -> Seeded {
        let store: Arc<dyn LedgerStore> = Arc::new(MemoryStore::new("GHS"));
        let mut members = Vec::new();
        for number in ["S-1", "S-2", "S-3"] {
            let member = store
                .create_member(&CreateMember {
                    member_number: number.to_string(),
                    full_name: format!("Member {}", number),
                    email: None,
                    category_id: None,
                    status: MemberStatus::Active,
                })
                .await
                .unwrap();
            members.push(member.member_id);
        }
        let ledger =
            LedgerService::new(store.clone(), EligibilityPolicy::default(), "GHS", shutdown);
        let plan = ledger
            .create_plan(CreatePlan {
                code: "Q".to_string(),
                name: "Quarterly".to_string(),
                description: None,
                amount: dec!(90.00),
                currency: "GHS".to_string(),
                billing_cycle: BillingCycle::Quarterly,
                category_id: None,
            })
            .await
            .unwrap();
        (ledger, store, plan.plan_id, members)
    }

    fn command(plan_id: Uuid, members: Vec<Uuid>) -> AssessCommand {
        AssessCommand {
            plan_id,
            period: "2024-Q4".to_string(),
            target: TargetSelector::Individual(members),
            due_date: None,
            notes: None,
            actor: Some("treasurer".to_string()),
        }
    }

    #[tokio::test]
    async fn assessment_stops_before_inserting_once_shutdown_is_requested() {
        let shutdown = CancellationToken::new();
        let (ledger, store, plan_id, members) = seeded(shutdown.clone()).await;
        shutdown.cancel();

        let report = ledger.assess(command(plan_id, members)).await.unwrap();
        assert!(report.interrupted);
        assert_eq!(report.assigned_dues_count, 0);

        let dues = store.list_assigned_dues(&ListDuesFilter::default()).await.unwrap();
        assert!(dues.is_empty());

        let audits = store.list_assessments(Some(plan_id)).await.unwrap();
        assert_eq!(audits.len(), 1);
        assert!(audits[0].interrupted);
        assert_eq!(audits[0].assigned_count, 0);
    }

    #[tokio::test]
    async fn interrupted_assessment_can_be_rerun_to_completion() {
        let shutdown = CancellationToken::new();
        let (ledger, store, plan_id, members) = seeded(shutdown.clone()).await;
        shutdown.cancel();
        ledger.assess(command(plan_id, members.clone())).await.unwrap();

        let resumed = LedgerService::new(
            store.clone(),
            EligibilityPolicy::default(),
            "GHS",
            CancellationToken::new(),
        );
        let report = resumed.assess(command(plan_id, members)).await.unwrap();
        assert!(!report.interrupted);
        assert_eq!(report.assigned_dues_count, 3);
        assert!(report.skipped.is_empty());
    }
}
