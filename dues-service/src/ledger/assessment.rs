//! Assessment engine.
//!
//! `plan_assessment` is a pure function of the plan, the period, the target
//! selector and a read-only member snapshot. It decides which members receive
//! a due and which are skipped; persisting the drafts is the caller's job.

use super::period::{parse_period, PeriodWindow};
use super::LedgerError;
use crate::models::{DuesPlan, Member, MemberStatus, NewAssignedDue};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Which member statuses may be assessed besides ACTIVE.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EligibilityPolicy {
    pub include_pending: bool,
    pub include_prospect: bool,
}

impl EligibilityPolicy {
    pub fn is_eligible(&self, status: MemberStatus) -> bool {
        match status {
            MemberStatus::Active => true,
            MemberStatus::Pending => self.include_pending,
            MemberStatus::Prospect => self.include_prospect,
            MemberStatus::Inactive | MemberStatus::Suspended => false,
        }
    }
}

/// Target selector, with category names already resolved to ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssessmentTarget {
    Category(Uuid),
    Individual(Vec<Uuid>),
}

#[derive(Debug, Clone)]
pub struct AssessmentRequest {
    pub assessment_id: Uuid,
    pub plan: DuesPlan,
    pub period: String,
    pub target: AssessmentTarget,
    /// Defaults to the last day of the period window.
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyAssessed,
    NotFound,
    Ineligible,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedMember {
    pub member_id: Uuid,
    pub reason: SkipReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl SkippedMember {
    pub fn new(member_id: Uuid, reason: SkipReason) -> Self {
        Self {
            member_id,
            reason,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Outcome of planning: the drafts to insert, in target order, and the
/// members left out with a reason each.
#[derive(Debug, Clone)]
pub struct AssessmentPlan {
    pub window: PeriodWindow,
    pub dues: Vec<NewAssignedDue>,
    pub skipped: Vec<SkippedMember>,
}

/// Natural idempotency key of a due.
pub fn due_reference(plan_code: &str, period: &str, member_id: Uuid) -> String {
    format!("{}-{}-{}", plan_code, period, member_id)
}

/// Plan one assessment run.
///
/// `already_assessed` holds the ids of members that already carry a due for
/// this plan and period; they are skipped rather than charged twice.
pub fn plan_assessment(
    request: &AssessmentRequest,
    members: &[Member],
    already_assessed: &HashSet<Uuid>,
    policy: EligibilityPolicy,
) -> Result<AssessmentPlan, LedgerError> {
    let plan = &request.plan;
    if !plan.is_active {
        return Err(LedgerError::PlanInactive(plan.code.clone()));
    }
    if plan.amount <= Decimal::ZERO {
        return Err(LedgerError::ZeroAmountPlan(plan.code.clone()));
    }

    let period = request.period.trim();
    if period.is_empty() {
        return Err(LedgerError::MissingField("period"));
    }
    let window = parse_period(period, plan.cycle())?;

    let mut skipped = Vec::new();
    let targets: Vec<&Member> = match &request.target {
        AssessmentTarget::Category(category_id) => members
            .iter()
            .filter(|m| m.category_id == Some(*category_id))
            .filter(|m| policy.is_eligible(m.member_status()))
            .collect(),
        AssessmentTarget::Individual(ids) => {
            let mut seen = HashSet::new();
            let mut targets = Vec::new();
            for id in ids.iter().filter(|id| seen.insert(**id)) {
                match members.iter().find(|m| m.member_id == *id) {
                    None => skipped.push(SkippedMember::new(*id, SkipReason::NotFound)),
                    Some(m) if !policy.is_eligible(m.member_status()) => skipped.push(
                        SkippedMember::new(*id, SkipReason::Ineligible)
                            .with_detail(format!("member status is {}", m.status)),
                    ),
                    Some(m) => targets.push(m),
                }
            }
            targets
        }
    };

    if targets.is_empty() {
        return Err(LedgerError::NoTargetMembers);
    }

    let due_date = request.due_date.unwrap_or(window.end);
    let mut dues = Vec::with_capacity(targets.len());
    for member in targets {
        if already_assessed.contains(&member.member_id) {
            skipped.push(SkippedMember::new(
                member.member_id,
                SkipReason::AlreadyAssessed,
            ));
            continue;
        }

        dues.push(NewAssignedDue {
            member_id: member.member_id,
            plan_id: plan.plan_id,
            category_id: member.category_id,
            assessment_id: Some(request.assessment_id),
            amount: plan.amount,
            currency: plan.currency.clone(),
            period: period.to_string(),
            period_start: window.start,
            period_end: window.end,
            due_date,
            reference: due_reference(&plan.code, period, member.member_id),
            notes: request.notes.clone(),
        });
    }

    Ok(AssessmentPlan {
        window,
        dues,
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillingCycle;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn plan(amount: Decimal) -> DuesPlan {
        DuesPlan {
            plan_id: Uuid::new_v4(),
            code: "SILVER_QUARTERLY".to_string(),
            name: "Silver quarterly dues".to_string(),
            description: None,
            amount,
            currency: "GHS".to_string(),
            billing_cycle: BillingCycle::Quarterly.as_str().to_string(),
            category_id: None,
            is_active: true,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn member(category_id: Option<Uuid>, status: MemberStatus) -> Member {
        let member_id = Uuid::new_v4();
        Member {
            member_id,
            member_number: format!("M-{}", &member_id.to_string()[..8]),
            full_name: "Ama Mensah".to_string(),
            email: None,
            category_id,
            status: status.as_str().to_string(),
            outstanding_balance: Decimal::ZERO,
            created_utc: Utc::now(),
            updated_utc: Utc::now(),
        }
    }

    fn request(plan: DuesPlan, target: AssessmentTarget) -> AssessmentRequest {
        AssessmentRequest {
            assessment_id: Uuid::new_v4(),
            plan,
            period: "2024-Q4".to_string(),
            target,
            due_date: None,
            notes: None,
        }
    }

    #[test]
    fn category_assessment_snapshots_plan_amount() {
        let silver = Uuid::new_v4();
        let members = vec![
            member(Some(silver), MemberStatus::Active),
            member(Some(silver), MemberStatus::Active),
            member(Some(Uuid::new_v4()), MemberStatus::Active),
        ];
        let req = request(plan(dec!(90.00)), AssessmentTarget::Category(silver));

        let planned =
            plan_assessment(&req, &members, &HashSet::new(), EligibilityPolicy::default()).unwrap();

        assert_eq!(planned.dues.len(), 2);
        assert!(planned.skipped.is_empty());
        let first = &planned.dues[0];
        assert_eq!(first.amount, dec!(90.00));
        assert_eq!(first.currency, "GHS");
        assert_eq!(first.category_id, Some(silver));
        assert_eq!(first.period_start, NaiveDate::from_ymd_opt(2024, 10, 1).unwrap());
        assert_eq!(first.due_date, NaiveDate::from_ymd_opt(2024, 12, 31).unwrap());
        assert_eq!(
            first.reference,
            format!("SILVER_QUARTERLY-2024-Q4-{}", members[0].member_id)
        );
    }

    #[test]
    fn empty_category_fails_with_no_target_members() {
        let gold = Uuid::new_v4();
        let members = vec![member(Some(Uuid::new_v4()), MemberStatus::Active)];
        let req = request(plan(dec!(90.00)), AssessmentTarget::Category(gold));

        let err = plan_assessment(&req, &members, &HashSet::new(), EligibilityPolicy::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::NoTargetMembers));
    }

    #[test]
    fn rerun_skips_already_assessed_members() {
        let silver = Uuid::new_v4();
        let members = vec![
            member(Some(silver), MemberStatus::Active),
            member(Some(silver), MemberStatus::Active),
        ];
        let req = request(plan(dec!(90.00)), AssessmentTarget::Category(silver));
        let assessed: HashSet<Uuid> = members.iter().map(|m| m.member_id).collect();

        let planned =
            plan_assessment(&req, &members, &assessed, EligibilityPolicy::default()).unwrap();
        assert!(planned.dues.is_empty());
        assert_eq!(planned.skipped.len(), 2);
        assert!(planned
            .skipped
            .iter()
            .all(|s| s.reason == SkipReason::AlreadyAssessed));
    }

    #[test]
    fn eligibility_follows_policy() {
        let silver = Uuid::new_v4();
        let members = vec![
            member(Some(silver), MemberStatus::Active),
            member(Some(silver), MemberStatus::Pending),
            member(Some(silver), MemberStatus::Prospect),
            member(Some(silver), MemberStatus::Suspended),
        ];
        let req = request(plan(dec!(10.00)), AssessmentTarget::Category(silver));

        let strict =
            plan_assessment(&req, &members, &HashSet::new(), EligibilityPolicy::default()).unwrap();
        assert_eq!(strict.dues.len(), 1);

        let lenient = EligibilityPolicy {
            include_pending: true,
            include_prospect: true,
        };
        let planned = plan_assessment(&req, &members, &HashSet::new(), lenient).unwrap();
        assert_eq!(planned.dues.len(), 3);
    }

    #[test]
    fn individual_target_reports_unknown_and_ineligible_ids() {
        let active = member(None, MemberStatus::Active);
        let inactive = member(None, MemberStatus::Inactive);
        let unknown = Uuid::new_v4();
        let members = vec![active.clone(), inactive.clone()];
        let req = request(
            plan(dec!(25.00)),
            AssessmentTarget::Individual(vec![
                active.member_id,
                active.member_id,
                inactive.member_id,
                unknown,
            ]),
        );

        let planned =
            plan_assessment(&req, &members, &HashSet::new(), EligibilityPolicy::default()).unwrap();
        assert_eq!(planned.dues.len(), 1);
        assert_eq!(planned.dues[0].member_id, active.member_id);
        assert_eq!(planned.skipped.len(), 2);
        assert_eq!(planned.skipped[0].reason, SkipReason::Ineligible);
        assert_eq!(planned.skipped[1], SkippedMember::new(unknown, SkipReason::NotFound));
    }

    #[test]
    fn inactive_and_zero_amount_plans_are_rejected() {
        let m = member(None, MemberStatus::Active);
        let target = AssessmentTarget::Individual(vec![m.member_id]);

        let mut inactive = plan(dec!(10.00));
        inactive.is_active = false;
        let err = plan_assessment(
            &request(inactive, target.clone()),
            &[m.clone()],
            &HashSet::new(),
            EligibilityPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::PlanInactive(_)));

        let err = plan_assessment(
            &request(plan(Decimal::ZERO), target),
            &[m],
            &HashSet::new(),
            EligibilityPolicy::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::ZeroAmountPlan(_)));
    }

    #[test]
    fn bad_period_is_rejected_before_targeting() {
        let mut req = request(plan(dec!(10.00)), AssessmentTarget::Individual(vec![]));
        req.period = "autumn".to_string();
        let err = plan_assessment(&req, &[], &HashSet::new(), EligibilityPolicy::default())
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidPeriod(_)));
    }

    #[test]
    fn explicit_due_date_wins() {
        let m = member(None, MemberStatus::Active);
        let mut req = request(
            plan(dec!(10.00)),
            AssessmentTarget::Individual(vec![m.member_id]),
        );
        let due = NaiveDate::from_ymd_opt(2024, 10, 15).unwrap();
        req.due_date = Some(due);

        let planned =
            plan_assessment(&req, &[m], &HashSet::new(), EligibilityPolicy::default()).unwrap();
        assert_eq!(planned.dues[0].due_date, due);
    }
}
