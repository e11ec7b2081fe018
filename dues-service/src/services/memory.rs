//! In-process ledger store.
//!
//! Backs `STORAGE_BACKEND=memory` and the integration tests. A single
//! `RwLock` serialises writers, so every trait method is atomic on its own.

use crate::ledger::{
    derive_status, due_paid_amount, member_outstanding_balance, money, LedgerError,
};
use crate::models::{
    Assessment, AssignedDue, Category, CreateCategory, CreateMember, CreatePlan, DueStatus,
    DuesPlan, ListDuesFilter, ListPaymentsFilter, ListPlansFilter, Member, MemberStatus,
    NewAssessment, NewAssignedDue, NewPayment, Payment, UpdatePlan,
};
use crate::services::store::{DueInsert, DueSync, LedgerStore, RecordedPayment, SyncOutcome};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[derive(Default)]
struct State {
    categories: Vec<Category>,
    members: Vec<Member>,
    plans: Vec<DuesPlan>,
    dues: Vec<AssignedDue>,
    assessments: Vec<Assessment>,
    payments: Vec<Payment>,
}

impl State {
    fn cached_balance(&self, member_id: Uuid, base_currency: &str) -> Decimal {
        let dues: Vec<AssignedDue> = self
            .dues
            .iter()
            .filter(|d| d.member_id == member_id && d.currency == base_currency)
            .cloned()
            .collect();
        member_outstanding_balance(&dues, &self.payments)
    }

    fn refresh_member_balance(
        &mut self,
        member_id: Uuid,
        base_currency: &str,
    ) -> Result<(), AppError> {
        let balance = self.cached_balance(member_id, base_currency);
        let member = self
            .members
            .iter_mut()
            .find(|m| m.member_id == member_id)
            .ok_or_else(|| {
                AppError::DatabaseError(anyhow::anyhow!(
                    "Member {} referenced by a due is missing",
                    member_id
                ))
            })?;
        member.outstanding_balance = balance;
        member.updated_utc = Utc::now();
        Ok(())
    }

    /// Derive first, write only once every lookup has succeeded.
    fn sync_due(&mut self, assigned_due_id: Uuid, base_currency: &str) -> Result<SyncOutcome, AppError> {
        let idx = self
            .dues
            .iter()
            .position(|d| d.assigned_due_id == assigned_due_id)
            .ok_or(LedgerError::AssignedDueNotFound(assigned_due_id))?;

        let due = &self.dues[idx];
        let paid = due_paid_amount(due, &self.payments);
        let previous = due.due_status();
        let current = derive_status(due, paid);
        let member_id = due.member_id;

        if !self.members.iter().any(|m| m.member_id == member_id) {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Member {} referenced by due {} is missing",
                member_id,
                assigned_due_id
            )));
        }

        let changed = previous != current;
        if changed {
            let due = &mut self.dues[idx];
            due.status = current.as_str().to_string();
            due.updated_utc = Utc::now();
        }
        self.refresh_member_balance(member_id, base_currency)?;

        Ok(SyncOutcome {
            assigned_due_id,
            member_id,
            previous,
            current,
            paid_amount: money(paid),
            changed,
        })
    }
}

fn conflict(message: String) -> AppError {
    AppError::Conflict(anyhow::anyhow!(message))
}

pub struct MemoryStore {
    state: RwLock<State>,
    base_currency: String,
}

impl MemoryStore {
    pub fn new(base_currency: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(State::default()),
            base_currency: base_currency.into(),
        }
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn health_check(&self) -> Result<(), AppError> {
        Ok(())
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_category(&self, input: &CreateCategory) -> Result<Category, AppError> {
        let mut state = self.state.write().await;
        if state
            .categories
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(&input.name))
        {
            return Err(conflict(format!("Category '{}' already exists", input.name)));
        }

        let category = Category {
            category_id: Uuid::new_v4(),
            name: input.name.clone(),
            description: input.description.clone(),
            created_utc: Utc::now(),
        };
        state.categories.push(category.clone());
        info!(category_id = %category.category_id, "Category created");
        Ok(category)
    }

    async fn list_categories(&self) -> Result<Vec<Category>, AppError> {
        let state = self.state.read().await;
        let mut categories = state.categories.clone();
        categories.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(categories)
    }

    async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .categories
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    #[instrument(skip(self, input), fields(member_number = %input.member_number))]
    async fn create_member(&self, input: &CreateMember) -> Result<Member, AppError> {
        let mut state = self.state.write().await;
        if state
            .members
            .iter()
            .any(|m| m.member_number == input.member_number)
        {
            return Err(conflict(format!(
                "Member number '{}' already exists",
                input.member_number
            )));
        }
        if let Some(category_id) = input.category_id {
            if !state.categories.iter().any(|c| c.category_id == category_id) {
                return Err(AppError::BadRequest(anyhow::anyhow!(
                    "Category {} does not exist",
                    category_id
                )));
            }
        }

        let now = Utc::now();
        let member = Member {
            member_id: Uuid::new_v4(),
            member_number: input.member_number.clone(),
            full_name: input.full_name.clone(),
            email: input.email.clone(),
            category_id: input.category_id,
            status: input.status.as_str().to_string(),
            outstanding_balance: money(Decimal::ZERO),
            created_utc: now,
            updated_utc: now,
        };
        state.members.push(member.clone());
        info!(member_id = %member.member_id, "Member created");
        Ok(member)
    }

    async fn get_member(&self, member_id: Uuid) -> Result<Option<Member>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .find(|m| m.member_id == member_id)
            .cloned())
    }

    async fn get_members(&self, member_ids: &[Uuid]) -> Result<Vec<Member>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .members
            .iter()
            .filter(|m| member_ids.contains(&m.member_id))
            .cloned()
            .collect())
    }

    async fn list_members_in_category(&self, category_id: Uuid) -> Result<Vec<Member>, AppError> {
        let state = self.state.read().await;
        let mut members: Vec<Member> = state
            .members
            .iter()
            .filter(|m| m.category_id == Some(category_id))
            .cloned()
            .collect();
        members.sort_by(|a, b| a.member_number.cmp(&b.member_number));
        Ok(members)
    }

    async fn list_members(&self) -> Result<Vec<Member>, AppError> {
        let state = self.state.read().await;
        let mut members = state.members.clone();
        members.sort_by(|a, b| a.member_number.cmp(&b.member_number));
        Ok(members)
    }

    async fn update_member_status(
        &self,
        member_id: Uuid,
        status: MemberStatus,
    ) -> Result<Option<Member>, AppError> {
        let mut state = self.state.write().await;
        let Some(member) = state.members.iter_mut().find(|m| m.member_id == member_id) else {
            return Ok(None);
        };
        member.status = status.as_str().to_string();
        member.updated_utc = Utc::now();
        Ok(Some(member.clone()))
    }

    async fn delete_member(&self, member_id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.write().await;
        let Some(idx) = state.members.iter().position(|m| m.member_id == member_id) else {
            return Ok(false);
        };
        let referenced = state.dues.iter().any(|d| d.member_id == member_id)
            || state.payments.iter().any(|p| p.member_id == member_id);
        if referenced {
            return Err(LedgerError::MemberHasLedgerEntries(member_id).into());
        }
        state.members.remove(idx);
        Ok(true)
    }

    #[instrument(skip(self, input), fields(code = %input.code))]
    async fn create_plan(&self, input: &CreatePlan) -> Result<DuesPlan, AppError> {
        let mut state = self.state.write().await;
        if state.plans.iter().any(|p| p.code == input.code) {
            return Err(conflict(format!("Plan code '{}' already exists", input.code)));
        }

        let now = Utc::now();
        let plan = DuesPlan {
            plan_id: Uuid::new_v4(),
            code: input.code.clone(),
            name: input.name.clone(),
            description: input.description.clone(),
            amount: input.amount,
            currency: input.currency.clone(),
            billing_cycle: input.billing_cycle.as_str().to_string(),
            category_id: input.category_id,
            is_active: true,
            created_utc: now,
            updated_utc: now,
        };
        state.plans.push(plan.clone());
        info!(plan_id = %plan.plan_id, "Plan created");
        Ok(plan)
    }

    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<DuesPlan>, AppError> {
        let state = self.state.read().await;
        Ok(state.plans.iter().find(|p| p.plan_id == plan_id).cloned())
    }

    async fn list_plans(&self, filter: &ListPlansFilter) -> Result<Vec<DuesPlan>, AppError> {
        let state = self.state.read().await;
        let mut plans: Vec<DuesPlan> = state
            .plans
            .iter()
            .filter(|p| filter.active.map_or(true, |a| p.is_active == a))
            .filter(|p| filter.category_id.map_or(true, |c| p.category_id == Some(c)))
            .cloned()
            .collect();
        plans.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(plans)
    }

    async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<DuesPlan>, AppError> {
        let mut state = self.state.write().await;
        let Some(plan) = state.plans.iter_mut().find(|p| p.plan_id == plan_id) else {
            return Ok(None);
        };
        if let Some(name) = &input.name {
            plan.name = name.clone();
        }
        if let Some(description) = &input.description {
            plan.description = Some(description.clone());
        }
        if let Some(amount) = input.amount {
            plan.amount = amount;
        }
        if let Some(is_active) = input.is_active {
            plan.is_active = is_active;
        }
        plan.updated_utc = Utc::now();
        Ok(Some(plan.clone()))
    }

    async fn assessed_member_ids(
        &self,
        plan_id: Uuid,
        period: &str,
    ) -> Result<HashSet<Uuid>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .dues
            .iter()
            .filter(|d| d.plan_id == plan_id && d.period == period)
            .map(|d| d.member_id)
            .collect())
    }

    async fn insert_assigned_due(&self, due: &NewAssignedDue) -> Result<DueInsert, AppError> {
        let mut state = self.state.write().await;
        let duplicate = state.dues.iter().any(|d| {
            (d.member_id == due.member_id && d.plan_id == due.plan_id && d.period == due.period)
                || d.reference == due.reference
        });
        if duplicate {
            return Ok(DueInsert::Duplicate);
        }
        if !state.members.iter().any(|m| m.member_id == due.member_id) {
            return Err(LedgerError::MemberNotFound(due.member_id).into());
        }

        let now = Utc::now();
        let inserted = AssignedDue {
            assigned_due_id: Uuid::new_v4(),
            member_id: due.member_id,
            plan_id: due.plan_id,
            category_id: due.category_id,
            assessment_id: due.assessment_id,
            amount: due.amount,
            currency: due.currency.clone(),
            period: due.period.clone(),
            period_start: due.period_start,
            period_end: due.period_end,
            due_date: due.due_date,
            status: DueStatus::Pending.as_str().to_string(),
            reference: due.reference.clone(),
            notes: due.notes.clone(),
            waived_reason: None,
            created_utc: now,
            updated_utc: now,
        };
        state.dues.push(inserted.clone());
        Ok(DueInsert::Inserted(inserted))
    }

    async fn get_assigned_due(
        &self,
        assigned_due_id: Uuid,
    ) -> Result<Option<AssignedDue>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .dues
            .iter()
            .find(|d| d.assigned_due_id == assigned_due_id)
            .cloned())
    }

    async fn list_assigned_dues(
        &self,
        filter: &ListDuesFilter,
    ) -> Result<Vec<AssignedDue>, AppError> {
        let state = self.state.read().await;
        let mut dues: Vec<AssignedDue> = state
            .dues
            .iter()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        dues.sort_by(|a, b| {
            a.period_start
                .cmp(&b.period_start)
                .then_with(|| a.reference.cmp(&b.reference))
        });
        Ok(dues)
    }

    async fn list_assigned_due_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let state = self.state.read().await;
        Ok(state.dues.iter().map(|d| d.assigned_due_id).collect())
    }

    #[instrument(skip(self, reason))]
    async fn waive_assigned_due(
        &self,
        assigned_due_id: Uuid,
        reason: &str,
    ) -> Result<AssignedDue, AppError> {
        let mut state = self.state.write().await;
        let idx = state
            .dues
            .iter()
            .position(|d| d.assigned_due_id == assigned_due_id)
            .ok_or(LedgerError::AssignedDueNotFound(assigned_due_id))?;

        let due = &state.dues[idx];
        let status = derive_status(due, due_paid_amount(due, &state.payments));
        if matches!(status, DueStatus::Paid | DueStatus::Waived) {
            return Err(LedgerError::WaiveNotAllowed(status).into());
        }
        let member_id = due.member_id;

        let due = &mut state.dues[idx];
        due.status = DueStatus::Waived.as_str().to_string();
        due.waived_reason = Some(reason.to_string());
        due.updated_utc = Utc::now();
        let waived = due.clone();

        state.refresh_member_balance(member_id, &self.base_currency)?;
        info!(assigned_due_id = %assigned_due_id, "Assigned due waived");
        Ok(waived)
    }

    async fn record_assessment(&self, assessment: &NewAssessment) -> Result<Assessment, AppError> {
        let mut state = self.state.write().await;
        let record = Assessment {
            assessment_id: assessment.assessment_id,
            plan_id: assessment.plan_id,
            period: assessment.period.clone(),
            target_type: assessment.target_type.as_str().to_string(),
            target_category_id: assessment.target_category_id,
            member_ids: assessment.member_ids.clone(),
            assigned_count: assessment.assigned_count,
            skipped_count: assessment.skipped_count,
            interrupted: assessment.interrupted,
            actor: assessment.actor.clone(),
            created_utc: Utc::now(),
        };
        state.assessments.push(record.clone());
        Ok(record)
    }

    async fn list_assessments(&self, plan_id: Option<Uuid>) -> Result<Vec<Assessment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .assessments
            .iter()
            .filter(|a| plan_id.map_or(true, |id| a.plan_id == id))
            .cloned()
            .collect())
    }

    #[instrument(skip(self, payment), fields(member_id = %payment.member_id))]
    async fn record_payment(&self, payment: &NewPayment) -> Result<RecordedPayment, AppError> {
        let mut state = self.state.write().await;
        if let Some(due_id) = payment.assigned_due_id {
            if !state.dues.iter().any(|d| d.assigned_due_id == due_id) {
                return Err(LedgerError::AssignedDueNotFound(due_id).into());
            }
        }

        let recorded = Payment {
            payment_id: Uuid::new_v4(),
            member_id: payment.member_id,
            plan_id: payment.plan_id,
            assigned_due_id: payment.assigned_due_id,
            amount: payment.amount,
            currency: payment.currency.clone(),
            method: payment.method.as_str().to_string(),
            paid_at: payment.paid_at,
            reference: payment.reference.clone(),
            description: payment.description.clone(),
            recorded_by: payment.recorded_by.clone(),
            created_utc: Utc::now(),
        };
        state.payments.push(recorded.clone());

        let due_sync = match payment.assigned_due_id {
            None => DueSync::Unlinked,
            Some(due_id) => match state.sync_due(due_id, &self.base_currency) {
                Ok(outcome) => DueSync::Applied(outcome),
                Err(e) => {
                    warn!(
                        payment_id = %recorded.payment_id,
                        assigned_due_id = %due_id,
                        error = %e,
                        "Status sync failed; payment kept"
                    );
                    DueSync::Deferred(e.to_string())
                }
            },
        };

        Ok(RecordedPayment {
            payment: recorded,
            due_sync,
        })
    }

    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let state = self.state.read().await;
        Ok(state
            .payments
            .iter()
            .find(|p| p.payment_id == payment_id)
            .cloned())
    }

    async fn list_payments(&self, filter: &ListPaymentsFilter) -> Result<Vec<Payment>, AppError> {
        let state = self.state.read().await;
        let mut payments: Vec<Payment> = state
            .payments
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        payments.sort_by(|a, b| {
            a.paid_at
                .cmp(&b.paid_at)
                .then_with(|| a.created_utc.cmp(&b.created_utc))
        });
        Ok(payments)
    }

    async fn sync_due_status(&self, assigned_due_id: Uuid) -> Result<SyncOutcome, AppError> {
        let mut state = self.state.write().await;
        state.sync_due(assigned_due_id, &self.base_currency)
    }
}
