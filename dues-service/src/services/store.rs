//! Persistence seam for the dues ledger.
//!
//! Two backends implement [`LedgerStore`]: [`crate::services::Database`] on
//! PostgreSQL and [`crate::services::MemoryStore`] for local runs and tests.
//! Both honour the same contract:
//!
//! - assigned dues are unique per (member, plan, period) and per reference;
//! - payments are append-only;
//! - a payment and the status sync it triggers commit together, except that a
//!   failed sync never discards the payment (the due is left for the sweep).

use crate::models::{
    Assessment, AssignedDue, Category, CreateCategory, CreateMember, CreatePlan, DueStatus,
    DuesPlan, ListDuesFilter, ListPaymentsFilter, ListPlansFilter, Member, MemberStatus,
    NewAssessment, NewAssignedDue, NewPayment, Payment, UpdatePlan,
};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use service_core::error::AppError;
use std::collections::HashSet;
use uuid::Uuid;

/// Result of inserting one assessed due.
#[derive(Debug, Clone)]
pub enum DueInsert {
    Inserted(AssignedDue),
    /// A due for the same member, plan and period (or reference) already exists.
    Duplicate,
}

/// What the status synchronizer did to one due.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub assigned_due_id: Uuid,
    pub member_id: Uuid,
    pub previous: DueStatus,
    pub current: DueStatus,
    pub paid_amount: Decimal,
    pub changed: bool,
}

/// Status sync triggered by a payment.
#[derive(Debug, Clone)]
pub enum DueSync {
    /// The payment is not linked to a due.
    Unlinked,
    Applied(SyncOutcome),
    /// The payment was kept but the status write failed; the sweep repairs it.
    Deferred(String),
}

#[derive(Debug, Clone)]
pub struct RecordedPayment {
    pub payment: Payment,
    pub due_sync: DueSync,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn health_check(&self) -> Result<(), AppError>;

    // Categories
    async fn create_category(&self, input: &CreateCategory) -> Result<Category, AppError>;
    async fn list_categories(&self) -> Result<Vec<Category>, AppError>;
    async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>, AppError>;

    // Members
    async fn create_member(&self, input: &CreateMember) -> Result<Member, AppError>;
    async fn get_member(&self, member_id: Uuid) -> Result<Option<Member>, AppError>;
    async fn get_members(&self, member_ids: &[Uuid]) -> Result<Vec<Member>, AppError>;
    async fn list_members_in_category(&self, category_id: Uuid) -> Result<Vec<Member>, AppError>;
    async fn list_members(&self) -> Result<Vec<Member>, AppError>;
    async fn update_member_status(
        &self,
        member_id: Uuid,
        status: MemberStatus,
    ) -> Result<Option<Member>, AppError>;
    /// Returns `false` when the member does not exist. Members with dues or
    /// payments cannot be deleted.
    async fn delete_member(&self, member_id: Uuid) -> Result<bool, AppError>;

    // Plans
    async fn create_plan(&self, input: &CreatePlan) -> Result<DuesPlan, AppError>;
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<DuesPlan>, AppError>;
    async fn list_plans(&self, filter: &ListPlansFilter) -> Result<Vec<DuesPlan>, AppError>;
    async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<DuesPlan>, AppError>;

    // Assigned dues
    async fn assessed_member_ids(
        &self,
        plan_id: Uuid,
        period: &str,
    ) -> Result<HashSet<Uuid>, AppError>;
    async fn insert_assigned_due(&self, due: &NewAssignedDue) -> Result<DueInsert, AppError>;
    async fn get_assigned_due(&self, assigned_due_id: Uuid)
        -> Result<Option<AssignedDue>, AppError>;
    async fn list_assigned_dues(
        &self,
        filter: &ListDuesFilter,
    ) -> Result<Vec<AssignedDue>, AppError>;
    async fn list_assigned_due_ids(&self) -> Result<Vec<Uuid>, AppError>;
    /// Move a due to WAIVED. Fails with a conflict when the due is already
    /// settled or waived.
    async fn waive_assigned_due(
        &self,
        assigned_due_id: Uuid,
        reason: &str,
    ) -> Result<AssignedDue, AppError>;

    // Assessment audit
    async fn record_assessment(&self, assessment: &NewAssessment) -> Result<Assessment, AppError>;
    async fn list_assessments(&self, plan_id: Option<Uuid>) -> Result<Vec<Assessment>, AppError>;

    // Payments
    async fn record_payment(&self, payment: &NewPayment) -> Result<RecordedPayment, AppError>;
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError>;
    async fn list_payments(&self, filter: &ListPaymentsFilter) -> Result<Vec<Payment>, AppError>;

    /// Recompute one due's status from its payments, persist it when it
    /// differs and refresh the owning member's cached balance.
    async fn sync_due_status(&self, assigned_due_id: Uuid) -> Result<SyncOutcome, AppError>;
}
