//! Request and response bodies.

use crate::ledger::LedgerError;
use crate::models::{
    BillingCycle, DueStatus, ListDuesFilter, ListPaymentsFilter, ListPlansFilter, MemberStatus,
    Payment, PaymentMethod, TargetType,
};
use crate::services::{
    AssessCommand, DueSync, RecordPaymentCommand, RecordedPayment, SyncOutcome, TargetSelector,
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

// ============================================================================
// Categories and members
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCategoryRequest {
    #[validate(length(min = 1, max = 100, message = "Category name must be 1-100 characters"))]
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateMemberRequest {
    #[validate(length(min = 1, max = 50, message = "Member number must be 1-50 characters"))]
    pub member_number: String,
    #[validate(length(min = 1, message = "Full name cannot be empty"))]
    pub full_name: String,
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,
    pub category_id: Option<Uuid>,
    #[serde(default = "default_member_status")]
    pub status: MemberStatus,
}

fn default_member_status() -> MemberStatus {
    MemberStatus::Active
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberStatusRequest {
    pub status: MemberStatus,
}

// ============================================================================
// Plans
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct CreatePlanRequest {
    #[validate(length(min = 1, max = 50, message = "Plan code must be 1-50 characters"))]
    pub code: String,
    #[validate(length(min = 1, message = "Plan name cannot be empty"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(required(message = "amount is required"))]
    pub amount: Option<Decimal>,
    /// Defaults to the ledger base currency.
    pub currency: Option<String>,
    #[serde(default = "default_billing_cycle")]
    pub billing_cycle: BillingCycle,
    pub category_id: Option<Uuid>,
}

fn default_billing_cycle() -> BillingCycle {
    BillingCycle::OneTime
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdatePlanRequest {
    #[validate(length(min = 1, message = "Plan name cannot be empty"))]
    pub name: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPlansQuery {
    pub active: Option<bool>,
    pub category_id: Option<Uuid>,
}

impl From<ListPlansQuery> for ListPlansFilter {
    fn from(query: ListPlansQuery) -> Self {
        Self {
            active: query.active,
            category_id: query.category_id,
        }
    }
}

// ============================================================================
// Assessments
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct AssessRequest {
    #[validate(required(message = "plan_id is required"))]
    pub plan_id: Option<Uuid>,
    #[validate(
        required(message = "period is required"),
        length(min = 1, message = "period cannot be empty")
    )]
    pub period: Option<String>,
    #[validate(required(message = "target_type is required"))]
    pub target_type: Option<TargetType>,
    pub target_category: Option<String>,
    pub member_ids: Option<Vec<Uuid>>,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl AssessRequest {
    pub fn into_command(self, actor: Option<String>) -> Result<AssessCommand, AppError> {
        let plan_id = self.plan_id.ok_or(LedgerError::MissingField("plan_id"))?;
        let period = self
            .period
            .filter(|p| !p.trim().is_empty())
            .ok_or(LedgerError::MissingField("period"))?;

        let target = match self.target_type.ok_or(LedgerError::MissingField("target_type"))? {
            TargetType::Category => TargetSelector::Category(
                self.target_category
                    .filter(|c| !c.trim().is_empty())
                    .ok_or(LedgerError::MissingField("target_category"))?,
            ),
            TargetType::Individual => TargetSelector::Individual(
                self.member_ids
                    .filter(|ids| !ids.is_empty())
                    .ok_or(LedgerError::MissingField("member_ids"))?,
            ),
        };

        Ok(AssessCommand {
            plan_id,
            period,
            target,
            due_date: self.due_date,
            notes: self.notes,
            actor,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListAssessmentsQuery {
    pub plan_id: Option<Uuid>,
}

// ============================================================================
// Payments
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    #[validate(required(message = "member_id is required"))]
    pub member_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub assigned_due_id: Option<Uuid>,
    #[validate(required(message = "amount is required"))]
    pub amount: Option<Decimal>,
    /// Defaults to the day the payment is recorded.
    pub paid_at: Option<NaiveDate>,
    #[validate(required(message = "method is required"))]
    pub method: Option<PaymentMethod>,
    #[validate(length(max = 100, message = "Reference must be at most 100 characters"))]
    pub reference: Option<String>,
    pub currency: Option<String>,
    pub description: Option<String>,
}

impl RecordPaymentRequest {
    pub fn into_command(self, recorded_by: Option<String>) -> Result<RecordPaymentCommand, AppError> {
        Ok(RecordPaymentCommand {
            member_id: self.member_id.ok_or(LedgerError::MissingField("member_id"))?,
            plan_id: self.plan_id,
            assigned_due_id: self.assigned_due_id,
            amount: self.amount.ok_or(LedgerError::MissingField("amount"))?,
            currency: self.currency,
            method: self.method.ok_or(LedgerError::MissingField("method"))?,
            paid_at: self.paid_at,
            reference: self.reference,
            description: self.description,
            recorded_by,
        })
    }
}

/// A recorded payment together with what happened to its due.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    #[serde(flatten)]
    pub payment: Payment,
    /// Status of the linked due after the sync, if one ran.
    pub due_status: Option<DueStatus>,
    pub status_synced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

impl From<RecordedPayment> for PaymentResponse {
    fn from(recorded: RecordedPayment) -> Self {
        let (due_status, status_synced, sync_error) = match recorded.due_sync {
            DueSync::Unlinked => (None, false, None),
            DueSync::Applied(outcome) => (Some(outcome.current), true, None),
            DueSync::Deferred(reason) => (None, false, Some(reason)),
        };
        Self {
            payment: recorded.payment,
            due_status,
            status_synced,
            sync_error,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListPaymentsQuery {
    pub member_id: Option<Uuid>,
    pub assigned_due_id: Option<Uuid>,
}

impl From<ListPaymentsQuery> for ListPaymentsFilter {
    fn from(query: ListPaymentsQuery) -> Self {
        Self {
            member_id: query.member_id,
            assigned_due_id: query.assigned_due_id,
        }
    }
}

// ============================================================================
// Assigned dues
// ============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct ListDuesQuery {
    pub member_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub status: Option<String>,
    pub period: Option<String>,
}

impl TryFrom<ListDuesQuery> for ListDuesFilter {
    type Error = AppError;

    fn try_from(query: ListDuesQuery) -> Result<Self, Self::Error> {
        let status = query
            .status
            .as_deref()
            .map(str::parse::<DueStatus>)
            .transpose()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!(e)))?;

        Ok(Self {
            member_id: query.member_id,
            plan_id: query.plan_id,
            status,
            period: query.period,
        })
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct WaiveDueRequest {
    #[validate(length(min = 1, max = 500, message = "Reason must be 1-500 characters"))]
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct SyncResponse {
    #[serde(flatten)]
    pub outcome: SyncOutcome,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_target_requires_a_name() {
        let request = AssessRequest {
            plan_id: Some(Uuid::new_v4()),
            period: Some("2024-Q4".to_string()),
            target_type: Some(TargetType::Category),
            target_category: None,
            member_ids: None,
            due_date: None,
            notes: None,
        };
        assert!(request.validate().is_ok());
        let err = request.into_command(None).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn missing_plan_and_period_fail_validation() {
        let request: AssessRequest =
            serde_json::from_str(r#"{"target_type": "INDIVIDUAL", "member_ids": []}"#).unwrap();
        let errors = request.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("plan_id"));
        assert!(fields.contains_key("period"));
    }

    #[test]
    fn unknown_status_filter_is_a_bad_request() {
        let query = ListDuesQuery {
            status: Some("OVERDUE".to_string()),
            ..ListDuesQuery::default()
        };
        assert!(ListDuesFilter::try_from(query).is_err());

        let query = ListDuesQuery {
            status: Some("partial".to_string()),
            ..ListDuesQuery::default()
        };
        let filter = ListDuesFilter::try_from(query).unwrap();
        assert_eq!(filter.status, Some(DueStatus::Partial));
    }

    #[test]
    fn deferred_sync_is_reported() {
        let payment: Payment = serde_json::from_value(serde_json::json!({
            "payment_id": Uuid::new_v4(),
            "member_id": Uuid::new_v4(),
            "plan_id": null,
            "assigned_due_id": Uuid::new_v4(),
            "amount": "10.00",
            "currency": "GHS",
            "method": "CASH",
            "paid_at": "2024-10-05",
            "reference": null,
            "description": null,
            "recorded_by": null,
            "created_utc": "2024-10-05T10:00:00Z"
        }))
        .unwrap();
        let response = PaymentResponse::from(RecordedPayment {
            payment,
            due_sync: DueSync::Deferred("connection reset".to_string()),
        });
        assert!(!response.status_synced);
        assert_eq!(response.sync_error.as_deref(), Some("connection reset"));
    }
}
