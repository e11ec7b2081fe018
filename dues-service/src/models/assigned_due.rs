//! Assigned due model: one member's obligation for one plan in one period.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Settlement status of an assigned due.
///
/// `Pending`, `Partial` and `Paid` are always derived from the payment ledger.
/// `Waived` is an administrative terminal state that derivation never overrides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DueStatus {
    Pending,
    Partial,
    Paid,
    Waived,
}

impl DueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DueStatus::Pending => "PENDING",
            DueStatus::Partial => "PARTIAL",
            DueStatus::Paid => "PAID",
            DueStatus::Waived => "WAIVED",
        }
    }

    /// Parse a stored status. Unknown values are logged and read as `Pending`,
    /// which the next status sync corrects from the payments.
    pub fn from_string(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            tracing::warn!(status = s, "Unknown stored due status, reading as PENDING");
            DueStatus::Pending
        })
    }

    /// Whether the due still contributes to a member's outstanding balance.
    pub fn is_open(&self) -> bool {
        matches!(self, DueStatus::Pending | DueStatus::Partial)
    }
}

impl FromStr for DueStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PENDING" => Ok(DueStatus::Pending),
            "PARTIAL" => Ok(DueStatus::Partial),
            "PAID" => Ok(DueStatus::Paid),
            "WAIVED" => Ok(DueStatus::Waived),
            other => Err(format!("unknown due status '{}'", other)),
        }
    }
}

impl fmt::Display for DueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted assigned due. `amount`, `currency` and `category_id` are
/// snapshots taken at assessment time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AssignedDue {
    pub assigned_due_id: Uuid,
    pub member_id: Uuid,
    pub plan_id: Uuid,
    pub category_id: Option<Uuid>,
    pub assessment_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub period: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub status: String,
    pub reference: String,
    pub notes: Option<String>,
    pub waived_reason: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl AssignedDue {
    pub fn due_status(&self) -> DueStatus {
        DueStatus::from_string(&self.status)
    }

    pub fn is_waived(&self) -> bool {
        self.due_status() == DueStatus::Waived
    }
}

/// Draft produced by the assessment engine, inserted as a PENDING due.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAssignedDue {
    pub member_id: Uuid,
    pub plan_id: Uuid,
    pub category_id: Option<Uuid>,
    pub assessment_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub period: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub due_date: NaiveDate,
    pub reference: String,
    pub notes: Option<String>,
}

/// Filter parameters for listing assigned dues.
#[derive(Debug, Clone, Default)]
pub struct ListDuesFilter {
    pub member_id: Option<Uuid>,
    pub plan_id: Option<Uuid>,
    pub status: Option<DueStatus>,
    pub period: Option<String>,
}

impl ListDuesFilter {
    pub fn matches(&self, due: &AssignedDue) -> bool {
        self.member_id.map_or(true, |id| due.member_id == id)
            && self.plan_id.map_or(true, |id| due.plan_id == id)
            && self.status.map_or(true, |s| due.due_status() == s)
            && self.period.as_deref().map_or(true, |p| due.period == p)
    }
}
