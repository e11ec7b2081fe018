//! Dues plan catalog model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// How often a plan is meant to be assessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillingCycle {
    OneTime,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::OneTime => "ONE_TIME",
            BillingCycle::Monthly => "MONTHLY",
            BillingCycle::Quarterly => "QUARTERLY",
            BillingCycle::Yearly => "YEARLY",
        }
    }

    pub fn from_string(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            tracing::warn!(cycle = s, "Unknown stored billing cycle, reading as ONE_TIME");
            BillingCycle::OneTime
        })
    }

    /// Length of one cycle in months; `None` for one-time plans.
    pub fn months(&self) -> Option<u32> {
        match self {
            BillingCycle::OneTime => None,
            BillingCycle::Monthly => Some(1),
            BillingCycle::Quarterly => Some(3),
            BillingCycle::Yearly => Some(12),
        }
    }
}

impl FromStr for BillingCycle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ONE_TIME" => Ok(BillingCycle::OneTime),
            "MONTHLY" => Ok(BillingCycle::Monthly),
            "QUARTERLY" => Ok(BillingCycle::Quarterly),
            "YEARLY" => Ok(BillingCycle::Yearly),
            other => Err(format!("unknown billing cycle '{}'", other)),
        }
    }
}

/// Dues plan (billing template).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct DuesPlan {
    pub plan_id: Uuid,
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: String,
    pub category_id: Option<Uuid>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl DuesPlan {
    pub fn cycle(&self) -> BillingCycle {
        BillingCycle::from_string(&self.billing_cycle)
    }
}

/// Input for creating a plan.
#[derive(Debug, Clone)]
pub struct CreatePlan {
    pub code: String,
    pub name: String,
    pub description: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub billing_cycle: BillingCycle,
    pub category_id: Option<Uuid>,
}

/// Input for updating a plan. Amount changes never touch assigned dues.
#[derive(Debug, Clone, Default)]
pub struct UpdatePlan {
    pub name: Option<String>,
    pub description: Option<String>,
    pub amount: Option<Decimal>,
    pub is_active: Option<bool>,
}

/// Filter parameters for listing plans.
#[derive(Debug, Clone, Default)]
pub struct ListPlansFilter {
    pub active: Option<bool>,
    pub category_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::test_support::captured_logs;

    #[test]
    fn cycles_read_back_from_storage() {
        assert_eq!(BillingCycle::from_string("QUARTERLY"), BillingCycle::Quarterly);
        assert_eq!(BillingCycle::Quarterly.months(), Some(3));

        let logs = captured_logs(|| {
            assert_eq!(BillingCycle::from_string("FORTNIGHTLY"), BillingCycle::OneTime);
        });
        assert!(logs.contains("Unknown stored billing cycle"));
    }
}
