//! Payment model. Payments are append-only facts.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

/// How the payment was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    MobileMoney,
    Card,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "CASH",
            PaymentMethod::BankTransfer => "BANK_TRANSFER",
            PaymentMethod::MobileMoney => "MOBILE_MONEY",
            PaymentMethod::Card => "CARD",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CASH" => Ok(PaymentMethod::Cash),
            "BANK_TRANSFER" => Ok(PaymentMethod::BankTransfer),
            "MOBILE_MONEY" => Ok(PaymentMethod::MobileMoney),
            "CARD" => Ok(PaymentMethod::Card),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Payment {
    pub payment_id: Uuid,
    pub member_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub assigned_due_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub paid_at: NaiveDate,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub recorded_by: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Validated input for appending a payment.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub member_id: Uuid,
    pub plan_id: Option<Uuid>,
    pub assigned_due_id: Option<Uuid>,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub paid_at: NaiveDate,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub recorded_by: Option<String>,
}

/// Filter parameters for listing payments.
#[derive(Debug, Clone, Default)]
pub struct ListPaymentsFilter {
    pub member_id: Option<Uuid>,
    pub assigned_due_id: Option<Uuid>,
}

impl ListPaymentsFilter {
    pub fn matches(&self, payment: &Payment) -> bool {
        self.member_id.map_or(true, |id| payment.member_id == id)
            && self
                .assigned_due_id
                .map_or(true, |id| payment.assigned_due_id == Some(id))
    }
}
