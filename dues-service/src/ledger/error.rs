//! Ledger rule violations and their mapping onto HTTP-facing errors.

use crate::models::DueStatus;
use rust_decimal::Decimal;
use service_core::error::AppError;
use std::borrow::Cow;
use thiserror::Error;
use uuid::Uuid;
use validator::{ValidationError, ValidationErrors};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be above zero and below 10^12 with at most two decimal places, got {0}")]
    InvalidAmount(Decimal),

    #[error("plan amount must not be negative, got {0}")]
    NegativePlanAmount(Decimal),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("invalid period '{0}': expected YYYY, YYYY-MM, YYYY-Qn or YYYY-MM-DD")]
    InvalidPeriod(String),

    #[error("invalid currency '{0}': expected a three-letter ISO code")]
    InvalidCurrency(String),

    #[error("Member {0} not found")]
    MemberNotFound(Uuid),

    #[error("Plan {0} not found")]
    PlanNotFound(Uuid),

    #[error("no category named '{0}' to assess")]
    UnknownTargetCategory(String),

    #[error("Assigned due {0} not found")]
    AssignedDueNotFound(Uuid),

    #[error("Assigned due {assigned_due_id} does not belong to member {member_id}")]
    MismatchedAssignedDue {
        assigned_due_id: Uuid,
        member_id: Uuid,
    },

    #[error("Assigned due {assigned_due_id} was assessed under a different plan than {plan_id}")]
    MismatchedPlan { assigned_due_id: Uuid, plan_id: Uuid },

    #[error("Payment currency {actual} does not match due currency {expected}")]
    CurrencyMismatch { expected: String, actual: String },

    #[error("Plan {0} is not active")]
    PlanInactive(String),

    #[error("Plan {0} has a zero amount and cannot be assessed")]
    ZeroAmountPlan(String),

    #[error("No eligible members matched the assessment target")]
    NoTargetMembers,

    #[error("Member {0} still has assigned dues or payments")]
    MemberHasLedgerEntries(Uuid),

    #[error("Assigned due cannot be waived while {0}")]
    WaiveNotAllowed(DueStatus),
}

fn field_error(field: &'static str, code: &'static str, message: String) -> ValidationErrors {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Owned(message));
    let mut errors = ValidationErrors::new();
    errors.add(field, error);
    errors
}

impl From<LedgerError> for AppError {
    fn from(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InvalidAmount(_) => {
                AppError::ValidationError(field_error("amount", "invalid_amount", message))
            }
            LedgerError::NegativePlanAmount(_) => {
                AppError::ValidationError(field_error("amount", "negative_amount", message))
            }
            LedgerError::MissingField(field) => {
                AppError::ValidationError(field_error(field, "required", message))
            }
            LedgerError::InvalidPeriod(_) => {
                AppError::ValidationError(field_error("period", "invalid_period", message))
            }
            LedgerError::InvalidCurrency(_) => {
                AppError::ValidationError(field_error("currency", "invalid_currency", message))
            }
            LedgerError::UnknownTargetCategory(_) => AppError::ValidationError(field_error(
                "target_category",
                "unknown_category",
                message,
            )),
            LedgerError::MemberNotFound(_)
            | LedgerError::PlanNotFound(_)
            | LedgerError::AssignedDueNotFound(_) => AppError::NotFound(anyhow::anyhow!(message)),
            LedgerError::MismatchedAssignedDue { .. }
            | LedgerError::MismatchedPlan { .. }
            | LedgerError::CurrencyMismatch { .. }
            | LedgerError::PlanInactive(_)
            | LedgerError::ZeroAmountPlan(_)
            | LedgerError::NoTargetMembers => AppError::BadRequest(anyhow::anyhow!(message)),
            LedgerError::MemberHasLedgerEntries(_) | LedgerError::WaiveNotAllowed(_) => {
                AppError::Conflict(anyhow::anyhow!(message))
            }
        }
    }
}

/// Validate a currency code: three ASCII letters, normalised to upper case.
pub fn normalize_currency(currency: &str) -> Result<String, LedgerError> {
    let trimmed = currency.trim();
    if trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        Ok(trimmed.to_ascii_uppercase())
    } else {
        Err(LedgerError::InvalidCurrency(currency.to_string()))
    }
}

/// Exclusive upper bound on any single amount; money columns are `NUMERIC(14, 2)`.
pub const MAX_AMOUNT: Decimal = Decimal::from_parts(3_567_587_328, 232, 0, false, 0);

/// Payment amounts: strictly positive, at most two decimal places.
pub fn validate_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount <= Decimal::ZERO || amount >= MAX_AMOUNT || amount.normalize().scale() > 2 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(amount)
}

/// Plan amounts may be zero (such plans cannot be assessed) but never negative.
pub fn validate_plan_amount(amount: Decimal) -> Result<Decimal, LedgerError> {
    if amount < Decimal::ZERO {
        return Err(LedgerError::NegativePlanAmount(amount));
    }
    if amount >= MAX_AMOUNT || amount.normalize().scale() > 2 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(amount)
}
