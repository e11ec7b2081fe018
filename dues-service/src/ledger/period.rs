//! Period tokens.
//!
//! A period is an opaque label ("2025", "2025-09", "2024-Q4", "2025-09-15")
//! that only matters for deriving the covered date window. The token itself is
//! kept verbatim on the due and in its reference.

use super::LedgerError;
use crate::models::BillingCycle;
use chrono::{Months, NaiveDate};

/// Inclusive date window covered by a period token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodWindow {
    fn spanning_months(start: NaiveDate, months: u32) -> Option<Self> {
        let end = start.checked_add_months(Months::new(months))?.pred_opt()?;
        Some(Self { start, end })
    }
}

/// Derive the window for `token`. Full dates are treated as a start date and
/// span one billing cycle (a single day for one-time plans).
pub fn parse_period(token: &str, cycle: BillingCycle) -> Result<PeriodWindow, LedgerError> {
    let invalid = || LedgerError::InvalidPeriod(token.to_string());
    let token = token.trim();
    let parts: Vec<&str> = token.split('-').collect();

    let year = parts
        .first()
        .filter(|y| y.len() == 4)
        .and_then(|y| y.parse::<i32>().ok())
        .ok_or_else(invalid)?;

    let window = match parts.as_slice() {
        [_] => {
            let start = NaiveDate::from_ymd_opt(year, 1, 1).ok_or_else(invalid)?;
            PeriodWindow::spanning_months(start, 12)
        }
        [_, q] if q.len() == 2 && (q.starts_with('Q') || q.starts_with('q')) => {
            let quarter = q[1..].parse::<u32>().ok().filter(|n| (1..=4).contains(n));
            let quarter = quarter.ok_or_else(invalid)?;
            let start = NaiveDate::from_ymd_opt(year, (quarter - 1) * 3 + 1, 1).ok_or_else(invalid)?;
            PeriodWindow::spanning_months(start, 3)
        }
        [_, m] if m.len() == 2 => {
            let month = m.parse::<u32>().map_err(|_| invalid())?;
            let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
            PeriodWindow::spanning_months(start, 1)
        }
        [_, m, d] if m.len() == 2 && d.len() == 2 => {
            let month = m.parse::<u32>().map_err(|_| invalid())?;
            let day = d.parse::<u32>().map_err(|_| invalid())?;
            let start = NaiveDate::from_ymd_opt(year, month, day).ok_or_else(invalid)?;
            match cycle.months() {
                Some(months) => PeriodWindow::spanning_months(start, months),
                None => Some(PeriodWindow { start, end: start }),
            }
        }
        _ => None,
    };

    window.ok_or_else(invalid)
}
