//! Member directory models.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Membership standing, as maintained by member management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Active,
    Pending,
    Prospect,
    Inactive,
    Suspended,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "ACTIVE",
            MemberStatus::Pending => "PENDING",
            MemberStatus::Prospect => "PROSPECT",
            MemberStatus::Inactive => "INACTIVE",
            MemberStatus::Suspended => "SUSPENDED",
        }
    }

    /// Unknown stored values are logged and read as `Inactive`, which is never
    /// assessed.
    pub fn from_string(s: &str) -> Self {
        s.parse().unwrap_or_else(|_| {
            tracing::warn!(status = s, "Unknown stored member status, reading as INACTIVE");
            MemberStatus::Inactive
        })
    }
}

impl FromStr for MemberStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(MemberStatus::Active),
            "PENDING" => Ok(MemberStatus::Pending),
            "PROSPECT" => Ok(MemberStatus::Prospect),
            "INACTIVE" => Ok(MemberStatus::Inactive),
            "SUSPENDED" => Ok(MemberStatus::Suspended),
            other => Err(format!("unknown member status '{}'", other)),
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Membership category (closed reference table).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Category {
    pub category_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_utc: DateTime<Utc>,
}

/// Club member. `outstanding_balance` is a cache refreshed by the status
/// synchronizer; balance reads derive the figure from the ledger instead.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Member {
    pub member_id: Uuid,
    pub member_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub category_id: Option<Uuid>,
    pub status: String,
    pub outstanding_balance: Decimal,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Member {
    pub fn member_status(&self) -> MemberStatus {
        MemberStatus::from_string(&self.status)
    }
}

/// Input for creating a category.
#[derive(Debug, Clone)]
pub struct CreateCategory {
    pub name: String,
    pub description: Option<String>,
}

/// Input for registering a member.
#[derive(Debug, Clone)]
pub struct CreateMember {
    pub member_number: String,
    pub full_name: String,
    pub email: Option<String>,
    pub category_id: Option<Uuid>,
    pub status: MemberStatus,
}
