//! Assessment audit record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// How an assessment selects its members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    Category,
    Individual,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Category => "CATEGORY",
            TargetType::Individual => "INDIVIDUAL",
        }
    }
}

/// One bulk-assessment run, kept for audit. The dues it produced remain the
/// canonical state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Assessment {
    pub assessment_id: Uuid,
    pub plan_id: Uuid,
    pub period: String,
    pub target_type: String,
    pub target_category_id: Option<Uuid>,
    pub member_ids: Vec<Uuid>,
    pub assigned_count: i32,
    pub skipped_count: i32,
    pub interrupted: bool,
    pub actor: Option<String>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAssessment {
    pub assessment_id: Uuid,
    pub plan_id: Uuid,
    pub period: String,
    pub target_type: TargetType,
    pub target_category_id: Option<Uuid>,
    pub member_ids: Vec<Uuid>,
    pub assigned_count: i32,
    pub skipped_count: i32,
    pub interrupted: bool,
    pub actor: Option<String>,
}
