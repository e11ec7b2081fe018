pub mod assessments;
pub mod categories;
pub mod dues;
pub mod health;
pub mod maintenance;
pub mod members;
pub mod payments;
pub mod plans;

pub use assessments::{create_assessment, list_assessments};
pub use categories::{create_category, list_categories};
pub use dues::{get_assigned_due, list_assigned_dues, sync_assigned_due, waive_assigned_due};
pub use health::{health_check, metrics_handler, readiness_check};
pub use maintenance::{outstanding_report, reconcile};
pub use members::{
    create_member, delete_member, get_member, list_members, member_balance, update_member_status,
};
pub use payments::{get_payment, list_payments, record_payment};
pub use plans::{create_plan, get_plan, list_plans, update_plan};
