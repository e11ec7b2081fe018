//! Services module for dues-service.

pub mod database;
pub mod ledger;
pub mod memory;
pub mod metrics;
pub mod store;
pub mod sweep;

pub use database::Database;
pub use ledger::{
    AssessCommand, AssessmentReport, DueDetail, LedgerService, MemberBalance, OutstandingEntry,
    RecordPaymentCommand, SweepReport, TargetSelector,
};
pub use memory::MemoryStore;
pub use metrics::{get_metrics, init_metrics};
pub use store::{DueInsert, DueSync, LedgerStore, RecordedPayment, SyncOutcome};
pub use sweep::spawn_sweeper;
