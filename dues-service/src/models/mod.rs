//! Domain models for dues-service.

mod assessment;
mod assigned_due;
mod member;
mod payment;
mod plan;

pub use assessment::{Assessment, NewAssessment, TargetType};
pub use assigned_due::{AssignedDue, DueStatus, ListDuesFilter, NewAssignedDue};
pub use member::{Category, CreateCategory, CreateMember, Member, MemberStatus};
pub use payment::{ListPaymentsFilter, NewPayment, Payment, PaymentMethod};
pub use plan::{BillingCycle, CreatePlan, DuesPlan, ListPlansFilter, UpdatePlan};

#[cfg(test)]
pub(crate) mod test_support {
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Run `f` under a subscriber that keeps its log output.
    pub fn captured_logs(f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let writer = buffer.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }
}
