//! PostgreSQL ledger store.

use crate::ledger::{derive_status, member_outstanding_balance, money, LedgerError};
use crate::models::{
    Assessment, AssignedDue, Category, CreateCategory, CreateMember, CreatePlan, DueStatus,
    DuesPlan, ListDuesFilter, ListPaymentsFilter, ListPlansFilter, Member, MemberStatus,
    NewAssessment, NewAssignedDue, NewPayment, Payment, UpdatePlan,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{DueInsert, DueSync, LedgerStore, RecordedPayment, SyncOutcome};
use async_trait::async_trait;
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Acquire;
use std::collections::HashSet;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

const CATEGORY_COLUMNS: &str = "category_id, name, description, created_utc";

const MEMBER_COLUMNS: &str = "member_id, member_number, full_name, email, category_id, status, \
     outstanding_balance, created_utc, updated_utc";

const PLAN_COLUMNS: &str = "plan_id, code, name, description, amount, currency, billing_cycle, \
     category_id, is_active, created_utc, updated_utc";

const DUE_COLUMNS: &str = "assigned_due_id, member_id, plan_id, category_id, assessment_id, \
     amount, currency, period, period_start, period_end, due_date, status, reference, notes, \
     waived_reason, created_utc, updated_utc";

const PAYMENT_COLUMNS: &str = "payment_id, member_id, plan_id, assigned_due_id, amount, currency, \
     method, paid_at, reference, description, recorded_by, created_utc";

const ASSESSMENT_COLUMNS: &str = "assessment_id, plan_id, period, target_type, \
     target_category_id, member_ids, assigned_count, skipped_count, interrupted, actor, created_utc";

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("Failed to {}: {}", context, e))
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    base_currency: String,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "dues-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        base_currency: &str,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self {
            pool,
            base_currency: base_currency.to_string(),
        })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    /// Lock a member row ahead of any due or payment write for that member.
    /// Returns `false` when the member does not exist.
    ///
    /// Every write path takes the member lock first and the due lock second.
    /// `FOR NO KEY UPDATE` does not conflict with the `KEY SHARE` locks taken by
    /// foreign-key checks on `payments.member_id`.
    async fn lock_member(conn: &mut PgConnection, member_id: Uuid) -> Result<bool, AppError> {
        let locked = sqlx::query_scalar::<_, Uuid>(
            "SELECT member_id FROM members WHERE member_id = $1 FOR NO KEY UPDATE",
        )
        .bind(member_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("lock member", e))?;
        Ok(locked.is_some())
    }

    /// Lock the member owning a due. `member_id` never changes on a due, so it
    /// is read without a row lock.
    async fn lock_due_owner(conn: &mut PgConnection, assigned_due_id: Uuid) -> Result<Uuid, AppError> {
        let member_id = sqlx::query_scalar::<_, Uuid>(
            "SELECT member_id FROM assigned_dues WHERE assigned_due_id = $1",
        )
        .bind(assigned_due_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("load due owner", e))?
        .ok_or(LedgerError::AssignedDueNotFound(assigned_due_id))?;

        if !Self::lock_member(conn, member_id).await? {
            return Err(AppError::DatabaseError(anyhow::anyhow!(
                "Member {} referenced by due {} is missing",
                member_id,
                assigned_due_id
            )));
        }
        Ok(member_id)
    }

    /// Recompute the base-currency outstanding balance cached on the member row.
    /// The caller holds the member lock.
    async fn refresh_member_balance(
        conn: &mut PgConnection,
        member_id: Uuid,
        base_currency: &str,
    ) -> Result<Decimal, AppError> {
        let dues = sqlx::query_as::<_, AssignedDue>(&format!(
            "SELECT {} FROM assigned_dues WHERE member_id = $1 AND currency = $2",
            DUE_COLUMNS
        ))
        .bind(member_id)
        .bind(base_currency)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load member dues", e))?;

        let due_ids: Vec<Uuid> = dues.iter().map(|d| d.assigned_due_id).collect();
        let payments = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE assigned_due_id = ANY($1)",
            PAYMENT_COLUMNS
        ))
        .bind(&due_ids)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error("load member payments", e))?;

        let balance = member_outstanding_balance(&dues, &payments);

        sqlx::query(
            "UPDATE members SET outstanding_balance = $2, updated_utc = NOW() WHERE member_id = $1",
        )
        .bind(member_id)
        .bind(balance)
        .execute(&mut *conn)
        .await
        .map_err(|e| db_error("update member balance", e))?;

        Ok(balance)
    }

    /// Status sync on an open connection or transaction. The owning member and
    /// then the due row are locked before the payment sum is read so
    /// concurrent syncs serialise.
    async fn sync_on(
        conn: &mut PgConnection,
        assigned_due_id: Uuid,
        base_currency: &str,
    ) -> Result<SyncOutcome, AppError> {
        Self::lock_due_owner(conn, assigned_due_id).await?;

        let due = sqlx::query_as::<_, AssignedDue>(&format!(
            "SELECT {} FROM assigned_dues WHERE assigned_due_id = $1 FOR UPDATE",
            DUE_COLUMNS
        ))
        .bind(assigned_due_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("lock assigned due", e))?
        .ok_or(LedgerError::AssignedDueNotFound(assigned_due_id))?;

        let paid: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE assigned_due_id = $1",
        )
        .bind(assigned_due_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| db_error("sum due payments", e))?;

        let previous = due.due_status();
        let current = derive_status(&due, paid);
        let changed = previous != current;

        if changed {
            sqlx::query(
                "UPDATE assigned_dues SET status = $2, updated_utc = NOW() WHERE assigned_due_id = $1",
            )
            .bind(assigned_due_id)
            .bind(current.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| db_error("update due status", e))?;
        }

        Self::refresh_member_balance(conn, due.member_id, base_currency).await?;

        Ok(SyncOutcome {
            assigned_due_id,
            member_id: due.member_id,
            previous,
            current,
            paid_amount: money(paid),
            changed,
        })
    }
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Health check failed: {}", e)))?;

        timer.observe_duration();
        Ok(())
    }

    // =========================================================================
    // Categories
    // =========================================================================

    #[instrument(skip(self, input), fields(name = %input.name))]
    async fn create_category(&self, input: &CreateCategory) -> Result<Category, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_category"])
            .start_timer();

        let category = sqlx::query_as::<_, Category>(&format!(
            "INSERT INTO categories (category_id, name, description) VALUES ($1, $2, $3) RETURNING {}",
            CATEGORY_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.name)
        .bind(&input.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Category '{}' already exists", input.name))
            }
            _ => db_error("create category", e),
        })?;

        timer.observe_duration();
        info!(category_id = %category.category_id, "Category created");

        Ok(category)
    }

    #[instrument(skip(self))]
    async fn list_categories(&self) -> Result<Vec<Category>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_categories"])
            .start_timer();

        let categories = sqlx::query_as::<_, Category>(&format!(
            "SELECT {} FROM categories ORDER BY name",
            CATEGORY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list categories", e))?;

        timer.observe_duration();
        Ok(categories)
    }

    #[instrument(skip(self))]
    async fn get_category_by_name(&self, name: &str) -> Result<Option<Category>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_category_by_name"])
            .start_timer();

        let category = sqlx::query_as::<_, Category>(&format!(
            "SELECT {} FROM categories WHERE LOWER(name) = LOWER($1)",
            CATEGORY_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get category", e))?;

        timer.observe_duration();
        Ok(category)
    }

    // =========================================================================
    // Members
    // =========================================================================

    #[instrument(skip(self, input), fields(member_number = %input.member_number))]
    async fn create_member(&self, input: &CreateMember) -> Result<Member, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_member"])
            .start_timer();

        let member = sqlx::query_as::<_, Member>(&format!(
            r#"
            INSERT INTO members (member_id, member_number, full_name, email, category_id, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            MEMBER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.member_number)
        .bind(&input.full_name)
        .bind(&input.email)
        .bind(input.category_id)
        .bind(input.status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!(
                    "Member number '{}' already exists",
                    input.member_number
                ))
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::BadRequest(anyhow::anyhow!("Category does not exist"))
            }
            _ => db_error("create member", e),
        })?;

        timer.observe_duration();
        info!(member_id = %member.member_id, "Member created");

        Ok(member)
    }

    #[instrument(skip(self))]
    async fn get_member(&self, member_id: Uuid) -> Result<Option<Member>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_member"])
            .start_timer();

        let member = sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE member_id = $1",
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get member", e))?;

        timer.observe_duration();
        Ok(member)
    }

    #[instrument(skip(self, member_ids), fields(count = member_ids.len()))]
    async fn get_members(&self, member_ids: &[Uuid]) -> Result<Vec<Member>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_members"])
            .start_timer();

        let members = sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE member_id = ANY($1) ORDER BY member_number",
            MEMBER_COLUMNS
        ))
        .bind(member_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("get members", e))?;

        timer.observe_duration();
        Ok(members)
    }

    #[instrument(skip(self))]
    async fn list_members_in_category(&self, category_id: Uuid) -> Result<Vec<Member>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_members_in_category"])
            .start_timer();

        let members = sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members WHERE category_id = $1 ORDER BY member_number",
            MEMBER_COLUMNS
        ))
        .bind(category_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list category members", e))?;

        timer.observe_duration();
        Ok(members)
    }

    #[instrument(skip(self))]
    async fn list_members(&self) -> Result<Vec<Member>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_members"])
            .start_timer();

        let members = sqlx::query_as::<_, Member>(&format!(
            "SELECT {} FROM members ORDER BY member_number",
            MEMBER_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list members", e))?;

        timer.observe_duration();
        Ok(members)
    }

    #[instrument(skip(self))]
    async fn update_member_status(
        &self,
        member_id: Uuid,
        status: MemberStatus,
    ) -> Result<Option<Member>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_member_status"])
            .start_timer();

        let member = sqlx::query_as::<_, Member>(&format!(
            "UPDATE members SET status = $2, updated_utc = NOW() WHERE member_id = $1 RETURNING {}",
            MEMBER_COLUMNS
        ))
        .bind(member_id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update member status", e))?;

        timer.observe_duration();
        Ok(member)
    }

    #[instrument(skip(self))]
    async fn delete_member(&self, member_id: Uuid) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["delete_member"])
            .start_timer();

        let result = sqlx::query("DELETE FROM members WHERE member_id = $1")
            .bind(member_id)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                    LedgerError::MemberHasLedgerEntries(member_id).into()
                }
                _ => db_error("delete member", e),
            })?;

        timer.observe_duration();
        Ok(result.rows_affected() > 0)
    }

    // =========================================================================
    // Plans
    // =========================================================================

    #[instrument(skip(self, input), fields(code = %input.code))]
    async fn create_plan(&self, input: &CreatePlan) -> Result<DuesPlan, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, DuesPlan>(&format!(
            r#"
            INSERT INTO dues_plans (plan_id, code, name, description, amount, currency, billing_cycle, category_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(&input.code)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.amount)
        .bind(&input.currency)
        .bind(input.billing_cycle.as_str())
        .bind(input.category_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                AppError::Conflict(anyhow::anyhow!("Plan code '{}' already exists", input.code))
            }
            sqlx::Error::Database(ref db_err) if db_err.is_foreign_key_violation() => {
                AppError::BadRequest(anyhow::anyhow!("Category does not exist"))
            }
            _ => db_error("create plan", e),
        })?;

        timer.observe_duration();
        info!(plan_id = %plan.plan_id, amount = %plan.amount, "Plan created");

        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn get_plan(&self, plan_id: Uuid) -> Result<Option<DuesPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, DuesPlan>(&format!(
            "SELECT {} FROM dues_plans WHERE plan_id = $1",
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get plan", e))?;

        timer.observe_duration();
        Ok(plan)
    }

    #[instrument(skip(self))]
    async fn list_plans(&self, filter: &ListPlansFilter) -> Result<Vec<DuesPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_plans"])
            .start_timer();

        let plans = sqlx::query_as::<_, DuesPlan>(&format!(
            r#"
            SELECT {} FROM dues_plans
            WHERE ($1::BOOLEAN IS NULL OR is_active = $1)
              AND ($2::UUID IS NULL OR category_id = $2)
            ORDER BY code
            "#,
            PLAN_COLUMNS
        ))
        .bind(filter.active)
        .bind(filter.category_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list plans", e))?;

        timer.observe_duration();
        Ok(plans)
    }

    #[instrument(skip(self, input))]
    async fn update_plan(
        &self,
        plan_id: Uuid,
        input: &UpdatePlan,
    ) -> Result<Option<DuesPlan>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_plan"])
            .start_timer();

        let plan = sqlx::query_as::<_, DuesPlan>(&format!(
            r#"
            UPDATE dues_plans
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                amount = COALESCE($4, amount),
                is_active = COALESCE($5, is_active),
                updated_utc = NOW()
            WHERE plan_id = $1
            RETURNING {}
            "#,
            PLAN_COLUMNS
        ))
        .bind(plan_id)
        .bind(&input.name)
        .bind(&input.description)
        .bind(input.amount)
        .bind(input.is_active)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("update plan", e))?;

        timer.observe_duration();
        Ok(plan)
    }

    // =========================================================================
    // Assigned dues
    // =========================================================================

    #[instrument(skip(self))]
    async fn assessed_member_ids(
        &self,
        plan_id: Uuid,
        period: &str,
    ) -> Result<HashSet<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["assessed_member_ids"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT member_id FROM assigned_dues WHERE plan_id = $1 AND period = $2",
        )
        .bind(plan_id)
        .bind(period)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("load assessed members", e))?;

        timer.observe_duration();
        Ok(ids.into_iter().collect())
    }

    #[instrument(skip(self, due), fields(member_id = %due.member_id, reference = %due.reference))]
    async fn insert_assigned_due(&self, due: &NewAssignedDue) -> Result<DueInsert, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_assigned_due"])
            .start_timer();

        let inserted = sqlx::query_as::<_, AssignedDue>(&format!(
            r#"
            INSERT INTO assigned_dues (
                assigned_due_id, member_id, plan_id, category_id, assessment_id, amount, currency,
                period, period_start, period_end, due_date, status, reference, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT DO NOTHING
            RETURNING {}
            "#,
            DUE_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(due.member_id)
        .bind(due.plan_id)
        .bind(due.category_id)
        .bind(due.assessment_id)
        .bind(due.amount)
        .bind(&due.currency)
        .bind(&due.period)
        .bind(due.period_start)
        .bind(due.period_end)
        .bind(due.due_date)
        .bind(DueStatus::Pending.as_str())
        .bind(&due.reference)
        .bind(&due.notes)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("insert assigned due", e))?;

        timer.observe_duration();

        Ok(match inserted {
            Some(due) => DueInsert::Inserted(due),
            None => DueInsert::Duplicate,
        })
    }

    #[instrument(skip(self))]
    async fn get_assigned_due(
        &self,
        assigned_due_id: Uuid,
    ) -> Result<Option<AssignedDue>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_assigned_due"])
            .start_timer();

        let due = sqlx::query_as::<_, AssignedDue>(&format!(
            "SELECT {} FROM assigned_dues WHERE assigned_due_id = $1",
            DUE_COLUMNS
        ))
        .bind(assigned_due_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get assigned due", e))?;

        timer.observe_duration();
        Ok(due)
    }

    #[instrument(skip(self))]
    async fn list_assigned_dues(
        &self,
        filter: &ListDuesFilter,
    ) -> Result<Vec<AssignedDue>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_assigned_dues"])
            .start_timer();

        let dues = sqlx::query_as::<_, AssignedDue>(&format!(
            r#"
            SELECT {} FROM assigned_dues
            WHERE ($1::UUID IS NULL OR member_id = $1)
              AND ($2::UUID IS NULL OR plan_id = $2)
              AND ($3::TEXT IS NULL OR status = $3)
              AND ($4::TEXT IS NULL OR period = $4)
            ORDER BY period_start, reference
            "#,
            DUE_COLUMNS
        ))
        .bind(filter.member_id)
        .bind(filter.plan_id)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(&filter.period)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list assigned dues", e))?;

        timer.observe_duration();
        Ok(dues)
    }

    #[instrument(skip(self))]
    async fn list_assigned_due_ids(&self) -> Result<Vec<Uuid>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_assigned_due_ids"])
            .start_timer();

        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT assigned_due_id FROM assigned_dues ORDER BY created_utc",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list assigned due ids", e))?;

        timer.observe_duration();
        Ok(ids)
    }

    #[instrument(skip(self, reason))]
    async fn waive_assigned_due(
        &self,
        assigned_due_id: Uuid,
        reason: &str,
    ) -> Result<AssignedDue, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["waive_assigned_due"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        Self::lock_due_owner(&mut tx, assigned_due_id).await?;

        let due = sqlx::query_as::<_, AssignedDue>(&format!(
            "SELECT {} FROM assigned_dues WHERE assigned_due_id = $1 FOR UPDATE",
            DUE_COLUMNS
        ))
        .bind(assigned_due_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error("lock assigned due", e))?
        .ok_or(LedgerError::AssignedDueNotFound(assigned_due_id))?;

        let paid: Decimal = sqlx::query_scalar(
            "SELECT COALESCE(SUM(amount), 0) FROM payments WHERE assigned_due_id = $1",
        )
        .bind(assigned_due_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("sum due payments", e))?;

        let status = derive_status(&due, paid);
        if matches!(status, DueStatus::Paid | DueStatus::Waived) {
            return Err(LedgerError::WaiveNotAllowed(status).into());
        }

        let waived = sqlx::query_as::<_, AssignedDue>(&format!(
            r#"
            UPDATE assigned_dues
            SET status = $2, waived_reason = $3, updated_utc = NOW()
            WHERE assigned_due_id = $1
            RETURNING {}
            "#,
            DUE_COLUMNS
        ))
        .bind(assigned_due_id)
        .bind(DueStatus::Waived.as_str())
        .bind(reason)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("waive assigned due", e))?;

        Self::refresh_member_balance(&mut tx, waived.member_id, &self.base_currency).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit transaction", e))?;

        timer.observe_duration();
        info!(assigned_due_id = %assigned_due_id, "Assigned due waived");

        Ok(waived)
    }

    // =========================================================================
    // Assessment audit
    // =========================================================================

    #[instrument(skip(self, assessment), fields(assessment_id = %assessment.assessment_id))]
    async fn record_assessment(&self, assessment: &NewAssessment) -> Result<Assessment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_assessment"])
            .start_timer();

        let record = sqlx::query_as::<_, Assessment>(&format!(
            r#"
            INSERT INTO assessments (
                assessment_id, plan_id, period, target_type, target_category_id, member_ids,
                assigned_count, skipped_count, interrupted, actor
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            ASSESSMENT_COLUMNS
        ))
        .bind(assessment.assessment_id)
        .bind(assessment.plan_id)
        .bind(&assessment.period)
        .bind(assessment.target_type.as_str())
        .bind(assessment.target_category_id)
        .bind(&assessment.member_ids)
        .bind(assessment.assigned_count)
        .bind(assessment.skipped_count)
        .bind(assessment.interrupted)
        .bind(&assessment.actor)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| db_error("record assessment", e))?;

        timer.observe_duration();
        Ok(record)
    }

    #[instrument(skip(self))]
    async fn list_assessments(&self, plan_id: Option<Uuid>) -> Result<Vec<Assessment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_assessments"])
            .start_timer();

        let assessments = sqlx::query_as::<_, Assessment>(&format!(
            "SELECT {} FROM assessments WHERE ($1::UUID IS NULL OR plan_id = $1) ORDER BY created_utc",
            ASSESSMENT_COLUMNS
        ))
        .bind(plan_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list assessments", e))?;

        timer.observe_duration();
        Ok(assessments)
    }

    // =========================================================================
    // Payments
    // =========================================================================

    /// Insert the payment and sync its due in one transaction. The sync runs
    /// inside a savepoint: if it fails only the savepoint is rolled back and
    /// the payment still commits.
    #[instrument(skip(self, payment), fields(member_id = %payment.member_id, amount = %payment.amount))]
    async fn record_payment(&self, payment: &NewPayment) -> Result<RecordedPayment, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["record_payment"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        if !Self::lock_member(&mut tx, payment.member_id).await? {
            return Err(LedgerError::MemberNotFound(payment.member_id).into());
        }

        if let Some(due_id) = payment.assigned_due_id {
            sqlx::query_scalar::<_, Uuid>(
                "SELECT assigned_due_id FROM assigned_dues WHERE assigned_due_id = $1 FOR UPDATE",
            )
            .bind(due_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| db_error("lock assigned due", e))?
            .ok_or(LedgerError::AssignedDueNotFound(due_id))?;
        }

        let recorded = sqlx::query_as::<_, Payment>(&format!(
            r#"
            INSERT INTO payments (
                payment_id, member_id, plan_id, assigned_due_id, amount, currency, method,
                paid_at, reference, description, recorded_by
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(payment.member_id)
        .bind(payment.plan_id)
        .bind(payment.assigned_due_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(payment.method.as_str())
        .bind(payment.paid_at)
        .bind(&payment.reference)
        .bind(&payment.description)
        .bind(&payment.recorded_by)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| db_error("insert payment", e))?;

        let due_sync = match payment.assigned_due_id {
            None => DueSync::Unlinked,
            Some(due_id) => {
                let mut savepoint = Acquire::begin(&mut *tx)
                    .await
                    .map_err(|e| db_error("open savepoint", e))?;

                match Self::sync_on(&mut savepoint, due_id, &self.base_currency).await {
                    Ok(outcome) => match savepoint.commit().await {
                        Ok(()) => DueSync::Applied(outcome),
                        Err(e) => DueSync::Deferred(e.to_string()),
                    },
                    Err(e) => {
                        savepoint
                            .rollback()
                            .await
                            .map_err(|e| db_error("roll back savepoint", e))?;
                        DueSync::Deferred(e.to_string())
                    }
                }
            }
        };

        if let DueSync::Deferred(reason) = &due_sync {
            warn!(
                payment_id = %recorded.payment_id,
                error = %reason,
                "Status sync failed; payment kept"
            );
        }

        tx.commit()
            .await
            .map_err(|e| db_error("commit transaction", e))?;

        timer.observe_duration();
        info!(payment_id = %recorded.payment_id, "Payment recorded");

        Ok(RecordedPayment {
            payment: recorded,
            due_sync,
        })
    }

    #[instrument(skip(self))]
    async fn get_payment(&self, payment_id: Uuid) -> Result<Option<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_payment"])
            .start_timer();

        let payment = sqlx::query_as::<_, Payment>(&format!(
            "SELECT {} FROM payments WHERE payment_id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("get payment", e))?;

        timer.observe_duration();
        Ok(payment)
    }

    #[instrument(skip(self))]
    async fn list_payments(&self, filter: &ListPaymentsFilter) -> Result<Vec<Payment>, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_payments"])
            .start_timer();

        let payments = sqlx::query_as::<_, Payment>(&format!(
            r#"
            SELECT {} FROM payments
            WHERE ($1::UUID IS NULL OR member_id = $1)
              AND ($2::UUID IS NULL OR assigned_due_id = $2)
            ORDER BY paid_at, created_utc
            "#,
            PAYMENT_COLUMNS
        ))
        .bind(filter.member_id)
        .bind(filter.assigned_due_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("list payments", e))?;

        timer.observe_duration();
        Ok(payments)
    }

    #[instrument(skip(self))]
    async fn sync_due_status(&self, assigned_due_id: Uuid) -> Result<SyncOutcome, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["sync_due_status"])
            .start_timer();

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", e))?;

        let outcome = Self::sync_on(&mut tx, assigned_due_id, &self.base_currency).await?;

        tx.commit()
            .await
            .map_err(|e| db_error("commit transaction", e))?;

        timer.observe_duration();
        Ok(outcome)
    }
}
