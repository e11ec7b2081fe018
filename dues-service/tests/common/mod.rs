//! Test helpers for dues-service HTTP integration tests.
//!
//! Each test spawns the full application on a random port. `spawn` runs over
//! the in-memory ledger store; `spawn_postgres` runs against the database named
//! by `TEST_DATABASE_URL` and returns `None` when it is unset.

#![allow(dead_code)]

use dues_service::config::{DatabaseConfig, DuesConfig, LedgerConfig, StorageConfig};
use dues_service::startup::Application;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Once;
use tokio_util::sync::CancellationToken;

static TRACING: Once = Once::new();

fn init_test_tracing() {
    TRACING.call_once(|| {
        if std::env::var("TEST_LOG").is_ok() {
            service_core::observability::init_tracing("dues-service-test", "debug", None);
        }
    });
}

pub struct TestApp {
    pub address: String,
    pub http_port: u16,
    pub client: reqwest::Client,
    shutdown: CancellationToken,
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        Self::spawn_with(LedgerConfig::default()).await
    }

    pub async fn spawn_with(ledger: LedgerConfig) -> Self {
        Self::spawn_on(StorageConfig::Memory, ledger).await
    }

    pub async fn spawn_postgres() -> Option<Self> {
        let Ok(url) = std::env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping PostgreSQL test");
            return None;
        };
        let database = DatabaseConfig {
            url,
            max_connections: 10,
            min_connections: 1,
        };
        Some(Self::spawn_on(StorageConfig::Postgres(database), LedgerConfig::default()).await)
    }

    async fn spawn_on(storage: StorageConfig, ledger: LedgerConfig) -> Self {
        init_test_tracing();

        let config = DuesConfig {
            common: CoreConfig {
                port: 0,
                host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            },
            service_name: "dues-service-test".to_string(),
            service_version: "test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            storage,
            ledger,
        };

        let app = Application::build(config)
            .await
            .expect("Failed to build test application");

        let http_port = app.http_port();
        let address = format!("http://127.0.0.1:{}", http_port);
        let shutdown = app.shutdown_token();

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(20)).await;
        }

        TestApp {
            address,
            http_port,
            client,
            shutdown,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn post(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn patch(&self, path: &str, body: &Value) -> reqwest::Response {
        self.client
            .patch(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to execute request")
    }

    pub async fn delete(&self, path: &str) -> reqwest::Response {
        self.client
            .delete(self.url(path))
            .send()
            .await
            .expect("Failed to execute request")
    }

    /// POST and assert 201, returning the body.
    pub async fn create(&self, path: &str, body: Value) -> Value {
        let response = self.post(path, &body).await;
        let status = response.status();
        let body: Value = response.json().await.expect("Failed to parse response");
        assert_eq!(status, 201, "POST {} failed: {}", path, body);
        body
    }

    pub async fn create_category(&self, name: &str) -> String {
        let body = self.create("/categories", json!({ "name": name })).await;
        id(&body, "category_id")
    }

    pub async fn create_member(&self, number: &str, category_id: Option<&str>) -> String {
        self.create_member_with_status(number, category_id, "ACTIVE")
            .await
    }

    pub async fn create_member_with_status(
        &self,
        number: &str,
        category_id: Option<&str>,
        status: &str,
    ) -> String {
        let body = self
            .create(
                "/members",
                json!({
                    "member_number": number,
                    "full_name": format!("Member {}", number),
                    "category_id": category_id,
                    "status": status,
                }),
            )
            .await;
        id(&body, "member_id")
    }

    pub async fn create_plan(&self, code: &str, amount: &str, category_id: Option<&str>) -> String {
        let body = self
            .create(
                "/plans",
                json!({
                    "code": code,
                    "name": format!("Plan {}", code),
                    "amount": amount,
                    "billing_cycle": "QUARTERLY",
                    "category_id": category_id,
                }),
            )
            .await;
        id(&body, "plan_id")
    }

    pub async fn assess_members<S: AsRef<str>>(
        &self,
        plan_id: &str,
        period: &str,
        member_ids: &[S],
    ) -> Value {
        let member_ids: Vec<&str> = member_ids.iter().map(|id| AsRef::<str>::as_ref(id)).collect();
        self.create(
            "/assessments",
            json!({
                "plan_id": plan_id,
                "period": period,
                "target_type": "INDIVIDUAL",
                "member_ids": member_ids,
            }),
        )
        .await
    }

    /// The single due assigned to `member_id`.
    pub async fn due_for(&self, member_id: &str) -> Value {
        let dues: Vec<Value> = self
            .get(&format!("/assigned-dues?member_id={}", member_id))
            .await
            .json()
            .await
            .expect("Failed to parse dues");
        assert_eq!(dues.len(), 1, "expected one due for member {}", member_id);
        dues.into_iter().next().unwrap()
    }

    pub async fn pay(&self, member_id: &str, due_id: Option<&str>, amount: &str) -> reqwest::Response {
        self.post(
            "/payments",
            &json!({
                "member_id": member_id,
                "assigned_due_id": due_id,
                "amount": amount,
                "paid_at": "2024-10-05",
                "method": "CASH",
            }),
        )
        .await
    }
}

pub fn id(body: &Value, field: &str) -> String {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing {} in {}", field, body))
        .to_string()
}

/// Decimal fields are serialised as strings.
pub fn money(body: &Value, field: &str) -> rust_decimal::Decimal {
    body[field]
        .as_str()
        .unwrap_or_else(|| panic!("missing {} in {}", field, body))
        .parse()
        .expect("not a decimal")
}

/// Suffix for codes and member numbers in tests that share a database.
pub fn unique(prefix: &str) -> String {
    format!("{}-{}", prefix, &uuid::Uuid::new_v4().simple().to_string()[..12])
}
