//! Member balances and the outstanding report, always derived from the ledger.

mod common;

use common::{id, money, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

#[tokio::test]
async fn balance_counts_open_dues_minus_their_payments() {
    let app = TestApp::spawn().await;
    let plan = app.create_plan("Q", "90.00", None).await;
    let member = app.create_member("B-1", None).await;
    app.assess_members(&plan, "2024-Q4", &[&member]).await;
    let due = id(&app.due_for(&member).await, "assigned_due_id");
    app.pay(&member, Some(due.as_str()), "45.00").await;

    let balance: Value = app
        .get(&format!("/members/{}/balance", member))
        .await
        .json()
        .await
        .unwrap();

    assert_eq!(balance["currency"], "GHS");
    assert_eq!(money(&balance, "total_assessed"), dec!(90));
    assert_eq!(money(&balance, "total_paid"), dec!(45));
    assert_eq!(money(&balance, "outstanding_balance"), dec!(45));
    assert_eq!(balance["open_dues"], 1);
    assert!(balance["other_currencies"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unlinked_payments_do_not_reduce_the_outstanding_balance() {
    let app = TestApp::spawn().await;
    let plan = app.create_plan("Y", "300.00", None).await;
    let member = app.create_member("B-2", None).await;
    app.assess_members(&plan, "2025", &[&member]).await;
    app.pay(&member, None, "500.00").await;

    let balance: Value = app
        .get(&format!("/members/{}/balance", member))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(money(&balance, "total_paid"), dec!(500));
    assert_eq!(money(&balance, "outstanding_balance"), dec!(300));
}

#[tokio::test]
async fn member_without_activity_has_a_zero_balance() {
    let app = TestApp::spawn().await;
    let member = app.create_member("B-3", None).await;

    let balance: Value = app
        .get(&format!("/members/{}/balance", member))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(money(&balance, "outstanding_balance"), dec!(0));
    assert_eq!(money(&balance, "total_assessed"), dec!(0));
}

#[tokio::test]
async fn unknown_member_balance_is_not_found() {
    let app = TestApp::spawn().await;
    let response = app
        .get(&format!("/members/{}/balance", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn other_currencies_are_reported_separately() {
    let app = TestApp::spawn().await;
    let member = app.create_member("B-4", None).await;
    let usd = app
        .create(
            "/plans",
            json!({
                "code": "INTL",
                "name": "International levy",
                "amount": "20.00",
                "currency": "usd",
            }),
        )
        .await;
    assert_eq!(usd["currency"], "USD");
    app.assess_members(&id(&usd, "plan_id"), "2025", &[&member])
        .await;

    let balance: Value = app
        .get(&format!("/members/{}/balance", member))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(money(&balance, "outstanding_balance"), dec!(0));
    let others = balance["other_currencies"].as_array().unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0]["currency"], "USD");
    assert_eq!(money(&others[0], "outstanding_balance"), dec!(20));
}

#[tokio::test]
async fn outstanding_report_lists_debtors_largest_first() {
    let app = TestApp::spawn().await;
    let plan = app.create_plan("R", "100.00", None).await;
    let small = app.create_member("R-1", None).await;
    let large = app.create_member("R-2", None).await;
    let settled = app.create_member("R-3", None).await;
    app.assess_members(&plan, "2024-Q4", &[&small, &large, &settled])
        .await;

    let small_due = id(&app.due_for(&small).await, "assigned_due_id");
    let settled_due = id(&app.due_for(&settled).await, "assigned_due_id");
    app.pay(&small, Some(small_due.as_str()), "70.00").await;
    app.pay(&settled, Some(settled_due.as_str()), "100.00").await;

    let report: Vec<Value> = app.get("/reports/outstanding").await.json().await.unwrap();
    assert_eq!(report.len(), 2);
    assert_eq!(report[0]["member_id"], large.as_str());
    assert_eq!(money(&report[0], "outstanding_balance"), dec!(100));
    assert_eq!(report[1]["member_id"], small.as_str());
    assert_eq!(money(&report[1], "outstanding_balance"), dec!(30));
}
