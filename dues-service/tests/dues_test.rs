//! Assigned due listing, waivers, manual sync and the reconciliation sweep.

mod common;

use common::{id, money, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

async fn assessed<S: AsRef<str>>(app: &TestApp, members: &[S]) -> String {
    let plan = app.create_plan("D", "80.00", None).await;
    app.assess_members(&plan, "2024-Q4", members).await;
    plan
}

#[tokio::test]
async fn dues_filter_by_status() {
    let app = TestApp::spawn().await;
    let a = app.create_member("D-1", None).await;
    let b = app.create_member("D-2", None).await;
    assessed(&app, &[&a, &b]).await;
    let due = id(&app.due_for(&a).await, "assigned_due_id");
    app.pay(&a, Some(due.as_str()), "10.00").await;

    let partial: Vec<Value> = app
        .get("/assigned-dues?status=PARTIAL")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(partial.len(), 1);
    assert_eq!(partial[0]["member_id"], a.as_str());

    let pending: Vec<Value> = app
        .get("/assigned-dues?status=pending")
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);

    assert_eq!(app.get("/assigned-dues?status=LATE").await.status(), 400);
}

#[tokio::test]
async fn waived_due_leaves_the_balance_and_stays_waived() {
    let app = TestApp::spawn().await;
    let member = app.create_member("W-1", None).await;
    assessed(&app, &[&member]).await;
    let due = id(&app.due_for(&member).await, "assigned_due_id");

    let response = app
        .post(
            &format!("/assigned-dues/{}/waive", due),
            &json!({ "reason": "Hardship" }),
        )
        .await;
    assert_eq!(response.status(), 200);
    let waived: Value = response.json().await.unwrap();
    assert_eq!(waived["status"], "WAIVED");
    assert_eq!(waived["waived_reason"], "Hardship");

    let body: Value = app.pay(&member, Some(due.as_str()), "80.00").await.json().await.unwrap();
    assert_eq!(body["due_status"], "WAIVED");

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
async fn settled_due_cannot_be_waived() {
    let app = TestApp::spawn().await;
    let member = app.create_member("W-2", None).await;
    assessed(&app, &[&member]).await;
    let due = id(&app.due_for(&member).await, "assigned_due_id");
    app.pay(&member, Some(due.as_str()), "80.00").await;

    let response = app
        .post(
            &format!("/assigned-dues/{}/waive", due),
            &json!({ "reason": "Too late" }),
        )
        .await;
    assert_eq!(response.status(), 409);
}

#[tokio::test]
async fn waiver_requires_a_reason() {
    let app = TestApp::spawn().await;
    let member = app.create_member("W-3", None).await;
    assessed(&app, &[&member]).await;
    let due = id(&app.due_for(&member).await, "assigned_due_id");

    let response = app
        .post(&format!("/assigned-dues/{}/waive", due), &json!({ "reason": "" }))
        .await;
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn manual_sync_is_a_no_op_on_a_consistent_due() {
    let app = TestApp::spawn().await;
    let member = app.create_member("S-1", None).await;
    assessed(&app, &[&member]).await;
    let due = id(&app.due_for(&member).await, "assigned_due_id");
    app.pay(&member, Some(due.as_str()), "30.00").await;

    let response = app
        .post(&format!("/assigned-dues/{}/sync", due), &json!({}))
        .await;
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["previous"], "PARTIAL");
    assert_eq!(outcome["current"], "PARTIAL");
    assert_eq!(outcome["changed"], false);
    assert_eq!(money(&outcome, "paid_amount"), dec!(30));

    let response = app
        .post(
            &format!("/assigned-dues/{}/sync", uuid::Uuid::new_v4()),
            &json!({}),
        )
        .await;
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn sweep_examines_every_due() {
    let app = TestApp::spawn().await;
    let a = app.create_member("SW-1", None).await;
    let b = app.create_member("SW-2", None).await;
    assessed(&app, &[&a, &b]).await;

    let response = app.post("/maintenance/reconcile", &json!({})).await;
    assert_eq!(response.status(), 200);
    let report: Value = response.json().await.unwrap();
    assert_eq!(report["examined"], 2);
    assert_eq!(report["changed"], 0);
    assert_eq!(report["failed"], 0);
    assert_eq!(report["interrupted"], false);
}

#[tokio::test]
async fn unknown_due_detail_is_not_found() {
    let app = TestApp::spawn().await;
    let response = app
        .get(&format!("/assigned-dues/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(response.status(), 404);
}
