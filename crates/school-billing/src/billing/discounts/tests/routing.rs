use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use serde_json::{json, Value};
use tower::ServiceExt;

use super::common::*;
use crate::billing::discounts::domain::{
    AssignmentSource, AssignmentStatus, CriterionType, SyncTrigger,
};
use crate::billing::discounts::{SCHOOL_HEADER, SCHOOL_YEAR_HEADER};

fn scoped(builder: axum::http::request::Builder, school: &str) -> axum::http::request::Builder {
    builder
        .header(SCHOOL_HEADER, school)
        .header(SCHOOL_YEAR_HEADER, YEAR)
}

fn json_request(method: &str, uri: &str, school: &str, body: Value) -> Request<Body> {
    scoped(Request::builder().method(method).uri(uri), school)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn empty_request(method: &str, uri: &str, school: &str) -> Request<Body> {
    scoped(Request::builder().method(method).uri(uri), school)
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn missing_school_headers_are_unauthorized() {
    let harness = harness();

    let response = harness
        .router()
        .oneshot(
            Request::get("/api/v1/discount-policies")
                .header(SCHOOL_HEADER, SCHOOL)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["error"], "missing school context");
}

#[tokio::test]
async fn create_route_applies_payload_defaults() {
    let harness = harness();

    let response = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/discount-policies",
            SCHOOL,
            json!({
                "name": "Sibling discount",
                "criterion_type": "SIBLING_COUNT",
                "criterion_config": { "minChildren": 2 },
                "value": 10.0
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::CREATED);
    let payload = read_json_body(response).await;
    assert_eq!(payload["school_id"], SCHOOL);
    assert_eq!(payload["value_type"], "PERCENT");
    assert_eq!(payload["stackable"], true);
    assert_eq!(payload["priority"], 100);
    assert_eq!(payload["is_active"], true);
}

#[tokio::test]
async fn create_route_rejects_invalid_fields_with_field_name() {
    let harness = harness();

    let response = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/discount-policies",
            SCHOOL,
            json!({
                "name": "Negative",
                "criterion_type": "ALWAYS",
                "value": -5.0
            }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let payload = read_json_body(response).await;
    assert_eq!(payload["field"], "value");
}

#[tokio::test]
async fn foreign_policy_delete_is_not_found() {
    let harness = harness();
    let policy = harness.create(fields("North", CriterionType::Always, None));

    let response = harness
        .router()
        .oneshot(empty_request(
            "DELETE",
            &format!("/api/v1/discount-policies/{}", policy.id),
            OTHER_SCHOOL,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(harness.service.list_policies(&tenant()).unwrap().len(), 1);
}

#[tokio::test]
async fn decision_routes_set_and_clear_manual_rows() {
    let harness = harness();
    let student = harness.directory.add_student("stu-http", SCHOOL);
    let policy = harness.create(fields("Always", CriterionType::Always, None));
    let uri = format!(
        "/api/v1/discount-policies/{}/students/{}/decision",
        policy.id, student
    );

    let response = harness
        .router()
        .oneshot(json_request(
            "PUT",
            &uri,
            SCHOOL,
            json!({ "status": "DENY", "note": "family request" }),
        ))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let stored = harness
        .repository
        .assignment(&policy.id, &student)
        .expect("manual row");
    assert_eq!(stored.status, AssignmentStatus::Deny);
    assert_eq!(stored.source, AssignmentSource::Manual);

    let response = harness
        .router()
        .oneshot(empty_request("DELETE", &uri, SCHOOL))
        .await
        .expect("route executes");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(harness.repository.assignment(&policy.id, &student).is_none());
}

#[tokio::test]
async fn sync_route_acknowledges_and_writes_assignments() {
    let harness = harness();
    let student = harness.directory.add_student("stu-sync", SCHOOL);
    let policy = harness.create(fields("Always", CriterionType::Always, None));

    let response = harness
        .router()
        .oneshot(empty_request(
            "POST",
            &format!("/api/v1/students/{student}/discount-sync"),
            SCHOOL,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json_body(response).await, json!({ "ok": true }));
    assert!(harness.repository.assignment(&policy.id, &student).is_some());
}

#[tokio::test]
async fn student_assignments_route_lists_rows() {
    let harness = harness();
    let student = harness.directory.add_student("stu-list", SCHOOL);
    harness.create(fields("Always", CriterionType::Always, None));
    harness
        .service
        .sync_student(&tenant(), &student, SyncTrigger::StudentCreated)
        .unwrap();

    let response = harness
        .router()
        .oneshot(empty_request(
            "GET",
            &format!("/api/v1/students/{student}/discount-assignments"),
            SCHOOL,
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload.as_array().map(Vec::len), Some(1));
    assert_eq!(payload[0]["source"], "AUTO");
}

#[tokio::test]
async fn quote_route_returns_applied_policies() {
    let harness = harness();
    let student = harness.directory.add_student("stu-quote", SCHOOL);
    harness.create(fields("Always", CriterionType::Always, None));

    let response = harness
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/students/{student}/discount-quote"),
            SCHOOL,
            json!({ "fee_total": 250.0 }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    let payload = read_json_body(response).await;
    assert_eq!(payload["amount"], 25.0);
    assert_eq!(payload["applied_policies"][0]["name"], "Always");
}

#[tokio::test]
async fn contact_sync_route_reports_student_count() {
    let harness = harness();
    harness.directory.family("web", 2);
    harness.create(fields("Siblings", CriterionType::SiblingCount, None));

    let response = harness
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/contacts/discount-sync",
            SCHOOL,
            json!({ "contact_ids": ["web-parent"] }),
        ))
        .await
        .expect("route executes");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        read_json_body(response).await,
        json!({ "ok": true, "students": 2 })
    );
}
