//! HTTP surface tests for the webhook and booking routes

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::*;
use tower::ServiceExt;

fn app(state: &AppState) -> axum::Router {
    bookpay::handlers::router().with_state(state.clone())
}

#[tokio::test]
async fn test_webhook_without_signature_header_is_unauthorized() {
    let state = setup_test_state();

    let response = app(&state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payments")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_webhook_with_valid_signature_acknowledged() {
    let state = setup_test_state();
    let (body, sig) = signed_event("evt_http", "customer.updated", serde_json::json!({}));

    let response = app(&state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/payments")
                .header("processor-signature", sig)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_booking_returns_not_found() {
    let state = setup_test_state();

    let response = app(&state)
        .oneshot(
            Request::builder()
                .uri("/bookings/bp_bk_00000000000000000000000000000000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_conflicting_booking_returns_conflict() {
    let state = setup_test_state();
    let conn = state.db.get().unwrap();
    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let alice = create_test_profile(&conn, "Alice", "ALIC1234");
    let bob = create_test_profile(&conn, "Bob", "BOB12345");
    drop(conn);

    let start = now() + 3600;
    let payload = |customer: &Profile| {
        serde_json::json!({
            "customer_id": customer.id,
            "listing_id": listing.id,
            "starts_at": start,
            "ends_at": start + 3600,
        })
        .to_string()
    };

    let first = app(&state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bookings")
                .header("content-type", "application/json")
                .body(Body::from(payload(&alice)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = app(&state)
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/bookings")
                .header("content-type", "application/json")
                .body(Body::from(payload(&bob)))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_balance_endpoint_reports_clearing_lifecycle() {
    let state = setup_test_state();
    let conn = state.db.get().unwrap();
    let provider = create_test_profile(&conn, "Provider", "PROV1234");
    let listing = create_test_listing(&conn, &provider.id, 10_000);
    let customer = create_test_profile(&conn, "Customer", "CUST1234");
    let start = now() + 3600;
    let booking = create_test_booking(&conn, &customer, &listing, start, start + 3600);
    drop(conn);
    confirm_booking_via_webhook(&state, &booking, "evt_http_balance");

    let response = app(&state)
        .oneshot(
            Request::builder()
                .uri(format!("/parties/{}/balance", provider.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body["pending_minor"], 9_000);
    assert_eq!(body["available_minor"], 0);
}
