//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use sheetflow_api::error::AppError;
use sheetflow_core::error::CoreError;

async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let (status, json) = error_to_response(CoreError::not_found("Conversion", "abc").into()).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Conversion with id abc not found");
}

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("invalid ids".into())).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "invalid ids");
}

#[tokio::test]
async fn insufficient_credits_returns_402() {
    let err = CoreError::InsufficientCredits {
        available: 0,
        required: 1,
    };
    let (status, json) = error_to_response(err.into()).await;

    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(json["code"], "INSUFFICIENT_CREDITS");
    assert!(json["error"].as_str().unwrap().contains("0 available"));
}

#[tokio::test]
async fn invalid_signature_returns_401() {
    let (status, json) = error_to_response(CoreError::InvalidSignature.into()).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["code"], "INVALID_SIGNATURE");
}

#[tokio::test]
async fn invalid_payload_returns_400() {
    let (status, json) =
        error_to_response(CoreError::InvalidPayload("missing field".into()).into()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn concurrent_modification_returns_409() {
    let err = CoreError::ConcurrentModification {
        entity: "CreditAccount",
        id: "7".into(),
    };
    let (status, json) = error_to_response(err.into()).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["code"], "CONCURRENT_MODIFICATION");
}

#[tokio::test]
async fn dispatch_failure_returns_502_without_internal_detail() {
    let err = CoreError::DispatchFailure("connect error: 10.0.0.3:8080".into());
    let (status, json) = error_to_response(err.into()).await;

    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "DISPATCH_FAILED");
    assert!(!json["error"].as_str().unwrap().contains("10.0.0.3"));
}

#[tokio::test]
async fn internal_errors_are_sanitized() {
    let (status, json) =
        error_to_response(CoreError::Internal("pool timed out on db-1".into()).into()).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}

#[tokio::test]
async fn forbidden_returns_403() {
    let (status, json) =
        error_to_response(CoreError::Forbidden("Admin role required".into()).into()).await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(json["code"], "FORBIDDEN");
}
