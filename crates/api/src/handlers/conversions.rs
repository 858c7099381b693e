//! Handlers for the `/conversions` resource.
//!
//! All endpoints require authentication via [`AuthUser`] and only ever
//! touch the caller's own conversions.

use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use sheetflow_core::lifecycle::SubmitConversion;
use sheetflow_core::types::ConversionId;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::query::LimitParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Read the `file` and optional `document_type` fields of an upload.
async fn read_upload(mut multipart: Multipart) -> AppResult<SubmitConversion> {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut document_type = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload.pdf").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Failed to read file: {e}")))?;
                file = Some((file_name, bytes.to_vec()));
            }
            Some("document_type") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(format!("Invalid document_type: {e}")))?;
                document_type = Some(value);
            }
            _ => {}
        }
    }

    let (file_name, bytes) =
        file.ok_or_else(|| AppError::BadRequest("Missing 'file' field".into()))?;
    Ok(SubmitConversion {
        file_name,
        document_type,
        bytes,
    })
}

/// POST /api/v1/conversions
///
/// Upload a PDF and start converting it. Costs one credit; returns 201
/// with the conversion in `processing`.
pub async fn create_conversion(
    auth: AuthUser,
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<impl IntoResponse> {
    let input = read_upload(multipart).await?;
    let conversion = state.service.submit(auth.user_id, input).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: conversion })))
}

/// GET /api/v1/conversions?limit=
pub async fn list_conversions(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> AppResult<impl IntoResponse> {
    let conversions = state.service.list(auth.user_id, params.limit).await?;
    Ok(Json(DataResponse { data: conversions }))
}

/// GET /api/v1/conversions/{id}
pub async fn get_conversion(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<ConversionId>,
) -> AppResult<impl IntoResponse> {
    let conversion = state.service.get(auth.user_id, id).await?;
    Ok(Json(DataResponse { data: conversion }))
}

/// DELETE /api/v1/conversions/{id}
///
/// Removes the record and its audit rows. Credits are not returned.
pub async fn delete_conversion(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<ConversionId>,
) -> AppResult<StatusCode> {
    state.service.delete(auth.user_id, id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/conversions/{id}/retry
///
/// Re-dispatch a failed conversion. The credit is charged only if the
/// processor accepts it.
pub async fn retry_conversion(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<ConversionId>,
) -> AppResult<impl IntoResponse> {
    let conversion = state.service.retry(auth.user_id, id).await?;
    Ok(Json(DataResponse { data: conversion }))
}
