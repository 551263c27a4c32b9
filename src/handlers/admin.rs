// src/handlers/admin.rs

use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    error::AppError,
    models::exam_result::IssuedCertificate,
    handlers::results::issue_ranked,
    services::ranking::RankSummary,
    state::AppState,
};

/// Recomputes the ranks of an exam and waits for the outcome.
/// Admin only.
#[utoipa::path(
    post,
    path = "/api/admin/exams/{exam_id}/ranks",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Ranks rewritten", body = RankSummary),
        (status = 404, description = "Exam not found"),
        (status = 409, description = "Kept conflicting with concurrent submissions")
    ),
    security(("bearer" = []))
)]
pub async fn recompute_ranks(
    State(state): State<AppState>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if state.catalog.exam(exam_id).await?.is_none() {
        return Err(AppError::ExamNotFound(exam_id));
    }

    let summary = state.ranking.recompute_now(exam_id).await?;

    Ok(Json(summary))
}

/// Issues the certificate for any passing result.
/// Admin only.
#[utoipa::path(
    post,
    path = "/api/admin/results/{result_id}/certificate",
    params(("result_id" = i64, Path, description = "Result ID")),
    responses(
        (status = 200, description = "Certificate reference", body = IssuedCertificate),
        (status = 400, description = "Result did not pass"),
        (status = 404, description = "Result not found"),
        (status = 409, description = "Ranks could not be computed yet, retry")
    ),
    security(("bearer" = []))
)]
pub async fn issue_certificate(
    State(state): State<AppState>,
    Path(result_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = state
        .results
        .result(result_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {} not found", result_id)))?;

    let issued = issue_ranked(&state, &result).await?.ok_or_else(|| {
        AppError::CertificateNotEligible(format!("Result {} did not pass", result_id))
    })?;

    tracing::info!(result_id, "Certificate issued on admin request");

    Ok(Json(issued))
}
