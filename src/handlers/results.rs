// src/handlers/results.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    response::IntoResponse,
};
use validator::Validate;

use crate::{
    error::AppError,
    models::exam_result::{
        ExamResult, IssuedCertificate, ListResultsQuery, ResponseReview, ResultsPage,
    },
    services::review::build_review,
    state::AppState,
    utils::jwt::Claims,
};

const DEFAULT_PAGE_SIZE: i64 = 20;

/// Loads a result and checks that it belongs to the caller.
async fn owned_result(
    state: &AppState,
    claims: &Claims,
    result_id: i64,
) -> Result<ExamResult, AppError> {
    let participant_id = claims.participant_id()?;

    let result = state
        .results
        .result(result_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Result {} not found", result_id)))?;

    if result.participant_id != participant_id {
        return Err(AppError::Forbidden(
            "You can only access your own results".to_string(),
        ));
    }
    Ok(result)
}

/// Issues a result's certificate, ranking the exam first if this result has no rank yet.
pub(crate) async fn issue_ranked(
    state: &AppState,
    result: &ExamResult,
) -> Result<Option<IssuedCertificate>, AppError> {
    if result.rank.is_none() {
        state.ranking.recompute_now(result.exam_id).await?;
    }
    state.certificates.issue(result.id).await
}

/// Lists the caller's results, newest first.
#[utoipa::path(
    get,
    path = "/api/results",
    params(ListResultsQuery),
    responses((status = 200, description = "Page of results", body = ResultsPage)),
    security(("bearer" = []))
)]
pub async fn list_my_results(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Query(query): Query<ListResultsQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = query.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let participant_id = claims.participant_id()?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let (results, total) = state
        .results
        .results_for_participant(participant_id, limit, offset)
        .await?;

    Ok(Json(ResultsPage {
        results,
        total,
        limit,
        offset,
    }))
}

/// Per-question review of one of the caller's results, correct answers included.
#[utoipa::path(
    get,
    path = "/api/results/{result_id}/responses",
    params(("result_id" = i64, Path, description = "Result ID")),
    responses(
        (status = 200, description = "Response review", body = ResponseReview),
        (status = 403, description = "Result belongs to someone else"),
        (status = 404, description = "Result not found")
    ),
    security(("bearer" = []))
)]
pub async fn result_responses(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(result_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = owned_result(&state, &claims, result_id).await?;

    let exam_title = state
        .catalog
        .exam(result.exam_id)
        .await?
        .map(|exam| exam.title)
        .unwrap_or_else(|| "Exam".to_string());

    let bank = state.bank.questions(result.exam_id).await?;

    Ok(Json(build_review(&result, bank, exam_title)))
}

/// Issues (or returns the existing) certificate for one of the caller's results.
#[utoipa::path(
    post,
    path = "/api/results/{result_id}/certificate",
    params(("result_id" = i64, Path, description = "Result ID")),
    responses(
        (status = 200, description = "Certificate reference", body = IssuedCertificate),
        (status = 400, description = "Result did not pass"),
        (status = 403, description = "Result belongs to someone else"),
        (status = 404, description = "Result not found"),
        (status = 409, description = "Ranks could not be computed yet, retry")
    ),
    security(("bearer" = []))
)]
pub async fn request_certificate(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(result_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let result = owned_result(&state, &claims, result_id).await?;

    let issued = issue_ranked(&state, &result).await?.ok_or_else(|| {
        AppError::CertificateNotEligible("Certificates are only issued for passing results".into())
    })?;

    Ok(Json(issued))
}
