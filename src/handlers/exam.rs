// src/handlers/exam.rs

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use validator::Validate;

use crate::{
    error::AppError,
    models::{
        exam::ExamSummary,
        exam_result::{
            LeaderboardEntry, LeaderboardQuery, SubmitExamRequest, SubmitResponse, SubmittedResult,
        },
        session::{
            AutosaveRequest, AutosaveResponse, SessionStatusResponse, StartSessionResponse,
        },
    },
    state::AppState,
    utils::jwt::Claims,
};

const DEFAULT_LEADERBOARD_LIMIT: i64 = 10;

/// Starts a timed exam session for the caller.
///
/// Returns the served questions without their answers and the session deadline.
#[utoipa::path(
    post,
    path = "/api/exams/{exam_id}/start",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 201, description = "Session started", body = StartSessionResponse),
        (status = 403, description = "Exam not open yet or already closed"),
        (status = 409, description = "A session is already in progress"),
        (status = 404, description = "Exam not found")
    ),
    security(("bearer" = []))
)]
pub async fn start_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let participant_id = claims.participant_id()?;
    let now = Utc::now();

    let started = state
        .sessions
        .start_session(exam_id, participant_id, now)
        .await?;

    let response = StartSessionResponse {
        session_id: started.session.id,
        exam: ExamSummary::from(&started.exam),
        started_at: started.session.started_at,
        ends_at: started.ends_at(),
        questions: started.questions,
        server_time: now,
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// Replaces the saved answers of the caller's active session.
#[utoipa::path(
    put,
    path = "/api/exams/{exam_id}/autosave",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    request_body = AutosaveRequest,
    responses(
        (status = 200, description = "Answers saved", body = AutosaveResponse),
        (status = 409, description = "No active session")
    ),
    security(("bearer" = []))
)]
pub async fn autosave(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<AutosaveRequest>,
) -> Result<impl IntoResponse, AppError> {
    let participant_id = claims.participant_id()?;

    let session = state
        .sessions
        .autosave(exam_id, participant_id, payload.answers, Utc::now())
        .await?;

    Ok(Json(AutosaveResponse {
        message: "Progress saved".to_string(),
        saved_at: session.last_activity.unwrap_or_else(Utc::now),
    }))
}

/// Current state of the caller's active session, for resuming after a reload.
#[utoipa::path(
    get,
    path = "/api/exams/{exam_id}/session",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    responses(
        (status = 200, description = "Active session", body = SessionStatusResponse),
        (status = 409, description = "No active session")
    ),
    security(("bearer" = []))
)]
pub async fn session_status(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let participant_id = claims.participant_id()?;
    let now = Utc::now();

    let (session, questions) = state
        .sessions
        .session_status(exam_id, participant_id)
        .await?;

    Ok(Json(SessionStatusResponse {
        session_id: session.id,
        exam_id: session.exam_id,
        started_at: session.started_at,
        ends_at: session.ends_at,
        time_left: session.seconds_left(now),
        answers: session.answers.0,
        questions,
        server_time: now,
    }))
}

/// Submits the caller's answers.
///
/// * Rejects submissions past the deadline plus grace.
/// * Scores on the server; client-reported scores are only logged.
/// * Ranks are refreshed in the background.
#[utoipa::path(
    post,
    path = "/api/exams/{exam_id}/submit",
    params(("exam_id" = i64, Path, description = "Exam ID")),
    request_body = SubmitExamRequest,
    responses(
        (status = 200, description = "Exam scored", body = SubmitResponse),
        (status = 409, description = "No active session or already submitted"),
        (status = 422, description = "Submitted after the deadline"),
        (status = 404, description = "Exam not found")
    ),
    security(("bearer" = []))
)]
pub async fn submit_exam(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(exam_id): Path<i64>,
    Json(payload): Json<SubmitExamRequest>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = payload.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    let participant_id = claims.participant_id()?;

    let outcome = state
        .sessions
        .submit(exam_id, participant_id, payload, Utc::now())
        .await?;

    let message = if outcome.passed() {
        "Congratulations! You passed the exam."
    } else {
        "Better luck next time!"
    };

    Ok(Json(SubmitResponse {
        result: SubmittedResult::from(&outcome.result),
        message: message.to_string(),
    }))
}

/// Top ranked results of an exam.
#[utoipa::path(
    get,
    path = "/api/exams/{exam_id}/leaderboard",
    params(("exam_id" = i64, Path, description = "Exam ID"), LeaderboardQuery),
    responses(
        (status = 200, description = "Ranked results", body = [LeaderboardEntry]),
        (status = 404, description = "Exam not found")
    ),
    security(("bearer" = []))
)]
pub async fn leaderboard(
    State(state): State<AppState>,
    Path(exam_id): Path<i64>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, AppError> {
    if let Err(validation_errors) = query.validate() {
        return Err(AppError::BadRequest(validation_errors.to_string()));
    }

    if state.catalog.exam(exam_id).await?.is_none() {
        return Err(AppError::ExamNotFound(exam_id));
    }

    let entries = state
        .results
        .leaderboard(exam_id, query.limit.unwrap_or(DEFAULT_LEADERBOARD_LIMIT))
        .await?;

    Ok(Json(entries))
}
