// src/models/exam_result.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use utoipa::{IntoParams, ToSchema};
use validator::Validate;

use crate::{
    error::AppError,
    models::{question::ReviewedQuestion, session::AnswerMap},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Passed,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Passed => "passed",
            ResultStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for ResultStatus {
    type Error = AppError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "passed" => Ok(ResultStatus::Passed),
            "failed" => Ok(ResultStatus::Failed),
            other => Err(AppError::InternalServerError(format!(
                "Unknown result status '{}'",
                other
            ))),
        }
    }
}

/// Represents the 'exam_results' table in the database.
/// Exactly one row per (exam, participant) once submitted.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ExamResult {
    pub id: i64,
    pub exam_id: i64,
    pub participant_id: i64,

    #[schema(value_type = Object)]
    pub answers: Json<AnswerMap>,

    /// The question set this result was scored against.
    pub question_ids: Vec<i64>,

    /// Number of correct answers.
    pub score: i32,
    pub total_questions: i32,
    pub attempted_questions: i32,
    pub percentage: i32,

    /// Seconds spent on the attempt.
    pub total_time: i64,
    pub submitted_at: DateTime<Utc>,

    /// Competition rank within the exam. Empty until the ranking pass has run.
    pub rank: Option<i32>,

    #[sqlx(try_from = "String")]
    pub status: ResultStatus,

    pub certificate_number: Option<String>,
    pub certificate_url: Option<String>,
}

/// Data needed to persist a scored attempt.
#[derive(Debug, Clone)]
pub struct NewResult {
    pub exam_id: i64,
    pub participant_id: i64,
    pub answers: AnswerMap,
    pub question_ids: Vec<i64>,
    pub score: i32,
    pub total_questions: i32,
    pub attempted_questions: i32,
    pub percentage: i32,
    pub total_time: i64,
    pub submitted_at: DateTime<Utc>,
    pub status: ResultStatus,
}

/// The ordering key of one result for ranking.
#[derive(Debug, Clone, FromRow)]
pub struct RankRow {
    pub result_id: i64,
    pub percentage: i32,
    pub total_time: i64,
    pub submitted_at: DateTime<Utc>,
}

/// Aggregated struct for displaying the leaderboard.
#[derive(Debug, Serialize, Deserialize, FromRow, ToSchema)]
pub struct LeaderboardEntry {
    pub rank: i32,
    pub participant_id: i64,
    pub participant_name: Option<String>,
    pub percentage: i32,
    pub total_time: i64,
    pub submitted_at: DateTime<Utc>,
}

/// DTO for submitting an exam attempt.
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SubmitExamRequest {
    /// Key: Question ID, Value: selected option key.
    #[serde(default)]
    #[schema(value_type = Object)]
    pub answers: AnswerMap,

    /// Seconds the client believes it spent.
    #[serde(default, alias = "totalTime")]
    #[validate(range(min = 0))]
    pub total_time: Option<i64>,

    #[serde(default, alias = "submittedAt")]
    pub submitted_at: Option<DateTime<Utc>>,

    /// Score the client computed locally. Only compared, never stored.
    #[serde(default, alias = "clientScore")]
    pub client_score: Option<i32>,

    #[serde(default, alias = "clientPercentage")]
    pub client_percentage: Option<f64>,
}

/// Result fields returned straight after a submit.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmittedResult {
    pub id: i64,
    pub score: i32,
    pub total_questions: i32,
    pub attempted_questions: i32,
    pub percentage: i32,
    pub total_time: i64,
    pub submitted_at: DateTime<Utc>,
    pub rank: Option<i32>,
    pub status: ResultStatus,
}

impl From<&ExamResult> for SubmittedResult {
    fn from(r: &ExamResult) -> Self {
        Self {
            id: r.id,
            score: r.score,
            total_questions: r.total_questions,
            attempted_questions: r.attempted_questions,
            percentage: r.percentage,
            total_time: r.total_time,
            submitted_at: r.submitted_at,
            rank: r.rank,
            status: r.status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub result: SubmittedResult,
    pub message: String,
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListResultsQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
    #[validate(range(min = 0))]
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize, Validate, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct LeaderboardQuery {
    #[validate(range(min = 1, max = 100))]
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResultsPage {
    pub results: Vec<ExamResult>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewSummary {
    pub total_questions: usize,
    pub correct_answers: usize,
    pub wrong_answers: usize,
    pub score_percentage: i32,
}

/// Per-question breakdown of a submitted attempt, correct answers included.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ResponseReview {
    pub exam_title: String,
    pub exam_result_id: i64,
    pub responses: Vec<ReviewedQuestion>,
    pub summary: ReviewSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct IssuedCertificate {
    pub certificate_number: String,
    pub certificate_url: String,
}
