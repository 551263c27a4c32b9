// src/models/session.rs

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, types::Json};
use utoipa::ToSchema;

use crate::models::{exam::ExamSummary, question::PublicQuestion};

/// Question ID to chosen option key. Sparse; `None` and "" both mean unanswered.
pub type AnswerMap = HashMap<i64, Option<String>>;

/// Represents the 'exam_sessions' table in the database.
/// At most one row per (exam, participant) has `is_active = true`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct ExamSession {
    pub id: i64,
    pub exam_id: i64,
    pub participant_id: i64,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub is_active: bool,

    /// Last autosaved answers, replaced wholesale on every save.
    #[schema(value_type = Object)]
    pub answers: Json<AnswerMap>,

    /// Questions served to this session, in the order they were shown.
    pub question_ids: Vec<i64>,

    pub last_activity: Option<DateTime<Utc>>,
}

impl ExamSession {
    /// Nominal length of the session in whole seconds, grace excluded.
    pub fn allotted_secs(&self) -> i64 {
        (self.ends_at - self.started_at).num_seconds()
    }

    pub fn elapsed_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.started_at).num_seconds()
    }

    pub fn seconds_left(&self, now: DateTime<Utc>) -> i64 {
        (self.ends_at - now).num_seconds().max(0)
    }
}

/// Data needed to open a session.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub exam_id: i64,
    pub participant_id: i64,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub question_ids: Vec<i64>,
}

/// Response of a successful session start.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StartSessionResponse {
    pub session_id: i64,
    pub exam: ExamSummary,
    pub questions: Vec<PublicQuestion>,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub server_time: DateTime<Utc>,
}

/// DTO for autosaving in-progress answers.
#[derive(Debug, Deserialize, ToSchema)]
pub struct AutosaveRequest {
    #[serde(default)]
    #[schema(value_type = Object)]
    pub answers: AnswerMap,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AutosaveResponse {
    pub message: String,
    pub saved_at: DateTime<Utc>,
}

/// Snapshot of an active session, used by clients to resume.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SessionStatusResponse {
    pub session_id: i64,
    pub exam_id: i64,
    pub started_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    /// Whole seconds until `ends_at`, never negative.
    pub time_left: i64,
    #[schema(value_type = Object)]
    pub answers: AnswerMap,
    pub questions: Vec<PublicQuestion>,
    pub server_time: DateTime<Utc>,
}
