// src/models/exam.rs

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

use crate::error::AppError;

/// Represents the 'exams' table in the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize, ToSchema)]
pub struct Exam {
    pub id: i64,

    pub title: String,

    pub description: Option<String>,

    /// Length of one attempt, in minutes.
    pub duration: i32,

    /// Minimum percentage (0-100, inclusive) counted as a pass.
    pub passing_score: i32,

    /// Sessions may not be opened before this instant.
    pub start_time: Option<DateTime<Utc>>,

    /// Sessions may not be opened after this instant.
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default)]
    pub randomize_questions: bool,

    /// Cap on the number of questions served per session.
    pub questions_per_exam: Option<i32>,
}

impl Exam {
    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration))
    }

    /// Checks `now` against the optional opening window. Unset bounds never reject.
    pub fn check_window(&self, now: DateTime<Utc>) -> Result<(), AppError> {
        if let Some(opens_at) = self.start_time {
            if now < opens_at {
                return Err(AppError::ExamNotYetOpen {
                    exam_id: self.id,
                    opens_at,
                });
            }
        }
        if let Some(closed_at) = self.end_time {
            if now > closed_at {
                return Err(AppError::ExamClosed {
                    exam_id: self.id,
                    closed_at,
                });
            }
        }
        Ok(())
    }

    pub fn is_passing(&self, percentage: i32) -> bool {
        percentage >= self.passing_score
    }
}

/// Exam metadata returned with a new session (no scheduling internals).
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ExamSummary {
    pub id: i64,
    pub title: String,
    pub description: Option<String>,
    pub duration: i32,
    pub passing_score: i32,
}

impl From<&Exam> for ExamSummary {
    fn from(exam: &Exam) -> Self {
        Self {
            id: exam.id,
            title: exam.title.clone(),
            description: exam.description.clone(),
            duration: exam.duration,
            passing_score: exam.passing_score,
        }
    }
}
