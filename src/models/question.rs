// src/models/question.rs

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sqlx::{prelude::FromRow, types::Json};
use utoipa::ToSchema;

/// Option key ("A".."D") to option text, kept in key order.
pub type OptionMap = BTreeMap<String, String>;

/// Represents the 'questions' table in the database.
/// Carries the correct answer, so it never leaves the server before a result exists.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Question {
    pub id: i64,

    /// The text content of the question.
    pub prompt: String,

    /// Stored as a JSON object in the database.
    pub options: Json<OptionMap>,

    /// The correct option key.
    pub correct_answer: String,

    pub difficulty: Option<String>,

    pub subject: Option<String>,
}

/// DTO for sending question to client (excludes the correct answer).
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PublicQuestion {
    pub id: i64,
    pub prompt: String,
    pub options: OptionMap,
    pub difficulty: Option<String>,
    pub subject: Option<String>,
}

impl From<&Question> for PublicQuestion {
    fn from(q: &Question) -> Self {
        Self {
            id: q.id,
            prompt: q.prompt.clone(),
            options: q.options.0.clone(),
            difficulty: q.difficulty.clone(),
            subject: q.subject.clone(),
        }
    }
}

/// One line of a post-submission review.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ReviewedQuestion {
    pub id: i64,
    pub prompt: String,
    pub options: OptionMap,
    pub correct_answer: String,
    pub user_answer: Option<String>,
    pub is_correct: bool,
}
