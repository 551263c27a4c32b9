// src/services/scoring.rs

//! Authoritative scoring of a submitted answer map.

use serde::Serialize;

use crate::models::{question::Question, session::AnswerMap};

/// Allowed drift between a client-reported percentage and ours before it is reported.
const CLIENT_PERCENTAGE_TOLERANCE: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreCard {
    /// Number of questions answered with the correct option key.
    pub score: i32,
    pub total_questions: i32,
    /// Questions carrying a non-empty answer, right or wrong.
    pub attempted_questions: i32,
    pub percentage: i32,
}

/// Scores `answers` against the authoritative question set.
///
/// Only questions in `questions` count; answers for anything else are ignored.
/// Comparison is exact and case-sensitive on the option key.
pub fn score(answers: &AnswerMap, questions: &[Question]) -> ScoreCard {
    let mut correct = 0;
    let mut attempted = 0;

    for question in questions {
        let given = answers
            .get(&question.id)
            .and_then(|a| a.as_deref())
            .filter(|a| !a.is_empty());

        if let Some(given) = given {
            attempted += 1;
            if given == question.correct_answer {
                correct += 1;
            }
        }
    }

    let total = questions.len() as i32;
    ScoreCard {
        score: correct,
        total_questions: total,
        attempted_questions: attempted,
        percentage: percentage(correct, total),
    }
}

/// `score / total * 100` rounded half-up to an integer, 0 when there are no questions.
///
/// Integer arithmetic keeps borderline values such as 2/3 or 1/8 exact.
pub fn percentage(score: i32, total: i32) -> i32 {
    if total <= 0 {
        return 0;
    }
    let score = i64::from(score.clamp(0, total));
    let total = i64::from(total);
    ((200 * score + total) / (2 * total)) as i32
}

/// A client-reported value that disagrees with the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreMismatch {
    pub client_score: Option<i32>,
    pub client_percentage: Option<f64>,
}

/// Compares what the client claims with the engine's card.
///
/// Returns `None` when the client reported nothing or agrees.
pub fn compare_client_report(
    card: &ScoreCard,
    client_score: Option<i32>,
    client_percentage: Option<f64>,
) -> Option<ScoreMismatch> {
    let score_differs = client_score.is_some_and(|s| s != card.score);
    let percentage_differs = client_percentage
        .is_some_and(|p| !p.is_finite() || (p - f64::from(card.percentage)).abs() > CLIENT_PERCENTAGE_TOLERANCE);

    if score_differs || percentage_differs {
        Some(ScoreMismatch {
            client_score,
            client_percentage,
        })
    } else {
        None
    }
}
