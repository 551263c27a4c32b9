// src/services/review.rs

use crate::{
    models::{
        exam_result::{ExamResult, ResponseReview, ReviewSummary},
        question::{Question, ReviewedQuestion},
    },
    services::exam_session::served_subset,
};

/// Builds the per-question breakdown of a stored result.
///
/// `bank` is the exam's current question set; only the questions the result was
/// scored against are listed, in the order they were served.
pub fn build_review(result: &ExamResult, bank: Vec<Question>, exam_title: String) -> ResponseReview {
    let responses: Vec<ReviewedQuestion> = served_subset(bank, &result.question_ids)
        .into_iter()
        .map(|q| {
            let user_answer = result
                .answers
                .get(&q.id)
                .cloned()
                .flatten()
                .filter(|a| !a.is_empty());
            let is_correct = user_answer.as_deref() == Some(q.correct_answer.as_str());

            ReviewedQuestion {
                id: q.id,
                prompt: q.prompt,
                options: q.options.0,
                correct_answer: q.correct_answer,
                user_answer,
                is_correct,
            }
        })
        .collect();

    let correct_answers = responses.iter().filter(|r| r.is_correct).count();
    let summary = ReviewSummary {
        total_questions: responses.len(),
        correct_answers,
        wrong_answers: responses.len() - correct_answers,
        score_percentage: result.percentage,
    };

    ResponseReview {
        exam_title,
        exam_result_id: result.id,
        responses,
        summary,
    }
}
