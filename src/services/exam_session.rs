// src/services/exam_session.rs

//! Session lifecycle: start, autosave, resume and submit of a timed exam.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::{Rng, seq::SliceRandom};
use tracing::{info, warn};

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        exam_result::{ExamResult, NewResult, ResultStatus, SubmitExamRequest},
        question::{PublicQuestion, Question},
        session::{AnswerMap, ExamSession, NewSession},
    },
    services::{ranking::RankingQueue, scoring},
    store::{ExamCatalog, QuestionBank, SessionStore},
};

/// A freshly opened session and what the participant gets to see.
#[derive(Debug)]
pub struct StartedSession {
    pub exam: Exam,
    pub session: ExamSession,
    /// Served questions in display order, without correct answers.
    pub questions: Vec<PublicQuestion>,
}

impl StartedSession {
    pub fn ends_at(&self) -> DateTime<Utc> {
        self.session.ends_at
    }
}

#[derive(Debug)]
pub struct SubmitOutcome {
    pub result: ExamResult,
}

impl SubmitOutcome {
    pub fn passed(&self) -> bool {
        self.result.status == ResultStatus::Passed
    }
}

/// Picks the questions a session will show.
///
/// The shuffle runs before the cap, so with randomization on every participant
/// gets a random subset; without it everyone gets the first `cap` in bank order.
pub fn select_questions<R>(
    mut questions: Vec<Question>,
    randomize: bool,
    cap: Option<i32>,
    rng: &mut R,
) -> Vec<Question>
where
    R: Rng + ?Sized,
{
    if randomize {
        questions.shuffle(rng);
    }
    if let Some(cap) = cap {
        let cap = cap.max(0) as usize;
        if cap < questions.len() {
            questions.truncate(cap);
        }
    }
    questions
}

/// Questions of `ids` in that order. An empty list means the whole bank.
///
/// Ids no longer present in the bank are skipped.
pub fn served_subset(bank: Vec<Question>, ids: &[i64]) -> Vec<Question> {
    if ids.is_empty() {
        return bank;
    }
    let mut by_id: HashMap<i64, Question> = bank.into_iter().map(|q| (q.id, q)).collect();
    ids.iter().filter_map(|id| by_id.remove(id)).collect()
}

/// Client clocks may lag the server by this much before a report counts as drift.
const CLIENT_CLOCK_TOLERANCE_SECS: i64 = 5;

/// Ranking uses the server's measurement. The flag marks a client report that disagrees.
fn resolve_total_time(client: Option<i64>, elapsed_secs: i64) -> (i64, bool) {
    let drifted = client.is_some_and(|t| (t - elapsed_secs).abs() > CLIENT_CLOCK_TOLERANCE_SECS);
    (elapsed_secs, drifted)
}

/// Same as [`resolve_total_time`] for the submission timestamp.
fn resolve_submitted_at(
    client: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> (DateTime<Utc>, bool) {
    let drifted =
        client.is_some_and(|at| (now - at).num_seconds().abs() > CLIENT_CLOCK_TOLERANCE_SECS);
    (now, drifted)
}

pub struct ExamSessionManager {
    catalog: Arc<dyn ExamCatalog>,
    bank: Arc<dyn QuestionBank>,
    sessions: Arc<dyn SessionStore>,
    ranking: RankingQueue,
    grace: Duration,
}

impl ExamSessionManager {
    pub fn new(
        catalog: Arc<dyn ExamCatalog>,
        bank: Arc<dyn QuestionBank>,
        sessions: Arc<dyn SessionStore>,
        ranking: RankingQueue,
        grace: Duration,
    ) -> Self {
        Self {
            catalog,
            bank,
            sessions,
            ranking,
            grace,
        }
    }

    async fn load_exam(&self, exam_id: i64) -> Result<Exam, AppError> {
        self.catalog
            .exam(exam_id)
            .await?
            .ok_or(AppError::ExamNotFound(exam_id))
    }

    async fn served_questions(&self, exam_id: i64, ids: &[i64]) -> Result<Vec<Question>, AppError> {
        let bank = self.bank.questions(exam_id).await?;
        let served = served_subset(bank, ids);
        if !ids.is_empty() && served.len() != ids.len() {
            warn!(
                exam_id,
                expected = ids.len(),
                found = served.len(),
                "Served questions are missing from the bank"
            );
        }
        Ok(served)
    }

    /// Opens a time-boxed session for the participant.
    #[tracing::instrument(skip(self))]
    pub async fn start_session(
        &self,
        exam_id: i64,
        participant_id: i64,
        now: DateTime<Utc>,
    ) -> Result<StartedSession, AppError> {
        let exam = self.load_exam(exam_id).await?;
        exam.check_window(now)?;

        let expired_before = now - self.grace;

        // Fail fast before touching the question bank; `open` re-checks atomically.
        if let Some(active) = self.sessions.active(exam_id, participant_id).await? {
            if active.ends_at >= expired_before {
                return Err(AppError::SessionAlreadyActive { exam_id });
            }
        }

        let bank = self.bank.questions(exam_id).await?;
        let served = select_questions(
            bank,
            exam.randomize_questions,
            exam.questions_per_exam,
            &mut rand::thread_rng(),
        );

        let session = self
            .sessions
            .open(
                NewSession {
                    exam_id,
                    participant_id,
                    started_at: now,
                    ends_at: now + exam.duration(),
                    question_ids: served.iter().map(|q| q.id).collect(),
                },
                expired_before,
            )
            .await?;

        info!(
            exam_id,
            participant_id,
            session_id = session.id,
            questions = served.len(),
            ends_at = %session.ends_at,
            "Exam session started"
        );

        Ok(StartedSession {
            questions: served.iter().map(PublicQuestion::from).collect(),
            exam,
            session,
        })
    }

    /// Replaces the saved answers of the active session (last write wins).
    #[tracing::instrument(skip(self, answers))]
    pub async fn autosave(
        &self,
        exam_id: i64,
        participant_id: i64,
        answers: AnswerMap,
        now: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        self.sessions
            .save_answers(exam_id, participant_id, answers, now)
            .await
    }

    /// The active session with its served questions, for resuming after a reload.
    #[tracing::instrument(skip(self))]
    pub async fn session_status(
        &self,
        exam_id: i64,
        participant_id: i64,
    ) -> Result<(ExamSession, Vec<PublicQuestion>), AppError> {
        let session = self
            .sessions
            .active(exam_id, participant_id)
            .await?
            .ok_or(AppError::NoActiveSession { exam_id })?;

        let questions = self
            .served_questions(exam_id, &session.question_ids)
            .await?
            .iter()
            .map(PublicQuestion::from)
            .collect();

        Ok((session, questions))
    }

    /// Scores and records the attempt, then schedules a rank recompute.
    ///
    /// Any score the client reports is compared and logged, never stored.
    #[tracing::instrument(skip(self, submission), fields(answers = submission.answers.len()))]
    pub async fn submit(
        &self,
        exam_id: i64,
        participant_id: i64,
        submission: SubmitExamRequest,
        now: DateTime<Utc>,
    ) -> Result<SubmitOutcome, AppError> {
        let exam = self.load_exam(exam_id).await?;

        let session = self
            .sessions
            .active(exam_id, participant_id)
            .await?
            .ok_or(AppError::NoActiveSession { exam_id })?;

        if now - session.started_at > (session.ends_at - session.started_at) + self.grace {
            return Err(AppError::ExamTimeExceeded {
                elapsed_secs: session.elapsed_secs(now),
                allowed_secs: session.allotted_secs() + self.grace.num_seconds(),
            });
        }

        let questions = self
            .served_questions(exam_id, &session.question_ids)
            .await?;
        let card = scoring::score(&submission.answers, &questions);

        if let Some(mismatch) = scoring::compare_client_report(
            &card,
            submission.client_score,
            submission.client_percentage,
        ) {
            warn!(
                exam_id,
                participant_id,
                client_score = ?mismatch.client_score,
                client_percentage = ?mismatch.client_percentage,
                server_score = card.score,
                server_percentage = card.percentage,
                "Score mismatch, using server score"
            );
        }

        let elapsed_secs = session.elapsed_secs(now).max(0);
        let (total_time, time_drifted) = resolve_total_time(submission.total_time, elapsed_secs);
        let (submitted_at, clock_drifted) = resolve_submitted_at(submission.submitted_at, now);
        if time_drifted || clock_drifted {
            warn!(
                exam_id,
                participant_id,
                client_total_time = ?submission.total_time,
                client_submitted_at = ?submission.submitted_at,
                elapsed_secs,
                "Client timing disagrees with the server, using server measurement"
            );
        }

        let status = if exam.is_passing(card.percentage) {
            ResultStatus::Passed
        } else {
            ResultStatus::Failed
        };

        let result = self
            .sessions
            .complete(
                session.id,
                NewResult {
                    exam_id,
                    participant_id,
                    answers: submission.answers,
                    question_ids: session.question_ids.clone(),
                    score: card.score,
                    total_questions: card.total_questions,
                    attempted_questions: card.attempted_questions,
                    percentage: card.percentage,
                    total_time,
                    submitted_at,
                    status,
                },
            )
            .await?;

        info!(
            exam_id,
            participant_id,
            result_id = result.id,
            score = result.score,
            percentage = result.percentage,
            status = result.status.as_str(),
            "Exam submitted"
        );

        self.ranking.enqueue(exam_id);

        Ok(SubmitOutcome { result })
    }
}
