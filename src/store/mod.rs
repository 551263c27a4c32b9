// src/store/mod.rs

//! Persistence seams of the exam core.
//!
//! Every mutation that must be atomic is a single trait method, so each backend
//! can map it onto its own transaction or lock.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        exam_result::{ExamResult, IssuedCertificate, LeaderboardEntry, NewResult, RankRow},
        question::Question,
        session::{AnswerMap, ExamSession, NewSession},
    },
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read access to exams and participant display names.
#[async_trait]
pub trait ExamCatalog: Send + Sync {
    async fn exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError>;

    async fn participant_name(&self, participant_id: i64) -> Result<Option<String>, AppError>;
}

/// Read-only access to the question set assigned to an exam.
#[async_trait]
pub trait QuestionBank: Send + Sync {
    /// Questions assigned to the exam, correct answers included, in assignment order.
    async fn questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates an active session unless one already exists for the pair.
    ///
    /// An active session whose `ends_at` is before `expired_before` is treated as
    /// abandoned and deactivated first.
    async fn open(
        &self,
        session: NewSession,
        expired_before: DateTime<Utc>,
    ) -> Result<ExamSession, AppError>;

    async fn active(
        &self,
        exam_id: i64,
        participant_id: i64,
    ) -> Result<Option<ExamSession>, AppError>;

    /// Replaces the answers of the active session wholesale.
    async fn save_answers(
        &self,
        exam_id: i64,
        participant_id: i64,
        answers: AnswerMap,
        at: DateTime<Utc>,
    ) -> Result<ExamSession, AppError>;

    /// Deactivates the session and stores its result as one unit.
    ///
    /// Fails with `NoActiveSession` when the session was already deactivated and with
    /// `AlreadySubmitted` when a result exists for the pair. Nothing is written on error.
    async fn complete(&self, session_id: i64, result: NewResult)
    -> Result<ExamResult, AppError>;
}

#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn result(&self, result_id: i64) -> Result<Option<ExamResult>, AppError>;

    /// Results of one participant, newest first, with the unpaged total.
    async fn results_for_participant(
        &self,
        participant_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExamResult>, i64), AppError>;

    /// Passing results of an exam that do not carry a certificate yet.
    async fn uncertified_passes(&self, exam_id: i64) -> Result<Vec<i64>, AppError>;

    async fn rank_snapshot(&self, exam_id: i64) -> Result<Vec<RankRow>, AppError>;

    /// Writes ranks for the whole exam.
    ///
    /// Fails with `WriteConflict` if the number of results for the exam differs from
    /// `expected_count`, i.e. a submission landed after the snapshot was taken.
    async fn apply_ranks(
        &self,
        exam_id: i64,
        expected_count: usize,
        ranks: &[(i64, i32)],
    ) -> Result<(), AppError>;

    async fn leaderboard(
        &self,
        exam_id: i64,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError>;

    /// Stores the certificate reference unless one is already present.
    /// Returns whatever reference ends up stored.
    async fn attach_certificate(
        &self,
        result_id: i64,
        certificate_number: &str,
        certificate_url: &str,
    ) -> Result<IssuedCertificate, AppError>;
}

/// Everything the service needs from a backend.
pub trait ExamStore: ExamCatalog + QuestionBank + SessionStore + ResultStore {}

impl<T> ExamStore for T where T: ExamCatalog + QuestionBank + SessionStore + ResultStore {}
