// src/store/postgres.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, types::Json};

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        exam_result::{ExamResult, IssuedCertificate, LeaderboardEntry, NewResult, RankRow},
        question::Question,
        session::{AnswerMap, ExamSession, NewSession},
    },
    store::{ExamCatalog, QuestionBank, ResultStore, SessionStore},
};

const SESSION_COLUMNS: &str = "id, exam_id, participant_id, started_at, ends_at, is_active, \
     answers, question_ids, last_activity";

const RESULT_COLUMNS: &str = "id, exam_id, participant_id, answers, question_ids, score, \
     total_questions, attempted_questions, percentage, total_time, submitted_at, rank, status, \
     certificate_number, certificate_url";

/// Store backed by the Postgres schema in `migrations/`.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl ExamCatalog for PgStore {
    async fn exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        let exam = sqlx::query_as::<_, Exam>(
            r#"
            SELECT
                id, title, description, duration, passing_score,
                start_time, end_time, randomize_questions, questions_per_exam
            FROM exams
            WHERE id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(exam)
    }

    async fn participant_name(&self, participant_id: i64) -> Result<Option<String>, AppError> {
        let name = sqlx::query_scalar::<_, String>("SELECT name FROM participants WHERE id = $1")
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(name)
    }
}

#[async_trait]
impl QuestionBank for PgStore {
    async fn questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError> {
        let questions = sqlx::query_as::<_, Question>(
            r#"
            SELECT
                q.id, q.prompt, q.options, q.correct_answer, q.difficulty, q.subject
            FROM exam_questions eq
            JOIN questions q ON q.id = eq.question_id
            WHERE eq.exam_id = $1
            ORDER BY eq.position, q.id
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch questions for exam {}: {:?}", exam_id, e);
            AppError::from(e)
        })?;

        Ok(questions)
    }
}

#[async_trait]
impl SessionStore for PgStore {
    async fn open(
        &self,
        session: NewSession,
        expired_before: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            UPDATE exam_sessions SET is_active = FALSE
            WHERE exam_id = $1 AND participant_id = $2 AND is_active AND ends_at < $3
            "#,
        )
        .bind(session.exam_id)
        .bind(session.participant_id)
        .bind(expired_before)
        .execute(&mut *tx)
        .await?;

        // The partial unique index on active sessions rejects a concurrent second start.
        let sql = format!(
            "INSERT INTO exam_sessions \
                 (exam_id, participant_id, started_at, ends_at, is_active, answers, question_ids, last_activity) \
             VALUES ($1, $2, $3, $4, TRUE, $5, $6, $3) \
             RETURNING {}",
            SESSION_COLUMNS
        );
        let created = sqlx::query_as::<_, ExamSession>(&sql)
            .bind(session.exam_id)
            .bind(session.participant_id)
            .bind(session.started_at)
            .bind(session.ends_at)
            .bind(Json(AnswerMap::new()))
            .bind(&session.question_ids)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::SessionAlreadyActive {
                        exam_id: session.exam_id,
                    }
                } else {
                    tracing::error!("Failed to create exam session: {:?}", e);
                    AppError::from(e)
                }
            })?;

        tx.commit().await?;
        Ok(created)
    }

    async fn active(
        &self,
        exam_id: i64,
        participant_id: i64,
    ) -> Result<Option<ExamSession>, AppError> {
        let sql = format!(
            "SELECT {} FROM exam_sessions WHERE exam_id = $1 AND participant_id = $2 AND is_active",
            SESSION_COLUMNS
        );
        let session = sqlx::query_as::<_, ExamSession>(&sql)
            .bind(exam_id)
            .bind(participant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(session)
    }

    async fn save_answers(
        &self,
        exam_id: i64,
        participant_id: i64,
        answers: AnswerMap,
        at: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        let sql = format!(
            "UPDATE exam_sessions SET answers = $3, last_activity = $4 \
             WHERE exam_id = $1 AND participant_id = $2 AND is_active \
             RETURNING {}",
            SESSION_COLUMNS
        );
        sqlx::query_as::<_, ExamSession>(&sql)
            .bind(exam_id)
            .bind(participant_id)
            .bind(Json(answers))
            .bind(at)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(AppError::NoActiveSession { exam_id })
    }

    async fn complete(
        &self,
        session_id: i64,
        result: NewResult,
    ) -> Result<ExamResult, AppError> {
        let mut tx = self.pool.begin().await?;

        // Only one submit can flip the flag; the loser sees zero rows.
        let deactivated = sqlx::query(
            "UPDATE exam_sessions SET is_active = FALSE, last_activity = $2 WHERE id = $1 AND is_active",
        )
        .bind(session_id)
        .bind(result.submitted_at)
        .execute(&mut *tx)
        .await?;

        if deactivated.rows_affected() == 0 {
            return Err(AppError::NoActiveSession {
                exam_id: result.exam_id,
            });
        }

        let sql = format!(
            "INSERT INTO exam_results \
                 (exam_id, participant_id, answers, question_ids, score, total_questions, \
                  attempted_questions, percentage, total_time, submitted_at, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING {}",
            RESULT_COLUMNS
        );
        let stored = sqlx::query_as::<_, ExamResult>(&sql)
            .bind(result.exam_id)
            .bind(result.participant_id)
            .bind(Json(&result.answers))
            .bind(&result.question_ids)
            .bind(result.score)
            .bind(result.total_questions)
            .bind(result.attempted_questions)
            .bind(result.percentage)
            .bind(result.total_time)
            .bind(result.submitted_at)
            .bind(result.status.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    AppError::AlreadySubmitted {
                        exam_id: result.exam_id,
                    }
                } else {
                    tracing::error!("Failed to insert exam result: {:?}", e);
                    AppError::from(e)
                }
            })?;

        tx.commit().await?;
        Ok(stored)
    }
}

#[async_trait]
impl ResultStore for PgStore {
    async fn result(&self, result_id: i64) -> Result<Option<ExamResult>, AppError> {
        let sql = format!("SELECT {} FROM exam_results WHERE id = $1", RESULT_COLUMNS);
        let result = sqlx::query_as::<_, ExamResult>(&sql)
            .bind(result_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(result)
    }

    async fn results_for_participant(
        &self,
        participant_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExamResult>, i64), AppError> {
        let total =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM exam_results WHERE participant_id = $1")
                .bind(participant_id)
                .fetch_one(&self.pool)
                .await?;

        let sql = format!(
            "SELECT {} FROM exam_results WHERE participant_id = $1 \
             ORDER BY submitted_at DESC, id DESC LIMIT $2 OFFSET $3",
            RESULT_COLUMNS
        );
        let results = sqlx::query_as::<_, ExamResult>(&sql)
            .bind(participant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?;

        Ok((results, total))
    }

    async fn uncertified_passes(&self, exam_id: i64) -> Result<Vec<i64>, AppError> {
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT id FROM exam_results
            WHERE exam_id = $1 AND status = 'passed' AND certificate_url IS NULL
            ORDER BY id
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids)
    }

    async fn rank_snapshot(&self, exam_id: i64) -> Result<Vec<RankRow>, AppError> {
        let rows = sqlx::query_as::<_, RankRow>(
            r#"
            SELECT id AS result_id, percentage, total_time, submitted_at
            FROM exam_results
            WHERE exam_id = $1
            "#,
        )
        .bind(exam_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    async fn apply_ranks(
        &self,
        exam_id: i64,
        expected_count: usize,
        ranks: &[(i64, i32)],
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        // Serializes rank writers for the same exam across service instances.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(exam_id)
            .execute(&mut *tx)
            .await?;

        let current =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM exam_results WHERE exam_id = $1")
                .bind(exam_id)
                .fetch_one(&mut *tx)
                .await?;

        if current != expected_count as i64 {
            return Err(AppError::WriteConflict(format!(
                "Exam {} has {} results, snapshot had {}",
                exam_id, current, expected_count
            )));
        }

        let (ids, values): (Vec<i64>, Vec<i32>) = ranks.iter().copied().unzip();

        sqlx::query(
            r#"
            UPDATE exam_results AS r
            SET rank = v.rank
            FROM UNNEST($1::BIGINT[], $2::INTEGER[]) AS v(id, rank)
            WHERE r.id = v.id AND r.exam_id = $3
            "#,
        )
        .bind(&ids)
        .bind(&values)
        .bind(exam_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn leaderboard(
        &self,
        exam_id: i64,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let entries = sqlx::query_as::<_, LeaderboardEntry>(
            r#"
            SELECT
                r.rank AS rank,
                r.participant_id,
                p.name AS participant_name,
                r.percentage,
                r.total_time,
                r.submitted_at
            FROM exam_results r
            LEFT JOIN participants p ON p.id = r.participant_id
            WHERE r.exam_id = $1 AND r.rank IS NOT NULL
            ORDER BY r.rank, r.submitted_at, r.id
            LIMIT $2
            "#,
        )
        .bind(exam_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!("Failed to fetch leaderboard: {:?}", e);
            AppError::from(e)
        })?;

        Ok(entries)
    }

    async fn attach_certificate(
        &self,
        result_id: i64,
        certificate_number: &str,
        certificate_url: &str,
    ) -> Result<IssuedCertificate, AppError> {
        let updated = sqlx::query_as::<_, (String, String)>(
            r#"
            UPDATE exam_results
            SET certificate_number = $2, certificate_url = $3
            WHERE id = $1 AND certificate_url IS NULL
            RETURNING certificate_number, certificate_url
            "#,
        )
        .bind(result_id)
        .bind(certificate_number)
        .bind(certificate_url)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((certificate_number, certificate_url)) = updated {
            return Ok(IssuedCertificate {
                certificate_number,
                certificate_url,
            });
        }

        // Someone else got there first, or the row does not exist.
        let existing = sqlx::query_as::<_, (Option<String>, Option<String>)>(
            "SELECT certificate_number, certificate_url FROM exam_results WHERE id = $1",
        )
        .bind(result_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound("Result not found".to_string()))?;

        match existing {
            (Some(certificate_number), Some(certificate_url)) => Ok(IssuedCertificate {
                certificate_number,
                certificate_url,
            }),
            _ => Err(AppError::WriteConflict(format!(
                "Certificate for result {} changed concurrently",
                result_id
            ))),
        }
    }
}
