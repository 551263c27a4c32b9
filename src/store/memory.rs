// src/store/memory.rs

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::types::Json;
use tokio::sync::Mutex;

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        exam_result::{
            ExamResult, IssuedCertificate, LeaderboardEntry, NewResult, RankRow, ResultStatus,
        },
        question::{OptionMap, Question},
        session::{AnswerMap, ExamSession, NewSession},
    },
    store::{ExamCatalog, QuestionBank, ResultStore, SessionStore},
};

#[derive(Default)]
struct MemoryState {
    exams: HashMap<i64, Exam>,
    questions: HashMap<i64, Question>,
    /// Exam ID -> question IDs in assignment order.
    assignments: HashMap<i64, Vec<i64>>,
    participants: HashMap<i64, String>,
    sessions: BTreeMap<i64, ExamSession>,
    results: BTreeMap<i64, ExamResult>,
    next_session_id: i64,
    next_result_id: i64,
}

/// Process-local store backed by a single async mutex.
///
/// Holding the one lock for the whole of each trait call gives the same
/// all-or-nothing behaviour the Postgres store gets from transactions.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

/// JSON fixture accepted by [`MemoryStore::from_seed`].
#[derive(Debug, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub exams: Vec<Exam>,
    #[serde(default)]
    pub questions: Vec<SeedQuestion>,
    #[serde(default)]
    pub participants: Vec<SeedParticipant>,
}

#[derive(Debug, Deserialize)]
pub struct SeedQuestion {
    pub id: i64,
    /// Exams this question is assigned to.
    pub exam_ids: Vec<i64>,
    pub prompt: String,
    pub options: OptionMap,
    pub correct_answer: String,
    pub difficulty: Option<String>,
    pub subject: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SeedParticipant {
    pub id: i64,
    pub name: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn from_seed(seed: SeedData) -> Self {
        let store = Self::new();
        for exam in seed.exams {
            store.insert_exam(exam).await;
        }
        for q in seed.questions {
            let question = Question {
                id: q.id,
                prompt: q.prompt,
                options: Json(q.options),
                correct_answer: q.correct_answer,
                difficulty: q.difficulty,
                subject: q.subject,
            };
            for exam_id in q.exam_ids {
                store.assign_question(exam_id, question.clone()).await;
            }
        }
        for p in seed.participants {
            store.insert_participant(p.id, &p.name).await;
        }
        store
    }

    /// Reads a JSON fixture from disk.
    pub async fn load_seed(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let raw = tokio::fs::read_to_string(path.as_ref()).await.map_err(|e| {
            AppError::InternalServerError(format!(
                "Failed to read seed file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let seed: SeedData = serde_json::from_str(&raw)?;
        Ok(Self::from_seed(seed).await)
    }

    pub async fn insert_exam(&self, exam: Exam) {
        let mut state = self.state.lock().await;
        state.exams.insert(exam.id, exam);
    }

    /// Stores the question and appends it to the exam's assignment list.
    pub async fn assign_question(&self, exam_id: i64, question: Question) {
        let mut state = self.state.lock().await;
        let ids = state.assignments.entry(exam_id).or_default();
        if !ids.contains(&question.id) {
            ids.push(question.id);
        }
        state.questions.insert(question.id, question);
    }

    pub async fn insert_participant(&self, participant_id: i64, name: &str) {
        let mut state = self.state.lock().await;
        state.participants.insert(participant_id, name.to_string());
    }
}

fn same_pair(session: &ExamSession, exam_id: i64, participant_id: i64) -> bool {
    session.exam_id == exam_id && session.participant_id == participant_id
}

#[async_trait]
impl ExamCatalog for MemoryStore {
    async fn exam(&self, exam_id: i64) -> Result<Option<Exam>, AppError> {
        Ok(self.state.lock().await.exams.get(&exam_id).cloned())
    }

    async fn participant_name(&self, participant_id: i64) -> Result<Option<String>, AppError> {
        Ok(self
            .state
            .lock()
            .await
            .participants
            .get(&participant_id)
            .cloned())
    }
}

#[async_trait]
impl QuestionBank for MemoryStore {
    async fn questions(&self, exam_id: i64) -> Result<Vec<Question>, AppError> {
        let state = self.state.lock().await;
        let questions = state
            .assignments
            .get(&exam_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.questions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(questions)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn open(
        &self,
        session: NewSession,
        expired_before: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        let mut state = self.state.lock().await;

        for existing in state.sessions.values_mut() {
            if existing.is_active
                && same_pair(existing, session.exam_id, session.participant_id)
                && existing.ends_at < expired_before
            {
                existing.is_active = false;
            }
        }

        if state
            .sessions
            .values()
            .any(|s| s.is_active && same_pair(s, session.exam_id, session.participant_id))
        {
            return Err(AppError::SessionAlreadyActive {
                exam_id: session.exam_id,
            });
        }

        state.next_session_id += 1;
        let created = ExamSession {
            id: state.next_session_id,
            exam_id: session.exam_id,
            participant_id: session.participant_id,
            started_at: session.started_at,
            ends_at: session.ends_at,
            is_active: true,
            answers: Json(AnswerMap::new()),
            question_ids: session.question_ids,
            last_activity: Some(session.started_at),
        };
        state.sessions.insert(created.id, created.clone());
        Ok(created)
    }

    async fn active(
        &self,
        exam_id: i64,
        participant_id: i64,
    ) -> Result<Option<ExamSession>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.is_active && same_pair(s, exam_id, participant_id))
            .cloned())
    }

    async fn save_answers(
        &self,
        exam_id: i64,
        participant_id: i64,
        answers: AnswerMap,
        at: DateTime<Utc>,
    ) -> Result<ExamSession, AppError> {
        let mut state = self.state.lock().await;
        let session = state
            .sessions
            .values_mut()
            .find(|s| s.is_active && same_pair(s, exam_id, participant_id))
            .ok_or(AppError::NoActiveSession { exam_id })?;
        session.answers = Json(answers);
        session.last_activity = Some(at);
        Ok(session.clone())
    }

    async fn complete(
        &self,
        session_id: i64,
        result: NewResult,
    ) -> Result<ExamResult, AppError> {
        let mut state = self.state.lock().await;

        let is_active = state
            .sessions
            .get(&session_id)
            .map(|s| s.is_active)
            .unwrap_or(false);
        if !is_active {
            return Err(AppError::NoActiveSession {
                exam_id: result.exam_id,
            });
        }

        if state
            .results
            .values()
            .any(|r| r.exam_id == result.exam_id && r.participant_id == result.participant_id)
        {
            return Err(AppError::AlreadySubmitted {
                exam_id: result.exam_id,
            });
        }

        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.is_active = false;
        }

        state.next_result_id += 1;
        let stored = ExamResult {
            id: state.next_result_id,
            exam_id: result.exam_id,
            participant_id: result.participant_id,
            answers: Json(result.answers),
            question_ids: result.question_ids,
            score: result.score,
            total_questions: result.total_questions,
            attempted_questions: result.attempted_questions,
            percentage: result.percentage,
            total_time: result.total_time,
            submitted_at: result.submitted_at,
            rank: None,
            status: result.status,
            certificate_number: None,
            certificate_url: None,
        };
        state.results.insert(stored.id, stored.clone());
        Ok(stored)
    }
}

#[async_trait]
impl ResultStore for MemoryStore {
    async fn result(&self, result_id: i64) -> Result<Option<ExamResult>, AppError> {
        Ok(self.state.lock().await.results.get(&result_id).cloned())
    }

    async fn results_for_participant(
        &self,
        participant_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ExamResult>, i64), AppError> {
        let state = self.state.lock().await;
        let mut mine: Vec<&ExamResult> = state
            .results
            .values()
            .filter(|r| r.participant_id == participant_id)
            .collect();
        mine.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at).then(b.id.cmp(&a.id)));

        let total = mine.len() as i64;
        let page = mine
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok((page, total))
    }

    async fn uncertified_passes(&self, exam_id: i64) -> Result<Vec<i64>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .results
            .values()
            .filter(|r| {
                r.exam_id == exam_id
                    && r.status == ResultStatus::Passed
                    && r.certificate_url.is_none()
            })
            .map(|r| r.id)
            .collect())
    }

    async fn rank_snapshot(&self, exam_id: i64) -> Result<Vec<RankRow>, AppError> {
        let state = self.state.lock().await;
        Ok(state
            .results
            .values()
            .filter(|r| r.exam_id == exam_id)
            .map(|r| RankRow {
                result_id: r.id,
                percentage: r.percentage,
                total_time: r.total_time,
                submitted_at: r.submitted_at,
            })
            .collect())
    }

    async fn apply_ranks(
        &self,
        exam_id: i64,
        expected_count: usize,
        ranks: &[(i64, i32)],
    ) -> Result<(), AppError> {
        let mut state = self.state.lock().await;
        let current = state
            .results
            .values()
            .filter(|r| r.exam_id == exam_id)
            .count();
        if current != expected_count {
            return Err(AppError::WriteConflict(format!(
                "Exam {} has {} results, snapshot had {}",
                exam_id, current, expected_count
            )));
        }

        for (result_id, rank) in ranks {
            if let Some(result) = state.results.get_mut(result_id) {
                result.rank = Some(*rank);
            }
        }
        Ok(())
    }

    async fn leaderboard(
        &self,
        exam_id: i64,
        limit: i64,
    ) -> Result<Vec<LeaderboardEntry>, AppError> {
        let state = self.state.lock().await;
        let mut ranked: Vec<&ExamResult> = state
            .results
            .values()
            .filter(|r| r.exam_id == exam_id && r.rank.is_some())
            .collect();
        ranked.sort_by(|a, b| {
            a.rank
                .cmp(&b.rank)
                .then(a.submitted_at.cmp(&b.submitted_at))
                .then(a.id.cmp(&b.id))
        });

        Ok(ranked
            .into_iter()
            .take(limit.max(0) as usize)
            .filter_map(|r| {
                Some(LeaderboardEntry {
                    rank: r.rank?,
                    participant_id: r.participant_id,
                    participant_name: state.participants.get(&r.participant_id).cloned(),
                    percentage: r.percentage,
                    total_time: r.total_time,
                    submitted_at: r.submitted_at,
                })
            })
            .collect())
    }

    async fn attach_certificate(
        &self,
        result_id: i64,
        certificate_number: &str,
        certificate_url: &str,
    ) -> Result<IssuedCertificate, AppError> {
        let mut state = self.state.lock().await;
        let result = state
            .results
            .get_mut(&result_id)
            .ok_or_else(|| AppError::NotFound("Result not found".to_string()))?;

        if let (Some(number), Some(url)) = (&result.certificate_number, &result.certificate_url) {
            return Ok(IssuedCertificate {
                certificate_number: number.clone(),
                certificate_url: url.clone(),
            });
        }

        result.certificate_number = Some(certificate_number.to_string());
        result.certificate_url = Some(certificate_url.to_string());
        Ok(IssuedCertificate {
            certificate_number: certificate_number.to_string(),
            certificate_url: certificate_url.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn new_session(exam_id: i64, participant_id: i64, now: DateTime<Utc>) -> NewSession {
        NewSession {
            exam_id,
            participant_id,
            started_at: now,
            ends_at: now + Duration::minutes(10),
            question_ids: vec![1, 2],
        }
    }

    fn new_result(exam_id: i64, participant_id: i64, now: DateTime<Utc>) -> NewResult {
        NewResult {
            exam_id,
            participant_id,
            answers: AnswerMap::new(),
            question_ids: vec![1, 2],
            score: 1,
            total_questions: 2,
            attempted_questions: 1,
            percentage: 50,
            total_time: 30,
            submitted_at: now,
            status: ResultStatus::Passed,
        }
    }

    #[tokio::test]
    async fn test_open_rejects_second_active_session() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.open(new_session(1, 9, now), now).await.unwrap();
        let second = store.open(new_session(1, 9, now), now).await;
        assert!(matches!(
            second,
            Err(AppError::SessionAlreadyActive { exam_id: 1 })
        ));
        // Other participants are unaffected.
        assert!(store.open(new_session(1, 10, now), now).await.is_ok());
    }

    #[tokio::test]
    async fn test_open_replaces_expired_session() {
        let store = MemoryStore::new();
        let start = Utc::now() - Duration::hours(2);
        let stale = store.open(new_session(1, 9, start), start).await.unwrap();
        let now = Utc::now();
        let fresh = store.open(new_session(1, 9, now), now).await.unwrap();
        assert_ne!(stale.id, fresh.id);
        let active = store.active(1, 9).await.unwrap().unwrap();
        assert_eq!(active.id, fresh.id);
    }

    #[tokio::test]
    async fn test_complete_is_single_shot() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let session = store.open(new_session(1, 9, now), now).await.unwrap();
        store
            .complete(session.id, new_result(1, 9, now))
            .await
            .unwrap();
        let again = store.complete(session.id, new_result(1, 9, now)).await;
        assert!(matches!(again, Err(AppError::NoActiveSession { .. })));
        assert!(store.active(1, 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_complete_keeps_session_when_already_submitted() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let first = store.open(new_session(1, 9, now), now).await.unwrap();
        store.complete(first.id, new_result(1, 9, now)).await.unwrap();

        let second = store.open(new_session(1, 9, now), now).await.unwrap();
        let err = store.complete(second.id, new_result(1, 9, now)).await;
        assert!(matches!(err, Err(AppError::AlreadySubmitted { .. })));
        // Nothing applied: the second session is still active.
        assert!(store.active(1, 9).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_apply_ranks_detects_stale_snapshot() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let session = store.open(new_session(1, 9, now), now).await.unwrap();
        let result = store
            .complete(session.id, new_result(1, 9, now))
            .await
            .unwrap();

        let conflict = store.apply_ranks(1, 0, &[]).await;
        assert!(matches!(conflict, Err(AppError::WriteConflict(_))));

        store.apply_ranks(1, 1, &[(result.id, 1)]).await.unwrap();
        assert_eq!(store.result(result.id).await.unwrap().unwrap().rank, Some(1));
    }

    #[tokio::test]
    async fn test_attach_certificate_first_writer_wins() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let session = store.open(new_session(1, 9, now), now).await.unwrap();
        let result = store
            .complete(session.id, new_result(1, 9, now))
            .await
            .unwrap();

        let first = store
            .attach_certificate(result.id, "CERT-1", "http://x/1.pdf")
            .await
            .unwrap();
        let second = store
            .attach_certificate(result.id, "CERT-2", "http://x/2.pdf")
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(second.certificate_number, "CERT-1");
    }

    #[tokio::test]
    async fn test_seed_fixture_parses() {
        let raw = r#"{
            "exams": [{"id": 1, "title": "Fire safety", "description": null, "duration": 15,
                       "passing_score": 60, "start_time": null, "end_time": null,
                       "questions_per_exam": null}],
            "questions": [{"id": 11, "exam_ids": [1], "prompt": "Exit?",
                           "options": {"A": "Stairs", "B": "Lift"}, "correct_answer": "A",
                           "difficulty": "easy", "subject": "safety"}],
            "participants": [{"id": 5, "name": "Dana"}]
        }"#;
        let seed: SeedData = serde_json::from_str(raw).unwrap();
        let store = MemoryStore::from_seed(seed).await;

        let exam = store.exam(1).await.unwrap().unwrap();
        assert!(!exam.randomize_questions);
        let questions = store.questions(1).await.unwrap();
        assert_eq!(questions.len(), 1);
        assert_eq!(questions[0].correct_answer, "A");
        assert_eq!(
            store.participant_name(5).await.unwrap().as_deref(),
            Some("Dana")
        );
    }
}
