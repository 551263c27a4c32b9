// src/services/ranking.rs

//! Competition ranking of all results of an exam, recomputed after every submit.

use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};
use utoipa::ToSchema;

use crate::{
    error::AppError,
    models::exam_result::RankRow,
    services::certificate::CertificateGate,
    store::ResultStore,
    utils::keyed_lock::KeyedMutex,
};

/// Base delay between rank write attempts; grows linearly with the attempt number.
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RankSummary {
    pub exam_id: i64,
    /// Number of results that received a rank.
    pub ranked: usize,
    pub certificates_issued: usize,
}

/// Higher percentage first, then less time spent, then earlier submission.
fn rank_order(a: &RankRow, b: &RankRow) -> Ordering {
    b.percentage
        .cmp(&a.percentage)
        .then(a.total_time.cmp(&b.total_time))
        .then(a.submitted_at.cmp(&b.submitted_at))
}

/// Assigns standard competition ranks ("1224").
///
/// A result's rank is one plus the number of results strictly ahead of it, so
/// rows with an identical key share a rank and the next rank skips.
pub fn assign_ranks(rows: &[RankRow]) -> Vec<(i64, i32)> {
    let mut ordered: Vec<&RankRow> = rows.iter().collect();
    ordered.sort_by(|a, b| rank_order(a, b).then(a.result_id.cmp(&b.result_id)));

    let mut ranks = Vec::with_capacity(ordered.len());
    let mut current = 0;
    for (i, row) in ordered.iter().enumerate() {
        if i == 0 || rank_order(ordered[i - 1], row) != Ordering::Equal {
            current = i as i32 + 1;
        }
        ranks.push((row.result_id, current));
    }
    ranks
}

/// Rewrites an exam's ranks under a per-exam lock, then issues pending certificates.
pub struct RankingEngine {
    results: Arc<dyn ResultStore>,
    certificates: Arc<CertificateGate>,
    locks: KeyedMutex<i64>,
    max_attempts: u32,
}

impl RankingEngine {
    pub fn new(
        results: Arc<dyn ResultStore>,
        certificates: Arc<CertificateGate>,
        max_attempts: u32,
    ) -> Self {
        Self {
            results,
            certificates,
            locks: KeyedMutex::new(),
            max_attempts: max_attempts.max(1),
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn recompute(&self, exam_id: i64) -> Result<RankSummary, AppError> {
        let _guard = self.locks.lock(exam_id).await;

        let ranked = self.write_ranks(exam_id).await?;
        let certificates_issued = self.issue_pending_certificates(exam_id).await;

        info!(exam_id, ranked, certificates_issued, "Ranks recomputed");

        Ok(RankSummary {
            exam_id,
            ranked,
            certificates_issued,
        })
    }

    async fn write_ranks(&self, exam_id: i64) -> Result<usize, AppError> {
        let mut attempt = 1;
        loop {
            let snapshot = self.results.rank_snapshot(exam_id).await?;
            let ranks = assign_ranks(&snapshot);

            match self
                .results
                .apply_ranks(exam_id, snapshot.len(), &ranks)
                .await
            {
                Ok(()) => return Ok(ranks.len()),
                Err(AppError::WriteConflict(msg)) if attempt < self.max_attempts => {
                    warn!(exam_id, attempt, "Rank write conflict, retrying: {}", msg);
                    tokio::time::sleep(RETRY_BACKOFF * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Issues certificates for passing results without one. Failures are logged, not raised.
    async fn issue_pending_certificates(&self, exam_id: i64) -> usize {
        let pending = match self.results.uncertified_passes(exam_id).await {
            Ok(ids) => ids,
            Err(e) => {
                error!(exam_id, "Failed to list results awaiting certificates: {}", e);
                return 0;
            }
        };

        let mut issued = 0;
        for result_id in pending {
            match self.certificates.issue(result_id).await {
                Ok(Some(_)) => issued += 1,
                Ok(None) => {}
                // Submitted after this pass read the ranks; the next pass picks it up.
                Err(AppError::RankPending { .. }) => {}
                Err(e) => error!(exam_id, result_id, "Certificate issuance failed: {}", e),
            }
        }
        issued
    }
}

struct RankJob {
    exam_id: i64,
    reply: Option<oneshot::Sender<Result<RankSummary, AppError>>>,
}

/// Handoff between submitters and the ranking worker.
#[derive(Clone)]
pub struct RankingQueue {
    tx: mpsc::UnboundedSender<RankJob>,
}

impl RankingQueue {
    /// Starts the worker task. Must be called inside a Tokio runtime.
    pub fn spawn(engine: Arc<RankingEngine>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RankJob>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let engine = engine.clone();
                tokio::spawn(async move {
                    let outcome = engine.recompute(job.exam_id).await;
                    if let Err(e) = &outcome {
                        error!(exam_id = job.exam_id, "Rank recompute failed: {}", e);
                    }
                    if let Some(reply) = job.reply {
                        let _ = reply.send(outcome);
                    }
                });
            }
            info!("Ranking worker stopped");
        });

        Self { tx }
    }

    /// Schedules a recompute without waiting for it.
    pub fn enqueue(&self, exam_id: i64) {
        if self.tx.send(RankJob { exam_id, reply: None }).is_err() {
            error!(exam_id, "Ranking worker is not running; ranks left stale");
        }
    }

    /// Schedules a recompute and waits for its outcome.
    pub async fn recompute_now(&self, exam_id: i64) -> Result<RankSummary, AppError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(RankJob {
                exam_id,
                reply: Some(reply),
            })
            .map_err(|_| AppError::InternalServerError("Ranking worker is not running".into()))?;

        done.await
            .map_err(|_| AppError::InternalServerError("Ranking job was dropped".into()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};

    use crate::{
        models::exam_result::{ExamResult, IssuedCertificate, LeaderboardEntry},
        services::certificate::LinkRenderer,
        store::MemoryStore,
    };

    fn row(id: i64, percentage: i32, total_time: i64, submitted_at: DateTime<Utc>) -> RankRow {
        RankRow {
            result_id: id,
            percentage,
            total_time,
            submitted_at,
        }
    }

    fn rank_of(ranks: &[(i64, i32)], id: i64) -> i32 {
        ranks.iter().find(|(r, _)| *r == id).unwrap().1
    }

    #[test]
    fn test_time_breaks_percentage_ties() {
        let t = Utc::now();
        let rows = vec![row(1, 90, 120, t), row(2, 90, 100, t), row(3, 80, 50, t)];
        let ranks = assign_ranks(&rows);
        assert_eq!(rank_of(&ranks, 1), 2);
        assert_eq!(rank_of(&ranks, 2), 1);
        assert_eq!(rank_of(&ranks, 3), 3);
    }

    #[test]
    fn test_earlier_submission_breaks_time_ties() {
        let t = Utc::now();
        let rows = vec![
            row(1, 70, 60, t + ChronoDuration::seconds(5)),
            row(2, 70, 60, t),
        ];
        let ranks = assign_ranks(&rows);
        assert_eq!(rank_of(&ranks, 2), 1);
        assert_eq!(rank_of(&ranks, 1), 2);
    }

    #[test]
    fn test_full_ties_share_rank_and_skip() {
        let t = Utc::now();
        let rows = vec![
            row(1, 100, 30, t),
            row(2, 80, 40, t),
            row(3, 80, 40, t),
            row(4, 60, 10, t),
        ];
        let ranks = assign_ranks(&rows);
        assert_eq!(rank_of(&ranks, 1), 1);
        assert_eq!(rank_of(&ranks, 2), 2);
        assert_eq!(rank_of(&ranks, 3), 2);
        assert_eq!(rank_of(&ranks, 4), 4);
    }

    #[test]
    fn test_empty_exam_has_no_ranks() {
        assert!(assign_ranks(&[]).is_empty());
    }

    /// Delegates to a memory store but reports a conflict on the first N rank writes.
    struct FlakyRanks {
        inner: MemoryStore,
        conflicts_left: AtomicU32,
    }

    #[async_trait]
    impl ResultStore for FlakyRanks {
        async fn result(&self, result_id: i64) -> Result<Option<ExamResult>, AppError> {
            self.inner.result(result_id).await
        }

        async fn results_for_participant(
            &self,
            participant_id: i64,
            limit: i64,
            offset: i64,
        ) -> Result<(Vec<ExamResult>, i64), AppError> {
            self.inner
                .results_for_participant(participant_id, limit, offset)
                .await
        }

        async fn uncertified_passes(&self, exam_id: i64) -> Result<Vec<i64>, AppError> {
            self.inner.uncertified_passes(exam_id).await
        }

        async fn rank_snapshot(&self, exam_id: i64) -> Result<Vec<RankRow>, AppError> {
            self.inner.rank_snapshot(exam_id).await
        }

        async fn apply_ranks(
            &self,
            exam_id: i64,
            expected_count: usize,
            ranks: &[(i64, i32)],
        ) -> Result<(), AppError> {
            let left = self.conflicts_left.load(AtomicOrdering::SeqCst);
            if left > 0 {
                self.conflicts_left.store(left - 1, AtomicOrdering::SeqCst);
                return Err(AppError::WriteConflict("simulated".into()));
            }
            self.inner.apply_ranks(exam_id, expected_count, ranks).await
        }

        async fn leaderboard(
            &self,
            exam_id: i64,
            limit: i64,
        ) -> Result<Vec<LeaderboardEntry>, AppError> {
            self.inner.leaderboard(exam_id, limit).await
        }

        async fn attach_certificate(
            &self,
            result_id: i64,
            certificate_number: &str,
            certificate_url: &str,
        ) -> Result<IssuedCertificate, AppError> {
            self.inner
                .attach_certificate(result_id, certificate_number, certificate_url)
                .await
        }
    }

    fn engine_over(conflicts: u32, max_attempts: u32) -> RankingEngine {
        let flaky = Arc::new(FlakyRanks {
            inner: MemoryStore::new(),
            conflicts_left: AtomicU32::new(conflicts),
        });
        let catalog = Arc::new(MemoryStore::new());
        let renderer = Arc::new(LinkRenderer::new(
            url::Url::parse("http://localhost/").unwrap(),
        ));
        let gate = Arc::new(CertificateGate::new(catalog, flaky.clone(), renderer));
        RankingEngine::new(flaky, gate, max_attempts)
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let engine = engine_over(2, 3);
        let summary = engine.recompute(1).await.unwrap();
        assert_eq!(summary.ranked, 0);
    }

    #[tokio::test]
    async fn test_persistent_conflict_surfaces() {
        let engine = engine_over(5, 2);
        let err = engine.recompute(1).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
