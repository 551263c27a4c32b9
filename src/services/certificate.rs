// src/services/certificate.rs

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use url::Url;

use crate::{
    error::AppError,
    models::{
        exam::Exam,
        exam_result::{ExamResult, IssuedCertificate},
    },
    store::{ExamCatalog, ResultStore},
    utils::keyed_lock::KeyedMutex,
};

/// Everything printed on a certificate.
#[derive(Debug, Clone, Serialize)]
pub struct CertificateRequest {
    pub participant_name: String,
    pub exam_title: String,
    pub score: i32,
    pub percentage: i32,
    pub rank: Option<i32>,
    pub date: DateTime<Utc>,
    pub certificate_number: String,
}

/// External formatter that turns a request into a stored document.
#[async_trait]
pub trait CertificateRenderer: Send + Sync {
    /// Returns an opaque reference (normally a URL) to the rendered document.
    async fn render(&self, request: &CertificateRequest) -> Result<String, AppError>;
}

/// Publishes certificates under a fixed base URL; the PDF itself is produced downstream.
pub struct LinkRenderer {
    base: Url,
}

impl LinkRenderer {
    pub fn new(base: Url) -> Self {
        Self { base }
    }
}

#[async_trait]
impl CertificateRenderer for LinkRenderer {
    async fn render(&self, request: &CertificateRequest) -> Result<String, AppError> {
        let url = self
            .base
            .join(&format!("certificates/{}.pdf", request.certificate_number))
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;
        Ok(url.to_string())
    }
}

pub fn is_eligible(result: &ExamResult, exam: &Exam) -> bool {
    exam.is_passing(result.percentage)
}

/// `CERT-<unix millis>-<result id, 8 digits>`.
pub fn certificate_number(result_id: i64, at: DateTime<Utc>) -> String {
    format!("CERT-{}-{:08}", at.timestamp_millis(), result_id)
}

/// Decides eligibility and issues each result's certificate at most once.
pub struct CertificateGate {
    catalog: Arc<dyn ExamCatalog>,
    results: Arc<dyn ResultStore>,
    renderer: Arc<dyn CertificateRenderer>,
    locks: KeyedMutex<i64>,
}

impl CertificateGate {
    pub fn new(
        catalog: Arc<dyn ExamCatalog>,
        results: Arc<dyn ResultStore>,
        renderer: Arc<dyn CertificateRenderer>,
    ) -> Self {
        Self {
            catalog,
            results,
            renderer,
            locks: KeyedMutex::new(),
        }
    }

    /// Issues the certificate for a result.
    ///
    /// Returns the stored reference if one exists, `None` if the result did not pass,
    /// and otherwise renders, stores and returns a new one.
    ///
    /// A passing result without a rank yet fails with `RankPending`; rank is printed
    /// on the certificate and it is never re-rendered.
    #[tracing::instrument(skip(self))]
    pub async fn issue(&self, result_id: i64) -> Result<Option<IssuedCertificate>, AppError> {
        let _guard = self.locks.lock(result_id).await;

        let result = self
            .results
            .result(result_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Result not found".to_string()))?;

        if let (Some(number), Some(url)) = (&result.certificate_number, &result.certificate_url) {
            return Ok(Some(IssuedCertificate {
                certificate_number: number.clone(),
                certificate_url: url.clone(),
            }));
        }

        let exam = self
            .catalog
            .exam(result.exam_id)
            .await?
            .ok_or(AppError::ExamNotFound(result.exam_id))?;

        if !is_eligible(&result, &exam) {
            return Ok(None);
        }
        if result.rank.is_none() {
            return Err(AppError::RankPending { result_id });
        }

        let participant_name = self
            .catalog
            .participant_name(result.participant_id)
            .await?
            .unwrap_or_else(|| "N/A".to_string());

        let request = CertificateRequest {
            participant_name,
            exam_title: exam.title.clone(),
            score: result.score,
            percentage: result.percentage,
            rank: result.rank,
            date: result.submitted_at,
            certificate_number: certificate_number(result.id, Utc::now()),
        };

        let reference = self.renderer.render(&request).await?;
        let issued = self
            .results
            .attach_certificate(result.id, &request.certificate_number, &reference)
            .await?;

        info!(
            result_id,
            exam_id = result.exam_id,
            certificate_number = %issued.certificate_number,
            "Certificate issued"
        );

        Ok(Some(issued))
    }
}
