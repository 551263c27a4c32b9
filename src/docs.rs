// src/docs.rs

use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};

use crate::{
    handlers::{admin, exam, results},
    models::{
        exam::ExamSummary,
        exam_result::{
            ExamResult, IssuedCertificate, LeaderboardEntry, ResponseReview, ResultStatus,
            ResultsPage, ReviewSummary, SubmitExamRequest, SubmitResponse, SubmittedResult,
        },
        question::{PublicQuestion, ReviewedQuestion},
        session::{
            AutosaveRequest, AutosaveResponse, SessionStatusResponse, StartSessionResponse,
        },
    },
    services::ranking::RankSummary,
};

#[derive(OpenApi)]
#[openapi(
    info(title = "Exam Core API", description = "Timed exam sessions, scoring, ranking and certificates"),
    paths(
        exam::start_exam,
        exam::autosave,
        exam::session_status,
        exam::submit_exam,
        exam::leaderboard,
        results::list_my_results,
        results::result_responses,
        results::request_certificate,
        admin::recompute_ranks,
        admin::issue_certificate,
    ),
    components(schemas(
        ExamSummary,
        PublicQuestion,
        ReviewedQuestion,
        StartSessionResponse,
        AutosaveRequest,
        AutosaveResponse,
        SessionStatusResponse,
        SubmitExamRequest,
        SubmitResponse,
        SubmittedResult,
        ResultStatus,
        ExamResult,
        ResultsPage,
        LeaderboardEntry,
        ResponseReview,
        ReviewSummary,
        IssuedCertificate,
        RankSummary,
    )),
    modifiers(&BearerAuth)
)]
pub struct ApiDoc;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
