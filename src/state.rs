// src/state.rs

use std::sync::Arc;

use axum::extract::FromRef;
use chrono::Duration;

use crate::{
    config::Config,
    services::{
        certificate::{CertificateGate, CertificateRenderer, LinkRenderer},
        exam_session::ExamSessionManager,
        ranking::{RankingEngine, RankingQueue},
    },
    store::{ExamCatalog, ExamStore, QuestionBank, ResultStore},
};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub catalog: Arc<dyn ExamCatalog>,
    pub bank: Arc<dyn QuestionBank>,
    pub results: Arc<dyn ResultStore>,
    pub sessions: Arc<ExamSessionManager>,
    pub certificates: Arc<CertificateGate>,
    pub ranking: RankingQueue,
}

impl AppState {
    /// Wires every service over one backend. Spawns the ranking worker, so it must
    /// run inside a Tokio runtime.
    pub fn new<S>(config: Config, store: Arc<S>) -> Self
    where
        S: ExamStore + 'static,
    {
        let renderer = Arc::new(LinkRenderer::new(config.certificate_base_url.clone()));
        Self::with_renderer(config, store, renderer)
    }

    pub fn with_renderer<S>(
        config: Config,
        store: Arc<S>,
        renderer: Arc<dyn CertificateRenderer>,
    ) -> Self
    where
        S: ExamStore + 'static,
    {
        let certificates = Arc::new(CertificateGate::new(
            store.clone(),
            store.clone(),
            renderer,
        ));
        let engine = Arc::new(RankingEngine::new(
            store.clone(),
            certificates.clone(),
            config.rank_retry_limit,
        ));
        let ranking = RankingQueue::spawn(engine);

        let sessions = Arc::new(ExamSessionManager::new(
            store.clone(),
            store.clone(),
            store.clone(),
            ranking.clone(),
            Duration::seconds(config.grace_seconds),
        ));

        Self {
            config,
            catalog: store.clone(),
            bank: store.clone(),
            results: store,
            sessions,
            certificates,
            ranking,
        }
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
