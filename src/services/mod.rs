// src/services/mod.rs

pub mod certificate;
pub mod exam_session;
pub mod ranking;
pub mod review;
pub mod scoring;
