//! Core data models for the video asset service.
//!
//! `Asset` maps to the `video_assets` table via `sqlx::FromRow` and serializes
//! as JSON via `serde`. The grant and transcription types are response shapes
//! shared by the services and the HTTP layer.

pub mod asset;
pub mod grant;
pub mod transcription;
