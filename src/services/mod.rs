pub mod asset_repository;
pub mod asset_service;
pub mod transcription_service;
