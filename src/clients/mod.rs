//! Clients for external collaborators.

pub mod transcription;

pub use transcription::{HttpTranscriptionClient, TranscriptionClient, TranscriptionError};
