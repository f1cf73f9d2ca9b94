//! Error types of the streaming core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Failures of the provider layer while resolving or reading a source.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The item cannot be resolved to a playable stream. Recoverable for
    /// the flow stream, which skips the track.
    #[error("media not found: {0}")]
    MediaNotFound(String),

    /// I/O failure while reading the source. Terminal for the stream.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The provider cannot compute the requested content (e.g. dynamic
    /// track radios). Surfaced to the caller, never mid-stream.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
}

/// Returned by the queue oracle when no next track exists; terminates the
/// flow stream cleanly.
#[derive(Debug, Error)]
#[error("queue is empty")]
pub struct QueueEmpty;

/// Request-level failures of the streaming endpoints.
///
/// Every missing-entity variant maps to a 404 with a human-readable
/// reason; a transcoder spawn failure is a 500.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("Unknown Queue: {0}")]
    UnknownQueue(String),

    #[error("Unknown Queue item: {0}")]
    UnknownQueueItem(String),

    #[error("Unknown player: {0}")]
    UnknownPlayer(String),

    #[error("Unknown StreamJob for queue: {0}")]
    UnknownStreamJob(String),

    #[error("StreamJob ID {job_id} mismatch for queue: {queue_id}")]
    StreamJobMismatch { job_id: String, queue_id: String },

    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Unable to retrieve streamdetails for item: {0}")]
    StreamDetails(String),

    #[error("Failed to start transcoder: {0}")]
    Transcoder(#[from] std::io::Error),
}

impl RequestError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Transcoder(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}
