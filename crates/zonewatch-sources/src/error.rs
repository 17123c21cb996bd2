//! Error types for external collaborators.

use thiserror::Error;
use zonewatch_core::GeofenceError;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned HTTP {status}: {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to decode {service} response: {detail}")]
    Decode {
        service: &'static str,
        detail: String,
    },

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored geometry is invalid: {0}")]
    Geometry(#[from] GeofenceError),

    #[error("{0} is not configured")]
    NotConfigured(&'static str),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl SourceError {
    pub(crate) fn decode(service: &'static str, detail: impl ToString) -> Self {
        Self::Decode {
            service,
            detail: detail.to_string(),
        }
    }
}
