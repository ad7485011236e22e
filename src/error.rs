//! Error types for upstream calls and the report pipeline.

use thiserror::Error;

/// Failure of a call to an external collaborator.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connection, timeout or other transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The upstream answered with a non-success status.
    #[error("Upstream returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The response could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),

    /// The requested entity does not exist upstream.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Relational store failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Artifact repository failure.
    #[error("Artifact error: {0}")]
    Artifact(String),
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            UpstreamError::Decode(e.to_string())
        } else {
            UpstreamError::Transport(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for UpstreamError {
    fn from(e: rusqlite::Error) -> Self {
        UpstreamError::Storage(e.to_string())
    }
}

impl From<git2::Error> for UpstreamError {
    fn from(e: git2::Error) -> Self {
        UpstreamError::Artifact(e.to_string())
    }
}

/// Terminal outcomes of a report run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The address has no application record.
    #[error("No application info found for {address}")]
    NoApplicationInfo { address: String },

    /// The application lookup itself failed after retries.
    #[error("Application lookup failed for {address}: {source}")]
    ApplicationLookup {
        address: String,
        #[source]
        source: UpstreamError,
    },

    /// The address could not be resolved to a network id.
    #[error("Could not resolve {address} to a network id: {source}")]
    AddressResolution {
        address: String,
        #[source]
        source: UpstreamError,
    },

    /// The client group has no active deals.
    #[error("No active deals found for {address}")]
    NoActiveDeals { address: String },
}

impl PipelineError {
    /// Short markdown document posted instead of a report.
    pub fn to_markdown(&self) -> String {
        let detail = match self {
            PipelineError::NoApplicationInfo { address } => format!(
                "No application info found for client `{}`. The client may not have received an allocation yet.",
                address
            ),
            PipelineError::ApplicationLookup { address, .. } => format!(
                "The application registry could not be reached while checking `{}`. Please retry later.",
                address
            ),
            PipelineError::AddressResolution { address, .. } => format!(
                "Client address `{}` could not be resolved to a network id.",
                address
            ),
            PipelineError::NoActiveDeals { address } => {
                format!("No active deals found for client `{}`.", address)
            }
        };

        format!("# DataCap Report\n\n⚠️ {}\n", detail)
    }
}
