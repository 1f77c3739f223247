use serde::Serialize;
use storefront_protocol::FilterViolation;

use crate::CollectionName;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum NetworkError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected status {status} from {url}")]
    Status { status: u16, url: String },
    #[error("malformed listing payload: {0}")]
    Decode(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ResolutionError {
    #[error("postal code {0:?} could not be geocoded")]
    UnknownPostalCode(String),
    #[error("geolocation service unavailable: {0}")]
    Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum SnapshotError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(thiserror::Error, Debug)]
pub enum FeedError {
    #[error(transparent)]
    Network(#[from] NetworkError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterViolation),
    #[error("coordinates out of range: ({lat}, {lng})")]
    InvalidCoordinates { lat: f64, lng: f64 },
    #[error("invalid endpoint url {url}: {reason}")]
    Endpoint { url: String, reason: String },
    #[error("no location resolved yet; start the feed first")]
    NotStarted,
    #[error("controller has been shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Decode,
}

impl From<&NetworkError> for ErrorKind {
    fn from(err: &NetworkError) -> Self {
        match err {
            NetworkError::Decode(_) => ErrorKind::Decode,
            NetworkError::Transport(_) | NetworkError::Status { .. } => ErrorKind::Network,
        }
    }
}

/// Error state recorded on a collection for the render layer. `blocking`
/// is set when there is nothing last-known-good to show next to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionError {
    pub collection: CollectionName,
    pub kind: ErrorKind,
    pub message: String,
    pub blocking: bool,
}
