// THEORY:
// Every failure the verification engine can observe is named here. Most of them
// are *recoverable* at the point where they occur: a missing or degenerate field
// simply contributes no storm objects to one valid time. Only the errors that
// prevent a forecast cycle from being read or persisted escape a cycle, and even
// those never halt the other cycles running beside it.

use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Convenience alias used throughout the crate.
pub type VerifyResult<T> = Result<T, VerifyError>;

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    /// An expected forecast or truth field is absent.
    #[error("missing input field: {0}")]
    MissingInput(PathBuf),

    /// The field exists, but no cell reaches the detection floor. `max_value` is
    /// `None` for an empty or all-NaN grid.
    #[error("degenerate field: max {max_value:?} below detection floor {floor:.2}")]
    DegenerateField { max_value: Option<f64>, floor: f64 },

    /// The field exists but could not be decoded.
    #[error("unreadable field {path}: {source}")]
    UnreadableField {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The output store could not be opened or written.
    #[error("persistence failure at {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failure: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Truth steps must be observed in strictly increasing valid-time order.
    #[error("valid time {next} does not follow {previous}")]
    OutOfOrder {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    /// The worker running a cycle went away before reporting back.
    #[error("worker failure: {0}")]
    WorkerFailure(String),
}

impl VerifyError {
    /// Missing and degenerate inputs degrade to "no objects at this time".
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            VerifyError::MissingInput(_) | VerifyError::DegenerateField { .. }
        )
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        VerifyError::Persistence {
            path: path.into(),
            source,
        }
    }
}
