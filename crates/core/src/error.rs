//! Domain error model.

use thiserror::Error;

use crate::status::JobStatus;

/// A status token or persisted status code that is not part of the fixed enum.
///
/// Both variants render the full list of valid statuses.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StatusError {
    /// An administrative status name was not recognised.
    #[error("unknown status '{token}' (valid statuses: {})", JobStatus::valid_names())]
    UnknownName { token: String },

    /// A persisted integer code does not map to any status.
    #[error("unknown status code {code} (valid statuses: {})", JobStatus::valid_names())]
    UnknownCode { code: i64 },
}

impl StatusError {
    pub fn unknown_name(token: impl Into<String>) -> Self {
        Self::UnknownName {
            token: token.into(),
        }
    }
}
