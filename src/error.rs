use thiserror::Error;

/// Errors raised by the overlay controller and its components
#[derive(Debug, Error)]
pub enum OverlayError {
    /// No usable credentials after bounded retries; the controller stays inert
    #[error("credentials unavailable after {attempts} attempt(s)")]
    CredentialsUnavailable { attempts: u32 },

    /// The host mutation feed could not be subscribed to
    #[error("mutation feed setup failed: {0}")]
    ObserverSetupFailed(String),

    /// No item id could be extracted from the rendered page state
    #[error("item id not found in page state")]
    ItemIdNotFound,

    /// The item id does not look like something the endpoint would accept
    #[error("invalid item id: {0:?}")]
    InvalidItemId(String),

    /// Metadata fetch exhausted its retry budget
    #[error("metadata fetch failed after {attempts} attempt(s): {message}")]
    FetchFailed {
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    /// The render sink is not ready; the operation is skipped, not escalated
    #[error("render precondition missing: {0}")]
    RenderPreconditionMissing(&'static str),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Url(#[from] url::ParseError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = OverlayError> = std::result::Result<T, E>;

impl OverlayError {
    /// Whether the failure is expected to clear on a later cycle
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, OverlayError::CredentialsUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_failed_display() {
        let err = OverlayError::FetchFailed {
            attempts: 2,
            status: Some(500),
            message: "HTTP 500".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "metadata fetch failed after 2 attempt(s): HTTP 500"
        );
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_credentials_unrecoverable() {
        let err = OverlayError::CredentialsUnavailable { attempts: 3 };
        assert!(!err.is_recoverable());
    }
}
