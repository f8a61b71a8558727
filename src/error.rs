use thiserror::Error;

/// Failure taxonomy surfaced to callers of the lifecycle and archive operations.
///
/// External-tool failures carry the tool's diagnostic text verbatim.
#[derive(Error, Debug)]
pub enum JobError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Failed to fetch job source: {0}")]
    FetchFailed(String),

    #[error("Job submission failed: {0}")]
    SubmitFailed(String),

    #[error("Failed to cancel job: {0}")]
    CancelFailed(String),

    #[error("Failed to build archive: {0}")]
    ArchiveFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl JobError {
    /// Machine-parseable category reported alongside the human-readable detail.
    pub fn category(&self) -> &'static str {
        match self {
            JobError::InvalidRequest(_) => "invalid_request",
            JobError::NotFound(_) => "not_found",
            JobError::FetchFailed(_) => "fetch_failed",
            JobError::SubmitFailed(_) => "submit_failed",
            JobError::CancelFailed(_) => "cancel_failed",
            JobError::ArchiveFailed(_) => "archive_failed",
            JobError::Io(_) => "internal",
        }
    }

    /// The detail text without the category prefix.
    pub fn details(&self) -> String {
        match self {
            JobError::InvalidRequest(d)
            | JobError::NotFound(d)
            | JobError::FetchFailed(d)
            | JobError::SubmitFailed(d)
            | JobError::CancelFailed(d)
            | JobError::ArchiveFailed(d) => d.clone(),
            JobError::Io(e) => e.to_string(),
        }
    }

    /// HTTP status code class for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            JobError::InvalidRequest(_) => 400,
            JobError::NotFound(_) => 404,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_match_status_classes() {
        let invalid = JobError::InvalidRequest("missing Job_id".to_string());
        assert_eq!(invalid.category(), "invalid_request");
        assert_eq!(invalid.status_code(), 400);

        let missing = JobError::NotFound("42".to_string());
        assert_eq!(missing.category(), "not_found");
        assert_eq!(missing.status_code(), 404);

        let submit = JobError::SubmitFailed("sbatch: error".to_string());
        assert_eq!(submit.category(), "submit_failed");
        assert_eq!(submit.status_code(), 500);
    }

    #[test]
    fn details_strip_prefix() {
        let err = JobError::CancelFailed("scancel: error: Invalid job id".to_string());
        assert_eq!(err.details(), "scancel: error: Invalid job id");
        assert!(err.to_string().starts_with("Failed to cancel job"));
    }

    #[test]
    fn io_errors_are_internal() {
        let err: JobError = std::io::Error::new(std::io::ErrorKind::Other, "disk full").into();
        assert_eq!(err.category(), "internal");
        assert_eq!(err.details(), "disk full");
        assert_eq!(err.status_code(), 500);
    }
}
