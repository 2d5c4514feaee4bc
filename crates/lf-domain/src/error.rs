//! Shared error type used across all LlamaFarm crates.
//!
//! Each variant corresponds to one error kind of the platform's error
//! contract; the HTTP layer maps kinds to status codes via [`ErrorKind`].

/// Broad classification of an error, used by the router to pick a status
/// code and by pipelines to decide retry/fail-fast behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidArgument,
    InvalidPath,
    PermissionDenied,
    Conflict,
    PayloadTooLarge,
    Unavailable,
    Timeout,
    Internal,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Internal(String),
}

impl Error {
    /// Classify this error.  IO errors are refined by the OS error code so
    /// that a missing file surfaces as `NotFound` and an EACCES as
    /// `PermissionDenied` instead of a generic 500.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Error::InvalidPath(_) => ErrorKind::InvalidPath,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::PayloadTooLarge(_) => ErrorKind::PayloadTooLarge,
            Error::Unavailable(_) => ErrorKind::Unavailable,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorKind::NotFound,
                std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
                _ => ErrorKind::Internal,
            },
            Error::Json(_) | Error::Yaml(_) | Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_mapping() {
        assert_eq!(Error::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            Error::InvalidPath("x".into()).kind(),
            ErrorKind::InvalidPath
        );
        assert_eq!(Error::Timeout("x".into()).kind(), ErrorKind::Timeout);
        assert_eq!(Error::Internal("x".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn io_not_found_refines_to_not_found() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing").into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn io_permission_denied_refines() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "eacces").into();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn io_other_is_internal() {
        let err: Error =
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe").into();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }
}
