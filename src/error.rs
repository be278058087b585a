//! Error types for docker-inside.

use std::fmt;
use std::path::PathBuf;

/// Kind of filesystem object a host path is required to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    File,
    Directory,
    Any,
}

impl fmt::Display for PathKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKind::File => write!(f, "file"),
            PathKind::Directory => write!(f, "directory"),
            PathKind::Any => write!(f, "path"),
        }
    }
}

/// Top-level error type for a `din` invocation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A host path does not exist or has the wrong type.
    #[error("Invalid path '{}': required type {kind}", path.display())]
    InvalidPath { path: PathBuf, kind: PathKind },

    /// Image is not available locally, either without or after a pull.
    #[error("{}", missing_image_message(image, tag, *pulled))]
    MissingImage {
        image: String,
        tag: String,
        pulled: bool,
    },

    /// A container operation was attempted in a state that does not allow it.
    #[error("Cannot {operation} container in state {state}")]
    InvalidContainerState { operation: String, state: String },

    /// A command-line value could not be parsed.
    #[error("Invalid {argument}: {reason}")]
    InvalidArgument { argument: String, reason: String },

    /// Host uid/gid could not be resolved to names.
    #[error("Cannot resolve host identity: {reason}")]
    Identity { reason: String },

    /// Configuration error.
    #[error("Configuration error: {reason}")]
    Config { reason: String },

    /// The run was cancelled by a termination signal.
    #[error("Interrupted")]
    Interrupted,

    /// Docker API error.
    #[error("Docker API error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn missing_image_message(image: &str, tag: &str, pulled: bool) -> String {
    if pulled {
        format!("Couldn't pull image '{}:{}'", image, tag)
    } else {
        format!("Missing image '{}:{}'", image, tag)
    }
}

impl Error {
    pub(crate) fn invalid_argument(argument: &str, reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            argument: argument.to_string(),
            reason: reason.into(),
        }
    }

    /// Full `name:tag` reference of a [`Error::MissingImage`].
    pub fn image_fullname(&self) -> Option<String> {
        match self {
            Error::MissingImage { image, tag, .. } => Some(format!("{}:{}", image, tag)),
            _ => None,
        }
    }

    /// A short suggestion for the user, where one applies.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Error::MissingImage { pulled: false, .. } => Some("try --auto-pull"),
            Error::MissingImage { pulled: true, .. } => {
                Some("check the image name and your registry access")
            }
            Error::Docker(_) | Error::Config { .. } => {
                Some("is the Docker daemon running and reachable (DOCKER_HOST)?")
            }
            Error::InvalidPath { .. } => Some("host paths must exist before the run"),
            _ => None,
        }
    }
}

/// Result type for docker-inside operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_path_display() {
        let err = Error::InvalidPath {
            path: PathBuf::from("/does/not/exist"),
            kind: PathKind::Directory,
        };
        let msg = err.to_string();
        assert!(msg.contains("/does/not/exist"));
        assert!(msg.contains("directory"));
    }

    #[test]
    fn test_missing_image_flavors() {
        let missing = Error::MissingImage {
            image: "centos".to_string(),
            tag: "7".to_string(),
            pulled: false,
        };
        assert_eq!(missing.to_string(), "Missing image 'centos:7'");

        let pulled = Error::MissingImage {
            image: "centos".to_string(),
            tag: "7".to_string(),
            pulled: true,
        };
        assert_eq!(pulled.to_string(), "Couldn't pull image 'centos:7'");
        assert_eq!(pulled.image_fullname().as_deref(), Some("centos:7"));
    }

    #[test]
    fn test_hints() {
        let missing = Error::MissingImage {
            image: "centos".to_string(),
            tag: "7".to_string(),
            pulled: false,
        };
        assert_eq!(missing.hint(), Some("try --auto-pull"));
        assert_eq!(Error::Interrupted.hint(), None);
    }

    #[test]
    fn test_invalid_container_state_display() {
        let err = Error::InvalidContainerState {
            operation: "stop".to_string(),
            state: "Removed".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot stop container in state Removed");
    }

    #[test]
    fn test_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err = Error::from(io_err);
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_image_fullname_other_variants() {
        assert!(Error::Interrupted.image_fullname().is_none());
    }
}
