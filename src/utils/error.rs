//! Error Handling Module
//!
//! Defines the error type shared by staging, dataset loading, the model and
//! the training loop. Uses thiserror for ergonomic error definitions.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for CIFAR-10 training operations
#[derive(Error, Debug)]
pub enum Cifar10Error {
    /// Filesystem error, tagged with the path that caused it
    #[error("IO error at '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or incomplete dataset
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Fetching the dataset archive failed
    #[error("Download error: {0}")]
    Download(String),

    /// Error with model construction or persistence
    #[error("Model error: {0}")]
    Model(String),

    /// Error with training
    #[error("Training error: {0}")]
    Training(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Path not found
    #[error("Path not found: {0}")]
    PathNotFound(PathBuf),
}

impl Cifar10Error {
    /// Wrap an IO error with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience Result type for CIFAR-10 training operations
pub type Result<T> = std::result::Result<T, Cifar10Error>;

/// Extension trait for attaching a path to IO results
pub trait IoResultExt<T> {
    /// Convert an IO error into [`Cifar10Error::Io`] for `path`
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn with_path(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| Cifar10Error::io(path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Cifar10Error::Dataset("truncated batch".to_string());
        assert_eq!(format!("{}", err), "Dataset error: truncated batch");
    }

    #[test]
    fn test_io_error_carries_path() {
        let err: Result<()> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no such file",
        ))
        .with_path("/inputs/cifar-10-batches-bin");

        let msg = format!("{}", err.unwrap_err());
        assert!(msg.contains("/inputs/cifar-10-batches-bin"));
        assert!(msg.contains("no such file"));
    }
}
