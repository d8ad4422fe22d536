// src/error.rs

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while configuring or running a query.
///
/// Configuration and not-found errors are raised before any record is
/// iterated. Data errors abort the query that hit them.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Invalid option value or invalid combination of options
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// Unreachable file/URL or a region naming an unknown contig
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed record or modification data met mid-stream
    #[error("malformed data: {0}")]
    Data(String),

    /// Standard I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialisation errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Failure to start the decoding thread pool
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Errors reported by htslib while opening, reading or writing alignments
    #[error("htslib error: {0}")]
    Htslib(#[from] rust_htslib::errors::Error),

    /// TSV writer errors
    #[error("TSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl Error {
    /// Shorthand for building a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Shorthand for building a data error
    pub fn data(msg: impl Into<String>) -> Self {
        Self::Data(msg.into())
    }

    /// True for errors the caller caused through its options
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }

    /// Opens a file, turning a missing path into [`Error::NotFound`].
    pub fn open_file(path: &std::path::Path) -> Result<std::fs::File> {
        std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(format!("{}: {e}", path.display())),
            _ => Self::Io(e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_message() {
        let err = Error::config("win_op must be set to 'density' or 'grad_density'");
        assert!(err.is_configuration());
        assert!(err.to_string().contains("win_op must be set to"));
    }

    #[test]
    fn test_open_missing_file_is_not_found() {
        let err = Error::open_file(std::path::Path::new("./no/such/file.sam")).unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("file.sam"));
    }

    #[test]
    fn test_from_io_error() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
