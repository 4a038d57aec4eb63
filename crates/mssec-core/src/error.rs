//! Error types for mssec

use thiserror::Error;

/// Core error type for mssec operations
#[derive(Error, Debug)]
pub enum MssecError {
    /// Malformed identifier, empty required field, invalid state or a
    /// principal invariant violation. Raised before any round trip.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation is not allowed against this server or database
    /// (for example a login change outside `master`).
    #[error("operation not allowed: {0}")]
    Topology(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled")]
    Cancelled,

    /// Failure of a named operation, wrapping the originating cause
    #[error("{operation}: {source}")]
    Operation {
        operation: String,
        #[source]
        source: Box<MssecError>,
    },
}

impl MssecError {
    pub fn validation(msg: impl Into<String>) -> Self {
        MssecError::Validation(msg.into())
    }

    pub fn topology(msg: impl Into<String>) -> Self {
        MssecError::Topology(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        MssecError::NotFound(what.into())
    }

    /// Wrap this error with the name of the operation that failed
    pub fn during(self, operation: impl Into<String>) -> Self {
        MssecError::Operation {
            operation: operation.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through operation wrappers
    pub fn root(&self) -> &MssecError {
        match self {
            MssecError::Operation { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), MssecError::NotFound(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), MssecError::Validation(_))
    }

    pub fn is_topology(&self) -> bool {
        matches!(self.root(), MssecError::Topology(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), MssecError::Cancelled)
    }

    /// Connectivity failures are the only errors the connection guard retries
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self.root(),
            MssecError::Connection(_) | MssecError::Timeout(_)
        )
    }
}

/// Attach an operation name to the error side of a result
pub trait ResultExt<T> {
    fn during(self, operation: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn during(self, operation: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.during(operation))
    }
}

/// Result type alias for mssec operations
pub type Result<T> = std::result::Result<T, MssecError>;
