//! Error types for espflow

use std::fmt;

/// Unified error type for module lifecycle and control-plane operations
#[derive(Debug)]
pub enum PlatformError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Control-plane request rejected
    ControlPlane(String),

    /// Resource exhausted (arena full, no free slots)
    Exhausted(String),

    /// Other error
    Other(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Io(e) => write!(f, "IO error: {}", e),
            PlatformError::Config(msg) => write!(f, "Configuration error: {}", msg),
            PlatformError::ControlPlane(msg) => write!(f, "Control-plane error: {}", msg),
            PlatformError::Exhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            PlatformError::Other(e) => write!(f, "Error: {}", e),
        }
    }
}

impl std::error::Error for PlatformError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PlatformError::Io(e) => Some(e),
            PlatformError::Other(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for PlatformError {
    fn from(err: std::io::Error) -> Self {
        PlatformError::Io(err)
    }
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;
