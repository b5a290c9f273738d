use std::fmt;

use arrow::error::ArrowError;
use thiserror::Error;

pub type DriverResult<T> = Result<T, DriverError>;

/// A backend-native error carried as the cause of a [`DriverError`].
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverErrorKind {
    ConnectionError,
    InvalidState,
    UnsupportedType,
    ExecutionError,
}

impl fmt::Display for DriverErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverErrorKind::ConnectionError => "connection error",
            DriverErrorKind::InvalidState => "invalid state",
            DriverErrorKind::UnsupportedType => "unsupported type",
            DriverErrorKind::ExecutionError => "execution error",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connection error: {message}")]
    ConnectionError {
        message: String,
        #[source]
        source: Option<BackendError>,
    },
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("unsupported type: {0}")]
    UnsupportedType(String),
    #[error("execution error: {message}{}", format_row(.row))]
    ExecutionError {
        message: String,
        /// The index of the offending row in the bound batch, if known.
        row: Option<usize>,
        #[source]
        source: Option<BackendError>,
    },
}

fn format_row(row: &Option<usize>) -> String {
    match row {
        Some(row) => format!(" (row {row})"),
        None => String::new(),
    }
}

impl DriverError {
    pub fn connection(message: impl Into<String>) -> Self {
        DriverError::ConnectionError {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        DriverError::InvalidState(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        DriverError::UnsupportedType(message.into())
    }

    pub fn execution(message: impl Into<String>) -> Self {
        DriverError::ExecutionError {
            message: message.into(),
            row: None,
            source: None,
        }
    }

    /// Wraps a backend failure that happened while opening or closing a session.
    pub fn connection_with(message: impl Into<String>, source: impl Into<BackendError>) -> Self {
        DriverError::ConnectionError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Wraps a backend failure reported for a query or an insert.
    pub fn execution_with(message: impl Into<String>, source: impl Into<BackendError>) -> Self {
        DriverError::ExecutionError {
            message: message.into(),
            row: None,
            source: Some(source.into()),
        }
    }

    /// Attaches the index of the failing row to an execution error.
    /// Errors of other kinds are returned unchanged.
    pub fn at_row(self, index: usize) -> Self {
        match self {
            DriverError::ExecutionError {
                message,
                row: None,
                source,
            } => DriverError::ExecutionError {
                message,
                row: Some(index),
                source,
            },
            other => other,
        }
    }

    pub fn kind(&self) -> DriverErrorKind {
        match self {
            DriverError::ConnectionError { .. } => DriverErrorKind::ConnectionError,
            DriverError::InvalidState(_) => DriverErrorKind::InvalidState,
            DriverError::UnsupportedType(_) => DriverErrorKind::UnsupportedType,
            DriverError::ExecutionError { .. } => DriverErrorKind::ExecutionError,
        }
    }

    pub fn row(&self) -> Option<usize> {
        match self {
            DriverError::ExecutionError { row, .. } => *row,
            _ => None,
        }
    }
}

impl From<ArrowError> for DriverError {
    fn from(error: ArrowError) -> Self {
        DriverError::execution_with("columnar conversion failed", error)
    }
}
