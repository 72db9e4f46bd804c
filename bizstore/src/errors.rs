use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for bizstore operations.
///
/// The kinds fall into three families that callers treat differently:
///
/// * transient I/O ([`ErrorKind::IOError`], [`ErrorKind::DeadlineExceeded`],
///   [`ErrorKind::ConnectionReset`], [`ErrorKind::StoreUnavailable`]) - nothing
///   was applied, a retry is safe;
/// * [`ErrorKind::InvariantViolation`] - the store returned something that
///   cannot happen in a correct deployment, never retried or corrected;
/// * everything else - a permanent failure of this particular request. A
///   closed store also applies nothing but never reopens, so
///   [`ErrorKind::StoreAlreadyClosed`] is not retried.
///
/// # Examples
///
/// ```rust
/// use bizstore::errors::{BizError, ErrorKind};
///
/// let err = BizError::new("deadline exceeded", ErrorKind::DeadlineExceeded);
/// assert!(err.is_transient());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Transient I/O errors
    /// Generic IO error
    IOError,
    /// The caller's deadline expired before the store applied the operation
    DeadlineExceeded,
    /// The connection to the store was reset mid-request
    ConnectionReset,
    /// The store could not be reached
    StoreUnavailable,

    // Invariant errors
    /// The store returned a result that violates an allocator invariant
    InvariantViolation,

    // Request errors
    /// Store has already been closed
    StoreAlreadyClosed,
    /// Invalid configuration, namespace or connection string
    Configuration,
    /// The argument of a request is malformed
    InvalidArgument,
    /// The requested document was not found
    NotFound,
    /// A unique constraint was violated
    UniqueConstraintViolation,
    /// Error encoding or decoding data
    EncodingError,
    /// Error from the storage backend
    BackendError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::DeadlineExceeded => write!(f, "Deadline exceeded"),
            ErrorKind::ConnectionReset => write!(f, "Connection reset"),
            ErrorKind::StoreUnavailable => write!(f, "Store unavailable"),
            ErrorKind::StoreAlreadyClosed => write!(f, "Store already closed"),
            ErrorKind::InvariantViolation => write!(f, "Invariant violation"),
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::InvalidArgument => write!(f, "Invalid argument"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::UniqueConstraintViolation => write!(f, "Unique constraint violation"),
            ErrorKind::EncodingError => write!(f, "Encoding error"),
            ErrorKind::BackendError => write!(f, "Backend error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

impl ErrorKind {
    /// Returns `true` for kinds after which the store is guaranteed unchanged
    /// and the same request may be issued again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorKind::IOError
                | ErrorKind::DeadlineExceeded
                | ErrorKind::ConnectionReset
                | ErrorKind::StoreUnavailable
        )
    }
}

/// Custom bizstore error type.
///
/// `BizError` carries a message, a kind, an optional cause and the backtrace
/// captured where it was constructed.
///
/// # Examples
///
/// ```rust
/// use bizstore::errors::{BizError, ErrorKind};
///
/// let cause = BizError::new("connection reset by peer", ErrorKind::ConnectionReset);
/// let err = BizError::new_with_cause("failed to allocate id", ErrorKind::ConnectionReset, cause);
/// assert!(err.cause().is_some());
/// ```
#[derive(Clone)]
pub struct BizError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<BizError>>,
    backtrace: Atomic<Backtrace>,
}

impl BizError {
    /// Creates a new `BizError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        BizError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `BizError` that wraps `cause`.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: BizError) -> Self {
        BizError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&BizError> {
        self.cause.as_deref()
    }

    /// Shorthand for `self.kind().is_transient()`.
    pub fn is_transient(&self) -> bool {
        self.error_kind.is_transient()
    }
}

impl Display for BizError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for BizError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "{}: {}\nCaused by: {:?}", self.error_kind, self.message, cause),
            None => write!(f, "{}: {}\n{:?}", self.error_kind, self.message, self.backtrace.read()),
        }
    }
}

impl Error for BizError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// Shorthand for `Result<T, BizError>`.
pub type BizResult<T> = Result<T, BizError>;

impl From<std::io::Error> for BizError {
    fn from(err: std::io::Error) -> Self {
        let error_kind = match err.kind() {
            std::io::ErrorKind::TimedOut => ErrorKind::DeadlineExceeded,
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
                ErrorKind::ConnectionReset
            }
            std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::NotConnected => {
                ErrorKind::StoreUnavailable
            }
            _ => ErrorKind::IOError,
        };
        BizError::new(&format!("IO error: {}", err), error_kind)
    }
}

impl From<std::fmt::Error> for BizError {
    fn from(err: std::fmt::Error) -> Self {
        BizError::new(&format!("Formatting error: {}", err), ErrorKind::InternalError)
    }
}

impl From<std::num::ParseIntError> for BizError {
    fn from(err: std::num::ParseIntError) -> Self {
        BizError::new(
            &format!("Integer parsing error: {}", err),
            ErrorKind::InvalidArgument,
        )
    }
}
