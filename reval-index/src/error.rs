//! Error types and result definitions for index maintenance operations.
//!
//! Provides an error system with classification and captured diagnostic metadata for
//! the merge engine and the index lifecycle manager. The [`RevalError`] type carries a
//! static description, optional dynamic detail and an optional source error, together
//! with the callsite location and a backtrace.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for index maintenance operations using [`RevalError`].
pub type RevalResult<T> = Result<T, RevalError>;

/// Detailed payload stored for [`RevalError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for index maintenance operations.
///
/// [`RevalError`] couples a machine-readable [`ErrorKind`] with human-readable context.
/// The kind drives the abort/continue decisions in the lifecycle manager and the queue
/// boundary, while the description, detail and source preserve what actually happened.
#[derive(Debug, Clone)]
pub struct RevalError {
    payload: ErrorPayload,
}

/// Specific categories of errors that can occur while maintaining the master view index.
///
/// Kinds are organized by functional area: CDC routing, partial updates, index
/// lifecycle operations, transport and ambient serialization concerns.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // CDC routing errors
    UnsupportedOperation,

    // Partial-update / repository errors
    PartialUpdateFailed,
    VersionConflict,

    // Index lifecycle errors
    IndexNotFound,
    IndexAlreadyExists,
    MappingNotFound,
    InvalidAliasState,

    // Transport errors
    TransportFailed,
    TransportTimeout,

    // Publishing errors
    PublishFailed,

    // Data & transformation errors
    ConversionError,
    InvalidData,
    SerializationError,
    DeserializationError,

    // Configuration errors
    ConfigError,

    // Unknown / uncategorized
    Unknown,
}

impl RevalError {
    /// Returns the [`ErrorKind`] of this error.
    pub fn kind(&self) -> ErrorKind {
        self.payload.kind
    }

    /// Returns the detailed error information if available.
    pub fn detail(&self) -> Option<&str> {
        self.payload.detail.as_deref()
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> &Backtrace {
        self.payload.backtrace.as_ref()
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        self.payload.location
    }

    /// Attaches an originating [`error::Error`] to this error and returns the modified
    /// instance.
    ///
    /// The stored source is preserved across clones and exposed via
    /// [`error::Error::source`].
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        self.payload.source = Some(Arc::new(source));
        self
    }

    /// Creates a [`RevalError`] from its components.
    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        let location = Location::caller();
        let backtrace = Arc::new(Backtrace::capture());

        RevalError {
            payload: ErrorPayload {
                kind,
                description,
                detail,
                source,
                location,
                backtrace,
            },
        }
    }
}

impl PartialEq for RevalError {
    fn eq(&self, other: &RevalError) -> bool {
        self.payload.kind == other.payload.kind
    }
}

impl fmt::Display for RevalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        let location = self.payload.location;
        write!(
            f,
            "[{:?}] {} @ {}:{}:{}",
            self.payload.kind,
            self.payload.description,
            location.file(),
            location.line(),
            location.column()
        )?;

        if let Some(detail) = self.payload.detail.as_deref() {
            if detail.trim().is_empty() {
                write!(f, "\n  Detail: <empty>")?;
            } else {
                write!(f, "\n  Detail:")?;
                for line in detail.lines() {
                    if line.trim().is_empty() {
                        write!(f, "\n    ")?;
                    } else {
                        write!(f, "\n    {line}")?;
                    }
                }
            }
        }

        Ok(())
    }
}

impl error::Error for RevalError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        self.payload
            .source
            .as_ref()
            .map(|source| source as &(dyn error::Error + 'static))
    }
}

/// Creates a [`RevalError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for RevalError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> RevalError {
        RevalError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`RevalError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for RevalError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> RevalError {
        RevalError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Converts [`std::io::Error`] to [`RevalError`] with [`ErrorKind::TransportFailed`].
impl From<std::io::Error> for RevalError {
    #[track_caller]
    fn from(err: std::io::Error) -> RevalError {
        let detail = err.to_string();
        let source = Arc::new(err);
        RevalError::from_components(
            ErrorKind::TransportFailed,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`serde_json::Error`] to [`RevalError`] with the appropriate error kind.
///
/// Maps to [`ErrorKind::SerializationError`] for serialization failures and
/// [`ErrorKind::DeserializationError`] for deserialization failures based on error
/// classification.
impl From<serde_json::Error> for RevalError {
    #[track_caller]
    fn from(err: serde_json::Error) -> RevalError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::TransportFailed, "JSON I/O operation failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        RevalError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`chrono::ParseError`] to [`RevalError`] with [`ErrorKind::ConversionError`].
impl From<chrono::ParseError> for RevalError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> RevalError {
        let detail = err.to_string();
        let source = Arc::new(err);
        RevalError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Datetime parsing failed"),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}

/// Converts [`reqwest::Error`] to [`RevalError`] with the appropriate transport kind.
///
/// Timeouts map to [`ErrorKind::TransportTimeout`]; every other transport-level failure
/// maps to [`ErrorKind::TransportFailed`]. Neither is retried internally, the caller
/// decides what a transport failure means for the operation in flight.
impl From<reqwest::Error> for RevalError {
    #[track_caller]
    fn from(err: reqwest::Error) -> RevalError {
        let (kind, description) = if err.is_timeout() {
            (ErrorKind::TransportTimeout, "Search engine request timed out")
        } else {
            (ErrorKind::TransportFailed, "Search engine request failed")
        };

        let detail = err.to_string();
        let source = Arc::new(err);
        RevalError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(source),
        )
    }
}
