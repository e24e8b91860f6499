//! Error types and result definitions for sync operations.
//!
//! [`SyncError`] carries a classified [`ErrorKind`], a static description, optional dynamic
//! detail and source, and the callsite it was created at. Failures from many concurrent tasks can
//! be aggregated into a single [`SyncError`].

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for sync operations.
#[derive(Debug, Clone)]
pub struct SyncError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Failures collected from sibling tasks.
    Many {
        errors: Vec<SyncError>,
        location: &'static Location<'static>,
    },
}

/// Specific categories of errors that can occur while syncing.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Connection Errors
    SourceConnectionFailed,
    WarehouseConnectionFailed,

    // Transport Errors
    TransportError,
    UnexpectedResponseStatus,

    // Authentication Errors
    AuthenticationError,

    // Query & Execution Errors
    SourceQueryFailed,
    WarehouseQueryFailed,
    WarehouseInsertFailed,

    // Schema & Data Errors
    SchemaMismatch,
    UnsupportedColumnType,
    WarehouseTableNameInvalid,
    ConversionError,
    InvalidData,
    SerializationError,
    DeserializationError,

    // Configuration & IO Errors
    ConfigError,
    IoError,

    // State & Workflow Errors
    InvalidState,
    SyncWorkerPanic,

    Unknown,
}

/// Coarse error taxonomy used when reporting failed sync units.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum ErrorClass {
    /// Network or HTTP failure.
    Transport,
    /// Credential acquisition or validation failure.
    Auth,
    /// Malformed response bodies and values that cannot be mapped.
    Data,
    /// Warehouse query or insert failure.
    Execution,
    /// Failure reading from the relational source.
    Source,
    /// Configuration, IO and internal failures.
    Internal,
}

impl ErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            ErrorKind::TransportError | ErrorKind::UnexpectedResponseStatus => {
                ErrorClass::Transport
            }
            ErrorKind::AuthenticationError => ErrorClass::Auth,
            ErrorKind::SchemaMismatch
            | ErrorKind::UnsupportedColumnType
            | ErrorKind::WarehouseTableNameInvalid
            | ErrorKind::ConversionError
            | ErrorKind::InvalidData
            | ErrorKind::SerializationError
            | ErrorKind::DeserializationError => ErrorClass::Data,
            ErrorKind::WarehouseConnectionFailed
            | ErrorKind::WarehouseQueryFailed
            | ErrorKind::WarehouseInsertFailed => ErrorClass::Execution,
            ErrorKind::SourceConnectionFailed | ErrorKind::SourceQueryFailed => {
                ErrorClass::Source
            }
            ErrorKind::ConfigError
            | ErrorKind::IoError
            | ErrorKind::InvalidState
            | ErrorKind::SyncWorkerPanic
            | ErrorKind::Unknown => ErrorClass::Internal,
        }
    }
}

impl SyncError {
    /// Returns the [`ErrorKind`] of this error, or of the first aggregated error.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns every [`ErrorKind`] contained in this error.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    pub fn class(&self) -> ErrorClass {
        self.kind().class()
    }

    /// Returns the dynamic detail, or the first one found among aggregated errors.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the aggregated errors, if this error is an aggregate.
    pub fn errors(&self) -> Option<&[SyncError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the callsite this error was created at.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches the originating error. No effect on aggregates.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        SyncError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }

    #[track_caller]
    fn wrap<E>(kind: ErrorKind, description: &'static str, err: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        let detail = err.to_string();
        SyncError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl PartialEq for SyncError {
    /// Errors compare equal when their kinds match.
    fn eq(&self, other: &SyncError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl Hash for SyncError {
    /// Hashes the kind and static description only, so repeated failures group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write_indented(f, "Detail", detail)?;
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    write!(f, "\n  {}. {}", index + 1, lines.next().unwrap_or_default())?;
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

fn write_indented(f: &mut fmt::Formatter<'_>, label: &str, text: &str) -> fmt::Result {
    if text.trim().is_empty() {
        return write!(f, "\n  {label}: <empty>");
    }

    write!(f, "\n  {label}:")?;
    for line in text.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

impl error::Error for SyncError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

impl From<(ErrorKind, &'static str)> for SyncError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

impl<D> From<(ErrorKind, &'static str, D)> for SyncError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> SyncError {
        SyncError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates errors. A single error is returned as is.
impl<E> From<Vec<E>> for SyncError
where
    E: Into<SyncError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> SyncError {
        let location = Location::caller();
        let mut errors: Vec<SyncError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        SyncError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for SyncError {
    #[track_caller]
    fn from(err: std::io::Error) -> SyncError {
        SyncError::wrap(ErrorKind::IoError, "I/O operation failed", err)
    }
}

impl From<serde_json::Error> for SyncError {
    #[track_caller]
    fn from(err: serde_json::Error) -> SyncError {
        match err.classify() {
            serde_json::error::Category::Io => {
                SyncError::wrap(ErrorKind::IoError, "JSON I/O operation failed", err)
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => SyncError::wrap(
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
                err,
            ),
        }
    }
}

/// Maps request building and body decoding failures to data errors, everything else to
/// [`ErrorKind::TransportError`].
impl From<reqwest::Error> for SyncError {
    #[track_caller]
    fn from(err: reqwest::Error) -> SyncError {
        if err.is_decode() {
            SyncError::wrap(
                ErrorKind::DeserializationError,
                "HTTP response body could not be decoded",
                err,
            )
        } else if err.is_builder() {
            SyncError::wrap(ErrorKind::InvalidData, "HTTP request could not be built", err)
        } else {
            SyncError::wrap(ErrorKind::TransportError, "HTTP request failed", err)
        }
    }
}

impl From<sqlx::Error> for SyncError {
    #[track_caller]
    fn from(err: sqlx::Error) -> SyncError {
        let kind = match &err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolClosed
            | sqlx::Error::PoolTimedOut => ErrorKind::SourceConnectionFailed,
            sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
                ErrorKind::ConversionError
            }
            _ => ErrorKind::SourceQueryFailed,
        };

        SyncError::wrap(kind, "Source database operation failed", err)
    }
}

impl From<chrono::ParseError> for SyncError {
    #[track_caller]
    fn from(err: chrono::ParseError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Date/time parsing failed", err)
    }
}

impl From<std::num::ParseIntError> for SyncError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> SyncError {
        SyncError::wrap(ErrorKind::ConversionError, "Integer parsing failed", err)
    }
}
