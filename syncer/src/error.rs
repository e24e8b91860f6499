use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

use websync::error::SyncError;

/// Result type for syncer operations.
pub type SyncerResult<T> = Result<T, SyncerError>;

/// Backtrace captured when a startup error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Failures that stop the syncer before or while starting a run.
#[derive(Debug)]
pub enum SyncerError {
    /// Source, warehouse or KiotViet client construction failed.
    Sync(SyncError),
    /// Configuration could not be loaded, validated or applied.
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
}

impl SyncerError {
    pub fn category(&self) -> &'static str {
        match self {
            SyncerError::Sync(_) => "sync error",
            SyncerError::Config(_, _) => "configuration error",
            SyncerError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            SyncerError::Sync(err) => err.backtrace(),
            SyncerError::Config(_, backtrace) => Some(&backtrace.0),
            SyncerError::Io(_, backtrace) => Some(&backtrace.0),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        SyncerError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Multi line report of the error and its causes, with the backtrace when `RUST_BACKTRACE` is
    /// set.
    pub fn render_report(&self) -> String {
        let mut out = format!("syncer failed\ncategory: {}\nerror: {self}\n", self.category());

        let mut source = Error::source(self);
        let mut index = 1usize;
        while let Some(err) = source {
            out.push_str(&format!("cause {index}: {err}\n"));
            source = err.source();
            index += 1;
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
        }

        out
    }
}

fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

impl fmt::Display for SyncerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncerError::Sync(err) => write!(f, "{err}"),
            SyncerError::Config(source, _) => write!(f, "configuration error: {source}"),
            SyncerError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for SyncerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            SyncerError::Sync(err) => err.source(),
            SyncerError::Config(source, _) => Some(source.as_ref()),
            SyncerError::Io(source, _) => Some(source),
        }
    }
}

impl From<SyncError> for SyncerError {
    fn from(err: SyncError) -> Self {
        SyncerError::Sync(err)
    }
}

impl From<std::io::Error> for SyncerError {
    fn from(err: std::io::Error) -> Self {
        SyncerError::Io(err, CapturedBacktrace::capture())
    }
}
