use std::collections::TryReserveError;
use std::fmt;
use std::io;

/// Errors returned to producer threads by the logger API.
///
/// Writer-thread failures never surface here. They are recorded on the
/// affected stream as a [`StreamError`] and reported through the error
/// handler instead.
#[derive(Debug, thiserror::Error)]
pub enum LoggerError {
    /// `start()` was called while the writer thread is already running.
    #[error("writer thread is already running")]
    AlreadyRunning,

    /// The handle does not name a live stream: it was closed, its slot was
    /// recycled, or it was never valid.
    #[error("invalid or stale stream handle")]
    InvalidHandle,

    /// The logger is shutting down and no longer accepts commands.
    #[error("logger is shutting down")]
    Cancelled,

    /// Every slot of the stream table is taken.
    #[error("stream table is full ({capacity} streams)")]
    RegistryFull { capacity: usize },

    /// A message buffer could not be allocated.
    #[error("failed to allocate message buffer: {0}")]
    Alloc(#[from] TryReserveError),

    /// Opening a destination failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// The writer thread could not be spawned.
    #[error("failed to spawn writer thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Error state recorded on a stream by the writer thread.
///
/// `code` carries the OS errno when one is known and `-1` otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub code: i32,
    pub message: String,
}

/// errno reported for streams closed by a `Close` command.
pub const ENOTCONN: i32 = 107;

impl StreamError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub(crate) fn from_io(err: &io::Error) -> Self {
        Self::new(err.raw_os_error().unwrap_or(-1), err.to_string())
    }

    /// Error carried by a stream whose writer was closed on request.
    pub(crate) fn disconnected() -> Self {
        Self::new(ENOTCONN, "stream closed")
    }

    /// Converts a caught panic payload into a stream error.
    pub(crate) fn from_panic(what: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::new(-1, format!("{} panicked: {}", what, detail))
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (errno {})", self.message, self.code)
    }
}

impl std::error::Error for StreamError {}
