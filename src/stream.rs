use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;
use parking_lot::Mutex;

use crate::error::StreamError;
use crate::event::Event;
use crate::sink::{Formatter, Reconnecter, Writer};

/// Caller-side identifier of an open stream.
///
/// A handle is a `(slot, version)` pair. It stays valid only while the
/// stream table entry at `slot` still carries the same `version`; once the
/// stream is closed and its slot recycled, old handles are rejected instead
/// of reaching the new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamHandle {
    slot: usize,
    version: u64,
}

impl StreamHandle {
    /// A handle that never matches any stream.
    pub const INVALID: StreamHandle = StreamHandle { slot: usize::MAX, version: 0 };

    pub(crate) fn new(slot: usize, version: u64) -> Self {
        Self { slot, version }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

impl Default for StreamHandle {
    fn default() -> Self {
        Self::INVALID
    }
}

/// Immutable description of a stream, handed to every callback.
#[derive(Debug, Clone)]
pub struct StreamInfo {
    name: String,
    slot: usize,
    version: u64,
}

impl StreamInfo {
    pub(crate) fn new(name: impl Into<String>, slot: usize, version: u64) -> Self {
        Self { name: name.into(), slot, version }
    }

    /// Info for a writer used outside of any logger, e.g. in tests.
    pub fn detached(name: impl Into<String>) -> Self {
        Self::new(name, StreamHandle::INVALID.slot, StreamHandle::INVALID.version)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle::new(self.slot, self.version)
    }
}

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const RELEASED: u8 = 2;

/// One destination: its identity, lifecycle flag and configuration.
///
/// Producers only ever read the identity and the lifecycle flag to
/// validate handles. Everything the writer thread mutates lives in the
/// stream state behind a mutex that is uncontended in steady state:
/// the setters take it while a stream is being configured, the writer
/// thread takes it once per commit cycle for each stream with work.
pub struct Stream {
    info: StreamInfo,
    lifecycle: AtomicU8,
    closed: Event,
    pub(crate) state: Mutex<StreamState>,
}

pub(crate) struct StreamState {
    pub writer: Box<dyn Writer>,
    pub formatter: Option<Box<dyn Formatter>>,
    pub reconnecter: Option<Box<dyn Reconnecter>>,
    pub batch_size: usize,
    pub error: Option<StreamError>,
    /// `false` once `Writer::close` has been called on `writer`.
    pub writer_open: bool,
    pub last_reconnect_attempt: Option<Instant>,
    pub failed_reconnects: u32,
    /// Failures recorded under the lock, reported once it is released.
    pub unreported: Vec<StreamError>,
}

impl Stream {
    pub(crate) fn new(info: StreamInfo, writer: Box<dyn Writer>, batch_size: usize) -> Self {
        Self {
            info,
            lifecycle: AtomicU8::new(OPEN),
            closed: Event::new(),
            state: Mutex::new(StreamState {
                writer,
                formatter: None,
                reconnecter: None,
                batch_size,
                error: None,
                writer_open: true,
                last_reconnect_attempt: None,
                failed_reconnects: 0,
                unreported: Vec::new(),
            }),
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        self.info.name()
    }

    pub fn handle(&self) -> StreamHandle {
        self.info.handle()
    }

    /// Accepting new commands: not closing, not released.
    pub fn is_open(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == OPEN
    }

    pub fn is_released(&self) -> bool {
        self.lifecycle.load(Ordering::Acquire) == RELEASED
    }

    /// Flags the stream as closing so no further writes are accepted.
    /// Returns `false` if someone else already started closing it.
    pub(crate) fn begin_close(&self) -> bool {
        self.lifecycle
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn mark_released(&self) {
        self.lifecycle.store(RELEASED, Ordering::Release);
    }

    pub(crate) fn closed_event(&self) -> &Event {
        &self.closed
    }

    /// Last error recorded by the writer thread, if the stream is failing.
    pub fn last_error(&self) -> Option<StreamError> {
        self.state.lock().error.clone()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("name", &self.info.name)
            .field("slot", &self.info.slot)
            .field("version", &self.info.version)
            .field("lifecycle", &self.lifecycle.load(Ordering::Relaxed))
            .finish()
    }
}

impl StreamState {
    /// Closes the current writer once. Errors from closing are returned
    /// but leave the writer marked closed.
    pub(crate) fn close_writer(&mut self) -> std::io::Result<()> {
        if !self.writer_open {
            return Ok(());
        }
        self.writer_open = false;
        self.writer.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::writer_fn;

    fn stream(name: &str) -> Stream {
        let writer = writer_fn(|_, _, data| Ok(data.iter().map(|s| s.len()).sum()));
        Stream::new(StreamInfo::new(name, 3, 7), Box::new(writer), 16)
    }

    #[test]
    fn test_handle_carries_identity() {
        let s = stream("identity");
        assert_eq!(s.handle(), StreamHandle::new(3, 7));
        assert_ne!(s.handle(), StreamHandle::INVALID);
        assert_eq!(s.name(), "identity");
    }

    #[test]
    fn test_lifecycle_transitions() {
        let s = stream("lifecycle");
        assert!(s.is_open());
        assert!(s.begin_close());
        assert!(!s.is_open());
        assert!(!s.begin_close());
        assert!(!s.is_released());
        s.mark_released();
        assert!(s.is_released());
    }

    #[test]
    fn test_writer_closed_once() {
        let s = stream("close-once");
        let mut state = s.state.lock();
        assert!(state.writer_open);
        state.close_writer().unwrap();
        assert!(!state.writer_open);
        state.close_writer().unwrap();
    }
}
