use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::category::Category;
use crate::command::Command;
use crate::config::{clamp_batch_size, LoggerConfig};
use crate::error::{LoggerError, StreamError};
use crate::event::Event;
use crate::registry::Reservation;
use crate::sink::{FileWriter, Formatter, Reconnecter, Writer};
use crate::stream::{Stream, StreamHandle, StreamInfo, StreamState};
use crate::writer::{Shared, WriterLoop};

/// Default permission bits for files opened with `open_file`.
pub const DEFAULT_FILE_MODE: u32 = 0o660;

/// How long `close_file` waits for the writer thread to finish the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseWait {
    /// Enqueue the close and return at once.
    NoWait,
    /// Wait at most this long. A duration past the end of `Instant`
    /// waits until the stream is closed.
    Timeout(Duration),
    /// Wait until the stream is closed.
    Indefinitely,
}

/// Result of `close_file`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The stream is closed and its slot released.
    Closed,
    /// The close is queued but had not completed when the call returned.
    Pending,
}

/// Asynchronous logger writing to many streams from one background thread.
///
/// Producer threads hand messages over with [`write`](Self::write), which
/// never blocks: the message is pushed onto a lock-free intake queue and
/// the call returns. A single writer thread drains that queue, sorts the
/// messages by stream while keeping each stream's submission order, and
/// writes them out in batches through each stream's [`Writer`].
///
/// # Stream configuration
///
/// `set_formatter`, `set_writer`, `set_reconnect` and `set_batch_size` are
/// meant to be called right after opening a stream, before its first
/// write. They are safe to call at any time, but messages already queued
/// may be written with either the old or the new setting.
///
/// # Delivery
///
/// Messages to one stream are written in the order they were submitted.
/// There is no ordering across streams. When a stream fails, its queued
/// messages are dropped rather than retried, and later messages are dropped
/// too until a reconnect succeeds.
///
/// # Examples
///
/// ```
/// # use multi_stream_logger::{MultiStreamLogger, LoggerConfig, Category, CloseWait};
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("app.log");
///
/// let logger = MultiStreamLogger::new(LoggerConfig::default());
/// let file = logger.open_file(&path, false, 0o640).unwrap();
/// logger.start().unwrap();
///
/// logger.write_str(&file, Category::NONE, "hello\n").unwrap();
/// logger.write(&file, Category::NONE, b"world\n".to_vec()).unwrap();
///
/// logger.close_file(&file, false, CloseWait::Indefinitely).unwrap();
/// logger.stop();
///
/// assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello\nworld\n");
/// ```
pub struct MultiStreamLogger {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MultiStreamLogger {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &LoggerConfig {
        &self.shared.config
    }

    /// Spawns the writer thread and waits until it is running.
    ///
    /// Messages written before `start` stay queued and are written once the
    /// thread is up.
    ///
    /// # Errors
    ///
    /// * `LoggerError::AlreadyRunning` if the thread is already running
    /// * `LoggerError::Spawn` if the OS refused to create the thread
    pub fn start(&self) -> Result<(), LoggerError> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Err(LoggerError::AlreadyRunning);
        }
        self.shared.cancel.store(false, Ordering::Release);

        let ready = Arc::new(Event::new());
        let seen = ready.value();
        let handle = {
            let shared = self.shared.clone();
            let ready = ready.clone();
            thread::Builder::new()
                .name(self.shared.config.thread_name.clone())
                .spawn(move || {
                    ready.signal();
                    WriterLoop::new(shared).run();
                })
                .map_err(LoggerError::Spawn)?
        };
        ready.wait(seen);

        *thread = Some(handle);
        info!(thread = %self.shared.config.thread_name, "logger started");
        Ok(())
    }

    /// Stops the writer thread after it has written everything already
    /// queued and closed all streams. Does nothing if not running.
    pub fn stop(&self) {
        let handle = match self.thread.lock().take() {
            Some(handle) => handle,
            None => return,
        };

        debug!("stopping logger");
        self.shared.cancel.store(true, Ordering::Release);
        self.shared.wake.signal();
        if handle.join().is_err() {
            error!("writer thread panicked");
        }

        // A producer may have passed the cancel check just before the
        // writer's last drain.
        let late = self.shared.queue.drain().filter(Command::is_write).count();
        if late > 0 {
            self.shared.stats.discarded.fetch_add(late as u64, Ordering::Relaxed);
            warn!(dropped = late, "discarded messages enqueued during shutdown");
        }
        info!("logger stopped");
    }

    pub fn is_running(&self) -> bool {
        self.thread.lock().is_some()
    }

    /// Opens a file destination written with vectored writes.
    ///
    /// # Arguments
    ///
    /// * `path` - file to write; created if missing
    /// * `append` - append to an existing file instead of truncating it
    /// * `mode` - permission bits for a new file on unix, e.g.
    ///   [`DEFAULT_FILE_MODE`]
    ///
    /// # Errors
    ///
    /// `RegistryFull` when no stream slot is free, `Io` when the file
    /// cannot be opened.
    pub fn open_file(
        &self,
        path: impl AsRef<Path>,
        append: bool,
        mode: u32,
    ) -> Result<StreamHandle, LoggerError> {
        let path = path.as_ref();
        let reservation = self.shared.registry.reserve_slot()?;
        let writer = FileWriter::open(path, append, mode)?;
        Ok(self.register(reservation, path.display().to_string(), Box::new(writer)))
    }

    /// Opens a custom destination such as a socket.
    ///
    /// The logger never touches the destination itself; every batch goes
    /// through `writer`, which also carries whatever state the destination
    /// needs.
    pub fn open_stream(
        &self,
        name: impl Into<String>,
        writer: impl Writer + 'static,
    ) -> Result<StreamHandle, LoggerError> {
        let reservation = self.shared.registry.reserve_slot()?;
        Ok(self.register(reservation, name.into(), Box::new(writer)))
    }

    fn register(&self, reservation: Reservation<'_>, name: String, writer: Box<dyn Writer>) -> StreamHandle {
        let info = StreamInfo::new(name, reservation.slot(), reservation.version());
        let stream = Arc::new(Stream::new(info, writer, self.shared.config.default_batch_size));
        let handle = reservation.publish(stream);
        debug!(slot = handle.slot(), version = handle.version(), "stream opened");
        handle
    }

    /// Queues `data` for the stream. Ownership of the buffer passes to the
    /// logger, which frees it once written or discarded.
    ///
    /// # Returns
    ///
    /// The number of bytes queued.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` for a closed or stale handle, `Cancelled` while the
    /// logger is stopping. Nothing is queued in either case.
    pub fn write(
        &self,
        handle: &StreamHandle,
        category: Category,
        data: Vec<u8>,
    ) -> Result<usize, LoggerError> {
        if self.shared.cancel.load(Ordering::Acquire) {
            return Err(LoggerError::Cancelled);
        }
        let stream = self.shared.registry.lookup(handle).ok_or(LoggerError::InvalidHandle)?;
        let size = data.len();
        self.shared.enqueue(Command::write(stream, category, data));
        Ok(size)
    }

    /// Copies `data` and queues the copy.
    ///
    /// # Errors
    ///
    /// As [`write`](Self::write), plus `Alloc` if the copy cannot be
    /// allocated.
    pub fn write_str(
        &self,
        handle: &StreamHandle,
        category: Category,
        data: &str,
    ) -> Result<usize, LoggerError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(data.len())?;
        buf.extend_from_slice(data.as_bytes());
        self.write(handle, category, buf)
    }

    /// Closes a stream and releases its slot.
    ///
    /// The handle is rejected by `write` as soon as this returns. Without
    /// `immediate`, everything queued before the close is written first;
    /// with it, queued data is dropped and a warning is logged.
    ///
    /// If the writer thread is not running the stream is released right
    /// away on the calling thread.
    pub fn close_file(
        &self,
        handle: &StreamHandle,
        immediate: bool,
        wait: CloseWait,
    ) -> Result<CloseOutcome, LoggerError> {
        let stream = self.shared.registry.lookup(handle).ok_or(LoggerError::InvalidHandle)?;
        if !stream.begin_close() {
            return Err(LoggerError::InvalidHandle);
        }

        if !self.is_running() {
            if let Err(e) = stream.state.lock().close_writer() {
                warn!(stream = stream.name(), "error closing stream: {}", e);
            }
            self.shared.registry.release_slot(handle);
            stream.closed_event().signal();
            debug!(stream = stream.name(), "stream closed without writer thread");
            return Ok(CloseOutcome::Closed);
        }

        self.shared.enqueue(Command::destroy(stream.clone(), immediate));

        let released = match wait {
            CloseWait::NoWait => stream.is_released(),
            CloseWait::Timeout(timeout) => wait_released(&stream, Instant::now().checked_add(timeout)),
            CloseWait::Indefinitely => wait_released(&stream, None),
        };
        Ok(if released { CloseOutcome::Closed } else { CloseOutcome::Pending })
    }

    /// Closes the stream's writer but keeps the stream registered.
    ///
    /// The stream is left in an error state: later writes are accepted but
    /// dropped until the stream's reconnecter, if any, brings it back.
    pub fn disconnect(&self, handle: &StreamHandle, immediate: bool) -> Result<(), LoggerError> {
        let stream = self.shared.registry.lookup(handle).ok_or(LoggerError::InvalidHandle)?;
        if self.is_running() {
            self.shared.enqueue(Command::close(stream, immediate));
            return Ok(());
        }

        let mut state = stream.state.lock();
        if let Err(e) = state.close_writer() {
            warn!(stream = stream.name(), "error closing stream: {}", e);
        }
        state.error.get_or_insert_with(StreamError::disconnected);
        stream.closed_event().signal();
        Ok(())
    }

    fn with_state<R>(
        &self,
        handle: &StreamHandle,
        f: impl FnOnce(&mut StreamState) -> R,
    ) -> Result<R, LoggerError> {
        let stream = self.shared.registry.lookup(handle).ok_or(LoggerError::InvalidHandle)?;
        let mut state = stream.state.lock();
        Ok(f(&mut state))
    }

    /// Installs a formatter applied to every message of the stream before
    /// it is written.
    pub fn set_formatter(
        &self,
        handle: &StreamHandle,
        formatter: impl Formatter + 'static,
    ) -> Result<(), LoggerError> {
        self.with_state(handle, |state| state.formatter = Some(Box::new(formatter)))
    }

    /// Removes the stream's formatter; messages are written as queued.
    pub fn clear_formatter(&self, handle: &StreamHandle) -> Result<(), LoggerError> {
        self.with_state(handle, |state| state.formatter = None)
    }

    /// Replaces the stream's writer. The previous writer is closed, so for
    /// a file stream this also closes the file.
    pub fn set_writer(
        &self,
        handle: &StreamHandle,
        writer: impl Writer + 'static,
    ) -> Result<(), LoggerError> {
        self.with_state(handle, |state| {
            let _ = state.close_writer();
            state.writer = Box::new(writer);
            state.writer_open = true;
        })
    }

    /// Installs the callback used to revive the stream after a failure.
    pub fn set_reconnect(
        &self,
        handle: &StreamHandle,
        reconnecter: impl Reconnecter + 'static,
    ) -> Result<(), LoggerError> {
        self.with_state(handle, |state| state.reconnecter = Some(Box::new(reconnecter)))
    }

    /// Sets how many messages go into one writer call, clamped to
    /// `1..=MAX_BATCH_SIZE`.
    pub fn set_batch_size(&self, handle: &StreamHandle, size: usize) -> Result<(), LoggerError> {
        self.with_state(handle, |state| state.batch_size = clamp_batch_size(size))
    }

    /// Installs the callback told about stream failures. It runs on the
    /// writer thread. Without one, failures are logged through `tracing`.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&StreamInfo, i32, &str) + Send + Sync + 'static,
    {
        *self.shared.error_handler.write() = Some(Arc::new(handler));
    }

    /// Error currently recorded on the stream, `None` if it is healthy.
    ///
    /// # Errors
    ///
    /// `InvalidHandle` once the stream is gone.
    pub fn last_error(&self, handle: &StreamHandle) -> Result<Option<StreamError>, LoggerError> {
        let stream = self.shared.registry.lookup_any(handle).ok_or(LoggerError::InvalidHandle)?;
        Ok(stream.last_error())
    }

    /// Whether `handle` still names an open stream.
    pub fn is_valid(&self, handle: &StreamHandle) -> bool {
        self.shared.registry.lookup(handle).is_some()
    }

    /// Largest number of commands handled in a single commit cycle.
    pub fn max_queue_size(&self) -> usize {
        self.shared.stats.max_queue_size.load(Ordering::Relaxed)
    }

    /// Messages successfully handed to writers so far.
    pub fn total_msgs_processed(&self) -> u64 {
        self.shared.stats.processed.load(Ordering::Relaxed)
    }

    /// Messages dropped without being written so far.
    pub fn total_msgs_discarded(&self) -> u64 {
        self.shared.stats.discarded.load(Ordering::Relaxed)
    }

    /// Streams opened and not yet closed.
    pub fn open_files_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Whether any queued command has not been written or discarded yet.
    pub fn has_pending_data(&self) -> bool {
        self.shared.has_pending_data()
    }
}

impl Default for MultiStreamLogger {
    fn default() -> Self {
        Self::new(LoggerConfig::default())
    }
}

impl Drop for MultiStreamLogger {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Blocks until `stream` is released or `deadline` passes. Without a
/// deadline it waits for the release.
fn wait_released(stream: &Stream, deadline: Option<Instant>) -> bool {
    let event = stream.closed_event();
    loop {
        let seen = event.value();
        if stream.is_released() {
            return true;
        }
        match deadline {
            None => event.wait(seen),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return false;
                }
                event.wait_timeout(seen, deadline - now);
            }
        }
    }
}
