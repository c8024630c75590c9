use std::collections::{BTreeMap, VecDeque};
use std::io::{self, IoSlice};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use parking_lot::RwLock;
use tracing::{debug, error, info, trace, warn};

use crate::category::Category;
use crate::command::{Command, CommandKind};
use crate::config::LoggerConfig;
use crate::error::StreamError;
use crate::event::Event;
use crate::intake_queue::{Chain, IntakeQueue};
use crate::registry::StreamRegistry;
use crate::stream::{Stream, StreamHandle, StreamInfo, StreamState};

/// Callback invoked on the writer thread when a stream fails:
/// `(stream, errno, message)`.
pub type ErrorHandler = dyn Fn(&StreamInfo, i32, &str) + Send + Sync;

/// State shared between producer threads and the writer thread.
pub(crate) struct Shared {
    pub queue: IntakeQueue<Command>,
    pub wake: Event,
    pub cancel: AtomicBool,
    pub registry: StreamRegistry,
    pub config: LoggerConfig,
    pub stats: Stats,
    pub error_handler: RwLock<Option<Arc<ErrorHandler>>>,
}

/// Running counters, readable from any thread.
#[derive(Default)]
pub(crate) struct Stats {
    /// Largest number of commands drained in one commit cycle.
    pub max_queue_size: AtomicUsize,
    /// Messages handed to a writer successfully.
    pub processed: AtomicU64,
    /// Messages dropped because their stream failed, closed or vanished.
    pub discarded: AtomicU64,
    /// Streams that still hold pending commands after the last cycle.
    pub pending_streams: AtomicUsize,
    /// Set while a commit cycle owns drained commands.
    pub busy: AtomicBool,
}

impl Shared {
    pub fn new(config: LoggerConfig) -> Self {
        Self {
            queue: IntakeQueue::new(),
            wake: Event::new(),
            cancel: AtomicBool::new(false),
            registry: StreamRegistry::new(config.max_streams),
            config,
            stats: Stats::default(),
            error_handler: RwLock::new(None),
        }
    }

    /// Hands `cmd` to the writer thread, waking it if the queue was empty.
    pub fn enqueue(&self, cmd: Command) {
        trace!(?cmd, "enqueue");
        if self.queue.push(cmd) {
            self.wake.signal();
        }
    }

    pub fn has_pending_data(&self) -> bool {
        !self.queue.is_empty()
            || self.stats.busy.load(Ordering::SeqCst)
            || self.stats.pending_streams.load(Ordering::SeqCst) > 0
    }

    /// Reports a stream failure through the installed handler, or the
    /// tracing log when there is none.
    pub fn report(&self, info: &StreamInfo, err: &StreamError) {
        let handler = self.error_handler.read().clone();
        match handler {
            Some(handler) => {
                let called = catch_unwind(AssertUnwindSafe(|| {
                    handler(info, err.code, &err.message)
                }));
                if called.is_err() {
                    warn!(stream = info.name(), "error handler panicked");
                }
            }
            None => error!(
                stream = info.name(),
                errno = err.code,
                "stream error: {}",
                err.message
            ),
        }
    }

    /// Drops commands that can no longer be delivered. Only write commands
    /// are counted and warned about.
    pub fn discard<I>(&self, info: &StreamInfo, commands: I, reason: &str) -> usize
    where
        I: IntoIterator<Item = Command>,
    {
        let dropped = commands.into_iter().filter(Command::is_write).count();
        self.drop_messages(info, dropped, reason);
        dropped
    }

    /// Accounts for `dropped` messages that were freed without being written.
    pub fn drop_messages(&self, info: &StreamInfo, dropped: usize, reason: &str) {
        if dropped > 0 {
            self.stats.discarded.fetch_add(dropped as u64, Ordering::Relaxed);
            warn!(stream = info.name(), dropped, "discarded queued messages: {}", reason);
        }
    }
}

/// Commands waiting for one stream, oldest first.
struct StreamQueue {
    stream: Arc<Stream>,
    pending: VecDeque<Command>,
}

/// Messages collected for one writer call.
struct Batch {
    categories: Vec<Category>,
    payloads: Vec<Vec<u8>>,
}

impl Batch {
    fn with_capacity(n: usize) -> Self {
        Self {
            categories: Vec::with_capacity(n),
            payloads: Vec::with_capacity(n),
        }
    }

    fn len(&self) -> usize {
        self.payloads.len()
    }

    fn is_empty(&self) -> bool {
        self.payloads.is_empty()
    }

    fn push(&mut self, category: Category, payload: Vec<u8>) {
        self.categories.push(category);
        self.payloads.push(payload);
    }

    /// Puts the batch back in front of `pending`, already formatted.
    fn requeue(&mut self, stream: &Arc<Stream>, pending: &mut VecDeque<Command>) {
        let messages = self.categories.drain(..).zip(self.payloads.drain(..));
        for (category, payload) in messages.rev() {
            pending.push_front(Command {
                stream: stream.clone(),
                kind: CommandKind::Write { category, payload, formatted: true },
            });
        }
    }

    fn clear(&mut self) -> usize {
        let n = self.len();
        self.categories.clear();
        self.payloads.clear();
        n
    }
}

enum Flush {
    Written,
    Blocked,
    Failed,
}

/// The single consumer of the intake queue.
///
/// Each commit cycle drains the intake queue, appends every command to the
/// pending list of its stream in submission order, then walks the streams
/// with pending work ("dirty" streams) and writes their messages in
/// batches. A stream leaves the dirty set once its pending list is empty.
pub(crate) struct WriterLoop {
    shared: Arc<Shared>,
    dirty: BTreeMap<StreamHandle, StreamQueue>,
}

impl WriterLoop {
    pub fn new(shared: Arc<Shared>) -> Self {
        Self { shared, dirty: BTreeMap::new() }
    }

    /// Runs commit cycles until cancelled and the intake queue is empty,
    /// then closes every remaining stream.
    pub fn run(mut self) {
        debug!("writer thread started");
        let timeout = self.shared.config.commit_timeout;
        loop {
            let seen = self.shared.wake.value();
            if self.shared.queue.is_empty() && !self.shared.cancel.load(Ordering::Acquire) {
                self.shared.wake.wait_timeout(seen, timeout);
            }

            let cancelled = self.shared.cancel.load(Ordering::Acquire);
            self.commit();

            if cancelled && self.shared.queue.is_empty() {
                break;
            }
        }
        self.shutdown();
        debug!("writer thread finished");
    }

    /// One drain, redistribute and write pass.
    ///
    /// # Returns
    ///
    /// The number of commands taken from the intake queue.
    pub fn commit(&mut self) -> usize {
        self.shared.stats.busy.store(true, Ordering::SeqCst);

        let count = self.redistribute(self.shared.queue.drain());
        if count > 0 {
            self.shared.stats.max_queue_size.fetch_max(count, Ordering::Relaxed);
            trace!(count, dirty = self.dirty.len(), "drained intake queue");
        }

        let shared = &self.shared;
        self.dirty.retain(|_, queue| flush_stream(shared, queue));

        self.shared.stats.pending_streams.store(self.dirty.len(), Ordering::SeqCst);
        self.shared.stats.busy.store(false, Ordering::SeqCst);
        count
    }

    /// Moves drained commands into the pending lists of their streams.
    ///
    /// The drained chain is newest first; re-linking it into submission
    /// order and appending to each stream's tail keeps every stream FIFO,
    /// including behind commands left over from earlier cycles.
    fn redistribute(&mut self, drained: Chain<Command>) -> usize {
        let mut count = 0;
        for cmd in drained.into_fifo() {
            count += 1;
            if cmd.stream.is_released() {
                let info = cmd.stream.info().clone();
                self.shared.discard(&info, Some(cmd), "stream already destroyed");
                continue;
            }
            let key = cmd.stream.handle();
            self.dirty
                .entry(key)
                .or_insert_with(|| StreamQueue {
                    stream: cmd.stream.clone(),
                    pending: VecDeque::new(),
                })
                .pending
                .push_back(cmd);
        }
        count
    }

    /// Final pass once cancelled: drops whatever is still pending and
    /// closes every registered stream.
    fn shutdown(&mut self) {
        for (_, queue) in std::mem::take(&mut self.dirty) {
            let info = queue.stream.info().clone();
            self.shared.discard(&info, queue.pending, "logger shutting down");
        }

        for stream in self.shared.registry.streams() {
            {
                let mut state = stream.state.lock();
                if let Err(e) = state.close_writer() {
                    warn!(stream = stream.name(), "error closing stream: {}", e);
                }
            }
            self.shared.registry.release_slot(&stream.handle());
            stream.closed_event().signal();
            debug!(stream = stream.name(), "stream closed at shutdown");
        }
        self.shared.stats.pending_streams.store(0, Ordering::SeqCst);
    }
}

/// Writes out one stream's pending commands.
///
/// Returns `true` while the stream still has pending commands and must stay
/// in the dirty set. Failures are reported after the stream lock is
/// released, so the error handler may call back into the logger.
fn flush_stream(shared: &Shared, queue: &mut StreamQueue) -> bool {
    let stream = queue.stream.clone();
    let mut state = stream.state.lock();
    let outcome = flush_locked(shared, &stream, &mut queue.pending, &mut state);
    let unreported = std::mem::take(&mut state.unreported);
    drop(state);

    for err in &unreported {
        shared.report(stream.info(), err);
    }

    match outcome {
        Some(dirty) => dirty,
        None => {
            shared.registry.release_slot(&stream.handle());
            debug!(stream = stream.name(), "stream destroyed");
            stream.closed_event().signal();
            false
        }
    }
}

/// Body of [`flush_stream`], run with the stream locked.
///
/// Returns `None` once a `DestroyStream` command has been processed, or
/// whether commands are still pending otherwise.
fn flush_locked(
    shared: &Shared,
    stream: &Arc<Stream>,
    pending: &mut VecDeque<Command>,
    state: &mut StreamState,
) -> Option<bool> {
    let info = stream.info();

    if state.error.is_some() && state.reconnecter.is_some() {
        try_reconnect(shared, info, state);
    }

    // An immediate close does not wait for data queued ahead of it, but an
    // earlier deferred close still gets its preceding data written.
    if let Some(pos) = pending.iter().position(is_immediate_control) {
        let from = pending
            .range(..pos)
            .rposition(|cmd| !cmd.is_write())
            .map_or(0, |i| i + 1);
        let skipped: Vec<Command> = pending.drain(from..pos).collect();
        shared.discard(info, skipped, "stream closed immediately");
    }

    let mut batch = Batch::with_capacity(state.batch_size);
    let mut dropped = 0;

    while let Some(cmd) = pending.pop_front() {
        match cmd.kind {
            CommandKind::Write { category, payload, formatted } => {
                if state.error.is_some() {
                    dropped += 1;
                    continue;
                }
                let payload = if formatted {
                    payload
                } else {
                    match apply_formatter(state, category, payload) {
                        Ok(p) => p,
                        Err(err) => {
                            dropped += 1;
                            fail_stream(info, state, err);
                            continue;
                        }
                    }
                };
                batch.push(category, payload);

                if batch.len() >= state.batch_size {
                    if let Flush::Blocked = write_batch(shared, info, state, &mut batch) {
                        batch.requeue(stream, pending);
                        break;
                    }
                }
            }
            CommandKind::Close { immediate } => {
                // Everything queued ahead of a close goes out first.
                if let Flush::Blocked = write_batch(shared, info, state, &mut batch) {
                    let n = batch.len();
                    batch.requeue(stream, pending);
                    pending.insert(n, Command::close(stream.clone(), immediate));
                    break;
                }
                if let Err(e) = state.close_writer() {
                    warn!(stream = info.name(), "error closing stream: {}", e);
                }
                state.error.get_or_insert_with(StreamError::disconnected);
                debug!(stream = info.name(), immediate, "stream closed");
                stream.closed_event().signal();
            }
            CommandKind::DestroyStream { immediate } => {
                if let Flush::Blocked = write_batch(shared, info, state, &mut batch) {
                    let n = batch.len();
                    batch.requeue(stream, pending);
                    pending.insert(n, Command::destroy(stream.clone(), immediate));
                    break;
                }
                if let Err(e) = state.close_writer() {
                    warn!(stream = info.name(), "error closing stream: {}", e);
                }
                shared.drop_messages(info, dropped, "stream is in error state");
                let rest = std::mem::take(pending);
                shared.discard(info, rest, "stream destroyed");
                debug!(stream = info.name(), immediate, "destroying stream");
                return None;
            }
        }
    }

    if let Flush::Blocked = write_batch(shared, info, state, &mut batch) {
        batch.requeue(stream, pending);
    }
    shared.drop_messages(info, dropped, "stream is in error state");
    Some(!pending.is_empty())
}

fn is_immediate_control(cmd: &Command) -> bool {
    matches!(
        cmd.kind,
        CommandKind::Close { immediate: true } | CommandKind::DestroyStream { immediate: true }
    )
}

fn apply_formatter(
    state: &mut StreamState,
    category: Category,
    payload: Vec<u8>,
) -> Result<Vec<u8>, StreamError> {
    match state.formatter.as_mut() {
        None => Ok(payload),
        Some(formatter) => catch_unwind(AssertUnwindSafe(move || formatter.format(category, payload)))
            .map_err(|p| StreamError::from_panic("formatter", p)),
    }
}

/// Hands the batch to the stream's writer.
///
/// On success the messages are counted as processed and freed. A
/// `WouldBlock` leaves the batch untouched for the caller to requeue. Any
/// other failure, or a stream already in the error state, drops the batch.
fn write_batch(shared: &Shared, info: &StreamInfo, state: &mut StreamState, batch: &mut Batch) -> Flush {
    if batch.is_empty() {
        return Flush::Written;
    }
    // The writer is already closed; the batch must not reach it.
    if state.error.is_some() {
        let n = batch.clear();
        shared.stats.discarded.fetch_add(n as u64, Ordering::Relaxed);
        warn!(stream = info.name(), dropped = n, "discarded batch of failed stream");
        return Flush::Failed;
    }

    let slices: Vec<IoSlice<'_>> = batch.payloads.iter().map(|p| IoSlice::new(p)).collect();
    let writer = &mut state.writer;
    let categories = &batch.categories;
    let result = catch_unwind(AssertUnwindSafe(|| writer.write_batch(info, categories, &slices)));
    drop(slices);

    let err = match result {
        Ok(Ok(bytes)) => {
            let n = batch.clear();
            shared.stats.processed.fetch_add(n as u64, Ordering::Relaxed);
            trace!(stream = info.name(), messages = n, bytes, "batch written");
            return Flush::Written;
        }
        Ok(Err(e)) if e.kind() == io::ErrorKind::WouldBlock => {
            trace!(stream = info.name(), messages = batch.len(), "writer would block");
            return Flush::Blocked;
        }
        Ok(Err(e)) => StreamError::from_io(&e),
        Err(panic) => StreamError::from_panic("writer", panic),
    };

    let n = batch.clear();
    shared.stats.discarded.fetch_add(n as u64, Ordering::Relaxed);
    warn!(stream = info.name(), dropped = n, "failed to write batch: {}", err.message);
    fail_stream(info, state, err);
    Flush::Failed
}

/// Moves a stream into the error state and closes its writer. The error is
/// queued for reporting only on the transition into the error state.
fn fail_stream(info: &StreamInfo, state: &mut StreamState, err: StreamError) {
    if let Err(e) = state.close_writer() {
        debug!(stream = info.name(), "error closing failed stream: {}", e);
    }
    if state.error.is_none() {
        state.unreported.push(err.clone());
        state.error = Some(err);
    }
}

/// Tries to replace a failed stream's writer, honouring the reconnect
/// backoff.
fn try_reconnect(shared: &Shared, info: &StreamInfo, state: &mut StreamState) {
    let now = Instant::now();
    if let Some(last) = state.last_reconnect_attempt {
        let delay = shared.config.reconnect.delay(state.failed_reconnects);
        if now.duration_since(last) < delay {
            return;
        }
    }
    state.last_reconnect_attempt = Some(now);

    let result = match state.reconnecter.as_mut() {
        Some(reconnecter) => catch_unwind(AssertUnwindSafe(|| reconnecter.reconnect(info))),
        None => return,
    };

    match result {
        Ok(Ok(writer)) => {
            let _ = state.close_writer();
            state.writer = writer;
            state.writer_open = true;
            state.error = None;
            state.failed_reconnects = 0;
            info!(stream = info.name(), "stream reconnected");
        }
        Ok(Err(e)) => {
            state.failed_reconnects = state.failed_reconnects.saturating_add(1);
            state.unreported.push(StreamError::from_io(&e));
        }
        Err(panic) => {
            state.failed_reconnects = state.failed_reconnects.saturating_add(1);
            state.unreported.push(StreamError::from_panic("reconnecter", panic));
        }
    }
}
