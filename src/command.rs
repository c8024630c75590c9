use std::fmt;
use std::sync::Arc;

use crate::category::Category;
use crate::stream::Stream;

/// What a [`Command`] asks the writer thread to do.
pub enum CommandKind {
    /// Write `payload` to the stream.
    ///
    /// `formatted` is set once the stream's formatter has been applied, so
    /// a batch held back by backpressure is not formatted twice.
    Write {
        category: Category,
        payload: Vec<u8>,
        formatted: bool,
    },
    /// Close the stream's writer but keep the stream registered.
    ///
    /// A deferred close lets the messages queued ahead of it be written
    /// first. An immediate close discards them.
    Close { immediate: bool },
    /// Close the writer, release the stream's slot and drop the stream.
    DestroyStream { immediate: bool },
}

/// A unit of queued work destined for one stream.
///
/// A command is created by a producer thread and moved into the logger on
/// enqueue. From then on it is owned by exactly one place at a time: the
/// intake queue, then the pending list of its stream. The writer thread
/// drops it once the payload has been written or discarded.
pub struct Command {
    pub(crate) stream: Arc<Stream>,
    pub(crate) kind: CommandKind,
}

impl Command {
    pub(crate) fn write(stream: Arc<Stream>, category: Category, payload: Vec<u8>) -> Self {
        Self {
            stream,
            kind: CommandKind::Write { category, payload, formatted: false },
        }
    }

    pub(crate) fn close(stream: Arc<Stream>, immediate: bool) -> Self {
        Self { stream, kind: CommandKind::Close { immediate } }
    }

    pub(crate) fn destroy(stream: Arc<Stream>, immediate: bool) -> Self {
        Self { stream, kind: CommandKind::DestroyStream { immediate } }
    }

    pub fn stream(&self) -> &Arc<Stream> {
        &self.stream
    }

    pub fn kind(&self) -> &CommandKind {
        &self.kind
    }

    pub fn is_write(&self) -> bool {
        matches!(self.kind, CommandKind::Write { .. })
    }

    /// Payload size for write commands, 0 for control commands.
    pub fn payload_len(&self) -> usize {
        match &self.kind {
            CommandKind::Write { payload, .. } => payload.len(),
            _ => 0,
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let info = self.stream.info();
        match &self.kind {
            CommandKind::Write { category, payload, formatted } => f
                .debug_struct("Write")
                .field("stream", &info.name())
                .field("category", category)
                .field("len", &payload.len())
                .field("formatted", formatted)
                .finish(),
            CommandKind::Close { immediate } => f
                .debug_struct("Close")
                .field("stream", &info.name())
                .field("immediate", immediate)
                .finish(),
            CommandKind::DestroyStream { immediate } => f
                .debug_struct("DestroyStream")
                .field("stream", &info.name())
                .field("immediate", immediate)
                .finish(),
        }
    }
}
