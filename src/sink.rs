//! Stream capabilities plugged into the writer thread.
//!
//! A stream is driven through three capabilities, each swappable per stream:
//!
//! * [`Writer`] - puts a batch of messages onto the destination
//! * [`Formatter`] - rewrites each message just before it is written
//! * [`Reconnecter`] - produces a fresh `Writer` after the stream failed
//!
//! All of them run on the writer thread only. A panic inside any of them is
//! caught and turned into a stream error.

use std::fs::{File, OpenOptions};
use std::io::{self, IoSlice, Write};
use std::path::{Path, PathBuf};

use crate::category::Category;
use crate::stream::StreamInfo;

/// Destination for batches of messages.
///
/// The logger owns no I/O itself: every byte goes through the stream's
/// `Writer`, whether it is a plain file, a socket or a test double.
///
/// # Usage
///
/// ```
/// # use multi_stream_logger::{Category, StreamInfo, Writer};
/// # use std::io::{self, IoSlice};
/// struct CountingWriter(usize);
///
/// impl Writer for CountingWriter {
///     fn write_batch(
///         &mut self,
///         _info: &StreamInfo,
///         _categories: &[Category],
///         data: &[IoSlice<'_>],
///     ) -> io::Result<usize> {
///         self.0 += data.len();
///         Ok(data.iter().map(|s| s.len()).sum())
///     }
/// }
/// ```
pub trait Writer: Send {
    /// Writes one batch. `categories[i]` is the category of `data[i]`.
    ///
    /// # Returns
    ///
    /// * `Ok(n)` - the batch is consumed; `n` is the number of bytes written
    /// * `Err(e)` with `e.kind() == WouldBlock` - nothing was consumed, keep
    ///   the batch and retry on the next commit cycle
    /// * any other `Err(e)` - the stream enters the error state and its
    ///   queued messages are discarded
    fn write_batch(
        &mut self,
        info: &StreamInfo,
        categories: &[Category],
        data: &[IoSlice<'_>],
    ) -> io::Result<usize>;

    /// Releases the destination. Called once when the stream is closed,
    /// destroyed or fails.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Per-message rewrite applied before a message is batched.
///
/// The formatter receives ownership of the payload and may return it
/// modified in place or replace it with a new buffer.
pub trait Formatter: Send {
    fn format(&mut self, category: Category, payload: Vec<u8>) -> Vec<u8>;
}

/// Re-opens a failed stream.
///
/// On success the returned writer replaces the failed one and the stream's
/// error state is cleared. Outstanding handles stay valid.
pub trait Reconnecter: Send {
    fn reconnect(&mut self, info: &StreamInfo) -> io::Result<Box<dyn Writer>>;
}

/// Adapts a closure into a [`Writer`].
///
/// # Examples
///
/// ```
/// # use multi_stream_logger::sink::writer_fn;
/// let writer = writer_fn(|_info, _categories, data| {
///     Ok(data.iter().map(|s| s.len()).sum())
/// });
/// # let _ = writer;
/// ```
pub fn writer_fn<F>(f: F) -> FnWriter<F>
where
    F: FnMut(&StreamInfo, &[Category], &[IoSlice<'_>]) -> io::Result<usize> + Send,
{
    FnWriter(f)
}

/// Adapts a closure into a [`Formatter`].
pub fn formatter_fn<F>(f: F) -> FnFormatter<F>
where
    F: FnMut(Category, Vec<u8>) -> Vec<u8> + Send,
{
    FnFormatter(f)
}

/// Adapts a closure into a [`Reconnecter`].
pub fn reconnect_fn<F>(f: F) -> FnReconnecter<F>
where
    F: FnMut(&StreamInfo) -> io::Result<Box<dyn Writer>> + Send,
{
    FnReconnecter(f)
}

pub struct FnWriter<F>(F);
pub struct FnFormatter<F>(F);
pub struct FnReconnecter<F>(F);

impl<F> Writer for FnWriter<F>
where
    F: FnMut(&StreamInfo, &[Category], &[IoSlice<'_>]) -> io::Result<usize> + Send,
{
    fn write_batch(
        &mut self,
        info: &StreamInfo,
        categories: &[Category],
        data: &[IoSlice<'_>],
    ) -> io::Result<usize> {
        (self.0)(info, categories, data)
    }
}

impl<F> Formatter for FnFormatter<F>
where
    F: FnMut(Category, Vec<u8>) -> Vec<u8> + Send,
{
    fn format(&mut self, category: Category, payload: Vec<u8>) -> Vec<u8> {
        (self.0)(category, payload)
    }
}

impl<F> Reconnecter for FnReconnecter<F>
where
    F: FnMut(&StreamInfo) -> io::Result<Box<dyn Writer>> + Send,
{
    fn reconnect(&mut self, info: &StreamInfo) -> io::Result<Box<dyn Writer>> {
        (self.0)(info)
    }
}

/// Default writer for file streams: one vectored write per batch.
pub struct FileWriter {
    file: Option<File>,
}

impl FileWriter {
    /// Opens `path` for writing, creating it if needed.
    ///
    /// # Arguments
    ///
    /// * `append` - append to an existing file instead of truncating it
    /// * `mode` - permission bits for a newly created file (unix only)
    pub fn open(path: impl AsRef<Path>, append: bool, mode: u32) -> io::Result<Self> {
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(mode);
        }
        #[cfg(not(unix))]
        let _ = mode;

        Ok(Self::from_file(options.open(path)?))
    }

    pub fn from_file(file: File) -> Self {
        Self { file: Some(file) }
    }
}

impl Writer for FileWriter {
    fn write_batch(
        &mut self,
        _info: &StreamInfo,
        _categories: &[Category],
        data: &[IoSlice<'_>],
    ) -> io::Result<usize> {
        let file = match self.file.as_mut() {
            Some(file) => file,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "file writer is closed")),
        };

        // writev may stop short; keep going until the whole batch is out.
        let mut slices: Vec<IoSlice<'_>> = data.to_vec();
        let mut remaining = &mut slices[..];
        IoSlice::advance_slices(&mut remaining, 0);

        let mut total = 0;
        while !remaining.is_empty() {
            match file.write_vectored(&*remaining) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "failed to write whole batch",
                    ))
                }
                Ok(n) => {
                    total += n;
                    IoSlice::advance_slices(&mut remaining, n);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn close(&mut self) -> io::Result<()> {
        match self.file.take() {
            Some(mut file) => file.flush(),
            None => Ok(()),
        }
    }
}

/// Reconnecter that re-opens a file stream in append mode.
pub struct FileReconnecter {
    path: PathBuf,
    mode: u32,
}

impl FileReconnecter {
    pub fn new(path: impl Into<PathBuf>, mode: u32) -> Self {
        Self { path: path.into(), mode }
    }
}

impl Reconnecter for FileReconnecter {
    fn reconnect(&mut self, _info: &StreamInfo) -> io::Result<Box<dyn Writer>> {
        Ok(Box::new(FileWriter::open(&self.path, true, self.mode)?))
    }
}

/// Formatter that compresses every message into a size-prepended LZ4
/// block. Readers decode each record with
/// `lz4_flex::decompress_size_prepended` after splitting on their own
/// framing.
#[derive(Default)]
pub struct Lz4Formatter;

impl Formatter for Lz4Formatter {
    fn format(&mut self, _category: Category, payload: Vec<u8>) -> Vec<u8> {
        lz4_flex::compress_prepend_size(&payload)
    }
}
