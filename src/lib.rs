//! # Multi-Stream Logger
//!
//! An asynchronous logger that writes to many destinations at once from a
//! single background thread:
//!
//! * **Non-blocking producers**: `write` pushes onto a lock-free queue and
//!   returns, whatever the state of the destination
//! * **Per-stream ordering**: messages to one stream are written in the
//!   order they were submitted
//! * **Batched output**: each stream's messages are written with one
//!   vectored call per batch
//!
//! ## Key Features
//!
//! * Files or custom destinations through the [`Writer`] trait
//! * Per-stream formatting, e.g. [`Lz4Formatter`]
//! * Automatic reconnection of failed streams with configurable backoff
//! * Backpressure: a writer returning `WouldBlock` keeps its data queued
//! * Stream handles carry a version, so a closed handle never reaches a
//!   stream opened later in the same slot
//!
//! ## Main Components
//!
//! * [`MultiStreamLogger`]: the public API and owner of the writer thread
//! * `intake_queue`: lock-free multi-producer queue feeding the writer thread
//! * `registry`: slot table of open streams
//! * `sink`: the writer, formatter and reconnecter traits and their file
//!   implementations
//!
//! ## Quick Start
//!
//! ```
//! use multi_stream_logger::{MultiStreamLogger, LoggerConfig, Category, CloseWait};
//! use multi_stream_logger::sink::writer_fn;
//! use std::sync::{Arc, Mutex};
//!
//! let lines = Arc::new(Mutex::new(Vec::new()));
//! let sink = lines.clone();
//!
//! let logger = MultiStreamLogger::new(LoggerConfig::default());
//! let stream = logger
//!     .open_stream("memory", writer_fn(move |_, _, batch| {
//!         let mut lines = sink.lock().unwrap();
//!         let mut written = 0;
//!         for message in batch {
//!             lines.push(String::from_utf8_lossy(message).into_owned());
//!             written += message.len();
//!         }
//!         Ok(written)
//!     }))
//!     .unwrap();
//! logger.start().unwrap();
//!
//! let audit = Category::new("audit");
//! logger.write_str(&stream, audit, "user logged in").unwrap();
//! logger.write_str(&stream, audit, "user logged out").unwrap();
//!
//! logger.close_file(&stream, false, CloseWait::Indefinitely).unwrap();
//! logger.stop();
//!
//! assert_eq!(*lines.lock().unwrap(), ["user logged in", "user logged out"]);
//! assert_eq!(logger.total_msgs_processed(), 2);
//! ```

pub mod category;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod intake_queue;
pub mod logger;
pub mod registry;
pub mod sink;
pub mod stream;
mod writer;

pub use category::Category;
pub use config::{LoggerConfig, ReconnectPolicy, MAX_BATCH_SIZE};
pub use error::{LoggerError, StreamError};
pub use logger::{CloseOutcome, CloseWait, MultiStreamLogger, DEFAULT_FILE_MODE};
pub use sink::{FileReconnecter, FileWriter, Formatter, Lz4Formatter, Reconnecter, Writer};
pub use stream::{StreamHandle, StreamInfo};
pub use writer::ErrorHandler;
