use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use multi_stream_logger::{
    Category, CloseWait, FileReconnecter, Lz4Formatter, LoggerConfig, LoggerError,
    MultiStreamLogger, StreamHandle, DEFAULT_FILE_MODE,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const PRODUCERS: usize = 4;

/// Writes a burst of messages from several threads into a handful of files
/// and prints the logger's counters.
///
/// Usage: `multi_stream_logger [OUT_DIR] [STREAMS] [MESSAGES_PER_PRODUCER]`
fn main() -> Result<(), LoggerError> {
    let (writer, _guard) = tracing_appender::non_blocking(std::io::stderr());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("multi_stream_logger=info")),
        )
        .with_writer(writer)
        .with_thread_names(true)
        .init();

    let mut args = std::env::args().skip(1);
    let dir = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("multi_stream_logger_demo"));
    let streams = parse_stream_count(args.next())?;
    let messages: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(100_000);
    std::fs::create_dir_all(&dir)?;

    let logger = Arc::new(MultiStreamLogger::new(LoggerConfig::default()));
    logger.set_error_handler(|stream, errno, message| {
        warn!(stream = stream.name(), errno, "stream failed: {}", message);
    });

    let mut handles: Vec<StreamHandle> = Vec::with_capacity(streams);
    for i in 0..streams {
        let path = dir.join(format!("stream-{i}.log"));
        let handle = logger.open_file(&path, false, DEFAULT_FILE_MODE)?;
        logger.set_reconnect(&handle, FileReconnecter::new(&path, DEFAULT_FILE_MODE))?;
        if i == 0 {
            logger.set_formatter(&handle, Lz4Formatter)?;
        }
        handles.push(handle);
    }
    info!(streams, dir = %dir.display(), "streams opened");

    logger.start()?;
    let started = Instant::now();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|id| {
            let logger = logger.clone();
            let handles = handles.clone();
            thread::spawn(move || {
                let category = Category::new("demo");
                for n in 0..messages {
                    let handle = &handles[n % handles.len()];
                    let line = format!("producer {id} message {n}\n");
                    if let Err(e) = logger.write(handle, category, line.into_bytes()) {
                        warn!(producer = id, "write rejected: {}", e);
                        break;
                    }
                }
            })
        })
        .collect();
    for producer in producers {
        let _ = producer.join();
    }
    let enqueued = started.elapsed();

    for handle in &handles {
        logger.close_file(handle, false, CloseWait::Timeout(Duration::from_secs(10)))?;
    }
    logger.stop();
    let total = started.elapsed();

    println!("messages enqueued:   {}", PRODUCERS * messages);
    println!("enqueue time:        {:?}", enqueued);
    println!("total time:          {:?}", total);
    println!("messages processed:  {}", logger.total_msgs_processed());
    println!("messages discarded:  {}", logger.total_msgs_discarded());
    println!("max queue size:      {}", logger.max_queue_size());
    println!("open streams:        {}", logger.open_files_count());
    Ok(())
}

/// Number of streams to open; every producer needs at least one.
fn parse_stream_count(arg: Option<String>) -> io::Result<usize> {
    match arg {
        None => Ok(8),
        Some(arg) => arg.parse::<usize>().ok().filter(|&n| n > 0).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "STREAMS must be a positive integer")
        }),
    }
}
