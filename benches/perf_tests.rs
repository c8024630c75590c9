use criterion::{black_box, criterion_group, criterion_main, Criterion};
use multi_stream_logger::{Category, CloseWait, LoggerConfig, MultiStreamLogger};
use std::sync::Once;
use std::time::Instant;
use tempfile::tempdir;
use log::{info, LevelFilter};
use log4rs::{
    append::file::FileAppender,
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

const ITERATIONS: usize = 100_000;
const STREAMS: usize = 4;

static LOG4RS_INIT: Once = Once::new();

#[derive(Debug)]
struct TestEvent {
    id: i32,
    active: bool,
    large_number: u64,
    description: String,
}

impl std::fmt::Display for TestEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event[id={}, active={}, large_number={}, desc={}]",
            self.id, self.active, self.large_number, self.description)
    }
}

fn test_event() -> TestEvent {
    TestEvent {
        id: 42,
        active: true,
        large_number: u64::MAX,
        description: "Description with some context about the event. \
                      CPU: 95%, Memory: 2.5GB, Network: 1.2Gbps".to_string(),
    }
}

fn setup_log4rs(log_file: &str) {
    LOG4RS_INIT.call_once(|| {
        let logfile = FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{m}{n}")))
            .append(true)
            .build(log_file)
            .unwrap();

        let config = Config::builder()
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .build(Root::builder().appender("logfile").build(LevelFilter::Info))
            .unwrap();

        log4rs::init_config(config).unwrap();
    });
}

/// Producer-side cost of one message: the async logger only queues it,
/// log4rs formats and writes it on the calling thread.
fn bench_logging_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("Logging Comparison");
    group.sample_size(10);

    let dir = tempdir().unwrap();
    let log4rs_file = dir.path().join("log4rs.log");
    setup_log4rs(log4rs_file.to_str().unwrap());

    group.bench_function("multi_stream_vs_log4rs", |b| {
        b.iter(|| {
            let event = test_event();
            let logger = MultiStreamLogger::new(LoggerConfig::default());
            let handles: Vec<_> = (0..STREAMS)
                .map(|i| logger.open_file(dir.path().join(format!("stream-{i}.log")), false, 0o640).unwrap())
                .collect();
            logger.start().unwrap();
            let category = Category::new("bench");

            let async_start = Instant::now();
            for i in 0..ITERATIONS {
                let line = format!("Test perf: iteration={}, event={}\n", i, event);
                logger.write(&handles[i % STREAMS], category, line.into_bytes()).unwrap();
            }
            let async_duration = async_start.elapsed();

            for handle in &handles {
                logger.close_file(handle, false, CloseWait::Indefinitely).unwrap();
            }
            logger.stop();
            let drain_duration = async_start.elapsed();

            let traditional_start = Instant::now();
            for i in 0..ITERATIONS {
                info!("Test perf: iteration={}, event={}", i, event);
            }
            let traditional_duration = traditional_start.elapsed();

            println!("\nPerformance comparison ({} iterations over {} streams):", ITERATIONS, STREAMS);
            println!("Multi-stream enqueue: {:?}", async_duration);
            println!("Multi-stream until on disk: {:?}", drain_duration);
            println!("log4rs (with I/O): {:?}", traditional_duration);
            println!("Max queue size: {}", logger.max_queue_size());
            println!("Enqueue throughput: {:.2} million msgs/sec",
                    ITERATIONS as f64 / async_duration.as_secs_f64() / 1_000_000.0);

            black_box((async_duration, drain_duration, traditional_duration))
        });
    });

    group.finish();
}

criterion_group!(benches, bench_logging_comparison);
criterion_main!(benches);
