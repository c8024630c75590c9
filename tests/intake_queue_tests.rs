use multi_stream_logger::intake_queue::IntakeQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

#[test]
fn test_concurrent_producers_single_consumer() {
    const PRODUCERS: usize = 8;
    const ITEMS: usize = 20_000;

    let queue = Arc::new(IntakeQueue::new());
    let done = Arc::new(AtomicBool::new(false));

    let consumer = {
        let queue = queue.clone();
        let done = done.clone();
        thread::spawn(move || {
            let mut seen: HashMap<usize, usize> = HashMap::new();
            let mut total = 0;
            loop {
                let finished = done.load(Ordering::Acquire);
                for (producer, n) in queue.drain().into_fifo() {
                    let next = seen.entry(producer).or_insert(0);
                    assert_eq!(n, *next, "producer {producer} reordered");
                    *next += 1;
                    total += 1;
                }
                if finished && queue.is_empty() {
                    break;
                }
                thread::yield_now();
            }
            total
        })
    };

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|p| {
            let queue = queue.clone();
            thread::spawn(move || {
                for n in 0..ITEMS {
                    queue.push((p, n));
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }
    done.store(true, Ordering::Release);

    assert_eq!(consumer.join().unwrap(), PRODUCERS * ITEMS);
}

#[test]
fn test_push_after_drain_starts_new_batch() {
    let queue = IntakeQueue::new();
    assert!(queue.push(1));
    assert!(!queue.push(2));
    let first: Vec<i32> = queue.drain().into_fifo().collect();
    assert_eq!(first, [1, 2]);

    assert!(queue.push(3));
    let second: Vec<i32> = queue.drain().into_fifo().collect();
    assert_eq!(second, [3]);
    assert!(queue.is_empty());
}
