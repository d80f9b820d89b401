//! Integration tests for the lock-and-swap accumulator

use super::fixtures::{
    assert_per_producer_order, Collector, GatedCollector, SlowCollector, Tagged,
};
use batch_accumulator::{handler_fn, AccumulatorBuilder, AccumulatorConfig, FastAccumulator};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_thirty_items_three_full_batches() {
    let collector = Collector::new();
    let acc = FastAccumulator::new(
        collector.clone(),
        AccumulatorConfig::new()
            .with_batch_size(10)
            .with_flush_interval(Duration::from_secs(1)),
    )
    .unwrap();

    for i in 0..30u32 {
        acc.put(i).await;
    }
    acc.close(true).await.unwrap();

    let batches = collector.non_empty_batches();
    assert_eq!(batches.len(), 3);
    assert!(batches.iter().all(|b| b.len() == 10));
    assert_eq!(collector.items(), (0..30).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
async fn test_periodic_flush_then_close() {
    let collector = Collector::new();
    let acc = FastAccumulator::new(
        collector.clone(),
        AccumulatorConfig::new()
            .with_batch_size(10)
            .with_flush_interval(Duration::from_secs(1)),
    )
    .unwrap();

    for i in 0..5u32 {
        acc.put(i).await;
    }
    tokio::time::sleep(Duration::from_secs(5)).await;
    for i in 5..10u32 {
        acc.put(i).await;
    }
    acc.close(true).await.unwrap();

    let non_empty = collector.non_empty_batches();
    assert!(non_empty.len() >= 2);
    assert_eq!(non_empty[0], vec![0, 1, 2, 3, 4]);
    assert_eq!(collector.items(), (0..10).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_producers_lose_nothing() {
    const PRODUCERS: usize = 8;
    const PER_PRODUCER: usize = 1000;

    let collector: Collector<Tagged> = Collector::new();
    let acc = AccumulatorBuilder::new()
        .handler(collector.clone())
        .batch_size(50)
        .flush_interval(Duration::from_secs(60))
        .queue_capacity(4)
        .build_fast()
        .unwrap();

    let mut producers = Vec::new();
    for p in 0..PRODUCERS {
        let acc = acc.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..PER_PRODUCER {
                acc.put((p, seq)).await;
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    acc.close(true).await.unwrap();

    let batches = collector.batches();
    assert_eq!(batches.len(), 161);
    assert!(batches[..160].iter().all(|b| b.len() == 50));
    assert!(batches[160].is_empty());
    assert_per_producer_order(&collector.items(), PRODUCERS, PER_PRODUCER);

    let stats = acc.stats();
    assert_eq!(stats.items_accepted, 8000);
    assert_eq!(stats.items_flushed, 8000);
    let pool = stats.pool.unwrap();
    assert_eq!(pool.allocated + pool.recycled, 161);
}

#[tokio::test]
async fn test_put_waits_while_queue_full() {
    let gated = GatedCollector::new();
    let acc = FastAccumulator::new(
        gated.clone(),
        AccumulatorConfig::new()
            .with_batch_size(1)
            .with_queue_capacity(1)
            .with_flush_interval(Duration::from_secs(60)),
    )
    .unwrap();

    acc.put(1).await;
    // dispatcher is stuck inside the handler with [1]
    gated.wait_entered(1).await;
    // queued behind it
    acc.put(2).await;

    let mut blocked = tokio_test::task::spawn(acc.put(3));
    tokio_test::assert_pending!(blocked.poll());

    gated.open();
    while blocked.poll().is_pending() {
        tokio::task::yield_now().await;
    }
    drop(blocked);
    acc.close(true).await.unwrap();

    assert_eq!(gated.inner.items(), vec![1, 2, 3]);
}

#[tokio::test]
async fn test_close_without_flush_discards_open_and_queued() {
    let gated = GatedCollector::new();
    let acc = FastAccumulator::new(
        gated.clone(),
        AccumulatorConfig::new()
            .with_batch_size(2)
            .with_queue_capacity(4)
            .with_flush_interval(Duration::from_secs(60)),
    )
    .unwrap();

    acc.put(1).await;
    acc.put(2).await;
    gated.wait_entered(1).await;
    // one full batch queued, one item left in the open buffer
    acc.put(3).await;
    acc.put(4).await;
    acc.put(5).await;

    acc.close(false).await.unwrap();

    assert_eq!(gated.inner.batches(), vec![vec![1, 2]]);
    assert_eq!(acc.stats().items_dropped, 3);

    acc.put(6).await;
    assert_eq!(acc.stats().items_dropped, 4);
}

#[tokio::test(start_paused = true)]
async fn test_close_without_flush_releases_blocked_ticker() {
    let gated = GatedCollector::new();
    let acc = FastAccumulator::new(
        gated.clone(),
        AccumulatorConfig::new()
            .with_batch_size(100)
            .with_queue_capacity(1)
            .with_flush_interval(Duration::from_millis(10)),
    )
    .unwrap();

    acc.put(1).await;
    // the handler waits on its token with [1]; the next tick fills the
    // queue and the one after blocks the ticker
    tokio::time::sleep(Duration::from_millis(50)).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), acc.close(false)).await;
    assert!(closed.is_ok(), "close(false) did not return");
    closed.unwrap().unwrap();

    assert_eq!(gated.inner.batches(), vec![vec![1]]);
}

#[tokio::test(start_paused = true)]
async fn test_close_without_flush_discards_batch_queued_behind_slow_handler() {
    let slow = SlowCollector::new(Duration::from_millis(100));
    let acc = FastAccumulator::new(
        slow.clone(),
        AccumulatorConfig::new()
            .with_batch_size(2)
            .with_queue_capacity(1)
            .with_flush_interval(Duration::from_millis(10)),
    )
    .unwrap();

    for i in 1..=4 {
        acc.put(i).await;
    }
    tokio::time::sleep(Duration::from_millis(15)).await;
    acc.close(false).await.unwrap();

    assert_eq!(slow.inner.batches(), vec![vec![1, 2]]);
    assert_eq!(acc.stats().items_dropped, 2);
}

#[tokio::test]
async fn test_zero_capacity_keeps_one_batch_in_flight() {
    let gated = GatedCollector::new();
    let acc = FastAccumulator::new(
        gated.clone(),
        AccumulatorConfig::new()
            .with_batch_size(1)
            .with_queue_capacity(0)
            .with_flush_interval(Duration::from_secs(60)),
    )
    .unwrap();

    acc.put(1).await;
    gated.wait_entered(1).await;

    // nothing may be handed over while the handler is busy with [1]
    let mut blocked = tokio_test::task::spawn(acc.put(2));
    tokio_test::assert_pending!(blocked.poll());
    tokio::task::yield_now().await;
    tokio_test::assert_pending!(blocked.poll());

    gated.open();
    while blocked.poll().is_pending() {
        tokio::task::yield_now().await;
    }
    drop(blocked);
    acc.close(true).await.unwrap();

    assert_eq!(gated.inner.non_empty_batches(), vec![vec![1], vec![2]]);
    assert_eq!(acc.stats().items_dropped, 0);
}

#[tokio::test]
async fn test_drop_without_close_delivers_everything() {
    let collector = Collector::new();
    let acc = FastAccumulator::new(
        collector.clone(),
        AccumulatorConfig::new()
            .with_batch_size(2)
            .with_queue_capacity(4)
            .with_flush_interval(Duration::from_secs(60)),
    )
    .unwrap();

    for i in 1..=5u32 {
        acc.put(i).await;
    }
    drop(acc);

    collector.wait_for_items(5).await;
    assert_eq!(collector.batches(), vec![vec![1, 2], vec![3, 4], vec![5]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_drop_while_ticker_busy_loses_nothing() {
    let slow = SlowCollector::new(Duration::from_millis(2));
    let acc = FastAccumulator::new(
        slow.clone(),
        AccumulatorConfig::new()
            .with_batch_size(3)
            .with_queue_capacity(1)
            .with_flush_interval(Duration::from_millis(1)),
    )
    .unwrap();

    for i in 0..40u32 {
        acc.put(i).await;
    }
    drop(acc);

    slow.inner.wait_for_items(40).await;
    assert_eq!(slow.inner.items(), (0..40).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_handler_panic_does_not_wedge_dispatcher() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let acc = FastAccumulator::new(
        handler_fn(move |_ctx, batch: &[u32]| {
            if batch.contains(&2) {
                panic!("cannot store item 2");
            }
            sink.lock().unwrap().extend_from_slice(batch);
        }),
        AccumulatorConfig::new()
            .with_batch_size(1)
            .with_queue_capacity(4),
    )
    .unwrap();

    for i in 1..=4 {
        acc.put(i).await;
    }
    acc.close(true).await.unwrap();

    assert_eq!(*seen.lock().unwrap(), vec![1, 3, 4]);
    let stats = acc.stats();
    assert_eq!(stats.handler_panics, 1);
}

#[tokio::test(start_paused = true)]
async fn test_live_batch_size_change() {
    let collector = Collector::new();
    let acc = FastAccumulator::new(
        collector.clone(),
        AccumulatorConfig::new()
            .with_batch_size(100)
            .with_flush_interval(Duration::from_secs(60)),
    )
    .unwrap();

    for i in 0..3u32 {
        acc.put(i).await;
    }
    acc.set_batch_size(4);
    acc.put(3).await;
    acc.put(4).await;
    acc.close(true).await.unwrap();

    assert_eq!(collector.batches(), vec![vec![0, 1, 2, 3], vec![4]]);
}

#[test]
fn test_blocking_put_from_os_threads() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    let collector: Collector<Tagged> = Collector::new();
    let acc = {
        let _guard = rt.enter();
        FastAccumulator::new(
            collector.clone(),
            AccumulatorConfig::new()
                .with_batch_size(16)
                .with_flush_interval(Duration::from_secs(60)),
        )
        .unwrap()
    };

    let threads: Vec<_> = (0..4)
        .map(|p| {
            let acc = acc.clone();
            std::thread::spawn(move || {
                for seq in 0..250 {
                    acc.blocking_put((p, seq));
                }
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    rt.block_on(acc.close(true)).unwrap();
    assert_per_producer_order(&collector.items(), 4, 250);
}
