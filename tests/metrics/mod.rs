//! Metrics emitted by the sequencer, captured with a local recorder.

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString,
    Unit,
};
use sequencer_rs::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Recorder
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Cell(AtomicU64);

impl CounterFn for Cell {
    fn increment(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    fn absolute(&self, value: u64) {
        self.0.fetch_max(value, Ordering::Relaxed);
    }
}

impl GaugeFn for Cell {
    fn increment(&self, value: f64) {
        self.set(self.value() + value);
    }

    fn decrement(&self, value: f64) {
        self.set(self.value() - value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

impl Cell {
    fn value(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
struct TestRecorder {
    counters: Mutex<HashMap<String, Arc<Cell>>>,
    gauges: Mutex<HashMap<String, Arc<Cell>>>,
}

impl TestRecorder {
    fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map_or(0, |c| c.0.load(Ordering::Relaxed))
    }

    fn gauge(&self, name: &str) -> Option<f64> {
        self.gauges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .map(|g| g.value())
    }
}

impl Recorder for TestRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}
    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, key: &Key, _: &Metadata<'_>) -> Counter {
        let cell = Arc::clone(
            self.counters
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.name().to_string())
                .or_default(),
        );
        Counter::from_arc(cell)
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        let cell = Arc::clone(
            self.gauges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(key.name().to_string())
                .or_default(),
        );
        Gauge::from_arc(cell)
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap_or_else(|e| panic!("failed to build runtime: {e}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn transactions_record_issue_flush_and_actualization_metrics() {
    let recorder = TestRecorder::default();

    metrics::with_local_recorder(&recorder, || {
        runtime().block_on(async {
            let storage = Arc::new(MemStorage::new());
            storage.append_plog(1, vec![SeqValue::new(1, 1, 10)]);

            let params = Params::new()
                .with_seq_type(1, 1, 0)
                .with_flush_interval_ms(100);
            let mut sequencer = Sequencer::new(params, Arc::clone(&storage))
                .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
            assert!(sequencer.wait_ready().await.is_ok());

            assert!(sequencer.start(1, 1).await.is_some());
            assert!(sequencer.next(1).await.is_ok());
            assert!(sequencer.next(1).await.is_ok());
            sequencer.flush();
            tokio::time::sleep(Duration::from_millis(150)).await;

            sequencer.shutdown().await;
        });
    });

    assert_eq!(recorder.counter("sequencer_numbers_issued_total"), 2);
    assert_eq!(recorder.counter("sequencer_actualizations_total"), 1);
    assert_eq!(recorder.counter("sequencer_replayed_entries_total"), 1);
    assert_eq!(recorder.counter("sequencer_flushes_total"), 1);
    assert_eq!(recorder.counter("sequencer_flushed_values_total"), 1);
    assert_eq!(recorder.gauge("sequencer_unflushed_values"), Some(0.0));
}

#[test]
fn retries_and_backpressure_are_counted() {
    let recorder = TestRecorder::default();

    metrics::with_local_recorder(&recorder, || {
        runtime().block_on(async {
            let storage = Arc::new(MemStorage::new());
            let params = Params::new()
                .with_seq_type(1, 1, 0)
                .with_max_num_unflushed_values(1)
                .with_flush_interval_ms(60_000)
                .with_retry_policy(RetryPolicy::new(3, 10));
            let mut sequencer = Sequencer::new(params, Arc::clone(&storage))
                .unwrap_or_else(|e| panic!("failed to create sequencer: {e}"));
            assert!(sequencer.wait_ready().await.is_ok());

            storage.fail_next(StorageOp::ReadNumbers, 2);
            assert!(sequencer.start(1, 1).await.is_some());
            assert!(sequencer.next(1).await.is_ok());
            sequencer.flush();

            assert_eq!(sequencer.start(1, 1).await, None);

            sequencer.shutdown().await;
        });
    });

    assert_eq!(recorder.counter("sequencer_storage_retries_total"), 2);
    assert_eq!(recorder.counter("sequencer_backpressure_rejections_total"), 1);
}
