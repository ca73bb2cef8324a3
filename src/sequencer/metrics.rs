//! Counters and gauges published through the `metrics` facade.
//!
//! Every function is a no-op unless the crate is built with the `metrics`
//! feature, so call sites stay unconditional.

#[cfg(feature = "metrics")]
use metrics::{counter, gauge};

/// A number was handed out by `next`.
#[inline]
pub(crate) fn number_issued() {
    #[cfg(feature = "metrics")]
    counter!("sequencer_numbers_issued_total").increment(1);
}

/// `start` refused a transaction because too many values are unflushed.
#[inline]
pub(crate) fn backpressure_rejection() {
    #[cfg(feature = "metrics")]
    counter!("sequencer_backpressure_rejections_total").increment(1);
}

/// The flusher persisted a batch.
#[inline]
pub(crate) fn flush_completed(values: usize) {
    #[cfg(feature = "metrics")]
    {
        counter!("sequencer_flushes_total").increment(1);
        counter!("sequencer_flushed_values_total").increment(values as u64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = values;
}

/// An actualization run finished successfully.
#[inline]
pub(crate) fn actualization_completed(replayed_entries: u64) {
    #[cfg(feature = "metrics")]
    {
        counter!("sequencer_actualizations_total").increment(1);
        counter!("sequencer_replayed_entries_total").increment(replayed_entries);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = replayed_entries;
}

/// A storage call is about to be retried.
#[inline]
pub(crate) fn storage_retry(operation: &'static str) {
    #[cfg(feature = "metrics")]
    counter!("sequencer_storage_retries_total", "operation" => operation).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = operation;
}

/// Current size of the pending-flush table.
#[inline]
pub(crate) fn unflushed_values(len: usize) {
    #[cfg(feature = "metrics")]
    gauge!("sequencer_unflushed_values").set(len as f64);
    #[cfg(not(feature = "metrics"))]
    let _ = len;
}
