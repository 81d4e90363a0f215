//! Prometheus metrics for the page table, and the [`PrometheusHooks`]
//! implementation of [`crate::tracing_hooks::TracingHooks`] built on them.
//!
//! Mirrors the shape of the teacher's own `pageserver::metrics` module:
//! `once_cell::sync::Lazy` statics registered once via `prometheus`'s
//! `register_*!` macros, an `Outcome`-style enum for eviction bookkeeping,
//! and a handful of plain counters for bytes moved.

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

use crate::tracing_hooks::{EvictionEvent, FaultEvent, FlushEvent, TracingHooks};
use crate::pageref::PageRef;

static FAULT_BYTES_READ: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "page_table_fault_bytes_read_total",
        "Total bytes read from swappers while servicing page faults"
    )
    .expect("failed to register page_table_fault_bytes_read_total")
});

static FAULT_COUNT: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "page_table_faults_total",
        "Total number of page faults serviced"
    )
    .expect("failed to register page_table_faults_total")
});

static EVICTION_OUTCOMES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "page_table_eviction_outcomes_total",
        "Outcomes of tryEvict attempts, by outcome",
        &["outcome"]
    )
    .expect("failed to register page_table_eviction_outcomes_total")
});

static FLUSH_BYTES_WRITTEN: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "page_table_flush_bytes_written_total",
        "Total bytes written back to swappers while evicting modified pages"
    )
    .expect("failed to register page_table_flush_bytes_written_total")
});

static FLUSH_PAGES_FLUSHED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "page_table_flushes_total",
        "Total number of pages flushed on eviction"
    )
    .expect("failed to register page_table_flushes_total")
});

static FLUSH_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "page_table_flush_errors_total",
        "Total number of failed flush-on-evict attempts"
    )
    .expect("failed to register page_table_flush_errors_total")
});

/// A [`TracingHooks`] implementation that reports into the process-global
/// Prometheus registry. Intended as the production telemetry backend; use
/// [`crate::tracing_hooks::NoopHooks`] in tests that don't want to pollute
/// the default registry.
#[derive(Default, Clone, Copy)]
pub struct PrometheusHooks;

impl TracingHooks for PrometheusHooks {
    fn begin_fault(&self, _cache_page_id: usize) -> Box<dyn FaultEvent> {
        FAULT_COUNT.inc();
        Box::new(PromFaultEvent)
    }

    fn begin_eviction(&self) -> Box<dyn EvictionEvent> {
        Box::new(PromEvictionEvent { flushed: false })
    }
}

struct PromFaultEvent;

impl FaultEvent for PromFaultEvent {
    fn add_bytes_read(&mut self, n: u64) {
        FAULT_BYTES_READ.inc_by(n);
    }
}

struct PromEvictionEvent {
    flushed: bool,
}

impl EvictionEvent for PromEvictionEvent {
    fn begin_flush(&mut self, _file_page_id: u64, _cache_page_ref: PageRef, _swapper_id: u32) -> Box<dyn FlushEvent> {
        self.flushed = true;
        Box::new(PromFlushEvent)
    }
}

impl Drop for PromEvictionEvent {
    fn drop(&mut self) {
        let outcome = if self.flushed { "evicted_dirty" } else { "evicted_clean" };
        EVICTION_OUTCOMES.with_label_values(&[outcome]).inc();
    }
}

struct PromFlushEvent;

impl FlushEvent for PromFlushEvent {
    fn add_bytes_written(&mut self, n: u64) {
        FLUSH_BYTES_WRITTEN.inc_by(n);
    }

    fn add_pages_flushed(&mut self, n: u64) {
        FLUSH_PAGES_FLUSHED.inc_by(n);
    }

    fn done(self: Box<Self>, error: Option<&(dyn std::error::Error + 'static)>) {
        if error.is_some() {
            FLUSH_ERRORS.inc();
        }
    }
}
