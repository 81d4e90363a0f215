//! The [`TracingHooks`] external collaborator (§4.5) and its concrete
//! implementations.
//!
//! The abstract event types are intentionally small dyn traits: callers in
//! `table.rs` only ever hold one event object at a time and discard it by
//! calling `done`/letting it drop, mirroring the "scoped, auto-closed"
//! wording of the spec. Every method has been given a default no-op body so
//! a hooks implementation can override only the events it cares about.

use std::error::Error as StdError;

use crate::pageref::PageRef;

/// Per-fault telemetry.
pub trait FaultEvent: Send {
    fn add_bytes_read(&mut self, _n: u64) {}
    fn set_cache_page_id(&mut self, _id: usize) {}
}

/// Per-flush telemetry, begun from within an [`EvictionEvent`].
pub trait FlushEvent: Send {
    fn add_bytes_written(&mut self, _n: u64) {}
    fn add_pages_flushed(&mut self, _n: u64) {}
    /// Closes the event. `error`, if present, marks it failed.
    fn done(self: Box<Self>, _error: Option<&(dyn StdError + 'static)>) {}
}

/// Per-eviction-attempt telemetry.
pub trait EvictionEvent: Send {
    fn set_file_page_id(&mut self, _id: u64) {}
    fn set_cache_page_id(&mut self, _id: usize) {}
    fn set_swapper(&mut self, _swapper_id: u32) {}
    fn threw_exception(&mut self, _error: &(dyn StdError + 'static)) {}
    fn begin_flush(&mut self, _file_page_id: u64, _cache_page_ref: PageRef, _swapper_id: u32) -> Box<dyn FlushEvent> {
        Box::new(NoopFlushEvent)
    }
}

/// Event sinks for page-fault, flush, and eviction telemetry.
///
/// All methods are no-op safe: an implementation may freely drop events it
/// isn't interested in, per §4.5.
pub trait TracingHooks: Send + Sync {
    fn begin_fault(&self, _cache_page_id: usize) -> Box<dyn FaultEvent> {
        Box::new(NoopFaultEvent)
    }
    fn begin_eviction(&self) -> Box<dyn EvictionEvent> {
        Box::new(NoopEvictionEvent)
    }
}

pub struct NoopFaultEvent;
impl FaultEvent for NoopFaultEvent {}

pub struct NoopFlushEvent;
impl FlushEvent for NoopFlushEvent {}

pub struct NoopEvictionEvent;
impl EvictionEvent for NoopEvictionEvent {}

/// The default [`TracingHooks`]: every event is dropped on the floor.
#[derive(Default, Clone, Copy)]
pub struct NoopHooks;
impl TracingHooks for NoopHooks {}

/// A [`TracingHooks`] backed by `tracing` spans and structured fields, for
/// development and debugging. Each event opens a `debug`-level span on
/// construction and emits its recorded fields as a single event when closed.
#[derive(Default, Clone, Copy)]
pub struct SpanHooks;

impl TracingHooks for SpanHooks {
    fn begin_fault(&self, cache_page_id: usize) -> Box<dyn FaultEvent> {
        Box::new(SpanFaultEvent {
            span: tracing::debug_span!("page_fault", cache_page_id, bytes_read = tracing::field::Empty),
            bytes_read: 0,
        })
    }

    fn begin_eviction(&self) -> Box<dyn EvictionEvent> {
        Box::new(SpanEvictionEvent {
            span: tracing::debug_span!(
                "page_eviction",
                file_page_id = tracing::field::Empty,
                cache_page_id = tracing::field::Empty,
                swapper_id = tracing::field::Empty,
            ),
        })
    }
}

struct SpanFaultEvent {
    span: tracing::Span,
    bytes_read: u64,
}

impl FaultEvent for SpanFaultEvent {
    fn add_bytes_read(&mut self, n: u64) {
        self.bytes_read += n;
        self.span.record("bytes_read", self.bytes_read);
    }

    fn set_cache_page_id(&mut self, id: usize) {
        self.span.record("cache_page_id", id);
    }
}

struct SpanEvictionEvent {
    span: tracing::Span,
}

impl EvictionEvent for SpanEvictionEvent {
    fn set_file_page_id(&mut self, id: u64) {
        self.span.record("file_page_id", id);
    }

    fn set_cache_page_id(&mut self, id: usize) {
        self.span.record("cache_page_id", id);
    }

    fn set_swapper(&mut self, swapper_id: u32) {
        self.span.record("swapper_id", swapper_id);
    }

    fn threw_exception(&mut self, error: &(dyn StdError + 'static)) {
        let _entered = self.span.enter();
        tracing::warn!(error = %error, "eviction failed");
    }

    fn begin_flush(&mut self, file_page_id: u64, cache_page_ref: PageRef, swapper_id: u32) -> Box<dyn FlushEvent> {
        let _entered = self.span.enter();
        Box::new(SpanFlushEvent {
            span: tracing::debug_span!(
                "page_flush",
                file_page_id,
                cache_page_ref = ?cache_page_ref,
                swapper_id,
                bytes_written = tracing::field::Empty,
                pages_flushed = tracing::field::Empty,
            ),
            bytes_written: 0,
            pages_flushed: 0,
        })
    }
}

struct SpanFlushEvent {
    span: tracing::Span,
    bytes_written: u64,
    pages_flushed: u64,
}

impl FlushEvent for SpanFlushEvent {
    fn add_bytes_written(&mut self, n: u64) {
        self.bytes_written += n;
        self.span.record("bytes_written", self.bytes_written);
    }

    fn add_pages_flushed(&mut self, n: u64) {
        self.pages_flushed += n;
        self.span.record("pages_flushed", self.pages_flushed);
    }

    fn done(self: Box<Self>, error: Option<&(dyn StdError + 'static)>) {
        let _entered = self.span.enter();
        match error {
            Some(e) => tracing::warn!(error = %e, "flush failed"),
            None => tracing::debug!("flush complete"),
        }
    }
}
