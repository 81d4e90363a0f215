//!
//! Page metadata table
//!
//! This crate owns the hardest concurrency problem in a database page
//! cache: the per-page metadata slots and the lock guarding each of them.
//! It does not itself do file I/O, choose a victim to evict, or decide
//! what `(file, filePageId)` maps to which slot — those are the jobs of a
//! `Swapper`, an eviction thread, and a translation table respectively,
//! all external to this crate. What lives here is the table those
//! collaborators share: a flat off-heap array of 32-byte slots, each
//! guarded by a custom sequence lock packed into one 64-bit word.
//!
//! # Off-heap layout
//!
//! [`PageTable`] allocates one contiguous, page-aligned region and
//! addresses every slot by raw pointer arithmetic rather than as a
//! `Vec`/`Box<[_]>` of Rust-owned structs. A slot is never "owned" in the
//! Rust sense — there's no `&mut Slot` anywhere in this crate — because
//! slots are shared, concurrently-mutated state by construction. See
//! [`table`] for the exact byte layout.
//!
//! # Locking
//!
//! Every slot's first 8 bytes are a [`lock::PageLock`]: a sequence lock
//! that packs a monotonic sequence counter together with a writer bit, an
//! exclusive bit, a flush bit, and a modified bit. Readers are always
//! wait-free via `try_optimistic_read_lock`/`validate_read_lock`. Identity
//! transitions (binding a slot to a file page on fault, clearing that
//! binding on evict) require the caller to hold the slot's exclusive lock,
//! which forbids every other kind of access. A flush can run concurrently
//! with further writes to the same page; the flush and writer bits share
//! the lock word but not the writer's exclusion. See [`lock`] for the full
//! operation set and the reasoning behind each one.
//!
//! # Filling and draining the cache
//!
//! [`PageTable::fault`] binds an unbound, exclusively-locked slot to a
//! `(swapperId, filePageId)` pair by reading through a [`swapper::Swapper`].
//! [`PageTable::try_evict`] is the other direction: it acquires exclusive,
//! flushes the page if it's been modified since the last flush, notifies
//! the swapper, and clears the binding — handing the caller back a reclaimed
//! slot still under exclusive lock, ready to be threaded onto a free list.
//!
//! # Telemetry
//!
//! [`tracing_hooks::TracingHooks`] and its event types are the abstract
//! sink for fault/flush/eviction telemetry; [`tracing_hooks::NoopHooks`]
//! and [`tracing_hooks::SpanHooks`] are included for convenience, and
//! [`metrics::PrometheusHooks`] is the Prometheus-backed production
//! implementation.

pub mod error;
pub mod lock;
pub mod memory;
pub mod metrics;
pub mod pageref;
pub mod swapper;
pub mod table;
pub mod tracing_hooks;

pub use error::{EvictError, FaultError};
pub use lock::{PageLock, Stamp};
pub use memory::{MemoryManager, SystemMemoryManager};
pub use metrics::PrometheusHooks;
pub use pageref::{PageRef, UNBOUND_PAGE_ID, UNBOUND_SWAPPER_ID};
pub use swapper::{Swapper, SwapperSet};
pub use table::{EvictionEventOpportunity, PageTable};
pub use tracing_hooks::{EvictionEvent, FaultEvent, FlushEvent, NoopHooks, SpanHooks, TracingHooks};
