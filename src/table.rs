//! [`PageTable`]: the contiguous array of per-page metadata slots.
//!
//! Each slot is 32 bytes of off-heap memory at `base + idx * SLOT_SIZE`
//! (§3). `PageTable` never exposes a `&Slot`; instead every operation takes
//! a [`PageRef`] and reaches into the backing region through raw pointer
//! arithmetic plus atomics, the same way the teacher's `PageCache` reaches
//! into its `Box<[Slot]>` by index, except here the "array" lives off-heap
//! in a single allocation rather than as a `Vec` of Rust-owned `Slot`
//! structs.

use std::sync::atomic::{fence, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{EvictError, FaultError};
use crate::lock::{PageLock, Stamp};
use crate::memory::MemoryManager;
use crate::pageref::{PageRef, SLOT_SIZE, UNBOUND_PAGE_ID, UNBOUND_SWAPPER_ID};
use crate::swapper::{Swapper, SwapperSet};
use crate::tracing_hooks::{EvictionEvent, FaultEvent, TracingHooks};

const LOCK_OFFSET: usize = 0;
const ADDRESS_OFFSET: usize = 8;
const FILE_PAGE_ID_OFFSET: usize = 16;
const SWAPPER_ID_OFFSET: usize = 24;
const USAGE_COUNTER_OFFSET: usize = 28;

const MAX_USAGE_COUNT: u8 = 4;

/// An opportunity to begin an [`EvictionEvent`] for a `tryEvict` call that
/// actually finds a loaded slot to evict. Kept separate from
/// [`EvictionEvent`] itself so that `tryEvict`'s early-return paths (lock
/// contention, nothing loaded) never have to construct and immediately
/// discard one.
pub trait EvictionEventOpportunity {
    fn begin_eviction(&self) -> Box<dyn EvictionEvent>;
}

/// Every [`TracingHooks`] is itself a valid eviction opportunity, so
/// `NoopHooks`, `SpanHooks`, and `PrometheusHooks` can all be passed
/// directly to [`PageTable::try_evict`] without a separate adapter.
impl<T: TracingHooks + ?Sized> EvictionEventOpportunity for T {
    fn begin_eviction(&self) -> Box<dyn EvictionEvent> {
        TracingHooks::begin_eviction(self)
    }
}

/// A contiguous array of per-page metadata slots, addressable by
/// [`PageRef`].
///
/// Constructed once at startup (§3 Lifecycle) and lives for the lifetime of
/// the process. All field mutation that changes a slot's identity
/// (`filePageId`, `swapperId`) happens only through [`Self::fault`] and
/// [`Self::evict`], both of which require the caller to already hold the
/// slot's exclusive lock.
pub struct PageTable {
    base: *mut u8,
    page_count: usize,
    cache_page_size: usize,
    memory: Arc<dyn MemoryManager>,
    swappers: Arc<dyn SwapperSet>,
    victim_page_address: usize,
}

// SAFETY: `base` points at a region of plain atomics; every access goes
// through `AtomicU*`/`PageLock`, so concurrent access from multiple threads
// is the entire point of this type, not a hazard.
unsafe impl Send for PageTable {}
unsafe impl Sync for PageTable {}

impl PageTable {
    /// Allocates `page_count * 32` aligned bytes from `memory` and
    /// initializes every slot per §3's lifecycle: lock word held
    /// exclusively, zero address, `UNBOUND` file page id, swapper id 0,
    /// usage counter 0 — followed by a full fence so the constructor can
    /// hand out the table with visibility of that initial state to every
    /// thread that subsequently touches it.
    pub fn new(
        page_count: usize,
        cache_page_size: usize,
        memory: Arc<dyn MemoryManager>,
        swappers: Arc<dyn SwapperSet>,
        victim_page_address: usize,
    ) -> std::io::Result<Self> {
        assert!(page_count > 0, "page table must have at least one slot");
        let region = memory.allocate_aligned(page_count * SLOT_SIZE)?;
        let base = region.as_ptr();

        let table = PageTable {
            base,
            page_count,
            cache_page_size,
            memory,
            swappers,
            victim_page_address,
        };

        for idx in 0..page_count {
            // PageLock::new_exclusively_held's invariant (exclusive bit set,
            // sequence 0) is reproduced directly on the raw word, since
            // we're initializing into borrowed off-heap storage rather than
            // constructing an owned value.
            table.lock_word_atomic(idx).store(crate::lock::INITIAL_WORD, Ordering::Relaxed);
            table.address_atomic(idx).store(0, Ordering::Relaxed);
            table
                .file_page_id_atomic(idx)
                .store(UNBOUND_PAGE_ID, Ordering::Relaxed);
            table
                .swapper_id_atomic(idx)
                .store(UNBOUND_SWAPPER_ID, Ordering::Relaxed);
            table.usage_counter_atomic(idx).store(0, Ordering::Relaxed);
        }
        fence(Ordering::SeqCst);

        Ok(table)
    }

    pub fn page_count(&self) -> usize {
        self.page_count
    }

    pub fn cache_page_size(&self) -> usize {
        self.cache_page_size
    }

    pub fn victim_page_address(&self) -> usize {
        self.victim_page_address
    }

    /// All refs minted by this table, in slot order. Used by whatever
    /// builds the initial free-list: every slot starts exclusively locked
    /// (§3), so the free-list builder must call
    /// [`Self::unlock_exclusive`] on each one as it's threaded onto the
    /// free list.
    pub fn slot_refs(&self) -> impl Iterator<Item = PageRef> + '_ {
        (0..self.page_count).map(move |idx| self.deref(idx))
    }

    // ---- index <-> ref translation (§3) ----

    #[inline]
    pub fn deref(&self, id: usize) -> PageRef {
        debug_assert!(id < self.page_count, "slot index out of range");
        PageRef(self.base as usize + id * SLOT_SIZE)
    }

    #[inline]
    pub fn to_id(&self, reference: PageRef) -> usize {
        reference.index_from_base(self.base as usize)
    }

    // ---- raw slot field access ----

    #[inline]
    fn slot_ptr(&self, idx: usize) -> *mut u8 {
        unsafe { self.base.add(idx * SLOT_SIZE) }
    }

    #[inline]
    fn lock(&self, idx: usize) -> &PageLock {
        unsafe { &*(self.slot_ptr(idx).add(LOCK_OFFSET) as *const PageLock) }
    }

    #[inline]
    fn lock_word_atomic(&self, idx: usize) -> &AtomicU64 {
        unsafe { &*(self.slot_ptr(idx).add(LOCK_OFFSET) as *const AtomicU64) }
    }

    #[inline]
    fn address_atomic(&self, idx: usize) -> &AtomicU64 {
        unsafe { &*(self.slot_ptr(idx).add(ADDRESS_OFFSET) as *const AtomicU64) }
    }

    #[inline]
    fn file_page_id_atomic(&self, idx: usize) -> &AtomicU64 {
        unsafe { &*(self.slot_ptr(idx).add(FILE_PAGE_ID_OFFSET) as *const AtomicU64) }
    }

    #[inline]
    fn swapper_id_atomic(&self, idx: usize) -> &AtomicU32 {
        unsafe { &*(self.slot_ptr(idx).add(SWAPPER_ID_OFFSET) as *const AtomicU32) }
    }

    #[inline]
    fn usage_counter_atomic(&self, idx: usize) -> &AtomicU8 {
        unsafe { &*(self.slot_ptr(idx).add(USAGE_COUNTER_OFFSET) as *const AtomicU8) }
    }

    // ---- field accessors (§4.2) ----

    pub fn get_address(&self, reference: PageRef) -> usize {
        self.address_atomic(self.to_id(reference)).load(Ordering::Acquire) as usize
    }

    pub fn get_file_page_id(&self, reference: PageRef) -> u64 {
        self.file_page_id_atomic(self.to_id(reference)).load(Ordering::Acquire)
    }

    pub fn get_swapper_id(&self, reference: PageRef) -> u32 {
        self.swapper_id_atomic(self.to_id(reference)).load(Ordering::Acquire)
    }

    pub fn get_usage_counter(&self, reference: PageRef) -> u8 {
        self.usage_counter_atomic(self.to_id(reference)).load(Ordering::Relaxed)
    }

    pub fn set_usage_counter(&self, reference: PageRef, value: u8) {
        self.usage_counter_atomic(self.to_id(reference)).store(value, Ordering::Relaxed);
    }

    pub fn is_loaded(&self, reference: PageRef) -> bool {
        self.get_file_page_id(reference) != UNBOUND_PAGE_ID
    }

    pub fn is_bound_to(&self, reference: PageRef, swapper_id: u32, file_page_id: u64) -> bool {
        self.get_swapper_id(reference) == swapper_id && self.get_file_page_id(reference) == file_page_id
    }

    /// Idempotent. Allocates `cache_page_size` aligned bytes from the
    /// memory manager and stores the address, if one isn't already stored.
    /// Caller must hold exclusive.
    pub fn init_buffer(&self, reference: PageRef) -> std::io::Result<()> {
        let idx = self.to_id(reference);
        debug_assert!(self.lock(idx).is_exclusively_locked(), "init_buffer requires exclusive");
        if self.address_atomic(idx).load(Ordering::Relaxed) != 0 {
            return Ok(());
        }
        let addr = self.memory.allocate_aligned(self.cache_page_size)?;
        self.address_atomic(idx).store(addr.as_ptr() as u64, Ordering::Release);
        Ok(())
    }

    /// If the counter is below 4, increments it. The read-compute-write is
    /// deliberately not atomic: lost updates are acceptable, per §4.2.
    pub fn increment_usage(&self, reference: PageRef) {
        let counter = self.usage_counter_atomic(self.to_id(reference));
        let current = counter.load(Ordering::Relaxed);
        if current < MAX_USAGE_COUNT {
            counter.store(current + 1, Ordering::Relaxed);
        }
    }

    /// Symmetric with [`Self::increment_usage`]. Returns true iff the value
    /// seen or written is 0.
    pub fn decrement_usage(&self, reference: PageRef) -> bool {
        let counter = self.usage_counter_atomic(self.to_id(reference));
        let current = counter.load(Ordering::Relaxed);
        if current == 0 {
            return true;
        }
        let next = current - 1;
        counter.store(next, Ordering::Relaxed);
        next == 0
    }

    // ---- lock forwarding (§4.1) ----

    pub fn try_optimistic_read_lock(&self, reference: PageRef) -> Stamp {
        self.lock(self.to_id(reference)).try_optimistic_read_lock()
    }

    pub fn validate_read_lock(&self, reference: PageRef, stamp: Stamp) -> bool {
        self.lock(self.to_id(reference)).validate_read_lock(stamp)
    }

    pub fn is_modified(&self, reference: PageRef) -> bool {
        self.lock(self.to_id(reference)).is_modified()
    }

    pub fn is_exclusively_locked(&self, reference: PageRef) -> bool {
        self.lock(self.to_id(reference)).is_exclusively_locked()
    }

    pub fn try_write_lock(&self, reference: PageRef) -> bool {
        self.lock(self.to_id(reference)).try_write_lock()
    }

    pub fn unlock_write(&self, reference: PageRef) {
        self.lock(self.to_id(reference)).unlock_write()
    }

    pub fn unlock_write_and_try_take_flush_lock(&self, reference: PageRef) -> Stamp {
        self.lock(self.to_id(reference)).unlock_write_and_try_take_flush_lock()
    }

    pub fn try_exclusive_lock(&self, reference: PageRef) -> bool {
        self.lock(self.to_id(reference)).try_exclusive_lock()
    }

    pub fn unlock_exclusive(&self, reference: PageRef) -> Stamp {
        self.lock(self.to_id(reference)).unlock_exclusive()
    }

    pub fn unlock_exclusive_and_take_write_lock(&self, reference: PageRef) {
        self.lock(self.to_id(reference)).unlock_exclusive_and_take_write_lock()
    }

    pub fn try_flush_lock(&self, reference: PageRef) -> Stamp {
        self.lock(self.to_id(reference)).try_flush_lock()
    }

    pub fn unlock_flush(&self, reference: PageRef, stamp: Stamp, success: bool) {
        self.lock(self.to_id(reference)).unlock_flush(stamp, success)
    }

    pub fn explicitly_mark_unmodified_under_exclusive_lock(&self, reference: PageRef) {
        self.lock(self.to_id(reference)).explicitly_mark_unmodified_under_exclusive_lock()
    }

    // ---- fault / evict (§4.2) ----

    /// Binds an unbound, exclusively-locked slot to file data.
    ///
    /// Order is load-bearing (§4.2, §5): `filePageId` is written before the
    /// read, `swapperId` after, with a release store on each so the
    /// transition from loaded-but-unbound to bound is visible to any reader
    /// that subsequently validates a lock stamp taken after this call.
    #[tracing::instrument(level = "debug", skip(self, swapper, event), fields(cache_page_id = tracing::field::Empty))]
    pub fn fault(
        &self,
        reference: PageRef,
        swapper: &dyn Swapper,
        swapper_id: u32,
        file_page_id: u64,
        event: &mut dyn FaultEvent,
    ) -> Result<(), FaultError> {
        let idx = self.to_id(reference);
        tracing::Span::current().record("cache_page_id", idx);

        let current_swapper_id = self.get_swapper_id(reference);
        let current_file_page_id = self.get_file_page_id(reference);
        if file_page_id == UNBOUND_PAGE_ID
            || current_swapper_id != UNBOUND_SWAPPER_ID
            || current_file_page_id != UNBOUND_PAGE_ID
        {
            let error = FaultError::IllegalFaultState {
                reference,
                requested_swapper_id: swapper_id,
                requested_file_page_id: file_page_id,
                current_swapper_id,
                current_file_page_id,
            };
            tracing::error!(error = %error, "page fault preconditions violated");
            return Err(error);
        }
        debug_assert!(self.lock(idx).is_exclusively_locked(), "fault requires exclusive");

        // Step 1: loaded, not yet bound.
        self.file_page_id_atomic(idx).store(file_page_id, Ordering::Release);

        let addr = self.get_address(reference);
        let addr = std::ptr::NonNull::new(addr as *mut u8)
            .expect("init_buffer must be called before fault");

        // Step 2: the only blocking call in this module.
        let bytes_read = swapper
            .read(file_page_id, addr, self.cache_page_size)
            .map_err(|source| {
                let error = FaultError::Io { reference, source };
                tracing::error!(error = %error, file_page_id, "page fault read failed");
                error
            })?;

        // Step 3.
        event.set_cache_page_id(idx);
        event.add_bytes_read(bytes_read as u64);

        // Step 4: now bound.
        self.swapper_id_atomic(idx).store(swapper_id, Ordering::Release);

        Ok(())
    }

    /// Attempts to acquire exclusive and evict a loaded slot.
    ///
    /// Returns `false` without beginning any event if the exclusive lock
    /// can't be acquired or the slot isn't loaded. On success, the caller
    /// retains exclusive ownership of the now-unbound slot (§4.2 design
    /// note) — `evict` never releases it on the success path.
    pub fn try_evict(&self, reference: PageRef, opportunity: &dyn EvictionEventOpportunity) -> bool {
        if !self.try_exclusive_lock(reference) {
            return false;
        }
        if !self.is_loaded(reference) {
            self.unlock_exclusive(reference);
            return false;
        }

        let mut event = opportunity.begin_eviction();
        match self.evict(reference, event.as_mut()) {
            Ok(()) => true,
            Err(_) => false,
        }
    }

    /// Flushes if modified, notifies the swapper, and clears the binding.
    /// Does not release the exclusive lock on success; does release it
    /// before returning an I/O error (§4.2).
    #[tracing::instrument(level = "debug", skip(self, event))]
    pub fn evict(&self, reference: PageRef, event: &mut dyn EvictionEvent) -> Result<(), EvictError> {
        let idx = self.to_id(reference);
        debug_assert!(self.lock(idx).is_exclusively_locked(), "evict requires exclusive");

        let file_page_id = self.get_file_page_id(reference);
        let swapper_id = self.get_swapper_id(reference);
        event.set_file_page_id(file_page_id);
        event.set_cache_page_id(idx);

        if swapper_id != UNBOUND_SWAPPER_ID {
            let swapper = self
                .swappers
                .get_allocation(swapper_id)
                .expect("evict observed a bound swapper id with no matching SwapperSet entry");
            event.set_swapper(swapper_id);

            if self.lock(idx).is_modified() {
                let mut flush_event = event.begin_flush(file_page_id, reference, swapper_id);
                let addr = std::ptr::NonNull::new(self.get_address(reference) as *mut u8)
                    .expect("a bound slot must have an allocated buffer");

                match swapper.write(file_page_id, addr) {
                    Ok(bytes_written) => {
                        self.lock(idx).explicitly_mark_unmodified_under_exclusive_lock();
                        flush_event.add_bytes_written(bytes_written as u64);
                        flush_event.add_pages_flushed(1);
                        flush_event.done(None);
                    }
                    Err(source) => {
                        flush_event.done(Some(&source));
                        event.threw_exception(&source);
                        tracing::error!(error = %source, file_page_id, "flush-on-evict failed");
                        self.unlock_exclusive(reference);
                        return Err(EvictError::Io { reference, source });
                    }
                }
            }

            swapper.evicted(file_page_id);
        }

        self.file_page_id_atomic(idx).store(UNBOUND_PAGE_ID, Ordering::Release);
        self.swapper_id_atomic(idx).store(UNBOUND_SWAPPER_ID, Ordering::Release);

        Ok(())
    }
}
