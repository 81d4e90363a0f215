//! Shared test doubles for the page table's external collaborators.

use std::collections::HashMap;
use std::io;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use page_table::pageref::PageRef;
use page_table::swapper::{Swapper, SwapperSet};
use page_table::tracing_hooks::{EvictionEvent, FaultEvent, FlushEvent};
use page_table::{EvictionEventOpportunity, MemoryManager, SystemMemoryManager};

/// A `Swapper` over an in-memory buffer, for exercising fault/evict without
/// touching a real file.
pub struct StubSwapper {
    pub page_contents: Mutex<HashMap<u64, Vec<u8>>>,
    pub fail_reads: AtomicBool,
    pub fail_writes: AtomicBool,
    pub writes: Mutex<Vec<(u64, Vec<u8>)>>,
    pub evicted_calls: Mutex<Vec<u64>>,
}

impl StubSwapper {
    pub fn new() -> Self {
        StubSwapper {
            page_contents: Mutex::new(HashMap::new()),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            evicted_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn seed_page(&self, file_page_id: u64, pattern_byte: u8, len: usize) {
        self.page_contents
            .lock()
            .unwrap()
            .insert(file_page_id, vec![pattern_byte; len]);
    }
}

impl Swapper for StubSwapper {
    fn read(&self, file_page_id: u64, addr: NonNull<u8>, len: usize) -> io::Result<usize> {
        if self.fail_reads.load(Ordering::Relaxed) {
            return Err(io::Error::other("stub swapper: simulated read failure"));
        }
        let contents = self.page_contents.lock().unwrap();
        let page = contents
            .get(&file_page_id)
            .cloned()
            .unwrap_or_else(|| vec![0u8; len]);
        let n = page.len().min(len);
        unsafe {
            std::ptr::copy_nonoverlapping(page.as_ptr(), addr.as_ptr(), n);
        }
        Ok(n)
    }

    fn write(&self, file_page_id: u64, addr: NonNull<u8>) -> io::Result<usize> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(io::Error::other("stub swapper: simulated write failure"));
        }
        let len = self
            .page_contents
            .lock()
            .unwrap()
            .get(&file_page_id)
            .map(|p| p.len())
            .unwrap_or(4096);
        let bytes = unsafe { std::slice::from_raw_parts(addr.as_ptr(), len) }.to_vec();
        self.writes.lock().unwrap().push((file_page_id, bytes));
        Ok(len)
    }

    fn evicted(&self, file_page_id: u64) {
        self.evicted_calls.lock().unwrap().push(file_page_id);
    }
}

/// A `SwapperSet` with a single registered swapper under a fixed id.
pub struct SingleSwapperSet {
    pub swapper_id: u32,
    pub swapper: Arc<dyn Swapper>,
}

impl SwapperSet for SingleSwapperSet {
    fn get_allocation(&self, swapper_id: u32) -> Option<Arc<dyn Swapper>> {
        if swapper_id == self.swapper_id {
            Some(self.swapper.clone())
        } else {
            None
        }
    }
}

/// Test hooks that record whether a flush event was begun and whether an
/// exception was reported, without involving `tracing` or `prometheus`.
///
/// Used behind an `Arc` so its event objects can own a clone of the handle
/// rather than borrow it, since event trait objects are required to be
/// `'static`.
#[derive(Default)]
pub struct RecordingHooks {
    pub flush_began: AtomicBool,
    pub exception_reported: AtomicBool,
    pub bytes_read: AtomicU64,
}

pub struct RecordingFaultEvent {
    hooks: Arc<RecordingHooks>,
}

impl FaultEvent for RecordingFaultEvent {
    fn add_bytes_read(&mut self, n: u64) {
        self.hooks.bytes_read.fetch_add(n, Ordering::Relaxed);
    }
}

impl RecordingHooks {
    pub fn begin_fault(self: &Arc<Self>) -> RecordingFaultEvent {
        RecordingFaultEvent { hooks: self.clone() }
    }
}

impl EvictionEventOpportunity for Arc<RecordingHooks> {
    fn begin_eviction(&self) -> Box<dyn EvictionEvent> {
        Box::new(RecordingEvictionEvent { hooks: self.clone() })
    }
}

struct RecordingEvictionEvent {
    hooks: Arc<RecordingHooks>,
}

impl EvictionEvent for RecordingEvictionEvent {
    fn threw_exception(&mut self, _error: &(dyn std::error::Error + 'static)) {
        self.hooks.exception_reported.store(true, Ordering::Relaxed);
    }

    fn begin_flush(&mut self, _file_page_id: u64, _cache_page_ref: PageRef, _swapper_id: u32) -> Box<dyn FlushEvent> {
        self.hooks.flush_began.store(true, Ordering::Relaxed);
        Box::new(RecordingFlushEvent)
    }
}

struct RecordingFlushEvent;
impl FlushEvent for RecordingFlushEvent {}

pub fn system_memory_manager() -> Arc<dyn MemoryManager> {
    Arc::new(SystemMemoryManager::new())
}
