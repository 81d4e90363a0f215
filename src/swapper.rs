//! The [`Swapper`] / [`SwapperSet`] external collaborators (§4.3).
//!
//! A swapper is the per-file I/O object that knows how to read and write
//! the pages of one backing file. The table never allocates swapper ids —
//! it only stores whichever small non-zero integer the caller of `fault`
//! hands it, and looks it up again through a `SwapperSet` at eviction time.

use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

/// Reads and writes the pages of a single backing file.
pub trait Swapper: Send + Sync {
    /// Reads `len` bytes of `file_page_id` into the buffer at `addr`.
    /// Returns the number of bytes actually read.
    fn read(&self, file_page_id: u64, addr: NonNull<u8>, len: usize) -> io::Result<usize>;

    /// Writes the buffer at `addr` (one cache page's worth of bytes) back
    /// to `file_page_id`. Returns the number of bytes written.
    fn write(&self, file_page_id: u64, addr: NonNull<u8>) -> io::Result<usize>;

    /// Called after a page has been evicted, so the swapper can drop any
    /// of its own caches keyed by `file_page_id`.
    fn evicted(&self, file_page_id: u64);
}

/// Maps a small integer swapper id to the `Swapper` that owns it.
pub trait SwapperSet: Send + Sync {
    /// Returns the swapper registered under `swapper_id`, if any.
    fn get_allocation(&self, swapper_id: u32) -> Option<Arc<dyn Swapper>>;
}
