//! Error kinds raised by [`crate::table::PageTable`].
//!
//! Lock acquisition failure is never an error: every `try_*_lock` returns a
//! `bool` or a `0` stamp, and callers decide whether to retry. These enums
//! only cover the two genuinely fallible, non-lock operations: `fault` and
//! `evict`.

use crate::pageref::PageRef;

/// Raised by [`crate::table::PageTable::fault`].
#[derive(Debug, thiserror::Error)]
pub enum FaultError {
    /// The fault preconditions (§4.2) were violated. This is a programming
    /// bug in the caller, not a recoverable condition — the full slot state
    /// is carried for diagnostics.
    #[error(
        "illegal fault state on {reference:?}: requested swapper_id={requested_swapper_id} \
         file_page_id={requested_file_page_id}, but slot currently has \
         swapper_id={current_swapper_id} file_page_id={current_file_page_id}"
    )]
    IllegalFaultState {
        reference: PageRef,
        requested_swapper_id: u32,
        requested_file_page_id: u64,
        current_swapper_id: u32,
        current_file_page_id: u64,
    },

    /// The swapper read failed. The slot is left loaded-but-unbound (§4.2);
    /// the caller retains the exclusive lock.
    #[error("I/O failure while faulting {reference:?}: {source}")]
    Io {
        reference: PageRef,
        #[source]
        source: std::io::Error,
    },
}

/// Raised by [`crate::table::PageTable::evict`] and
/// [`crate::table::PageTable::try_evict`].
#[derive(Debug, thiserror::Error)]
pub enum EvictError {
    /// The flush-before-clear write failed. The exclusive lock has already
    /// been released by the time this is returned (§4.2 step 2b).
    #[error("I/O failure while flushing {reference:?} during eviction: {source}")]
    Io {
        reference: PageRef,
        #[source]
        source: std::io::Error,
    },
}
