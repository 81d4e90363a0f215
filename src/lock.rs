//! The per-slot sequence lock.
//!
//! One `AtomicU64` packs a sequence counter together with three one-bit
//! flags: writer, exclusive, flush. There's also a modified bit, set on
//! every write-lock release and cleared either by an explicit call under
//! exclusive or by a flush that observes no writer since it started.
//!
//! Readers never block: `try_optimistic_read_lock` hands out a stamp and
//! `validate_read_lock` checks whether anything happened since. The only
//! blocking-shaped calls here are the `try_*` CAS loops, which spin only
//! under genuine contention, never under I/O.

use std::sync::atomic::{AtomicU64, Ordering};

const WRITER_BIT: u64 = 1 << 0;
const EXCLUSIVE_BIT: u64 = 1 << 1;
const FLUSH_BIT: u64 = 1 << 2;
const MODIFIED_BIT: u64 = 1 << 3;

const FLAG_BITS: u64 = WRITER_BIT | EXCLUSIVE_BIT | FLUSH_BIT | MODIFIED_BIT;
const SEQ_MASK: u64 = !FLAG_BITS;
const SEQ_STEP: u64 = FLAG_BITS + 1; // lowest set bit above the flags, i.e. 1 << 4

/// Stamp returned by the optimistic-read and flush-lock protocols.
///
/// A stamp of `0` always means "the operation that produced it failed" for
/// `try_flush_lock`/`unlock_write_and_try_take_flush_lock`; it is never a
/// value those operations can return on success because bit 3 (MODIFIED)
/// is set by the very CAS that produces a successful stamp there.
pub type Stamp = u64;

/// The raw word value of a freshly-constructed, exclusively-held lock.
/// Exposed so `PageTable` can initialize a whole region of slots directly
/// via atomic stores rather than constructing one `PageLock` at a time.
pub(crate) const INITIAL_WORD: u64 = EXCLUSIVE_BIT;

/// The sequence lock word described in the module-level comment.
///
/// `PageLock` does not own a page; it's the guard embedded at offset 0 of
/// every slot (see `crate::table`). All operations are lock-free.
///
/// `repr(transparent)` lets `PageTable` address a `PageLock` directly at a
/// slot's byte offset 0 by reinterpreting a raw pointer, rather than
/// copying the word in and out.
#[repr(transparent)]
pub struct PageLock {
    word: AtomicU64,
}

impl PageLock {
    /// A freshly-constructed lock, held exclusively.
    ///
    /// Used only by [`crate::table::PageTable`]'s slot initialization; the
    /// initial exclusive hold is released when the slot enters the free list.
    pub fn new_exclusively_held() -> Self {
        PageLock {
            word: AtomicU64::new(EXCLUSIVE_BIT),
        }
    }

    #[inline]
    fn load(&self, order: Ordering) -> u64 {
        self.word.load(order)
    }

    /// Non-blocking. Always returns a stamp; never fails.
    ///
    /// If an exclusive lock was held at the moment of the read, the
    /// returned stamp carries the exclusive bit, which forces
    /// [`Self::validate_read_lock`] to always reject it.
    pub fn try_optimistic_read_lock(&self) -> Stamp {
        self.load(Ordering::Acquire)
    }

    /// True iff no writer or exclusive lock has intervened since `stamp`
    /// was captured, and no exclusive lock is held right now.
    pub fn validate_read_lock(&self, stamp: Stamp) -> bool {
        if stamp & EXCLUSIVE_BIT != 0 {
            return false;
        }
        // Acquire ordering: anything a writer stored before releasing must
        // be visible here if we go on to report this read as valid.
        let current = self.load(Ordering::Acquire);
        if current & (WRITER_BIT | EXCLUSIVE_BIT) != 0 {
            return false;
        }
        (current & SEQ_MASK) == (stamp & SEQ_MASK)
    }

    /// Single relaxed read of the modified bit.
    pub fn is_modified(&self) -> bool {
        self.load(Ordering::Relaxed) & MODIFIED_BIT != 0
    }

    /// Single relaxed read of the exclusive bit.
    pub fn is_exclusively_locked(&self) -> bool {
        self.load(Ordering::Relaxed) & EXCLUSIVE_BIT != 0
    }

    /// CAS the writer bit from 0 to 1, iff exclusive is not held.
    pub fn try_write_lock(&self) -> bool {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            if current & (WRITER_BIT | EXCLUSIVE_BIT) != 0 {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                current | WRITER_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Clears the writer bit, sets modified, bumps the sequence. Must be
    /// paired 1:1 with a successful `try_write_lock`.
    pub fn unlock_write(&self) {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            debug_assert!(current & WRITER_BIT != 0, "unlock_write without a writer");
            let next_seq = (current & SEQ_MASK).wrapping_add(SEQ_STEP);
            let next = (current & FLAG_BITS & !WRITER_BIT) | MODIFIED_BIT | next_seq;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Releases the writer, bumps the sequence, sets modified, and — in the
    /// same CAS — sets the flush bit if it was clear.
    ///
    /// Returns the post-release word (a stamp usable with
    /// [`Self::unlock_flush`]) if the flush bit was acquired, or `0` if
    /// someone else already held it. The writer is released either way.
    pub fn unlock_write_and_try_take_flush_lock(&self) -> Stamp {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            debug_assert!(current & WRITER_BIT != 0, "unlock_write without a writer");
            let took_flush = current & FLUSH_BIT == 0;
            let next_seq = (current & SEQ_MASK).wrapping_add(SEQ_STEP);
            let mut next_flags = (current & FLAG_BITS & !WRITER_BIT) | MODIFIED_BIT;
            if took_flush {
                next_flags |= FLUSH_BIT;
            }
            let next = next_flags | next_seq;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return if took_flush { next } else { 0 },
                Err(observed) => current = observed,
            }
        }
    }

    /// CAS the exclusive bit from 0 to 1, iff no writer, exclusive, or
    /// flush is held.
    pub fn try_exclusive_lock(&self) -> bool {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            if current & (WRITER_BIT | EXCLUSIVE_BIT | FLUSH_BIT) != 0 {
                return false;
            }
            match self.word.compare_exchange_weak(
                current,
                current | EXCLUSIVE_BIT,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Clears the exclusive bit. Returns the sequence snapshot, for callers
    /// handing out the freshly-unlocked page to a waiting reader.
    pub fn unlock_exclusive(&self) -> Stamp {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            debug_assert!(current & EXCLUSIVE_BIT != 0, "unlock_exclusive without exclusive held");
            let next = current & !EXCLUSIVE_BIT;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next & SEQ_MASK,
                Err(observed) => current = observed,
            }
        }
    }

    /// Atomically downgrades exclusive to writer.
    pub fn unlock_exclusive_and_take_write_lock(&self) {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            debug_assert!(current & EXCLUSIVE_BIT != 0, "downgrade without exclusive held");
            let next = (current & !EXCLUSIVE_BIT) | WRITER_BIT;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// CAS the flush bit from 0 to 1, iff exclusive is not held. Returns a
    /// snapshot stamp on success, or `0` on failure.
    pub fn try_flush_lock(&self) -> Stamp {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            if current & EXCLUSIVE_BIT != 0 || current & FLUSH_BIT != 0 {
                return 0;
            }
            let next = current | FLUSH_BIT;
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::Acquire,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(observed) => current = observed,
            }
        }
    }

    /// Clears the flush bit. If `success` and no writer has released since
    /// `stamp` was captured, also clears the modified bit.
    pub fn unlock_flush(&self, stamp: Stamp, success: bool) {
        let mut current = self.load(Ordering::Relaxed);
        loop {
            debug_assert!(current & FLUSH_BIT != 0, "unlock_flush without flush held");
            let seq_unchanged = (current & SEQ_MASK) == (stamp & SEQ_MASK);
            let mut next = current & !FLUSH_BIT;
            if success && seq_unchanged {
                next &= !MODIFIED_BIT;
            }
            match self.word.compare_exchange_weak(
                current,
                next,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => return,
                Err(observed) => current = observed,
            }
        }
    }

    /// Clears the modified bit. Legal only while the caller holds exclusive.
    pub fn explicitly_mark_unmodified_under_exclusive_lock(&self) {
        debug_assert!(
            self.load(Ordering::Relaxed) & EXCLUSIVE_BIT != 0,
            "explicitly_mark_unmodified called without exclusive held"
        );
        // No concurrent writer or flush can be touching MODIFIED right now:
        // both require exclusive to be clear to start, and we hold it.
        self.word.fetch_and(!MODIFIED_BIT, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_lock_is_exclusively_locked() {
        let lock = PageLock::new_exclusively_held();
        assert!(lock.is_exclusively_locked());
        assert!(!lock.is_modified());
    }

    #[test]
    fn write_lock_round_trip_sets_modified_and_bumps_seq() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        let stamp_before = lock.try_optimistic_read_lock();
        assert!(lock.try_write_lock());
        assert!(!lock.try_write_lock(), "second writer must be rejected");
        lock.unlock_write();

        assert!(lock.is_modified());
        assert!(!lock.validate_read_lock(stamp_before));
    }

    #[test]
    fn optimistic_read_survives_with_no_intervening_writer() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        let stamp = lock.try_optimistic_read_lock();
        assert!(lock.validate_read_lock(stamp));
    }

    #[test]
    fn exclusive_blocks_everything() {
        let lock = PageLock::new_exclusively_held();
        assert!(!lock.try_write_lock());
        assert!(!lock.try_exclusive_lock());
        assert_eq!(lock.try_flush_lock(), 0);

        let stamp = lock.try_optimistic_read_lock();
        assert!(!lock.validate_read_lock(stamp));
    }

    #[test]
    fn exclusive_excludes_writer_and_flush_and_vice_versa() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        assert!(lock.try_write_lock());
        assert!(!lock.try_exclusive_lock());
        lock.unlock_write();

        let flush_stamp = lock.try_flush_lock();
        assert_ne!(flush_stamp, 0);
        assert!(!lock.try_exclusive_lock());
        lock.unlock_flush(flush_stamp, true);

        assert!(lock.try_exclusive_lock());
    }

    #[test]
    fn writer_and_flush_coexist() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        let flush_stamp = lock.try_flush_lock();
        assert_ne!(flush_stamp, 0);
        assert!(lock.try_write_lock(), "writer must be allowed during flush");
        lock.unlock_write();
        lock.unlock_flush(flush_stamp, true);
    }

    #[test]
    fn unlock_write_and_try_take_flush_lock_releases_writer_even_on_flush_contention() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        // Someone else is already flushing.
        let other_flush = lock.try_flush_lock();
        assert_ne!(other_flush, 0);

        assert!(lock.try_write_lock());
        let stamp = lock.unlock_write_and_try_take_flush_lock();
        assert_eq!(stamp, 0, "flush bit was already held");
        assert!(lock.try_write_lock(), "writer bit must have been released");
        lock.unlock_write();

        lock.unlock_flush(other_flush, true);
    }

    #[test]
    fn flush_preserves_modified_if_written_during_flush() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        assert!(lock.try_write_lock());
        let stamp = lock.unlock_write_and_try_take_flush_lock();
        assert_ne!(stamp, 0);

        // A write lands while the flush is in-flight.
        assert!(lock.try_write_lock());
        lock.unlock_write();
        assert!(lock.is_modified());

        lock.unlock_flush(stamp, true);
        assert!(
            lock.is_modified(),
            "a write during the flush window must survive unlock_flush(success=true)"
        );
    }

    #[test]
    fn flush_clears_modified_when_nothing_raced_it() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        assert!(lock.try_write_lock());
        let stamp = lock.unlock_write_and_try_take_flush_lock();
        assert_ne!(stamp, 0);

        lock.unlock_flush(stamp, true);
        assert!(!lock.is_modified());
    }

    #[test]
    fn explicit_unmark_clears_modified_under_exclusive() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive();

        assert!(lock.try_write_lock());
        lock.unlock_write();
        assert!(lock.is_modified());

        assert!(lock.try_exclusive_lock());
        lock.explicitly_mark_unmodified_under_exclusive_lock();
        assert!(!lock.is_modified());
        lock.unlock_exclusive();
    }

    #[test]
    fn downgrade_exclusive_to_writer() {
        let lock = PageLock::new_exclusively_held();
        lock.unlock_exclusive_and_take_write_lock();
        assert!(!lock.is_exclusively_locked());
        assert!(!lock.try_write_lock(), "writer already held by the downgrade");
        lock.unlock_write();
    }
}
