//! The [`MemoryManager`] external collaborator (§4.4).

use std::ffi::c_void;
use std::io;
use std::ptr::NonNull;

/// Allocates aligned, off-heap memory regions that live until process exit.
///
/// `PageTable` uses this both for its own metadata region and, via
/// `init_buffer`, for the per-slot data buffers. There is deliberately no
/// `free`: slots are recycled, never deallocated, for the table's lifetime.
pub trait MemoryManager: Send + Sync {
    /// Returns the address of a region at least `byte_size` bytes, aligned
    /// to the system page size.
    fn allocate_aligned(&self, byte_size: usize) -> io::Result<NonNull<u8>>;
}

/// The default, OS-backed [`MemoryManager`], built directly on
/// `libc::posix_memalign` with the alignment read from
/// `sysconf(_SC_PAGESIZE)`.
pub struct SystemMemoryManager {
    alignment: usize,
}

impl SystemMemoryManager {
    pub fn new() -> Self {
        let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        let alignment = if page_size > 0 { page_size as usize } else { 4096 };
        SystemMemoryManager { alignment }
    }
}

impl Default for SystemMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryManager for SystemMemoryManager {
    fn allocate_aligned(&self, byte_size: usize) -> io::Result<NonNull<u8>> {
        // posix_memalign requires the size to be a multiple of the
        // alignment is NOT actually required by POSIX, but rounding up
        // keeps every slot's region fully page-backed, which is what
        // callers that mmap/msync these regions in a real deployment want.
        let rounded = byte_size.div_ceil(self.alignment) * self.alignment;

        let mut out: *mut c_void = std::ptr::null_mut();
        let rc = unsafe { libc::posix_memalign(&mut out, self.alignment, rounded.max(self.alignment)) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        // posix_memalign zero-fills nothing; match the spec's lifecycle
        // requirement (§3) that fresh slots observe zeroed addressPtr et al.
        unsafe {
            std::ptr::write_bytes(out as *mut u8, 0, rounded);
        }
        NonNull::new(out as *mut u8).ok_or_else(|| io::Error::other("posix_memalign returned null"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocates_page_aligned_zeroed_memory() {
        let mgr = SystemMemoryManager::new();
        let addr = mgr.allocate_aligned(8192).unwrap();
        assert_eq!(addr.as_ptr() as usize % mgr.alignment, 0);
        let bytes = unsafe { std::slice::from_raw_parts(addr.as_ptr(), 8192) };
        assert!(bytes.iter().all(|&b| b == 0));
    }
}
