//! Thin OS memory-mapping layer.
//!
//! Every higher layer (the virtual space reserver, the pseudo-heaps, the
//! in-process page-frame service) goes through this module rather than
//! calling `libc`/`winapi` directly, so the reserve/commit/decommit/release
//! vocabulary stays uniform across platforms.

#[cfg(not(windows))]
use libc::{mmap, mprotect, munmap, MAP_ANON, MAP_FAILED, MAP_PRIVATE, PROT_NONE, PROT_READ,
    PROT_WRITE};
#[cfg(windows)]
use winapi::shared::ntdef::NULL;
#[cfg(windows)]
use winapi::um::memoryapi::{VirtualAlloc, VirtualFree};
#[cfg(windows)]
use winapi::um::sysinfoapi::{GetSystemInfo, SYSTEM_INFO};
#[cfg(windows)]
use winapi::um::winnt::{MEM_COMMIT, MEM_DECOMMIT, MEM_RELEASE, MEM_RESERVE, PAGE_NOACCESS,
    PAGE_READWRITE};

use log::warn;
use std::ptr::null_mut;
use std::sync::Once;

static PAGE_SIZE_INIT: Once = Once::new();
static mut PAGE_SIZE: usize = 4096;

/// OS page size, queried once and cached.
pub fn page_size() -> usize {
    PAGE_SIZE_INIT.call_once(|| unsafe {
        #[cfg(windows)]
        {
            let mut si: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut si);
            if si.dwPageSize > 0 {
                PAGE_SIZE = si.dwPageSize as usize;
            }
        }
        #[cfg(not(windows))]
        {
            let got = libc::sysconf(libc::_SC_PAGESIZE);
            if got > 0 {
                PAGE_SIZE = got as usize;
            }
        }
    });
    unsafe { PAGE_SIZE }
}

/// Round `size` up to a multiple of `align` (`align` a power of two).
pub fn align_up(size: usize, align: usize) -> usize {
    (size + align - 1) & !(align - 1)
}

/// Round `size` down to a multiple of `align` (`align` a power of two).
pub fn align_down(size: usize, align: usize) -> usize {
    size & !(align - 1)
}

/// Reserve `size` bytes of address space with no access rights, at an
/// address the OS chooses. Returns null on failure; never aborts, so
/// callers (the virtual space reserver) can probe shrinking sizes.
pub fn reserve(size: usize) -> *mut u8 {
    if size == 0 {
        return null_mut();
    }
    unsafe {
        #[cfg(windows)]
        {
            VirtualAlloc(NULL, size, MEM_RESERVE, PAGE_NOACCESS) as *mut u8
        }
        #[cfg(not(windows))]
        {
            let p = mmap(null_mut(), size, PROT_NONE, MAP_PRIVATE | MAP_ANON, -1, 0);
            if p == MAP_FAILED {
                null_mut()
            } else {
                p as *mut u8
            }
        }
    }
}

/// Release a reservation obtained from [`reserve`]. `size` must be the
/// exact size originally reserved.
pub fn release(addr: *mut u8, size: usize) {
    if addr.is_null() || size == 0 {
        return;
    }
    unsafe {
        #[cfg(windows)]
        {
            let _ = size;
            if VirtualFree(addr as _, 0, MEM_RELEASE) == 0 {
                warn!("VirtualFree(MEM_RELEASE) failed for {:p}", addr);
            }
        }
        #[cfg(not(windows))]
        {
            if munmap(addr as _, size) != 0 {
                warn!(
                    "munmap failed for {:p} ({} bytes): errno {}",
                    addr,
                    size,
                    errno::errno()
                );
            }
        }
    }
}

/// Grant read/write access to `[addr, addr+size)`, a sub-range of a prior
/// reservation. Idempotent: committing an already-committed range is a
/// harmless no-op observable only as a redundant syscall.
pub fn commit(addr: *mut u8, size: usize) -> bool {
    if size == 0 {
        return true;
    }
    unsafe {
        #[cfg(windows)]
        {
            let p = VirtualAlloc(addr as _, size, MEM_COMMIT, PAGE_READWRITE);
            if p.is_null() {
                warn!("VirtualAlloc(MEM_COMMIT) failed for {:p} ({} bytes)", addr, size);
                false
            } else {
                true
            }
        }
        #[cfg(not(windows))]
        {
            if mprotect(addr as _, size, PROT_READ | PROT_WRITE) == 0 {
                true
            } else {
                warn!(
                    "mprotect(RW) failed for {:p} ({} bytes): errno {}",
                    addr,
                    size,
                    errno::errno()
                );
                false
            }
        }
    }
}

/// Revoke access to `[addr, addr+size)` without releasing the address
/// range itself; the memory may later be re-committed cheaply.
pub fn decommit(addr: *mut u8, size: usize) -> bool {
    if size == 0 {
        return true;
    }
    unsafe {
        #[cfg(windows)]
        {
            if VirtualFree(addr as _, size, MEM_DECOMMIT) != 0 {
                true
            } else {
                warn!("VirtualFree(MEM_DECOMMIT) failed for {:p} ({} bytes)", addr, size);
                false
            }
        }
        #[cfg(not(windows))]
        {
            if mprotect(addr as _, size, PROT_NONE) == 0 {
                true
            } else {
                warn!(
                    "mprotect(NONE) failed for {:p} ({} bytes): errno {}",
                    addr,
                    size,
                    errno::errno()
                );
                false
            }
        }
    }
}
