//! Anonymous page-aligned mappings.

use std::ptr::NonNull;

use anvil_asm::SectionFlags;
use rustix::mm::{MapFlags, MprotectFlags, ProtFlags};

use crate::JitError;

/// One private anonymous mapping, unmapped on drop.
pub struct Mmap {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mmap {
    /// Map `len` bytes of zeroed read/write memory; `len` must be a
    /// multiple of the host page size.
    pub fn new(len: usize) -> Result<Mmap, JitError> {
        debug_assert!(len > 0 && len % rustix::param::page_size() == 0);

        let ptr = unsafe {
            rustix::mm::mmap_anonymous(
                std::ptr::null_mut(),
                len,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::PRIVATE,
            )
        }
        .map_err(|errno| JitError::Allocation(errno.into()))?;

        Ok(Mmap {
            ptr: NonNull::new(ptr.cast()).expect("mmap returned null"),
            len,
        })
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Apply the section flags to a page-aligned span of the mapping.
    pub fn protect(&self, offset: usize, len: usize, flags: SectionFlags) -> Result<(), JitError> {
        debug_assert!(offset + len <= self.len);

        let mut prot = MprotectFlags::empty();
        if flags.contains(SectionFlags::R) {
            prot |= MprotectFlags::READ;
        }
        if flags.contains(SectionFlags::W) {
            prot |= MprotectFlags::WRITE;
        }
        if flags.contains(SectionFlags::X) {
            prot |= MprotectFlags::EXEC;
        }

        unsafe { rustix::mm::mprotect(self.ptr.as_ptr().add(offset).cast(), len, prot) }
            .map_err(|errno| JitError::Protect(errno.into()))
    }
}

impl Drop for Mmap {
    fn drop(&mut self) {
        unsafe {
            // leaking on failure is the only option left here
            let _ = rustix::mm::munmap(self.ptr.as_ptr().cast(), self.len);
        }
    }
}
