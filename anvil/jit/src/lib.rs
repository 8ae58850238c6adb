//! Runtime mapping and invocation of assembled code.
//!
//! [`to_executable`] turns a finished
//! [`SegmentedBuffer`](anvil_asm::SegmentedBuffer) into a page-aligned
//! executable mapping: the buffer is aligned to the host page size,
//! linked against the mapping base, copied section by section, and each
//! section's pages are protected according to its R/W/X flags.
//!
//! The returned [`ExecutableBuffer`] owns the mapping (it is unmapped on
//! drop) and exposes typed entry invocation. The zero-argument
//! `call_*` helpers transmute the entry to an `extern "C"` function, so
//! the returned value comes from the ABI return register of the host;
//! they are only meaningful when the generated code matches the host
//! architecture. On other hosts the buffer is still constructable and
//! inspectable through [`ExecutableBuffer::address`].

#![cfg(unix)]

mod memory;

use log::debug;
use rustc_hash::FxHashMap;

use anvil_asm::buffer::SegmentedBuffer;
use anvil_asm::label::Label;

pub use crate::memory::Mmap;

/// Failures of the runtime mapper.
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// The anonymous mapping could not be created.
    #[error("failed to allocate the memory map: {0}")]
    Allocation(#[source] std::io::Error),

    /// A page protection change was rejected.
    #[error("failed to set page protection: {0}")]
    Protect(#[source] std::io::Error),

    /// Linking the buffer against the mapping base failed.
    #[error(transparent)]
    Link(#[from] anvil_asm::Error),
}

/// A finished program baked into executable memory.
pub struct ExecutableBuffer {
    map: Mmap,
    labels: FxHashMap<Label, u64>,
}

impl ExecutableBuffer {
    /// Base address of the mapping.
    pub fn address(&self) -> *const u8 {
        self.map.as_ptr()
    }

    /// Address of a bound label, if it exists.
    pub fn address_of(&self, label: &Label) -> Option<*const u8> {
        let offset = *self.labels.get(label)?;
        Some(unsafe { self.map.as_ptr().add(offset as usize) })
    }

    /// Size of the mapping in bytes.
    pub fn size(&self) -> usize {
        self.map.len()
    }

    fn entry(&self, label: &Label) -> *const u8 {
        self.address_of(label)
            .unwrap_or_else(|| panic!("no label '{label}' in this buffer"))
    }

    /// Invoke the entry at offset zero as `extern "C" fn() -> u32`.
    ///
    /// # Safety
    ///
    /// The mapping must contain valid code for the host architecture
    /// that returns through the integer return register.
    pub unsafe fn call_u32(&self) -> u32 {
        unsafe { call_int(self.address()) }
    }

    /// Invoke a labelled entry as `extern "C" fn() -> u32`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32`]; panics when the label is not
    /// bound in this buffer.
    pub unsafe fn call_u32_at(&self, label: &Label) -> u32 {
        unsafe { call_int(self.entry(label)) }
    }

    /// Invoke the entry at offset zero as `extern "C" fn() -> i32`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32`].
    pub unsafe fn call_i32(&self) -> i32 {
        unsafe { call_int(self.address()) }
    }

    /// Invoke a labelled entry as `extern "C" fn() -> i32`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32_at`].
    pub unsafe fn call_i32_at(&self, label: &Label) -> i32 {
        unsafe { call_int(self.entry(label)) }
    }

    /// Invoke the entry at offset zero as `extern "C" fn() -> u64`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32`].
    pub unsafe fn call_u64(&self) -> u64 {
        unsafe { call_int(self.address()) }
    }

    /// Invoke a labelled entry as `extern "C" fn() -> u64`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32_at`].
    pub unsafe fn call_u64_at(&self, label: &Label) -> u64 {
        unsafe { call_int(self.entry(label)) }
    }

    /// Invoke the entry at offset zero as `extern "C" fn() -> i64`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32`].
    pub unsafe fn call_i64(&self) -> i64 {
        unsafe { call_int(self.address()) }
    }

    /// Invoke a labelled entry as `extern "C" fn() -> i64`.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32_at`].
    pub unsafe fn call_i64_at(&self, label: &Label) -> i64 {
        unsafe { call_int(self.entry(label)) }
    }

    /// Invoke the entry at offset zero and read the x87 stack top, where
    /// x86-64 FPU code leaves its result.
    ///
    /// # Safety
    ///
    /// The code must leave exactly one value on the x87 stack.
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn call_f32(&self) -> f32 {
        unsafe { call_f32_x87(self.address()) }
    }

    /// Labelled-entry variant of [`ExecutableBuffer::call_f32`].
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_f32`].
    #[cfg(target_arch = "x86_64")]
    pub unsafe fn call_f32_at(&self, label: &Label) -> f32 {
        unsafe { call_f32_x87(self.entry(label)) }
    }

    /// Invoke the entry at offset zero as `extern "C" fn() -> f32`; the
    /// value comes back in the ABI float return register.
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32`].
    #[cfg(target_arch = "aarch64")]
    pub unsafe fn call_f32(&self) -> f32 {
        let entry: extern "C" fn() -> f32 = unsafe { std::mem::transmute(self.address()) };
        entry()
    }

    /// Labelled-entry variant of [`ExecutableBuffer::call_f32`].
    ///
    /// # Safety
    ///
    /// As [`ExecutableBuffer::call_u32_at`].
    #[cfg(target_arch = "aarch64")]
    pub unsafe fn call_f32_at(&self, label: &Label) -> f32 {
        let entry: extern "C" fn() -> f32 = unsafe { std::mem::transmute(self.entry(label)) };
        entry()
    }

    /// Invoke a labelled entry with a packed argument block. The callee
    /// receives a pointer to `args` in the first argument register and is
    /// responsible for reading its arguments from the block.
    ///
    /// # Safety
    ///
    /// The code must follow the packed-argument convention and `R` must
    /// be a type the C ABI can return.
    pub unsafe fn scall<R: Copy>(&self, label: &Label, args: &[u64]) -> R {
        let entry: extern "C" fn(*const u64) -> R =
            unsafe { std::mem::transmute(self.entry(label)) };
        entry(args.as_ptr())
    }
}

unsafe fn call_int<R>(entry: *const u8) -> R {
    let entry: extern "C" fn() -> R = unsafe { std::mem::transmute(entry) };
    entry()
}

#[cfg(target_arch = "x86_64")]
unsafe fn call_f32_x87(entry: *const u8) -> f32 {
    unsafe {
        let entry: extern "C" fn() = std::mem::transmute(entry);
        entry();

        // pop the return value off the x87 stack right after the call
        let mut value = core::mem::MaybeUninit::<f32>::uninit();
        core::arch::asm!(
            "fstp dword ptr [{slot}]",
            slot = in(reg) value.as_mut_ptr(),
            options(nostack),
        );
        value.assume_init()
    }
}

/// Align, allocate, link, copy, and protect: bake a finished buffer into
/// executable memory.
pub fn to_executable(buffer: &mut SegmentedBuffer) -> Result<ExecutableBuffer, JitError> {
    let page = rustix::param::page_size();
    buffer.align(page);

    let total = buffer.total().max(page);
    let mut map = Mmap::new(total)?;
    debug!("mapped {total} bytes at {:p}", map.as_ptr());

    // labels resolve to absolute addresses inside the fresh mapping
    buffer.link(map.as_ptr() as u64, None)?;

    for segment in buffer.segments() {
        if segment.is_empty() {
            continue;
        }

        unsafe {
            let data = map.as_mut_ptr().add(segment.start as usize);
            std::ptr::copy_nonoverlapping(segment.bytes.as_ptr(), data, segment.bytes.len());
            std::ptr::write_bytes(data.add(segment.bytes.len()), segment.padder, segment.tail as usize);
        }
    }

    for segment in buffer.segments() {
        if segment.is_empty() {
            continue;
        }
        map.protect(segment.start as usize, segment.size(), segment.flags)?;
    }

    Ok(ExecutableBuffer {
        labels: buffer.resolved_labels(),
        map,
    })
}
