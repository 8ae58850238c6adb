//! Instruction encoders and segmented output buffers.
//!
//! This crate is the encoding half of the Anvil assembler: interned
//! [`Label`]s, the multi-section [`SegmentedBuffer`] with deferred
//! relocation records, and the two architecture back-ends under [`isa`].
//!
//! A typical flow binds an ISA assembler to a buffer, emits instructions
//! and data, and hands the finished buffer to a consumer (the `anvil-jit`
//! runtime mapper or the `anvil-object` ELF serializer):
//!
//! ```
//! use anvil_asm::buffer::SegmentedBuffer;
//! use anvil_asm::isa::x64::{Assembler, regs::*};
//!
//! let mut buffer = SegmentedBuffer::new();
//! let mut asm = Assembler::new(&mut buffer);
//! asm.mov(EAX, 7).unwrap();
//! asm.ret().unwrap();
//! ```

pub mod buffer;
pub mod error;
pub mod isa;
pub mod label;
pub mod reloc;

pub use crate::buffer::{BufferMarker, BufferSegment, SectionFlags, SegmentedBuffer};
pub use crate::error::Error;
pub use crate::label::Label;

/// Convenience alias for encoder results.
pub type Result<T> = core::result::Result<T, Error>;
