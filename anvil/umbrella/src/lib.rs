//! The Anvil machine-code assembler.
//!
//! This umbrella crate re-exports the member crates under one roof:
//! encoders and buffers from `anvil-asm`, the runtime mapper from
//! `anvil-jit`, and the ELF serializer from `anvil-object`.

pub use anvil_asm::{Error, Label, SectionFlags, SegmentedBuffer, buffer, error, isa, label, reloc};

pub mod jit {
    pub use anvil_jit::*;
}

pub mod object {
    pub use anvil_object::*;
}

#[cfg(unix)]
pub use anvil_jit::{ExecutableBuffer, to_executable};
pub use anvil_object::{ElfFile, RunResult, RunStatus, to_elf};
