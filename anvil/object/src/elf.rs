//! ELF-64 constants.
//!
//! Field values follow the TIS ELF specification (v1.2) and the `elf(5)`
//! man page.

use anvil_asm::SectionFlags;
use anvil_asm::isa::Machine;

pub const MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];

/// `e_ident[EI_CLASS]`: 64-bit objects.
pub const CLASS_64: u8 = 2;
/// `e_ident[EI_DATA]`: two's complement little-endian.
pub const DATA_LSB: u8 = 1;
pub const VERSION: u8 = 1;

/// `e_type` values.
pub const ET_REL: u16 = 1;
pub const ET_EXEC: u16 = 2;

/// `e_machine` values.
pub const EM_NONE: u16 = 0;
pub const EM_X86_64: u16 = 62;
pub const EM_AARCH64: u16 = 183;

/// Structure sizes baked into the file header.
pub const EHDR_SIZE: u16 = 64;
pub const PHDR_SIZE: u16 = 56;
pub const SHDR_SIZE: u16 = 64;
pub const SYM_SIZE: u16 = 24;

/// `p_type` values.
pub const PT_LOAD: u32 = 1;

/// `p_flags` bits.
pub const PF_X: u32 = 0b001;
pub const PF_W: u32 = 0b010;
pub const PF_R: u32 = 0b100;

/// `sh_type` values.
pub const SHT_NULL: u32 = 0;
pub const SHT_PROGBITS: u32 = 1;
pub const SHT_SYMTAB: u32 = 2;
pub const SHT_STRTAB: u32 = 3;

/// `sh_flags` bits.
pub const SHF_WRITE: u64 = 0b001;
pub const SHF_ALLOC: u64 = 0b010;
pub const SHF_EXECINSTR: u64 = 0b100;

/// Symbol bindings, the high nibble of `st_info`.
pub const STB_LOCAL: u8 = 0;
pub const STB_GLOBAL: u8 = 1;
pub const STB_WEAK: u8 = 2;

/// Symbol types, the low nibble of `st_info`.
pub const STT_OBJECT: u8 = 1;
pub const STT_FUNC: u8 = 2;

/// Symbol visibilities, `st_other`.
pub const STV_HIDDEN: u8 = 2;
pub const STV_PROTECTED: u8 = 3;

/// Default page-aligned load address for the i386/x86-64 ABIs.
pub const DEFAULT_MOUNT: u64 = 0x0804_8000;

pub fn machine_value(machine: Machine) -> u16 {
    match machine {
        Machine::None => EM_NONE,
        Machine::X86_64 => EM_X86_64,
        Machine::Aarch64 => EM_AARCH64,
    }
}

/// Map segment flags onto a LOAD header's `p_flags`.
pub fn segment_flags(flags: SectionFlags) -> u32 {
    let mut out = 0;
    if flags.contains(SectionFlags::R) {
        out |= PF_R;
    }
    if flags.contains(SectionFlags::W) {
        out |= PF_W;
    }
    if flags.contains(SectionFlags::X) {
        out |= PF_X;
    }
    out
}

/// Map segment flags onto a PROGBITS section's `sh_flags`.
pub fn section_flags(flags: SectionFlags) -> u64 {
    let mut out = SHF_ALLOC;
    if flags.contains(SectionFlags::W) {
        out |= SHF_WRITE;
    }
    if flags.contains(SectionFlags::X) {
        out |= SHF_EXECINSTR;
    }
    out
}

/// Executable segments export functions, everything else data objects.
pub fn symbol_type(flags: SectionFlags) -> u8 {
    if flags.contains(SectionFlags::X) {
        STT_FUNC
    } else {
        STT_OBJECT
    }
}
