//! The x86-64 register inventory.

use super::args::{OpSize, Reg, RegFlags};

const fn reg(size: OpSize, enc: u8, flags: RegFlags) -> Reg {
    Reg::new(size, enc, flags)
}

const GENERAL: RegFlags = RegFlags::GENERAL;
const ACCUM: RegFlags = RegFlags::GENERAL.union(RegFlags::ACCUMULATOR);
const ACCUM_REX: RegFlags = ACCUM.union(RegFlags::REX);
const HIGH: RegFlags = RegFlags::GENERAL.union(RegFlags::HIGH_BYTE);
const REX: RegFlags = RegFlags::GENERAL.union(RegFlags::REX);

/// Sentinel for an absent base or index register.
pub const UNSET: Reg = reg(OpSize::Unset, 0b0000, RegFlags::empty());

/*
 * i386
 */

pub const AL: Reg = reg(OpSize::Byte, 0b0000, ACCUM);
pub const AX: Reg = reg(OpSize::Word, 0b0000, ACCUM);
pub const EAX: Reg = reg(OpSize::Dword, 0b0000, ACCUM);
pub const AH: Reg = reg(OpSize::Byte, 0b0100, HIGH);

pub const CL: Reg = reg(OpSize::Byte, 0b0001, GENERAL);
pub const CX: Reg = reg(OpSize::Word, 0b0001, GENERAL);
pub const ECX: Reg = reg(OpSize::Dword, 0b0001, GENERAL);
pub const CH: Reg = reg(OpSize::Byte, 0b0101, HIGH);

pub const DL: Reg = reg(OpSize::Byte, 0b0010, GENERAL);
pub const DX: Reg = reg(OpSize::Word, 0b0010, GENERAL);
pub const EDX: Reg = reg(OpSize::Dword, 0b0010, GENERAL);
pub const DH: Reg = reg(OpSize::Byte, 0b0110, HIGH);

pub const BL: Reg = reg(OpSize::Byte, 0b0011, GENERAL);
pub const BX: Reg = reg(OpSize::Word, 0b0011, GENERAL);
pub const EBX: Reg = reg(OpSize::Dword, 0b0011, GENERAL);
pub const BH: Reg = reg(OpSize::Byte, 0b0111, HIGH);

pub const SP: Reg = reg(OpSize::Word, 0b0100, GENERAL);
pub const ESP: Reg = reg(OpSize::Dword, 0b0100, GENERAL);
pub const BP: Reg = reg(OpSize::Word, 0b0101, GENERAL);
pub const EBP: Reg = reg(OpSize::Dword, 0b0101, GENERAL);
pub const SI: Reg = reg(OpSize::Word, 0b0110, GENERAL);
pub const ESI: Reg = reg(OpSize::Dword, 0b0110, GENERAL);
pub const DI: Reg = reg(OpSize::Word, 0b0111, GENERAL);
pub const EDI: Reg = reg(OpSize::Dword, 0b0111, GENERAL);

/// The x87 stack top; `ST + i` addresses `ST(i)`.
pub const ST: Reg = reg(OpSize::Tword, 0b0000, RegFlags::FLOATING);

/*
 * Amd64 surrogates - uniform byte registers
 */

pub const SPL: Reg = reg(OpSize::Byte, 0b0100, REX);
pub const BPL: Reg = reg(OpSize::Byte, 0b0101, REX);
pub const SIL: Reg = reg(OpSize::Byte, 0b0110, REX);
pub const DIL: Reg = reg(OpSize::Byte, 0b0111, REX);

/*
 * Amd64
 */

pub const RAX: Reg = reg(OpSize::Qword, 0b0000, ACCUM_REX);
pub const RCX: Reg = reg(OpSize::Qword, 0b0001, REX);
pub const RDX: Reg = reg(OpSize::Qword, 0b0010, REX);
pub const RBX: Reg = reg(OpSize::Qword, 0b0011, REX);
pub const RSP: Reg = reg(OpSize::Qword, 0b0100, REX);
pub const RBP: Reg = reg(OpSize::Qword, 0b0101, REX);
pub const RSI: Reg = reg(OpSize::Qword, 0b0110, REX);
pub const RDI: Reg = reg(OpSize::Qword, 0b0111, REX);

pub const R8L: Reg = reg(OpSize::Byte, 0b1000, REX);
pub const R8W: Reg = reg(OpSize::Word, 0b1000, REX);
pub const R8D: Reg = reg(OpSize::Dword, 0b1000, REX);
pub const R8: Reg = reg(OpSize::Qword, 0b1000, REX);
pub const R9L: Reg = reg(OpSize::Byte, 0b1001, REX);
pub const R9W: Reg = reg(OpSize::Word, 0b1001, REX);
pub const R9D: Reg = reg(OpSize::Dword, 0b1001, REX);
pub const R9: Reg = reg(OpSize::Qword, 0b1001, REX);
pub const R10L: Reg = reg(OpSize::Byte, 0b1010, REX);
pub const R10W: Reg = reg(OpSize::Word, 0b1010, REX);
pub const R10D: Reg = reg(OpSize::Dword, 0b1010, REX);
pub const R10: Reg = reg(OpSize::Qword, 0b1010, REX);
pub const R11L: Reg = reg(OpSize::Byte, 0b1011, REX);
pub const R11W: Reg = reg(OpSize::Word, 0b1011, REX);
pub const R11D: Reg = reg(OpSize::Dword, 0b1011, REX);
pub const R11: Reg = reg(OpSize::Qword, 0b1011, REX);
pub const R12L: Reg = reg(OpSize::Byte, 0b1100, REX);
pub const R12W: Reg = reg(OpSize::Word, 0b1100, REX);
pub const R12D: Reg = reg(OpSize::Dword, 0b1100, REX);
pub const R12: Reg = reg(OpSize::Qword, 0b1100, REX);
pub const R13L: Reg = reg(OpSize::Byte, 0b1101, REX);
pub const R13W: Reg = reg(OpSize::Word, 0b1101, REX);
pub const R13D: Reg = reg(OpSize::Dword, 0b1101, REX);
pub const R13: Reg = reg(OpSize::Qword, 0b1101, REX);
pub const R14L: Reg = reg(OpSize::Byte, 0b1110, REX);
pub const R14W: Reg = reg(OpSize::Word, 0b1110, REX);
pub const R14D: Reg = reg(OpSize::Dword, 0b1110, REX);
pub const R14: Reg = reg(OpSize::Qword, 0b1110, REX);
pub const R15L: Reg = reg(OpSize::Byte, 0b1111, REX);
pub const R15W: Reg = reg(OpSize::Word, 0b1111, REX);
pub const R15D: Reg = reg(OpSize::Dword, 0b1111, REX);
pub const R15: Reg = reg(OpSize::Qword, 0b1111, REX);
