//! x86-64 operand types and the addressing expression DSL.
//!
//! A [`Location`] is built by operator algebra over registers:
//! `RAX + RBX * 2 + 7` or `RBP + label`. Wrapping the expression in
//! [`ptr`] (or one of the width-casting variants) turns it into a memory
//! reference; references are frozen, no further arithmetic is allowed.

use std::ops::{Add, Mul, Sub};

use super::regs::{ST, UNSET};
use crate::error::Error;
use crate::label::Label;

/// Operand width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OpSize {
    /// Width not yet known; resolved from the other operand.
    Unset,
    Byte,
    Word,
    Dword,
    Qword,
    /// Ten bytes, the x87 extended-precision width.
    Tword,
}

impl OpSize {
    pub fn bytes(self) -> u8 {
        match self {
            OpSize::Unset => 0,
            OpSize::Byte => 1,
            OpSize::Word => 2,
            OpSize::Dword => 4,
            OpSize::Qword => 8,
            OpSize::Tword => 10,
        }
    }
}

bitflags::bitflags! {
    /// Register class flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegFlags: u8 {
        const GENERAL     = 0b00001;
        const FLOATING    = 0b00010;
        /// The accumulator (AL/AX/EAX/RAX), eligible for short forms.
        const ACCUMULATOR = 0b00100;
        /// Encoding requires a REX prefix (R8..R15, SPL-class surrogates,
        /// and every 64-bit register).
        const REX         = 0b01000;
        /// Legacy high-byte register (AH/BH/CH/DH); incompatible with any
        /// REX prefix in the same instruction.
        const HIGH_BYTE   = 0b10000;
    }
}

/// One x86 register: width, hardware encoding, and class flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reg {
    pub size: OpSize,
    pub enc: u8,
    pub flags: RegFlags,
}

impl Reg {
    pub const fn new(size: OpSize, enc: u8, flags: RegFlags) -> Reg {
        Reg { size, enc, flags }
    }

    pub fn is(self, flags: RegFlags) -> bool {
        self.flags.intersects(flags)
    }

    /// Low three bits, the part that fits in ModRM/SIB fields.
    pub fn low(self) -> u8 {
        self.enc & 0b111
    }

    /// The REX extension bit of the encoding.
    pub fn high(self) -> u8 {
        self.enc & 0b1000
    }

    /// ESP-like encodings force a SIB byte when used as a base.
    pub fn is_esp_like(self) -> bool {
        self.low() == 0b100
    }

    /// EBP-like encodings (EBP/RBP/R13) cannot take mod=00 without an
    /// explicit displacement.
    pub fn is_ebp_like(self) -> bool {
        self.low() == 0b101
    }

    /// View of this register as a ModRM `reg` field.
    pub fn field(self) -> RegField {
        RegField {
            rex: self.is(RegFlags::REX),
            enc: self.enc,
        }
    }
}

/// The ModRM `reg` field: either a register or an opcode extension.
#[derive(Debug, Clone, Copy)]
pub struct RegField {
    /// A REX prefix must be emitted even if no extension bits are set.
    pub rex: bool,
    pub enc: u8,
}

impl RegField {
    /// Pack an opcode extension (`/0` .. `/7`) into the field.
    pub fn raw(enc: u8) -> RegField {
        RegField { rex: false, enc }
    }

    pub fn low(self) -> u8 {
        self.enc & 0b111
    }

    /// True when REX.R is needed.
    pub fn is_extended(self) -> bool {
        self.enc & 0b1000 != 0
    }
}

/// A scaled index expression, `reg * scale`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scaled {
    pub reg: Reg,
    pub scale: u8,
}

impl Scaled {
    /// # Panics
    ///
    /// Panics when the scale is not one of 1, 2, 4, 8 or when the register
    /// has the stack-pointer index encoding, which the SIB byte cannot
    /// express.
    pub fn new(reg: Reg, scale: u8) -> Scaled {
        // check enc, not low(): R12 is fine, the REX bit disambiguates
        assert!(
            reg.enc != 0b100,
            "RSP/ESP can't be used as a scaled index"
        );
        assert!(
            scale.is_power_of_two() && scale <= 8,
            "a register can only be scaled by one of 1, 2, 4, 8"
        );
        Scaled { reg, scale }
    }
}

/// Any x86 instruction operand: an immediate, a register, or an
/// addressing expression, optionally wrapped into a memory reference.
#[derive(Debug, Clone)]
pub struct Location {
    pub base: Reg,
    pub index: Reg,
    pub scale: u8,
    pub offset: i64,
    pub label: Option<Label>,
    pub size: OpSize,
    pub reference: bool,
}

impl Location {
    pub fn imm(value: i64) -> Location {
        Location {
            base: UNSET,
            index: UNSET,
            scale: 1,
            offset: value,
            label: None,
            size: OpSize::Unset,
            reference: false,
        }
    }

    /// Recast the operand width of an immediate or a reference.
    ///
    /// # Panics
    ///
    /// Panics for register expressions, whose width is fixed by the
    /// register itself.
    pub fn cast(mut self, size: OpSize) -> Location {
        assert!(
            self.reference || self.is_immediate(),
            "the result of this expression is of fixed size"
        );
        self.size = size;
        self
    }

    /// Width not yet determined.
    pub fn is_indeterminate(&self) -> bool {
        self.size == OpSize::Unset
    }

    /// A plain constant, no registers and no reference wrapper.
    pub fn is_immediate(&self) -> bool {
        self.base == UNSET && self.index == UNSET && !self.reference
    }

    pub fn is_indexed(&self) -> bool {
        self.index.is(RegFlags::GENERAL)
    }

    /// A bare general-purpose register.
    pub fn is_simple(&self) -> bool {
        self.base.is(RegFlags::GENERAL)
            && !self.is_indexed()
            && self.offset == 0
            && !self.reference
            && !self.is_labeled()
    }

    /// A bare accumulator, eligible for short forms.
    pub fn is_accum(&self) -> bool {
        self.base.is(RegFlags::ACCUMULATOR) && self.is_simple()
    }

    pub fn is_labeled(&self) -> bool {
        self.label.is_some()
    }

    /// A memory reference.
    pub fn is_memory(&self) -> bool {
        self.reference
    }

    /// A bare register or a memory reference, the `r/m` operand shapes.
    pub fn is_memreg(&self) -> bool {
        self.is_memory() || self.is_simple()
    }

    pub fn is_wide(&self) -> bool {
        matches!(self.size, OpSize::Word | OpSize::Dword | OpSize::Qword)
    }

    /// An x87 stack register `ST(0)..ST(7)`.
    pub fn is_floating(&self) -> bool {
        self.base == ST
            && !self.is_indexed()
            && !self.reference
            && !self.is_labeled()
            && (0..=7).contains(&self.offset)
    }

    pub fn is_st0(&self) -> bool {
        self.is_floating() && self.offset == 0
    }

    /// A label and nothing else, the operand shape of jumps and calls.
    pub fn is_jump_label(&self) -> bool {
        self.is_labeled() && self.base == UNSET && self.index == UNSET && !self.reference
    }

    /// The ModRM `mod` field implied by the displacement.
    pub(crate) fn mod_flag(&self) -> u8 {
        if self.label.is_some() {
            return MOD_QUAD;
        }
        if self.offset == 0 {
            return MOD_NONE;
        }
        if i8::try_from(self.offset).is_ok() {
            return MOD_BYTE;
        }
        MOD_QUAD
    }

    /// The SIB `ss` field.
    pub(crate) fn ss_flag(&self) -> u8 {
        self.scale.trailing_zeros() as u8
    }

    fn modified(self) -> Location {
        assert!(!self.reference, "can't modify a reference");
        self
    }
}

pub(crate) const MOD_NONE: u8 = 0b00;
pub(crate) const MOD_BYTE: u8 = 0b01;
pub(crate) const MOD_QUAD: u8 = 0b10;
pub(crate) const MOD_SHORT: u8 = 0b11;

/// SIB index encoding meaning "no index".
pub(crate) const NO_SIB_INDEX: u8 = 0b100;
/// SIB base / ModRM r/m encoding meaning "no base" (with mod=00).
pub(crate) const NO_BASE: u8 = 0b101;
/// ModRM r/m encoding that introduces a SIB byte.
pub(crate) const RM_SIB: u8 = 0b100;

/// Wrap an addressing expression into a memory reference of not yet
/// determined width.
pub fn ptr(location: impl Into<Location>) -> Location {
    let mut location = location.into();
    assert!(!location.reference, "can't reference a reference");
    location.reference = true;
    location.size = OpSize::Unset;
    location
}

pub fn byte_ptr(location: impl Into<Location>) -> Location {
    ptr(location).cast(OpSize::Byte)
}

pub fn word_ptr(location: impl Into<Location>) -> Location {
    ptr(location).cast(OpSize::Word)
}

pub fn dword_ptr(location: impl Into<Location>) -> Location {
    ptr(location).cast(OpSize::Dword)
}

pub fn qword_ptr(location: impl Into<Location>) -> Location {
    ptr(location).cast(OpSize::Qword)
}

pub fn tword_ptr(location: impl Into<Location>) -> Location {
    ptr(location).cast(OpSize::Tword)
}

/// Deduce the common operand size of a pair and check their agreement.
pub(crate) fn pair_size(
    mnemonic: &'static str,
    a: &Location,
    b: &Location,
) -> Result<OpSize, Error> {
    let ia = a.is_indeterminate();
    let ib = b.is_indeterminate();

    if a.is_immediate() && b.is_immediate() {
        return Err(Error::shape(mnemonic, "both operands can't be immediate"));
    }

    if a.is_memory() && b.is_memory() {
        return Err(Error::shape(mnemonic, "both operands can't reference memory"));
    }

    if ia && ib {
        return Err(Error::shape(
            mnemonic,
            "both operands can't be of indeterminate size",
        ));
    }

    if !ia && !ib && a.size != b.size {
        return Err(Error::shape(
            mnemonic,
            "both operands need to be of the same size",
        ));
    }

    let any_rex = a.base.is(RegFlags::REX)
        || b.base.is(RegFlags::REX)
        || a.index.is(RegFlags::REX)
        || b.index.is(RegFlags::REX);
    let any_high = a.base.is(RegFlags::HIGH_BYTE)
        || b.base.is(RegFlags::HIGH_BYTE)
        || a.index.is(RegFlags::HIGH_BYTE)
        || b.index.is(RegFlags::HIGH_BYTE);

    if any_rex && any_high {
        return Err(Error::register(
            mnemonic,
            "can't use a high byte register in the same instruction as an extended register",
        ));
    }

    Ok(if ia { b.size } else { a.size })
}

/*
 * Conversions into Location
 */

impl From<Reg> for Location {
    fn from(reg: Reg) -> Location {
        Location {
            base: reg,
            index: UNSET,
            scale: 1,
            offset: 0,
            label: None,
            size: reg.size,
            reference: false,
        }
    }
}

impl From<Scaled> for Location {
    fn from(scaled: Scaled) -> Location {
        Location {
            base: UNSET,
            index: scaled.reg,
            scale: scaled.scale,
            offset: 0,
            label: None,
            size: scaled.reg.size,
            reference: false,
        }
    }
}

impl From<Label> for Location {
    fn from(label: Label) -> Location {
        Location {
            label: Some(label),
            ..Location::imm(0)
        }
    }
}

impl From<&Label> for Location {
    fn from(label: &Label) -> Location {
        Location::from(label.clone())
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(impl From<$ty> for Location {
            fn from(value: $ty) -> Location {
                Location::imm(value as i64)
            }
        })*
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32, u64);

/*
 * Operand algebra
 */

impl Mul<i32> for Reg {
    type Output = Scaled;

    fn mul(self, scale: i32) -> Scaled {
        Scaled::new(self, u8::try_from(scale).expect("scale must be 1, 2, 4 or 8"))
    }
}

impl Add<Reg> for Reg {
    type Output = Location;

    fn add(self, index: Reg) -> Location {
        self + Scaled::new(index, 1)
    }
}

impl Add<Scaled> for Reg {
    type Output = Location;

    fn add(self, index: Scaled) -> Location {
        let size = if index.reg.size != OpSize::Unset {
            index.reg.size
        } else {
            self.size
        };
        Location {
            base: self,
            index: index.reg,
            scale: index.scale,
            offset: 0,
            label: None,
            size,
            reference: false,
        }
    }
}

impl Add<i64> for Reg {
    type Output = Location;

    fn add(self, offset: i64) -> Location {
        Location::from(self) + offset
    }
}

impl Sub<i64> for Reg {
    type Output = Location;

    fn sub(self, offset: i64) -> Location {
        Location::from(self) - offset
    }
}

impl Add<i32> for Reg {
    type Output = Location;

    fn add(self, offset: i32) -> Location {
        self + i64::from(offset)
    }
}

impl Sub<i32> for Reg {
    type Output = Location;

    fn sub(self, offset: i32) -> Location {
        self - i64::from(offset)
    }
}

impl Add<&Label> for Reg {
    type Output = Location;

    fn add(self, label: &Label) -> Location {
        Location::from(self) + label
    }
}

impl Add<i64> for Scaled {
    type Output = Location;

    fn add(self, offset: i64) -> Location {
        Location::from(self) + offset
    }
}

impl Add<i32> for Scaled {
    type Output = Location;

    fn add(self, offset: i32) -> Location {
        Location::from(self) + i64::from(offset)
    }
}

impl Sub<i64> for Scaled {
    type Output = Location;

    fn sub(self, offset: i64) -> Location {
        Location::from(self) - offset
    }
}

impl Sub<i32> for Scaled {
    type Output = Location;

    fn sub(self, offset: i32) -> Location {
        Location::from(self) - i64::from(offset)
    }
}

impl Add<&Label> for Scaled {
    type Output = Location;

    fn add(self, label: &Label) -> Location {
        Location::from(self) + label
    }
}

impl Add<i64> for Location {
    type Output = Location;

    fn add(self, offset: i64) -> Location {
        let mut location = self.modified();
        location.offset += offset;
        location
    }
}

impl Add<i32> for Location {
    type Output = Location;

    fn add(self, offset: i32) -> Location {
        self + i64::from(offset)
    }
}

impl Sub<i64> for Location {
    type Output = Location;

    fn sub(self, offset: i64) -> Location {
        let mut location = self.modified();
        location.offset -= offset;
        location
    }
}

impl Sub<i32> for Location {
    type Output = Location;

    fn sub(self, offset: i32) -> Location {
        self - i64::from(offset)
    }
}

impl Add<&Label> for Location {
    type Output = Location;

    fn add(self, label: &Label) -> Location {
        let mut location = self.modified();
        location.label = Some(label.clone());
        location
    }
}

#[cfg(test)]
mod tests {
    use super::super::regs::*;
    use super::*;

    #[test]
    fn register_attributes() {
        assert!(EAX.is(RegFlags::ACCUMULATOR));
        assert!(ESP.is_esp_like());
        assert!(EBP.is_ebp_like());
        assert!(AH.is(RegFlags::HIGH_BYTE));
        assert!(R13D.is(RegFlags::REX));
        assert!(RAX.is(RegFlags::REX));
        assert!(SIL.is(RegFlags::REX));

        assert_eq!(EAX, EAX);
        assert_ne!(EAX, EDX);
        assert_ne!(RDX, EDX);
        assert_ne!(EAX * 2, EAX * 1);
        assert_eq!(EAX * 2, EAX * 2);
    }

    #[test]
    fn determinacy() {
        assert!(ptr(EAX).is_indeterminate());
        assert!(Location::imm(0).is_indeterminate());

        assert!(!dword_ptr(EAX).is_indeterminate());
        assert!(!Location::imm(0).cast(OpSize::Qword).is_indeterminate());
        assert!(!Location::from(EAX).is_indeterminate());
        assert!(!Location::from(EAX * 2).is_indeterminate());
    }

    #[test]
    #[should_panic(expected = "fixed size")]
    fn register_cast_rejected() {
        let _ = Location::from(EAX).cast(OpSize::Dword);
    }

    #[test]
    #[should_panic(expected = "scaled index")]
    fn scaled_stack_pointer_rejected() {
        let _ = RSP * 2;
    }

    #[test]
    #[should_panic(expected = "can't modify a reference")]
    fn references_are_frozen() {
        let _ = ptr(EAX) + 4;
    }

    #[test]
    fn r12_can_be_an_index() {
        let location = RAX + R12 * 2 + 4i32;
        assert_eq!(location.index, R12);
        assert_eq!(location.scale, 2);
        assert_eq!(location.offset, 4);
    }

    #[test]
    fn pair_size_checks() {
        let err = |a: &Location, b: &Location| pair_size("t", a, b).unwrap_err();

        assert_eq!(pair_size("t", &EAX.into(), &EDX.into()).unwrap(), OpSize::Dword);
        assert_eq!(pair_size("t", &EAX.into(), &5.into()).unwrap(), OpSize::Dword);

        assert!(matches!(
            err(&EAX.into(), &AX.into()),
            Error::OperandShape { .. }
        ));
        assert!(matches!(
            err(&ptr(RAX), &ptr(RAX)),
            Error::OperandShape { .. }
        ));
        assert!(matches!(
            err(&SIL.into(), &AH.into()),
            Error::RegisterIncompatibility { .. }
        ));
        assert!(matches!(
            err(&AH.into(), &BPL.into()),
            Error::RegisterIncompatibility { .. }
        ));
    }
}
