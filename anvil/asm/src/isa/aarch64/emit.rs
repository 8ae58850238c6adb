//! AArch64 binary code emission.
//!
//! Instructions are fixed 32-bit words; every method validates its
//! operands, builds the word with the `enc_*` helpers, and writes it to
//! the buffer's current section. Label references enqueue one of the
//! AArch64 fix-up kinds before the word is written, so the fix-up marker
//! always points at the instruction itself.

use super::args::{Cond, ExtendOp, Reg, RegFlags, ShiftOp, WZR, XZR};
use super::imms::{LogicalImm, logical_imm};
use crate::buffer::{DataSink, SectionFlags, SegmentedBuffer, Visibility};
use crate::error::Error;
use crate::isa::Machine;
use crate::label::Label;
use crate::reloc::{Fixup, bit_fill, is_signed_encodable};

type Result = crate::Result<()>;

/// Addressing mode of the immediate loads and stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MemMode {
    Post = 0b01,
    Pre = 0b11,
    Offset = 0b00,
}

/*
 * Word builders
 */

fn enc_arith_ext(op_31_21: u32, s_bit: bool, rm: Reg, ext: ExtendOp, imm3: u32, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31)
        | (op_31_21 << 21)
        | (u32::from(s_bit) << 29)
        | (rm.field() << 16)
        | (ext.bits() << 13)
        | (imm3 << 10)
        | (rn.field() << 5)
        | rd.field()
}

fn enc_logic_shifted(op_30_24: u32, shift: ShiftOp, rm: Reg, imm6: u32, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31)
        | (op_30_24 << 24)
        | (shift.bits() << 22)
        | (rm.field() << 16)
        | (imm6 << 10)
        | (rn.field() << 5)
        | rd.field()
}

fn enc_logic_imm(op_30_23: u32, imm: &LogicalImm, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31) | (op_30_23 << 23) | (imm.enc_bits() << 10) | (rn.field() << 5) | rd.field()
}

fn enc_move_wide(op_30_23: u32, hw: u32, imm16: u16, rd: Reg) -> u32 {
    (rd.sf_bit() << 31) | (op_30_23 << 23) | (hw << 21) | (u32::from(imm16) << 5) | rd.field()
}

fn enc_dp_one_source(opcode_15_10: u32, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31)
        | (0b1011010110 << 21)
        | (opcode_15_10 << 10)
        | (rn.field() << 5)
        | rd.field()
}

fn enc_dp_two_source(opcode_15_10: u32, rm: Reg, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31)
        | (0b0011010110 << 21)
        | (rm.field() << 16)
        | (opcode_15_10 << 10)
        | (rn.field() << 5)
        | rd.field()
}

fn enc_madd(bit_15: u32, rm: Reg, ra: Reg, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31)
        | (0b0011011000 << 21)
        | (rm.field() << 16)
        | (bit_15 << 15)
        | (ra.field() << 10)
        | (rn.field() << 5)
        | rd.field()
}

fn enc_csel(op2_11_10: u32, cond: Cond, rm: Reg, rn: Reg, rd: Reg) -> u32 {
    (rd.sf_bit() << 31)
        | (0b0011010100 << 21)
        | (rm.field() << 16)
        | (cond.bits() << 12)
        | (op2_11_10 << 10)
        | (rn.field() << 5)
        | rd.field()
}

fn enc_hint(imm7: u32) -> u32 {
    (0b1101010100_0_00_011_0010 << 12) | ((imm7 & 0b111_1111) << 5) | 0b11111
}

/// The AArch64 instruction writer.
pub struct Assembler<'a> {
    buffer: &'a mut SegmentedBuffer,
}

impl<'a> Assembler<'a> {
    pub fn new(buffer: &'a mut SegmentedBuffer) -> Assembler<'a> {
        buffer.machine = Machine::Aarch64;
        Assembler { buffer }
    }

    /// Select or create an output section.
    pub fn section(&mut self, flags: SectionFlags, name: Option<&str>) {
        self.buffer.use_section(flags, name);
    }

    /// Bind a label at the current position.
    pub fn label(&mut self, label: &Label) -> Result {
        self.buffer.add_label(label)
    }

    /// Record an export symbol.
    pub fn export(&mut self, label: &Label, visibility: Visibility, size: u64) {
        self.buffer.add_export(label, visibility, size);
    }

    /// Write one instruction word.
    fn word(&mut self, word: u32) -> Result {
        if self.buffer.is_sealed() {
            return Err(Error::SealViolation);
        }
        self.buffer.insert(&word.to_le_bytes());
        Ok(())
    }

    /*
     * Operand checks
     */

    fn same_width(mnemonic: &'static str, regs: &[Reg]) -> Result {
        let wide = regs[0].wide();
        if regs.iter().any(|reg| reg.wide() != wide) {
            return Err(Error::shape(
                mnemonic,
                "all given registers need to be of the same width",
            ));
        }
        Ok(())
    }

    fn all_general(mnemonic: &'static str, regs: &[Reg]) -> Result {
        if regs.iter().any(|reg| !reg.is(RegFlags::GENERAL)) {
            return Err(Error::register(
                mnemonic,
                "expected general purpose registers",
            ));
        }
        Ok(())
    }

    /// Validate a MOVZ/MOVK/MOVN shift and return the `hw` field.
    fn pack_hw(shift: u8, wide: bool) -> crate::Result<u32> {
        if shift & 0b1111 != 0 {
            return Err(Error::range("move-wide shift must be a multiple of 16", i64::from(shift)));
        }
        if shift > 48 {
            return Err(Error::range("move-wide shift exceeds 48", i64::from(shift)));
        }
        let hw = u32::from(shift >> 4);
        if !wide && hw > 1 {
            return Err(Error::range(
                "only 0 or 16 bit move-wide shifts exist for 32-bit registers",
                i64::from(shift),
            ));
        }
        Ok(hw)
    }

    /*
     * Add/subtract
     */

    /// Add with carry.
    pub fn adc(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        self.put_adc("adc", dst, a, b, false)
    }

    /// Add with carry and set flags.
    pub fn adcs(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        self.put_adc("adcs", dst, a, b, true)
    }

    fn put_adc(&mut self, mnemonic: &'static str, dst: Reg, a: Reg, b: Reg, flags: bool) -> Result {
        Self::same_width(mnemonic, &[dst, a, b])?;
        Self::all_general(mnemonic, &[dst, a, b])?;
        self.word(
            (dst.sf_bit() << 31)
                | (0b0011010000 << 21)
                | (u32::from(flags) << 29)
                | (b.field() << 16)
                | (a.field() << 5)
                | dst.field(),
        )
    }

    /// Add two registers, extending the second.
    pub fn add(&mut self, dst: Reg, a: Reg, b: Reg, ext: ExtendOp, lsl3: u8) -> Result {
        self.put_arith_ext("add", 0b0001011001, dst, a, b, ext, lsl3, false)
    }

    /// Add two registers, set flags.
    pub fn adds(&mut self, dst: Reg, a: Reg, b: Reg, ext: ExtendOp, lsl3: u8) -> Result {
        self.put_arith_ext("adds", 0b0001011001, dst, a, b, ext, lsl3, true)
    }

    /// Subtract two registers, extending the second.
    pub fn sub(&mut self, dst: Reg, a: Reg, b: Reg, ext: ExtendOp, lsl3: u8) -> Result {
        self.put_arith_ext("sub", 0b1001011001, dst, a, b, ext, lsl3, false)
    }

    /// Subtract two registers, set flags.
    pub fn subs(&mut self, dst: Reg, a: Reg, b: Reg, ext: ExtendOp, lsl3: u8) -> Result {
        self.put_arith_ext("subs", 0b1001011001, dst, a, b, ext, lsl3, true)
    }

    /// Compare two registers.
    pub fn cmp(&mut self, a: Reg, b: Reg, ext: ExtendOp, lsl3: u8) -> Result {
        let zr = if a.wide() { XZR } else { WZR };
        self.put_arith_ext("cmp", 0b1001011001, zr, a, b, ext, lsl3, true)
    }

    /// Compare two registers as a negated addition.
    pub fn cmn(&mut self, a: Reg, b: Reg, ext: ExtendOp, lsl3: u8) -> Result {
        let zr = if a.wide() { XZR } else { WZR };
        self.put_arith_ext("cmn", 0b0001011001, zr, a, b, ext, lsl3, true)
    }

    #[allow(clippy::too_many_arguments)]
    fn put_arith_ext(
        &mut self,
        mnemonic: &'static str,
        opcode: u32,
        dst: Reg,
        a: Reg,
        b: Reg,
        ext: ExtendOp,
        lsl3: u8,
        flags: bool,
    ) -> Result {
        if b.is(RegFlags::STACK) {
            return Err(Error::register(
                mnemonic,
                "stack register can't be used as the second source register",
            ));
        }

        if a.is(RegFlags::ZERO) {
            return Err(Error::register(
                mnemonic,
                "zero register can't be used as the first source register",
            ));
        }

        // the flag-setting forms trade SP for ZR in the destination
        if flags {
            if dst.is(RegFlags::STACK) {
                return Err(Error::register(
                    mnemonic,
                    "stack register not allowed as destination register in this context",
                ));
            }
        } else if dst.is(RegFlags::ZERO) {
            return Err(Error::register(
                mnemonic,
                "zero register not allowed as destination register in this context",
            ));
        }

        if lsl3 > 4 {
            return Err(Error::range("extended-register shift exceeds 4", i64::from(lsl3)));
        }

        // narrow sources make the X-sized extends impossible, pick the
        // obvious W-sized one instead
        let ext = match (b.wide(), ext) {
            (false, ExtendOp::Sxtx) => ExtendOp::Sxtw,
            (false, ExtendOp::Uxtx) => ExtendOp::Uxtw,
            (_, other) => other,
        };

        self.word(enc_arith_ext(opcode, flags, b, ext, u32::from(lsl3), a, dst))
    }

    /// Add an unsigned 12-bit immediate, optionally shifted left by 12.
    pub fn add_imm(&mut self, dst: Reg, src: Reg, imm12: u16, lsl_12: bool) -> Result {
        self.put_arith_imm("add", 0b0010001, dst, src, imm12, lsl_12)
    }

    /// Subtract an unsigned 12-bit immediate, optionally shifted left by 12.
    pub fn sub_imm(&mut self, dst: Reg, src: Reg, imm12: u16, lsl_12: bool) -> Result {
        self.put_arith_imm("sub", 0b1010001, dst, src, imm12, lsl_12)
    }

    fn put_arith_imm(
        &mut self,
        mnemonic: &'static str,
        opcode: u32,
        dst: Reg,
        src: Reg,
        imm12: u16,
        lsl_12: bool,
    ) -> Result {
        if src.is(RegFlags::ZERO) || dst.is(RegFlags::ZERO) {
            return Err(Error::register(mnemonic, "zero register can't be used here"));
        }

        Self::same_width(mnemonic, &[dst, src])?;

        if imm12 > 0xFFF {
            return Err(Error::range("arithmetic immediate exceeds 12 bits", i64::from(imm12)));
        }

        self.word(
            (dst.sf_bit() << 31)
                | (opcode << 24)
                | (u32::from(lsl_12) << 22)
                | (u32::from(imm12) << 10)
                | (src.field() << 5)
                | dst.field(),
        )
    }

    /*
     * Logical operations
     */

    /// Binary and, shifted register form.
    pub fn and(&mut self, dst: Reg, a: Reg, b: Reg, shift: ShiftOp, imm6: u8) -> Result {
        self.put_logic_shifted("and", 0b0001010, dst, a, b, shift, imm6)
    }

    /// Binary or, shifted register form.
    pub fn orr(&mut self, dst: Reg, a: Reg, b: Reg, shift: ShiftOp, imm6: u8) -> Result {
        self.put_logic_shifted("orr", 0b0101010, dst, a, b, shift, imm6)
    }

    /// Binary exclusive or, shifted register form.
    pub fn eor(&mut self, dst: Reg, a: Reg, b: Reg, shift: ShiftOp, imm6: u8) -> Result {
        self.put_logic_shifted("eor", 0b1001010, dst, a, b, shift, imm6)
    }

    #[allow(clippy::too_many_arguments)]
    fn put_logic_shifted(
        &mut self,
        mnemonic: &'static str,
        opcode: u32,
        dst: Reg,
        a: Reg,
        b: Reg,
        shift: ShiftOp,
        imm6: u8,
    ) -> Result {
        Self::same_width(mnemonic, &[dst, a, b])?;
        Self::all_general(mnemonic, &[dst, a, b])?;

        if u32::from(imm6) >= dst.size.bits() {
            return Err(Error::range("logical shift exceeds the register width", i64::from(imm6)));
        }

        self.word(enc_logic_shifted(opcode, shift, b, u32::from(imm6), a, dst))
    }

    /// Binary and with a bitmask immediate.
    pub fn and_imm(&mut self, dst: Reg, src: Reg, pattern: u64) -> Result {
        self.put_logic_imm("and", 0b00100100, dst, src, pattern)
    }

    /// Binary or with a bitmask immediate.
    pub fn orr_imm(&mut self, dst: Reg, src: Reg, pattern: u64) -> Result {
        self.put_logic_imm("orr", 0b01100100, dst, src, pattern)
    }

    /// Binary exclusive or with a bitmask immediate.
    pub fn eor_imm(&mut self, dst: Reg, src: Reg, pattern: u64) -> Result {
        self.put_logic_imm("eor", 0b10100100, dst, src, pattern)
    }

    fn put_logic_imm(
        &mut self,
        mnemonic: &'static str,
        opcode: u32,
        dst: Reg,
        src: Reg,
        pattern: u64,
    ) -> Result {
        // the destination may be SP, the source may not
        if !src.is(RegFlags::GENERAL) {
            return Err(Error::register(
                mnemonic,
                "expected the source to be a general purpose register",
            ));
        }

        Self::same_width(mnemonic, &[dst, src])?;

        let imm = logical_imm("bitmask immediate", pattern, dst.size)?;
        self.word(enc_logic_imm(opcode, &imm, src, dst))
    }

    /*
     * Moves
     */

    /// Move a shifted 16-bit immediate, zeroing the other bits.
    pub fn movz(&mut self, dst: Reg, imm16: u16, shift: u8) -> Result {
        self.put_move_wide("movz", 0b10100101, dst, imm16, shift)
    }

    /// Move a shifted 16-bit immediate, keeping the other bits.
    pub fn movk(&mut self, dst: Reg, imm16: u16, shift: u8) -> Result {
        self.put_move_wide("movk", 0b11100101, dst, imm16, shift)
    }

    /// Move the negation of a shifted 16-bit immediate.
    pub fn movn(&mut self, dst: Reg, imm16: u16, shift: u8) -> Result {
        self.put_move_wide("movn", 0b00100101, dst, imm16, shift)
    }

    fn put_move_wide(
        &mut self,
        mnemonic: &'static str,
        opcode: u32,
        dst: Reg,
        imm16: u16,
        shift: u8,
    ) -> Result {
        if !dst.is(RegFlags::GENERAL) {
            return Err(Error::register(mnemonic, "expected a general purpose register"));
        }
        let hw = Self::pack_hw(shift, dst.wide())?;
        self.word(enc_move_wide(opcode, hw, imm16, dst))
    }

    /// Move a register.
    pub fn mov(&mut self, dst: Reg, src: Reg) -> Result {
        Self::same_width("mov", &[dst, src])?;

        // ORR can't address SP, the canonical idiom goes through ADD #0
        if dst.is(RegFlags::STACK) || src.is(RegFlags::STACK) {
            return self.put_arith_imm("mov", 0b0010001, dst, src, 0, false);
        }

        let zr = if dst.wide() { XZR } else { WZR };
        self.put_logic_shifted("mov", 0b0101010, dst, zr, src, ShiftOp::Lsl, 0)
    }

    /// Load an arbitrary 64-bit immediate with the shortest sequence:
    /// a single MOVZ or MOVN when one 16-bit chunk suffices, an
    /// ORR-immediate for bitmask patterns, and a MOVZ + MOVK chain
    /// otherwise.
    pub fn mov_imm(&mut self, dst: Reg, imm: u64) -> Result {
        // writing the zero register is architecturally a no-op
        if dst.is(RegFlags::ZERO) {
            return Ok(());
        }

        if !dst.is(RegFlags::GENERAL) {
            return Err(Error::register("mov", "expected a general purpose register"));
        }

        let wide = dst.wide();

        if !wide && imm > u64::from(u32::MAX) {
            return Err(Error::range("immediate exceeds the register width", imm as i64));
        }

        if let Some((imm16, shift)) = move_wide_chunk(imm, wide) {
            return self.movz(dst, imm16, shift);
        }

        let inverted = if wide { !imm } else { !imm & u64::from(u32::MAX) };
        if let Some((imm16, shift)) = move_wide_chunk(inverted, wide) {
            return self.movn(dst, imm16, shift);
        }

        if let Some(pattern) = LogicalImm::maybe_from_u64(imm, dst.size) {
            let zr = if wide { XZR } else { WZR };
            return self.word(enc_logic_imm(0b01100100, &pattern, zr, dst));
        }

        self.movz(dst, (imm & 0xFFFF) as u16, 0)?;

        let length = if wide { 64 } else { 32 };
        let mut rest = imm;
        for shift in (16..length).step_by(16) {
            rest >>= 16;
            let part = (rest & 0xFFFF) as u16;
            if part != 0 {
                self.movk(dst, part, shift as u8)?;
            }
        }

        Ok(())
    }

    /*
     * PC-relative addresses
     */

    /// Form a PC-relative address.
    pub fn adr(&mut self, dst: Reg, label: &Label) -> Result {
        if !dst.is(RegFlags::GENERAL) || !dst.wide() {
            return Err(Error::register("adr", "expected a 64-bit general purpose register"));
        }
        self.buffer.add_linkage(label, 0, Fixup::AdrSplit21, 0);
        self.word((0b10000 << 24) | dst.field())
    }

    /// Form a PC-page-relative address.
    pub fn adrp(&mut self, dst: Reg, label: &Label) -> Result {
        if !dst.is(RegFlags::GENERAL) || !dst.wide() {
            return Err(Error::register("adrp", "expected a 64-bit general purpose register"));
        }
        self.buffer.add_linkage(label, 0, Fixup::AdrSplit21, 0);
        self.word((1 << 31) | (0b10000 << 24) | dst.field())
    }

    /*
     * Loads and stores
     */

    /// Load from a label, PC-relative.
    pub fn ldr_literal(&mut self, dst: Reg, label: &Label) -> Result {
        if !dst.is(RegFlags::GENERAL) {
            return Err(Error::register("ldr", "expected a general purpose register"));
        }
        self.buffer.add_linkage(label, 0, Fixup::Branch19, 0);
        self.word((dst.sf_bit() << 30) | (0b011000 << 24) | dst.field())
    }

    /// Load with an unsigned scaled offset.
    pub fn ldr(&mut self, dst: Reg, base: Reg, offset: i64, ext: ExtendOp) -> Result {
        self.put_ldst("ldr", dst, base, offset, ext, MemMode::Offset, true)
    }

    /// Load and then increment the base (post-index).
    pub fn ldr_post(&mut self, dst: Reg, base: Reg, offset: i64, ext: ExtendOp) -> Result {
        self.put_ldst("ldr", dst, base, offset, ext, MemMode::Post, true)
    }

    /// Increment the base and then load (pre-index).
    pub fn ldr_pre(&mut self, dst: Reg, base: Reg, offset: i64, ext: ExtendOp) -> Result {
        self.put_ldst("ldr", dst, base, offset, ext, MemMode::Pre, true)
    }

    /// Store with an unsigned scaled offset.
    pub fn str(&mut self, src: Reg, base: Reg, offset: i64, ext: ExtendOp) -> Result {
        self.put_ldst("str", src, base, offset, ext, MemMode::Offset, false)
    }

    /// Store and then increment the base (post-index).
    pub fn str_post(&mut self, src: Reg, base: Reg, offset: i64, ext: ExtendOp) -> Result {
        self.put_ldst("str", src, base, offset, ext, MemMode::Post, false)
    }

    /// Increment the base and then store (pre-index).
    pub fn str_pre(&mut self, src: Reg, base: Reg, offset: i64, ext: ExtendOp) -> Result {
        self.put_ldst("str", src, base, offset, ext, MemMode::Pre, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn put_ldst(
        &mut self,
        mnemonic: &'static str,
        reg: Reg,
        base: Reg,
        mut offset: i64,
        ext: ExtendOp,
        mode: MemMode,
        load: bool,
    ) -> Result {
        let size = ext.size_bits();

        if !base.wide() {
            return Err(Error::register(mnemonic, "wide base register required"));
        }

        if base.is(RegFlags::ZERO) {
            return Err(Error::register(mnemonic, "base register can't be the zero register"));
        }

        if !reg.is(RegFlags::GENERAL) {
            return Err(Error::register(mnemonic, "expected a general purpose register"));
        }

        // writeback addressing would leave one register with two owners
        if mode != MemMode::Offset && reg.enc == base.enc {
            return Err(Error::register(
                mnemonic,
                "the same register can't be used as both the base and destination",
            ));
        }

        if mode == MemMode::Offset {
            if offset & bit_fill(size) as i64 != 0 {
                return Err(Error::range("unaligned load/store offset", offset));
            }

            offset >>= size;

            if offset < 0 || offset as u64 > bit_fill(12) {
                return Err(Error::range("load/store offset out of range", offset));
            }
        } else if !is_signed_encodable(offset, 9) {
            return Err(Error::range("load/store offset out of range", offset));
        }

        let (imm_bits, imm_shift, imm12_bit) = match mode {
            MemMode::Offset => (12, 10, 1 << 24),
            _ => (9, 12, 0),
        };

        // bits 23:22: 00 store, 01 unsigned load, 10/11 sign-extending
        // load into an X or W register
        let sign = if ext.is_signed() {
            0b10 | u32::from(!reg.wide())
        } else {
            0b01
        };
        let dir = if load { 0b11 } else { 0b00 };

        let imm = (bit_fill(imm_bits) & offset as u64) as u32;

        self.word(
            (size << 30)
                | (0b11100 << 25)
                | imm12_bit
                | ((dir & sign) << 22)
                | (imm << imm_shift)
                | ((mode as u32) << 10)
                | (base.field() << 5)
                | reg.field(),
        )
    }

    /*
     * Branches
     */

    /// Unconditional branch.
    pub fn b(&mut self, label: &Label) -> Result {
        self.buffer.add_linkage(label, 0, Fixup::Branch26, 0);
        self.word(0b000101 << 26)
    }

    /// Conditional branch.
    pub fn b_cond(&mut self, cond: Cond, label: &Label) -> Result {
        self.buffer.add_linkage(label, 0, Fixup::Branch19, 0);
        self.word((0b01010100 << 24) | cond.bits())
    }

    /// Branch with link.
    pub fn bl(&mut self, label: &Label) -> Result {
        self.buffer.add_linkage(label, 0, Fixup::Branch26, 0);
        self.word(0b100101 << 26)
    }

    /// Branch to register.
    pub fn br(&mut self, target: Reg) -> Result {
        if !target.wide() || !target.is(RegFlags::GENERAL) {
            return Err(Error::register("br", "expected a 64-bit general purpose register"));
        }
        self.word((0b1101011_0_0_00_11111_0000_0_0 << 10) | (target.field() << 5))
    }

    /// Branch with link to register.
    pub fn blr(&mut self, target: Reg) -> Result {
        if !target.wide() || !target.is(RegFlags::GENERAL) {
            return Err(Error::register("blr", "expected a 64-bit general purpose register"));
        }
        self.word((0b1101011_0_0_01_11111_0000_0_0 << 10) | (target.field() << 5))
    }

    /// Return through the link register.
    pub fn ret(&mut self) -> Result {
        self.ret_reg(super::args::LR)
    }

    /// Return through an arbitrary register.
    pub fn ret_reg(&mut self, target: Reg) -> Result {
        if !target.wide() {
            return Err(Error::register("ret", "non-qword register can't be used here"));
        }
        if !target.is(RegFlags::GENERAL) {
            return Err(Error::register("ret", "expected a general purpose register"));
        }
        self.word(0b1101011001011111000000_00000_00000 | (target.field() << 5))
    }

    /// Branch if the register is zero.
    pub fn cbz(&mut self, src: Reg, label: &Label) -> Result {
        self.buffer.add_linkage(label, 0, Fixup::Branch19, 0);
        self.word((src.sf_bit() << 31) | (0b0110100 << 24) | src.field())
    }

    /// Branch if the register is not zero.
    pub fn cbnz(&mut self, src: Reg, label: &Label) -> Result {
        self.buffer.add_linkage(label, 0, Fixup::Branch19, 0);
        self.word((src.sf_bit() << 31) | (0b0110101 << 24) | src.field())
    }

    /// Branch if the selected bit is zero.
    pub fn tbz(&mut self, src: Reg, bit: u8, label: &Label) -> Result {
        self.put_test_branch("tbz", 0b0110110, src, bit, label)
    }

    /// Branch if the selected bit is not zero.
    pub fn tbnz(&mut self, src: Reg, bit: u8, label: &Label) -> Result {
        self.put_test_branch("tbnz", 0b0110111, src, bit, label)
    }

    fn put_test_branch(
        &mut self,
        mnemonic: &'static str,
        opcode: u32,
        src: Reg,
        bit: u8,
        label: &Label,
    ) -> Result {
        if bit >= 64 {
            return Err(Error::range("test-branch bit index exceeds 63", i64::from(bit)));
        }

        let b5 = u32::from(bit >> 5);
        if b5 != 0 && !src.wide() {
            return Err(Error::register(mnemonic, "expected a qword register in this context"));
        }

        self.buffer.add_linkage(label, 0, Fixup::Branch14, 0);
        self.word((b5 << 31) | (opcode << 24) | (u32::from(bit & 0b11111) << 19) | src.field())
    }

    /*
     * Bit manipulation
     */

    /// Reverse bits.
    pub fn rbit(&mut self, dst: Reg, src: Reg) -> Result {
        Self::same_width("rbit", &[dst, src])?;
        self.word(enc_dp_one_source(0b000000, src, dst))
    }

    /// Count leading zeros.
    pub fn clz(&mut self, dst: Reg, src: Reg) -> Result {
        Self::same_width("clz", &[dst, src])?;
        self.word(enc_dp_one_source(0b000100, src, dst))
    }

    /// Count leading sign bits.
    pub fn cls(&mut self, dst: Reg, src: Reg) -> Result {
        Self::same_width("cls", &[dst, src])?;
        self.word(enc_dp_one_source(0b000101, src, dst))
    }

    /// Reverse bytes within each halfword.
    pub fn rev16(&mut self, dst: Reg, src: Reg) -> Result {
        Self::same_width("rev16", &[dst, src])?;
        self.word(enc_dp_one_source(0b000001, src, dst))
    }

    /// Reverse bytes within each word; 64-bit registers only.
    pub fn rev32(&mut self, dst: Reg, src: Reg) -> Result {
        if !dst.wide() || !src.wide() {
            return Err(Error::register("rev32", "expected qword registers"));
        }
        self.word(enc_dp_one_source(0b000010, src, dst))
    }

    /// Reverse all bytes of a 64-bit register.
    pub fn rev64(&mut self, dst: Reg, src: Reg) -> Result {
        if !dst.wide() || !src.wide() {
            return Err(Error::register("rev64", "expected qword registers"));
        }
        self.word(enc_dp_one_source(0b000011, src, dst))
    }

    /// Logical shift left by a register amount.
    pub fn lsl(&mut self, dst: Reg, src: Reg, amount: Reg) -> Result {
        self.put_shift_variable("lsl", ShiftOp::Lsl, dst, src, amount)
    }

    /// Logical shift right by a register amount.
    pub fn lsr(&mut self, dst: Reg, src: Reg, amount: Reg) -> Result {
        self.put_shift_variable("lsr", ShiftOp::Lsr, dst, src, amount)
    }

    /// Arithmetic shift right by a register amount.
    pub fn asr(&mut self, dst: Reg, src: Reg, amount: Reg) -> Result {
        self.put_shift_variable("asr", ShiftOp::Asr, dst, src, amount)
    }

    /// Rotate right by a register amount.
    pub fn ror(&mut self, dst: Reg, src: Reg, amount: Reg) -> Result {
        self.put_shift_variable("ror", ShiftOp::Ror, dst, src, amount)
    }

    fn put_shift_variable(
        &mut self,
        mnemonic: &'static str,
        shift: ShiftOp,
        dst: Reg,
        src: Reg,
        amount: Reg,
    ) -> Result {
        Self::same_width(mnemonic, &[dst, src, amount])?;
        Self::all_general(mnemonic, &[dst, src, amount])?;
        self.word(enc_dp_two_source(0b001000 | shift.bits(), amount, src, dst))
    }

    /// Rotate right by an immediate amount.
    pub fn ror_imm(&mut self, dst: Reg, src: Reg, amount: u8) -> Result {
        self.extr(dst, src, src, amount)
    }

    /// Extract a register pair: `dst = (high:low) >> lsb`.
    pub fn extr(&mut self, dst: Reg, low: Reg, high: Reg, lsb: u8) -> Result {
        Self::same_width("extr", &[dst, low, high])?;

        let max_shift = if dst.wide() { 63 } else { 31 };
        if lsb > max_shift {
            return Err(Error::range("extract shift too large for this register width", i64::from(lsb)));
        }

        self.word(
            (dst.sf_bit() << 31)
                | (0b00100111 << 23)
                | (dst.sf_bit() << 22)
                | (low.field() << 16)
                | (u32::from(lsb) << 10)
                | (high.field() << 5)
                | dst.field(),
        )
    }

    /*
     * Conditional select
     */

    /// Select between two registers by condition.
    pub fn csel(&mut self, cond: Cond, dst: Reg, truthy: Reg, falsy: Reg) -> Result {
        Self::same_width("csel", &[dst, truthy, falsy])?;
        Self::all_general("csel", &[dst, truthy, falsy])?;
        self.word(enc_csel(0b00, cond, falsy, truthy, dst))
    }

    /// Select, incrementing the false side.
    pub fn csinc(&mut self, cond: Cond, dst: Reg, truthy: Reg, falsy: Reg) -> Result {
        Self::same_width("csinc", &[dst, truthy, falsy])?;
        Self::all_general("csinc", &[dst, truthy, falsy])?;
        self.word(enc_csel(0b01, cond, falsy, truthy, dst))
    }

    /// Conditionally increment.
    pub fn cinc(&mut self, cond: Cond, dst: Reg, src: Reg) -> Result {
        let Some(inverted) = cond.inverted() else {
            return Err(Error::shape("cinc", "the always condition can't be inverted"));
        };
        self.csinc(inverted, dst, src, src)
    }

    /// Set to one when the condition holds, zero otherwise.
    pub fn cset(&mut self, cond: Cond, dst: Reg) -> Result {
        let Some(inverted) = cond.inverted() else {
            return Err(Error::shape("cset", "the always condition can't be inverted"));
        };
        let zr = if dst.wide() { XZR } else { WZR };
        self.csinc(inverted, dst, zr, zr)
    }

    /*
     * Multiplication and division
     */

    /// Multiply-add: `dst = addend + a * b`.
    pub fn madd(&mut self, dst: Reg, a: Reg, b: Reg, addend: Reg) -> Result {
        Self::same_width("madd", &[dst, a, b, addend])?;
        Self::all_general("madd", &[dst, a, b, addend])?;
        self.word(enc_madd(0, b, addend, a, dst))
    }

    /// Multiply-subtract: `dst = minuend - a * b`.
    pub fn msub(&mut self, dst: Reg, a: Reg, b: Reg, minuend: Reg) -> Result {
        Self::same_width("msub", &[dst, a, b, minuend])?;
        Self::all_general("msub", &[dst, a, b, minuend])?;
        self.word(enc_madd(1, b, minuend, a, dst))
    }

    /// Multiply.
    pub fn mul(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        let zr = if dst.wide() { XZR } else { WZR };
        self.madd(dst, a, b, zr)
    }

    /// Multiply and negate.
    pub fn mneg(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        let zr = if dst.wide() { XZR } else { WZR };
        self.msub(dst, a, b, zr)
    }

    /// Signed multiply-add of 32-bit sources into a 64-bit register.
    pub fn smaddl(&mut self, dst: Reg, a: Reg, b: Reg, addend: Reg) -> Result {
        self.put_maddl("smaddl", false, dst, a, b, addend)
    }

    /// Unsigned multiply-add of 32-bit sources into a 64-bit register.
    pub fn umaddl(&mut self, dst: Reg, a: Reg, b: Reg, addend: Reg) -> Result {
        self.put_maddl("umaddl", true, dst, a, b, addend)
    }

    fn put_maddl(
        &mut self,
        mnemonic: &'static str,
        unsigned: bool,
        dst: Reg,
        a: Reg,
        b: Reg,
        addend: Reg,
    ) -> Result {
        if !dst.wide() {
            return Err(Error::shape(mnemonic, "expected a qword destination register"));
        }
        if !addend.wide() {
            return Err(Error::shape(mnemonic, "expected a qword addend register"));
        }
        if a.wide() || b.wide() {
            return Err(Error::shape(mnemonic, "expected dword multiplication registers"));
        }

        self.word(
            (0b10011011 << 24)
                | (u32::from(unsigned) << 23)
                | (0b01 << 21)
                | (b.field() << 16)
                | (addend.field() << 10)
                | (a.field() << 5)
                | dst.field(),
        )
    }

    /// Signed widening multiply of 32-bit sources.
    pub fn smul(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        self.smaddl(dst, a, b, XZR)
    }

    /// Unsigned widening multiply of 32-bit sources.
    pub fn umul(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        self.umaddl(dst, a, b, XZR)
    }

    /// High half of a signed 64x64 multiply.
    pub fn smulh(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        self.put_mulh("smulh", false, dst, a, b)
    }

    /// High half of an unsigned 64x64 multiply.
    pub fn umulh(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        self.put_mulh("umulh", true, dst, a, b)
    }

    fn put_mulh(&mut self, mnemonic: &'static str, unsigned: bool, dst: Reg, a: Reg, b: Reg) -> Result {
        if !dst.wide() || !a.wide() || !b.wide() {
            return Err(Error::shape(mnemonic, "expected qword registers"));
        }
        Self::all_general(mnemonic, &[dst, a, b])?;

        self.word(
            (0b10011011 << 24)
                | (u32::from(unsigned) << 23)
                | (0b10 << 21)
                | (b.field() << 16)
                | (0b11111 << 10)
                | (a.field() << 5)
                | dst.field(),
        )
    }

    /// Signed divide.
    pub fn sdiv(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        Self::same_width("sdiv", &[dst, a, b])?;
        Self::all_general("sdiv", &[dst, a, b])?;
        self.word(enc_dp_two_source(0b000011, b, a, dst))
    }

    /// Unsigned divide.
    pub fn udiv(&mut self, dst: Reg, a: Reg, b: Reg) -> Result {
        Self::same_width("udiv", &[dst, a, b])?;
        Self::all_general("udiv", &[dst, a, b])?;
        self.word(enc_dp_two_source(0b000010, b, a, dst))
    }

    /*
     * Hints and system instructions
     */

    /// Raw hint.
    pub fn hint(&mut self, imm7: u8) -> Result {
        self.word(enc_hint(u32::from(imm7)))
    }

    /// No operation.
    pub fn nop(&mut self) -> Result {
        self.hint(0b0000_000)
    }

    /// Yield to the other threads of the core.
    pub fn yield_(&mut self) -> Result {
        self.hint(0b0000_001)
    }

    /// Wait for event.
    pub fn wfe(&mut self) -> Result {
        self.hint(0b0000_010)
    }

    /// Wait for interrupt.
    pub fn wfi(&mut self) -> Result {
        self.hint(0b0000_011)
    }

    /// Send event.
    pub fn sev(&mut self) -> Result {
        self.hint(0b0000_100)
    }

    /// Send event locally.
    pub fn sevl(&mut self) -> Result {
        self.hint(0b0000_101)
    }

    /// Error synchronization barrier.
    pub fn esb(&mut self) -> Result {
        self.hint(0b0010_000)
    }

    /// Profiling synchronization barrier.
    pub fn psb(&mut self) -> Result {
        self.hint(0b0010_001)
    }

    /// Supervisor call.
    pub fn svc(&mut self, imm16: u16) -> Result {
        self.word((0b11010100000 << 21) | (u32::from(imm16) << 5) | 0b00001)
    }

    /// Hypervisor call.
    pub fn hvc(&mut self, imm16: u16) -> Result {
        self.word((0b11010100000 << 21) | (u32::from(imm16) << 5) | 0b00010)
    }

    /// Breakpoint.
    pub fn brk(&mut self, imm16: u16) -> Result {
        self.word((0b11010100001 << 21) | (u32::from(imm16) << 5))
    }

    /// Halt for external debug.
    pub fn hlt(&mut self, imm16: u16) -> Result {
        self.word((0b11010100010 << 21) | (u32::from(imm16) << 5))
    }

    /// Instruction synchronization barrier.
    pub fn isb(&mut self) -> Result {
        self.word((0b1101010100_0_00_011_0011 << 12) | (0b1111 << 8) | 0b1_10_11111)
    }
}

impl DataSink for Assembler<'_> {
    fn buffer_mut(&mut self) -> &mut SegmentedBuffer {
        self.buffer
    }
}

/// Find the single shifted 16-bit chunk representing `value`, if any;
/// the precondition of a one-instruction MOVZ.
fn move_wide_chunk(value: u64, wide: bool) -> Option<(u16, u8)> {
    let limit: u8 = if wide { 4 } else { 2 };
    for slot in 0..limit {
        let shift = slot * 16;
        let mask = 0xFFFFu64 << shift;
        if value & !mask == 0 {
            return Some(((value >> shift) as u16, shift));
        }
    }
    None
}
