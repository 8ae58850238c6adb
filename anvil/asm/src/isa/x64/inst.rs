//! x86-64 per-mnemonic emitters.
//!
//! Each method validates operand shape, picks between the template paths
//! in `emit.rs`, and registers relocations for labelled fields.

use super::args::{Location, OpSize, RegField, RegFlags, pair_size};
use super::emit::{Assembler, check_imm_width, min_bytes};
use super::regs::{AL, AX, CL, DX, EAX, RSP};
use crate::error::Error;

type Result = crate::Result<()>;

/*
 * Opcode extensions of the C0/D0-family shift group.
 */
const EXT_ROL: u8 = 0;
const EXT_ROR: u8 = 1;
const EXT_RCL: u8 = 2;
const EXT_RCR: u8 = 3;
const EXT_SHL: u8 = 4;
const EXT_SHR: u8 = 5;
const EXT_SAR: u8 = 7;

/*
 * String-block opcode bases; the low bit selects the wide form.
 */
const INST_MOVS: u8 = 0xA4;
const INST_CMPS: u8 = 0xA6;
const INST_STOS: u8 = 0xAA;
const INST_LODS: u8 = 0xAC;
const INST_SCAS: u8 = 0xAE;
const INST_INS: u8 = 0x6C;
const INST_OUTS: u8 = 0x6E;

impl Assembler<'_> {
    /*
     * Shared templates
     */

    /// The `add`-style tuple: reg↔mem in both directions, short immediate
    /// forms, and the generic `80/81 /ext` immediate form.
    fn put_tuple(
        &mut self,
        mnemonic: &'static str,
        dst: &Location,
        src: &Location,
        opcode_rmr: u8,
        ext: u8,
    ) -> Result {
        let size = pair_size(mnemonic, src, dst)?;

        if dst.is_simple() && src.is_memreg() {
            return self.put_std_ds(mnemonic, opcode_rmr, src, dst.base.field(), size, true, false);
        }

        if src.is_simple() && dst.is_memory() {
            return self.put_std_ds(mnemonic, opcode_rmr, dst, src.base.field(), size, false, false);
        }

        if dst.is_memreg() && src.is_immediate() {
            // sign-extended imm8 variant for wide destinations
            if size != OpSize::Byte && !src.is_labeled() && i8::try_from(src.offset).is_ok() {
                self.set_suffix(1);
                self.put_std_ds(mnemonic, 0b100000, dst, RegField::raw(ext), size, true, false)?;
                self.emit_imm(src.offset, 1);
                return Ok(());
            }

            // accumulator short form skips the ModRM byte entirely
            if dst.is_accum() && !src.is_labeled() {
                self.open()?;
                let imm_width = size.bytes().min(4);
                check_imm_width(src.offset, imm_width)?;
                if size == OpSize::Word {
                    self.emit_operand_size_prefix();
                }
                if size == OpSize::Qword {
                    self.emit_rex(true, false, false, false);
                }
                self.emit(opcode_rmr << 2 | 0b100 | u8::from(size != OpSize::Byte));
                self.emit_imm(src.offset, imm_width);
                return Ok(());
            }

            // the tuple instructions cap immediates at 32 bits
            let imm_width = size.bytes().min(4);
            if !src.is_labeled() {
                check_imm_width(src.offset, imm_width)?;
            }
            self.set_suffix(imm_width);
            self.put_std_ds(mnemonic, 0b100000, dst, RegField::raw(ext), size, false, false)?;
            self.put_imm_field(src, imm_width);
            return Ok(());
        }

        Err(Error::shape(mnemonic, "invalid operands"))
    }

    /// The MOV template over the r/m side; `other` is either the register
    /// or the immediate operand.
    fn put_mov_rm(
        &mut self,
        rm: &Location,
        other: &Location,
        direction: bool,
    ) -> Result {
        let size = pair_size("mov", rm, other)?;

        if other.is_immediate() {
            let imm_width = size.bytes().min(4);
            if !other.is_labeled() {
                if size == OpSize::Qword {
                    // C7 /0 sign-extends its 32-bit immediate
                    if i32::try_from(other.offset).is_err() {
                        return Err(Error::range("immediate exceeds destination width", other.offset));
                    }
                } else {
                    check_imm_width(other.offset, imm_width)?;
                }
            }
            self.set_suffix(imm_width);
            self.put_std_ds("mov", 0b110001, rm, other.base.field(), size, direction, false)?;
            self.put_imm_field(other, imm_width);
            return Ok(());
        }

        self.put_std_ds("mov", 0b100010, rm, other.base.field(), size, direction, false)
    }

    /// MOVSX/MOVZX template.
    fn put_movx(&mut self, mnemonic: &'static str, opcode: u8, dst: &Location, src: &Location) -> Result {
        if !dst.is_simple() {
            return Err(Error::shape(mnemonic, "invalid destination operand"));
        }

        if src.size.bytes() >= dst.size.bytes() {
            return Err(Error::shape(mnemonic, "source must be narrower than the destination"));
        }

        // high-byte sources can't meet the REX the wide destination needs
        pair_size_movx_guard(mnemonic, dst, src)?;

        self.put_std(
            mnemonic,
            Self::pack_opcode_dw(opcode, true, src.size == OpSize::Word),
            src,
            dst.base.field(),
            dst.size,
            true,
        )
    }

    /// Shift/rotate template: by CL, by one, or by imm8.
    fn put_shift(&mut self, mnemonic: &'static str, dst: &Location, src: &Location, ext: u8) -> Result {
        let ext = RegField::raw(ext);

        if src.is_simple() && src.base == CL {
            return self.put_std_ds(mnemonic, 0b110100, dst, ext, dst.size, true, false);
        }

        if src.is_immediate() {
            let size = pair_size(mnemonic, src, dst)?;

            if src.offset == 1 {
                return self.put_std_ds(mnemonic, 0b110100, dst, ext, size, false, false);
            }

            self.set_suffix(1);
            self.put_std_ds(mnemonic, 0b110000, dst, ext, size, false, false)?;
            self.emit_imm(src.offset, 1);
            return Ok(());
        }

        Err(Error::shape(mnemonic, "invalid operands"))
    }

    /// SHLD/SHRD template: count in CL or as imm8.
    fn put_double_shift(
        &mut self,
        mnemonic: &'static str,
        opcode: u8,
        dst: &Location,
        src: &Location,
        count: &Location,
    ) -> Result {
        let size = pair_size(mnemonic, src, dst)?;

        if count.is_immediate() {
            self.set_suffix(1);
            self.put_std(mnemonic, opcode, dst, src.base.field(), size, true)?;
            self.emit_imm(count.offset, 1);
            return Ok(());
        }

        if count.is_simple() && count.base == CL {
            return self.put_std(mnemonic, opcode | 1, dst, src.base.field(), size, true);
        }

        Err(Error::shape(mnemonic, "invalid operands"))
    }

    /// Bit-test family template.
    fn put_btx(
        &mut self,
        mnemonic: &'static str,
        dst: &Location,
        src: &Location,
        opcode: u8,
        ext: u8,
    ) -> Result {
        let size = pair_size(mnemonic, dst, src)?;

        if size == OpSize::Byte {
            return Err(Error::shape(mnemonic, "byte register can't be used here"));
        }

        if dst.is_memreg() && src.is_simple() {
            return self.put_std_dw(mnemonic, opcode, dst, src.base.field(), size, true, true, true);
        }

        if dst.is_memreg() && src.is_immediate() {
            self.set_suffix(1);
            self.put_std(mnemonic, 0b1011_1010, dst, RegField::raw(ext), size, true)?;
            self.emit_imm(src.offset, 1);
            return Ok(());
        }

        Err(Error::shape(mnemonic, "invalid operands"))
    }

    /// Conditional jump template; always the long rel32 form.
    fn put_jx(&mut self, mnemonic: &'static str, dst: Location, lopcode: u8) -> Result {
        if !dst.is_jump_label() {
            return Err(Error::shape(mnemonic, "expected a label operand"));
        }
        self.open()?;
        let label = dst.label.clone().expect("jump label");
        self.emit(0x0F);
        self.emit(lopcode);
        self.put_label_field(&label, 4, dst.offset);
        Ok(())
    }

    /// Rel8 branch template shared by JECXZ and the LOOP family.
    fn put_rel8(&mut self, mnemonic: &'static str, dst: Location, opcode: u8) -> Result {
        if !dst.is_jump_label() {
            return Err(Error::shape(mnemonic, "expected a label operand"));
        }
        self.open()?;
        let label = dst.label.clone().expect("jump label");
        self.emit(opcode);
        self.put_label_field(&label, 1, dst.offset);
        Ok(())
    }

    /// Set-byte family template.
    fn put_setx(&mut self, mnemonic: &'static str, dst: &Location, cc: u8) -> Result {
        if !dst.is_memreg() || (!dst.is_indeterminate() && dst.size != OpSize::Byte) {
            return Err(Error::shape(mnemonic, "expected a byte register or memory operand"));
        }
        self.put_std(mnemonic, 0b1001_0000 | cc, dst, RegField::raw(0), OpSize::Byte, true)
    }

    /*
     * String block instructions (i386)
     */

    /// Repeat prefix.
    pub fn rep(&mut self) -> Result {
        self.fixed(&[0xF3])
    }

    /// Repeat while equal.
    pub fn repe(&mut self) -> Result {
        self.repz()
    }

    /// Repeat while zero.
    pub fn repz(&mut self) -> Result {
        self.fixed(&[0xF3])
    }

    /// Repeat while not equal.
    pub fn repne(&mut self) -> Result {
        self.repnz()
    }

    /// Repeat while not zero.
    pub fn repnz(&mut self) -> Result {
        self.fixed(&[0xF2])
    }

    /// Move byte from [RSI] to [RDI].
    pub fn movsb(&mut self) -> Result {
        self.fixed(&[INST_MOVS])
    }

    /// Move word from [RSI] to [RDI].
    pub fn movsw(&mut self) -> Result {
        self.fixed(&[0x66, INST_MOVS | 1])
    }

    /// Move dword from [RSI] to [RDI].
    pub fn movsd(&mut self) -> Result {
        self.fixed(&[INST_MOVS | 1])
    }

    /// Input byte from the port in DX into [RDI].
    pub fn insb(&mut self) -> Result {
        self.fixed(&[INST_INS])
    }

    /// Input word from the port in DX into [RDI].
    pub fn insw(&mut self) -> Result {
        self.fixed(&[0x66, INST_INS | 1])
    }

    /// Input dword from the port in DX into [RDI].
    pub fn insd(&mut self) -> Result {
        self.fixed(&[INST_INS | 1])
    }

    /// Output byte from [RSI] to the port in DX.
    pub fn outsb(&mut self) -> Result {
        self.fixed(&[INST_OUTS])
    }

    /// Output word from [RSI] to the port in DX.
    pub fn outsw(&mut self) -> Result {
        self.fixed(&[0x66, INST_OUTS | 1])
    }

    /// Output dword from [RSI] to the port in DX.
    pub fn outsd(&mut self) -> Result {
        self.fixed(&[INST_OUTS | 1])
    }

    /// Compare byte at [RSI] with byte at [RDI].
    pub fn cmpsb(&mut self) -> Result {
        self.fixed(&[INST_CMPS])
    }

    /// Compare word at [RSI] with word at [RDI].
    pub fn cmpsw(&mut self) -> Result {
        self.fixed(&[0x66, INST_CMPS | 1])
    }

    /// Compare dword at [RSI] with dword at [RDI].
    pub fn cmpsd(&mut self) -> Result {
        self.fixed(&[INST_CMPS | 1])
    }

    /// Compare AL with the byte at [RDI].
    pub fn scasb(&mut self) -> Result {
        self.fixed(&[INST_SCAS])
    }

    /// Compare AX with the word at [RDI].
    pub fn scasw(&mut self) -> Result {
        self.fixed(&[0x66, INST_SCAS | 1])
    }

    /// Compare EAX with the dword at [RDI].
    pub fn scasd(&mut self) -> Result {
        self.fixed(&[INST_SCAS | 1])
    }

    /// Load the byte at [RSI] into AL.
    pub fn lodsb(&mut self) -> Result {
        self.fixed(&[INST_LODS])
    }

    /// Load the word at [RSI] into AX.
    pub fn lodsw(&mut self) -> Result {
        self.fixed(&[0x66, INST_LODS | 1])
    }

    /// Load the dword at [RSI] into EAX.
    pub fn lodsd(&mut self) -> Result {
        self.fixed(&[INST_LODS | 1])
    }

    /// Store AL at [RDI].
    pub fn stosb(&mut self) -> Result {
        self.fixed(&[INST_STOS])
    }

    /// Store AX at [RDI].
    pub fn stosw(&mut self) -> Result {
        self.fixed(&[0x66, INST_STOS | 1])
    }

    /// Store EAX at [RDI].
    pub fn stosd(&mut self) -> Result {
        self.fixed(&[INST_STOS | 1])
    }

    /*
     * General instructions (i386)
     */

    /// Move.
    pub fn mov(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        // short form, VAL to REG
        if src.is_immediate() && dst.is_simple() {
            self.open()?;
            let width = dst.base.size.bytes();
            if !src.is_labeled() {
                check_imm_width(src.offset, width)?;
            }
            if dst.base.size == OpSize::Word {
                self.emit_operand_size_prefix();
            }
            if dst.base.is(RegFlags::REX) {
                self.emit_rex(dst.base.size == OpSize::Qword, false, false, dst.base.high() != 0);
            }
            self.emit(0b1011 << 4 | u8::from(dst.is_wide()) << 3 | dst.base.low());
            self.put_imm_field(&src, width);
            return Ok(());
        }

        // REG/MEM to REG
        if dst.is_simple() && src.is_memreg() {
            return self.put_mov_rm(&src, &dst, true);
        }

        // REG/VAL to REG/MEM
        if (src.is_immediate() || src.is_simple()) && dst.is_memreg() {
            let direction = src.is_immediate();
            return self.put_mov_rm(&dst, &src, direction);
        }

        Err(Error::shape("mov", "invalid operands"))
    }

    /// Move with sign extension.
    pub fn movsx(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_movx("movsx", 0b101111, &dst.into(), &src.into())
    }

    /// Move with zero extension.
    pub fn movzx(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_movx("movzx", 0b101101, &dst.into(), &src.into())
    }

    /// Load effective address. The source is the bare addressing
    /// expression, not a memory reference.
    pub fn lea(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let mut src = src.into();

        if src.reference {
            return Err(Error::shape("lea", "reference can't be used here"));
        }

        // addresses are at least 32 bits wide
        if dst.base.size.bytes() < OpSize::Dword.bytes() {
            return Err(Error::shape("lea", "destination must be a dword or qword register"));
        }

        if !dst.is_simple() {
            return Err(Error::shape("lea", "invalid operands"));
        }

        // encode the expression as its memory form
        src.reference = true;
        self.put_std("lea", 0x8D, &src, dst.base.field(), dst.base.size, false)
    }

    /// Exchange.
    pub fn xchg(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();
        let size = pair_size("xchg", &src, &dst)?;

        if dst.is_simple() && src.is_memreg() {
            return self.put_std_ds("xchg", 0b100001, &src, dst.base.field(), size, true, false);
        }

        if dst.is_memreg() && src.is_simple() {
            return self.put_std_ds("xchg", 0b100001, &dst, src.base.field(), size, true, false);
        }

        Err(Error::shape("xchg", "invalid operands"))
    }

    /// Push.
    pub fn push(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_immediate() {
            self.open()?;
            if src.is_labeled() {
                self.emit(0x68);
                self.put_imm_field(&src, 4);
                return Ok(());
            }

            let width = min_bytes(src.offset);
            if width == 1 {
                self.emit(0x6A);
                self.emit_imm(src.offset, 1);
            } else {
                if width > 4 {
                    return Err(Error::range("immediate exceeds destination width", src.offset));
                }
                self.emit(0x68);
                self.emit_imm(src.offset, 4);
            }
            return Ok(());
        }

        if src.is_indeterminate() {
            return Err(Error::shape("push", "operand can't be of indeterminate size"));
        }

        // push and pop ignore the wide flag, only 16- and 64-bit operands
        // can be encoded in long mode
        if src.size != OpSize::Word && src.size != OpSize::Qword {
            return Err(Error::shape("push", "byte/dword operand can't be used here"));
        }

        // short form
        if src.is_simple() {
            self.open()?;
            if src.base.size == OpSize::Word {
                self.emit_operand_size_prefix();
            }
            if src.base.high() != 0 {
                self.emit_rex(false, false, false, true);
            }
            self.emit(0b01010 << 3 | src.base.low());
            return Ok(());
        }

        if src.is_memory() {
            let size = if src.size == OpSize::Word { OpSize::Word } else { OpSize::Dword };
            return self.put_std("push", 0xFF, &src, RegField::raw(0b110), size, false);
        }

        Err(Error::shape("push", "invalid operand"))
    }

    /// Pop.
    pub fn pop(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if !dst.is_wide() {
            return Err(Error::shape("pop", "byte operand can't be used here"));
        }

        if dst.size != OpSize::Word && dst.size != OpSize::Qword {
            return Err(Error::shape("pop", "dword operand can't be used here"));
        }

        // short form
        if dst.is_simple() {
            self.open()?;
            if dst.base.size == OpSize::Word {
                self.emit_operand_size_prefix();
            }
            if dst.base.high() != 0 {
                self.emit_rex(false, false, false, true);
            }
            self.emit(0b01011 << 3 | dst.base.low());
            return Ok(());
        }

        if dst.is_memreg() {
            let size = if dst.size == OpSize::Word { OpSize::Word } else { OpSize::Dword };
            return self.put_std("pop", 0x8F, &dst, RegField::raw(0b000), size, false);
        }

        Err(Error::shape("pop", "invalid operand"))
    }

    /// Pop and discard, by bumping the stack pointer one slot.
    pub fn pop_discard(&mut self) -> Result {
        self.add(RSP, 8)
    }

    /// Increment.
    pub fn inc(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();
        if dst.is_memreg() {
            return self.put_std_ds("inc", 0b111111, &dst, RegField::raw(0b000), dst.size, true, false);
        }
        Err(Error::shape("inc", "invalid operand"))
    }

    /// Decrement.
    pub fn dec(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();
        if dst.is_memreg() {
            return self.put_std_ds("dec", 0b111111, &dst, RegField::raw(0b001), dst.size, true, false);
        }
        Err(Error::shape("dec", "invalid operand"))
    }

    /// Negate.
    pub fn neg(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();
        if dst.is_memreg() {
            return self.put_std_ds("neg", 0b111101, &dst, RegField::raw(0b011), dst.size, true, false);
        }
        Err(Error::shape("neg", "invalid operand"))
    }

    /// Invert.
    pub fn not(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();
        if dst.is_memreg() {
            return self.put_std_ds("not", 0b111101, &dst, RegField::raw(0b010), dst.size, true, false);
        }
        Err(Error::shape("not", "invalid operand"))
    }

    /// Add.
    pub fn add(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("add", &dst.into(), &src.into(), 0b000000, 0b000)
    }

    /// Add with carry.
    pub fn adc(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("adc", &dst.into(), &src.into(), 0b000100, 0b010)
    }

    /// Subtract.
    pub fn sub(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("sub", &dst.into(), &src.into(), 0b001010, 0b101)
    }

    /// Subtract with borrow.
    pub fn sbb(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("sbb", &dst.into(), &src.into(), 0b000110, 0b011)
    }

    /// Compare.
    pub fn cmp(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("cmp", &dst.into(), &src.into(), 0b001110, 0b111)
    }

    /// Binary and.
    pub fn and(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("and", &dst.into(), &src.into(), 0b001000, 0b100)
    }

    /// Binary or.
    pub fn or(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("or", &dst.into(), &src.into(), 0b000010, 0b001)
    }

    /// Binary xor.
    pub fn xor(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_tuple("xor", &dst.into(), &src.into(), 0b001100, 0b110)
    }

    /// Bit test.
    pub fn bt(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_btx("bt", &dst.into(), &src.into(), 0b101000, 0b100)
    }

    /// Bit test and set.
    pub fn bts(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_btx("bts", &dst.into(), &src.into(), 0b101010, 0b101)
    }

    /// Bit test and reset.
    pub fn btr(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_btx("btr", &dst.into(), &src.into(), 0b101100, 0b110)
    }

    /// Bit test and complement.
    pub fn btc(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_btx("btc", &dst.into(), &src.into(), 0b101110, 0b111)
    }

    /// Bit scan forward.
    pub fn bsf(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();
        let size = pair_size("bsf", &src, &dst)?;

        if size == OpSize::Byte {
            return Err(Error::shape("bsf", "byte operands can't be used here"));
        }

        if dst.is_simple() && src.is_memreg() {
            return self.put_std("bsf", 0xBC, &src, dst.base.field(), size, true);
        }

        Err(Error::shape("bsf", "invalid operands"))
    }

    /// Bit scan reverse.
    pub fn bsr(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();
        let size = pair_size("bsr", &src, &dst)?;

        if size == OpSize::Byte {
            return Err(Error::shape("bsr", "byte operands can't be used here"));
        }

        if dst.is_simple() && src.is_memreg() {
            return self.put_std("bsr", 0xBD, &src, dst.base.field(), size, true);
        }

        Err(Error::shape("bsr", "invalid operands"))
    }

    /// Unsigned multiply into the DX:AX pair.
    pub fn mul(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();
        if src.is_memreg() {
            return self.put_std_ds("mul", 0b111101, &src, RegField::raw(0b100), src.size, true, false);
        }
        Err(Error::shape("mul", "invalid operand"))
    }

    /// Signed multiply.
    pub fn imul(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        // accumulator short form
        if dst.is_simple()
            && src.is_memreg()
            && src.size == dst.size
            && dst.base.is(RegFlags::ACCUMULATOR)
        {
            let size = pair_size("imul", &src, &dst)?;
            return self.put_std_ds("imul", 0b111101, &src, RegField::raw(0b101), size, true, false);
        }

        if dst.is_simple() && src.is_memreg() && dst.base.size != OpSize::Byte {
            let size = pair_size("imul", &src, &dst)?;
            return self.put_std("imul", 0xAF, &src, dst.base.field(), size, true);
        }

        if dst.is_simple() && src.is_immediate() {
            let value = src.clone();
            return self.imul3(dst.clone(), dst, value);
        }

        Err(Error::shape("imul", "invalid operands"))
    }

    /// Signed multiply, three-operand imm8 form.
    pub fn imul3(
        &mut self,
        dst: impl Into<Location>,
        src: impl Into<Location>,
        value: impl Into<Location>,
    ) -> Result {
        let dst = dst.into();
        let src = src.into();
        let value = value.into();

        if dst.base.size == OpSize::Byte {
            return Err(Error::shape("imul", "byte register can't be used here"));
        }

        if dst.is_simple() && src.is_memreg() && value.is_immediate() {
            let size = pair_size("imul", &src, &dst)?;
            self.set_suffix(1);
            self.put_std_dw("imul", 0b011010, &src, dst.base.field(), size, true, true, false)?;
            self.emit_imm(value.offset, 1);
            return Ok(());
        }

        Err(Error::shape("imul", "invalid operands"))
    }

    /// Unsigned divide of the DX:AX pair.
    pub fn div(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();
        if src.is_memreg() {
            return self.put_std_ds("div", 0b111101, &src, RegField::raw(0b110), src.size, true, false);
        }
        Err(Error::shape("div", "invalid operand"))
    }

    /// Signed divide of the DX:AX pair.
    pub fn idiv(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();
        if src.is_memreg() {
            return self.put_std_ds("idiv", 0b111101, &src, RegField::raw(0b111), src.size, true, false);
        }
        Err(Error::shape("idiv", "invalid operand"))
    }

    /// Rotate left.
    pub fn rol(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("rol", &dst.into(), &src.into(), EXT_ROL)
    }

    /// Rotate right.
    pub fn ror(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("ror", &dst.into(), &src.into(), EXT_ROR)
    }

    /// Rotate left through carry.
    pub fn rcl(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("rcl", &dst.into(), &src.into(), EXT_RCL)
    }

    /// Rotate right through carry.
    pub fn rcr(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("rcr", &dst.into(), &src.into(), EXT_RCR)
    }

    /// Shift left.
    pub fn shl(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("shl", &dst.into(), &src.into(), EXT_SHL)
    }

    /// Shift right.
    pub fn shr(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("shr", &dst.into(), &src.into(), EXT_SHR)
    }

    /// Arithmetic shift left; identical to `shl`.
    pub fn sal(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("sal", &dst.into(), &src.into(), EXT_SHL)
    }

    /// Arithmetic shift right.
    pub fn sar(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        self.put_shift("sar", &dst.into(), &src.into(), EXT_SAR)
    }

    /// Double-precision shift left.
    pub fn shld(
        &mut self,
        dst: impl Into<Location>,
        src: impl Into<Location>,
        count: impl Into<Location>,
    ) -> Result {
        self.put_double_shift("shld", 0xA4, &dst.into(), &src.into(), &count.into())
    }

    /// Double-precision shift right.
    pub fn shrd(
        &mut self,
        dst: impl Into<Location>,
        src: impl Into<Location>,
        count: impl Into<Location>,
    ) -> Result {
        self.put_double_shift("shrd", 0xAC, &dst.into(), &src.into(), &count.into())
    }

    /// Unconditional jump. Labels already bound nearby take the rel8
    /// form, everything else the rel32 form.
    pub fn jmp(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_jump_label() {
            self.open()?;
            let label = dst.label.clone().expect("jump label");

            if let Ok(marker) = self.buffer.get_label(&label) {
                let current = self.buffer.current();
                if marker.section == current.section {
                    let displacement =
                        i64::from(marker.offset) - (i64::from(current.offset) + 2) + dst.offset;
                    if (-128..=127).contains(&displacement) {
                        self.emit(0xEB);
                        self.put_label_field(&label, 1, dst.offset);
                        return Ok(());
                    }
                }
            }

            self.emit(0xE9);
            self.put_label_field(&label, 4, dst.offset);
            return Ok(());
        }

        if dst.is_memreg() {
            // the operand size is fixed at 64 bits, no REX.W needed
            return self.put_std("jmp", 0xFF, &dst, RegField::raw(0b100), OpSize::Dword, false);
        }

        Err(Error::shape("jmp", "invalid operand"))
    }

    /// Procedure call.
    pub fn call(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_jump_label() {
            self.open()?;
            let label = dst.label.clone().expect("jump label");
            self.emit(0xE8);
            self.put_label_field(&label, 4, dst.offset);
            return Ok(());
        }

        if dst.is_memreg() {
            return self.put_std("call", 0xFF, &dst, RegField::raw(0b010), OpSize::Dword, false);
        }

        Err(Error::shape("call", "invalid operand"))
    }

    /*
     * Conditional jumps
     */

    /// Jump on overflow.
    pub fn jo(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jo", label.into(), 0x80)
    }

    /// Jump on not overflow.
    pub fn jno(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jno", label.into(), 0x81)
    }

    /// Jump on below.
    pub fn jb(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jb", label.into(), 0x82)
    }

    /// Jump on not below.
    pub fn jnb(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jnb", label.into(), 0x83)
    }

    /// Jump on equal.
    pub fn je(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("je", label.into(), 0x84)
    }

    /// Jump on not equal.
    pub fn jne(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jne", label.into(), 0x85)
    }

    /// Jump on below or equal.
    pub fn jbe(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jbe", label.into(), 0x86)
    }

    /// Jump on not below or equal.
    pub fn jnbe(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jnbe", label.into(), 0x87)
    }

    /// Jump on sign.
    pub fn js(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("js", label.into(), 0x88)
    }

    /// Jump on not sign.
    pub fn jns(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jns", label.into(), 0x89)
    }

    /// Jump on parity.
    pub fn jp(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jp", label.into(), 0x8A)
    }

    /// Jump on not parity.
    pub fn jnp(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jnp", label.into(), 0x8B)
    }

    /// Jump on less.
    pub fn jl(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jl", label.into(), 0x8C)
    }

    /// Jump on not less.
    pub fn jnl(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jnl", label.into(), 0x8D)
    }

    /// Jump on less or equal.
    pub fn jle(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jle", label.into(), 0x8E)
    }

    /// Jump on not less or equal.
    pub fn jnle(&mut self, label: impl Into<Location>) -> Result {
        self.put_jx("jnle", label.into(), 0x8F)
    }

    /// Alias of `jb`, jump on carry.
    pub fn jc(&mut self, label: impl Into<Location>) -> Result {
        self.jb(label)
    }

    /// Alias of `jnb`, jump on not carry.
    pub fn jnc(&mut self, label: impl Into<Location>) -> Result {
        self.jnb(label)
    }

    /// Alias of `jb`, jump on not above or equal.
    pub fn jnae(&mut self, label: impl Into<Location>) -> Result {
        self.jb(label)
    }

    /// Alias of `jnb`, jump on above or equal.
    pub fn jae(&mut self, label: impl Into<Location>) -> Result {
        self.jnb(label)
    }

    /// Alias of `je`, jump on zero.
    pub fn jz(&mut self, label: impl Into<Location>) -> Result {
        self.je(label)
    }

    /// Alias of `jne`, jump on not zero.
    pub fn jnz(&mut self, label: impl Into<Location>) -> Result {
        self.jne(label)
    }

    /// Alias of `jbe`, jump on not above.
    pub fn jna(&mut self, label: impl Into<Location>) -> Result {
        self.jbe(label)
    }

    /// Alias of `jnbe`, jump on above.
    pub fn ja(&mut self, label: impl Into<Location>) -> Result {
        self.jnbe(label)
    }

    /// Alias of `jp`, jump on parity even.
    pub fn jpe(&mut self, label: impl Into<Location>) -> Result {
        self.jp(label)
    }

    /// Alias of `jnp`, jump on parity odd.
    pub fn jpo(&mut self, label: impl Into<Location>) -> Result {
        self.jnp(label)
    }

    /// Alias of `jl`, jump on not greater or equal.
    pub fn jnge(&mut self, label: impl Into<Location>) -> Result {
        self.jl(label)
    }

    /// Alias of `jnl`, jump on greater or equal.
    pub fn jge(&mut self, label: impl Into<Location>) -> Result {
        self.jnl(label)
    }

    /// Alias of `jle`, jump on not greater.
    pub fn jng(&mut self, label: impl Into<Location>) -> Result {
        self.jle(label)
    }

    /// Alias of `jnle`, jump on greater.
    pub fn jg(&mut self, label: impl Into<Location>) -> Result {
        self.jnle(label)
    }

    /// Jump on CX zero.
    pub fn jcxz(&mut self, label: impl Into<Location>) -> Result {
        self.open()?;
        self.emit_address_size_prefix();
        self.put_rel8("jcxz", label.into(), 0xE3)
    }

    /// Jump on ECX zero.
    pub fn jecxz(&mut self, label: impl Into<Location>) -> Result {
        self.put_rel8("jecxz", label.into(), 0xE3)
    }

    /// Decrement RCX and loop while nonzero.
    pub fn loop_(&mut self, label: impl Into<Location>) -> Result {
        self.put_rel8("loop", label.into(), 0xE2)
    }

    /// Loop while equal.
    pub fn loope(&mut self, label: impl Into<Location>) -> Result {
        self.loopz(label)
    }

    /// Loop while zero.
    pub fn loopz(&mut self, label: impl Into<Location>) -> Result {
        self.put_rel8("loopz", label.into(), 0xE1)
    }

    /// Loop while not equal.
    pub fn loopne(&mut self, label: impl Into<Location>) -> Result {
        self.loopnz(label)
    }

    /// Loop while not zero.
    pub fn loopnz(&mut self, label: impl Into<Location>) -> Result {
        self.put_rel8("loopnz", label.into(), 0xE0)
    }

    /*
     * Set-byte family
     */

    /// Set byte on overflow.
    pub fn seto(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("seto", &dst.into(), 0)
    }

    /// Set byte on not overflow.
    pub fn setno(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setno", &dst.into(), 1)
    }

    /// Set byte on below.
    pub fn setb(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setb", &dst.into(), 2)
    }

    /// Set byte on not below.
    pub fn setnb(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setnb", &dst.into(), 3)
    }

    /// Set byte on equal.
    pub fn sete(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("sete", &dst.into(), 4)
    }

    /// Set byte on not equal.
    pub fn setne(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setne", &dst.into(), 5)
    }

    /// Set byte on below or equal.
    pub fn setbe(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setbe", &dst.into(), 6)
    }

    /// Set byte on not below or equal.
    pub fn setnbe(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setnbe", &dst.into(), 7)
    }

    /// Set byte on sign.
    pub fn sets(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("sets", &dst.into(), 8)
    }

    /// Set byte on not sign.
    pub fn setns(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setns", &dst.into(), 9)
    }

    /// Set byte on parity.
    pub fn setp(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setp", &dst.into(), 10)
    }

    /// Set byte on not parity.
    pub fn setnp(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setnp", &dst.into(), 11)
    }

    /// Set byte on less.
    pub fn setl(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setl", &dst.into(), 12)
    }

    /// Set byte on not less.
    pub fn setnl(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setnl", &dst.into(), 13)
    }

    /// Set byte on less or equal.
    pub fn setle(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setle", &dst.into(), 14)
    }

    /// Set byte on not less or equal.
    pub fn setnle(&mut self, dst: impl Into<Location>) -> Result {
        self.put_setx("setnle", &dst.into(), 15)
    }

    /// Alias of `setb`, set byte on carry.
    pub fn setc(&mut self, dst: impl Into<Location>) -> Result {
        self.setb(dst)
    }

    /// Alias of `setnb`, set byte on not carry.
    pub fn setnc(&mut self, dst: impl Into<Location>) -> Result {
        self.setnb(dst)
    }

    /// Alias of `setb`, set byte on not above or equal.
    pub fn setnae(&mut self, dst: impl Into<Location>) -> Result {
        self.setb(dst)
    }

    /// Alias of `setnb`, set byte on above or equal.
    pub fn setae(&mut self, dst: impl Into<Location>) -> Result {
        self.setnb(dst)
    }

    /// Alias of `sete`, set byte on zero.
    pub fn setz(&mut self, dst: impl Into<Location>) -> Result {
        self.sete(dst)
    }

    /// Alias of `setne`, set byte on not zero.
    pub fn setnz(&mut self, dst: impl Into<Location>) -> Result {
        self.setne(dst)
    }

    /// Alias of `setbe`, set byte on not above.
    pub fn setna(&mut self, dst: impl Into<Location>) -> Result {
        self.setbe(dst)
    }

    /// Alias of `setnbe`, set byte on above.
    pub fn seta(&mut self, dst: impl Into<Location>) -> Result {
        self.setnbe(dst)
    }

    /// Alias of `setp`, set byte on parity even.
    pub fn setpe(&mut self, dst: impl Into<Location>) -> Result {
        self.setp(dst)
    }

    /// Alias of `setnp`, set byte on parity odd.
    pub fn setpo(&mut self, dst: impl Into<Location>) -> Result {
        self.setnp(dst)
    }

    /// Alias of `setl`, set byte on not greater or equal.
    pub fn setnge(&mut self, dst: impl Into<Location>) -> Result {
        self.setl(dst)
    }

    /// Alias of `setnl`, set byte on greater or equal.
    pub fn setge(&mut self, dst: impl Into<Location>) -> Result {
        self.setnl(dst)
    }

    /// Alias of `setle`, set byte on not greater.
    pub fn setng(&mut self, dst: impl Into<Location>) -> Result {
        self.setle(dst)
    }

    /// Alias of `setnle`, set byte on greater.
    pub fn setg(&mut self, dst: impl Into<Location>) -> Result {
        self.setnle(dst)
    }

    /*
     * Flags, interrupts and miscellaneous
     */

    /// Software interrupt; `int 3` takes the one-byte breakpoint form.
    pub fn int(&mut self, vector: impl Into<Location>) -> Result {
        let vector = vector.into();

        if !vector.is_immediate() {
            return Err(Error::shape("int", "invalid operand"));
        }

        if vector.offset == 3 {
            return self.fixed(&[0xCC]);
        }

        self.fixed(&[0xCD, vector.offset as u8])
    }

    /// Interrupt on overflow.
    pub fn into(&mut self) -> Result {
        self.fixed(&[0xCE])
    }

    /// Return from interrupt.
    pub fn iret(&mut self) -> Result {
        self.fixed(&[0xCF])
    }

    /// No operation.
    pub fn nop(&mut self) -> Result {
        self.fixed(&[0x90])
    }

    /// Halt.
    pub fn hlt(&mut self) -> Result {
        self.fixed(&[0xF4])
    }

    /// Wait for pending FPU exceptions.
    pub fn wait(&mut self) -> Result {
        self.fixed(&[0x9B])
    }

    /// Undefined instruction.
    pub fn ud2(&mut self) -> Result {
        self.fixed(&[0x0F, 0x0B])
    }

    /// Enter procedure frame.
    pub fn enter(&mut self, alloc: impl Into<Location>, nesting: impl Into<Location>) -> Result {
        let alloc = alloc.into();
        let nesting = nesting.into();

        if alloc.is_immediate() && nesting.is_immediate() {
            self.open()?;
            self.emit(0xC8);
            self.emit_imm(alloc.offset, 2);
            self.emit_imm(nesting.offset, 1);
            return Ok(());
        }

        Err(Error::shape("enter", "invalid operands"))
    }

    /// Leave procedure frame.
    pub fn leave(&mut self) -> Result {
        self.fixed(&[0xC9])
    }

    /// Push all general registers.
    pub fn pusha(&mut self) -> Result {
        self.fixed(&[0x60])
    }

    /// Pop all general registers.
    pub fn popa(&mut self) -> Result {
        self.fixed(&[0x61])
    }

    /// Push the flags register.
    pub fn pushfd(&mut self) -> Result {
        self.fixed(&[0x9C])
    }

    /// Pop the flags register.
    pub fn popfd(&mut self) -> Result {
        self.fixed(&[0x9D])
    }

    /// Push the 16-bit flags register.
    pub fn pushf(&mut self) -> Result {
        self.fixed(&[0x66, 0x9C])
    }

    /// Pop the 16-bit flags register.
    pub fn popf(&mut self) -> Result {
        self.fixed(&[0x66, 0x9D])
    }

    /// Clear the carry flag.
    pub fn clc(&mut self) -> Result {
        self.fixed(&[0xF8])
    }

    /// Set the carry flag.
    pub fn stc(&mut self) -> Result {
        self.fixed(&[0xF9])
    }

    /// Complement the carry flag.
    pub fn cmc(&mut self) -> Result {
        self.fixed(&[0xF5])
    }

    /// Clear the direction flag.
    pub fn cld(&mut self) -> Result {
        self.fixed(&[0xFC])
    }

    /// Set the direction flag.
    pub fn std(&mut self) -> Result {
        self.fixed(&[0xFD])
    }

    /// Clear the interrupt flag.
    pub fn cli(&mut self) -> Result {
        self.fixed(&[0xFA])
    }

    /// Set the interrupt flag.
    pub fn sti(&mut self) -> Result {
        self.fixed(&[0xFB])
    }

    /// Store AH into flags.
    pub fn sahf(&mut self) -> Result {
        self.fixed(&[0x9E])
    }

    /// Load status flags into AH.
    pub fn lahf(&mut self) -> Result {
        self.fixed(&[0x9F])
    }

    /// ASCII adjust after addition.
    pub fn aaa(&mut self) -> Result {
        self.fixed(&[0x37])
    }

    /// Decimal adjust after addition.
    pub fn daa(&mut self) -> Result {
        self.fixed(&[0x3F])
    }

    /// ASCII adjust after subtraction.
    pub fn aas(&mut self) -> Result {
        self.fixed(&[0x27])
    }

    /// Decimal adjust after subtraction.
    pub fn das(&mut self) -> Result {
        self.fixed(&[0x2F])
    }

    /// Sign-extend AL into AX.
    pub fn cbw(&mut self) -> Result {
        self.fixed(&[0x98])
    }

    /// Sign-extend AX into DX:AX.
    pub fn cwd(&mut self) -> Result {
        self.fixed(&[0x99])
    }

    /// Table look-up translation.
    pub fn xlat(&mut self) -> Result {
        self.fixed(&[0xD7])
    }

    /// Input from an I/O port into the accumulator.
    pub fn in_(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if !dst.is_simple() || !(dst.base == EAX || dst.base == AX || dst.base == AL) {
            return Err(Error::shape("in", "destination must be EAX, AX or AL"));
        }

        self.open()?;

        if dst.size == OpSize::Word {
            self.emit_operand_size_prefix();
        }

        if src.is_immediate() {
            self.emit(0b1110_0100 | u8::from(dst.is_wide()));
            self.emit_imm(src.offset, 1);
            return Ok(());
        }

        if src.is_simple() && src.base == DX {
            self.emit(0b1110_1100 | u8::from(dst.is_wide()));
            return Ok(());
        }

        Err(Error::shape("in", "source must be an immediate port or DX"))
    }

    /// Output from the accumulator to an I/O port.
    pub fn out(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if !src.is_simple() || !(src.base == EAX || src.base == AX || src.base == AL) {
            return Err(Error::shape("out", "source must be EAX, AX or AL"));
        }

        self.open()?;

        if src.size == OpSize::Word {
            self.emit_operand_size_prefix();
        }

        if dst.is_immediate() {
            self.emit(0b1110_0110 | u8::from(src.is_wide()));
            self.emit_imm(dst.offset, 1);
            return Ok(());
        }

        if dst.is_simple() && dst.base == DX {
            self.emit(0b1110_1110 | u8::from(src.is_wide()));
            return Ok(());
        }

        Err(Error::shape("out", "destination must be an immediate port or DX"))
    }

    /// Non-destructive AND, sets flags only.
    pub fn test(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if src.is_memreg() && dst.is_simple() {
            let size = pair_size("test", &src, &dst)?;
            return self.put_std_ds("test", 0b100001, &src, dst.base.field(), size, false, false);
        }

        if src.is_simple() && dst.is_memory() {
            let size = pair_size("test", &src, &dst)?;
            return self.put_std_ds("test", 0b100001, &dst, src.base.field(), size, false, false);
        }

        // accumulator short forms
        if (src.is_accum() && dst.is_immediate()) || (src.is_immediate() && dst.is_accum()) {
            let (acc, imm) = if src.is_accum() { (&src, &dst) } else { (&dst, &src) };
            self.open()?;
            let width = acc.size.bytes().min(4);
            check_imm_width(imm.offset, width)?;
            if acc.size == OpSize::Word {
                self.emit_operand_size_prefix();
            }
            if acc.size == OpSize::Qword {
                self.emit_rex(true, false, false, false);
            }
            self.emit(0b1010_1000 | u8::from(acc.is_wide()));
            self.emit_imm(imm.offset, width);
            return Ok(());
        }

        // generic F6/F7 /0 form, immediate trailing the ModRM group
        let (rm, imm) = if src.is_immediate() && dst.is_memreg() {
            (&dst, &src)
        } else if src.is_memreg() && dst.is_immediate() {
            (&src, &dst)
        } else {
            return Err(Error::shape("test", "invalid operands"));
        };

        let size = pair_size("test", rm, imm)?;
        let width = size.bytes().min(4);
        check_imm_width(imm.offset, width)?;
        self.set_suffix(width);
        self.put_std_ds("test", 0b111101, rm, RegField::raw(0b000), size, true, false)?;
        self.emit_imm(imm.offset, width);
        Ok(())
    }

    /// Return from procedure.
    pub fn ret(&mut self) -> Result {
        self.fixed(&[0xC3])
    }

    /// Return from procedure and release `bytes` of stack arguments.
    pub fn ret_pop(&mut self, bytes: impl Into<Location>) -> Result {
        let bytes = bytes.into();

        if !bytes.is_immediate() {
            return Err(Error::shape("ret", "invalid operand"));
        }

        if bytes.offset == 0 {
            return self.ret();
        }

        self.open()?;
        self.emit(0xC2);
        self.emit_imm(bytes.offset, 2);
        Ok(())
    }

    /*
     * i486
     */

    /// Exchange and add.
    pub fn xadd(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();
        let size = pair_size("xadd", &dst, &src)?;

        if dst.is_memreg() && src.is_simple() {
            return self.put_std_ds("xadd", 0xC0 >> 2, &dst, src.base.field(), size, false, true);
        }

        Err(Error::shape("xadd", "invalid operands"))
    }

    /// Byte swap.
    pub fn bswap(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if !dst.is_simple() {
            return Err(Error::shape("bswap", "only a register can be used here"));
        }

        if dst.size != OpSize::Dword && dst.size != OpSize::Qword {
            return Err(Error::shape("bswap", "expected a dword or qword register"));
        }

        self.open()?;

        if dst.size == OpSize::Qword || dst.base.high() != 0 {
            self.emit_rex(dst.size == OpSize::Qword, false, false, dst.base.high() != 0);
        }

        self.emit(0x0F);
        self.emit(0xC8 | dst.base.low());
        Ok(())
    }

    /// Invalidate internal caches.
    pub fn invd(&mut self) -> Result {
        self.fixed(&[0x0F, 0x08])
    }

    /// Write back and invalidate caches.
    pub fn wbinvd(&mut self) -> Result {
        self.fixed(&[0x0F, 0x09])
    }

    /// Compare and exchange.
    pub fn cmpxchg(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();
        let size = pair_size("cmpxchg", &dst, &src)?;

        if dst.is_memreg() && src.is_simple() {
            return self.put_std_ds("cmpxchg", 0xB0 >> 2, &dst, src.base.field(), size, false, true);
        }

        Err(Error::shape("cmpxchg", "invalid operands"))
    }

    /*
     * x86-64
     */

    /// Sign-extend RAX into RDX:RAX.
    pub fn cqo(&mut self) -> Result {
        self.fixed(&[0x48, 0x99])
    }

    /// Swap the GS base register.
    pub fn swapgs(&mut self) -> Result {
        self.fixed(&[0x0F, 0x01, 0xF8])
    }

    /// Read a model-specific register.
    pub fn rdmsr(&mut self) -> Result {
        self.fixed(&[0x0F, 0x32])
    }

    /// Write a model-specific register.
    pub fn wrmsr(&mut self) -> Result {
        self.fixed(&[0x0F, 0x30])
    }

    /// Fast system call.
    pub fn syscall(&mut self) -> Result {
        self.fixed(&[0x0F, 0x05])
    }

    /// Return from a fast system call into long mode.
    pub fn sysretl(&mut self) -> Result {
        self.fixed(&[0x48, 0x0F, 0x07])
    }

    /// Return from a fast system call into compatibility mode.
    pub fn sysretc(&mut self) -> Result {
        self.fixed(&[0x0F, 0x07])
    }
}

/// MOVSX/MOVZX cross the register files: a high-byte source cannot meet
/// the REX prefix an extended destination requires.
fn pair_size_movx_guard(
    mnemonic: &'static str,
    dst: &Location,
    src: &Location,
) -> crate::Result<()> {
    let high = src.base.is(RegFlags::HIGH_BYTE) || dst.base.is(RegFlags::HIGH_BYTE);
    let rex = src.base.is(RegFlags::REX) || dst.base.is(RegFlags::REX);
    if high && rex {
        return Err(Error::register(
            mnemonic,
            "can't use a high byte register in the same instruction as an extended register",
        ));
    }
    Ok(())
}

/// Build an `ST(i)` operand for the x87 stack instructions.
pub fn st(index: i64) -> Location {
    Location::from(super::regs::ST) + index
}
