//! x86-64 encoding core: prefixes, ModRM/SIB, displacement and immediate
//! emission.

use super::args::{
    Location, MOD_BYTE, MOD_NONE, MOD_SHORT, NO_BASE, NO_SIB_INDEX, OpSize, RM_SIB, RegField,
    RegFlags,
};
use super::regs::UNSET;
use crate::buffer::{DataSink, SectionFlags, SegmentedBuffer, Visibility};
use crate::error::Error;
use crate::isa::Machine;
use crate::label::Label;
use crate::reloc::Fixup;

/// The x86-64 instruction writer.
///
/// One method per mnemonic; each validates its operands and either emits
/// the final bytes or registers a relocation for labelled fields.
pub struct Assembler<'a> {
    pub(super) buffer: &'a mut SegmentedBuffer,
    /// Number of immediate bytes the current instruction will still emit
    /// after the ModRM/SIB group; RIP-relative displacements subtract it
    /// so they reference the end of the whole instruction.
    suffix: u8,
}

impl<'a> Assembler<'a> {
    pub fn new(buffer: &'a mut SegmentedBuffer) -> Assembler<'a> {
        buffer.machine = Machine::X86_64;
        Assembler { buffer, suffix: 0 }
    }

    /// Select or create an output section.
    pub fn section(&mut self, flags: SectionFlags, name: Option<&str>) {
        self.buffer.use_section(flags, name);
    }

    /// Bind a label at the current position.
    pub fn label(&mut self, label: &Label) -> Result<(), Error> {
        self.buffer.add_label(label)
    }

    /// Record an export symbol.
    pub fn export(&mut self, label: &Label, visibility: Visibility, size: u64) {
        self.buffer.add_export(label, visibility, size);
    }

    /*
     * Prefix and field primitives
     */

    pub(super) fn emit(&mut self, byte: u8) {
        self.buffer.push(byte);
    }

    /// Emit a fixed byte sequence, checking the seal first; the path taken
    /// by every no-operand instruction.
    pub(super) fn fixed(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.open()?;
        self.buffer.insert(bytes);
        Ok(())
    }

    pub(super) fn open(&self) -> Result<(), Error> {
        if self.buffer.is_sealed() {
            return Err(Error::SealViolation);
        }
        Ok(())
    }

    //   7 6 5 4   3   2   1   0
    // + ------- + - + - + - + - +
    // | 0 1 0 0 | W | R | X | B |
    // + ------- + - + - + - + - +
    //
    // A REX prefix with no flag bits still affects the encoding: the
    // high-byte registers become unreachable in favor of SPL/BPL/SIL/DIL.
    pub(super) fn emit_rex(&mut self, w: bool, r: bool, x: bool, b: bool) {
        self.emit(
            0b0100_0000
                | u8::from(w) << 3
                | u8::from(r) << 2
                | u8::from(x) << 1
                | u8::from(b),
        );
    }

    //   7 6   5 4 3   2 1 0
    // + --- + ----- + ----- +
    // | mod | reg   | r/m   |
    // + --- + ----- + ----- +
    //
    // mod=11 treats r/m as a plain register; anything else makes it a
    // pointer, with mod selecting the displacement width. r/m=100 with
    // mod!=11 introduces a SIB byte.
    pub(super) fn emit_modrm(&mut self, mode: u8, reg: u8, rm: u8) {
        debug_assert!(mode < 4 && reg < 8 && rm < 8);
        self.emit(mode << 6 | reg << 3 | rm);
    }

    //   7 6   5 4 3   2 1 0
    // + --- + ----- + ----- +
    // | ss  | index | base  |
    // + --- + ----- + ----- +
    //
    // index=100 with ss=00 omits the index register.
    pub(super) fn emit_sib(&mut self, scale: u8, index: u8, base: u8) {
        debug_assert!(scale < 4 && index < 8 && base < 8);
        self.emit(scale << 6 | index << 3 | base);
    }

    /// Pack the direction and wide bits into the low end of an opcode.
    /// d=1 means reg ⇐ r/m; w selects the wide register file.
    pub(super) fn pack_opcode_dw(opcode: u8, direction: bool, wide: bool) -> u8 {
        opcode << 2 | u8::from(direction) << 1 | u8::from(wide)
    }

    /// Override the default 32-bit operand size down to 16 bits.
    pub(super) fn emit_operand_size_prefix(&mut self) {
        self.emit(0x66);
    }

    /// Override the default 64-bit address size down to 32 bits.
    pub(super) fn emit_address_size_prefix(&mut self) {
        self.emit(0x67);
    }

    pub(super) fn emit_imm(&mut self, value: i64, width: u8) {
        let width = usize::from(width.min(8));
        self.buffer.insert(&value.to_le_bytes()[..width]);
    }

    /*
     * Label fields
     */

    /// Reserve a PC-relative field of `width` bytes referencing `label`;
    /// the resolved displacement is relative to the end of the field.
    pub(super) fn put_label_field(&mut self, label: &Label, width: u8, addend: i64) {
        let width = width.min(8);
        self.buffer
            .add_linkage(label, 0, Fixup::Rel { width }, addend - i64::from(width));
        self.buffer.fill(usize::from(width), 0);
    }

    /// Emit an immediate, registering an absolute relocation when the
    /// operand carries a label.
    pub(super) fn put_imm_field(&mut self, imm: &Location, width: u8) {
        let width = width.min(8);
        if let Some(label) = imm.label.clone() {
            self.buffer
                .add_linkage(&label, 0, Fixup::Abs { width }, imm.offset);
        }
        self.emit_imm(imm.offset, width);
    }

    /*
     * RIP-relative suffix counter
     */

    pub(super) fn set_suffix(&mut self, bytes: u8) {
        self.suffix = bytes;
    }

    fn take_suffix(&mut self) -> u8 {
        std::mem::replace(&mut self.suffix, 0)
    }

    /*
     * The standard ModRM/SIB emission path
     */

    /// Encode a 'standard' ModRM/SIB instruction with REX and size
    /// prefixes. `rm` is the register-or-memory operand, `reg` the ModRM
    /// reg field (a register or an opcode extension), `longer` prepends
    /// the two-byte-opcode escape `0F`.
    pub(super) fn put_std(
        &mut self,
        mnemonic: &'static str,
        opcode: u8,
        rm: &Location,
        reg: RegField,
        size: OpSize,
        longer: bool,
    ) -> Result<(), Error> {
        self.open()?;

        // always take the suffix so it clears even when unused
        let suffix = i64::from(self.take_suffix());

        if size == OpSize::Unset {
            return Err(Error::shape(mnemonic, "unable to deduce operand size"));
        }

        // both operands are assumed to share the size at this point
        if size == OpSize::Word {
            self.emit_operand_size_prefix();
        }

        // pick the address-size class from the addressing registers
        if rm.is_memory() {
            let mut address_size = OpSize::Unset;

            if rm.base != UNSET {
                address_size = rm.base.size;
            }

            if rm.index != UNSET {
                // [eax + edx] and [rax + rdx] are fine, [eax + rdx] is not
                if address_size != OpSize::Unset && address_size != rm.index.size {
                    return Err(Error::shape(mnemonic, "inconsistent address size used"));
                }
                address_size = rm.index.size;
            }

            if address_size == OpSize::Dword {
                self.emit_address_size_prefix();
            } else if address_size != OpSize::Unset && address_size != OpSize::Qword {
                // long mode accepts only 32- and 64-bit addressing
                return Err(Error::shape(mnemonic, "invalid address size"));
            }
        }

        // plain register-to-register form
        if rm.is_simple() {
            if reg.rex || rm.base.is(RegFlags::REX) || size == OpSize::Qword {
                self.emit_rex(
                    size == OpSize::Qword,
                    reg.is_extended(),
                    false,
                    rm.base.high() != 0,
                );
            }

            if longer {
                self.emit(0x0F);
            }

            self.emit(opcode);
            self.emit_modrm(MOD_SHORT, reg.low(), rm.base.low());
            return Ok(());
        }

        // this is where the fun begins ...
        let mut sib_scale = rm.ss_flag();
        let mut sib_index = rm.index.enc;
        let mut sib_base = rm.base.enc;
        let mut mrm_mod = rm.mod_flag();
        let mut mrm_mem = rm.base.enc;
        let mut rip_relative = false;

        // mod usually dictates the displacement width, with exceptions
        // handled below
        let mut disp_width = match mrm_mod {
            MOD_NONE => 0u8,
            MOD_BYTE => 1,
            _ => 4,
        };

        if rm.base == UNSET && rm.index == UNSET {
            mrm_mod = MOD_NONE;

            if rm.is_labeled() {
                // [RIP + disp32] carries absolute label references in
                // long mode
                mrm_mem = NO_BASE;
                rip_relative = true;
            } else {
                // a direct virtual address needs SIB with base=none,
                // index=none
                mrm_mem = RM_SIB;
                sib_base = NO_BASE;
                sib_index = NO_SIB_INDEX;
                sib_scale = 0;
            }

            disp_width = 4;
        } else if rm.base.is_ebp_like() && mrm_mod == MOD_NONE && rm.index == UNSET {
            // [EBP/RBP/R13] has to be encoded as [base + 0]
            mrm_mod = MOD_BYTE;
            disp_width = 1;
        } else if rm.base.is_esp_like() || rm.is_indexed() {
            mrm_mem = RM_SIB;

            // [EBP/RBP/R13 + index] also needs the zero displacement
            if rm.base.is_ebp_like() && mrm_mod == MOD_NONE {
                mrm_mod = MOD_BYTE;
                disp_width = 1;
            }

            // no base: SIB base=101 with mod=00 and a 32-bit displacement
            if rm.base == UNSET {
                sib_base = NO_BASE;
                mrm_mod = MOD_NONE;
                disp_width = 4;
            }

            // no index: SIB index=100 with ss=00
            if rm.index == UNSET {
                sib_index = NO_SIB_INDEX;
                sib_scale = 0;
            }
        }

        if size == OpSize::Qword || reg.rex || (sib_index & 0b1000 != 0) || (sib_base & 0b1000 != 0)
        {
            self.emit_rex(
                size == OpSize::Qword,
                reg.is_extended(),
                sib_index & 0b1000 != 0,
                (mrm_mem | sib_base) & 0b1000 != 0,
            );
        }

        if longer {
            self.emit(0x0F);
        }

        self.emit(opcode);
        self.emit_modrm(mrm_mod, reg.low(), mrm_mem & 0b111);

        if mrm_mem == RM_SIB {
            self.emit_sib(sib_scale, sib_index & 0b111, sib_base & 0b111);
        }

        if disp_width != 0 {
            if rip_relative {
                // the displacement references the end of the whole
                // instruction, including any trailing immediate
                let label = rm.label.clone().expect("rip-relative requires a label");
                self.put_label_field(&label, 4, rm.offset - suffix);
                return Ok(());
            }

            self.put_imm_field(rm, disp_width);
        }

        Ok(())
    }

    /// `put_std` with explicit direction and wide bits.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn put_std_dw(
        &mut self,
        mnemonic: &'static str,
        opcode: u8,
        rm: &Location,
        reg: RegField,
        size: OpSize,
        direction: bool,
        wide: bool,
        longer: bool,
    ) -> Result<(), Error> {
        self.put_std(
            mnemonic,
            Self::pack_opcode_dw(opcode, direction, wide),
            rm,
            reg,
            size,
            longer,
        )
    }

    /// `put_std_dw` deducing the wide bit from the operand size.
    #[allow(clippy::too_many_arguments)]
    pub(super) fn put_std_ds(
        &mut self,
        mnemonic: &'static str,
        opcode: u8,
        rm: &Location,
        reg: RegField,
        size: OpSize,
        direction: bool,
        longer: bool,
    ) -> Result<(), Error> {
        self.put_std_dw(
            mnemonic,
            opcode,
            rm,
            reg,
            size,
            direction,
            size != OpSize::Byte,
            longer,
        )
    }

    /// Two-byte x87 form addressing a stack register.
    pub(super) fn put_fpu(&mut self, opcode: u8, base: u8, sti: u8) -> Result<(), Error> {
        self.fixed(&[opcode, base + sti])
    }

    /// x87 memory form; takes no operand-size prefixes, the opcode fully
    /// determines the access width.
    pub(super) fn put_fpu_mem(
        &mut self,
        mnemonic: &'static str,
        opcode: u8,
        rm: &Location,
        ext: u8,
    ) -> Result<(), Error> {
        self.put_std(mnemonic, opcode, rm, RegField::raw(ext), OpSize::Dword, false)
    }
}

impl DataSink for Assembler<'_> {
    fn buffer_mut(&mut self) -> &mut SegmentedBuffer {
        self.buffer
    }
}

/// Minimal number of bytes that hold `value` as a signed quantity.
pub(super) fn min_bytes(value: i64) -> u8 {
    if i8::try_from(value).is_ok() {
        1
    } else if i16::try_from(value).is_ok() {
        2
    } else if i32::try_from(value).is_ok() {
        4
    } else {
        8
    }
}

/// Check that an immediate fits its destination width, either as a signed
/// or as an unsigned quantity.
pub(super) fn check_imm_width(value: i64, width: u8) -> Result<(), Error> {
    if width >= 8 {
        return Ok(());
    }
    let bits = u32::from(width) * 8;
    let fits_signed = value >= -(1i64 << (bits - 1)) && value < (1i64 << (bits - 1));
    let fits_unsigned = (value as u64) < (1u64 << bits);
    if fits_signed || fits_unsigned {
        Ok(())
    } else {
        Err(Error::range("immediate exceeds destination width", value))
    }
}
