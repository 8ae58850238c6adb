//! Byte-exact emission tests for the AArch64 back-end.

use super::args::{Cond, ExtendOp, SP, ShiftOp, XZR, w, x};
use super::emit::Assembler;
use crate::buffer::{DataSink, SegmentedBuffer};
use crate::error::Error;
use crate::label::Label;

fn collect(build: impl FnOnce(&mut Assembler<'_>)) -> Vec<u32> {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    build(&mut asm);
    words(&buffer)
}

fn linked(build: impl FnOnce(&mut Assembler<'_>)) -> Vec<u32> {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    build(&mut asm);
    buffer.align(4096);
    buffer.link(0, None).unwrap();
    words(&buffer)
}

fn words(buffer: &SegmentedBuffer) -> Vec<u32> {
    buffer.segments()[0]
        .bytes
        .chunks(4)
        .map(|chunk| u32::from_le_bytes(chunk.try_into().expect("word-sized chunks")))
        .collect()
}

#[test]
fn hints_and_system() {
    let words = collect(|asm| {
        asm.nop().unwrap(); // D503201F
        asm.yield_().unwrap(); // D503203F
        asm.wfe().unwrap(); // D503205F
        asm.wfi().unwrap(); // D503207F
        asm.svc(0).unwrap(); // D4000001
        asm.hvc(1).unwrap(); // D4000022
        asm.brk(0).unwrap(); // D4200000
        asm.hlt(2).unwrap(); // D4400040
        asm.isb().unwrap(); // D5033FDF
        asm.ret().unwrap(); // D65F03C0
    });
    assert_eq!(
        words,
        vec![
            0xD503201F, 0xD503203F, 0xD503205F, 0xD503207F, 0xD4000001, 0xD4000022, 0xD4200000,
            0xD4400040, 0xD5033FDF, 0xD65F03C0,
        ]
    );
}

#[test]
fn move_wide_forms() {
    let words = collect(|asm| {
        asm.movz(x(0), 0x102A, 16).unwrap(); // D2A20540
        asm.movk(x(0), 0x102A, 16).unwrap(); // F2A20540
        asm.movn(x(0), 0xFF00, 0).unwrap(); // 929FE000
        asm.movz(w(1), 7, 0).unwrap(); // 528000E1
    });
    assert_eq!(words, vec![0xD2A20540, 0xF2A20540, 0x929FE000, 0x528000E1]);
}

#[test]
fn move_wide_validation() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    assert!(matches!(
        asm.movz(w(0), 0x102A, 15),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.movz(w(0), 0x102A, 32),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.movz(x(0), 0x102A, 64),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.movz(SP, 0, 0),
        Err(Error::RegisterIncompatibility { .. })
    ));
}

#[test]
fn mov_synthesis_picks_shortest_sequence() {
    // a single shifted chunk: exactly one MOVZ, no trailing MOVK
    let words = collect(|asm| asm.mov_imm(x(0), 0x100_0000_0000).unwrap());
    assert_eq!(words, vec![0xD2C02000]); // movz x0, #0x100, lsl 32

    // an inverted chunk: exactly one MOVN
    let words = collect(|asm| asm.mov_imm(x(0), 0xFFFF_FFFF_FFFF_00FF).unwrap());
    assert_eq!(words, vec![0x929FE000]); // movn x0, #0xff00

    // a bitmask pattern: one ORR with the zero register
    let words = collect(|asm| asm.mov_imm(x(0), 0x5555_5555_5555_5555).unwrap());
    assert_eq!(words, vec![0xB200F3E0]); // orr x0, xzr, #0x5555...

    // everything else: MOVZ plus MOVKs for the nonzero chunks
    let words = collect(|asm| asm.mov_imm(x(0), 0x0001_0000_0000_2A03).unwrap());
    assert_eq!(
        words,
        vec![
            0xD2854060, // movz x0, #0x2a03
            0xF2E00020, // movk x0, #0x1, lsl 48
        ]
    );

    // plain 16-bit values collapse to one MOVZ
    let words = collect(|asm| asm.mov_imm(x(0), 0x2A).unwrap());
    assert_eq!(words, vec![0xD2800540]);
}

#[test]
fn logical_shifted_and_mov_register() {
    let words = collect(|asm| {
        asm.orr(x(0), x(1), x(2), ShiftOp::Lsl, 0).unwrap(); // AA020020
        asm.and(w(3), w(4), w(5), ShiftOp::Lsr, 2).unwrap(); // 0A450883
        asm.eor(x(6), x(7), x(8), ShiftOp::Lsl, 0).unwrap(); // CA0800E6
        asm.mov(x(0), x(1)).unwrap(); // AA0103E0
        asm.mov(w(2), w(3)).unwrap(); // 2A0303E2
    });
    assert_eq!(
        words,
        vec![0xAA020020, 0x0A450883, 0xCA0800E6, 0xAA0103E0, 0x2A0303E2]
    );
}

#[test]
fn logical_width_mismatch_rejected() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    assert!(matches!(
        asm.orr(w(0), w(0), x(0), ShiftOp::Lsl, 0),
        Err(Error::OperandShape { .. })
    ));
    assert!(matches!(
        asm.orr(x(0), SP, x(1), ShiftOp::Lsl, 0),
        Err(Error::RegisterIncompatibility { .. })
    ));
}

#[test]
fn bitmask_immediates() {
    let words = collect(|asm| {
        asm.orr_imm(x(0), x(1), 0x9999_9999_9999_9999).unwrap(); // B201E420
        asm.and_imm(x(2), x(3), 0xFF).unwrap(); // 92401C62
        asm.eor_imm(w(4), w(5), 0xF0F0_F0F0).unwrap(); // 5204CCA4
    });
    assert_eq!(words, vec![0xB201E420, 0x92401C62, 0x5204CCA4]);
}

#[test]
fn bitmask_rejects_unencodable_patterns() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    assert!(matches!(
        asm.orr_imm(x(0), x(1), 0),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.orr_imm(x(0), x(1), u64::MAX),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.orr_imm(x(0), x(1), 0b0010_0000_0011_0000),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    // a 64-bit-only pattern used in a 32-bit operation
    assert!(matches!(
        asm.orr_imm(w(0), w(1), 0xFF00_FF00_FF00_FF00),
        Err(Error::ImmediateOutOfRange { .. })
    ));
}

#[test]
fn arithmetic_forms() {
    let words = collect(|asm| {
        asm.add(x(0), x(1), x(2), ExtendOp::Uxtx, 0).unwrap(); // 8B226020
        asm.sub(w(3), w(4), w(5), ExtendOp::Uxtw, 0).unwrap(); // 4B254083
        asm.adc(x(0), x(1), x(2)).unwrap(); // 9A020020
        asm.adds(x(0), x(1), x(2), ExtendOp::Uxtx, 0).unwrap(); // AB226020
        asm.cmp(x(1), x(2), ExtendOp::Uxtx, 0).unwrap(); // EB22603F
        asm.add_imm(x(0), SP, 16, false).unwrap(); // 910043E0
        asm.sub_imm(SP, SP, 32, false).unwrap(); // D10083FF
    });
    assert_eq!(
        words,
        vec![
            0x8B226020, 0x4B254083, 0x9A020020, 0xAB226020, 0xEB22603F, 0x910043E0, 0xD10083FF,
        ]
    );
}

#[test]
fn arithmetic_validation() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    // zero and stack registers swap legality with the S bit
    assert!(asm.add(XZR, x(1), x(2), ExtendOp::Uxtx, 0).is_err());
    assert!(asm.adds(SP, x(1), x(2), ExtendOp::Uxtx, 0).is_err());
    assert!(asm.add(x(0), XZR, x(2), ExtendOp::Uxtx, 0).is_err());
    assert!(asm.add(x(0), x(1), SP, ExtendOp::Uxtx, 0).is_err());
    assert!(asm.adc(x(0), SP, x(1)).is_err());
    assert!(asm.adc(SP, x(0), x(1)).is_err());
    assert!(asm.add_imm(x(0), XZR, 1, false).is_err());
}

#[test]
fn multiply_and_divide() {
    let words = collect(|asm| {
        asm.madd(x(0), x(1), x(2), x(3)).unwrap(); // 9B020C20
        asm.msub(x(0), x(1), x(2), x(3)).unwrap(); // 9B028C20
        asm.mul(x(0), x(1), x(2)).unwrap(); // 9B027C20
        asm.smulh(x(0), x(1), x(2)).unwrap(); // 9B427C20
        asm.umulh(x(0), x(1), x(2)).unwrap(); // 9BC27C20
        asm.sdiv(x(0), x(1), x(2)).unwrap(); // 9AC20C20
        asm.udiv(x(0), x(1), x(2)).unwrap(); // 9AC20820
        asm.smaddl(x(0), w(1), w(2), x(3)).unwrap(); // 9B220C20
        asm.umaddl(x(0), w(1), w(2), x(3)).unwrap(); // 9BA20C20
    });
    assert_eq!(
        words,
        vec![
            0x9B020C20, 0x9B028C20, 0x9B027C20, 0x9B427C20, 0x9BC27C20, 0x9AC20C20, 0x9AC20820,
            0x9B220C20, 0x9BA20C20,
        ]
    );
}

#[test]
fn maddl_width_validation() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    assert!(asm.smaddl(w(0), w(1), w(2), x(3)).is_err());
    assert!(asm.smaddl(x(0), x(1), w(2), x(3)).is_err());
    assert!(asm.smaddl(x(0), w(1), w(2), w(3)).is_err());
    assert!(asm.smulh(x(0), w(1), x(2)).is_err());
}

#[test]
fn bit_manipulation() {
    let words = collect(|asm| {
        asm.rbit(x(0), x(1)).unwrap(); // DAC00020
        asm.clz(x(0), x(1)).unwrap(); // DAC01020
        asm.cls(w(0), w(1)).unwrap(); // 5AC01420
        asm.rev16(x(0), x(1)).unwrap(); // DAC00420
        asm.rev32(x(0), x(1)).unwrap(); // DAC00820
        asm.rev64(x(0), x(1)).unwrap(); // DAC00C20
        asm.lsl(x(0), x(1), x(2)).unwrap(); // 9AC22020
        asm.lsr(x(0), x(1), x(2)).unwrap(); // 9AC22420
        asm.asr(x(0), x(1), x(2)).unwrap(); // 9AC22820
        asm.ror(x(0), x(1), x(2)).unwrap(); // 9AC22C20
        asm.extr(x(0), x(1), x(2), 8).unwrap(); // 93C12040
        asm.ror_imm(x(3), x(4), 1).unwrap(); // 93C40483
    });
    assert_eq!(
        words,
        vec![
            0xDAC00020, 0xDAC01020, 0x5AC01420, 0xDAC00420, 0xDAC00820, 0xDAC00C20, 0x9AC22020,
            0x9AC22420, 0x9AC22820, 0x9AC22C20, 0x93C12040, 0x93C40483,
        ]
    );
}

#[test]
fn one_source_width_validation() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    assert!(asm.rbit(w(0), x(1)).is_err());
    assert!(asm.cls(w(0), x(1)).is_err());
    assert!(asm.clz(w(0), x(1)).is_err());
    assert!(asm.rev32(w(0), w(1)).is_err());
    assert!(asm.rev64(w(0), w(1)).is_err());
    assert!(asm.extr(x(0), x(1), w(2), 5).is_err());
    assert!(matches!(
        asm.extr(w(0), w(1), w(2), 40),
        Err(Error::ImmediateOutOfRange { .. })
    ));
}

#[test]
fn conditional_select() {
    let words = collect(|asm| {
        asm.csel(Cond::Eq, x(0), x(1), x(2)).unwrap(); // 9A820020
        asm.csinc(Cond::Ne, x(0), x(1), x(2)).unwrap(); // 9A821420
        asm.cinc(Cond::Eq, x(0), x(1)).unwrap(); // 9A811420
        asm.cset(Cond::Eq, x(0)).unwrap(); // 9A9F17E0
    });
    assert_eq!(words, vec![0x9A820020, 0x9A821420, 0x9A811420, 0x9A9F17E0]);
}

#[test]
fn always_condition_cannot_invert() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    assert!(asm.cset(Cond::Al, x(0)).is_err());
    assert!(asm.cinc(Cond::Nv, x(0), x(1)).is_err());
}

#[test]
fn loads_and_stores() {
    let words = collect(|asm| {
        asm.ldr(x(0), x(1), 8, ExtendOp::Uxtx).unwrap(); // F9400420
        asm.ldr(w(0), x(1), 0, ExtendOp::Uxtb).unwrap(); // 39400020
        asm.ldr(w(0), x(1), 2, ExtendOp::Sxth).unwrap(); // 79C00420
        asm.str(x(0), SP, 16, ExtendOp::Uxtx).unwrap(); // F9000BE0
        asm.ldr_post(x(0), x(1), 8, ExtendOp::Uxtx).unwrap(); // F8408420
        asm.ldr_pre(x(0), x(1), -8, ExtendOp::Uxtx).unwrap(); // F85F8C20
        asm.str_post(x(0), x(1), 8, ExtendOp::Uxtx).unwrap(); // F8008420
        asm.str_pre(x(0), x(1), -8, ExtendOp::Uxtx).unwrap(); // F81F8C20
    });
    assert_eq!(
        words,
        vec![
            0xF9400420, 0x39400020, 0x79C00420, 0xF9000BE0, 0xF8408420, 0xF85F8C20, 0xF8008420,
            0xF81F8C20,
        ]
    );
}

#[test]
fn load_store_validation() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    // unaligned and out-of-range offsets
    assert!(matches!(
        asm.ldr(x(0), x(1), 3, ExtendOp::Uxtx),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.ldr(x(0), x(1), 8 * 5000, ExtendOp::Uxtx),
        Err(Error::ImmediateOutOfRange { .. })
    ));
    assert!(matches!(
        asm.ldr_post(x(0), x(1), 400, ExtendOp::Uxtx),
        Err(Error::ImmediateOutOfRange { .. })
    ));

    // register class misuse
    assert!(asm.ldr(x(0), w(1), 0, ExtendOp::Uxtx).is_err());
    assert!(asm.ldr(x(0), XZR, 0, ExtendOp::Uxtx).is_err());
    assert!(asm.ldr(SP, x(1), 0, ExtendOp::Uxtx).is_err());

    // writeback with base == destination
    assert!(asm.ldr_post(x(1), x(1), 8, ExtendOp::Uxtx).is_err());
    assert!(asm.ldr_pre(x(1), x(1), 8, ExtendOp::Uxtx).is_err());
    // the plain offset form is fine
    asm.ldr(x(1), x(1), 0, ExtendOp::Uxtx).unwrap();
}

#[test]
fn branches_resolve_pc_relative() {
    let skip = Label::new("skip");
    let words = linked(|asm| {
        asm.b(&skip).unwrap(); // 14000002
        asm.nop().unwrap();
        asm.label(&skip).unwrap();
        asm.ret().unwrap();
    });
    assert_eq!(words, vec![0x14000002, 0xD503201F, 0xD65F03C0]);

    let back = Label::new("back");
    let words = linked(|asm| {
        asm.label(&back).unwrap();
        asm.nop().unwrap();
        asm.b(&back).unwrap(); // 17FFFFFF
    });
    assert_eq!(words[1], 0x17FFFFFF);

    let target = Label::new("target");
    let words = linked(|asm| {
        asm.b_cond(Cond::Eq, &target).unwrap(); // 54000040
        asm.cbz(x(0), &target).unwrap(); // B4000020
        asm.cbnz(w(1), &target).unwrap(); // 35000001
        asm.tbz(x(2), 33, &target).unwrap(); // B0FF0...
        asm.label(&target).unwrap();
        asm.ret().unwrap();
    });
    assert_eq!(words[0], 0x54000000 | (4 << 5));
    assert_eq!(words[1], 0xB4000000 | (3 << 5));
    assert_eq!(words[2], 0x35000000 | (2 << 5) | 1);
    assert_eq!(words[3], (1 << 31) | (0b0110110 << 24) | (1 << 19) | (1 << 5) | 2);

    let sub = Label::new("sub");
    let words = linked(|asm| {
        asm.bl(&sub).unwrap(); // 94000002
        asm.nop().unwrap();
        asm.label(&sub).unwrap();
        asm.ret().unwrap();
    });
    assert_eq!(words[0], 0x94000002);
}

#[test]
fn register_branches() {
    let words = collect(|asm| {
        asm.br(x(3)).unwrap(); // D61F0060
        asm.blr(x(4)).unwrap(); // D63F0080
        asm.ret_reg(x(5)).unwrap(); // D65F00A0
    });
    assert_eq!(words, vec![0xD61F0060, 0xD63F0080, 0xD65F00A0]);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    assert!(asm.br(w(0)).is_err());
    assert!(asm.ret_reg(w(0)).is_err());
    assert!(asm.ret_reg(SP).is_err());
}

#[test]
fn adr_and_load_literal() {
    let data = Label::new("data");
    let words = linked(|asm| {
        asm.adr(x(0), &data).unwrap(); // 10000040
        asm.ldr_literal(x(1), &data).unwrap(); // 58000021
        asm.label(&data).unwrap();
        asm.put_qword(0);
    });
    assert_eq!(words[0], 0x10000000 | (2 << 5));
    assert_eq!(words[1], 0x58000000 | (1 << 5) | 1);
}

#[test]
fn branch_range_and_alignment_checks() {
    // a test-branch can only span ±32 KiB
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let far = Label::new("far");
    asm.tbz(x(0), 0, &far).unwrap();
    asm.put_space(40_000, 0);
    asm.label(&far).unwrap();
    buffer.align(4096);
    assert!(matches!(
        buffer.link(0, None),
        Err(Error::ImmediateOutOfRange { .. })
    ));

    // branch targets must be word aligned
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let odd = Label::new("odd");
    asm.b(&odd).unwrap();
    asm.put_byte(0);
    asm.label(&odd).unwrap();
    buffer.align(4096);
    assert!(matches!(
        buffer.link(0, None),
        Err(Error::ImmediateOutOfRange { .. })
    ));
}

#[test]
fn tbz_bit_selector_validation() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let label = Label::new("l");

    assert!(asm.tbz(w(0), 33, &label).is_err());
    assert!(asm.tbnz(x(0), 64, &label).is_err());
}

#[test]
fn mov_to_stack_pointer_uses_add() {
    let words = collect(|asm| {
        asm.mov(SP, x(0)).unwrap(); // 9100001F
        asm.mov(x(0), SP).unwrap(); // 910003E0
    });
    assert_eq!(words, vec![0x9100001F, 0x910003E0]);
}
