//! Execute AArch64 programs assembled in-process; host-gated.

#![cfg(all(target_arch = "aarch64", target_os = "linux"))]

use anvil_asm::buffer::{DataSink, SegmentedBuffer};
use anvil_asm::isa::aarch64::{Assembler, Cond, ExtendOp, SP, ShiftOp, XZR, w, x};
use anvil_asm::label::Label;
use anvil_jit::to_executable;

#[test]
fn nop_ret_runs() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.nop().unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    unsafe { exe.call_u64() };
}

#[test]
fn move_wide_semantics() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.movz(x(0), 1, 0).unwrap(); // overwritten below
    asm.movz(x(0), 0x102A, 16).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 0x102A_0000);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.movz(x(0), 1, 0).unwrap();
    asm.movk(x(0), 0x102A, 16).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 0x102A_0001);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.movn(x(0), 0xFF00, 0).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 0xFFFF_FFFF_FFFF_00FF);
}

#[test]
fn immediate_synthesis_round_trips() {
    for value in [
        0u64,
        0x2A,
        0x100_0000_0000,
        0xFFFF_FFFF_FFFF_00FF,
        0x9999_9999_9999_9999,
        0x0001_0000_0000_2A03,
        u64::MAX - 1,
        0x1234_5678_9ABC_DEF0,
    ] {
        let mut buffer = SegmentedBuffer::new();
        let mut asm = Assembler::new(&mut buffer);
        asm.mov_imm(x(0), value).unwrap();
        asm.ret().unwrap();

        let exe = to_executable(&mut buffer).unwrap();
        assert_eq!(unsafe { exe.call_u64() }, value, "value {value:#x}");
    }
}

#[test]
fn arithmetic_and_logic() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.mov_imm(x(1), 40).unwrap();
    asm.mov_imm(x(2), 2).unwrap();
    asm.add(x(0), x(1), x(2), ExtendOp::Uxtx, 0).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 42);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.mov_imm(x(1), 6).unwrap();
    asm.mov_imm(x(2), 7).unwrap();
    asm.mul(x(0), x(1), x(2)).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 42);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.mov_imm(x(1), 0xF0).unwrap();
    asm.orr_imm(x(0), x(1), 0x0F).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 0xFF);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.mov_imm(x(1), 84).unwrap();
    asm.mov_imm(x(2), 2).unwrap();
    asm.udiv(x(0), x(1), x(2)).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 42);
}

#[test]
fn count_down_loop() {
    // sum 1..=10 with a conditional backward branch
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let again = Label::new("again");

    asm.mov(x(0), XZR).unwrap();
    asm.mov_imm(x(1), 10).unwrap();
    asm.label(&again).unwrap();
    asm.add(x(0), x(0), x(1), ExtendOp::Uxtx, 0).unwrap();
    asm.sub_imm(x(1), x(1), 1, false).unwrap();
    asm.cbnz(x(1), &again).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 55);
}

#[test]
fn conditional_select() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    asm.mov_imm(x(1), 5).unwrap();
    asm.mov_imm(x(2), 5).unwrap();
    asm.cmp(x(1), x(2), ExtendOp::Uxtx, 0).unwrap();
    asm.cset(Cond::Eq, x(0)).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 1);
}

#[test]
fn shifts_and_bit_tricks() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    asm.mov_imm(x(1), 0b1011).unwrap();
    asm.mov_imm(x(2), 4).unwrap();
    asm.lsl(x(0), x(1), x(2)).unwrap();
    asm.orr(x(0), x(0), x(1), ShiftOp::Lsl, 0).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 0b1011_1011);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.mov_imm(x(1), 1).unwrap();
    asm.rbit(x(0), x(1)).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 1u64 << 63);

    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    asm.mov_imm(w(1), 16).unwrap();
    asm.clz(w(0), w(1)).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32() }, 27);
}

#[test]
fn branch_and_link() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let main = Label::new("main");
    let helper = Label::new("helper");

    asm.label(&main).unwrap();
    // save the link register around the nested call
    asm.str_pre(x(30), SP, -16, ExtendOp::Uxtx).unwrap();
    asm.bl(&helper).unwrap();
    asm.add_imm(x(0), x(0), 1, false).unwrap();
    asm.ldr_post(x(30), SP, 16, ExtendOp::Uxtx).unwrap();
    asm.ret().unwrap();

    asm.label(&helper).unwrap();
    asm.mov_imm(x(0), 10).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64_at(&main) }, 11);
}

#[test]
fn packed_argument_call() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let entry = Label::new("sum2");

    // the argument block pointer arrives in X0
    asm.label(&entry).unwrap();
    asm.ldr(x(1), x(0), 0, ExtendOp::Uxtx).unwrap();
    asm.ldr(x(2), x(0), 8, ExtendOp::Uxtx).unwrap();
    asm.add(x(0), x(1), x(2), ExtendOp::Uxtx, 0).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    let sum: u64 = unsafe { exe.scall(&entry, &[40, 2]) };
    assert_eq!(sum, 42);
}

#[test]
fn data_access_through_adr() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let value = Label::new("value");

    asm.adr(x(1), &value).unwrap();
    asm.ldr(w(0), x(1), 0, ExtendOp::Uxtw).unwrap();
    asm.ret().unwrap();
    asm.label(&value).unwrap();
    asm.put_dword(42);

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32() }, 42);
}

#[test]
fn zero_register_writes_vanish() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    // a mov into the zero register encodes to nothing
    asm.mov_imm(XZR, 7).unwrap();
    assert!(buffer.segments()[0].bytes.is_empty());

    asm.mov(x(0), XZR).unwrap();
    asm.ret().unwrap();
    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u64() }, 0);
}
