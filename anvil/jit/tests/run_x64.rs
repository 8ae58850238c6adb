//! Execute x86-64 programs assembled in-process; host-gated.

#![cfg(all(target_arch = "x86_64", target_os = "linux"))]

use anvil_asm::buffer::{DataSink, SectionFlags, SegmentedBuffer};
use anvil_asm::isa::x64::regs::*;
use anvil_asm::isa::x64::{Assembler, dword_ptr, qword_ptr, st};
use anvil_asm::label::Label;
use anvil_jit::to_executable;

#[test]
fn arithmetic_round_trip() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    asm.mov(EDX, 5).unwrap();
    asm.rol(EDX, 3).unwrap();
    asm.inc(EDX).unwrap();
    asm.mov(EAX, EDX).unwrap();
    asm.inc(EAX).unwrap();
    asm.neg(EAX).unwrap();
    asm.mov(CL, 2).unwrap();
    asm.sar(EAX, CL).unwrap();
    asm.neg(EAX).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_i32() }, 11);
}

#[test]
fn forward_jump_lands_on_target() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let target = Label::new("target");

    asm.jz(&target).unwrap();
    for _ in 0..255 {
        asm.nop().unwrap();
    }
    asm.label(&target).unwrap();
    asm.mov(EAX, 1).unwrap();
    asm.ret().unwrap();

    // the conditional jump crossed 255 bytes, so the encoder must have
    // used the rel32 long form
    assert_eq!(&buffer.segments()[0].bytes[..2], &[0x0F, 0x84]);

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_i32() }, 1);
}

#[test]
fn loops_and_conditions() {
    // sum the numbers 1..=10
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let again = Label::new("again");

    asm.xor(EAX, EAX).unwrap();
    asm.mov(ECX, 10).unwrap();
    asm.label(&again).unwrap();
    asm.add(EAX, ECX).unwrap();
    asm.dec(ECX).unwrap();
    asm.jnz(&again).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32() }, 55);
}

#[test]
fn labelled_entries() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let first = Label::new("first");
    let second = Label::new("second");

    asm.label(&first).unwrap();
    asm.mov(EAX, 7).unwrap();
    asm.ret().unwrap();

    asm.label(&second).unwrap();
    asm.mov(EAX, 42).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32_at(&first) }, 7);
    assert_eq!(unsafe { exe.call_u32_at(&second) }, 42);
    assert!(exe.address_of(&second).is_some());
    assert!(exe.address_of(&Label::new("missing")).is_none());
}

#[test]
fn rip_relative_data_access() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let value = Label::new("value");

    // code lands in the default section, data in its own
    asm.mov(EAX, dword_ptr(&value)).unwrap();
    asm.add(EAX, 2).unwrap();
    asm.ret().unwrap();

    asm.section(SectionFlags::R | SectionFlags::W, None);
    asm.label(&value).unwrap();
    asm.put_dword(40);

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32() }, 42);
}

#[test]
fn x87_float_return() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    // 1.0 + 1.0 on the FPU stack
    asm.fld1().unwrap();
    asm.fld1().unwrap();
    asm.fadd(st(1)).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    let value = unsafe { exe.call_f32() };
    assert_eq!(value, 2.0);
}

#[test]
fn packed_argument_call() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let entry = Label::new("sum2");

    // the argument block pointer arrives in RDI
    asm.label(&entry).unwrap();
    asm.mov(RAX, qword_ptr(RDI)).unwrap();
    asm.add(RAX, qword_ptr(RDI + 8)).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    let sum: u64 = unsafe { exe.scall(&entry, &[40, 2]) };
    assert_eq!(sum, 42);
}

#[test]
fn memory_round_trip_through_stack() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);

    asm.push(RBP).unwrap();
    asm.mov(RBP, RSP).unwrap();
    asm.mov(dword_ptr(RBP - 4), 41).unwrap();
    asm.mov(EAX, dword_ptr(RBP - 4)).unwrap();
    asm.inc(EAX).unwrap();
    asm.pop(RBP).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32() }, 42);
}

#[test]
fn register_indirection() {
    let mut buffer = SegmentedBuffer::new();
    let mut asm = Assembler::new(&mut buffer);
    let helper = Label::new("helper");
    let main = Label::new("main");

    asm.label(&main).unwrap();
    asm.call(&helper).unwrap();
    asm.add(EAX, 1).unwrap();
    asm.ret().unwrap();

    asm.label(&helper).unwrap();
    asm.mov(EAX, 10).unwrap();
    asm.ret().unwrap();

    let exe = to_executable(&mut buffer).unwrap();
    assert_eq!(unsafe { exe.call_u32_at(&main) }, 11);
}
