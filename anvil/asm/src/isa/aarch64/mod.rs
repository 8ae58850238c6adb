//! The AArch64 back-end.

pub mod args;
mod emit;
#[cfg(test)]
mod emit_tests;
pub mod imms;

pub use args::{Cond, ExtendOp, FP, LR, OperandSize, Reg, SP, ShiftOp, WZR, XZR, w, x};
pub use emit::Assembler;
pub use imms::LogicalImm;
