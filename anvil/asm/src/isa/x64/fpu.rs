//! x87 FPU stack instructions.
//!
//! Stack registers are addressed as `st(i)` operands; memory operands
//! select the access width through their cast (`dword_ptr` for single
//! precision, `qword_ptr` for double, `tword_ptr` for extended).

use super::args::{Location, OpSize};
use super::emit::Assembler;
use super::regs::AX;
use crate::error::Error;

type Result = crate::Result<()>;

impl Assembler<'_> {
    fn st_index(mnemonic: &'static str, loc: &Location) -> crate::Result<u8> {
        if !loc.is_floating() {
            return Err(Error::shape(mnemonic, "expected an FPU stack register"));
        }
        Ok(loc.offset as u8)
    }

    /// No operation.
    pub fn fnop(&mut self) -> Result {
        self.put_fpu(0xD9, 0xD0, 0)
    }

    /// Initialize the FPU.
    pub fn finit(&mut self) -> Result {
        self.fixed(&[0x9B])?;
        self.fninit()
    }

    /// Initialize the FPU without checking pending exceptions.
    pub fn fninit(&mut self) -> Result {
        self.put_fpu(0xDB, 0xE3, 0)
    }

    /// Clear exceptions.
    pub fn fclex(&mut self) -> Result {
        self.fixed(&[0x9B])?;
        self.fnclex()
    }

    /// Clear exceptions without checking pending ones.
    pub fn fnclex(&mut self) -> Result {
        self.put_fpu(0xDB, 0xE2, 0)
    }

    /// Store the FPU status word.
    pub fn fstsw(&mut self, dst: impl Into<Location>) -> Result {
        self.fixed(&[0x9B])?;
        self.fnstsw(dst)
    }

    /// Store the FPU status word without checking pending exceptions.
    pub fn fnstsw(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_simple() && dst.base == AX {
            return self.put_fpu(0xDF, 0xE0, 0);
        }

        if dst.is_memory() && matches!(dst.size, OpSize::Word | OpSize::Unset) {
            return self.put_fpu_mem("fnstsw", 0xDD, &dst, 7);
        }

        Err(Error::shape("fnstsw", "expected AX or a word memory operand"))
    }

    /// Store the FPU control word.
    pub fn fstcw(&mut self, dst: impl Into<Location>) -> Result {
        self.fixed(&[0x9B])?;
        self.fnstcw(dst)
    }

    /// Store the FPU control word without checking pending exceptions.
    pub fn fnstcw(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();
        if dst.is_memory() && matches!(dst.size, OpSize::Word | OpSize::Unset) {
            return self.put_fpu_mem("fnstcw", 0xD9, &dst, 7);
        }
        Err(Error::shape("fnstcw", "expected a word memory operand"))
    }

    /// Load the FPU control word.
    pub fn fldcw(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();
        if src.is_memory() && matches!(src.size, OpSize::Word | OpSize::Unset) {
            return self.put_fpu_mem("fldcw", 0xD9, &src, 5);
        }
        Err(Error::shape("fldcw", "expected a word memory operand"))
    }

    /// Push +1.0.
    pub fn fld1(&mut self) -> Result {
        self.put_fpu(0xD9, 0xE8, 0)
    }

    /// Push +0.0.
    pub fn fldz(&mut self) -> Result {
        self.put_fpu(0xD9, 0xEE, 0)
    }

    /// Push π.
    pub fn fldpi(&mut self) -> Result {
        self.put_fpu(0xD9, 0xEB, 0)
    }

    /// Push log2(10).
    pub fn fldl2t(&mut self) -> Result {
        self.put_fpu(0xD9, 0xE9, 0)
    }

    /// Push log2(e).
    pub fn fldl2e(&mut self) -> Result {
        self.put_fpu(0xD9, 0xEA, 0)
    }

    /// Push log10(2).
    pub fn fldlg2(&mut self) -> Result {
        self.put_fpu(0xD9, 0xEC, 0)
    }

    /// Push ln(2).
    pub fn fldln2(&mut self) -> Result {
        self.put_fpu(0xD9, 0xED, 0)
    }

    /// Compute 2^x − 1.
    pub fn f2xm1(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF0, 0)
    }

    /// Absolute value.
    pub fn fabs(&mut self) -> Result {
        self.put_fpu(0xD9, 0xE1, 0)
    }

    /// Change sign.
    pub fn fchs(&mut self) -> Result {
        self.put_fpu(0xD9, 0xE0, 0)
    }

    /// Cosine.
    pub fn fcos(&mut self) -> Result {
        self.put_fpu(0xD9, 0xFF, 0)
    }

    /// Sine.
    pub fn fsin(&mut self) -> Result {
        self.put_fpu(0xD9, 0xFE, 0)
    }

    /// Sine and cosine; pushes cos(ST0) after replacing ST0 with sin.
    pub fn fsincos(&mut self) -> Result {
        self.put_fpu(0xD9, 0xFB, 0)
    }

    /// Decrement the stack pointer.
    pub fn fdecstp(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF6, 0)
    }

    /// Increment the stack pointer.
    pub fn fincstp(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF7, 0)
    }

    /// Partial arctangent of ST1/ST0, pops.
    pub fn fpatan(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF3, 0)
    }

    /// Partial remainder ST0 % ST1.
    pub fn fprem(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF8, 0)
    }

    /// IEEE partial remainder ST0 % ST1.
    pub fn fprem1(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF5, 0)
    }

    /// Partial tangent; pushes 1.0 after replacing ST0 with tan.
    pub fn fptan(&mut self) -> Result {
        self.put_fpu(0xD9, 0xF2, 0)
    }

    /// Round ST0 to an integer.
    pub fn frndint(&mut self) -> Result {
        self.put_fpu(0xD9, 0xFC, 0)
    }

    /// Scale ST0 by 2^floor(ST1).
    pub fn fscale(&mut self) -> Result {
        self.put_fpu(0xD9, 0xFD, 0)
    }

    /// Square root.
    pub fn fsqrt(&mut self) -> Result {
        self.put_fpu(0xD9, 0xFA, 0)
    }

    /// Load a floating-point value onto the stack.
    pub fn fld(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fld", &src)?;
            return self.put_fpu(0xD9, 0xC0, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fld", 0xD9, &src, 0),
                OpSize::Qword => self.put_fpu_mem("fld", 0xDD, &src, 0),
                OpSize::Tword => self.put_fpu_mem("fld", 0xDB, &src, 5),
                _ => Err(Error::shape("fld", "expected a dword, qword or tword memory operand")),
            };
        }

        Err(Error::shape("fld", "invalid operand"))
    }

    /// Load an integer value onto the stack.
    pub fn fild(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("fild", 0xDF, &src, 0),
                OpSize::Dword => self.put_fpu_mem("fild", 0xDB, &src, 0),
                OpSize::Qword => self.put_fpu_mem("fild", 0xDF, &src, 5),
                _ => Err(Error::shape("fild", "expected a word, dword or qword memory operand")),
            };
        }

        Err(Error::shape("fild", "invalid operand"))
    }

    /// Store ST0.
    pub fn fst(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_floating() {
            let sti = Self::st_index("fst", &dst)?;
            return self.put_fpu(0xDD, 0xD0, sti);
        }

        if dst.is_memory() {
            return match dst.size {
                OpSize::Dword => self.put_fpu_mem("fst", 0xD9, &dst, 2),
                OpSize::Qword => self.put_fpu_mem("fst", 0xDD, &dst, 2),
                _ => Err(Error::shape("fst", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fst", "invalid operand"))
    }

    /// Store ST0 and pop.
    pub fn fstp(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_floating() {
            let sti = Self::st_index("fstp", &dst)?;
            return self.put_fpu(0xDD, 0xD8, sti);
        }

        if dst.is_memory() {
            return match dst.size {
                OpSize::Dword => self.put_fpu_mem("fstp", 0xD9, &dst, 3),
                OpSize::Qword => self.put_fpu_mem("fstp", 0xDD, &dst, 3),
                OpSize::Tword => self.put_fpu_mem("fstp", 0xDB, &dst, 7),
                _ => Err(Error::shape("fstp", "expected a dword, qword or tword memory operand")),
            };
        }

        Err(Error::shape("fstp", "invalid operand"))
    }

    /// Store ST0 as an integer.
    pub fn fist(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_memory() {
            return match dst.size {
                OpSize::Word => self.put_fpu_mem("fist", 0xDF, &dst, 2),
                OpSize::Dword => self.put_fpu_mem("fist", 0xDB, &dst, 2),
                _ => Err(Error::shape("fist", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("fist", "invalid operand"))
    }

    /// Store ST0 as an integer and pop.
    pub fn fistp(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_memory() {
            return match dst.size {
                OpSize::Word => self.put_fpu_mem("fistp", 0xDF, &dst, 3),
                OpSize::Dword => self.put_fpu_mem("fistp", 0xDB, &dst, 3),
                OpSize::Qword => self.put_fpu_mem("fistp", 0xDF, &dst, 7),
                _ => Err(Error::shape("fistp", "expected a word, dword or qword memory operand")),
            };
        }

        Err(Error::shape("fistp", "invalid operand"))
    }

    /// Store ST0 as a truncated integer and pop.
    pub fn fisttp(&mut self, dst: impl Into<Location>) -> Result {
        let dst = dst.into();

        if dst.is_memory() {
            return match dst.size {
                OpSize::Word => self.put_fpu_mem("fisttp", 0xDF, &dst, 1),
                OpSize::Dword => self.put_fpu_mem("fisttp", 0xDB, &dst, 1),
                OpSize::Qword => self.put_fpu_mem("fisttp", 0xDD, &dst, 1),
                _ => Err(Error::shape("fisttp", "expected a word, dword or qword memory operand")),
            };
        }

        Err(Error::shape("fisttp", "invalid operand"))
    }

    /// Free a stack register.
    pub fn ffree(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();
        let sti = Self::st_index("ffree", &src)?;
        self.put_fpu(0xDD, 0xC0, sti)
    }

    /// Move ST(i) into ST0 if below.
    pub fn fcmovb(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovb", &src.into())?;
        self.put_fpu(0xDA, 0xC0, sti)
    }

    /// Move ST(i) into ST0 if equal.
    pub fn fcmove(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmove", &src.into())?;
        self.put_fpu(0xDA, 0xC8, sti)
    }

    /// Move ST(i) into ST0 if below or equal.
    pub fn fcmovbe(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovbe", &src.into())?;
        self.put_fpu(0xDA, 0xD0, sti)
    }

    /// Move ST(i) into ST0 if unordered.
    pub fn fcmovu(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovu", &src.into())?;
        self.put_fpu(0xDA, 0xD8, sti)
    }

    /// Move ST(i) into ST0 if not below.
    pub fn fcmovnb(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovnb", &src.into())?;
        self.put_fpu(0xDB, 0xC0, sti)
    }

    /// Move ST(i) into ST0 if not equal.
    pub fn fcmovne(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovne", &src.into())?;
        self.put_fpu(0xDB, 0xC8, sti)
    }

    /// Move ST(i) into ST0 if not below or equal.
    pub fn fcmovnbe(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovnbe", &src.into())?;
        self.put_fpu(0xDB, 0xD0, sti)
    }

    /// Move ST(i) into ST0 if not unordered.
    pub fn fcmovnu(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcmovnu", &src.into())?;
        self.put_fpu(0xDB, 0xD8, sti)
    }

    /// Compare ST0 with a float operand.
    pub fn fcom(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fcom", &src)?;
            return self.put_fpu(0xD8, 0xD0, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fcom", 0xD8, &src, 2),
                OpSize::Qword => self.put_fpu_mem("fcom", 0xDC, &src, 2),
                _ => Err(Error::shape("fcom", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fcom", "invalid operand"))
    }

    /// Compare ST0 with a float operand and pop.
    pub fn fcomp(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fcomp", &src)?;
            return self.put_fpu(0xD8, 0xD8, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fcomp", 0xD8, &src, 3),
                OpSize::Qword => self.put_fpu_mem("fcomp", 0xDC, &src, 3),
                _ => Err(Error::shape("fcomp", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fcomp", "invalid operand"))
    }

    /// Compare ST0 with ST1 and pop both.
    pub fn fcompp(&mut self) -> Result {
        self.put_fpu(0xDE, 0xD9, 0)
    }

    /// Compare ST0 with an integer operand.
    pub fn ficom(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("ficom", 0xDE, &src, 2),
                OpSize::Dword => self.put_fpu_mem("ficom", 0xDA, &src, 2),
                _ => Err(Error::shape("ficom", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("ficom", "invalid operand"))
    }

    /// Compare ST0 with an integer operand and pop.
    pub fn ficomp(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("ficomp", 0xDE, &src, 3),
                OpSize::Dword => self.put_fpu_mem("ficomp", 0xDA, &src, 3),
                _ => Err(Error::shape("ficomp", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("ficomp", "invalid operand"))
    }

    /// Compare ST0 with ST(i) and set EFLAGS.
    pub fn fcomi(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcomi", &src.into())?;
        self.put_fpu(0xDB, 0xF0, sti)
    }

    /// Compare ST0 with ST(i), set EFLAGS and pop.
    pub fn fcomip(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fcomip", &src.into())?;
        self.put_fpu(0xDF, 0xF0, sti)
    }

    /// Unordered-aware compare of ST0 with ST(i), sets EFLAGS.
    pub fn fucomi(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fucomi", &src.into())?;
        self.put_fpu(0xDB, 0xF8, sti)
    }

    /// Unordered-aware compare of ST0 with ST(i), sets EFLAGS and pops.
    pub fn fucomip(&mut self, src: impl Into<Location>) -> Result {
        let sti = Self::st_index("fucomip", &src.into())?;
        self.put_fpu(0xDF, 0xF8, sti)
    }

    /// Multiply ST0 by a memory float or a stack register.
    pub fn fmul(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fmul", &src)?;
            return self.put_fpu(0xD8, 0xC8, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fmul", 0xD8, &src, 1),
                OpSize::Qword => self.put_fpu_mem("fmul", 0xDC, &src, 1),
                _ => Err(Error::shape("fmul", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fmul", "invalid operand"))
    }

    /// Multiply ST0 by a memory integer.
    pub fn fimul(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("fimul", 0xDE, &src, 1),
                OpSize::Dword => self.put_fpu_mem("fimul", 0xDA, &src, 1),
                _ => Err(Error::shape("fimul", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("fimul", "invalid operand"))
    }

    /// Multiply a stack register pair; one side must be ST0.
    pub fn fmul_st(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if dst.is_st0() && src.is_floating() {
            let sti = Self::st_index("fmul", &src)?;
            return self.put_fpu(0xD8, 0xC8, sti);
        }

        if dst.is_floating() && src.is_st0() {
            let sti = Self::st_index("fmul", &dst)?;
            return self.put_fpu(0xDC, 0xC8, sti);
        }

        Err(Error::shape("fmul", "one operand must be ST(0)"))
    }

    /// Multiply ST(i) by ST0 and pop.
    pub fn fmulp(&mut self, dst: impl Into<Location>) -> Result {
        let sti = Self::st_index("fmulp", &dst.into())?;
        self.put_fpu(0xDE, 0xC8, sti)
    }

    /// Add a memory float or a stack register to ST0.
    pub fn fadd(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fadd", &src)?;
            return self.put_fpu(0xD8, 0xC0, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fadd", 0xD8, &src, 0),
                OpSize::Qword => self.put_fpu_mem("fadd", 0xDC, &src, 0),
                _ => Err(Error::shape("fadd", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fadd", "invalid operand"))
    }

    /// Add a memory integer to ST0.
    pub fn fiadd(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("fiadd", 0xDE, &src, 0),
                OpSize::Dword => self.put_fpu_mem("fiadd", 0xDA, &src, 0),
                _ => Err(Error::shape("fiadd", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("fiadd", "invalid operand"))
    }

    /// Add a stack register pair; one side must be ST0.
    pub fn fadd_st(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if dst.is_st0() && src.is_floating() {
            let sti = Self::st_index("fadd", &src)?;
            return self.put_fpu(0xD8, 0xC0, sti);
        }

        if dst.is_floating() && src.is_st0() {
            let sti = Self::st_index("fadd", &dst)?;
            return self.put_fpu(0xDC, 0xC0, sti);
        }

        Err(Error::shape("fadd", "one operand must be ST(0)"))
    }

    /// Add ST0 into ST(i) and pop.
    pub fn faddp(&mut self, dst: impl Into<Location>) -> Result {
        let sti = Self::st_index("faddp", &dst.into())?;
        self.put_fpu(0xDE, 0xC0, sti)
    }

    /// Divide ST0 by a memory float or a stack register.
    pub fn fdiv(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fdiv", &src)?;
            return self.put_fpu(0xD8, 0xF0, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fdiv", 0xD8, &src, 6),
                OpSize::Qword => self.put_fpu_mem("fdiv", 0xDC, &src, 6),
                _ => Err(Error::shape("fdiv", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fdiv", "invalid operand"))
    }

    /// Divide ST0 by a memory integer.
    pub fn fidiv(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("fidiv", 0xDE, &src, 6),
                OpSize::Dword => self.put_fpu_mem("fidiv", 0xDA, &src, 6),
                _ => Err(Error::shape("fidiv", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("fidiv", "invalid operand"))
    }

    /// Divide a stack register pair; one side must be ST0.
    pub fn fdiv_st(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if dst.is_st0() && src.is_floating() {
            let sti = Self::st_index("fdiv", &src)?;
            return self.put_fpu(0xD8, 0xF0, sti);
        }

        if dst.is_floating() && src.is_st0() {
            let sti = Self::st_index("fdiv", &dst)?;
            return self.put_fpu(0xDC, 0xF8, sti);
        }

        Err(Error::shape("fdiv", "one operand must be ST(0)"))
    }

    /// Divide ST(i) by ST0 and pop.
    pub fn fdivp(&mut self, dst: impl Into<Location>) -> Result {
        let sti = Self::st_index("fdivp", &dst.into())?;
        self.put_fpu(0xDE, 0xF8, sti)
    }

    /// Reverse divide: replace ST0 with operand / ST0.
    pub fn fdivr(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_floating() {
            let sti = Self::st_index("fdivr", &src)?;
            return self.put_fpu(0xD8, 0xF8, sti);
        }

        if src.is_memory() {
            return match src.size {
                OpSize::Dword => self.put_fpu_mem("fdivr", 0xD8, &src, 7),
                OpSize::Qword => self.put_fpu_mem("fdivr", 0xDC, &src, 7),
                _ => Err(Error::shape("fdivr", "expected a dword or qword memory operand")),
            };
        }

        Err(Error::shape("fdivr", "invalid operand"))
    }

    /// Reverse divide by a memory integer.
    pub fn fidivr(&mut self, src: impl Into<Location>) -> Result {
        let src = src.into();

        if src.is_memory() {
            return match src.size {
                OpSize::Word => self.put_fpu_mem("fidivr", 0xDE, &src, 7),
                OpSize::Dword => self.put_fpu_mem("fidivr", 0xDA, &src, 7),
                _ => Err(Error::shape("fidivr", "expected a word or dword memory operand")),
            };
        }

        Err(Error::shape("fidivr", "invalid operand"))
    }

    /// Reverse divide a stack register pair; one side must be ST0.
    pub fn fdivr_st(&mut self, dst: impl Into<Location>, src: impl Into<Location>) -> Result {
        let dst = dst.into();
        let src = src.into();

        if dst.is_st0() && src.is_floating() {
            let sti = Self::st_index("fdivr", &src)?;
            return self.put_fpu(0xD8, 0xF8, sti);
        }

        if dst.is_floating() && src.is_st0() {
            let sti = Self::st_index("fdivr", &dst)?;
            return self.put_fpu(0xDC, 0xF0, sti);
        }

        Err(Error::shape("fdivr", "one operand must be ST(0)"))
    }

    /// Reverse divide ST(i) and pop.
    pub fn fdivrp(&mut self, dst: impl Into<Location>) -> Result {
        let sti = Self::st_index("fdivrp", &dst.into())?;
        self.put_fpu(0xDE, 0xF0, sti)
    }
}
