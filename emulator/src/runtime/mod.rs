//! The virtual machine core: register file, RAM, GPU and the fetch/decode/
//! execute loop. One [`Machine::step`] executes exactly one instruction.

use thiserror::Error;
use tracing::debug;

use crate::constants as C;

mod gpu;
mod instructions;
mod memory;
mod registers;

pub use self::gpu::{Frame, Gpu};
pub use self::instructions::{Instruction, MoveDst, Source};
pub use self::memory::Ram;
pub use self::registers::{Registers, Selector};

/// Why a step could not complete. Fatal to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FaultKind {
    #[error("division by zero")]
    DivByZero,

    #[error("invalid operand")]
    InvalidOperand,

    #[error("coordinate or id out of range")]
    OutOfRange,

    #[error("program counter out of range")]
    BadPc,
}

impl FaultKind {
    /// Stable identifier for programmatic consumers.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            FaultKind::DivByZero => "div-by-zero",
            FaultKind::InvalidOperand => "invalid-operand",
            FaultKind::OutOfRange => "out-of-range",
            FaultKind::BadPc => "bad-pc",
        }
    }
}

/// A fault report: what went wrong, where, and the offending instruction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("fault at pc {pc}: {kind} in `{instruction}`")]
pub struct Fault {
    pub kind: FaultKind,
    /// Program counter of the faulting instruction.
    pub pc: C::Word,
    /// Rendered instruction text, for diagnostics.
    pub instruction: String,
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Running,
    Halted,
    Fault(Fault),
}

/// What KEYIN got from the host.
pub enum KeyEvent {
    /// A 6-bit character code.
    Code(C::Word),
    /// Input is gone (EOF) or the host asked to stop. Surfaces as an
    /// orderly halt; RAM is left unchanged.
    Closed,
}

/// Where KEYIN gets its codes. Implementations may block; a blocked source
/// must return [`KeyEvent::Closed`] when the host cancels the run.
pub trait KeySource {
    fn next_key(&mut self) -> KeyEvent;
}

enum Flow {
    Next,
    Jump(C::Word),
    Halt,
}

/// The whole guest state: one owned object, held mutably by the host
/// between ticks.
pub struct Machine {
    pub registers: Registers,
    pub ram: Ram,
    pub gpu: Gpu,
    program: Vec<Instruction>,
}

impl Machine {
    #[must_use]
    pub fn new(program: Vec<Instruction>) -> Self {
        Self {
            registers: Registers::default(),
            ram: Ram::default(),
            gpu: Gpu::default(),
            program,
        }
    }

    #[must_use]
    pub fn program(&self) -> &[Instruction] {
        &self.program
    }

    /// Execute one instruction.
    #[tracing::instrument(skip_all, fields(pc = self.registers.pc))]
    pub fn step(&mut self, keys: &mut dyn KeySource) -> StepOutcome {
        let pc = self.registers.pc;
        let Some(&instruction) = self.program.get(pc as usize) else {
            return StepOutcome::Fault(Fault {
                kind: FaultKind::BadPc,
                pc,
                instruction: String::from("<end of program>"),
            });
        };

        debug!(%instruction, "executing");
        match self.execute(instruction, pc, keys) {
            Ok(Flow::Next) => {
                self.registers.pc = pc.wrapping_add(1);
                StepOutcome::Running
            }
            Ok(Flow::Jump(target)) => {
                self.registers.pc = target;
                StepOutcome::Running
            }
            Ok(Flow::Halt) => StepOutcome::Halted,
            Err(kind) => StepOutcome::Fault(Fault {
                kind,
                pc,
                instruction: instruction.to_string(),
            }),
        }
    }

    /// Resolve a word-valued operand. The GPU selector is not a plain word
    /// source; only `MVR` and the widened bitwise/shift ops accept it.
    fn word(&self, source: Source) -> Result<C::Word, FaultKind> {
        match source {
            Source::Reg(i) => Ok(self.registers.get(i)),
            Source::Imm(v) => Ok(v as C::Word),
            Source::Gpu => Err(FaultKind::InvalidOperand),
        }
    }

    /// Resolve an operand at selector width.
    fn wide(&self, source: Source) -> C::Wide {
        match source {
            Source::Reg(i) => C::Wide::from(self.registers.get(i)),
            Source::Imm(v) => v,
            Source::Gpu => self.gpu.selector(),
        }
    }

    fn set_alu(&mut self, value: C::Word) {
        self.registers.set(C::ALU_OUT, value);
    }

    /// The shift/bitwise group: widened to 32 bits when the first operand is
    /// the GPU selector, plain 16-bit otherwise. This is what lets compiled
    /// code extract the display bit with `SHR GPU, i:16`.
    fn bitwise(
        &mut self,
        a: Source,
        b: Source,
        op: impl Fn(C::Wide, u32) -> C::Wide,
    ) -> Result<(), FaultKind> {
        let wide = matches!(a, Source::Gpu);
        let a = self.wide(a);
        let b = u32::from(self.word(b)?);
        let result = if wide { op(a, b) } else { op(a & 0xFFFF, b) };
        self.set_alu(result as C::Word);
        Ok(())
    }

    fn execute(
        &mut self,
        instruction: Instruction,
        pc: C::Word,
        keys: &mut dyn KeySource,
    ) -> Result<Flow, FaultKind> {
        use Instruction::*;

        match instruction {
            Load(value, addr) => {
                let value = self.word(value)?;
                let addr = self.word(addr)?;
                self.ram.set(addr, value);
            }

            Read(addr, dst) => {
                let value = self.ram.get(self.word(addr)?);
                self.registers.set(dst, value);
            }

            Mvr(src, MoveDst::Gpu) => {
                let value = self.wide(src);
                self.gpu.set_selector(value);
            }

            Mvr(src, MoveDst::Reg(dst)) => {
                let value = self.wide(src) as C::Word;
                self.registers.set(dst, value);
            }

            Mvm(src, dst) => {
                let value = self.ram.get(self.word(src)?);
                let dst = self.word(dst)?;
                self.ram.set(dst, value);
            }

            Add(a, b) => {
                let result = self.word(a)?.wrapping_add(self.word(b)?);
                self.set_alu(result);
            }

            Sub(a, b) => {
                let result = self.word(a)?.wrapping_sub(self.word(b)?);
                self.set_alu(result);
            }

            Mult(a, b) => {
                let product = u32::from(self.word(a)?) * u32::from(self.word(b)?);
                self.set_alu(product as C::Word);
                self.registers.set(C::ALU_AUX, (product >> 16) as C::Word);
            }

            Div(a, b) => {
                let a = self.word(a)? as i16;
                let b = self.word(b)? as i16;
                if b == 0 {
                    return Err(FaultKind::DivByZero);
                }
                // Truncation toward zero; the remainder takes the sign of
                // the dividend. i16::MIN / -1 wraps like everything else.
                self.set_alu(a.wrapping_div(b) as C::Word);
                self.registers.set(C::ALU_AUX, a.wrapping_rem(b) as C::Word);
            }

            Shl(a, b) => {
                let wide = matches!(a, Source::Gpu);
                let amount = u32::from(self.word(b)?);
                let value = self.wide(a);
                let result = if wide {
                    value << (amount % 32)
                } else {
                    (value & 0xFFFF) << (amount % 16)
                };
                self.set_alu(result as C::Word);
            }

            Shr(a, b) => {
                let wide = matches!(a, Source::Gpu);
                let amount = u32::from(self.word(b)?);
                let value = self.wide(a);
                let result = if wide {
                    value >> (amount % 32)
                } else {
                    (value & 0xFFFF) >> (amount % 16)
                };
                self.set_alu(result as C::Word);
            }

            Shlr(a, b) => {
                let amount = u32::from(self.word(b)?) % 16;
                let value = self.word(a)?;
                self.set_alu(value.rotate_left(amount));
            }

            And(a, b) => self.bitwise(a, b, |a, b| a & b)?,
            Or(a, b) => self.bitwise(a, b, |a, b| a | b)?,
            Xor(a, b) => self.bitwise(a, b, |a, b| a ^ b)?,

            Not(reg) => {
                let value = self.registers.get(reg);
                self.registers.set(reg, !value);
            }

            Jmp(target) => return Ok(Flow::Jump(self.word(target)?)),

            Jal(target) => {
                let target = self.word(target)?;
                self.registers.set(C::LINK, pc.wrapping_add(1));
                return Ok(Flow::Jump(target));
            }

            Jz(target, cond) => {
                let target = self.word(target)?;
                if self.word(cond)? == 0 {
                    return Ok(Flow::Jump(target));
                }
            }

            Jnz(target, cond) => {
                let target = self.word(target)?;
                if self.word(cond)? != 0 {
                    return Ok(Flow::Jump(target));
                }
            }

            Jbt(target, x, y) => {
                let target = self.word(target)?;
                if self.word(x)? > self.word(y)? {
                    return Ok(Flow::Jump(target));
                }
            }

            Keyin(addr) => {
                let addr = self.word(addr)?;
                match keys.next_key() {
                    KeyEvent::Code(code) => self.ram.set(addr, code & 0x3F),
                    KeyEvent::Closed => return Ok(Flow::Halt),
                }
            }

            Halt => return Ok(Flow::Halt),

            DrLine(x1, y1, x2, y2) => {
                let (x1, y1) = (self.word(x1)?, self.word(y1)?);
                let (x2, y2) = (self.word(x2)?, self.word(y2)?);
                self.gpu.draw_line(x1, y1, x2, y2)?;
            }

            DrGrd(x, y, w, h) => {
                let (x, y) = (self.word(x)?, self.word(y)?);
                let (w, h) = (self.word(w)?, self.word(h)?);
                self.gpu.fill_rect(x, y, w, h)?;
            }

            ClrGrid(x, y, w, h) => {
                let (x, y) = (self.word(x)?, self.word(y)?);
                let (w, h) = (self.word(w)?, self.word(h)?);
                self.gpu.clear_rect(x, y, w, h)?;
            }

            LdSpr(id, data) => {
                let (id, data) = (self.word(id)?, self.word(data)?);
                self.gpu.load_sprite(id, data)?;
            }

            DrSpr(id, x, y) => {
                let (id, x, y) = (self.word(id)?, self.word(x)?, self.word(y)?);
                self.gpu.draw_sprite(id, x, y)?;
            }

            LdTxt(id, code) => {
                let (id, code) = (self.word(id)?, self.word(code)?);
                self.gpu.load_text(id, code)?;
            }

            DrTxt(id, x, y) => {
                let (id, x, y) = (self.word(id)?, self.word(x)?, self.word(y)?);
                self.gpu.draw_text(id, x, y)?;
            }

            ScrlBfr(offx, offy) => {
                let (offx, offy) = (self.word(offx)?, self.word(offy)?);
                self.gpu.scroll(offx, offy);
            }
        }

        Ok(Flow::Next)
    }
}

/// A key source for programs that never execute KEYIN.
pub struct NoInput;

impl KeySource for NoInput {
    fn next_key(&mut self) -> KeyEvent {
        KeyEvent::Closed
    }
}
