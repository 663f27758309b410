use parse_display::Display;

use crate::constants::Wide;

/// A value-producing operand slot. Accepts a register index, an immediate
/// or the GPU selector; label references were already lowered to
/// instruction-index immediates by the loader.
///
/// Immediates are carried widened: every field is 16-bit except the source
/// of `MVR …, GPU`, and the loader enforces the width per field so the
/// executor never has to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Source {
    /// Value of register Rn.
    #[display("{0}")]
    Reg(u8),

    /// Literal word.
    #[display("i:{0}")]
    Imm(Wide),

    /// The GPU selector register.
    #[display("GPU")]
    Gpu,
}

/// Destination slot of `MVR`: a register or the GPU selector, never an
/// immediate. The loader is the single place that can reject an immediate
/// here, which keeps the invalid case unrepresentable at execution time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MoveDst {
    #[display("{0}")]
    Reg(u8),

    #[display("GPU")]
    Gpu,
}

/// One decoded instruction. Register-only slots (`READ` destination, `NOT`
/// operand) hold a bare register index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Instruction {
    /// Store a value into RAM.
    #[display("LOAD {0}, {1}")]
    Load(Source, Source),

    /// Load a RAM word into a register.
    #[display("READ {0}, {1}")]
    Read(Source, u8),

    /// Move a value into a register or the GPU selector. Does not clobber R0.
    #[display("MVR {0}, {1}")]
    Mvr(Source, MoveDst),

    /// RAM-to-RAM copy.
    #[display("MVM {0}, {1}")]
    Mvm(Source, Source),

    #[display("ADD {0}, {1}")]
    Add(Source, Source),

    #[display("SUB {0}, {1}")]
    Sub(Source, Source),

    /// Low word to R0, high word to R1.
    #[display("MULT {0}, {1}")]
    Mult(Source, Source),

    /// Signed quotient to R0, remainder to R1.
    #[display("DIV {0}, {1}")]
    Div(Source, Source),

    #[display("SHL {0}, {1}")]
    Shl(Source, Source),

    #[display("SHR {0}, {1}")]
    Shr(Source, Source),

    /// 16-bit left rotation.
    #[display("SHLR {0}, {1}")]
    Shlr(Source, Source),

    #[display("AND {0}, {1}")]
    And(Source, Source),

    #[display("OR {0}, {1}")]
    Or(Source, Source),

    #[display("XOR {0}, {1}")]
    Xor(Source, Source),

    /// In-place bitwise complement of a register. R0 is not written.
    #[display("NOT {0}")]
    Not(u8),

    #[display("JMP {0}")]
    Jmp(Source),

    /// Jump and link through R2.
    #[display("JAL {0}")]
    Jal(Source),

    /// Jump if the condition value is zero.
    #[display("JZ {0}, {1}")]
    Jz(Source, Source),

    #[display("JNZ {0}, {1}")]
    Jnz(Source, Source),

    /// Jump if x > y, unsigned.
    #[display("JBT {0}, {1}, {2}")]
    Jbt(Source, Source, Source),

    /// Block for a key code and store it at the given RAM address.
    #[display("KEYIN {0}")]
    Keyin(Source),

    #[display("HALT")]
    Halt,

    #[display("DRLINE {0}, {1}, {2}, {3}")]
    DrLine(Source, Source, Source, Source),

    #[display("DRGRD {0}, {1}, {2}, {3}")]
    DrGrd(Source, Source, Source, Source),

    #[display("CLRGRID {0}, {1}, {2}, {3}")]
    ClrGrid(Source, Source, Source, Source),

    #[display("LDSPR {0}, {1}")]
    LdSpr(Source, Source),

    #[display("DRSPR {0}, {1}, {2}")]
    DrSpr(Source, Source, Source),

    #[display("LDTXT {0}, {1}")]
    LdTxt(Source, Source),

    #[display("DRTXT {0}, {1}, {2}")]
    DrTxt(Source, Source, Source),

    #[display("SCRLBFR {0}, {1}")]
    ScrlBfr(Source, Source),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_round_trips_loader_syntax_test() {
        assert_eq!(
            Instruction::Mvr(Source::Imm(0x0001_0001), MoveDst::Gpu).to_string(),
            "MVR i:65537, GPU"
        );
        assert_eq!(
            Instruction::Add(Source::Reg(5), Source::Imm(2)).to_string(),
            "ADD 5, i:2"
        );
        assert_eq!(Instruction::Not(7).to_string(), "NOT 7");
        assert_eq!(
            Instruction::Jbt(Source::Imm(12), Source::Reg(5), Source::Reg(6)).to_string(),
            "JBT i:12, 5, 6"
        );
    }
}
