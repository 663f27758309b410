//! The textual instruction model the code generator emits. Labels are still
//! symbolic here; the loader turns them into instruction indices.

use parse_display::Display;

use crate::constants::Wide;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[display(style = "UPPERCASE")]
pub enum Op {
    Load,
    Read,
    Mvr,
    Mvm,
    Add,
    Sub,
    Mult,
    Div,
    Shl,
    Shr,
    Shlr,
    And,
    Or,
    Xor,
    Not,
    Jmp,
    Jal,
    Jz,
    Jnz,
    Jbt,
    Keyin,
    Halt,
    DrLine,
    DrGrd,
    ClrGrid,
    LdSpr,
    DrSpr,
    LdTxt,
    DrTxt,
    ScrlBfr,
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum Operand {
    /// Register index.
    #[display("{0}")]
    Reg(u8),

    /// Immediate value.
    #[display("i:{0}")]
    Imm(Wide),

    /// Unresolved label reference.
    #[display("{0}")]
    Label(String),

    /// The GPU selector register.
    #[display("GPU")]
    Gpu,
}

/// One output line: optional label, optional instruction, optional comment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Line {
    pub label: Option<String>,
    pub op: Option<(Op, Vec<Operand>)>,
    pub comment: Option<String>,
}

impl std::fmt::Display for Line {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut wrote = false;
        if let Some(ref label) = self.label {
            write!(f, "{label}:")?;
            wrote = true;
        }
        if let Some((op, ref operands)) = self.op {
            if wrote {
                write!(f, " ")?;
            } else {
                write!(f, "    ")?;
            }
            write!(f, "{op}")?;
            for (i, operand) in operands.iter().enumerate() {
                if i == 0 {
                    write!(f, " {operand}")?;
                } else {
                    write!(f, ", {operand}")?;
                }
            }
            wrote = true;
        }
        if let Some(ref comment) = self.comment {
            if wrote {
                write!(f, "  ")?;
            }
            write!(f, "// {comment}")?;
        }
        Ok(())
    }
}

/// Render a whole program.
pub fn render(lines: &[Line]) -> String {
    let mut out = String::new();
    for line in lines {
        out.push_str(&line.to_string());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_rendering_test() {
        let line = Line {
            label: Some("loop_1".into()),
            op: Some((Op::Add, vec![Operand::Reg(5), Operand::Imm(1)])),
            comment: Some("step".into()),
        };
        assert_eq!(line.to_string(), "loop_1: ADD 5, i:1  // step");

        let plain = Line {
            op: Some((Op::Halt, vec![])),
            ..Default::default()
        };
        assert_eq!(plain.to_string(), "    HALT");

        let label_only = Line {
            label: Some("end_2".into()),
            ..Default::default()
        };
        assert_eq!(label_only.to_string(), "end_2:");
    }

    #[test]
    fn opcode_names_match_loader_test() {
        assert_eq!(Op::ClrGrid.to_string(), "CLRGRID");
        assert_eq!(Op::ScrlBfr.to_string(), "SCRLBFR");
        assert_eq!(Op::Mvr.to_string(), "MVR");
    }
}
