//! Two-pass assembly loader: text in, validated instruction stream out.
//!
//! The first pass walks the lines and binds every `label:` to the index of
//! the next instruction emitted. The second pass parses each instruction
//! line with the `nom` grammar below and resolves label references to
//! instruction-index immediates, so the executor never sees a name.
//!
//! ```text
//! line    ::= [label ':'] [opcode operand ("," operand)*] [comment]
//! operand ::= reg | imm | hex | label-ref | 'GPU'
//! reg     ::= decimal-int
//! imm     ::= 'i:' (decimal | '0x' hex)
//! hex     ::= '0x' hex-digits
//! ```

use std::collections::BTreeMap;

use nom::branch::alt;
use nom::bytes::complete::tag;
use nom::character::complete::{char, digit1, hex_digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_res, opt, verify};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, terminated};
use nom::IResult;
use thiserror::Error;
use tracing::debug;

use crate::constants::{Wide, Word};
use crate::runtime::{Instruction, MoveDst, Source};

/// Map of label name to instruction index.
pub type Labels = BTreeMap<String, Word>;

/// A loaded program: the instruction stream, the resolved label table and,
/// for each instruction, the 1-based source line it came from (the hook the
/// debugger uses for per-line breakpoints).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    pub instructions: Vec<Instruction>,
    pub labels: Labels,
    pub source_line_of: Vec<u32>,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("line {line}: {kind}")]
pub struct LoadError {
    pub line: u32,
    pub kind: LoadErrorKind,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoadErrorKind {
    #[error("unknown opcode {0:?}")]
    UnknownOpcode(String),

    #[error("{opcode} takes {expected} operand(s), got {got}")]
    WrongOperandCount {
        opcode: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("undefined label {0:?}")]
    UndefinedLabel(String),

    #[error("label {0:?} defined twice")]
    DuplicateLabel(String),

    #[error("register index {0} out of range (0..31)")]
    RegisterOutOfRange(u64),

    #[error("immediate {0} does not fit the field")]
    ImmediateTooLarge(u64),

    #[error("operand must be a register")]
    RegisterOnly,

    #[error("the GPU selector is written with `MVR …, GPU`, not {0}")]
    GpuNeedsMvr(&'static str),

    #[error("could not parse line")]
    Syntax,

    #[error("program does not fit the 16-bit program counter")]
    ProgramTooLarge,
}

/// An operand as written, before field validation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum RawOperand {
    Register(u64),
    Immediate(u64),
    Label(String),
    Gpu,
}

fn is_identifier_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

fn parse_identifier(input: &str) -> IResult<&str, &str> {
    verify(
        nom::bytes::complete::take_while1(is_identifier_char),
        |s: &str| s.chars().next().is_some_and(|c| !c.is_ascii_digit()),
    )(input)
}

fn parse_hex(input: &str) -> IResult<&str, u64> {
    preceded(
        alt((tag("0x"), tag("0X"))),
        map_res(hex_digit1, |digits| u64::from_str_radix(digits, 16)),
    )(input)
}

fn parse_decimal(input: &str) -> IResult<&str, u64> {
    map_res(digit1, str::parse)(input)
}

fn parse_operand(input: &str) -> IResult<&str, RawOperand> {
    alt((
        map(
            preceded(tag("i:"), alt((parse_hex, parse_decimal))),
            RawOperand::Immediate,
        ),
        map(parse_hex, RawOperand::Immediate),
        map(parse_decimal, RawOperand::Register),
        map(parse_identifier, |name| {
            if name == "GPU" {
                RawOperand::Gpu
            } else {
                RawOperand::Label(name.to_string())
            }
        }),
    ))(input)
}

type RawLine<'a> = (Option<&'a str>, Option<(&'a str, Vec<RawOperand>)>);

fn parse_line(input: &str) -> IResult<&str, RawLine<'_>> {
    let (rest, _) = space0(input)?;
    let (rest, label) = opt(terminated(
        parse_identifier,
        preceded(space0, char(':')),
    ))(rest)?;
    let (rest, _) = space0(rest)?;
    let (rest, content) = opt(|input| {
        let (rest, opcode) = parse_identifier(input)?;
        let (rest, operands) = opt(preceded(
            space1,
            separated_list1(delimited(space0, char(','), space0), parse_operand),
        ))(rest)?;
        Ok((rest, (opcode, operands.unwrap_or_default())))
    })(rest)?;
    let (rest, _) = space0(rest)?;
    Ok((rest, (label, content)))
}

/// Drop `//` and `;` comments.
fn strip_comment(line: &str) -> &str {
    let end = line
        .find("//")
        .into_iter()
        .chain(line.find(';'))
        .min()
        .unwrap_or(line.len());
    &line[..end]
}

/// Load a program from assembly text.
#[tracing::instrument(skip(source))]
pub fn load(source: &str) -> Result<Program, LoadError> {
    let at = |line: usize, kind| LoadError {
        line: line as u32 + 1,
        kind,
    };
    let parsed: Vec<RawLine> = source
        .lines()
        .enumerate()
        .map(|(number, line)| {
            all_consuming(parse_line)(strip_comment(line))
                .map(|(_, raw)| raw)
                .map_err(|_| at(number, LoadErrorKind::Syntax))
        })
        .collect::<Result<_, _>>()?;

    // First pass: bind each label to the next instruction index.
    let mut labels = Labels::new();
    let mut index: Word = 0;
    for (number, (label, content)) in parsed.iter().enumerate() {
        if let Some(name) = label {
            debug!(label = *name, index, "binding label");
            if labels.insert((*name).to_string(), index).is_some() {
                return Err(at(number, LoadErrorKind::DuplicateLabel((*name).to_string())));
            }
        }
        if content.is_some() {
            index = index
                .checked_add(1)
                .ok_or_else(|| at(number, LoadErrorKind::ProgramTooLarge))?;
        }
    }

    // Second pass: assemble, resolving label operands through the table.
    let mut instructions = Vec::new();
    let mut source_line_of = Vec::new();
    for (number, (_, content)) in parsed.iter().enumerate() {
        if let Some((opcode, operands)) = content {
            let instruction = assemble(opcode, operands, &labels)
                .map_err(|kind| at(number, kind))?;
            instructions.push(instruction);
            source_line_of.push(number as u32 + 1);
        }
    }

    Ok(Program {
        instructions,
        labels,
        source_line_of,
    })
}

/// Field widths for immediate validation.
#[derive(Clone, Copy, PartialEq)]
enum Width {
    Word,
    Wide,
}

fn value(raw: &RawOperand, labels: &Labels, width: Width) -> Result<Source, LoadErrorKind> {
    match raw {
        RawOperand::Register(i) => {
            if *i > 31 {
                Err(LoadErrorKind::RegisterOutOfRange(*i))
            } else {
                Ok(Source::Reg(*i as u8))
            }
        }
        RawOperand::Immediate(v) => {
            let max = match width {
                Width::Word => u64::from(Word::MAX),
                Width::Wide => u64::from(Wide::MAX),
            };
            if *v > max {
                Err(LoadErrorKind::ImmediateTooLarge(*v))
            } else {
                Ok(Source::Imm(*v as Wide))
            }
        }
        RawOperand::Label(name) => labels
            .get(name)
            .map(|&index| Source::Imm(Wide::from(index)))
            .ok_or_else(|| LoadErrorKind::UndefinedLabel(name.clone())),
        RawOperand::Gpu => Ok(Source::Gpu),
    }
}

/// A register-only slot (READ destination, NOT operand).
fn register(raw: &RawOperand) -> Result<u8, LoadErrorKind> {
    match raw {
        RawOperand::Register(i) if *i <= 31 => Ok(*i as u8),
        RawOperand::Register(i) => Err(LoadErrorKind::RegisterOutOfRange(*i)),
        _ => Err(LoadErrorKind::RegisterOnly),
    }
}

fn assemble(
    opcode: &str,
    operands: &[RawOperand],
    labels: &Labels,
) -> Result<Instruction, LoadErrorKind> {
    use Instruction::*;

    let opcode_upper = opcode.to_ascii_uppercase();
    let expect = |expected: usize, name: &'static str| {
        if operands.len() == expected {
            Ok(())
        } else {
            Err(LoadErrorKind::WrongOperandCount {
                opcode: name,
                expected,
                got: operands.len(),
            })
        }
    };
    let word = |i: usize| value(&operands[i], labels, Width::Word);

    Ok(match opcode_upper.as_str() {
        "LOAD" => {
            expect(2, "LOAD")?;
            if operands[1] == RawOperand::Gpu {
                return Err(LoadErrorKind::GpuNeedsMvr("LOAD"));
            }
            Load(word(0)?, word(1)?)
        }
        "READ" => {
            expect(2, "READ")?;
            Read(word(0)?, register(&operands[1])?)
        }
        "MVR" => {
            expect(2, "MVR")?;
            match &operands[1] {
                RawOperand::Gpu => Mvr(value(&operands[0], labels, Width::Wide)?, MoveDst::Gpu),
                raw => Mvr(word(0)?, MoveDst::Reg(register(raw)?)),
            }
        }
        "MVM" => {
            expect(2, "MVM")?;
            Mvm(word(0)?, word(1)?)
        }
        "ADD" => {
            expect(2, "ADD")?;
            Add(word(0)?, word(1)?)
        }
        "SUB" => {
            expect(2, "SUB")?;
            Sub(word(0)?, word(1)?)
        }
        "MULT" => {
            expect(2, "MULT")?;
            Mult(word(0)?, word(1)?)
        }
        "DIV" => {
            expect(2, "DIV")?;
            Div(word(0)?, word(1)?)
        }
        "SHL" => {
            expect(2, "SHL")?;
            Shl(word(0)?, word(1)?)
        }
        "SHR" => {
            expect(2, "SHR")?;
            Shr(word(0)?, word(1)?)
        }
        "SHLR" => {
            expect(2, "SHLR")?;
            Shlr(word(0)?, word(1)?)
        }
        "AND" => {
            expect(2, "AND")?;
            And(word(0)?, word(1)?)
        }
        "OR" => {
            expect(2, "OR")?;
            Or(word(0)?, word(1)?)
        }
        "XOR" => {
            expect(2, "XOR")?;
            Xor(word(0)?, word(1)?)
        }
        "NOT" => {
            expect(1, "NOT")?;
            Not(register(&operands[0])?)
        }
        "JMP" => {
            expect(1, "JMP")?;
            Jmp(word(0)?)
        }
        "JAL" => {
            expect(1, "JAL")?;
            Jal(word(0)?)
        }
        "JZ" => {
            expect(2, "JZ")?;
            Jz(word(0)?, word(1)?)
        }
        "JNZ" => {
            expect(2, "JNZ")?;
            Jnz(word(0)?, word(1)?)
        }
        "JBT" => {
            expect(3, "JBT")?;
            Jbt(word(0)?, word(1)?, word(2)?)
        }
        "KEYIN" => {
            expect(1, "KEYIN")?;
            Keyin(word(0)?)
        }
        "HALT" => {
            expect(0, "HALT")?;
            Halt
        }
        "DRLINE" => {
            expect(4, "DRLINE")?;
            DrLine(word(0)?, word(1)?, word(2)?, word(3)?)
        }
        "DRGRD" => {
            expect(4, "DRGRD")?;
            DrGrd(word(0)?, word(1)?, word(2)?, word(3)?)
        }
        "CLRGRID" => {
            expect(4, "CLRGRID")?;
            ClrGrid(word(0)?, word(1)?, word(2)?, word(3)?)
        }
        "LDSPR" => {
            expect(2, "LDSPR")?;
            LdSpr(word(0)?, word(1)?)
        }
        "DRSPR" => {
            expect(3, "DRSPR")?;
            DrSpr(word(0)?, word(1)?, word(2)?)
        }
        "LDTXT" => {
            expect(2, "LDTXT")?;
            LdTxt(word(0)?, word(1)?)
        }
        "DRTXT" => {
            expect(3, "DRTXT")?;
            DrTxt(word(0)?, word(1)?, word(2)?)
        }
        "SCRLBFR" => {
            expect(2, "SCRLBFR")?;
            ScrlBfr(word(0)?, word(1)?)
        }
        _ => return Err(LoadErrorKind::UnknownOpcode(opcode.to_string())),
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use Instruction::*;
    use Source::{Imm, Reg};

    #[test]
    fn operand_classification_test() {
        let program = load("ADD 5, i:10\nSUB i:0x10, 0x20\nAND GPU, i:1").unwrap();
        assert_eq!(
            program.instructions,
            vec![
                Add(Reg(5), Imm(10)),
                Sub(Imm(0x10), Imm(0x20)),
                And(Source::Gpu, Imm(1)),
            ]
        );
    }

    #[test]
    fn labels_bind_to_next_instruction_test() {
        let source = "\
start:
    MVR i:1, 5
loop: ADD 5, i:1
    JMP loop
    HALT";
        let program = load(source).unwrap();
        assert_eq!(program.labels.get("start"), Some(&0));
        assert_eq!(program.labels.get("loop"), Some(&1));
        // The reference was resolved to an instruction-index immediate.
        assert_eq!(program.instructions[2], Jmp(Imm(1)));
        assert_eq!(program.source_line_of, vec![2, 3, 4, 5]);
    }

    #[test]
    fn forward_reference_test() {
        let program = load("JMP end\nHALT\nend: HALT").unwrap();
        assert_eq!(program.instructions[0], Jmp(Imm(2)));
    }

    #[test]
    fn comments_and_blank_lines_test() {
        let source = "// header\n\nMVR i:1, 5 ; trailing\n   // indented\nHALT";
        let program = load(source).unwrap();
        assert_eq!(program.instructions.len(), 2);
        assert_eq!(program.source_line_of, vec![3, 5]);
    }

    #[test]
    fn undefined_label_test() {
        let err = load("JMP nowhere").unwrap_err();
        assert_eq!(err.line, 1);
        assert_eq!(
            err.kind,
            LoadErrorKind::UndefinedLabel("nowhere".to_string())
        );
    }

    #[test]
    fn duplicate_label_test() {
        let err = load("a: HALT\na: HALT").unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.kind, LoadErrorKind::DuplicateLabel("a".to_string()));
    }

    #[test]
    fn register_out_of_range_test() {
        let err = load("ADD 32, i:1").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::RegisterOutOfRange(32));
    }

    #[test]
    fn register_only_slots_reject_immediates_test() {
        assert_eq!(
            load("MVR i:1, i:2").unwrap_err().kind,
            LoadErrorKind::RegisterOnly
        );
        assert_eq!(
            load("READ i:0x1000, i:5").unwrap_err().kind,
            LoadErrorKind::RegisterOnly
        );
        assert_eq!(
            load("NOT i:5").unwrap_err().kind,
            LoadErrorKind::RegisterOnly
        );
    }

    #[test]
    fn immediate_width_test() {
        // 32-bit immediates only fit the MVR-to-GPU field.
        assert!(load("MVR i:0x00010001, GPU").is_ok());
        assert_eq!(
            load("MVR i:0x00010001, 5").unwrap_err().kind,
            LoadErrorKind::ImmediateTooLarge(0x0001_0001)
        );
        assert_eq!(
            load("ADD i:0x10000, 5").unwrap_err().kind,
            LoadErrorKind::ImmediateTooLarge(0x10000)
        );
    }

    #[test]
    fn load_to_gpu_is_rejected_test() {
        assert_eq!(
            load("LOAD i:1, GPU").unwrap_err().kind,
            LoadErrorKind::GpuNeedsMvr("LOAD")
        );
    }

    #[test]
    fn unknown_opcode_test() {
        let err = load("FROB 1, 2").unwrap_err();
        assert_eq!(err.kind, LoadErrorKind::UnknownOpcode("FROB".to_string()));
    }

    #[test]
    fn wrong_operand_count_test() {
        assert_eq!(
            load("JBT i:1, 2").unwrap_err().kind,
            LoadErrorKind::WrongOperandCount {
                opcode: "JBT",
                expected: 3,
                got: 2
            }
        );
        assert_eq!(
            load("HALT 1").unwrap_err().kind,
            LoadErrorKind::WrongOperandCount {
                opcode: "HALT",
                expected: 0,
                got: 1
            }
        );
    }

    #[test]
    fn keyin_demo_parses_test() {
        let program = load(
            "KEYIN i:0x1000\nKEYIN i:0x1001\nREAD i:0x1000, 5\nREAD i:0x1001, 6\nADD 5, 6\nHALT",
        )
        .unwrap();
        assert_eq!(program.instructions.len(), 6);
        assert_eq!(program.instructions[4], Add(Reg(5), Reg(6)));
    }
}
