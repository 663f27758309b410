//! Expression lowering. Every expression materializes into a register
//! (arithmetic goes through the R0/R1 ALU outputs and is copied out
//! immediately, since the next binary op clobbers them), except the void
//! GPU built-ins which produce [`Value::Void`].

use super::asm::{Op, Operand};
use super::symbols::Storage;
use super::{CompileError, Generator, Value};
use crate::constants as C;
use crate::parser::ast::*;

impl Value {
    /// The register holding this value. Only called after `expect_reg`.
    pub(crate) fn reg(&self) -> u8 {
        match self {
            Value::Reg { reg, .. } => *reg,
            Value::Void => unreachable!("void value used as operand"),
        }
    }
}

impl Generator {
    /// Force a value into a register; void values materialize as zero.
    pub(crate) fn expect_reg(&mut self, value: Value) -> Result<Value, CompileError> {
        match value {
            Value::Reg { .. } => Ok(value),
            Value::Void => {
                let reg = self.alloc_temp()?;
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Imm(0), Operand::Reg(reg)],
                    "void value",
                );
                Ok(Value::Reg { reg, owned: true })
            }
        }
    }

    fn lower_to_reg(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        let value = self.lower_expr(expr)?;
        self.expect_reg(value)
    }

    /// Fold an expression to a compile-time constant, with exactly the
    /// arithmetic the machine would do (16-bit wrap, signed division,
    /// sign-bit comparisons). Division by a constant zero is left to fault
    /// at run time.
    pub(crate) fn fold(&self, expr: &Expr) -> Option<C::Word> {
        match expr {
            Expr::Literal(v) => Some(*v),
            Expr::Unary { op, operand } => {
                let v = self.fold(operand)?;
                match op {
                    UnaryOp::Neg => Some(0u16.wrapping_sub(v)),
                    UnaryOp::BitNot => Some(!v),
                    UnaryOp::LogicalNot => Some(u16::from(v == 0)),
                    UnaryOp::AddressOf | UnaryOp::Deref => None,
                }
            }
            Expr::Binary { op, left, right } => {
                let a = self.fold(left)?;
                let b = self.fold(right)?;
                let sign = |x: C::Word| x & 0x8000 != 0;
                Some(match op {
                    BinaryOp::Add => a.wrapping_add(b),
                    BinaryOp::Sub => a.wrapping_sub(b),
                    BinaryOp::Mul => a.wrapping_mul(b),
                    BinaryOp::Div => {
                        if b == 0 {
                            return None;
                        }
                        (a as i16).wrapping_div(b as i16) as C::Word
                    }
                    BinaryOp::Mod => {
                        if b == 0 {
                            return None;
                        }
                        (a as i16).wrapping_rem(b as i16) as C::Word
                    }
                    BinaryOp::BitAnd => a & b,
                    BinaryOp::BitOr => a | b,
                    BinaryOp::BitXor => a ^ b,
                    BinaryOp::Shl => a << (b % 16),
                    BinaryOp::Shr => a >> (b % 16),
                    BinaryOp::Eq => u16::from(a == b),
                    BinaryOp::Ne => u16::from(a != b),
                    BinaryOp::Lt => u16::from(sign(a.wrapping_sub(b))),
                    BinaryOp::Gt => u16::from(sign(b.wrapping_sub(a))),
                    BinaryOp::Ge => u16::from(!sign(a.wrapping_sub(b))),
                    BinaryOp::Le => u16::from(!sign(b.wrapping_sub(a))),
                    BinaryOp::LogicalAnd => u16::from(a != 0 && b != 0),
                    BinaryOp::LogicalOr => u16::from(a != 0 || b != 0),
                })
            }
            _ => None,
        }
    }

    /// Lower an expression into an instruction operand: constants become
    /// immediates, everything else a register. Returns the value to
    /// release once the operand has been consumed.
    fn operand_for(&mut self, expr: &Expr) -> Result<(Operand, Option<Value>), CompileError> {
        if let Some(v) = self.fold(expr) {
            return Ok((Operand::Imm(u32::from(v)), None));
        }
        let value = self.lower_to_reg(expr)?;
        Ok((Operand::Reg(value.reg()), Some(value)))
    }

    pub(crate) fn lower_expr(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        if let Some(v) = self.fold(expr) {
            let reg = self.alloc_temp()?;
            self.emit_commented(
                Op::Mvr,
                vec![Operand::Imm(u32::from(v)), Operand::Reg(reg)],
                &format!("literal {v}"),
            );
            return Ok(Value::Reg { reg, owned: true });
        }

        match expr {
            // Handled by the fold above.
            Expr::Literal(_) => unreachable!("literals always fold"),

            Expr::Ident(name) => self.lower_ident(name),

            Expr::Unary { op, operand } => self.lower_unary(*op, operand),

            Expr::Binary { op, left, right } => match op {
                BinaryOp::LogicalAnd | BinaryOp::LogicalOr => {
                    self.lower_logical(*op, left, right)
                }
                BinaryOp::Eq
                | BinaryOp::Ne
                | BinaryOp::Lt
                | BinaryOp::Gt
                | BinaryOp::Le
                | BinaryOp::Ge => self.lower_comparison(*op, left, right),
                _ => self.lower_arith(*op, left, right),
            },

            Expr::Assign { target, value } => self.lower_assign(target, value),

            Expr::Call { name, args } => self.lower_call(name, args),

            Expr::Builtin { builtin, args } => self.lower_builtin(*builtin, args),

            Expr::Index { array, index } => {
                self.element_address_in_r0(array, index)?;
                let reg = self.alloc_temp()?;
                self.emit_commented(
                    Op::Read,
                    vec![Operand::Reg(0), Operand::Reg(reg)],
                    "load element",
                );
                Ok(Value::Reg { reg, owned: true })
            }
        }
    }

    fn lower_ident(&mut self, name: &str) -> Result<Value, CompileError> {
        if let Some(binding) = self.symbols.resolve(name) {
            let is_array = matches!(binding.ty, Type::Array(_, _));
            return match binding.storage {
                Storage::Register(reg) => Ok(Value::Reg { reg, owned: false }),
                Storage::Ram(address) => {
                    let reg = self.alloc_temp()?;
                    if is_array {
                        // Arrays decay to their base address.
                        self.emit_commented(
                            Op::Mvr,
                            vec![Operand::Imm(u32::from(address)), Operand::Reg(reg)],
                            &format!("{name} decays to its address"),
                        );
                    } else {
                        self.emit_commented(
                            Op::Read,
                            vec![Operand::Imm(u32::from(address)), Operand::Reg(reg)],
                            &format!("load {name}"),
                        );
                    }
                    Ok(Value::Reg { reg, owned: true })
                }
            };
        }
        if let Some(signature) = self.symbols.function(name) {
            let label = signature.label.clone();
            let reg = self.alloc_temp()?;
            self.emit_commented(
                Op::Mvr,
                vec![Operand::Label(label), Operand::Reg(reg)],
                &format!("address of function {name}"),
            );
            return Ok(Value::Reg { reg, owned: true });
        }
        Err(CompileError::UnknownName(name.to_string()))
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expr) -> Result<Value, CompileError> {
        match op {
            UnaryOp::Neg => {
                let reg = self.alloc_temp()?;
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Imm(0), Operand::Reg(reg)],
                    "negate",
                );
                let value = self.lower_to_reg(operand)?;
                self.emit(Op::Sub, vec![Operand::Reg(reg), Operand::Reg(value.reg())]);
                self.release(value);
                self.emit(Op::Mvr, vec![Operand::Reg(0), Operand::Reg(reg)]);
                Ok(Value::Reg { reg, owned: true })
            }

            UnaryOp::BitNot => {
                let value = self.lower_to_reg(operand)?;
                match value {
                    // A temp can be complemented in place; NOT leaves R0
                    // alone so nothing else moves.
                    Value::Reg { reg, owned: true } => {
                        self.emit(Op::Not, vec![Operand::Reg(reg)]);
                        Ok(value)
                    }
                    Value::Reg { reg, owned: false } => {
                        let dst = self.alloc_temp()?;
                        self.emit(Op::Mvr, vec![Operand::Reg(reg), Operand::Reg(dst)]);
                        self.emit(Op::Not, vec![Operand::Reg(dst)]);
                        Ok(Value::Reg {
                            reg: dst,
                            owned: true,
                        })
                    }
                    Value::Void => unreachable!("expect_reg materialized"),
                }
            }

            UnaryOp::LogicalNot => {
                let value = self.lower_to_reg(operand)?;
                let dst = self.alloc_temp()?;
                let true_label = self.fresh_label("true");
                let end_label = self.fresh_label("end");
                self.emit(
                    Op::Jz,
                    vec![Operand::Label(true_label.clone()), Operand::Reg(value.reg())],
                );
                self.release(value);
                self.emit(Op::Mvr, vec![Operand::Imm(0), Operand::Reg(dst)]);
                self.emit(Op::Jmp, vec![Operand::Label(end_label.clone())]);
                self.emit_label(true_label);
                self.emit(Op::Mvr, vec![Operand::Imm(1), Operand::Reg(dst)]);
                self.emit_label(end_label);
                Ok(Value::Reg {
                    reg: dst,
                    owned: true,
                })
            }

            UnaryOp::AddressOf => self.lower_address_of(operand),

            UnaryOp::Deref => {
                let value = self.lower_to_reg(operand)?;
                let reg = self.alloc_temp()?;
                self.emit_commented(
                    Op::Read,
                    vec![Operand::Reg(value.reg()), Operand::Reg(reg)],
                    "dereference",
                );
                self.release(value);
                Ok(Value::Reg { reg, owned: true })
            }
        }
    }

    fn lower_address_of(&mut self, operand: &Expr) -> Result<Value, CompileError> {
        match operand {
            Expr::Ident(name) => {
                let binding = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| CompileError::UnknownName(name.clone()))?;
                match binding.storage {
                    Storage::Ram(address) => {
                        let reg = self.alloc_temp()?;
                        self.emit_commented(
                            Op::Mvr,
                            vec![Operand::Imm(u32::from(address)), Operand::Reg(reg)],
                            &format!("address of {name}"),
                        );
                        Ok(Value::Reg { reg, owned: true })
                    }
                    // Addressed variables are placed in RAM up front.
                    Storage::Register(_) => Err(CompileError::NotAddressable),
                }
            }
            Expr::Index { array, index } => {
                self.element_address_in_r0(array, index)?;
                let reg = self.alloc_temp()?;
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Reg(0), Operand::Reg(reg)],
                    "element address",
                );
                Ok(Value::Reg { reg, owned: true })
            }
            // @*p is just p.
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
            } => self.lower_to_reg(operand),
            _ => Err(CompileError::NotAddressable),
        }
    }

    /// Leave the address of `array[index]` in R0 (the ADD output).
    fn element_address_in_r0(&mut self, array: &Expr, index: &Expr) -> Result<(), CompileError> {
        let array_base = match array {
            // An array variable's base address is an immediate.
            Expr::Ident(name) => self.symbols.resolve(name).and_then(|b| match b.storage {
                Storage::Ram(address) if matches!(b.ty, Type::Array(_, _)) => Some(address),
                _ => None,
            }),
            _ => None,
        };
        let base = match array_base {
            Some(address) => (Operand::Imm(u32::from(address)), None),
            None => {
                let value = self.lower_to_reg(array)?;
                (Operand::Reg(value.reg()), Some(value))
            }
        };
        let (index_op, index_value) = self.operand_for(index)?;
        self.emit_commented(
            Op::Add,
            vec![base.0, index_op],
            "element address to R0",
        );
        if let Some(value) = base.1 {
            self.release(value);
        }
        if let Some(value) = index_value {
            self.release(value);
        }
        Ok(())
    }

    fn lower_arith(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Value, CompileError> {
        let (opcode, result_reg) = match op {
            BinaryOp::Add => (Op::Add, 0),
            BinaryOp::Sub => (Op::Sub, 0),
            BinaryOp::Mul => (Op::Mult, 0),
            BinaryOp::Div => (Op::Div, 0),
            // The remainder comes out of DIV's secondary output.
            BinaryOp::Mod => (Op::Div, 1),
            BinaryOp::BitAnd => (Op::And, 0),
            BinaryOp::BitOr => (Op::Or, 0),
            BinaryOp::BitXor => (Op::Xor, 0),
            BinaryOp::Shl => (Op::Shl, 0),
            BinaryOp::Shr => (Op::Shr, 0),
            _ => unreachable!("dispatched in lower_expr"),
        };

        let (left_op, left_value) = self.operand_for(left)?;
        let (right_op, right_value) = self.operand_for(right)?;
        self.emit_commented(opcode, vec![left_op, right_op], &format!("{op}"));
        if let Some(value) = left_value {
            self.release(value);
        }
        if let Some(value) = right_value {
            self.release(value);
        }

        let dst = self.alloc_temp()?;
        self.emit(Op::Mvr, vec![Operand::Reg(result_reg), Operand::Reg(dst)]);
        Ok(Value::Reg {
            reg: dst,
            owned: true,
        })
    }

    /// Comparisons subtract and inspect the zero/sign condition of the
    /// difference, materializing 0 or 1.
    fn lower_comparison(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Value, CompileError> {
        // Gt/Le swap operands of Lt/Ge; Ge/Le invert the branch sense.
        let swapped = matches!(op, BinaryOp::Gt | BinaryOp::Le);
        let (a, b) = if swapped { (right, left) } else { (left, right) };
        let use_sign = !matches!(op, BinaryOp::Eq | BinaryOp::Ne);
        let jump_on_zero = matches!(op, BinaryOp::Eq | BinaryOp::Ge | BinaryOp::Le);

        let (a_op, a_value) = self.operand_for(a)?;
        let (b_op, b_value) = self.operand_for(b)?;
        self.emit_commented(Op::Sub, vec![a_op, b_op], &format!("{op}"));
        if use_sign {
            self.emit_commented(
                Op::And,
                vec![Operand::Reg(0), Operand::Imm(0x8000)],
                "sign bit of difference",
            );
        }
        if let Some(value) = a_value {
            self.release(value);
        }
        if let Some(value) = b_value {
            self.release(value);
        }

        let dst = self.alloc_temp()?;
        let true_label = self.fresh_label("true");
        let end_label = self.fresh_label("end");
        let jump = if jump_on_zero { Op::Jz } else { Op::Jnz };
        self.emit(
            jump,
            vec![Operand::Label(true_label.clone()), Operand::Reg(0)],
        );
        self.emit(Op::Mvr, vec![Operand::Imm(0), Operand::Reg(dst)]);
        self.emit(Op::Jmp, vec![Operand::Label(end_label.clone())]);
        self.emit_label(true_label);
        self.emit(Op::Mvr, vec![Operand::Imm(1), Operand::Reg(dst)]);
        self.emit_label(end_label);
        Ok(Value::Reg {
            reg: dst,
            owned: true,
        })
    }

    /// Short-circuit logical operators; the right operand only runs when
    /// the left one did not decide the result.
    fn lower_logical(
        &mut self,
        op: BinaryOp,
        left: &Expr,
        right: &Expr,
    ) -> Result<Value, CompileError> {
        let dst = self.alloc_temp()?;
        let end_label = self.fresh_label("end");
        match op {
            BinaryOp::LogicalAnd => {
                let false_label = self.fresh_label("false");
                let value = self.lower_to_reg(left)?;
                self.emit_commented(
                    Op::Jz,
                    vec![Operand::Label(false_label.clone()), Operand::Reg(value.reg())],
                    "&& short-circuit",
                );
                self.release(value);
                let value = self.lower_to_reg(right)?;
                self.emit(
                    Op::Jz,
                    vec![Operand::Label(false_label.clone()), Operand::Reg(value.reg())],
                );
                self.release(value);
                self.emit(Op::Mvr, vec![Operand::Imm(1), Operand::Reg(dst)]);
                self.emit(Op::Jmp, vec![Operand::Label(end_label.clone())]);
                self.emit_label(false_label);
                self.emit(Op::Mvr, vec![Operand::Imm(0), Operand::Reg(dst)]);
            }
            BinaryOp::LogicalOr => {
                let true_label = self.fresh_label("true");
                let value = self.lower_to_reg(left)?;
                self.emit_commented(
                    Op::Jnz,
                    vec![Operand::Label(true_label.clone()), Operand::Reg(value.reg())],
                    "|| short-circuit",
                );
                self.release(value);
                let value = self.lower_to_reg(right)?;
                self.emit(
                    Op::Jnz,
                    vec![Operand::Label(true_label.clone()), Operand::Reg(value.reg())],
                );
                self.release(value);
                self.emit(Op::Mvr, vec![Operand::Imm(0), Operand::Reg(dst)]);
                self.emit(Op::Jmp, vec![Operand::Label(end_label.clone())]);
                self.emit_label(true_label);
                self.emit(Op::Mvr, vec![Operand::Imm(1), Operand::Reg(dst)]);
            }
            _ => unreachable!("dispatched in lower_expr"),
        }
        self.emit_label(end_label);
        Ok(Value::Reg {
            reg: dst,
            owned: true,
        })
    }

    fn lower_assign(&mut self, target: &Expr, value: &Expr) -> Result<Value, CompileError> {
        match target {
            Expr::Ident(name) => {
                let binding = self
                    .symbols
                    .resolve(name)
                    .ok_or_else(|| CompileError::UnknownName(name.clone()))?;
                if !binding.writable {
                    return Err(CompileError::NotWritable(name.clone()));
                }
                let storage = binding.storage;
                let v = self.lower_to_reg(value)?;
                match storage {
                    Storage::Register(reg) => {
                        self.emit_commented(
                            Op::Mvr,
                            vec![Operand::Reg(v.reg()), Operand::Reg(reg)],
                            &format!("{name} ="),
                        );
                    }
                    Storage::Ram(address) => {
                        self.emit_commented(
                            Op::Load,
                            vec![Operand::Reg(v.reg()), Operand::Imm(u32::from(address))],
                            &format!("{name} ="),
                        );
                    }
                }
                Ok(v)
            }

            Expr::Index { array, index } => {
                let v = self.lower_to_reg(value)?;
                self.element_address_in_r0(array, index)?;
                self.emit_commented(
                    Op::Load,
                    vec![Operand::Reg(v.reg()), Operand::Reg(0)],
                    "store element",
                );
                Ok(v)
            }

            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
            } => {
                let v = self.lower_to_reg(value)?;
                let pointer = self.lower_to_reg(operand)?;
                self.emit_commented(
                    Op::Load,
                    vec![Operand::Reg(v.reg()), Operand::Reg(pointer.reg())],
                    "store through pointer",
                );
                self.release(pointer);
                Ok(v)
            }

            // The parser only lets the three shapes above through.
            _ => Err(CompileError::NotAddressable),
        }
    }

    fn lower_call(&mut self, name: &str, args: &[Expr]) -> Result<Value, CompileError> {
        if args.len() > C::MAX_ARGS {
            return Err(CompileError::TooManyArguments);
        }

        enum Target {
            Label(String),
            Pointer(u8),
        }

        let mut returns_value = true;
        let target = if let Some(signature) = self.symbols.function(name) {
            if signature.params.len() != args.len() {
                return Err(CompileError::WrongArity {
                    name: name.to_string(),
                    expected: signature.params.len(),
                    got: args.len(),
                });
            }
            returns_value = !matches!(signature.return_type, Type::Void);
            Target::Label(signature.label.clone())
        } else if self.symbols.resolve(name).is_some() {
            // Calling through a function pointer variable. The pointer is
            // copied above the argument window so the argument pops cannot
            // clobber it before the JAL.
            let pointer = Expr::Ident(name.to_string());
            let value = self.lower_to_reg(&pointer)?;
            let high = self
                .regs
                .alloc_high()
                .filter(|&reg| usize::from(reg) >= usize::from(C::ARG_BASE) + args.len())
                .ok_or(CompileError::RegisterPressure)?;
            self.emit_commented(
                Op::Mvr,
                vec![Operand::Reg(value.reg()), Operand::Reg(high)],
                "call target",
            );
            self.release(value);
            Target::Pointer(high)
        } else {
            return Err(CompileError::UnknownName(name.to_string()));
        };

        let result = if returns_value {
            Some(self.alloc_temp()?)
        } else {
            None
        };
        let live: Vec<u8> = self
            .regs
            .live()
            .into_iter()
            .filter(|&r| Some(r) != result)
            .collect();

        self.comment(&format!("call {name}"));
        for &reg in &live {
            self.push_reg(reg);
        }

        for arg in args {
            let value = self.lower_to_reg(arg)?;
            self.push_reg(value.reg());
            self.release(value);
        }
        for i in (0..args.len()).rev() {
            self.pop_reg(C::ARG_BASE + i as u8);
        }

        match &target {
            Target::Label(label) => {
                self.emit(Op::Jal, vec![Operand::Label(label.clone())]);
            }
            Target::Pointer(reg) => {
                self.emit(Op::Jal, vec![Operand::Reg(*reg)]);
                self.regs.release(*reg);
            }
        }

        if let Some(result) = result {
            self.emit_commented(
                Op::Mvr,
                vec![Operand::Reg(0), Operand::Reg(result)],
                "save return value",
            );
        }
        for &reg in live.iter().rev() {
            self.pop_reg(reg);
        }

        Ok(match result {
            Some(reg) => Value::Reg { reg, owned: true },
            None => Value::Void,
        })
    }

    fn lower_builtin(&mut self, builtin: Builtin, args: &[Expr]) -> Result<Value, CompileError> {
        if args.len() != builtin.arity() {
            return Err(CompileError::WrongArity {
                name: builtin.name().to_string(),
                expected: builtin.arity(),
                got: args.len(),
            });
        }

        let gpu_op = match builtin {
            Builtin::DrawLine => Some(Op::DrLine),
            Builtin::FillGrid => Some(Op::DrGrd),
            Builtin::ClearGrid => Some(Op::ClrGrid),
            Builtin::LoadSprite => Some(Op::LdSpr),
            Builtin::DrawSprite => Some(Op::DrSpr),
            Builtin::LoadText => Some(Op::LdTxt),
            Builtin::DrawText => Some(Op::DrTxt),
            Builtin::ScrollBuffer => Some(Op::ScrlBfr),
            _ => None,
        };
        if let Some(op) = gpu_op {
            let mut operands = Vec::with_capacity(args.len());
            let mut values = Vec::new();
            for arg in args {
                let (operand, value) = self.operand_for(arg)?;
                operands.push(operand);
                values.extend(value);
            }
            self.emit_commented(op, operands, builtin.name());
            for value in values {
                self.release(value);
            }
            return Ok(Value::Void);
        }

        match builtin {
            Builtin::Malloc => {
                let words = self
                    .fold(&args[0])
                    .ok_or(CompileError::DynamicAllocSize)?;
                let address = self.heap.alloc(usize::from(words))?;
                let reg = self.alloc_temp()?;
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Imm(u32::from(address)), Operand::Reg(reg)],
                    &format!("malloc({words})"),
                );
                Ok(Value::Reg { reg, owned: true })
            }

            Builtin::Free => {
                // Evaluated for effect only; the allocator is compile-time.
                let value = self.lower_expr(&args[0])?;
                self.release(value);
                self.comment("free() resolved at compile time");
                Ok(Value::Void)
            }

            Builtin::ReadChar => {
                let address = self.heap.alloc(1)?;
                self.emit_commented(
                    Op::Keyin,
                    vec![Operand::Imm(u32::from(address))],
                    "readChar",
                );
                let reg = self.alloc_temp()?;
                self.emit(
                    Op::Read,
                    vec![Operand::Imm(u32::from(address)), Operand::Reg(reg)],
                );
                Ok(Value::Reg { reg, owned: true })
            }

            Builtin::GetGpuBuffer => {
                let side = self
                    .fold(&args[0])
                    .ok_or(CompileError::DynamicBufferSide("getGPUBuffer"))?;
                match side {
                    0 => self.emit_commented(
                        Op::And,
                        vec![Operand::Gpu, Operand::Imm(1)],
                        "edit buffer bit",
                    ),
                    1 => self.emit_commented(
                        Op::Shr,
                        vec![Operand::Gpu, Operand::Imm(16)],
                        "display buffer bit",
                    ),
                    _ => return Err(CompileError::InvalidBufferSide("getGPUBuffer")),
                }
                let reg = self.alloc_temp()?;
                self.emit(Op::Mvr, vec![Operand::Reg(0), Operand::Reg(reg)]);
                Ok(Value::Reg { reg, owned: true })
            }

            Builtin::SetGpuBuffer => self.lower_selector_write(&args[0], &args[1]),

            _ => unreachable!("GPU ops handled above"),
        }
    }

    /// `setGPUBuffer(side, index)`: a read-modify-write of the selector.
    ///
    /// The display bit sits at bit 16, out of reach of 16-bit register
    /// arithmetic, so the write is a small decision tree over the preserved
    /// field (and the index when it is not a constant), each leaf a single
    /// wide-immediate `MVR …, GPU`.
    fn lower_selector_write(&mut self, side: &Expr, index: &Expr) -> Result<Value, CompileError> {
        let side = self
            .fold(side)
            .ok_or(CompileError::DynamicBufferSide("setGPUBuffer"))?;
        if side > 1 {
            return Err(CompileError::InvalidBufferSide("setGPUBuffer"));
        }

        // Selector word for (edit, display) with this side replaced.
        let compose = |index_bit: u32, other_bit: u32| -> u32 {
            match side {
                0 => (other_bit << 16) | index_bit,
                _ => (index_bit << 16) | other_bit,
            }
        };

        let index_const = self.fold(index);
        let index_value = match index_const {
            Some(_) => None,
            None => Some(self.lower_to_reg(index)?),
        };

        // Read the field we are keeping into R0.
        match side {
            0 => self.emit_commented(
                Op::Shr,
                vec![Operand::Gpu, Operand::Imm(16)],
                "keep display bit",
            ),
            _ => self.emit_commented(
                Op::And,
                vec![Operand::Gpu, Operand::Imm(1)],
                "keep edit bit",
            ),
        }

        let other_zero = self.fresh_label("false");
        let end_label = self.fresh_label("end");
        self.emit(
            Op::Jz,
            vec![Operand::Label(other_zero.clone()), Operand::Reg(0)],
        );
        self.selector_leaf(index_const, &index_value, 1, compose, &end_label, false)?;
        self.emit_label(other_zero);
        self.selector_leaf(index_const, &index_value, 0, compose, &end_label, true)?;
        self.emit_label(end_label);

        if let Some(value) = index_value {
            self.release(value);
        }
        Ok(Value::Void)
    }

    /// One branch of the selector write: the preserved field is known, the
    /// index may still need a branch of its own.
    fn selector_leaf(
        &mut self,
        index_const: Option<C::Word>,
        index_value: &Option<Value>,
        other_bit: u32,
        compose: impl Fn(u32, u32) -> u32,
        end_label: &str,
        last: bool,
    ) -> Result<(), CompileError> {
        match index_const {
            Some(index) => {
                let word = compose(u32::from(index & 1), other_bit);
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Imm(word), Operand::Gpu],
                    "selector",
                );
                if !last {
                    self.emit(Op::Jmp, vec![Operand::Label(end_label.to_string())]);
                }
            }
            None => {
                let reg = index_value.as_ref().expect("dynamic index value").reg();
                let index_zero = self.fresh_label("false");
                self.emit(
                    Op::Jz,
                    vec![Operand::Label(index_zero.clone()), Operand::Reg(reg)],
                );
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Imm(compose(1, other_bit)), Operand::Gpu],
                    "selector",
                );
                self.emit(Op::Jmp, vec![Operand::Label(end_label.to_string())]);
                self.emit_label(index_zero);
                self.emit_commented(
                    Op::Mvr,
                    vec![Operand::Imm(compose(0, other_bit)), Operand::Gpu],
                    "selector",
                );
                if !last {
                    self.emit(Op::Jmp, vec![Operand::Label(end_label.to_string())]);
                }
            }
        }
        Ok(())
    }
}
