//! The compiler back end: lowers a typed AST to assembly text.
//!
//! Calling convention: arguments in R4, R5, R6, …; return value in R0;
//! return address in R2. Every non-main epilogue jumps to the shared
//! `caller_return` trampoline emitted once at the end of the program, which
//! jumps through R2. Call sites save the caller's live registers on the
//! software stack at [R3], so recursion needs no per-function frames and
//! leaf functions never touch memory.

use thiserror::Error;
use tracing::debug;

use crate::constants as C;
use crate::parser::ast::*;

pub mod asm;
mod expr;
mod symbols;
mod regalloc;

use self::asm::{Line, Op, Operand};
use self::regalloc::RegisterAllocator;
use self::symbols::{Binding, HeapCursor, Signature, Storage, SymbolTable};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("unknown name {0:?}")]
    UnknownName(String),

    #[error("{0:?} cannot be assigned to")]
    NotWritable(String),

    #[error("{name} takes {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("functions take at most {} arguments", C::MAX_ARGS)]
    TooManyArguments,

    #[error("no `main` function")]
    MissingMain,

    #[error("function {0:?} defined twice")]
    DuplicateFunction(String),

    #[error("expression too deep for the register file")]
    RegisterPressure,

    #[error("static memory exhausted")]
    OutOfStaticMemory,

    #[error("cannot take the address of this expression")]
    NotAddressable,

    #[error("array variables cannot have an initializer")]
    ArrayInitializer,

    #[error("{0} requires a compile-time constant buffer side")]
    DynamicBufferSide(&'static str),

    #[error("{0} buffer side must be 0 or 1")]
    InvalidBufferSide(&'static str),

    #[error("malloc size must be a compile-time constant")]
    DynamicAllocSize,

    #[error("`break` outside a loop or switch")]
    BreakOutsideLoop,

    #[error("`continue` outside a loop")]
    ContinueOutsideLoop,
}

/// Result of lowering an expression: a register holding the value, or
/// nothing for the void built-ins. `owned` distinguishes generator temps
/// (released after use) from a variable's home register.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Value {
    Reg { reg: u8, owned: bool },
    Void,
}

struct Frame {
    is_main: bool,
    /// Register holding the saved link, for functions that make calls.
    saved_link: Option<u8>,
}

pub struct Generator {
    lines: Vec<Line>,
    symbols: SymbolTable,
    regs: RegisterAllocator,
    heap: HeapCursor,
    label_counter: u32,
    frame: Frame,
    /// Variables of the current function whose address is taken.
    frame_addressed: std::collections::BTreeSet<String>,
    break_labels: Vec<String>,
    continue_labels: Vec<String>,
}

/// Lower a whole program to assembly text. Pure: the same AST always
/// produces byte-identical output.
#[tracing::instrument(skip(ast))]
pub fn generate(ast: &Ast) -> Result<String, CompileError> {
    let mut generator = Generator {
        lines: Vec::new(),
        symbols: SymbolTable::default(),
        regs: RegisterAllocator::for_function(0),
        heap: HeapCursor::default(),
        label_counter: 0,
        frame: Frame {
            is_main: true,
            saved_link: None,
        },
        frame_addressed: std::collections::BTreeSet::new(),
        break_labels: Vec::new(),
        continue_labels: Vec::new(),
    };
    generator.program(ast)?;
    Ok(asm::render(&generator.lines))
}

impl Generator {
    // ------------------------------------------------------------------
    // Emission helpers
    // ------------------------------------------------------------------

    pub(crate) fn emit(&mut self, op: Op, operands: Vec<Operand>) {
        self.lines.push(Line {
            op: Some((op, operands)),
            ..Default::default()
        });
    }

    pub(crate) fn emit_commented(&mut self, op: Op, operands: Vec<Operand>, comment: &str) {
        self.lines.push(Line {
            op: Some((op, operands)),
            comment: Some(comment.to_string()),
            ..Default::default()
        });
    }

    pub(crate) fn emit_label(&mut self, label: String) {
        self.lines.push(Line {
            label: Some(label),
            ..Default::default()
        });
    }

    pub(crate) fn comment(&mut self, text: &str) {
        self.lines.push(Line {
            comment: Some(text.to_string()),
            ..Default::default()
        });
    }

    /// A fresh label with a monotonically increasing suffix.
    pub(crate) fn fresh_label(&mut self, prefix: &str) -> String {
        let label = format!("{prefix}_{}", self.label_counter);
        self.label_counter += 1;
        label
    }

    pub(crate) fn alloc_temp(&mut self) -> Result<u8, CompileError> {
        self.regs.alloc().ok_or(CompileError::RegisterPressure)
    }

    pub(crate) fn release(&mut self, value: Value) {
        if let Value::Reg { reg, owned: true } = value {
            self.regs.release(reg);
        }
    }

    /// Push a register onto the software stack. R0 is used as scratch.
    pub(crate) fn push_reg(&mut self, reg: u8) {
        self.emit(Op::Sub, vec![Operand::Reg(C::STACK_POINTER), Operand::Imm(1)]);
        self.emit(Op::Mvr, vec![Operand::Reg(0), Operand::Reg(C::STACK_POINTER)]);
        self.emit_commented(
            Op::Load,
            vec![Operand::Reg(reg), Operand::Reg(C::STACK_POINTER)],
            &format!("push R{reg}"),
        );
    }

    /// Pop the top of the software stack into a register.
    pub(crate) fn pop_reg(&mut self, reg: u8) {
        self.emit_commented(
            Op::Read,
            vec![Operand::Reg(C::STACK_POINTER), Operand::Reg(reg)],
            &format!("pop R{reg}"),
        );
        self.emit(Op::Add, vec![Operand::Reg(C::STACK_POINTER), Operand::Imm(1)]);
        self.emit(Op::Mvr, vec![Operand::Reg(0), Operand::Reg(C::STACK_POINTER)]);
    }

    // ------------------------------------------------------------------
    // Program structure
    // ------------------------------------------------------------------

    fn program(&mut self, ast: &Ast) -> Result<(), CompileError> {
        // Signatures first, so calls can be checked in any order.
        for item in &ast.items {
            if let Item::Function(f) = item {
                if self.symbols.function(&f.name).is_some() {
                    return Err(CompileError::DuplicateFunction(f.name.clone()));
                }
                self.symbols.define_function(
                    &f.name,
                    Signature {
                        params: f.params.iter().map(|p| p.ty.clone()).collect(),
                        return_type: f.return_type.clone(),
                        label: format!("fn_{}", f.name),
                    },
                );
            }
        }
        if self.symbols.function("main").is_none() {
            return Err(CompileError::MissingMain);
        }

        self.symbols.enter_scope(); // global scope, never exited

        self.emit_commented(
            Op::Mvr,
            vec![
                Operand::Imm(u32::from(C::STACK_TOP)),
                Operand::Reg(C::STACK_POINTER),
            ],
            "initialize stack pointer",
        );

        // Global initializers run before the jump to main.
        for item in &ast.items {
            if let Item::Global { name, ty, init } = item {
                self.global(name, ty, init.as_ref())?;
            }
        }

        self.emit_commented(Op::Jmp, vec![Operand::Label("fn_main".into())], "enter main");

        for item in &ast.items {
            if let Item::Function(f) = item {
                self.function(f)?;
            }
        }

        // The shared return trampoline: every non-main epilogue lands here.
        self.emit_label("caller_return".into());
        self.emit_commented(Op::Jmp, vec![Operand::Reg(C::LINK)], "return through R2");
        Ok(())
    }

    fn global(
        &mut self,
        name: &str,
        ty: &Type,
        init: Option<&Expr>,
    ) -> Result<(), CompileError> {
        let address = self.heap.alloc(ty.size())?;
        debug!(name, address, "placing global");
        if matches!(ty, Type::Array(_, _)) && init.is_some() {
            return Err(CompileError::ArrayInitializer);
        }
        if let Some(init) = init {
            if let Some(value) = self.fold(init) {
                self.emit_commented(
                    Op::Load,
                    vec![Operand::Imm(u32::from(value)), Operand::Imm(u32::from(address))],
                    &format!("init global {name}"),
                );
            } else {
                let value = self.lower_expr(init)?;
                let value = self.expect_reg(value)?;
                self.emit_commented(
                    Op::Load,
                    vec![Operand::Reg(value.reg()), Operand::Imm(u32::from(address))],
                    &format!("init global {name}"),
                );
                self.release(value);
            }
        }
        self.symbols.define(Binding {
            name: name.to_string(),
            ty: ty.clone(),
            storage: Storage::Ram(address),
            // An array name is its address; only its elements are stores.
            writable: !matches!(ty, Type::Array(_, _)),
        });
        Ok(())
    }

    fn function(&mut self, f: &Function) -> Result<(), CompileError> {
        if f.params.len() > C::MAX_ARGS {
            return Err(CompileError::TooManyArguments);
        }
        debug!(name = %f.name, "lowering function");

        self.regs = RegisterAllocator::for_function(f.params.len());
        self.frame = Frame {
            is_main: f.name == "main",
            saved_link: None,
        };

        let label = self
            .symbols
            .function(&f.name)
            .expect("signature registered above")
            .label
            .clone();
        self.emit_label(label);
        self.symbols.enter_scope();

        self.frame_addressed = addressed_names(&f.body);
        for (i, param) in f.params.iter().enumerate() {
            let home = C::ARG_BASE + i as u8;
            let storage = if self.frame_addressed.contains(&param.name) {
                // The address-of operator needs a RAM home; move the
                // argument there on entry.
                let address = self.heap.alloc(1)?;
                self.emit_commented(
                    Op::Load,
                    vec![Operand::Reg(home), Operand::Imm(u32::from(address))],
                    &format!("param {} has its address taken", param.name),
                );
                self.regs.release(home);
                Storage::Ram(address)
            } else {
                Storage::Register(home)
            };
            self.symbols.define(Binding {
                name: param.name.clone(),
                ty: param.ty.clone(),
                storage,
                writable: true,
            });
        }

        if !self.frame.is_main && makes_calls(&f.body) {
            let reg = self.alloc_temp()?;
            self.emit_commented(
                Op::Mvr,
                vec![Operand::Reg(C::LINK), Operand::Reg(reg)],
                "preserve link register across nested calls",
            );
            self.frame.saved_link = Some(reg);
        }

        for stmt in &f.body {
            self.statement(stmt)?;
        }

        if !ends_with_return(&f.body) {
            self.emit_commented(
                Op::Mvr,
                vec![Operand::Imm(0), Operand::Reg(0)],
                "implicit return 0",
            );
            self.epilogue();
        }

        self.exit_scope_releasing();
        Ok(())
    }

    pub(crate) fn epilogue(&mut self) {
        if self.frame.is_main {
            self.emit(Op::Halt, vec![]);
        } else {
            if let Some(reg) = self.frame.saved_link {
                self.emit(Op::Mvr, vec![Operand::Reg(reg), Operand::Reg(C::LINK)]);
            }
            self.emit(Op::Jmp, vec![Operand::Label("caller_return".into())]);
        }
    }

    fn exit_scope_releasing(&mut self) {
        for binding in self.symbols.exit_scope() {
            if let Storage::Register(reg) = binding.storage {
                self.regs.release(reg);
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    fn statement(&mut self, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.lower_expr(expr)?;
                self.release(value);
            }

            Stmt::Var { name, ty, init } => self.local(name, ty, init.as_ref())?,

            Stmt::Block(statements) => {
                self.symbols.enter_scope();
                for stmt in statements {
                    self.statement(stmt)?;
                }
                self.exit_scope_releasing();
            }

            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let else_label = self.fresh_label("else");
                let end_label = self.fresh_label("end");
                let value = self.lower_expr(condition)?;
                let value = self.expect_reg(value)?;
                self.emit_commented(
                    Op::Jz,
                    vec![Operand::Label(else_label.clone()), Operand::Reg(value.reg())],
                    "if condition",
                );
                self.release(value);
                self.statement(then_branch)?;
                self.emit(Op::Jmp, vec![Operand::Label(end_label.clone())]);
                self.emit_label(else_label);
                if let Some(else_branch) = else_branch {
                    self.statement(else_branch)?;
                }
                self.emit_label(end_label);
            }

            Stmt::While { condition, body } => {
                let head_label = self.fresh_label("while");
                let end_label = self.fresh_label("end");
                self.emit_label(head_label.clone());
                let value = self.lower_expr(condition)?;
                let value = self.expect_reg(value)?;
                self.emit_commented(
                    Op::Jz,
                    vec![Operand::Label(end_label.clone()), Operand::Reg(value.reg())],
                    "while condition",
                );
                self.release(value);

                self.break_labels.push(end_label.clone());
                self.continue_labels.push(head_label.clone());
                self.statement(body)?;
                self.break_labels.pop();
                self.continue_labels.pop();

                self.emit(Op::Jmp, vec![Operand::Label(head_label)]);
                self.emit_label(end_label);
            }

            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                let head_label = self.fresh_label("for");
                let step_label = self.fresh_label("step");
                let end_label = self.fresh_label("end");

                self.symbols.enter_scope();
                if let Some(init) = init {
                    self.statement(init)?;
                }
                self.emit_label(head_label.clone());
                if let Some(condition) = condition {
                    let value = self.lower_expr(condition)?;
                    let value = self.expect_reg(value)?;
                    self.emit_commented(
                        Op::Jz,
                        vec![Operand::Label(end_label.clone()), Operand::Reg(value.reg())],
                        "for condition",
                    );
                    self.release(value);
                }

                self.break_labels.push(end_label.clone());
                self.continue_labels.push(step_label.clone());
                self.statement(body)?;
                self.break_labels.pop();
                self.continue_labels.pop();

                self.emit_label(step_label);
                if let Some(step) = step {
                    let value = self.lower_expr(step)?;
                    self.release(value);
                }
                self.emit(Op::Jmp, vec![Operand::Label(head_label)]);
                self.emit_label(end_label);
                self.exit_scope_releasing();
            }

            Stmt::Switch { selector, cases } => self.switch(selector, cases)?,

            Stmt::Return(value) => {
                match value {
                    Some(expr) => {
                        let value = self.lower_expr(expr)?;
                        let value = self.expect_reg(value)?;
                        self.emit_commented(
                            Op::Mvr,
                            vec![Operand::Reg(value.reg()), Operand::Reg(0)],
                            "return value",
                        );
                        self.release(value);
                    }
                    None => {
                        self.emit_commented(
                            Op::Mvr,
                            vec![Operand::Imm(0), Operand::Reg(0)],
                            "return 0",
                        );
                    }
                }
                self.epilogue();
            }

            Stmt::Break => {
                let label = self
                    .break_labels
                    .last()
                    .ok_or(CompileError::BreakOutsideLoop)?
                    .clone();
                self.emit(Op::Jmp, vec![Operand::Label(label)]);
            }

            Stmt::Continue => {
                let label = self
                    .continue_labels
                    .last()
                    .ok_or(CompileError::ContinueOutsideLoop)?
                    .clone();
                self.emit(Op::Jmp, vec![Operand::Label(label)]);
            }
        }
        Ok(())
    }

    fn local(&mut self, name: &str, ty: &Type, init: Option<&Expr>) -> Result<(), CompileError> {
        if let Type::Array(_, n) = ty {
            if init.is_some() {
                return Err(CompileError::ArrayInitializer);
            }
            let address = self.heap.alloc(*n)?;
            self.comment(&format!("{name}: {ty} at {address:#06x}"));
            self.symbols.define(Binding {
                name: name.to_string(),
                ty: ty.clone(),
                storage: Storage::Ram(address),
                writable: false,
            });
            return Ok(());
        }

        let value = match init {
            Some(expr) => Some(self.lower_expr(expr)?),
            None => None,
        };

        // Address-taken locals and overflow past the register file live in
        // RAM from the start, so their storage never changes mid-function.
        let addressed = self.addressed_here(name);
        let storage = if addressed {
            Storage::Ram(self.heap.alloc(1)?)
        } else {
            match self.regs.alloc() {
                Some(reg) => Storage::Register(reg),
                None => Storage::Ram(self.heap.alloc(1)?),
            }
        };

        match storage {
            Storage::Register(reg) => match value {
                Some(v) => {
                    let v = self.expect_reg(v)?;
                    self.emit_commented(
                        Op::Mvr,
                        vec![Operand::Reg(v.reg()), Operand::Reg(reg)],
                        &format!("{name} = init"),
                    );
                    self.release(v);
                }
                None => {
                    self.emit_commented(
                        Op::Mvr,
                        vec![Operand::Imm(0), Operand::Reg(reg)],
                        &format!("{name} = 0"),
                    );
                }
            },
            Storage::Ram(address) => match value {
                Some(v) => {
                    let v = self.expect_reg(v)?;
                    self.emit_commented(
                        Op::Load,
                        vec![Operand::Reg(v.reg()), Operand::Imm(u32::from(address))],
                        &format!("{name} = init"),
                    );
                    self.release(v);
                }
                None => {
                    self.emit_commented(
                        Op::Load,
                        vec![Operand::Imm(0), Operand::Imm(u32::from(address))],
                        &format!("{name} = 0"),
                    );
                }
            },
        }

        self.symbols.define(Binding {
            name: name.to_string(),
            ty: ty.clone(),
            storage,
            writable: true,
        });
        Ok(())
    }

    /// Whether the variable being declared has its address taken somewhere
    /// in the enclosing function. The per-function set is computed up
    /// front; redo the lookup lazily here to keep declaration sites simple.
    fn addressed_here(&self, name: &str) -> bool {
        self.frame_addressed.contains(name)
    }

    fn switch(&mut self, selector: &Expr, cases: &[SwitchCase]) -> Result<(), CompileError> {
        let end_label = self.fresh_label("end");
        let value = self.lower_expr(selector)?;
        let value = self.expect_reg(value)?;
        let selector_reg = value.reg();

        // One label per arm, then the dispatch ladder: SUB + JZ per case.
        let mut case_labels = Vec::new();
        let mut default_label = None;
        for case in cases {
            if case.value.is_some() {
                case_labels.push(self.fresh_label("case"));
            } else {
                default_label = Some(self.fresh_label("default"));
            }
        }

        let mut label_iter = case_labels.iter();
        for case in cases {
            let Some(case_value) = &case.value else {
                continue;
            };
            let label = label_iter.next().expect("one label per valued case");
            let operand = match self.fold(case_value) {
                Some(v) => Operand::Imm(u32::from(v)),
                None => {
                    let case_reg = self.lower_expr(case_value)?;
                    let case_reg = self.expect_reg(case_reg)?;
                    self.release(case_reg);
                    Operand::Reg(case_reg.reg())
                }
            };
            self.emit_commented(
                Op::Sub,
                vec![Operand::Reg(selector_reg), operand],
                "compare case",
            );
            self.emit(Op::Jz, vec![Operand::Label(label.clone()), Operand::Reg(0)]);
        }
        self.release(value);

        let fallback = default_label.clone().unwrap_or_else(|| end_label.clone());
        self.emit(Op::Jmp, vec![Operand::Label(fallback)]);

        self.break_labels.push(end_label.clone());
        let mut label_iter = case_labels.into_iter();
        for case in cases {
            let label = if case.value.is_some() {
                label_iter.next().expect("one label per valued case")
            } else {
                default_label.clone().expect("default label allocated")
            };
            self.emit_label(label);
            for stmt in &case.body {
                self.statement(stmt)?;
            }
        }
        self.break_labels.pop();
        self.emit_label(end_label);
        Ok(())
    }
}

/// Names whose address is taken anywhere in the body. Those variables get
/// RAM homes at declaration, so `@x` never has to relocate a live value.
fn addressed_names(body: &[Stmt]) -> std::collections::BTreeSet<String> {
    let mut names = std::collections::BTreeSet::new();
    fn walk_expr(expr: &Expr, names: &mut std::collections::BTreeSet<String>) {
        match expr {
            Expr::Unary {
                op: UnaryOp::AddressOf,
                operand,
            } => {
                if let Expr::Ident(name) = operand.as_ref() {
                    names.insert(name.clone());
                }
                walk_expr(operand, names);
            }
            Expr::Unary { operand, .. } => walk_expr(operand, names),
            Expr::Binary { left, right, .. } => {
                walk_expr(left, names);
                walk_expr(right, names);
            }
            Expr::Assign { target, value } => {
                walk_expr(target, names);
                walk_expr(value, names);
            }
            Expr::Call { args, .. } | Expr::Builtin { args, .. } => {
                for arg in args {
                    walk_expr(arg, names);
                }
            }
            Expr::Index { array, index } => {
                walk_expr(array, names);
                walk_expr(index, names);
            }
            Expr::Literal(_) | Expr::Ident(_) => {}
        }
    }
    fn walk_stmt(stmt: &Stmt, names: &mut std::collections::BTreeSet<String>) {
        match stmt {
            Stmt::Expr(e) => walk_expr(e, names),
            Stmt::Var { init, .. } => {
                if let Some(e) = init {
                    walk_expr(e, names);
                }
            }
            Stmt::Block(stmts) => stmts.iter().for_each(|s| walk_stmt(s, names)),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                walk_expr(condition, names);
                walk_stmt(then_branch, names);
                if let Some(e) = else_branch {
                    walk_stmt(e, names);
                }
            }
            Stmt::While { condition, body } => {
                walk_expr(condition, names);
                walk_stmt(body, names);
            }
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                if let Some(s) = init {
                    walk_stmt(s, names);
                }
                if let Some(e) = condition {
                    walk_expr(e, names);
                }
                if let Some(e) = step {
                    walk_expr(e, names);
                }
                walk_stmt(body, names);
            }
            Stmt::Switch { selector, cases } => {
                walk_expr(selector, names);
                for case in cases {
                    if let Some(e) = &case.value {
                        walk_expr(e, names);
                    }
                    case.body.iter().for_each(|s| walk_stmt(s, names));
                }
            }
            Stmt::Return(Some(e)) => walk_expr(e, names),
            Stmt::Return(None) | Stmt::Break | Stmt::Continue => {}
        }
    }
    body.iter().for_each(|s| walk_stmt(s, &mut names));
    names
}

/// Whether the body contains any function call (as opposed to built-ins),
/// which is what forces the link register to be preserved.
fn makes_calls(body: &[Stmt]) -> bool {
    fn in_expr(expr: &Expr) -> bool {
        match expr {
            Expr::Call { .. } => true,
            Expr::Unary { operand, .. } => in_expr(operand),
            Expr::Binary { left, right, .. } => in_expr(left) || in_expr(right),
            Expr::Assign { target, value } => in_expr(target) || in_expr(value),
            Expr::Builtin { args, .. } => args.iter().any(in_expr),
            Expr::Index { array, index } => in_expr(array) || in_expr(index),
            Expr::Literal(_) | Expr::Ident(_) => false,
        }
    }
    fn in_stmt(stmt: &Stmt) -> bool {
        match stmt {
            Stmt::Expr(e) => in_expr(e),
            Stmt::Var { init, .. } => init.as_ref().is_some_and(in_expr),
            Stmt::Block(stmts) => stmts.iter().any(in_stmt),
            Stmt::If {
                condition,
                then_branch,
                else_branch,
            } => {
                in_expr(condition)
                    || in_stmt(then_branch)
                    || else_branch.as_deref().is_some_and(in_stmt)
            }
            Stmt::While { condition, body } => in_expr(condition) || in_stmt(body),
            Stmt::For {
                init,
                condition,
                step,
                body,
            } => {
                init.as_deref().is_some_and(in_stmt)
                    || condition.as_ref().is_some_and(in_expr)
                    || step.as_ref().is_some_and(in_expr)
                    || in_stmt(body)
            }
            Stmt::Switch { selector, cases } => {
                in_expr(selector)
                    || cases.iter().any(|c| {
                        c.value.as_ref().is_some_and(in_expr) || c.body.iter().any(in_stmt)
                    })
            }
            Stmt::Return(value) => value.as_ref().is_some_and(in_expr),
            Stmt::Break | Stmt::Continue => false,
        }
    }
    body.iter().any(in_stmt)
}

fn ends_with_return(body: &[Stmt]) -> bool {
    matches!(body.last(), Some(Stmt::Return(_)))
}
