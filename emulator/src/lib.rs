//! The MCL toolchain: compiler back end and virtual machine for a 16-bit
//! target with a 32×32 bit-plane GPU.
//!
//! Build-time flow: source → [`parser`] → AST → [`codegen`] → assembly
//! text. Run-time flow: assembly text → [`loader`] → instruction stream →
//! [`host`] ticking the [`runtime`] machine.

#![forbid(unsafe_code)]

use thiserror::Error;

pub mod charset;
pub mod codegen;
pub mod constants;
pub mod host;
pub mod loader;
pub mod parser;
pub mod runtime;

pub use self::codegen::{generate, CompileError};
pub use self::host::VmHost;
pub use self::loader::{load, LoadError};
pub use self::parser::{parse_source, ParseError};
pub use self::runtime::Machine;

/// Any way turning MCL source into assembly can fail.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CompileFailure {
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("compile error: {0}")]
    Codegen(#[from] CompileError),
}

/// Compile MCL source text to assembly text.
pub fn compile(source: &str) -> Result<String, CompileFailure> {
    let ast = parse_source(source)?;
    let assembly = generate(&ast)?;
    Ok(assembly)
}
