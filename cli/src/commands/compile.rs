use std::path::PathBuf;

use clap::{Args, ValueHint};
use tracing::info;

use super::CommandError;

#[derive(Args)]
pub struct CompileOpt {
    /// Input MCL source file
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output assembly file (defaults to the input with an .asm extension)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    output: Option<PathBuf>,

    /// Print the generated assembly to stdout as well
    #[arg(long)]
    debug: bool,

    /// Check the program without writing any output
    #[arg(long)]
    validate_only: bool,
}

impl CompileOpt {
    pub fn exec(self) -> Result<(), CommandError> {
        info!(path = ?self.input, "compiling");
        let source = std::fs::read_to_string(&self.input)?;
        let assembly = mcl_emulator::compile(&source)?;

        if self.debug {
            print!("{assembly}");
        }
        if self.validate_only {
            info!("program is valid");
            return Ok(());
        }

        let output = self
            .output
            .unwrap_or_else(|| self.input.with_extension("asm"));
        std::fs::write(&output, assembly)?;
        info!(path = ?output, "assembly written");
        Ok(())
    }
}
