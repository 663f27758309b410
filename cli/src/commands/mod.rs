use clap::Subcommand as ClapSubcommand;
use thiserror::Error;

mod compile;
mod run;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Compile(#[from] mcl_emulator::CompileFailure),

    #[error("{0}")]
    Load(#[from] mcl_emulator::LoadError),

    #[error("{0}")]
    Fault(#[from] mcl_emulator::runtime::Fault),
}

#[derive(ClapSubcommand)]
pub enum Subcommand {
    /// Compile an MCL source file to assembly
    Compile(self::compile::CompileOpt),

    /// Load and run an assembly program
    Run(self::run::RunOpt),
}

impl Subcommand {
    pub fn exec(self) -> Result<(), CommandError> {
        match self {
            Subcommand::Compile(opt) => opt.exec(),
            Subcommand::Run(opt) => opt.exec(),
        }
    }
}
