use std::path::PathBuf;

use clap::{Args, ValueHint};
use mcl_emulator::host::input::ReaderKeySource;
use mcl_emulator::host::{RunOutcome, VmHost};
use tracing::info;

use super::CommandError;
use crate::display;
use crate::interactive;

#[derive(Args)]
pub struct RunOpt {
    /// Input assembly file
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Run unpaced and render only the final frame
    #[arg(long)]
    headless: bool,

    /// Width of one pixel in terminal cells
    #[arg(long, default_value_t = 2)]
    scale: usize,

    /// Tick rate in instructions per second (paced mode only)
    #[arg(long, default_value_t = 1000.0)]
    rate: f64,

    /// Start the interactive debugger instead of running to completion
    #[arg(long)]
    debug: bool,
}

impl RunOpt {
    pub fn exec(self) -> Result<(), CommandError> {
        info!(path = ?self.input, "loading program");
        let text = std::fs::read_to_string(&self.input)?;
        let program = mcl_emulator::load(&text)?;
        info!(
            instructions = program.instructions.len(),
            labels = program.labels.len(),
            "program loaded"
        );

        let keys = Box::new(ReaderKeySource::new(std::io::stdin().lock()));
        let mut host = VmHost::new(program, keys);

        if self.debug {
            return interactive::debug_loop(host, self.scale);
        }

        let scale = self.scale;
        if self.headless {
            // Unpaced; the display is pulled once at the end.
            let outcome = host.run();
            print!("{}", display::render(host.machine().gpu.display_frame(), scale));
            finish(outcome, &host)
        } else {
            host.set_rate(self.rate);
            host.on_frame(move |frame| print!("{}", display::render(frame, scale)));
            let outcome = host.run();
            finish(outcome, &host)
        }
    }
}

fn finish(outcome: RunOutcome, host: &VmHost) -> Result<(), CommandError> {
    match outcome {
        RunOutcome::Halted | RunOutcome::Break(_) => {
            info!(registers = %host.machine().registers, "end of program");
            Ok(())
        }
        RunOutcome::Fault(fault) => Err(fault.into()),
    }
}
