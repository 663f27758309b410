//! The interactive debugger: rustyline for line editing, clap for parsing
//! the debugger commands themselves.

use clap::Parser;
use mcl_emulator::host::{RunOutcome, VmHost};
use mcl_emulator::runtime::StepOutcome;

use crate::commands::CommandError;
use crate::display;

static HELP: &str = "An empty line re-runs the last valid command.";

#[derive(Parser, Clone, Debug)]
#[command(
    about = "Debugger commands",
    after_help = HELP,
    disable_version_flag = true,
    infer_subcommands = true,
    no_binary_name = true,
)]
enum Command {
    /// Execute the next instructions
    #[command(alias = "s")]
    Step {
        /// Number of steps to execute
        #[arg(default_value = "1")]
        number: u64,
    },

    /// Continue until the next breakpoint or halt
    #[command(alias = "c")]
    Continue,

    /// Show registers
    Registers,

    /// Show a block of RAM
    Memory {
        /// Start address (decimal or 0x hex)
        #[arg(value_parser = parse_word)]
        address: u16,

        /// Number of words to show
        #[arg(default_value = "1")]
        number: u16,
    },

    /// Set a breakpoint on a source line
    Break {
        line: u32,
    },

    /// Remove a breakpoint
    Unbreak {
        line: u32,
    },

    /// List program labels
    Labels,

    /// Render the display buffer
    Display,

    /// Exit the debugger
    Exit,
}

fn parse_word(input: &str) -> Result<u16, String> {
    let parsed = match input.strip_prefix("0x") {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => input.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

fn report(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Halted => println!("program halted"),
        RunOutcome::Fault(fault) => println!("{fault}"),
        RunOutcome::Break(line) => println!("breakpoint at line {line}"),
    }
}

pub fn debug_loop(mut host: VmHost, scale: usize) -> Result<(), CommandError> {
    let mut editor = rustyline::DefaultEditor::new().map_err(std::io::Error::other)?;
    let mut last_line = String::new();

    loop {
        let mut line = match editor.readline("mcl> ") {
            Ok(line) => line,
            Err(_) => return Ok(()),
        };
        if line.trim().is_empty() {
            line = last_line.clone();
        }

        let command = match Command::try_parse_from(line.split_whitespace()) {
            Ok(command) => command,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        let _ = editor.add_history_entry(&line);
        last_line = line;

        match command {
            Command::Step { number } => {
                for _ in 0..number {
                    match host.step_one() {
                        StepOutcome::Running => {}
                        StepOutcome::Halted => {
                            println!("program halted");
                            break;
                        }
                        StepOutcome::Fault(fault) => {
                            println!("{fault}");
                            break;
                        }
                    }
                }
                if let Some(line) = host.current_line() {
                    println!("at line {line}");
                }
            }

            Command::Continue => report(&host.run_until_break()),

            Command::Registers => println!("{}", host.machine().registers),

            Command::Memory { address, number } => {
                for offset in 0..number {
                    let address = address.wrapping_add(offset);
                    println!("{:#06x}: {:#06x}", address, host.read_ram(address));
                }
            }

            Command::Break { line } => host.set_breakpoint(line),

            Command::Unbreak { line } => host.clear_breakpoint(line),

            Command::Labels => {
                for (name, index) in host.labels() {
                    println!("{name} -> {index}");
                }
            }

            Command::Display => {
                print!("{}", display::render(host.machine().gpu.display_frame(), scale));
            }

            Command::Exit => return Ok(()),
        }
    }
}
