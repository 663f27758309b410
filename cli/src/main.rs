#![forbid(unsafe_code)]

use std::process::exit;

use clap::Parser;
use tracing::error;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;

mod commands;
mod display;
mod interactive;

use crate::commands::{CommandError, Subcommand};

#[derive(Parser)]
#[command(version, author, about)]
struct Opt {
    /// Increase the level of verbosity. Can be used multiple times.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use JSON output for log messages
    #[arg(short, long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Subcommand,
}

impl Opt {
    const fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "mcl_emulator=info,mcl=info,warn",
            2 => "mcl_emulator=debug,mcl=debug,info",
            3..=u8::MAX => "trace",
        }
    }

    fn filter_layer(&self) -> EnvFilter {
        // Parse log level from env, or infer it from the arguments
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(self.log_filter()))
            .unwrap()
    }
}

fn main() {
    let opt = Opt::parse();

    let registry = tracing_subscriber::Registry::default().with(opt.filter_layer());
    if opt.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .without_time()
            .with_target(false)
            .with_writer(std::io::stderr);
        registry.with(fmt_layer).init();
    }

    if let Err(e) = opt.command.exec() {
        error!("{}", e);
        exit(e.exit_code());
    }
}

// Exit codes: 0 on success or HALT, 1 for compile errors, 2 for load
// errors, 3 for runtime faults.
impl CommandError {
    fn exit_code(&self) -> i32 {
        match self {
            CommandError::Io(_) => 1,
            CommandError::Compile(_) => 1,
            CommandError::Load(_) => 2,
            CommandError::Fault(_) => 3,
        }
    }
}
