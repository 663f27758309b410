//! The VM host: owns the clock, paces ticks, feeds KEYIN, pushes dirty
//! frames to the display collaborator and exposes the debugger surface.
//!
//! The machine state is exclusively owned here; the display and debugger
//! only ever see it between ticks.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::constants::{Address, Word};
use crate::loader::{Labels, Program};
use crate::runtime::{Fault, Frame, KeySource, Machine, StepOutcome};

pub mod input;

/// Slowest supported tick rate, in instructions per second.
pub const MIN_RATE: f64 = 0.5;
/// Fastest paced tick rate; headless runs skip pacing entirely.
pub const MAX_RATE: f64 = 1000.0;

/// Why a run returned.
#[derive(Debug, PartialEq)]
pub enum RunOutcome {
    /// HALT, input EOF or host cancellation.
    Halted,
    Fault(Fault),
    /// Stopped before executing the instruction at this source line.
    Break(u32),
}

pub struct VmHost {
    machine: Machine,
    keys: Box<dyn KeySource>,
    labels: Labels,
    source_line_of: Vec<u32>,
    breakpoints: BTreeSet<u32>,
    /// Seconds between ticks; `None` runs unpaced.
    tick_delay: Option<Duration>,
    stop: Arc<AtomicBool>,
    on_frame: Option<Box<dyn FnMut(&Frame)>>,
}

impl VmHost {
    pub fn new(program: Program, keys: Box<dyn KeySource>) -> Self {
        Self {
            machine: Machine::new(program.instructions),
            keys,
            labels: program.labels,
            source_line_of: program.source_line_of,
            breakpoints: BTreeSet::new(),
            tick_delay: None,
            stop: Arc::new(AtomicBool::new(false)),
            on_frame: None,
        }
    }

    /// Pace ticks at the given rate, clamped to the supported range.
    pub fn set_rate(&mut self, hz: f64) {
        let hz = hz.clamp(MIN_RATE, MAX_RATE);
        self.tick_delay = Some(Duration::from_secs_f64(1.0 / hz));
    }

    /// A flag the embedder may raise from another thread to cancel the
    /// run; the host honors it before the next fetch, and a blocked KEYIN
    /// sharing the flag wakes as `Halted`.
    #[must_use]
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Register the display collaborator, called after any tick that
    /// changed the displayed frame.
    pub fn on_frame(&mut self, callback: impl FnMut(&Frame) + 'static) {
        self.on_frame = Some(Box::new(callback));
    }

    /// Channel variant of [`Self::on_frame`], for displays on another
    /// thread: each dirty frame is copied into the channel; a gone
    /// receiver is ignored.
    pub fn frame_channel(&mut self) -> std::sync::mpsc::Receiver<Frame> {
        let (sender, receiver) = std::sync::mpsc::channel();
        self.on_frame(move |frame| {
            let _ = sender.send(*frame);
        });
        receiver
    }

    // ------------------------------------------------------------------
    // Debugger surface
    // ------------------------------------------------------------------

    pub fn set_breakpoint(&mut self, line: u32) {
        info!(line, "breakpoint set");
        self.breakpoints.insert(line);
    }

    pub fn clear_breakpoint(&mut self, line: u32) {
        self.breakpoints.remove(&line);
    }

    #[must_use]
    pub fn read_register(&self, index: u8) -> Word {
        self.machine.registers.get(index)
    }

    #[must_use]
    pub fn read_ram(&self, address: Address) -> Word {
        self.machine.ram.get(address)
    }

    #[must_use]
    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    #[must_use]
    pub fn machine(&self) -> &Machine {
        &self.machine
    }

    /// Source line of the next instruction to execute.
    #[must_use]
    pub fn current_line(&self) -> Option<u32> {
        self.source_line_of
            .get(usize::from(self.machine.registers.pc))
            .copied()
    }

    /// Execute exactly one tick.
    pub fn step_one(&mut self) -> StepOutcome {
        let outcome = self.machine.step(self.keys.as_mut());
        if self.machine.gpu.take_dirty() {
            if let Some(callback) = self.on_frame.as_mut() {
                callback(self.machine.gpu.display_frame());
            }
        }
        outcome
    }

    /// Run until halt, fault, cancellation or a breakpoint.
    #[tracing::instrument(skip(self))]
    pub fn run_until_break(&mut self) -> RunOutcome {
        loop {
            if self.stop.load(Ordering::Relaxed) {
                debug!("cancelled between ticks");
                return RunOutcome::Halted;
            }
            match self.step_one() {
                StepOutcome::Running => {}
                StepOutcome::Halted => return RunOutcome::Halted,
                StepOutcome::Fault(fault) => return RunOutcome::Fault(fault),
            }
            if let Some(line) = self.current_line() {
                if self.breakpoints.contains(&line) {
                    return RunOutcome::Break(line);
                }
            }
            if let Some(delay) = self.tick_delay {
                std::thread::sleep(delay);
            }
        }
    }

    /// Run to completion, ignoring breakpoints.
    pub fn run(&mut self) -> RunOutcome {
        let breakpoints = std::mem::take(&mut self.breakpoints);
        let outcome = self.run_until_break();
        self.breakpoints = breakpoints;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::input::QueuedKeys;
    use super::*;
    use crate::loader::load;
    use crate::runtime::{FaultKind, NoInput};

    fn host(source: &str) -> VmHost {
        VmHost::new(load(source).unwrap(), Box::new(NoInput))
    }

    #[test]
    fn run_to_halt_test() {
        let mut host = host("MVR i:7, 5\nHALT");
        assert_eq!(host.run(), RunOutcome::Halted);
        assert_eq!(host.read_register(5), 7);
    }

    #[test]
    fn fault_surfaces_test() {
        let mut host = host("DIV i:1, i:0");
        match host.run() {
            RunOutcome::Fault(fault) => assert_eq!(fault.kind, FaultKind::DivByZero),
            other => panic!("expected fault, got {other:?}"),
        }
    }

    #[test]
    fn breakpoint_stops_before_line_test() {
        let source = "MVR i:1, 5\nMVR i:2, 6\nHALT";
        let mut host = host(source);
        host.set_breakpoint(2);
        assert_eq!(host.run_until_break(), RunOutcome::Break(2));
        assert_eq!(host.read_register(5), 1);
        // The instruction at the breakpoint has not executed yet.
        assert_eq!(host.read_register(6), 0);
        // Resuming finishes the program.
        assert_eq!(host.run_until_break(), RunOutcome::Halted);
        assert_eq!(host.read_register(6), 2);
    }

    #[test]
    fn cancellation_test() {
        let mut host = host("loop: JMP loop");
        host.stop_flag().store(true, Ordering::Relaxed);
        assert_eq!(host.run(), RunOutcome::Halted);
    }

    #[test]
    fn queued_keys_feed_keyin_test() {
        let program = load("KEYIN i:0x1000\nREAD i:0x1000, 5\nHALT").unwrap();
        let mut host = VmHost::new(program, Box::new(QueuedKeys::new([9])));
        assert_eq!(host.run(), RunOutcome::Halted);
        assert_eq!(host.read_register(5), 9);
    }

    #[test]
    fn frame_channel_receives_dirty_frames_test() {
        let mut host = host("DRGRD i:0, i:0, i:1, i:1\nHALT");
        let frames = host.frame_channel();
        assert_eq!(host.run(), RunOutcome::Halted);
        let frame = frames.try_recv().expect("one dirty frame");
        assert_eq!(frame[0], 1 << 31);
        assert!(frames.try_recv().is_err());
    }

    #[test]
    fn frame_callback_fires_on_dirty_test() {
        use std::cell::Cell;
        use std::rc::Rc;

        let frames = Rc::new(Cell::new(0u32));
        let seen = frames.clone();
        let mut host = host("DRGRD i:0, i:0, i:4, i:4\nMVR i:1, 5\nHALT");
        host.on_frame(move |frame| {
            assert_ne!(frame[0], 0);
            seen.set(seen.get() + 1);
        });
        assert_eq!(host.run(), RunOutcome::Halted);
        assert_eq!(frames.get(), 1);
    }
}
