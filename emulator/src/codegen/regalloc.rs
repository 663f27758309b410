//! The register free-list. R0..R2 are scratch/link, R3 the stack pointer
//! and R4.. the argument window; everything from R5 up is allocatable.
//! Spill policy lives with the generator, which owns the instruction
//! stream; this type only tracks who holds what.

use tracing::debug;

use crate::constants as C;

pub struct RegisterAllocator {
    /// Free registers, kept sorted ascending so allocation order is
    /// deterministic.
    free: Vec<u8>,
    /// Busy registers, ascending. Includes reserved argument registers.
    in_use: Vec<u8>,
}

impl RegisterAllocator {
    /// A fresh per-function allocator. The first `params` argument
    /// registers are already busy holding the incoming arguments.
    #[must_use]
    pub fn for_function(params: usize) -> Self {
        let reserved: Vec<u8> = (0..params as u8).map(|i| C::ARG_BASE + i).collect();
        let free = (C::ALLOC_FIRST..=C::ALLOC_LAST)
            .filter(|reg| !reserved.contains(reg))
            .collect();
        Self {
            free,
            in_use: reserved,
        }
    }

    /// Lowest free register, if any.
    pub fn alloc(&mut self) -> Option<u8> {
        if self.free.is_empty() {
            return None;
        }
        let reg = self.free.remove(0);
        let position = self.in_use.partition_point(|&r| r < reg);
        self.in_use.insert(position, reg);
        debug!(reg, "allocated register");
        Some(reg)
    }

    /// Highest free register. Call targets live here, above the argument
    /// window.
    pub fn alloc_high(&mut self) -> Option<u8> {
        let reg = self.free.pop()?;
        let position = self.in_use.partition_point(|&r| r < reg);
        self.in_use.insert(position, reg);
        Some(reg)
    }

    pub fn release(&mut self, reg: u8) {
        if let Ok(position) = self.in_use.binary_search(&reg) {
            self.in_use.remove(position);
            let insert_at = self.free.partition_point(|&r| r < reg);
            self.free.insert(insert_at, reg);
        }
    }

    /// Registers currently holding live values, ascending. This is the set
    /// a call site saves around the JAL.
    #[must_use]
    pub fn live(&self) -> Vec<u8> {
        self.in_use.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_lowest_first_test() {
        let mut regs = RegisterAllocator::for_function(0);
        assert_eq!(regs.alloc(), Some(5));
        assert_eq!(regs.alloc(), Some(6));
        regs.release(5);
        assert_eq!(regs.alloc(), Some(5));
    }

    #[test]
    fn params_occupy_argument_window_test() {
        let mut regs = RegisterAllocator::for_function(3);
        // R4..R6 hold arguments; the first free register is R7.
        assert_eq!(regs.alloc(), Some(7));
        assert_eq!(regs.live(), vec![4, 5, 6, 7]);
    }

    #[test]
    fn exhaustion_test() {
        let mut regs = RegisterAllocator::for_function(0);
        while regs.alloc().is_some() {}
        assert_eq!(regs.alloc(), None);
        assert_eq!(regs.live().len(), 27);
    }
}
