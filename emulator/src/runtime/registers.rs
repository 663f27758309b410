use bitflags::bitflags;

use crate::constants as C;

bitflags! {
    /// The GPU selector register. Only two bits carry meaning; the rest
    /// read back as zero.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Selector: C::Wide {
        /// Bit 0: which buffer receives draw ops.
        const EDIT = 1;
        /// Bit 16: which buffer the host renders.
        const DISPLAY = 1 << 16;
    }
}

impl Selector {
    /// Buffer index (0 or 1) the draw ops write to.
    #[must_use]
    pub fn edit_buffer(self) -> usize {
        usize::from(self.contains(Selector::EDIT))
    }

    /// Buffer index (0 or 1) the host displays.
    #[must_use]
    pub fn display_buffer(self) -> usize {
        usize::from(self.contains(Selector::DISPLAY))
    }
}

impl std::fmt::Debug for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Selector {{ edit: {}, display: {} }}",
            self.edit_buffer(),
            self.display_buffer()
        )
    }
}

/// The register file: 32 general-purpose words plus the program counter.
///
/// The GPU selector lives with the GPU unit; `Machine` routes `GPU`-operand
/// accesses there.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Registers {
    file: [C::Word; C::REGISTER_COUNT],

    /// Program counter, indexing the instruction stream.
    pub pc: C::Word,
}

impl Registers {
    #[must_use]
    pub fn get(&self, index: u8) -> C::Word {
        self.file[index as usize]
    }

    pub fn set(&mut self, index: u8, value: C::Word) {
        self.file[index as usize] = value;
    }
}

impl std::fmt::Display for Registers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pc = {:#06x}", self.pc)?;
        for (i, value) in self.file.iter().enumerate() {
            if *value != 0 {
                write!(f, " | R{i} = {value:#06x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_round_trip_test() {
        let sel = Selector::from_bits_truncate(0x0001_0001);
        assert_eq!(sel.edit_buffer(), 1);
        assert_eq!(sel.display_buffer(), 1);
        assert_eq!(sel.bits(), 0x0001_0001);

        // Writes with garbage in the reserved bits read back clean.
        let sel = Selector::from_bits_truncate(0xFFFE_FFFE);
        assert_eq!(sel.edit_buffer(), 0);
        assert_eq!(sel.display_buffer(), 1);
        assert_eq!(sel.bits(), 0x0001_0000);
    }
}
