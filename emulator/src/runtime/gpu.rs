//! The bit-plane GPU: two 32×32 buffers, sprite and text slot tables, and
//! the rasterizers behind the `DR*`/`LD*`/`CLRGRID`/`SCRLBFR` opcodes.
//!
//! Each buffer row is one 32-bit word; bit `31 - x` is screen column `x`.
//! Draw ops only ever touch the edit buffer named by the selector register.

use tracing::debug;

use super::registers::Selector;
use super::FaultKind;
use crate::charset;
use crate::constants as C;

/// A buffer: 32 rows, one word per scanline.
pub type Frame = [u32; C::SCREEN_SIZE];

pub struct Gpu {
    buffers: [Frame; 2],
    selector: Selector,

    /// 15-bit sprite patterns, 5 wide × 3 tall, bit 14 = top-left.
    sprites: [u16; C::SPRITE_SLOTS],

    /// 6-bit character codes.
    text: Box<[u8]>,

    /// Set whenever the displayed image may have changed.
    dirty: bool,
}

impl Default for Gpu {
    fn default() -> Self {
        Self {
            buffers: [[0; C::SCREEN_SIZE]; 2],
            selector: Selector::default(),
            sprites: [0; C::SPRITE_SLOTS],
            text: vec![0; C::TEXT_SLOTS].into_boxed_slice(),
            dirty: false,
        }
    }
}

/// Validate a coordinate or extent against its inclusive range.
fn in_range(value: C::Word, min: C::Word, max: C::Word) -> Result<C::Word, FaultKind> {
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(FaultKind::OutOfRange)
    }
}

impl Gpu {
    /// Raw selector write. Reserved bits are dropped; readers only ever see
    /// the two meaningful bits.
    pub fn set_selector(&mut self, value: C::Wide) {
        self.selector = Selector::from_bits_truncate(value);
        self.dirty = true;
        debug!(selector = ?self.selector, "selector updated");
    }

    #[must_use]
    pub fn selector(&self) -> C::Wide {
        self.selector.bits()
    }

    /// The buffer the host should render.
    #[must_use]
    pub fn display_frame(&self) -> &Frame {
        &self.buffers[self.selector.display_buffer()]
    }

    /// The buffer draw ops write to. Exposed for tests and the debugger.
    #[must_use]
    pub fn edit_frame(&self) -> &Frame {
        &self.buffers[self.selector.edit_buffer()]
    }

    /// Clear the dirty flag, reporting whether the display may have changed.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    fn edit_mut(&mut self) -> &mut Frame {
        let edit = self.selector.edit_buffer();
        if edit == self.selector.display_buffer() {
            self.dirty = true;
        }
        &mut self.buffers[edit]
    }

    /// Set every pixel in `[x, x+w) × [y, y+h)`.
    pub fn fill_rect(
        &mut self,
        x: C::Word,
        y: C::Word,
        w: C::Word,
        h: C::Word,
    ) -> Result<(), FaultKind> {
        let (x, y, w, h) = Self::rect(x, y, w, h)?;
        let mask = Self::row_mask(x, w);
        let frame = self.edit_mut();
        for row in &mut frame[y..(y + h).min(C::SCREEN_SIZE)] {
            *row |= mask;
        }
        Ok(())
    }

    /// Clear every pixel in `[x, x+w) × [y, y+h)`.
    pub fn clear_rect(
        &mut self,
        x: C::Word,
        y: C::Word,
        w: C::Word,
        h: C::Word,
    ) -> Result<(), FaultKind> {
        let (x, y, w, h) = Self::rect(x, y, w, h)?;
        let mask = Self::row_mask(x, w);
        let frame = self.edit_mut();
        for row in &mut frame[y..(y + h).min(C::SCREEN_SIZE)] {
            *row &= !mask;
        }
        Ok(())
    }

    fn rect(
        x: C::Word,
        y: C::Word,
        w: C::Word,
        h: C::Word,
    ) -> Result<(usize, usize, usize, usize), FaultKind> {
        let x = in_range(x, 0, 31)? as usize;
        let y = in_range(y, 0, 31)? as usize;
        let w = in_range(w, 1, 32)? as usize;
        let h = in_range(h, 1, 32)? as usize;
        Ok((x, y, w, h))
    }

    /// A run of `w` set bits starting at column `x`, clipped at the right
    /// edge.
    fn row_mask(x: usize, w: usize) -> u32 {
        let w = w.min(C::SCREEN_SIZE - x);
        (((1u64 << w) - 1) << (32 - x - w)) as u32
    }

    /// Bresenham line, endpoints inclusive.
    pub fn draw_line(
        &mut self,
        x1: C::Word,
        y1: C::Word,
        x2: C::Word,
        y2: C::Word,
    ) -> Result<(), FaultKind> {
        let mut x = in_range(x1, 0, 31)? as i32;
        let mut y = in_range(y1, 0, 31)? as i32;
        let x2 = in_range(x2, 0, 31)? as i32;
        let y2 = in_range(y2, 0, 31)? as i32;

        let dx = (x2 - x).abs();
        let dy = -(y2 - y).abs();
        let sx = if x < x2 { 1 } else { -1 };
        let sy = if y < y2 { 1 } else { -1 };
        let mut err = dx + dy;

        let frame = self.edit_mut();
        loop {
            frame[y as usize] |= 1 << (31 - x);
            if x == x2 && y == y2 {
                return Ok(());
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Store a 15-bit pattern in a sprite slot.
    pub fn load_sprite(&mut self, id: C::Word, data: C::Word) -> Result<(), FaultKind> {
        let id = in_range(id, 0, C::SPRITE_SLOTS as C::Word - 1)?;
        self.sprites[id as usize] = data & 0x7FFF;
        Ok(())
    }

    /// OR a 5×3 sprite into the edit buffer at (x, y). Pixels past the edge
    /// are clipped, not wrapped.
    pub fn draw_sprite(&mut self, id: C::Word, x: C::Word, y: C::Word) -> Result<(), FaultKind> {
        let id = in_range(id, 0, C::SPRITE_SLOTS as C::Word - 1)? as usize;
        let x = in_range(x, 0, 31)? as usize;
        let y = in_range(y, 0, 31)? as usize;

        let pattern = self.sprites[id];
        let frame = self.edit_mut();
        for row in 0..3 {
            if y + row >= C::SCREEN_SIZE {
                break;
            }
            for col in 0..5 {
                if x + col >= C::SCREEN_SIZE {
                    break;
                }
                // Bit 14 is (row 0, col 0), bit 0 is (row 2, col 4).
                if pattern & (1 << (14 - (row * 5 + col))) != 0 {
                    frame[y + row] |= 1 << (31 - (x + col));
                }
            }
        }
        Ok(())
    }

    /// Store a character code in a text slot.
    pub fn load_text(&mut self, id: C::Word, code: C::Word) -> Result<(), FaultKind> {
        let id = in_range(id, 0, C::TEXT_SLOTS as C::Word - 1)?;
        let code = in_range(code, 0, charset::MAX_CODE)?;
        self.text[id as usize] = code as u8;
        Ok(())
    }

    /// Render the 5×5 glyph for the code in a text slot at (x, y). Clipped,
    /// not wrapped.
    pub fn draw_text(&mut self, id: C::Word, x: C::Word, y: C::Word) -> Result<(), FaultKind> {
        let id = in_range(id, 0, C::TEXT_SLOTS as C::Word - 1)? as usize;
        let x = in_range(x, 0, 31)? as usize;
        let y = in_range(y, 0, 31)? as usize;

        let glyph = FONT[self.text[id] as usize];
        let frame = self.edit_mut();
        for row in 0..5 {
            if y + row >= C::SCREEN_SIZE {
                break;
            }
            for col in 0..5 {
                if x + col >= C::SCREEN_SIZE {
                    break;
                }
                // Bit 4 of each row byte is the leftmost column.
                if glyph[row] & (1 << (4 - col)) != 0 {
                    frame[y + row] |= 1 << (31 - (x + col));
                }
            }
        }
        Ok(())
    }

    /// Shift the edit buffer. Offsets are signed: positive `offy` moves
    /// content up, positive `offx` moves it left. Vacated pixels are zero.
    pub fn scroll(&mut self, offx: C::Word, offy: C::Word) {
        let offx = offx as i16 as i32;
        let offy = offy as i16 as i32;
        let frame = self.edit_mut();

        if offy != 0 {
            let old = *frame;
            for (row, cell) in frame.iter_mut().enumerate() {
                let src = row as i32 + offy;
                *cell = if (0..C::SCREEN_SIZE as i32).contains(&src) {
                    old[src as usize]
                } else {
                    0
                };
            }
        }

        if offx != 0 {
            for row in frame.iter_mut() {
                *row = if offx >= 32 || offx <= -32 {
                    0
                } else if offx > 0 {
                    *row << offx
                } else {
                    *row >> -offx
                };
            }
        }
    }
}

/// 5×5 glyphs for the 43 character codes, one byte per row, bit 4 leftmost.
#[rustfmt::skip]
const FONT: [[u8; 5]; 43] = [
    [0b01110, 0b10001, 0b11111, 0b10001, 0b10001], // A
    [0b11110, 0b10001, 0b11110, 0b10001, 0b11110], // B
    [0b01111, 0b10000, 0b10000, 0b10000, 0b01111], // C
    [0b11110, 0b10001, 0b10001, 0b10001, 0b11110], // D
    [0b11111, 0b10000, 0b11110, 0b10000, 0b11111], // E
    [0b11111, 0b10000, 0b11110, 0b10000, 0b10000], // F
    [0b01111, 0b10000, 0b10011, 0b10001, 0b01111], // G
    [0b10001, 0b10001, 0b11111, 0b10001, 0b10001], // H
    [0b11111, 0b00100, 0b00100, 0b00100, 0b11111], // I
    [0b00111, 0b00010, 0b00010, 0b10010, 0b01100], // J
    [0b10001, 0b10010, 0b11100, 0b10010, 0b10001], // K
    [0b10000, 0b10000, 0b10000, 0b10000, 0b11111], // L
    [0b10001, 0b11011, 0b10101, 0b10001, 0b10001], // M
    [0b10001, 0b11001, 0b10101, 0b10011, 0b10001], // N
    [0b01110, 0b10001, 0b10001, 0b10001, 0b01110], // O
    [0b11110, 0b10001, 0b11110, 0b10000, 0b10000], // P
    [0b01110, 0b10001, 0b10101, 0b10010, 0b01101], // Q
    [0b11110, 0b10001, 0b11110, 0b10010, 0b10001], // R
    [0b01111, 0b10000, 0b01110, 0b00001, 0b11110], // S
    [0b11111, 0b00100, 0b00100, 0b00100, 0b00100], // T
    [0b10001, 0b10001, 0b10001, 0b10001, 0b01110], // U
    [0b10001, 0b10001, 0b10001, 0b01010, 0b00100], // V
    [0b10001, 0b10001, 0b10101, 0b11011, 0b10001], // W
    [0b10001, 0b01010, 0b00100, 0b01010, 0b10001], // X
    [0b10001, 0b01010, 0b00100, 0b00100, 0b00100], // Y
    [0b11111, 0b00010, 0b00100, 0b01000, 0b11111], // Z
    [0b01110, 0b10011, 0b10101, 0b11001, 0b01110], // 0
    [0b00100, 0b01100, 0b00100, 0b00100, 0b01110], // 1
    [0b01110, 0b10001, 0b00110, 0b01000, 0b11111], // 2
    [0b11110, 0b00001, 0b00110, 0b00001, 0b11110], // 3
    [0b00010, 0b00110, 0b01010, 0b11111, 0b00010], // 4
    [0b11111, 0b10000, 0b11110, 0b00001, 0b11110], // 5
    [0b01110, 0b10000, 0b11110, 0b10001, 0b01110], // 6
    [0b11111, 0b00001, 0b00010, 0b00100, 0b00100], // 7
    [0b01110, 0b10001, 0b01110, 0b10001, 0b01110], // 8
    [0b01110, 0b10001, 0b01111, 0b00001, 0b01110], // 9
    [0b00100, 0b00100, 0b00100, 0b00000, 0b00100], // !
    [0b01110, 0b10001, 0b00110, 0b00000, 0b00100], // ?
    [0b00000, 0b00100, 0b01110, 0b00100, 0b00000], // +
    [0b00000, 0b00000, 0b01110, 0b00000, 0b00000], // -
    [0b00100, 0b10101, 0b01110, 0b10101, 0b00100], // *
    [0b00000, 0b00000, 0b00000, 0b00000, 0b00100], // .
    [0b00000, 0b00000, 0b00000, 0b00100, 0b01000], // ,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fill_then_clear_test() {
        let mut gpu = Gpu::default();
        gpu.fill_rect(3, 3, 2, 2).unwrap();
        assert_ne!(gpu.edit_frame()[3], 0);
        // A clear covering the filled pixels leaves them cleared.
        gpu.clear_rect(0, 0, 32, 32).unwrap();
        assert_eq!(gpu.edit_frame(), &[0u32; 32]);
    }

    #[test]
    fn fill_is_idempotent_on_overlap_test() {
        let mut gpu = Gpu::default();
        gpu.fill_rect(0, 0, 8, 8).unwrap();
        let first = *gpu.edit_frame();
        gpu.fill_rect(4, 4, 8, 8).unwrap();
        gpu.fill_rect(4, 4, 8, 8).unwrap();
        let second = *gpu.edit_frame();
        // The overlap region is already set; repeating changes nothing.
        for y in 0..8 {
            assert_eq!(first[y] | second[y], second[y]);
        }
    }

    #[test]
    fn diagonal_line_test() {
        let mut gpu = Gpu::default();
        gpu.draw_line(0, 0, 31, 31).unwrap();
        for y in 0..32 {
            assert_eq!(gpu.edit_frame()[y], 1 << (31 - y), "row {y}");
        }
    }

    #[test]
    fn horizontal_and_steep_line_test() {
        let mut gpu = Gpu::default();
        gpu.draw_line(2, 5, 9, 5).unwrap();
        assert_eq!(gpu.edit_frame()[5], Gpu::row_mask(2, 8));

        let mut gpu = Gpu::default();
        gpu.draw_line(4, 0, 4, 7).unwrap();
        for y in 0..=7 {
            assert_eq!(gpu.edit_frame()[y], 1 << (31 - 4));
        }
    }

    #[test]
    fn line_coordinate_fault_test() {
        let mut gpu = Gpu::default();
        assert_eq!(gpu.draw_line(0, 0, 32, 0), Err(FaultKind::OutOfRange));
        assert_eq!(gpu.fill_rect(0, 0, 0, 4), Err(FaultKind::OutOfRange));
        assert_eq!(gpu.fill_rect(0, 0, 33, 4), Err(FaultKind::OutOfRange));
    }

    #[test]
    fn sprite_layout_test() {
        let mut gpu = Gpu::default();
        // Only the top-left and bottom-right sprite pixels set.
        gpu.load_sprite(3, (1 << 14) | 1).unwrap();
        gpu.draw_sprite(3, 10, 20).unwrap();
        assert_eq!(gpu.edit_frame()[20], 1 << (31 - 10));
        assert_eq!(gpu.edit_frame()[22], 1 << (31 - 14));
    }

    #[test]
    fn sprite_clips_at_edge_test() {
        let mut gpu = Gpu::default();
        gpu.load_sprite(0, 0x7FFF).unwrap();
        gpu.draw_sprite(0, 30, 31).unwrap();
        // Columns 30..31 of row 31 only; nothing wraps.
        assert_eq!(gpu.edit_frame()[31], 0b11);
        assert_eq!(gpu.edit_frame()[0], 0);
    }

    #[test]
    fn sprite_id_fault_test() {
        let mut gpu = Gpu::default();
        assert_eq!(gpu.load_sprite(32, 0), Err(FaultKind::OutOfRange));
        assert_eq!(gpu.draw_sprite(32, 0, 0), Err(FaultKind::OutOfRange));
    }

    #[test]
    fn text_code_fault_test() {
        let mut gpu = Gpu::default();
        assert_eq!(gpu.load_text(0, 43), Err(FaultKind::OutOfRange));
        assert_eq!(gpu.load_text(16384, 0), Err(FaultKind::OutOfRange));
        assert_eq!(gpu.load_text(16383, 42), Ok(()));
    }

    #[test]
    fn draw_text_renders_glyph_test() {
        let mut gpu = Gpu::default();
        gpu.load_text(7, 8).unwrap(); // 'I'
        gpu.draw_text(7, 0, 0).unwrap();
        // Top row of 'I' is five set pixels.
        assert_eq!(gpu.edit_frame()[0] >> 27, 0b11111);
        assert_eq!(gpu.edit_frame()[1] >> 27, 0b00100);
    }

    #[test]
    fn scroll_up_and_left_test() {
        let mut gpu = Gpu::default();
        gpu.fill_rect(4, 4, 1, 1).unwrap();
        gpu.scroll(1, 2);
        assert_eq!(gpu.edit_frame()[2], 1 << (31 - 3));
        assert_eq!(gpu.edit_frame()[4], 0);
    }

    #[test]
    fn scroll_negative_and_out_test() {
        let mut gpu = Gpu::default();
        gpu.fill_rect(4, 4, 1, 1).unwrap();
        // Negative offsets move content down/right.
        gpu.scroll(0xFFFF, 0xFFFF); // -1, -1
        assert_eq!(gpu.edit_frame()[5], 1 << (31 - 5));

        gpu.scroll(0, 32);
        assert_eq!(gpu.edit_frame(), &[0u32; 32]);
    }

    #[test]
    fn draw_targets_edit_buffer_only_test() {
        let mut gpu = Gpu::default();
        // Edit buffer 1, display buffer 0.
        gpu.set_selector(1);
        gpu.fill_rect(0, 0, 32, 32).unwrap();
        assert_eq!(gpu.display_frame(), &[0u32; 32]);
        assert_eq!(gpu.edit_frame(), &[u32::MAX; 32]);
        // Flipping the display side makes the drawing visible.
        gpu.set_selector(0x0001_0001);
        assert_eq!(gpu.display_frame(), &[u32::MAX; 32]);
    }

    #[test]
    fn dirty_flag_test() {
        let mut gpu = Gpu::default();
        assert!(!gpu.take_dirty());
        // Edit == display, so drawing dirties the frame.
        gpu.fill_rect(0, 0, 1, 1).unwrap();
        assert!(gpu.take_dirty());
        assert!(!gpu.take_dirty());
        // Drawing to an off-screen buffer does not.
        gpu.set_selector(1);
        assert!(gpu.take_dirty()); // the selector write itself
        gpu.fill_rect(0, 0, 1, 1).unwrap();
        assert!(!gpu.take_dirty());
    }
}
