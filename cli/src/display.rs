//! Terminal renderer for the 32×32 display buffer.

use ansi_term::{Colour, Style};
use mcl_emulator::runtime::Frame;

/// Render a frame as terminal cells, each pixel `scale` characters wide.
pub fn render(frame: &Frame, scale: usize) -> String {
    let scale = scale.max(1);
    let lit = Style::new().on(Colour::White);
    let dark = Style::new().on(Colour::Black);

    let mut out = String::new();
    for row in frame {
        for x in 0..32 {
            let style = if row & (1 << (31 - x)) != 0 { lit } else { dark };
            out.push_str(&style.paint(" ".repeat(scale)).to_string());
        }
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_has_one_line_per_row_test() {
        let frame = [0u32; 32];
        let rendered = render(&frame, 1);
        assert_eq!(rendered.lines().count(), 32);
    }
}
