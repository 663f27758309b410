//! The 6-bit character table shared by KEYIN and the GPU text slots.
//!
//! A..Z map to 0..25, 0..9 to 26..35 and the seven punctuation marks
//! `! ? + - * . ,` to 36..42. There is no whitespace code.

use thiserror::Error;

use crate::constants::Word;

const PUNCTUATION: &[char] = &['!', '?', '+', '-', '*', '.', ','];

/// Highest valid character code.
pub const MAX_CODE: Word = 42;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("character {0:?} is not in the 6-bit table")]
pub struct UnmappedChar(pub char);

/// Encode a character to its 6-bit code. Lowercase letters are folded to
/// uppercase before lookup.
pub fn encode(c: char) -> Result<Word, UnmappedChar> {
    let c = c.to_ascii_uppercase();
    match c {
        'A'..='Z' => Ok(c as Word - 'A' as Word),
        '0'..='9' => Ok(c as Word - '0' as Word + 26),
        _ => PUNCTUATION
            .iter()
            .position(|&p| p == c)
            .map(|i| i as Word + 36)
            .ok_or(UnmappedChar(c)),
    }
}

/// Decode a 6-bit code back to its character, if the code is in the table.
pub fn decode(code: Word) -> Option<char> {
    match code {
        0..=25 => Some((b'A' + code as u8) as char),
        26..=35 => Some((b'0' + (code - 26) as u8) as char),
        36..=42 => Some(PUNCTUATION[code as usize - 36]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_table_test() {
        assert_eq!(encode('A'), Ok(0));
        assert_eq!(encode('Z'), Ok(25));
        assert_eq!(encode('0'), Ok(26));
        assert_eq!(encode('9'), Ok(35));
        assert_eq!(encode('!'), Ok(36));
        assert_eq!(encode(','), Ok(42));
        assert_eq!(encode('h'), Ok(7));
        assert_eq!(encode(' '), Err(UnmappedChar(' ')));
    }

    #[test]
    fn round_trip_test() {
        for code in 0..=MAX_CODE {
            let c = decode(code).unwrap();
            assert_eq!(encode(c), Ok(code));
        }
        assert_eq!(decode(43), None);
    }
}
