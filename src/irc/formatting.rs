//! mIRC control codes found in message bodies.

pub const BOLD: char = '\x02';
pub const COLOR: char = '\x03';
pub const BEEP: char = '\x07';
pub const HIDDEN: char = '\x08';
pub const RESET: char = '\x0F';
pub const REVERSE: char = '\x16';
pub const ITALIC: char = '\x1D';
pub const UNDERLINE: char = '\x1F';

/// Remove formatting control codes, including the digits of color codes
/// (`\x03FG[,BG]`), leaving all other text untouched.
pub fn strip_attributes(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    // Digits still allowed to belong to the current color code.
    let mut color_digits = 0u8;
    let mut in_background = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        let next = chars.peek().copied();
        let next_is_digit = next.is_some_and(|n| n.is_ascii_digit());

        if color_digits > 0
            && (c.is_ascii_digit() || (c == ',' && next_is_digit && !in_background))
        {
            if next != Some(',') {
                color_digits -= 1;
            }
            if c == ',' {
                color_digits = 2;
                in_background = true;
            }
            continue;
        }

        color_digits = 0;
        in_background = false;
        match c {
            COLOR => color_digits = 2,
            BOLD | BEEP | HIDDEN | RESET | REVERSE | ITALIC | UNDERLINE => {}
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_everything() {
        assert_eq!(
            strip_attributes("\x02\x0F\x1D\x1F\x03,03\x16\x07\x08\x0304,04testing\x0399"),
            "testing"
        );
    }

    #[test]
    fn test_strip_keeps_stray_commas_and_digits() {
        assert_eq!(strip_attributes("\x03,,3\x03,3,3\x033,,3\x033333"), ",,3,3,,333");
    }

    #[test]
    fn test_strip_plain_text_untouched() {
        assert_eq!(strip_attributes("héllo, 42 world"), "héllo, 42 world");
        assert_eq!(strip_attributes("\x0312,01blue\x03 plain"), "blue plain");
    }
}
