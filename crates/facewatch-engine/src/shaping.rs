//! Arabic contextual shaping and bidi reordering for labels.
//!
//! Fonts rasterize one glyph per char, so Arabic-script letters are first
//! mapped to their positional presentation forms (ligatures included) by
//! `ar-reshaper`, then the line is reordered into visual (left-to-right
//! drawing) order with `unicode-bidi`.

use ar_reshaper::reshape_line;
use unicode_bidi::BidiInfo;

/// Replace Arabic-script letters with their contextual presentation forms.
/// Text without Arabic letters is returned unchanged.
pub fn shape_arabic(text: &str) -> String {
    if !text.chars().any(is_arabic) {
        return text.to_string();
    }
    reshape_line(text)
}

fn is_arabic(c: char) -> bool {
    matches!(c, '\u{0600}'..='\u{06FF}' | '\u{0750}'..='\u{077F}' | '\u{08A0}'..='\u{08FF}')
}

/// Reorder a single line from logical to visual order.
pub fn visual_order(text: &str) -> String {
    let info = BidiInfo::new(text, None);
    info.paragraphs
        .iter()
        .map(|para| info.reorder_line(para, para.range.clone()).into_owned())
        .collect()
}

/// Shape then reorder: the string to hand to a glyph rasterizer.
pub fn display_text(text: &str) -> String {
    visual_order(&shape_arabic(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latin_untouched() {
        assert_eq!(shape_arabic("Sara 42"), "Sara 42");
        assert_eq!(display_text("Sara"), "Sara");
    }

    #[test]
    fn test_right_joining_breaks_chain() {
        // seen-alef-reh-teh marbuta
        assert_eq!(
            shape_arabic("\u{0633}\u{0627}\u{0631}\u{0629}"),
            "\u{FEB3}\u{FE8E}\u{FEAD}\u{FE93}"
        );
    }

    #[test]
    fn test_lam_alef_ligature() {
        assert_eq!(shape_arabic("\u{0644}\u{0627}"), "\u{FEFB}");
    }

    #[test]
    fn test_persian_letters_shaped() {
        // gaf-lam
        assert_eq!(shape_arabic("\u{06AF}\u{0644}"), "\u{FB94}\u{FEDE}");
        // peh alone
        assert_eq!(shape_arabic("\u{067E}"), "\u{FB56}");
    }

    #[test]
    fn test_no_base_letters_survive() {
        let shaped = shape_arabic("\u{0645}\u{062D}\u{0645}\u{062F} \u{0686}\u{0627}\u{06CC}");
        assert!(!shaped.chars().any(|c| ('\u{0621}'..='\u{06FF}').contains(&c)), "{shaped:?}");
    }

    #[test]
    fn test_visual_order_reverses_rtl_run() {
        assert_eq!(visual_order("\u{FEB3}\u{FE8E}"), "\u{FE8E}\u{FEB3}");
        assert_eq!(visual_order("ab \u{FEB3}\u{FE8E}"), "ab \u{FE8E}\u{FEB3}");
    }

    #[test]
    fn test_display_text_arabic_name() {
        assert_eq!(
            display_text("\u{0633}\u{0627}\u{0631}\u{0629}"),
            "\u{FE93}\u{FEAD}\u{FE8E}\u{FEB3}"
        );
    }
}
