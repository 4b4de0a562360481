//! Terminal cell measurements.
//!
//! Widths count display cells, not bytes or chars: CJK and most emoji take
//! two cells, combining marks none. Text with control characters has no
//! defined display width and falls back to its byte length.

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const REPLACEMENT: char = '\u{FFFD}';

fn measure(value: &str) -> Option<usize> {
    if value.chars().any(|c| c.width().is_none()) {
        return None;
    }
    Some(UnicodeWidthStr::width(value))
}

/// Cells needed to show `value`.
pub fn display_width(value: &str) -> usize {
    measure(value).unwrap_or(value.len())
}

/// The longest prefix of `value` that fits in `width` cells.
///
/// A double-width character cut by the boundary becomes U+FFFD so the result
/// still fills the cell budget exactly.
pub fn fit(value: &str, width: usize) -> String {
    if measure(value).is_none() {
        return truncate_bytes(value, width);
    }
    let mut used = 0;
    let mut fitted = String::with_capacity(value.len().min(width * 4));
    for c in value.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > width {
            if used < width {
                fitted.push(REPLACEMENT);
            }
            break;
        }
        used += w;
        fitted.push(c);
    }
    fitted
}

/// Cuts at `width` bytes; a split multi-byte sequence is replaced, not dropped.
pub fn truncate_bytes(value: &str, width: usize) -> String {
    let bytes = value.as_bytes();
    String::from_utf8_lossy(&bytes[..width.min(bytes.len())]).into_owned()
}

/// `value` fitted to `width` and padded on the right with spaces.
pub fn pad(value: &str, width: usize) -> String {
    let mut fitted = fit(value, width);
    let missing = width.saturating_sub(display_width(&fitted));
    fitted.extend(std::iter::repeat_n(' ', missing));
    fitted
}

/// `value` fitted to `width` and centred; odd leftovers go to the right.
pub fn center(value: &str, width: usize) -> String {
    let fitted = fit(value, width);
    let missing = width.saturating_sub(display_width(&fitted));
    let left = missing / 2;
    format!("{}{fitted}{}", " ".repeat(left), " ".repeat(missing - left))
}
