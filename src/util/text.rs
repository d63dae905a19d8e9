use std::borrow::Cow;

use unicode_width::UnicodeWidthChar;

const ELLIPSIS: char = '…';

/// Flatten feed-supplied text onto one terminal-safe line.
///
/// Drops ANSI escape sequences and other control characters, turns line
/// breaks and tabs into spaces, and collapses runs of whitespace. Returns
/// `Cow::Borrowed` when nothing needed changing.
pub fn single_line(s: &str) -> Cow<'_, str> {
    let clean = !s.contains(|c: char| c.is_control() || c == '\u{1b}')
        && !s.contains("  ")
        && s.trim() == s;
    if clean {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            skip_escape(&mut chars);
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    Cow::Owned(out)
}

/// Consume the remainder of an escape sequence whose ESC was already read.
fn skip_escape(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) {
    match chars.peek() {
        // CSI: parameters until a final byte in '@'..='~'
        Some('[') => {
            chars.next();
            for c in chars.by_ref() {
                if ('@'..='~').contains(&c) {
                    break;
                }
            }
        }
        // OSC: until BEL or ST (ESC \)
        Some(']') => {
            chars.next();
            while let Some(c) = chars.next() {
                if c == '\u{7}' {
                    break;
                }
                if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                    chars.next();
                    break;
                }
            }
        }
        _ => {}
    }
}

/// Cut `s` to at most `max_width` terminal columns, ending in an ellipsis
/// when anything was removed. Wide (CJK, emoji) characters count as two.
pub fn fit_width(s: &str, max_width: usize) -> Cow<'_, str> {
    let mut used = 0;
    let mut cut = None;

    for (idx, c) in s.char_indices() {
        let w = c.width().unwrap_or(0);
        // Remember the last point where an ellipsis would still fit
        if cut.is_none() && used + w + 1 > max_width {
            cut = Some(idx);
        }
        if used + w > max_width {
            let cut = cut.unwrap_or(idx);
            if max_width == 0 {
                return Cow::Borrowed("");
            }
            let mut out = s[..cut].to_string();
            out.push(ELLIPSIS);
            return Cow::Owned(out);
        }
        used += w;
    }

    Cow::Borrowed(s)
}
