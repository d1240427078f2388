use std::borrow::Cow;

fn is_stripped_control(c: char) -> bool {
    (c.is_ascii_control() && c != '\t' && c != '\n' && c != '\r') || ('\u{80}'..='\u{9f}').contains(&c)
}

/// SEC-001: Strip control characters from feed-supplied text.
///
/// Removes ASCII C0 controls (except tab, newline, carriage return), DEL and
/// the C1 range. ESC is dropped on its own, which defuses ANSI sequences
/// without trying to interpret them.
///
/// Returns `Cow::Borrowed` when the input is already clean (the common case).
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    if !s.chars().any(is_stripped_control) {
        return Cow::Borrowed(s);
    }
    Cow::Owned(s.chars().filter(|&c| !is_stripped_control(c)).collect())
}

/// Collapses every run of whitespace into a single space and trims the ends.
///
/// Feed titles are frequently wrapped across lines in the source XML; this
/// turns them back into one display line.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Title cleanup applied by the parser: control characters removed, whitespace collapsed.
pub fn clean_title(s: &str) -> String {
    collapse_whitespace(&strip_control_chars(s))
}
