//! Bounded output buffer
//!
//! Evaluation output has a hard capacity. Anything past it is dropped
//! silently, and a cut never lands inside an ANSI escape (`ESC ... m`)
//! or a markup tag (`TAG_START ... TAG_END`).

/// Starts an ANSI colour sequence, closed by `m`
pub const ESC_CHAR: char = '\x1b';
/// Starts an internal markup tag
pub const TAG_START: char = '\x02';
/// Closes an internal markup tag
pub const TAG_END: char = '\x03';

/// Character that closes a markup sequence opened by `c`
pub(crate) fn markup_closer(c: char) -> Option<char> {
    match c {
        ESC_CHAR => Some('m'),
        TAG_START => Some(TAG_END),
        _ => None,
    }
}

/// Largest byte offset `<= limit` that is a char boundary outside any markup
pub fn markup_safe_cut(s: &str, limit: usize) -> usize {
    if s.len() <= limit {
        return s.len();
    }
    let mut safe = 0;
    let mut closer: Option<char> = None;
    for (i, c) in s.char_indices() {
        if i > limit {
            break;
        }
        match closer {
            Some(end) => {
                if c == end {
                    closer = None;
                }
            }
            None => {
                safe = i;
                closer = markup_closer(c);
            }
        }
    }
    safe
}

/// Remove colour escapes and markup tags
pub fn strip_markup(s: &str) -> String {
    let mut plain = String::with_capacity(s.len());
    let mut closer: Option<char> = None;
    for c in s.chars() {
        match closer {
            Some(end) => {
                if c == end {
                    closer = None;
                }
            }
            None => match markup_closer(c) {
                Some(end) => closer = Some(end),
                None => plain.push(c),
            },
        }
    }
    plain
}

/// Capacity-limited, markup-aware output buffer
#[derive(Debug, Clone)]
pub struct OutputSink {
    buf: String,
    capacity: usize,
    truncated: bool,
}

impl OutputSink {
    /// Create a sink holding at most `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: String::with_capacity(capacity.min(256)),
            capacity,
            truncated: false,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes still available before truncation starts
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Has any output been dropped?
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Append as much of `s` as fits
    ///
    /// # Returns
    /// `true` if all of `s` was written
    pub fn push_str(&mut self, s: &str) -> bool {
        let room = self.remaining();
        if s.len() <= room {
            self.buf.push_str(s);
            return true;
        }
        let cut = markup_safe_cut(s, room);
        self.buf.push_str(&s[..cut]);
        self.truncated = true;
        false
    }

    pub fn push_char(&mut self, c: char) -> bool {
        if c.len_utf8() <= self.remaining() {
            self.buf.push(c);
            true
        } else {
            self.truncated = true;
            false
        }
    }

    /// Discard everything from byte offset `len` onwards
    pub fn truncate(&mut self, len: usize) {
        if len < self.buf.len() && self.buf.is_char_boundary(len) {
            self.buf.truncate(len);
        }
    }

    pub fn pop_char(&mut self) -> Option<char> {
        self.buf.pop()
    }

    pub fn ends_with(&self, s: &str) -> bool {
        self.buf.ends_with(s)
    }

    /// Output written since byte offset `start`
    pub fn tail(&self, start: usize) -> &str {
        self.buf.get(start..).unwrap_or("")
    }

    /// Upper-case the first visible character written at or after `start`
    pub fn capitalize_from(&mut self, start: usize) {
        let mut closer: Option<char> = None;
        let mut target = None;
        for (i, c) in self.tail(start).char_indices() {
            match closer {
                Some(end) => {
                    if c == end {
                        closer = None;
                    }
                }
                None => match markup_closer(c) {
                    Some(end) => closer = Some(end),
                    None => {
                        target = Some((start + i, c));
                        break;
                    }
                },
            }
        }
        if let Some((at, c)) = target {
            if c.is_ascii_lowercase() {
                let upper = c.to_ascii_uppercase();
                self.buf.replace_range(at..at + 1, upper.encode_utf8(&mut [0; 4]));
            }
        }
    }

    pub fn into_string(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_within_capacity() {
        let mut sink = OutputSink::new(8);
        assert!(sink.push_str("hello"));
        assert_eq!(sink.remaining(), 3);
        assert!(!sink.is_truncated());
    }

    #[test]
    fn test_truncation_is_silent() {
        let mut sink = OutputSink::new(4);
        assert!(!sink.push_str("abcdef"));
        assert_eq!(sink.as_str(), "abcd");
        assert!(sink.is_truncated());
        assert!(!sink.push_char('x'));
        assert_eq!(sink.as_str(), "abcd");
    }

    #[test]
    fn test_never_splits_escape() {
        let mut sink = OutputSink::new(6);
        sink.push_str("ab\x1b[31mcd");
        assert_eq!(sink.as_str(), "ab");
    }

    #[test]
    fn test_never_splits_tag() {
        let mut sink = OutputSink::new(5);
        sink.push_str("a\x02tag\x03b");
        assert_eq!(sink.as_str(), "a");
        let mut roomy = OutputSink::new(6);
        roomy.push_str("a\x02tag\x03b");
        assert_eq!(roomy.as_str(), "a\x02tag\x03");
    }

    #[test]
    fn test_strip_markup() {
        assert_eq!(strip_markup("\x1b[1mbold\x1b[0m \x02x\x03text"), "bold text");
    }

    #[test]
    fn test_capitalize_skips_markup() {
        let mut sink = OutputSink::new(64);
        sink.push_str("x \x1b[32mgreen");
        sink.capitalize_from(2);
        assert_eq!(sink.as_str(), "x \x1b[32mGreen");
    }

    #[test]
    fn test_truncate_and_tail() {
        let mut sink = OutputSink::new(64);
        sink.push_str("name(");
        assert_eq!(sink.tail(0), "name(");
        sink.truncate(4);
        assert_eq!(sink.as_str(), "name");
        assert_eq!(sink.tail(10), "");
    }
}
