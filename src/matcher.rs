//! Expected-line matching
//!
//! Comparison is byte-oriented throughout: test output is not guaranteed to
//! be UTF-8 and must round-trip exactly.
//!
//! A literal comparison always runs first, against the line as written and
//! then against the annotation-stripped text.  That way output which happens
//! to end in ` (re)` can still be recorded verbatim, without double
//! escaping.

use crate::parser::ExpectedLine;

/// Dialect of an expected line, decoded from its trailing annotation.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MatchKind {
    Literal,
    Glob,
    Regex,
    Escape,
}

/// Decide whether one actual output line satisfies an expected line.
pub fn line_matches(expected: &ExpectedLine<'_>, actual: &[u8]) -> bool {
    if actual == expected.original {
        return true;
    }
    if actual == expected.text {
        return true;
    }
    match expected.matcher {
        MatchKind::Literal => false,
        MatchKind::Glob => glob_matches(expected.text, actual),
        MatchKind::Regex => regex_matches(expected.text, actual),
        MatchKind::Escape => unescape(expected.text) == actual,
    }
}

/// Anchored glob match: `*` spans any bytes, `?` exactly one, `\` quotes the
/// next byte.  Greedy scan with backtracking to the most recent `*`.
fn glob_matches(pattern: &[u8], actual: &[u8]) -> bool {
    let mut p = 0;
    let mut a = 0;
    // (pattern index after the star, actual index the star has consumed to)
    let mut star: Option<(usize, usize)> = None;
    while a < actual.len() {
        let step = match pattern.get(p) {
            Some(&b'*') => {
                star = Some((p + 1, a));
                p += 1;
                continue;
            }
            Some(&b'?') => true,
            Some(&b'\\') if p + 1 < pattern.len() => {
                if pattern[p + 1] == actual[a] {
                    p += 2;
                    a += 1;
                    continue;
                }
                false
            }
            Some(&c) => c == actual[a],
            None => false,
        };
        if step {
            p += 1;
            a += 1;
        } else if let Some((after_star, consumed)) = star {
            p = after_star;
            a = consumed + 1;
            star = Some((after_star, consumed + 1));
        } else {
            return false;
        }
    }
    while pattern.get(p) == Some(&b'*') {
        p += 1;
    }
    p == pattern.len()
}

/// Anchored regex match with `.` spanning newlines.  A pattern that is not
/// UTF-8 or does not compile is simply no match; a bad pattern must never
/// abort the run.
fn regex_matches(pattern: &[u8], actual: &[u8]) -> bool {
    let Ok(pattern) = std::str::from_utf8(pattern) else {
        return false;
    };
    let anchored = format!(r"\A(?s:{pattern})\z");
    match regex::bytes::Regex::new(&anchored) {
        Ok(re) => re.is_match(actual),
        Err(_error) => {
            crate::debug!("invalid regex {:?}: {}", pattern, _error);
            false
        }
    }
}

/// Render bytes in the form the `(esc)` dialect reads back.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        match b {
            b'\t' => out.extend_from_slice(b"\\t"),
            b'\r' => out.extend_from_slice(b"\\r"),
            b'\\' => out.extend_from_slice(b"\\\\"),
            0x00..=0x08 | 0x0B | 0x0C | 0x0E..=0x1F | 0x7F..=0xFF => {
                out.extend_from_slice(format!("\\x{b:02x}").as_bytes());
            }
            _ => out.push(b),
        }
    }
    out
}

/// Decode the `(esc)` dialect.  Malformed `\xNN` and unknown escapes keep
/// their backslash, so decoding cannot fail.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        if data[i] != b'\\' {
            out.push(data[i]);
            i += 1;
            continue;
        }
        match data.get(i + 1) {
            Some(&b't') => {
                out.push(b'\t');
                i += 2;
            }
            Some(&b'r') => {
                out.push(b'\r');
                i += 2;
            }
            Some(&b'n') => {
                out.push(b'\n');
                i += 2;
            }
            Some(&b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(&b'x') => match hex_pair(data.get(i + 2..i + 4)) {
                Some(byte) => {
                    out.push(byte);
                    i += 4;
                }
                None => {
                    out.push(b'\\');
                    i += 1;
                }
            },
            _ => {
                out.push(b'\\');
                i += 1;
            }
        }
    }
    out
}

fn hex_pair(digits: Option<&[u8]>) -> Option<u8> {
    let digits = digits?;
    let hi = hex_value(digits[0])?;
    let lo = hex_value(digits[1])?;
    Some(hi << 4 | lo)
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Whether a line must be written in escaped form to survive a text file.
///
/// True for control bytes other than tab, for DEL, and for byte sequences
/// that are not well-formed UTF-8.
pub fn needs_escaping(line: &[u8]) -> bool {
    let mut i = 0;
    while i < line.len() {
        let b = line[i];
        if (b < 0x20 && b != b'\t') || b == 0x7F {
            return true;
        }
        if b < 0x80 {
            i += 1;
            continue;
        }
        let len = match b {
            0xC0..=0xDF => 2,
            0xE0..=0xEF => 3,
            0xF0..=0xF7 => 4,
            // continuation byte in lead position, or out of range
            _ => return true,
        };
        if i + len > line.len() {
            return true;
        }
        if !line[i + 1..i + len].iter().all(|&c| (0x80..0xC0).contains(&c)) {
            return true;
        }
        i += len;
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;

    fn expected(original: &[u8]) -> ExpectedLine<'_> {
        ExpectedLine::parse(original)
    }

    #[test]
    fn literal_match() {
        assert!(line_matches(&expected(b"hello"), b"hello"));
        assert!(!line_matches(&expected(b"hello"), b"hello "));
        assert!(!line_matches(&expected(b"hello"), b"hell"));
    }

    #[test]
    fn literal_wins_over_annotation() {
        // Output that happens to end in an annotation is matched as written
        assert!(line_matches(&expected(b"[+*) (re)"), b"[+*) (re)"));
        assert!(line_matches(&expected(b"x (glob)"), b"x (glob)"));
        // ... and the stripped form matches too
        assert!(line_matches(&expected(b"hi (re)"), b"hi"));
    }

    #[test]
    fn glob_cases() {
        let cases = [
            ("", "", true),
            ("*", "", true),
            ("*", "anything", true),
            ("?", "", false),
            ("?", "a", true),
            ("?", "ab", false),
            ("*.txt", "hello.txt", true),
            ("*.txt", "hello.txt.bak", false),
            ("a*b*c", "abc", true),
            ("a*b*c", "aXbYc", true),
            ("a*b*c", "aXbY", false),
            ("\\*", "*", true),
            ("\\*", "x", false),
            ("\\?", "?", true),
            ("a\\\\b", "a\\b", true),
            ("*x*", "abcxdef", true),
            ("*x*", "abcdef", false),
        ];
        for (pattern, actual, matches) in cases {
            assert_eq!(
                glob_matches(pattern.as_bytes(), actual.as_bytes()),
                matches,
                "pattern={pattern:?} actual={actual:?}"
            );
        }
    }

    #[test]
    fn glob_dialect() {
        assert!(line_matches(&expected(b"*.txt (glob)"), b"hello.txt"));
        assert!(!line_matches(&expected(b"*.txt (glob)"), b"hello.tx"));
    }

    #[test]
    fn regex_dialect() {
        assert!(line_matches(
            &expected(b"\\d{4}-\\d{2}-\\d{2} (re)"),
            b"2024-01-15"
        ));
        assert!(!line_matches(
            &expected(b"\\d{4}-\\d{2}-\\d{2} (re)"),
            b"date: 2024-01-15"
        ));
    }

    #[test]
    fn regex_is_anchored() {
        // A partial match never passes
        assert!(!line_matches(&expected(b"ell (re)"), b"hello"));
        assert!(line_matches(&expected(b".*ell.* (re)"), b"hello"));
    }

    #[test]
    fn regex_dot_spans_newline() {
        // Demultiplexed lines never contain `\n`, but the flag is part of
        // the dialect and observable through escapes
        assert!(regex_matches(b"a.b", b"a\nb"));
    }

    #[test]
    fn regex_invalid_is_no_match() {
        assert!(!line_matches(&expected(b"([ (re)"), b"anything"));
        assert!(!regex_matches(&[0xFF, 0xFE], b"anything"));
    }

    #[test]
    fn escape_dialect() {
        assert!(line_matches(&expected(b"\\x00\\x01 (esc)"), b"\x00\x01"));
        assert!(line_matches(&expected(b"a\\tb (esc)"), b"a\tb"));
        assert!(!line_matches(&expected(b"\\x00 (esc)"), b"\x01"));
    }

    #[test]
    fn escape_round_trip() {
        let samples: &[&[u8]] = &[
            b"",
            b"plain ascii",
            b"tab\there",
            b"cr\rhere",
            b"back\\slash",
            &[0x00, 0x01, 0x1F, 0x7F, 0x80, 0xFF],
            "caf\u{e9}".as_bytes(),
        ];
        for s in samples {
            assert_eq!(unescape(&escape(s)), *s, "sample={s:?}");
        }
    }

    #[test]
    fn escape_forms() {
        assert_eq!(escape(b"\t"), b"\\t");
        assert_eq!(escape(b"\r"), b"\\r");
        assert_eq!(escape(b"\\"), b"\\\\");
        assert_eq!(escape(&[0x00]), b"\\x00");
        assert_eq!(escape(&[0xAB]), b"\\xab");
        assert_eq!(escape(b"ok"), b"ok");
    }

    #[test]
    fn unescape_lenient() {
        // Unknown escapes and malformed hex keep their backslash
        assert_eq!(unescape(b"\\q"), b"\\q");
        assert_eq!(unescape(b"\\xZZ"), b"\\xZZ");
        assert_eq!(unescape(b"\\x4"), b"\\x4");
        assert_eq!(unescape(b"tail\\"), b"tail\\");
        assert_eq!(unescape(b"\\n"), b"\n");
    }

    #[test]
    fn needs_escaping_cases() {
        assert!(!needs_escaping(b"plain"));
        assert!(!needs_escaping(b"tab\tok"));
        assert!(!needs_escaping("caf\u{e9}".as_bytes()));
        assert!(!needs_escaping("\u{1F600}".as_bytes()));
        assert!(needs_escaping(b"bell\x07"));
        assert!(needs_escaping(b"del\x7f"));
        assert!(needs_escaping(&[0x80])); // bare continuation byte
        assert!(needs_escaping(&[0xC3])); // truncated sequence
        assert!(needs_escaping(&[0xC3, 0x28])); // bad continuation
        assert!(needs_escaping(&[0xF8])); // out of range lead
    }
}
