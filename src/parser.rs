//! Test document parser
//!
//! A test file is free-form prose with indented shell-session blocks.  Within
//! a block, `$ ` starts a command, `> ` continues it, and every other
//! indented line records output the author expects.  Parsing never fails:
//! any byte stream is a valid document, and an empty one simply has no
//! commands.

use crate::matcher::MatchKind;

/// One unit of expected output, with its trailing annotation decoded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExpectedLine<'a> {
    /// Content with any trailing annotation stripped
    pub text: &'a [u8],
    /// The full line as written, after the indent
    pub original: &'a [u8],
    pub matcher: MatchKind,
    pub no_eol: bool,
}

impl<'a> ExpectedLine<'a> {
    pub(crate) fn parse(original: &'a [u8]) -> Self {
        let mut text = original;
        let mut no_eol = false;
        if let Some(stripped) = text.strip_suffix(b" (no-eol)".as_slice()) {
            no_eol = true;
            text = stripped;
        }
        let matcher = if let Some(stripped) = text.strip_suffix(b" (re)".as_slice()) {
            text = stripped;
            MatchKind::Regex
        } else if let Some(stripped) = text.strip_suffix(b" (glob)".as_slice()) {
            text = stripped;
            MatchKind::Glob
        } else if let Some(stripped) = text.strip_suffix(b" (esc)".as_slice()) {
            text = stripped;
            MatchKind::Escape
        } else {
            MatchKind::Literal
        };
        Self {
            text,
            original,
            matcher,
            no_eol,
        }
    }
}

/// One executable unit: a command (possibly continued over several physical
/// lines) and the output block that follows it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCommand<'a> {
    /// 1-based line number of the command's first physical line
    pub source_line: usize,
    pub command_lines: Vec<&'a [u8]>,
    pub expected: Vec<ExpectedLine<'a>>,
}

impl<'a> TestCommand<'a> {
    /// 1-based line number of the first expected-output line.
    ///
    /// Also the insertion point for a rewritten expected block when the
    /// command printed nothing the author recorded.
    pub fn expected_start(&self) -> usize {
        self.source_line + self.command_lines.len()
    }
}

/// A parsed test file: the physical lines and the commands found in them.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Document<'a> {
    /// Physical lines without terminators.  When the file ends with a
    /// newline the split yields a terminal empty element, which is kept so
    /// line numbers cover the whole file.
    pub lines: Vec<&'a [u8]>,
    pub commands: Vec<TestCommand<'a>>,
    pub ends_with_newline: bool,
}

impl<'a> Document<'a> {
    pub fn parse(data: &'a [u8], indent: usize) -> Self {
        let lines: Vec<&[u8]> = data.split(|&b| b == b'\n').collect();
        let ends_with_newline = data.last() == Some(&b'\n');

        let mut commands = Vec::new();
        let mut current: Option<TestCommand<'a>> = None;
        for (idx, line) in lines.iter().enumerate() {
            match classify(line, indent) {
                Class::Command(text) => {
                    if let Some(done) = current.take() {
                        commands.push(done);
                    }
                    current = Some(TestCommand {
                        source_line: idx + 1,
                        command_lines: vec![text],
                        expected: Vec::new(),
                    });
                }
                Class::Continuation(text) => {
                    if let Some(cmd) = current.as_mut() {
                        cmd.command_lines.push(text);
                    }
                    // A stray `> ` with no open command is prose.
                }
                Class::Output(rest) => {
                    if let Some(cmd) = current.as_mut() {
                        cmd.expected.push(ExpectedLine::parse(rest));
                    }
                }
                Class::Comment => {
                    if let Some(done) = current.take() {
                        commands.push(done);
                    }
                }
            }
        }
        if let Some(done) = current.take() {
            commands.push(done);
        }

        Self {
            lines,
            commands,
            ends_with_newline,
        }
    }
}

enum Class<'a> {
    Comment,
    Command(&'a [u8]),
    Continuation(&'a [u8]),
    Output(&'a [u8]),
}

fn classify(line: &[u8], indent: usize) -> Class<'_> {
    if line.len() < indent || line[..indent].iter().any(|&b| b != b' ') {
        return Class::Comment;
    }
    let rest = &line[indent..];
    if let Some(text) = prompt_text(rest, b'$') {
        Class::Command(text)
    } else if let Some(text) = prompt_text(rest, b'>') {
        Class::Continuation(text)
    } else {
        Class::Output(rest)
    }
}

fn prompt_text(rest: &[u8], prompt: u8) -> Option<&[u8]> {
    if rest.len() >= 2 && rest[0] == prompt && rest[1] == b' ' {
        Some(&rest[2..])
    } else if rest.len() == 1 && rest[0] == prompt {
        Some(&[])
    } else {
        None
    }
}
