//! Positional diff and file rewriting
//!
//! The diff is not computed by a text-diff algorithm: the parser already
//! pairs every expected block with the output of exactly one command, so the
//! builder walks the two sides in lockstep and groups consecutive
//! mismatches, removals before additions.  That grouping is what makes the
//! emitted hunks acceptable to `patch -p0` when piped back onto the file.

use std::collections::BTreeMap;

use crate::executor::CommandResult;
use crate::lines::LinesWithTerminator;
use crate::matcher;
use crate::parser::{Document, TestCommand};

const CONTEXT: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Side {
    Context,
    Removed,
}

/// Diff activity recorded against one source line: the line's own fate plus
/// any actual-output lines inserted after it.
#[derive(Clone, Debug, Default)]
struct LineRecord {
    own: Option<(Side, Vec<u8>)>,
    added_after: Vec<Vec<u8>>,
}

impl LineRecord {
    fn is_clean(&self) -> bool {
        self.added_after.is_empty() && !matches!(self.own, Some((Side::Removed, _)))
    }
}

/// Accumulates per-command alignments for one file and renders them as a
/// unified diff or as in-place corrections.
#[derive(Debug, Default)]
pub struct FileDiff {
    records: BTreeMap<usize, LineRecord>,
    corrections: Vec<Correction>,
}

/// Replacement of the expected block at `[start, end)` (1-based line range)
/// with a freshly rendered one.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Correction {
    start: usize,
    end: usize,
    new_lines: Vec<Vec<u8>>,
}

impl FileDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Align one command's expected block against what it actually printed.
    ///
    /// Returns true when the alignment was clean (the command passed).
    pub fn align(
        &mut self,
        command: &TestCommand<'_>,
        result: &CommandResult,
        indent: usize,
    ) -> bool {
        let actual = actual_lines(result);
        let first = command.expected_start();
        let pad = vec![b' '; indent];

        let mut clean = true;
        let mut ei = 0;
        let mut ai = 0;
        // Additions attach after the last context or removal; before any
        // expected line exists that is the command's own last physical line.
        let mut anchor = first.saturating_sub(1);

        while ei < command.expected.len() && ai < actual.len() {
            if matcher::line_matches(&command.expected[ei], &actual[ai]) {
                let line = first + ei;
                self.record(line).own = Some((
                    Side::Context,
                    indented(&pad, command.expected[ei].original),
                ));
                anchor = line;
                ei += 1;
                ai += 1;
                continue;
            }
            // Group consecutive mismatches: all removals land first, then
            // every displaced actual line attaches after the last removal.
            clean = false;
            let mut added = Vec::new();
            while ei < command.expected.len()
                && ai < actual.len()
                && !matcher::line_matches(&command.expected[ei], &actual[ai])
            {
                let line = first + ei;
                self.record(line).own = Some((
                    Side::Removed,
                    indented(&pad, command.expected[ei].original),
                ));
                anchor = line;
                added.push(indented(&pad, &render_actual(&actual[ai])));
                ei += 1;
                ai += 1;
            }
            self.record(anchor).added_after.extend(added);
        }
        while ei < command.expected.len() {
            clean = false;
            let line = first + ei;
            self.record(line).own = Some((
                Side::Removed,
                indented(&pad, command.expected[ei].original),
            ));
            anchor = line;
            ei += 1;
        }
        while ai < actual.len() {
            clean = false;
            self.record(anchor)
                .added_after
                .push(indented(&pad, &render_actual(&actual[ai])));
            ai += 1;
        }

        if !clean {
            self.corrections.push(Correction {
                start: first,
                end: first + command.expected.len(),
                new_lines: correction_lines(result, indent),
            });
        }
        clean
    }

    /// Render all recorded failures as hunks of a unified diff.
    ///
    /// Empty when every alignment was clean.
    pub fn unified_diff(&self, doc: &Document<'_>, path: &std::path::Path) -> Vec<u8> {
        let windows = self.windows(doc);
        if windows.is_empty() {
            return Vec::new();
        }

        let mut out = Vec::new();
        let path = path.display().to_string();
        out.extend_from_slice(format!("--- {path}\n").as_bytes());
        out.extend_from_slice(format!("+++ {path}\n").as_bytes());

        for (start, end) in windows {
            let mut body = Vec::new();
            let mut old_count = 0;
            let mut new_count = 0;
            for line in start..end {
                if let Some(record) = self.records.get(&line) {
                    match &record.own {
                        Some((Side::Context, content)) => {
                            old_count += 1;
                            new_count += 1;
                            push_line(&mut body, b' ', content);
                        }
                        Some((Side::Removed, content)) => {
                            old_count += 1;
                            push_line(&mut body, b'-', content);
                        }
                        None => {
                            if let Some(content) = file_line(doc, line) {
                                old_count += 1;
                                new_count += 1;
                                push_line(&mut body, b' ', content);
                            }
                        }
                    }
                    for content in &record.added_after {
                        new_count += 1;
                        push_line(&mut body, b'+', content);
                    }
                } else if let Some(content) = file_line(doc, line) {
                    old_count += 1;
                    new_count += 1;
                    push_line(&mut body, b' ', content);
                }
            }
            out.extend_from_slice(
                format!("@@ -{start},{old_count} +{start},{new_count} @@\n").as_bytes(),
            );
            out.extend_from_slice(&body);
        }
        out
    }

    pub fn has_failures(&self) -> bool {
        !self.corrections.is_empty()
    }

    /// Rewrite the file body, substituting every failed expected block with
    /// the output the shell actually produced.
    pub fn patched(&self, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let mut corrections = self.corrections.iter().peekable();
        for (idx, line) in LinesWithTerminator::new(data).enumerate() {
            let number = idx + 1;
            if let Some(correction) = corrections.peek() {
                if number == correction.start {
                    for new_line in &correction.new_lines {
                        out.extend_from_slice(new_line);
                        out.push(b'\n');
                    }
                }
                if (correction.start..correction.end).contains(&number) {
                    if number + 1 == correction.end {
                        corrections.next();
                    }
                    continue;
                }
                if number >= correction.end {
                    corrections.next();
                }
            }
            out.extend_from_slice(line);
        }
        // An empty replaced range at EOF still has lines to flush
        for correction in corrections {
            for new_line in &correction.new_lines {
                out.extend_from_slice(new_line);
                out.push(b'\n');
            }
        }
        if data.last() != Some(&b'\n') && out.last() == Some(&b'\n') {
            out.pop();
        }
        out
    }

    fn record(&mut self, line: usize) -> &mut LineRecord {
        self.records.entry(line).or_default()
    }

    /// Merged context windows around every line that carries a non-context
    /// diff.
    fn windows(&self, doc: &Document<'_>) -> Vec<(usize, usize)> {
        let total = doc.lines.len();
        let mut windows: Vec<(usize, usize)> = Vec::new();
        for (&line, record) in &self.records {
            if record.is_clean() {
                continue;
            }
            let start = line.saturating_sub(CONTEXT).max(1);
            let end = (line + CONTEXT + 1).min(total + 1);
            match windows.last_mut() {
                Some((_, last_end)) if start <= *last_end => {
                    *last_end = (*last_end).max(end);
                }
                _ => windows.push((start, end)),
            }
        }
        windows
    }
}

/// Split captured output into lines the way the author sees them, with the
/// exit code folded in as a trailing `[code]` line.
fn actual_lines(result: &CommandResult) -> Vec<Vec<u8>> {
    let mut lines: Vec<Vec<u8>> = result
        .output
        .split(|&b| b == b'\n')
        .map(|l| l.to_vec())
        .collect();
    if result.output.ends_with(b"\n") {
        lines.pop();
    }
    if result.output.is_empty() {
        lines.clear();
    }
    if result.exit_code != 0 {
        lines.push(format!("[{}]", result.exit_code).into_bytes());
    }
    lines
}

fn render_actual(line: &[u8]) -> Vec<u8> {
    if matcher::needs_escaping(line) {
        let mut rendered = matcher::escape(line);
        rendered.extend_from_slice(b" (esc)");
        rendered
    } else {
        line.to_vec()
    }
}

fn correction_lines(result: &CommandResult, indent: usize) -> Vec<Vec<u8>> {
    let pad = vec![b' '; indent];
    actual_lines(result)
        .iter()
        .map(|line| indented(&pad, &render_actual(line)))
        .collect()
}

fn indented(pad: &[u8], content: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(pad.len() + content.len());
    line.extend_from_slice(pad);
    line.extend_from_slice(content);
    line
}

fn file_line<'a>(doc: &'a Document<'_>, number: usize) -> Option<&'a [u8]> {
    let line = *doc.lines.get(number - 1)?;
    // The terminal empty element of a newline-terminated file is not a line
    if number == doc.lines.len() && doc.ends_with_newline {
        return None;
    }
    Some(line)
}

fn push_line(out: &mut Vec<u8>, prefix: u8, content: &[u8]) {
    out.push(prefix);
    out.extend_from_slice(content);
    out.push(b'\n');
}
