//! Single-session shell execution
//!
//! All commands of one file run in one shell process so state (variables,
//! cwd, functions) carries from command to command.  Output is demultiplexed
//! by salted marker lines: after each command the script prints a line no
//! real output should contain, carrying the command index and its exit code.

use std::io::prelude::*;

use rand::Rng;

use crate::lines::LinesWithTerminator;
use crate::parser::TestCommand;

/// Streaming cap on captured output per file.
const MAX_OUTPUT: usize = 10 * 1024 * 1024;

/// Captured outcome of one command.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandResult {
    /// Combined stdout+stderr, without the marker emitter's newline
    pub output: Vec<u8>,
    pub exit_code: i32,
}

/// Everything the shell session needs besides the commands themselves.
#[derive(Debug)]
pub struct Session<'e> {
    pub shell: &'e std::path::Path,
    pub env: &'e std::collections::BTreeMap<String, String>,
    pub cwd: &'e std::path::Path,
    pub timeout: Option<std::time::Duration>,
    pub debug: bool,
}

impl Session<'_> {
    /// Run every command, in file order, in one shell.
    ///
    /// Always returns one result per command.  Commands past the point where
    /// the shell died keep the default `{empty, 0}` and surface through the
    /// diff instead.
    pub fn execute(&self, commands: &[TestCommand<'_>]) -> crate::Result<Vec<CommandResult>> {
        if self.debug {
            return self.execute_debug(commands);
        }

        let salt = fresh_salt();
        let script = build_script(commands, Some(&salt));

        let mut child = self
            .command()
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.shell.display(), e))?;

        let stdout = child.stdout.take().expect("stdout was piped");
        let count = commands.len();
        let reader =
            std::thread::spawn(move || demultiplex(std::io::BufReader::new(stdout), &salt, count));

        feed_stdin(&mut child, &script);
        self.wait(child)?;

        // Joining is safe only after a clean wait: a killed session can leave
        // grandchildren holding the pipe open, so the timeout path errors out
        // above without blocking on the reader.
        let results = reader
            .join()
            .map_err(|_| crate::Error::new("output reader panicked"))??;
        Ok(results)
    }

    /// Debug mode: no markers, child output goes straight to the terminal,
    /// and every command reports clean so no comparison happens.
    fn execute_debug(&self, commands: &[TestCommand<'_>]) -> crate::Result<Vec<CommandResult>> {
        let script = build_script(commands, None);

        let mut child = self
            .command()
            .stdin(std::process::Stdio::piped())
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {}", self.shell.display(), e))?;

        feed_stdin(&mut child, &script);
        self.wait(child)?;

        Ok(vec![CommandResult::default(); commands.len()])
    }

    fn wait(&self, mut child: std::process::Child) -> crate::Result<()> {
        match self.timeout {
            Some(timeout) => {
                let status = wait_timeout::ChildExt::wait_timeout(&mut child, timeout)?;
                if status.is_none() {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(crate::Error::new(format!(
                        "shell session timed out after {}",
                        humantime::format_duration(timeout)
                    )));
                }
            }
            None => {
                child.wait()?;
            }
        }
        Ok(())
    }

    fn command(&self) -> std::process::Command {
        let mut cmd = std::process::Command::new(self.shell);
        // The outer shell merges its streams, then a fresh `sh` reads the
        // script from stdin with stderr already folded into stdout.
        cmd.arg("-c").arg("exec 2>&1; sh");
        cmd.env_clear().envs(self.env.iter());
        cmd.current_dir(self.cwd);
        cmd
    }
}

fn fresh_salt() -> String {
    let nonce: u64 = rand::thread_rng().gen();
    format!("QUIZZIG{nonce:016x}")
}

fn build_script(commands: &[TestCommand<'_>], salt: Option<&str>) -> Vec<u8> {
    let mut script = Vec::new();
    for (index, command) in commands.iter().enumerate() {
        for line in &command.command_lines {
            script.extend_from_slice(line);
            script.push(b'\n');
        }
        if let Some(salt) = salt {
            // `env printf` sidesteps aliased builtins.  The leading newline
            // terminates unterminated output; the scan strips it back off.
            script.extend_from_slice(
                format!(
                    "__quizzig_status=$?; env printf '\\n%s %d %d\\n' {salt} {index} \"$__quizzig_status\"\n"
                )
                .as_bytes(),
            );
        }
    }
    script
}

fn feed_stdin(child: &mut std::process::Child, script: &[u8]) {
    let mut stdin = child.stdin.take().expect("stdin was piped");
    // A shell that exits early closes the pipe mid-write; that is not an
    // error, the missing markers already tell the story.
    let _ = stdin.write_all(script);
    drop(stdin);
}

/// Streaming scan of the session's merged output.
///
/// Non-marker lines accumulate into the running buffer; each well-formed
/// marker closes out the command it names.  The scan keeps draining past the
/// size cap so the child never blocks on a full pipe.
fn demultiplex<R: Read>(
    mut reader: R,
    salt: &str,
    count: usize,
) -> crate::Result<Vec<CommandResult>> {
    let mut results = vec![CommandResult::default(); count];
    let mut pending = Vec::new();
    let mut chunk = [0u8; 8192];
    let mut carry: Vec<u8> = Vec::new();
    let mut captured = 0usize;

    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if captured >= MAX_OUTPUT {
            // Keep draining, stop accumulating
            continue;
        }
        let take = read.min(MAX_OUTPUT - captured);
        captured += take;
        carry.extend_from_slice(&chunk[..take]);

        // Process only complete lines; the remainder stays in `carry`
        let consumed = match carry.iter().rposition(|&b| b == b'\n') {
            Some(pos) => pos + 1,
            None => continue,
        };
        for line in LinesWithTerminator::new(&carry[..consumed]) {
            scan_line(line, salt, &mut results, &mut pending);
        }
        carry.drain(..consumed);
    }
    if !carry.is_empty() {
        scan_line(&carry, salt, &mut results, &mut pending);
    }

    Ok(results)
}

fn scan_line(line: &[u8], salt: &str, results: &mut [CommandResult], pending: &mut Vec<u8>) {
    if let Some((index, exit_code)) = parse_marker(line, salt) {
        let mut output = std::mem::take(pending);
        if output.last() == Some(&b'\n') {
            output.pop();
        }
        if let Some(slot) = results.get_mut(index) {
            slot.output = output;
            slot.exit_code = exit_code;
        }
    } else {
        pending.extend_from_slice(line);
    }
}

/// A marker is the salt, a space, the command index, a space, the exit code.
fn parse_marker(line: &[u8], salt: &str) -> Option<(usize, i32)> {
    let rest = line.strip_prefix(salt.as_bytes())?;
    let rest = rest.strip_prefix(b" ".as_slice())?;
    let rest = std::str::from_utf8(rest).ok()?;
    let mut fields = rest.trim_end_matches('\n').splitn(2, ' ');
    let index = fields.next()?.parse::<usize>().ok()?;
    let exit_code = fields.next()?.parse::<i32>().ok()?;
    Some((index, exit_code))
}
