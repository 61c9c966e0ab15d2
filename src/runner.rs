//! Per-file orchestration and run-level reporting
//!
//! Each file goes through the same pipeline: read, parse, build a scratch
//! directory and environment, execute, align.  Failures never abort the
//! batch; the point of a run is to report as many diffs as possible in one
//! invocation.

use std::io::prelude::*;
use std::path::{Path, PathBuf};

use rand::Rng;

use crate::config::{self, Config, TestPaths};
use crate::diff::FileDiff;
use crate::executor::Session;
use crate::macros::eprint;
use crate::macros::eprintln;
use crate::parser::Document;
use crate::report::Palette;

/// Exit code a command returns to opt out of the run.
const SKIP_CODE: i32 = 80;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl Counts {
    pub fn tests(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    fn merge(&mut self, other: &Counts) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FileStatus {
    Passed,
    Skipped,
    Failed,
    Patched,
    Error,
}

impl FileStatus {
    fn progress_char(self) -> char {
        match self {
            Self::Passed => '.',
            Self::Skipped => 's',
            Self::Failed => '!',
            Self::Patched => 'P',
            Self::Error => 'E',
        }
    }

    fn word(self) -> &'static str {
        match self {
            Self::Passed => "passed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Patched => "patched",
            Self::Error => "error",
        }
    }
}

/// Everything one file's evaluation produced.
#[derive(Debug)]
pub struct FileReport {
    pub path: PathBuf,
    pub status: FileStatus,
    pub counts: Counts,
    /// Unified diff for this file's failures; empty when clean
    pub diff: Vec<u8>,
    /// Why commands were skipped, for verbose reporting
    pub skip_reasons: Vec<String>,
    pub error: Option<crate::Error>,
    pub duration: std::time::Duration,
}

impl FileReport {
    fn error(path: &Path, error: crate::Error) -> Self {
        Self {
            path: path.to_owned(),
            status: FileStatus::Error,
            counts: Counts {
                failed: 1,
                ..Counts::default()
            },
            diff: Vec::new(),
            skip_reasons: Vec::new(),
            error: Some(error),
            duration: std::time::Duration::ZERO,
        }
    }
}

/// Evaluate one test file inside `tmp_root`.
pub fn run_file(config: &Config, path: &Path, tmp_root: &Path) -> FileReport {
    let started = std::time::Instant::now();
    let mut report = match evaluate_file(config, path, tmp_root) {
        Ok(report) => report,
        Err(error) => FileReport::error(path, error),
    };
    report.duration = started.elapsed();
    report
}

fn evaluate_file(config: &Config, path: &Path, tmp_root: &Path) -> crate::Result<FileReport> {
    let data = std::fs::read(path).map_err(|e| format!("{}: {}", path.display(), e))?;
    let indent = config.indent_for(path);
    let doc = Document::parse(&data, indent);

    let mut counts = Counts::default();
    let mut skip_reasons = Vec::new();

    if doc.commands.is_empty() {
        counts.skipped = 1;
        skip_reasons.push("(no commands)".to_owned());
        return Ok(FileReport {
            path: path.to_owned(),
            status: FileStatus::Skipped,
            counts,
            diff: Vec::new(),
            skip_reasons,
            error: None,
            duration: std::time::Duration::ZERO,
        });
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "test".to_owned());
    let tmpdir = tmp_root.join(&file_name);
    std::fs::create_dir_all(&tmpdir)
        .map_err(|e| format!("failed to create {}: {}", tmpdir.display(), e))?;

    let test_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let test_dir = std::fs::canonicalize(test_dir)
        .map_err(|e| format!("{}: {}", test_dir.display(), e))?;
    let root_dir = std::env::current_dir()?;

    let paths = TestPaths {
        test_dir,
        test_file: file_name,
        tmpdir: tmpdir.clone(),
        root_dir,
    };
    let env = config::test_environment(config, &paths);

    let session = Session {
        shell: &config.shell,
        env: &env,
        cwd: &tmpdir,
        timeout: config.timeout,
        debug: config.debug,
    };
    let results = session.execute(&doc.commands)?;

    if config.debug {
        // Nothing was captured, so nothing can be compared
        counts.passed = doc.commands.len();
        return Ok(FileReport {
            path: path.to_owned(),
            status: FileStatus::Passed,
            counts,
            diff: Vec::new(),
            skip_reasons,
            error: None,
            duration: std::time::Duration::ZERO,
        });
    }

    let mut diff = FileDiff::new();
    for (command, result) in doc.commands.iter().zip(&results) {
        if result.exit_code == SKIP_CODE {
            counts.skipped += 1;
            let first_line = command.command_lines.first().copied().unwrap_or(b"");
            skip_reasons.push(String::from_utf8_lossy(first_line).into_owned());
            continue;
        }
        if diff.align(command, result, indent) {
            counts.passed += 1;
        } else {
            counts.failed += 1;
        }
    }

    let mut status = if counts.failed > 0 {
        FileStatus::Failed
    } else if counts.passed == 0 && counts.skipped > 0 {
        FileStatus::Skipped
    } else {
        FileStatus::Passed
    };

    let diff_text = diff.unified_diff(&doc, path);
    if status == FileStatus::Failed && config.patch {
        let patched = diff.patched(&data);
        std::fs::write(path, patched)
            .map_err(|e| format!("failed to patch {}: {}", path.display(), e))?;
        status = FileStatus::Patched;
    }

    Ok(FileReport {
        path: path.to_owned(),
        status,
        counts,
        diff: diff_text,
        skip_reasons,
        error: None,
        duration: std::time::Duration::ZERO,
    })
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub counts: Counts,
    pub errors: usize,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.counts.failed == 0
    }
}

/// Run every file in order, reporting progress on stderr and buffered diffs
/// on stdout.
pub fn run(config: &Config, files: &[PathBuf]) -> crate::Result<RunSummary> {
    let palette = Palette::auto();
    let tmp_root = fresh_tmp_root()?;

    let mut summary = RunSummary::default();
    let mut diffs: Vec<u8> = Vec::new();

    for path in files {
        let report = run_file(config, path, &tmp_root);
        summary.counts.merge(&report.counts);

        if let Some(error) = &report.error {
            summary.errors += 1;
            eprintln!("{}", palette.error(format_args!("{error}")));
        }
        if config.verbose {
            let duration =
                std::time::Duration::from_millis(report.duration.as_millis() as u64);
            let outcome = match report.status {
                FileStatus::Passed => palette.info(report.status.word()),
                FileStatus::Skipped => palette.warn(report.status.word()),
                FileStatus::Patched => palette.warn(report.status.word()),
                FileStatus::Failed | FileStatus::Error => palette.error(report.status.word()),
            };
            eprintln!(
                "{}: {} {}",
                report.path.display(),
                outcome,
                palette.hint(humantime::format_duration(duration)),
            );
            for reason in &report.skip_reasons {
                eprintln!("  {}", palette.hint(reason));
            }
        } else {
            eprint!("{}", report.status.progress_char());
        }
        diffs.extend_from_slice(&report.diff);
    }

    if !config.verbose {
        eprintln!();
    }

    if !config.quiet && !diffs.is_empty() {
        let stdout = std::io::stdout();
        let mut stdout = stdout.lock();
        stdout.write_all(&diffs)?;
        stdout.flush()?;
    }

    if config.keep_tmpdir {
        eprintln!(
            "{}",
            palette.hint(format_args!("# Kept temporary directory: {}", tmp_root.display()))
        );
    } else {
        let _ = std::fs::remove_dir_all(&tmp_root);
    }

    eprintln!(
        "# Ran {} tests, {} skipped, {} failed.",
        summary.counts.tests(),
        summary.counts.skipped,
        summary.counts.failed,
    );

    Ok(summary)
}

/// Scratch tree for one run; time plus a fresh nonce keeps concurrent runs
/// apart.
fn fresh_tmp_root() -> crate::Result<PathBuf> {
    let epoch = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    let nonce: u32 = rand::thread_rng().gen();
    let root = std::env::temp_dir().join(format!("cramtests-{epoch}-{nonce:08x}"));
    std::fs::create_dir_all(&root)
        .map_err(|e| format!("failed to create {}: {}", root.display(), e))?;
    Ok(root)
}

#[cfg(test)]
mod test {
    use super::*;

    fn write_test(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn run_one(path: &Path, config: &Config) -> FileReport {
        let tmp = tempfile::tempdir().unwrap();
        run_file(config, path, tmp.path())
    }

    #[test]
    fn passing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(dir.path(), "pass.t", "  $ echo hi\n  hi\n");
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Passed);
        assert_eq!(report.counts.passed, 1);
        assert!(report.diff.is_empty());
    }

    #[test]
    fn failing_file_carries_diff() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(dir.path(), "fail.t", "  $ echo hi\n  bye\n");
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Failed);
        assert_eq!(report.counts.failed, 1);
        let diff = String::from_utf8(report.diff).unwrap();
        assert!(diff.contains("-  bye\n"), "{diff}");
        assert!(diff.contains("+  hi\n"), "{diff}");
    }

    #[test]
    fn no_commands_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(dir.path(), "prose.t", "nothing to run here\n");
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Skipped);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.skip_reasons, vec!["(no commands)".to_owned()]);
    }

    #[test]
    fn skip_code_skips_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(
            dir.path(),
            "skip.t",
            "  $ (exit 80)\n  $ echo ran\n  ran\n",
        );
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Passed);
        assert_eq!(report.counts.skipped, 1);
        assert_eq!(report.counts.passed, 1);
        assert_eq!(report.skip_reasons, vec!["(exit 80)".to_owned()]);
    }

    #[test]
    fn all_skipped_file_reports_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(dir.path(), "skip.t", "  $ (exit 80)\n");
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Skipped);
    }

    #[test]
    fn missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_one(&dir.path().join("absent.t"), &Config::default());
        assert_eq!(report.status, FileStatus::Error);
        assert_eq!(report.counts.failed, 1);
        assert!(report.error.is_some());
    }

    #[test]
    fn patch_mode_rewrites_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(dir.path(), "fix.t", "  $ echo hi\n  bye\n");
        let config = Config {
            patch: true,
            ..Config::default()
        };
        let report = run_one(&path, &config);
        assert_eq!(report.status, FileStatus::Patched);
        assert_eq!(
            std::fs::read(&path).unwrap(),
            b"  $ echo hi\n  hi\n"
        );

        // The rewritten file is clean on a second run
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Passed);
    }

    #[test]
    fn commands_share_session_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(
            dir.path(),
            "state.t",
            "  $ GREETING=hello\n  $ echo $GREETING\n  hello\n",
        );
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Passed);
        assert_eq!(report.counts.passed, 2);
    }

    #[test]
    fn cwd_is_the_scratch_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = write_test(
            dir.path(),
            "cwd.t",
            "  $ touch scratch-file\n  $ ls\n  scratch-file\n",
        );
        let report = run_file(&Config::default(), &path, tmp.path());
        assert_eq!(report.status, FileStatus::Passed);
        // The scratch file landed in the per-file dir, not next to the test
        assert!(tmp.path().join("cwd.t").join("scratch-file").exists());
        assert!(!dir.path().join("scratch-file").exists());
    }

    #[test]
    fn environment_contract_is_visible_to_tests() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_test(
            dir.path(),
            "env.t",
            "  $ echo $QUIZZIG $LANG $TZ\n  1 C GMT\n  $ echo $TESTFILE\n  env.t\n",
        );
        let report = run_one(&path, &Config::default());
        assert_eq!(report.status, FileStatus::Passed, "{:?}", report.error);
    }
}
