use std::path::PathBuf;

use clap::{builder::styling, Parser};

use quizzig::macros::eprintln;
use quizzig::Palette;

const SHORT_DESCRIPTION: &str = "Functional testing for command-line applications";

const LONG_DESCRIPTION: &str = "
quizzig runs the shell sessions recorded in test files and reports every
difference between recorded and actual output as a unified diff.

Test files are prose with indented `$ `-prefixed command blocks: 2-space
indent for `.t` files, 4-space indent for `.md` files.
";

/// Parsed command-line arguments.
#[derive(Parser)]
#[clap(name = "quizzig",
       version,
       about = SHORT_DESCRIPTION,
       long_about = LONG_DESCRIPTION,
       styles = help_styles())]
struct CommandLineArgs {
    /// Don't print diffs; progress and counts are still reported.
    #[clap(short = 'q', long = "quiet")]
    quiet: bool,

    /// Print one line per test file instead of progress characters.
    #[clap(short = 'v', long = "verbose")]
    verbose: bool,

    /// Write shell output straight to the terminal without comparing it.
    #[clap(short = 'd', long = "debug")]
    debug: bool,

    /// Rewrite failing test files in place with the actual output.
    #[clap(short = 'i', long = "patch")]
    patch: bool,

    /// Shell to run test commands under.
    #[clap(long = "shell", value_name = "PATH")]
    shell: Option<PathBuf>,

    /// Indent width of command blocks; defaults per file extension.
    #[clap(long = "indent", value_name = "N")]
    indent: Option<usize>,

    /// Use the parent environment as the base instead of a clean one.
    #[clap(short = 'E', long = "inherit-env")]
    inherit_env: bool,

    /// Set an environment variable for tests; applied after everything else.
    #[clap(short = 'e', long = "env", value_name = "VAR=VAL")]
    env: Vec<String>,

    /// Prepend a directory to the tests' PATH; the last flag wins the front.
    #[clap(long = "bindir", value_name = "DIR")]
    bindir: Vec<PathBuf>,

    /// Keep the temporary directory tree around after the run.
    #[clap(long = "keep-tmpdir")]
    keep_tmpdir: bool,

    /// Kill a test file's shell session after this long (e.g. "30s").
    #[clap(long = "timeout", value_name = "DURATION", value_parser = humantime::parse_duration)]
    timeout: Option<std::time::Duration>,

    /// Test files, or directories to scan for `.t` and `.md` files.
    #[clap(value_name = "PATH", required = true)]
    paths: Vec<PathBuf>,
}

impl CommandLineArgs {
    fn into_config(self) -> Result<(quizzig::Config, Vec<PathBuf>), quizzig::Error> {
        let mut env_overrides = Vec::new();
        for entry in &self.env {
            let Some((key, value)) = entry.split_once('=') else {
                return Err(format!("--env takes VAR=VAL, got `{entry}`").into());
            };
            env_overrides.push((key.to_owned(), value.to_owned()));
        }

        let mut config = quizzig::Config {
            indent: self.indent,
            inherit_env: self.inherit_env,
            env_overrides,
            bindirs: self.bindir,
            keep_tmpdir: self.keep_tmpdir,
            patch: self.patch,
            quiet: self.quiet,
            verbose: self.verbose,
            debug: self.debug,
            timeout: self.timeout,
            ..quizzig::Config::default()
        };
        if let Some(shell) = self.shell {
            config.shell = shell;
        }

        let cwd = std::env::current_dir()?;
        if let Some(file_config) = quizzig::FileConfig::discover(&cwd)? {
            config.merge_file(file_config);
        }

        Ok((config, self.paths))
    }
}

/// Expand directory arguments into the test files they contain.
///
/// Files given directly are taken as-is; directories are walked for the two
/// recognized suffixes.  Discovery order is stable: sorted within each
/// argument, arguments in the order given.
fn collect_files(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>, quizzig::Error> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let found = walkdir::WalkDir::new(&path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|p| is_test_file(p));
            files.extend(found);
        } else {
            files.push(path);
        }
    }
    if files.is_empty() {
        return Err("no test files found".into());
    }
    Ok(files)
}

fn is_test_file(path: &std::path::Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("t") | Some("md")
    )
}

fn main() -> std::process::ExitCode {
    let args = CommandLineArgs::parse();
    match run(args) {
        Ok(summary) if summary.success() => std::process::ExitCode::SUCCESS,
        Ok(_) => std::process::ExitCode::FAILURE,
        Err(error) => {
            let palette = Palette::auto();
            eprintln!("{}", palette.error(format_args!("{error}")));
            std::process::ExitCode::FAILURE
        }
    }
}

fn run(args: CommandLineArgs) -> Result<quizzig::RunSummary, quizzig::Error> {
    let (config, paths) = args.into_config()?;
    let files = collect_files(paths)?;
    quizzig::run(&config, &files)
}

fn help_styles() -> clap::builder::Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Yellow.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(styling::AnsiColor::Magenta.on_default() | styling::Effects::BOLD)
        .placeholder(styling::AnsiColor::Cyan.on_default())
}
