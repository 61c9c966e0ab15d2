//! # Functional testing for command-line applications
//!
//! `quizzig` replays shell sessions recorded in plain documents.  A test
//! file is prose interleaved with indented blocks that look like a terminal
//! transcript:
//!
//! ```text
//! The date command prints a date:
//!
//!   $ date +%Y-%m-%d
//!   \d{4}-\d{2}-\d{2} (re)
//!   $ echo done
//!   done
//! ```
//!
//! Every command of a file runs in one shell session, in order, so state
//! carries forward.  Actual output is compared line by line against the
//! expected block; expected lines may opt into pattern dialects with a
//! trailing annotation:
//!
//! - ` (re)`: anchored regular expression
//! - ` (glob)`: `*`, `?` and backslash escapes
//! - ` (esc)`: `\t`, `\r`, `\n`, `\\` and `\xNN` byte escapes
//! - ` (no-eol)`: the line was printed without a trailing newline
//!
//! A command that exits with code 80 is counted as skipped rather than
//! passed or failed.  Non-zero exit codes are recorded as a trailing
//! `[code]` line.
//!
//! Mismatches are reported as a unified diff that `patch -p0` accepts, so a
//! failing run can be piped straight back onto the test file; `--patch` does
//! the same rewrite in place.
//!
//! Two dialects are recognized by indent: 2 spaces for `.t` files, 4 spaces
//! for `.md` files, so test documents can double as rendered documentation.

mod config;
mod diff;
mod error;
mod executor;
mod lines;
pub mod macros;
mod parser;
mod report;
mod runner;

pub mod matcher;

pub use config::Config;
pub use config::FileConfig;
pub use config::TestPaths;
pub use diff::FileDiff;
pub use error::Error;
pub use error::Result;
pub use executor::CommandResult;
pub use executor::Session;
pub use parser::Document;
pub use parser::ExpectedLine;
pub use parser::TestCommand;
pub use report::Palette;
pub use runner::run;
pub use runner::run_file;
pub use runner::Counts;
pub use runner::FileReport;
pub use runner::FileStatus;
pub use runner::RunSummary;
