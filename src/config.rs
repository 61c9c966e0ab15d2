//! Run configuration and the per-test environment contract

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_SHELL: &str = "/bin/sh";
const DEFAULT_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Resolved settings for one run, after merging the optional config file and
/// the command line (command line wins).
#[derive(Clone, Debug)]
pub struct Config {
    pub shell: PathBuf,
    /// Indent width; `None` means per-file default by extension
    pub indent: Option<usize>,
    pub inherit_env: bool,
    /// `-e VAR=VAL` overrides, applied last
    pub env_overrides: Vec<(String, String)>,
    /// `--bindir` values in flag order; the last one ends up first in PATH
    pub bindirs: Vec<PathBuf>,
    pub keep_tmpdir: bool,
    pub patch: bool,
    pub quiet: bool,
    pub verbose: bool,
    pub debug: bool,
    pub timeout: Option<std::time::Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: PathBuf::from(DEFAULT_SHELL),
            indent: None,
            inherit_env: false,
            env_overrides: Vec::new(),
            bindirs: Vec::new(),
            keep_tmpdir: false,
            patch: false,
            quiet: false,
            verbose: false,
            debug: false,
            timeout: None,
        }
    }
}

impl Config {
    /// The markdown dialect indents by 4, the legacy dialect by 2.
    pub fn indent_for(&self, path: &Path) -> usize {
        self.indent.unwrap_or_else(|| {
            if path.extension() == Some(std::ffi::OsStr::new("md")) {
                4
            } else {
                2
            }
        })
    }

    /// Fold config-file values in under existing command-line choices.
    pub fn merge_file(&mut self, file: FileConfig) {
        if let Some(shell) = file.shell {
            self.shell = shell;
        }
        if self.indent.is_none() {
            self.indent = file.indent;
        }
        if let Some(inherit) = file.inherit_env {
            self.inherit_env = self.inherit_env || inherit;
        }
        // File-sourced overrides sit below `-e` flags
        let mut env: Vec<_> = file.env.into_iter().collect();
        env.extend(std::mem::take(&mut self.env_overrides));
        self.env_overrides = env;
        // ... and file bindirs below `--bindir` flags, keeping last-wins
        let mut bindirs = file.bindir;
        bindirs.extend(std::mem::take(&mut self.bindirs));
        self.bindirs = bindirs;
        if let Some(keep) = file.keep_tmpdir {
            self.keep_tmpdir = self.keep_tmpdir || keep;
        }
        if self.timeout.is_none() {
            self.timeout = file.timeout;
        }
    }
}

/// Optional `.quizzig.toml` in the invocation directory
#[derive(Clone, Default, Debug, PartialEq, Eq, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FileConfig {
    pub shell: Option<PathBuf>,
    pub indent: Option<usize>,
    pub inherit_env: Option<bool>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub bindir: Vec<PathBuf>,
    pub keep_tmpdir: Option<bool>,
    #[serde(default)]
    #[serde(deserialize_with = "humantime_serde::deserialize")]
    pub timeout: Option<std::time::Duration>,
}

impl FileConfig {
    pub const FILE_NAME: &'static str = ".quizzig.toml";

    /// Load the config file next to the invocation directory, if present.
    pub fn discover(dir: &Path) -> crate::Result<Option<Self>> {
        let path = dir.join(Self::FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
        let config = Self::parse_toml(&raw)
            .map_err(|e| format!("failed to parse {}: {}", path.display(), e))?;
        Ok(Some(config))
    }

    fn parse_toml(s: &str) -> crate::Result<Self> {
        toml_edit::de::from_str(s).map_err(|e| e.to_string().into())
    }
}

/// Locations a test needs to know about, all absolute.
#[derive(Clone, Debug)]
pub struct TestPaths {
    /// Directory holding the test file
    pub test_dir: PathBuf,
    /// Basename of the test file
    pub test_file: String,
    /// Per-file temp directory, also the shell's cwd
    pub tmpdir: PathBuf,
    /// Where the tool was invoked
    pub root_dir: PathBuf,
}

/// Assemble the environment one shell session runs under.
pub fn test_environment(config: &Config, paths: &TestPaths) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = BTreeMap::new();
    if config.inherit_env {
        env.extend(std::env::vars());
    }

    let base_path = if config.inherit_env {
        env.get("PATH").cloned().unwrap_or_default()
    } else {
        DEFAULT_PATH.to_owned()
    };
    let mut path = String::new();
    // Last `--bindir` flag wins the front of PATH
    for dir in config.bindirs.iter().rev() {
        path.push_str(&dir.to_string_lossy());
        path.push(':');
    }
    path.push_str(&base_path);
    env.insert("PATH".to_owned(), path);

    for (key, value) in [
        ("LANG", "C"),
        ("LC_ALL", "C"),
        ("LANGUAGE", "C"),
        ("TZ", "GMT"),
        ("CDPATH", ""),
        ("COLUMNS", "80"),
        ("GREP_OPTIONS", ""),
        ("QUIZZIG", "1"),
    ] {
        env.insert(key.to_owned(), value.to_owned());
    }

    let tmpdir = paths.tmpdir.to_string_lossy().into_owned();
    for key in ["TMPDIR", "TEMP", "TMP", "HOME", "CRAMTMP"] {
        env.insert(key.to_owned(), tmpdir.clone());
    }

    env.insert(
        "TESTDIR".to_owned(),
        paths.test_dir.to_string_lossy().into_owned(),
    );
    env.insert("TESTFILE".to_owned(), paths.test_file.clone());
    env.insert(
        "TESTSHELL".to_owned(),
        config.shell.to_string_lossy().into_owned(),
    );
    env.insert(
        "ROOTDIR".to_owned(),
        paths.root_dir.to_string_lossy().into_owned(),
    );

    for (key, value) in &config.env_overrides {
        env.insert(key.clone(), value.clone());
    }

    env
}

#[cfg(test)]
mod test {
    use super::*;

    fn paths() -> TestPaths {
        TestPaths {
            test_dir: PathBuf::from("/work/tests"),
            test_file: "sample.t".to_owned(),
            tmpdir: PathBuf::from("/tmp/run/sample.t"),
            root_dir: PathBuf::from("/work"),
        }
    }

    #[test]
    fn default_environment() {
        let env = test_environment(&Config::default(), &paths());
        assert_eq!(env["PATH"], "/usr/local/bin:/usr/bin:/bin");
        assert_eq!(env["LANG"], "C");
        assert_eq!(env["TZ"], "GMT");
        assert_eq!(env["COLUMNS"], "80");
        assert_eq!(env["QUIZZIG"], "1");
        assert_eq!(env["HOME"], "/tmp/run/sample.t");
        assert_eq!(env["TMPDIR"], "/tmp/run/sample.t");
        assert_eq!(env["CRAMTMP"], "/tmp/run/sample.t");
        assert_eq!(env["TESTDIR"], "/work/tests");
        assert_eq!(env["TESTFILE"], "sample.t");
        assert_eq!(env["TESTSHELL"], "/bin/sh");
        assert_eq!(env["ROOTDIR"], "/work");
    }

    #[test]
    fn last_bindir_flag_wins() {
        let config = Config {
            bindirs: vec![PathBuf::from("/first"), PathBuf::from("/second")],
            ..Config::default()
        };
        let env = test_environment(&config, &paths());
        assert_eq!(env["PATH"], "/second:/first:/usr/local/bin:/usr/bin:/bin");
    }

    #[test]
    fn env_overrides_apply_last() {
        let config = Config {
            env_overrides: vec![
                ("LANG".to_owned(), "en_US.UTF-8".to_owned()),
                ("EXTRA".to_owned(), "1".to_owned()),
            ],
            ..Config::default()
        };
        let env = test_environment(&config, &paths());
        assert_eq!(env["LANG"], "en_US.UTF-8");
        assert_eq!(env["EXTRA"], "1");
    }

    #[test]
    fn inherited_path_is_the_base() {
        let config = Config {
            inherit_env: true,
            bindirs: vec![PathBuf::from("/extra")],
            ..Config::default()
        };
        let env = test_environment(&config, &paths());
        let parent_path = std::env::var("PATH").unwrap_or_default();
        assert_eq!(env["PATH"], format!("/extra:{parent_path}"));
        // Normalization still beats the inherited values
        assert_eq!(env["LANG"], "C");
    }

    #[test]
    fn indent_defaults_by_extension() {
        let config = Config::default();
        assert_eq!(config.indent_for(Path::new("a.t")), 2);
        assert_eq!(config.indent_for(Path::new("a.md")), 4);
        let forced = Config {
            indent: Some(8),
            ..Config::default()
        };
        assert_eq!(forced.indent_for(Path::new("a.md")), 8);
    }

    #[test]
    fn parse_toml_minimal() {
        let expected = FileConfig::default();
        let actual = FileConfig::parse_toml("").unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn parse_toml_full() {
        let actual = FileConfig::parse_toml(
            r#"
shell = "/bin/bash"
indent = 4
inherit-env = true
keep-tmpdir = true
timeout = "30s"
bindir = ["/opt/bin"]

[env]
KEY = "value"
"#,
        )
        .unwrap();
        assert_eq!(actual.shell.as_deref(), Some(Path::new("/bin/bash")));
        assert_eq!(actual.indent, Some(4));
        assert_eq!(actual.inherit_env, Some(true));
        assert_eq!(actual.keep_tmpdir, Some(true));
        assert_eq!(actual.timeout, Some(std::time::Duration::from_secs(30)));
        assert_eq!(actual.bindir, vec![PathBuf::from("/opt/bin")]);
        assert_eq!(actual.env["KEY"], "value");
    }

    #[test]
    fn parse_toml_rejects_bad_timeout() {
        assert!(FileConfig::parse_toml("timeout = \"not a duration\"").is_err());
    }

    #[test]
    fn merge_file_respects_flag_priority() {
        let mut config = Config {
            indent: Some(2),
            env_overrides: vec![("KEY".to_owned(), "flag".to_owned())],
            bindirs: vec![PathBuf::from("/flag")],
            ..Config::default()
        };
        config.merge_file(FileConfig {
            shell: Some(PathBuf::from("/bin/bash")),
            indent: Some(4),
            env: [("KEY".to_owned(), "file".to_owned())].into_iter().collect(),
            bindir: vec![PathBuf::from("/file")],
            ..FileConfig::default()
        });
        assert_eq!(config.shell, PathBuf::from("/bin/bash"));
        assert_eq!(config.indent, Some(2));
        // Flag-sourced values land after file-sourced ones, so they win
        assert_eq!(
            config.env_overrides,
            vec![
                ("KEY".to_owned(), "file".to_owned()),
                ("KEY".to_owned(), "flag".to_owned()),
            ]
        );
        assert_eq!(
            config.bindirs,
            vec![PathBuf::from("/file"), PathBuf::from("/flag")]
        );
    }
}
