//! Configuration Model: the in-memory representation of a parsed
//! config file plus the global run parameters it carries.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// How clusters are reported for this run.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Normal,
    Duration,
    Tempfile,
}

impl Default for ReportType {
    fn default() -> Self {
        ReportType::Normal
    }
}

impl std::str::FromStr for ReportType {
    type Err = crate::error::ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" => Ok(ReportType::Normal),
            "duration" => Ok(ReportType::Duration),
            "tempfile" => Ok(ReportType::Tempfile),
            other => Err(crate::error::ConfigError::InvalidValue {
                key: "TYPE".into(),
                line: 0,
                value: other.into(),
            }),
        }
    }
}

/// Sort order for the normal report type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortBy {
    Count,
    Date,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::Date
    }
}

/// One `FILE[N]` entry: a file template the resolver expands, plus the
/// persisted resume position from the previous run.
///
/// Invariant: at most one entry per `suffix`; a freshly-added entry carries
/// `suffix == 0`, a placeholder that `Config::renumber` reassigns to the
/// lowest unused positive integer before rewrite.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FileEntry {
    pub suffix: u32,
    pub template: String,
    pub last_path: String,
    pub offset: u64,
    /// Set by the reader once a run has scanned this entry; compared against
    /// `last_path` by offset persistence to decide if a rewrite is due.
    pub latest_path: Option<String>,
    pub latest_offset: Option<u64>,
    /// True when this entry came from an `INHERIT`ed config and must not be
    /// rewritten into the including file.
    pub inherited: bool,
}

impl FileEntry {
    pub fn new(suffix: u32, template: impl Into<String>) -> Self {
        FileEntry {
            suffix,
            template: template.into(),
            last_path: String::new(),
            offset: 0,
            latest_path: None,
            latest_offset: None,
            inherited: false,
        }
    }
}

/// Compiled-once-per-run regex alternations for one file entry's filters.
///
/// An empty `Vec` means "no filter of this kind".
#[derive(Clone, Debug, Default)]
pub struct FilterPatterns {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub exclude_prefix: Vec<String>,
    pub exclude_non_parsed: Vec<String>,
}

/// Mail-related settings.
#[derive(Clone, Debug, Default)]
pub struct MailConfig {
    pub email: Vec<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub mailzero: bool,
    pub mailsig: Option<String>,
}

/// The full in-memory configuration for one run: the ordered file entries
/// plus the global settings that apply to all of them.
#[derive(Clone, Debug, Default)]
pub struct Config {
    pub path: PathBuf,
    pub files: Vec<FileEntry>,
    pub filters: FilterPatterns,
    pub mail: MailConfig,
    pub report_type: ReportType,
    pub sortby: SortBy,
    pub duration: Option<u64>,
    pub duration_limit: Option<usize>,
    pub tempfile: Option<u64>,
    pub tempfile_limit: Option<usize>,
    pub log_line_prefix: String,
    pub find_line_number: bool,
    pub maxsize: u64,
    pub maxemailsize: u64,
    pub statement_size: Option<usize>,
    pub inherit: Vec<String>,
}

pub const DEFAULT_MAXSIZE: u64 = 80 * 1024 * 1024;
pub const DEFAULT_MAXEMAILSIZE: u64 = 10 * 1024 * 1024;
pub const DEFAULT_LOG_LINE_PREFIX: &str = "%t [%p]";

impl Config {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Config {
            path: path.into(),
            maxsize: DEFAULT_MAXSIZE,
            maxemailsize: DEFAULT_MAXEMAILSIZE,
            log_line_prefix: DEFAULT_LOG_LINE_PREFIX.into(),
            ..Default::default()
        }
    }

    /// Reassign suffix 0 placeholders to the lowest unused positive integer,
    /// and reject genuine duplicates among already-numbered entries.
    pub fn renumber(&mut self) -> Result<(), crate::error::ConfigError> {
        use std::collections::HashSet;
        let mut used: HashSet<u32> = self
            .files
            .iter()
            .map(|f| f.suffix)
            .filter(|&s| s != 0)
            .collect();
        if used.len() != self.files.iter().filter(|f| f.suffix != 0).count() {
            return Err(crate::error::ConfigError::DuplicateSuffix {
                key: "FILE".into(),
                suffix: 0,
                line: 0,
            });
        }
        let mut next = 1;
        for entry in self.files.iter_mut().filter(|f| f.suffix == 0) {
            while used.contains(&next) {
                next += 1;
            }
            entry.suffix = next;
            used.insert(next);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renumber_assigns_lowest_free_slot() {
        let mut cfg = Config::new("x.conf");
        cfg.files.push(FileEntry::new(2, "a"));
        cfg.files.push(FileEntry::new(0, "b"));
        cfg.files.push(FileEntry::new(0, "c"));
        cfg.renumber().unwrap();
        let suffixes: Vec<u32> = cfg.files.iter().map(|f| f.suffix).collect();
        assert_eq!(suffixes, vec![2, 1, 3]);
    }

    #[test]
    fn renumber_rejects_true_duplicates() {
        let mut cfg = Config::new("x.conf");
        cfg.files.push(FileEntry::new(1, "a"));
        cfg.files.push(FileEntry::new(1, "b"));
        assert!(cfg.renumber().is_err());
    }
}
