//! Error types for the core components.
//!
//! Each leaf error is a small `Fail` type with a `#[fail(display = ...)]`
//! message; call sites convert them into `failure::Error` with `?` and the
//! top level decides what's fatal and what's a warning (see `crate::run`).

use std::path::PathBuf;

use failure::Fail;

/// Errors that can occur while loading or rewriting the configuration file.
#[derive(Debug, Fail)]
pub enum ConfigError {
    #[fail(display = "missing configuration file: {}", _0)]
    Missing(PathBuf),

    #[fail(display = "could not read configuration file {}: {}", path, source)]
    Read {
        path: PathBuf,
        #[cause]
        source: std::io::Error,
    },

    #[fail(display = "could not write configuration file {}: {}", path, source)]
    Write {
        path: PathBuf,
        #[cause]
        source: std::io::Error,
    },

    #[fail(display = "duplicate suffix {} for key {} at line {}", suffix, key, line)]
    DuplicateSuffix {
        key: String,
        suffix: u32,
        line: usize,
    },

    #[fail(display = "unknown mail mode: {}", _0)]
    UnknownMailMode(String),

    #[fail(display = "could not find inherited config '{}' in any search path", _0)]
    InheritNotFound(String),

    #[fail(display = "invalid value for {} on line {}: {}", key, line, value)]
    InvalidValue {
        key: String,
        line: usize,
        value: String,
    },
}

/// Errors raised while compiling a `log_line_prefix` format string into matchers.
#[derive(Debug, Fail)]
pub enum PrefixError {
    #[fail(display = "unknown format specifier '%{}' in log_line_prefix", _0)]
    UnknownSpecifier(char),

    #[fail(display = "failed to compile generated regex: {}", source)]
    Regex {
        #[cause]
        source: regex::Error,
    },
}

impl From<regex::Error> for PrefixError {
    fn from(source: regex::Error) -> Self {
        PrefixError::Regex { source }
    }
}

/// Errors for a single file entry; these are recoverable at the run level -
/// the run logs a warning and moves on to the next entry.
#[derive(Debug, Fail)]
pub enum FileError {
    #[fail(display = "{} does not exist or is not a regular file", path.display())]
    NotRegular { path: PathBuf },

    #[fail(display = "could not open {}: {}", path.display(), source)]
    Open {
        path: PathBuf,
        #[cause]
        source: std::io::Error,
    },

    #[fail(display = "could not read {}: {}", path.display(), source)]
    Read {
        path: PathBuf,
        #[cause]
        source: std::io::Error,
    },
}

/// Errors from the outbound mail transport.
#[derive(Debug, Fail)]
pub enum MailError {
    #[fail(display = "sendmail exited with status {:?}", _0)]
    SendmailStatus(Option<i32>),

    #[fail(display = "could not invoke sendmail transport: {}", source)]
    Spawn {
        #[cause]
        source: std::io::Error,
    },

    #[fail(display = "no recipients configured")]
    NoRecipients,
}

/// Errors surfaced by the CSV log backend.
#[derive(Debug, Fail)]
#[fail(display = "CSV backend unavailable: {}", _0)]
pub struct CsvBackendError(pub String);

/// Errors raised while parsing `--log-module` arguments.
#[derive(Debug, Fail)]
pub enum LogError {
    #[fail(display = "expected target=level in --log-module argument {:?}", _0)]
    MissingEquals(String),

    #[fail(display = "unknown log level {:?} in --log-module argument", _0)]
    UnknownLevel(String),
}
