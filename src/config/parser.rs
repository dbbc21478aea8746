//! Line-oriented config file parser with comment-preserving rewrite
//! support.
//!
//! The file is `key: value` or `key[suffix]: value`, one per line, with `#`
//! comments starting at column 0. We keep every physical line (comment,
//! blank, or entry) in original order in a [`ConfigDocument`] so that a
//! later rewrite only touches the value portion of the lines that actually
//! changed; everything else, comments included, round-trips byte-for-byte.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{Config, FileEntry, MailConfig, ReportType, SortBy};
use crate::error::ConfigError;

/// One physical line of the config file, classified for rewrite purposes.
#[derive(Clone, Debug)]
pub enum RawLine {
    Comment(String),
    Blank,
    /// `key_prefix` is the literal text up to and including the separating
    /// colon and any inter-token whitespace, so rewriting is
    /// `key_prefix + new_value`.
    Entry {
        key_prefix: String,
        key: String,
        suffix: Option<u32>,
        value: String,
    },
}

/// A parsed config file plus enough of its original text to rewrite it
/// later without disturbing comments or entries we didn't touch.
#[derive(Clone, Debug, Default)]
pub struct ConfigDocument {
    pub lines: Vec<RawLine>,
}

fn split_key_suffix(key: &str) -> (String, Option<u32>) {
    if let Some(open) = key.find('[') {
        if key.ends_with(']') {
            let base = key[..open].to_string();
            let inner = &key[open + 1..key.len() - 1];
            if let Ok(n) = inner.parse::<u32>() {
                return (base.to_ascii_uppercase(), Some(n));
            }
        }
    }
    (key.to_ascii_uppercase(), None)
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim_end_matches(['\r', '\n']);
    if trimmed.len() >= 2 {
        let bytes = trimmed.as_bytes();
        if (bytes[0] == b'"' && bytes[trimmed.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[trimmed.len() - 1] == b'\'')
        {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.trim().to_string()
}

fn parse_line(line: &str) -> RawLine {
    let trimmed_start = line.trim_start();
    if trimmed_start.starts_with('#') {
        return RawLine::Comment(line.to_string());
    }
    if trimmed_start.is_empty() {
        return RawLine::Blank;
    }
    match line.find(':') {
        Some(idx) => {
            let key_raw = line[..idx].trim();
            let (key, suffix) = split_key_suffix(key_raw);
            let after_colon = &line[idx + 1..];
            let value_start = after_colon.len() - after_colon.trim_start().len();
            let key_prefix = format!("{}{}", &line[..idx + 1], &after_colon[..value_start]);
            let value = unquote(after_colon.trim_start());
            RawLine::Entry {
                key_prefix,
                key,
                suffix,
                value,
            }
        }
        None => RawLine::Comment(line.to_string()),
    }
}

/// Parse a config file's text into both the semantic [`Config`] and a
/// [`ConfigDocument`] suitable for a later comment-preserving rewrite.
pub fn parse(path: &Path, text: &str) -> Result<(Config, ConfigDocument), ConfigError> {
    let mut cfg = Config::new(path.to_path_buf());
    let mut doc = ConfigDocument::default();
    let mut seen_scalar: HashSet<String> = HashSet::new();
    let mut files_by_suffix: std::collections::BTreeMap<u32, FileEntry> =
        std::collections::BTreeMap::new();

    for (lineno, raw) in text.lines().enumerate() {
        let parsed = parse_line(raw);
        if let RawLine::Entry {
            key, suffix, value, ..
        } = &parsed
        {
            apply_entry(
                &mut cfg,
                &mut files_by_suffix,
                &mut seen_scalar,
                key,
                *suffix,
                value,
                lineno + 1,
            )?;
        }
        doc.lines.push(parsed);
    }

    cfg.files = files_by_suffix.into_iter().map(|(_, v)| v).collect();
    Ok((cfg, doc))
}

fn apply_entry(
    cfg: &mut Config,
    files: &mut std::collections::BTreeMap<u32, FileEntry>,
    seen_scalar: &mut HashSet<String>,
    key: &str,
    suffix: Option<u32>,
    value: &str,
    lineno: usize,
) -> Result<(), ConfigError> {
    match key {
        "FILE" => {
            let s = suffix.unwrap_or(0);
            files.entry(s).or_insert_with(|| FileEntry::new(s, "")).template = value.to_string();
        }
        "LASTFILE" => {
            let s = suffix.unwrap_or(0);
            files.entry(s).or_insert_with(|| FileEntry::new(s, "")).last_path = value.to_string();
        }
        "OFFSET" => {
            let s = suffix.unwrap_or(0);
            let offset: u64 = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "OFFSET".into(),
                line: lineno,
                value: value.into(),
            })?;
            files.entry(s).or_insert_with(|| FileEntry::new(s, "")).offset = offset;
        }
        "EMAIL" => cfg.mail.email.push(value.to_string()),
        "FROM" => set_scalar(seen_scalar, "FROM", lineno, || cfg.mail.from = Some(value.into())),
        "MAILSUBJECT" => set_scalar(seen_scalar, "MAILSUBJECT", lineno, || {
            cfg.mail.subject = Some(value.into())
        }),
        "MAILSIG" => set_scalar(seen_scalar, "MAILSIG", lineno, || {
            cfg.mail.mailsig = Some(value.into())
        }),
        "MAILZERO" => set_scalar(seen_scalar, "MAILZERO", lineno, || {
            cfg.mail.mailzero = value == "1"
        }),
        "TYPE" => {
            cfg.report_type = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "TYPE".into(),
                line: lineno,
                value: value.into(),
            })?;
        }
        "SORTBY" => {
            cfg.sortby = match value.to_ascii_lowercase().as_str() {
                "count" => SortBy::Count,
                "date" => SortBy::Date,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "SORTBY".into(),
                        line: lineno,
                        value: value.into(),
                    })
                }
            };
        }
        "DURATION" => cfg.duration = Some(parse_u64(value, "DURATION", lineno)?),
        "DURATION_LIMIT" => {
            cfg.duration_limit = Some(parse_u64(value, "DURATION_LIMIT", lineno)? as usize)
        }
        "TEMPFILE" => cfg.tempfile = Some(parse_u64(value, "TEMPFILE", lineno)?),
        "TEMPFILE_LIMIT" => {
            cfg.tempfile_limit = Some(parse_u64(value, "TEMPFILE_LIMIT", lineno)? as usize)
        }
        "LOG_LINE_PREFIX" => cfg.log_line_prefix = value.to_string(),
        "FIND_LINE_NUMBER" => cfg.find_line_number = value == "1",
        "MAXSIZE" => cfg.maxsize = parse_u64(value, "MAXSIZE", lineno)?,
        "STATEMENT_SIZE" => cfg.statement_size = Some(parse_u64(value, "STATEMENT_SIZE", lineno)? as usize),
        "INCLUDE" => cfg.filters.include.push(value.to_string()),
        "EXCLUDE" => cfg.filters.exclude.push(value.to_string()),
        "EXCLUDE_PREFIX" => cfg.filters.exclude_prefix.push(value.to_string()),
        "EXCLUDE_NON_PARSED" => cfg.filters.exclude_non_parsed.push(value.to_string()),
        "INHERIT" => cfg.inherit.push(value.to_string()),
        _ => {
            log::warn!("unknown configuration key '{}' on line {}, ignored", key, lineno);
        }
    }
    Ok(())
}

fn set_scalar(seen: &mut HashSet<String>, key: &str, lineno: usize, mut apply: impl FnMut()) {
    if seen.contains(key) {
        log::warn!("duplicate key '{}' on line {} ignored", key, lineno);
        return;
    }
    seen.insert(key.to_string());
    apply();
}

fn parse_u64(value: &str, key: &str, lineno: usize) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.into(),
        line: lineno,
        value: value.into(),
    })
}

/// Read and parse a config file from disk.
pub fn load(path: &Path) -> Result<(Config, ConfigDocument), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::Missing(path.to_path_buf()));
    }
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &text)
}

/// Search paths used to resolve `INHERIT: name`, in order.
pub fn inherit_search_paths(name: &str, config_dir: &Path, binary_dir: &Path) -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from(name),
        Path::new("tnm").join(name),
        binary_dir.join(name),
        binary_dir.join("tnm").join(name),
        config_dir.join(name),
    ];
    if let Some(home) = dirs_home() {
        paths.push(home.join("tnm").join(name));
    }
    paths
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scalars_and_repeatables() {
        let text = "\
# a comment about email
EMAIL: a@example.com
EMAIL: b@example.com
TYPE: duration
DURATION: 200
FILE[1]: /var/log/pg.log
LASTFILE[1]: /var/log/pg.log
OFFSET[1]: 1234
";
        let (cfg, doc) = parse(Path::new("t.conf"), text).unwrap();
        assert_eq!(cfg.mail.email, vec!["a@example.com", "b@example.com"]);
        assert_eq!(cfg.report_type, ReportType::Duration);
        assert_eq!(cfg.duration, Some(200));
        assert_eq!(cfg.files.len(), 1);
        assert_eq!(cfg.files[0].offset, 1234);
        assert!(matches!(doc.lines[0], RawLine::Comment(_)));
    }

    #[test]
    fn quoted_value_preserves_whitespace() {
        let text = "MAILSUBJECT: \"  spaced out  \"\n";
        let (cfg, _doc) = parse(Path::new("t.conf"), text).unwrap();
        assert_eq!(cfg.mail.subject.unwrap(), "  spaced out  ");
    }

    #[test]
    fn duplicate_scalar_keeps_first() {
        let text = "FROM: first@example.com\nFROM: second@example.com\n";
        let (cfg, _doc) = parse(Path::new("t.conf"), text).unwrap();
        assert_eq!(cfg.mail.from.unwrap(), "first@example.com");
    }
}
