//! RC file loading: process-wide defaults read from
//! `./.tailnmailrc`, `$HOME/.tailnmailrc`, `/etc/tailnmailrc`, in that
//! order, each layer overriding the previous. A bare `disable: 1` anywhere
//! causes the caller to exit immediately and silently.

use std::path::{Path, PathBuf};

use crate::config::model::{Config, ReportType};
use crate::config::parser::parse;
use crate::error::ConfigError;

pub const RC_FILENAME: &str = ".tailnmailrc";

pub fn rc_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(RC_FILENAME)];
    if let Some(home) = std::env::var_os("HOME") {
        paths.push(Path::new(&home).join(RC_FILENAME));
    }
    paths.push(PathBuf::from("/etc/tailnmailrc"));
    paths
}

/// Load and merge every RC file that exists, in search order (later files
/// override earlier ones for scalar fields). Returns `None` if any layer
/// requests `disable: 1`.
pub fn load_rc_defaults() -> Result<Option<Config>, ConfigError> {
    let mut merged: Option<Config> = None;
    for path in rc_search_paths() {
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        if text.lines().any(|l| l.trim() == "disable: 1") {
            return Ok(None);
        }
        let (layer, _doc) = parse(&path, &text)?;
        merged = Some(match merged {
            None => layer,
            Some(base) => merge(base, layer),
        });
    }
    Ok(merged)
}

/// Merge RC defaults `base` with a later, higher-priority layer `over`.
fn merge(base: Config, over: Config) -> Config {
    Config {
        path: over.path,
        files: if over.files.is_empty() { base.files } else { over.files },
        filters: if over.filters.include.is_empty()
            && over.filters.exclude.is_empty()
            && over.filters.exclude_prefix.is_empty()
            && over.filters.exclude_non_parsed.is_empty()
        {
            base.filters
        } else {
            over.filters
        },
        mail: crate::config::model::MailConfig {
            email: if over.mail.email.is_empty() { base.mail.email } else { over.mail.email },
            from: over.mail.from.or(base.mail.from),
            subject: over.mail.subject.or(base.mail.subject),
            mailzero: over.mail.mailzero || base.mail.mailzero,
            mailsig: over.mail.mailsig.or(base.mail.mailsig),
        },
        report_type: over.report_type,
        sortby: over.sortby,
        duration: over.duration.or(base.duration),
        duration_limit: over.duration_limit.or(base.duration_limit),
        tempfile: over.tempfile.or(base.tempfile),
        tempfile_limit: over.tempfile_limit.or(base.tempfile_limit),
        log_line_prefix: over.log_line_prefix,
        find_line_number: over.find_line_number || base.find_line_number,
        maxsize: over.maxsize,
        maxemailsize: over.maxemailsize,
        statement_size: over.statement_size.or(base.statement_size),
        inherit: if over.inherit.is_empty() { base.inherit } else { over.inherit },
    }
}

/// Apply RC defaults under an already-loaded config: any field left at its
/// baked-in default in `cfg` is replaced by the RC value.
pub fn apply_defaults(cfg: &mut Config, defaults: &Config) {
    if cfg.mail.email.is_empty() {
        cfg.mail.email = defaults.mail.email.clone();
    }
    if cfg.mail.from.is_none() {
        cfg.mail.from = defaults.mail.from.clone();
    }
    if cfg.mail.subject.is_none() {
        cfg.mail.subject = defaults.mail.subject.clone();
    }
    if cfg.mail.mailsig.is_none() {
        cfg.mail.mailsig = defaults.mail.mailsig.clone();
    }
    if cfg.log_line_prefix == crate::config::model::DEFAULT_LOG_LINE_PREFIX
        && defaults.log_line_prefix != crate::config::model::DEFAULT_LOG_LINE_PREFIX
    {
        cfg.log_line_prefix = defaults.log_line_prefix.clone();
    }
    if cfg.maxsize == crate::config::model::DEFAULT_MAXSIZE {
        cfg.maxsize = defaults.maxsize;
    }
    if cfg.maxemailsize == crate::config::model::DEFAULT_MAXEMAILSIZE {
        cfg.maxemailsize = defaults.maxemailsize;
    }
}

fn quote_if_needed(value: &str) -> String {
    if value.contains(char::is_whitespace) && value != value.trim() {
        format!("\"{}\"", value)
    } else {
        value.to_string()
    }
}

fn report_type_str(rt: ReportType) -> &'static str {
    match rt {
        ReportType::Normal => "normal",
        ReportType::Duration => "duration",
        ReportType::Tempfile => "tempfile",
    }
}

/// Render `cfg`'s process-wide defaults as `.tailnmailrc`-shaped
/// `KEY: value` lines, in the same syntax [`parse`] reads back. Used by
/// `--makerc` to regenerate a defaults file from the current flags.
pub fn render(cfg: &Config) -> String {
    let mut out = String::new();
    for email in &cfg.mail.email {
        out.push_str(&format!("EMAIL: {}\n", email));
    }
    if let Some(from) = &cfg.mail.from {
        out.push_str(&format!("FROM: {}\n", from));
    }
    if let Some(subject) = &cfg.mail.subject {
        out.push_str(&format!("MAILSUBJECT: {}\n", quote_if_needed(subject)));
    }
    if let Some(sig) = &cfg.mail.mailsig {
        out.push_str(&format!("MAILSIG: {}\n", quote_if_needed(sig)));
    }
    if cfg.mail.mailzero {
        out.push_str("MAILZERO: 1\n");
    }
    out.push_str(&format!("TYPE: {}\n", report_type_str(cfg.report_type)));
    if let Some(d) = cfg.duration {
        out.push_str(&format!("DURATION: {}\n", d));
    }
    if let Some(limit) = cfg.duration_limit {
        out.push_str(&format!("DURATION_LIMIT: {}\n", limit));
    }
    if let Some(t) = cfg.tempfile {
        out.push_str(&format!("TEMPFILE: {}\n", t));
    }
    if let Some(limit) = cfg.tempfile_limit {
        out.push_str(&format!("TEMPFILE_LIMIT: {}\n", limit));
    }
    out.push_str(&format!("LOG_LINE_PREFIX: {}\n", cfg.log_line_prefix));
    if cfg.find_line_number {
        out.push_str("FIND_LINE_NUMBER: 1\n");
    }
    out.push_str(&format!("MAXSIZE: {}\n", cfg.maxsize));
    if let Some(size) = cfg.statement_size {
        out.push_str(&format!("STATEMENT_SIZE: {}\n", size));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_prefers_later_scalar() {
        let mut base = Config::new("base");
        base.mail.from = Some("base@example.com".into());
        let mut over = Config::new("over");
        over.mail.from = None;
        let merged = merge(base, over);
        assert_eq!(merged.mail.from.unwrap(), "base@example.com");
    }

    #[test]
    fn render_emits_rc_shaped_lines_readable_by_parse() {
        let mut cfg = Config::new("x.conf");
        cfg.mail.email.push("dba@example.com".into());
        cfg.report_type = ReportType::Duration;
        cfg.duration = Some(200);
        let text = render(&cfg);
        assert!(text.contains("EMAIL: dba@example.com"));
        assert!(text.contains("TYPE: duration"));
        assert!(text.contains("DURATION: 200"));

        let (reparsed, _doc) = parse(Path::new("rt.conf"), &text).unwrap();
        assert_eq!(reparsed.mail.email, vec!["dba@example.com".to_string()]);
        assert_eq!(reparsed.report_type, ReportType::Duration);
        assert_eq!(reparsed.duration, Some(200));
    }
}
