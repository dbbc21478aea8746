//! Filter Pipeline: per-file compiled include/exclude/exclude_prefix/
//! exclude_non_parsed regex sets applied to a closed record's normalized
//! body.

use regex::Regex;

use crate::config::{FilterPatterns, ReportType};
use crate::error::PrefixError;
use crate::reader::LogRecord;

/// An empty alternation means "no filter of this kind".
#[derive(Debug, Default)]
pub struct FilterSet {
    include: Option<Regex>,
    exclude: Option<Regex>,
    exclude_prefix: Option<Regex>,
    exclude_non_parsed: Option<Regex>,
}

fn alternation(patterns: &[String]) -> Result<Option<Regex>, PrefixError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let joined = patterns
        .iter()
        .map(|p| format!("(?:{})", p))
        .collect::<Vec<_>>()
        .join("|");
    Ok(Some(Regex::new(&joined)?))
}

impl FilterSet {
    /// Compile once per run from the union of config filters.
    pub fn compile(patterns: &FilterPatterns) -> Result<Self, PrefixError> {
        Ok(FilterSet {
            include: alternation(&patterns.include)?,
            exclude: alternation(&patterns.exclude)?,
            exclude_prefix: alternation(&patterns.exclude_prefix)?,
            exclude_non_parsed: alternation(&patterns.exclude_non_parsed)?,
        })
    }
}

/// The outcome of passing a record through the pipeline.
pub enum Verdict {
    Drop,
    Pass {
        body: String,
        duration_ms: Option<f64>,
        filesize: Option<u64>,
    },
}

lazy_static::lazy_static! {
    static ref DURATION_RE: Regex = Regex::new(r"duration:\s*([0-9]+(?:\.[0-9]+)?)\s*ms").unwrap();
    static ref TEMPFILE_RE: Regex = Regex::new(r"temporary file:[^,]*,?\s*size\s+(\d+)").unwrap();
    static ref STATEMENT_HEAD: Regex = Regex::new(r"^STATEMENT:\s*").unwrap();
}

/// Apply the pipeline to one closed record, given the run's report type and
/// minimum thresholds.
pub fn apply(
    set: &FilterSet,
    record: &LogRecord,
    report_type: ReportType,
    duration_min_ms: Option<u64>,
    tempfile_min_bytes: Option<u64>,
) -> Verdict {
    let body = record.body();

    if record.forced {
        if let Some(re) = &set.exclude_non_parsed {
            if re.is_match(&body) {
                return Verdict::Drop;
            }
        }
        return Verdict::Pass { body, duration_ms: None, filesize: None };
    }

    if let Some(re) = &set.include {
        if !re.is_match(&body) {
            return Verdict::Drop;
        }
    }
    if let Some(re) = &set.exclude {
        if re.is_match(&body) {
            return Verdict::Drop;
        }
    }
    if let Some(re) = &set.exclude_prefix {
        if re.is_match(&record.pgprefix) {
            return Verdict::Drop;
        }
    }

    match report_type {
        ReportType::Duration => {
            let duration = DURATION_RE
                .captures(&body)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok());
            match duration {
                Some(ms) if ms >= duration_min_ms.unwrap_or(0) as f64 => {
                    Verdict::Pass { body, duration_ms: Some(ms), filesize: None }
                }
                _ => Verdict::Drop,
            }
        }
        ReportType::Tempfile => {
            let filesize = TEMPFILE_RE
                .captures(&body)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<u64>().ok());
            match filesize {
                Some(size) if size >= tempfile_min_bytes.unwrap_or(0) => {
                    let stripped = STATEMENT_HEAD.replace(&body, "").into_owned();
                    Verdict::Pass { body: stripped, duration_ms: None, filesize: Some(size) }
                }
                _ => Verdict::Drop,
            }
        }
        ReportType::Normal => Verdict::Pass { body, duration_ms: None, filesize: None },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pid: &str, body: &str, prefix: &str) -> LogRecord {
        let mut r = LogRecord {
            pid: pid.to_string(),
            pgprefix: prefix.to_string(),
            ..Default::default()
        };
        r.segments.insert(1, body.to_string());
        r
    }

    #[test]
    fn include_filters_out_non_matching() {
        let patterns = FilterPatterns { include: vec!["ERROR".into()], ..Default::default() };
        let set = FilterSet::compile(&patterns).unwrap();
        let r = record("1", "LOG: ok", "p");
        assert!(matches!(apply(&set, &r, ReportType::Normal, None, None), Verdict::Drop));
    }

    #[test]
    fn duration_mode_drops_below_minimum() {
        let set = FilterSet::compile(&FilterPatterns::default()).unwrap();
        let r = record("1", "LOG:  duration: 150.0 ms  statement: select 1", "p");
        assert!(matches!(
            apply(&set, &r, ReportType::Duration, Some(200), None),
            Verdict::Drop
        ));
        let r2 = record("1", "LOG:  duration: 250.0 ms  statement: select 1", "p");
        assert!(matches!(
            apply(&set, &r2, ReportType::Duration, Some(200), None),
            Verdict::Pass { .. }
        ));
    }

    #[test]
    fn tempfile_mode_extracts_size_and_strips_statement_head() {
        let set = FilterSet::compile(&FilterPatterns::default()).unwrap();
        let r = record("1", "STATEMENT:  temporary file: \"pgsql_tmp123\", size 3000", "p");
        match apply(&set, &r, ReportType::Tempfile, None, None) {
            Verdict::Pass { filesize, body, .. } => {
                assert_eq!(filesize, Some(3000));
                assert!(!body.starts_with("STATEMENT:"));
            }
            _ => panic!("expected pass"),
        }
    }

    #[test]
    fn forced_record_only_checks_exclude_non_parsed() {
        let patterns = FilterPatterns {
            include: vec!["never matches this".into()],
            exclude_non_parsed: vec!["noisy".into()],
            ..Default::default()
        };
        let set = FilterSet::compile(&patterns).unwrap();
        let mut r = record("?", "noisy kernel message", "");
        r.forced = true;
        assert!(matches!(apply(&set, &r, ReportType::Normal, None, None), Verdict::Drop));
        let mut r2 = record("?", "quiet kernel message", "");
        r2.forced = true;
        assert!(matches!(apply(&set, &r2, ReportType::Normal, None, None), Verdict::Pass { .. }));
    }
}
