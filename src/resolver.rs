//! File Resolver: given a `FileEntry`, produces the ordered sequence
//! of concrete paths to read this run.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};

use crate::config::FileEntry;

const LATEST_TOKEN: &str = "LATEST";
const STEP_MINUTES: i64 = 30;
const LOOKBACK_DAYS: i64 = 60;

/// Resolve the ordered list of concrete files to read for one entry this
/// run. `now` and `timewarp_secs` pin the only clock the resolver consults,
/// so tests can control it precisely.
pub fn resolve(
    entry: &FileEntry,
    now: DateTime<Utc>,
    timewarp_secs: i64,
) -> std::io::Result<Vec<PathBuf>> {
    if let Some((dir, prefix, suffix)) = split_latest(&entry.template) {
        return resolve_latest(&dir, &prefix, &suffix, &entry.last_path);
    }
    if entry.template.contains('%') {
        return Ok(resolve_time_template(
            &entry.template,
            &entry.last_path,
            now,
            timewarp_secs,
        ));
    }
    let mut out = Vec::new();
    if !entry.last_path.is_empty() && entry.last_path != entry.template {
        out.push(PathBuf::from(&entry.last_path));
    }
    out.push(PathBuf::from(&entry.template));
    out.dedup();
    Ok(out)
}

/// Splits a `LATEST`-bearing template into (directory, prefix, suffix).
fn split_latest(template: &str) -> Option<(PathBuf, String, String)> {
    let path = Path::new(template);
    let file_name = path.file_name()?.to_str()?;
    let pos = file_name.find(LATEST_TOKEN)?;
    let prefix = file_name[..pos].to_string();
    let suffix = file_name[pos + LATEST_TOKEN.len()..].to_string();
    let dir = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    Some((dir, prefix, suffix))
}

fn resolve_latest(
    dir: &Path,
    prefix: &str,
    suffix: &str,
    last_path: &str,
) -> std::io::Result<Vec<PathBuf>> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = match name.to_str() {
            Some(n) => n,
            None => continue,
        };
        if !name.starts_with(prefix) || !name.ends_with(suffix) {
            continue;
        }
        let meta = entry.metadata()?;
        candidates.push((meta.modified()?, entry.path()));
    }
    candidates.sort_by_key(|(mtime, _)| *mtime);

    if last_path.is_empty() {
        return Ok(candidates.into_iter().last().map(|(_, p)| vec![p]).unwrap_or_default());
    }

    let last_mtime = fs::metadata(last_path).and_then(|m| m.modified()).ok();
    let mut out = vec![PathBuf::from(last_path)];
    for (mtime, path) in candidates {
        if path == Path::new(last_path) {
            continue;
        }
        let is_newer = match last_mtime {
            Some(last) => mtime > last,
            None => true,
        };
        if is_newer {
            out.push(path);
        }
    }
    Ok(out)
}

fn resolve_time_template(
    template: &str,
    last_path: &str,
    now: DateTime<Utc>,
    timewarp_secs: i64,
) -> Vec<PathBuf> {
    let start = now + Duration::seconds(timewarp_secs);
    let end = start - Duration::days(LOOKBACK_DAYS);
    let mut seen: HashSet<String> = HashSet::new();
    let mut stamped: Vec<(DateTime<Utc>, String)> = Vec::new();

    let mut t = start;
    while t >= end {
        let rendered = strftime_expand(template, t);
        if rendered != last_path && seen.insert(rendered.clone()) {
            stamped.push((t, rendered));
        }
        t = t - Duration::minutes(STEP_MINUTES);
    }
    stamped.sort_by_key(|(ts, _)| *ts);

    let mut out = Vec::new();
    if !last_path.is_empty() {
        out.push(PathBuf::from(last_path));
    }
    out.extend(stamped.into_iter().map(|(_, p)| PathBuf::from(p)));
    out
}

/// Expand `strftime`-style directives in `template` against `when`.
fn strftime_expand(template: &str, when: DateTime<Utc>) -> String {
    when.format(template).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;

    #[test]
    fn plain_template_prepends_distinct_last_path() {
        let mut entry = FileEntry::new(1, "/var/log/pg.log");
        entry.last_path = "/var/log/pg.log.1".to_string();
        let files = resolve(&entry, Utc::now(), 0).unwrap();
        assert_eq!(
            files,
            vec![PathBuf::from("/var/log/pg.log.1"), PathBuf::from("/var/log/pg.log")]
        );
    }

    #[test]
    fn time_template_bounded_to_60_days_and_ascending() {
        let entry = FileEntry::new(1, "/tmp/doesnotexist/pg-%Y%m%d.log");
        let now = Utc::now();
        let files = resolve(&entry, now, 0).unwrap();
        assert!(!files.is_empty());
        // Ascending: each step is 30 minutes apart, so distinct calendar days
        // appear in non-decreasing order ending at `now`'s day.
        let last = files.last().unwrap().to_string_lossy().to_string();
        assert!(last.contains(&now.format("%Y%m%d").to_string()));
    }

    #[test]
    fn latest_wildcard_keeps_only_newest_when_no_last_file() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["pg-a.log", "pg-b.log"] {
            let mut f = File::create(dir.path().join(name)).unwrap();
            writeln!(f, "x").unwrap();
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let template = dir.path().join("pg-LATEST.log");
        let entry = FileEntry::new(1, template.to_string_lossy().to_string());
        let files = resolve(&entry, Utc::now(), 0).unwrap();
        assert_eq!(files.len(), 1);
        assert!(files[0].to_string_lossy().ends_with("pg-b.log"));
    }

    #[test]
    fn latest_wildcard_orders_newer_than_last_ascending() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for name in ["pg-a.log", "pg-b.log", "pg-c.log"] {
            let p = dir.path().join(name);
            let mut f = File::create(&p).unwrap();
            writeln!(f, "x").unwrap();
            paths.push(p);
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let template = dir.path().join("pg-LATEST.log");
        let mut entry = FileEntry::new(1, template.to_string_lossy().to_string());
        entry.last_path = paths[0].to_string_lossy().to_string();
        let files = resolve(&entry, Utc::now(), 0).unwrap();
        assert_eq!(files, vec![paths[0].clone(), paths[1].clone(), paths[2].clone()]);
    }
}
