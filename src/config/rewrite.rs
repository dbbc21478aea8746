//! Offset Persistence: after a successful run, update `LASTFILE[N]`
//! and `OFFSET[N]` in the parsed document and write the file back atomically,
//! without disturbing comments or any line we didn't need to touch.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::config::model::{Config, FileEntry};
use crate::config::parser::{ConfigDocument, RawLine};
use crate::error::ConfigError;

/// Apply the new `latest_path`/`latest_offset` from each entry onto the
/// document's raw lines, renumbering suffix-0 placeholders first.
pub fn apply_updates(cfg: &mut Config, doc: &mut ConfigDocument) -> Result<bool, ConfigError> {
    let old_suffixes: Vec<u32> = cfg.files.iter().map(|f| f.suffix).collect();
    cfg.renumber()?;
    let mut changed = false;

    for (old_suffix, entry) in old_suffixes.into_iter().zip(cfg.files.iter()) {
        if entry.inherited {
            continue;
        }
        if old_suffix == 0 && entry.suffix != 0 {
            renumber_in_doc(doc, old_suffix, entry.suffix);
            changed = true;
        }
        changed |= sync_entry(doc, entry);
    }
    Ok(changed)
}

fn renumber_in_doc(doc: &mut ConfigDocument, _old: u32, new_suffix: u32) {
    for line in doc.lines.iter_mut() {
        if let RawLine::Entry { key, suffix, key_prefix, .. } = line {
            if suffix.is_none() && matches!(key.as_str(), "FILE" | "LASTFILE" | "OFFSET") {
                *suffix = Some(new_suffix);
                *key_prefix = rekeyed_prefix(key_prefix, key, new_suffix);
            }
        }
    }
}

fn rekeyed_prefix(old_prefix: &str, key: &str, suffix: u32) -> String {
    // old_prefix looks like "FILE: " (unsuffixed); splice the suffix into the key.
    if let Some(colon) = old_prefix.find(':') {
        format!("{}[{}]{}", key, suffix, &old_prefix[colon..])
    } else {
        format!("{}[{}]: ", key, suffix)
    }
}

/// Update (or insert) the `LASTFILE[N]`/`OFFSET[N]` lines for one entry.
/// Returns true if the document changed.
fn sync_entry(doc: &mut ConfigDocument, entry: &FileEntry) -> bool {
    let mut changed = false;
    let new_path = entry.latest_path.clone().unwrap_or_else(|| entry.last_path.clone());
    let new_offset = entry.latest_offset.unwrap_or(entry.offset);

    changed |= set_or_insert(doc, "LASTFILE", entry.suffix, &new_path, "FILE");
    changed |= set_or_insert(doc, "OFFSET", entry.suffix, &new_offset.to_string(), "LASTFILE");
    changed
}

/// Find `key[suffix]` in the document and overwrite its value if different;
/// if absent, insert a new line right after the first line for `after_key`
/// with the same suffix.
fn set_or_insert(
    doc: &mut ConfigDocument,
    key: &str,
    suffix: u32,
    value: &str,
    after_key: &str,
) -> bool {
    for line in doc.lines.iter_mut() {
        if let RawLine::Entry {
            key: k,
            suffix: s,
            value: v,
            ..
        } = line
        {
            if k == key && *s == Some(suffix) {
                if v != value {
                    *v = value.to_string();
                    return true;
                }
                return false;
            }
        }
    }
    // Not found: insert after the matching `after_key[suffix]` line.
    let insert_at = doc
        .lines
        .iter()
        .position(|line| {
            matches!(line, RawLine::Entry { key: k, suffix: s, .. }
                if k == after_key && *s == Some(suffix))
        })
        .map(|i| i + 1)
        .unwrap_or(doc.lines.len());
    doc.lines.insert(
        insert_at,
        RawLine::Entry {
            key_prefix: format!("{}[{}]: ", key, suffix),
            key: key.to_string(),
            suffix: Some(suffix),
            value: value.to_string(),
        },
    );
    true
}

/// Render the document back to text.
pub fn render(doc: &ConfigDocument) -> String {
    let mut out = String::new();
    for line in &doc.lines {
        match line {
            RawLine::Comment(s) => {
                out.push_str(s);
                out.push('\n');
            }
            RawLine::Blank => out.push('\n'),
            RawLine::Entry {
                key_prefix, value, ..
            } => {
                out.push_str(key_prefix);
                if value.contains(char::is_whitespace) && value != value.trim() {
                    out.push('"');
                    out.push_str(value);
                    out.push('"');
                } else {
                    out.push_str(value);
                }
                out.push('\n');
            }
        }
    }
    out
}

/// Write `text` to `path` atomically: write to a temp file in the same
/// directory, then rename over the original.
pub fn write_atomic(path: &Path, text: &str) -> Result<(), ConfigError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|source| ConfigError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.write_all(text.as_bytes())
        .and_then(|_| tmp.flush())
        .map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    tmp.persist(path).map_err(|e| ConfigError::Write {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

/// Re-read the config from disk to confirm what was actually persisted
/// (used by tests and `--dryrun` diagnostics).
pub fn read_back(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse;
    use std::path::Path;

    #[test]
    fn updates_existing_offset_in_place() {
        let text = "# a note\nFILE[1]: /var/log/pg.log\nLASTFILE[1]: /var/log/pg.log\nOFFSET[1]: 10\n";
        let (mut cfg, mut doc) = parse(Path::new("t.conf"), text).unwrap();
        cfg.files[0].latest_path = Some("/var/log/pg.log".into());
        cfg.files[0].latest_offset = Some(42);
        let changed = apply_updates(&mut cfg, &mut doc).unwrap();
        assert!(changed);
        let out = render(&doc);
        assert!(out.contains("# a note"));
        assert!(out.contains("OFFSET[1]: 42"));
    }

    #[test]
    fn inserts_missing_lastfile_and_offset() {
        let text = "FILE: /var/log/pg.log\n";
        let (mut cfg, mut doc) = parse(Path::new("t.conf"), text).unwrap();
        cfg.files[0].latest_path = Some("/var/log/pg.log".into());
        cfg.files[0].latest_offset = Some(99);
        apply_updates(&mut cfg, &mut doc).unwrap();
        let out = render(&doc);
        assert!(out.contains("FILE[1]: /var/log/pg.log"));
        assert!(out.contains("LASTFILE[1]: /var/log/pg.log"));
        assert!(out.contains("OFFSET[1]: 99"));
    }

    #[test]
    fn no_change_is_idempotent() {
        let text = "FILE[1]: /var/log/pg.log\nLASTFILE[1]: /var/log/pg.log\nOFFSET[1]: 10\n";
        let (mut cfg, mut doc) = parse(Path::new("t.conf"), text).unwrap();
        cfg.files[0].latest_path = Some("/var/log/pg.log".into());
        cfg.files[0].latest_offset = Some(10);
        let changed = apply_updates(&mut cfg, &mut doc).unwrap();
        assert!(!changed);
        assert_eq!(render(&doc), text);
    }
}
