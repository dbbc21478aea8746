//! Line Reader & Multi-line Assembler: opens a file at its persisted
//! offset, reads forward, and reassembles physical lines into logical
//! [`LogRecord`]s keyed by process id.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::thread;
use std::time::Duration as StdDuration;

use indexmap::IndexMap;
use regex::Regex;

use crate::error::FileError;
use crate::prefix::PrefixMatchers;

const BACKSTEP_BYTES: u64 = 10;
const TRUNCATION_RETRY_DELAY: StdDuration = StdDuration::from_millis(200);
const CONTINUATION_KEYWORDS: &[&str] = &["STATEMENT", "DETAIL", "HINT", "CONTEXT", "QUERY"];

/// A logical, possibly multi-line, log record.
#[derive(Clone, Debug, Default)]
pub struct LogRecord {
    pub pid: String,
    pub pgprefix: String,
    pub pgtime: String,
    pub segments: std::collections::BTreeMap<u32, String>,
    pub source_file: String,
    pub source_line_number: Option<u64>,
    pub forced: bool,
}

impl LogRecord {
    /// Segments joined by single spaces, leading whitespace stripped,
    /// interior whitespace collapsed, newlines escaped, syslog `#011` tab
    /// encodings removed.
    pub fn body(&self) -> String {
        let joined = self
            .segments
            .values()
            .map(|s| s.replace("#011", "\t"))
            .collect::<Vec<_>>()
            .join(" ");
        let collapsed = joined.split_whitespace().collect::<Vec<_>>().join(" ");
        collapsed.replace('\n', "\\n")
    }
}

/// Outcome of opening a file for this run's read.
pub struct OpenResult {
    pub file: File,
    pub start_offset: u64,
    pub file_size: u64,
    pub too_large_note: Option<String>,
    pub approx_start_line: Option<u64>,
}

/// Open `path` at `persisted_offset`, applying rotation detection, the
/// `maxsize` cap, and the partial-line backstep.
pub fn open_for_reading(
    path: &Path,
    persisted_offset: u64,
    maxsize: u64,
    rewind: u64,
    offset_overridden: bool,
    find_line_number: bool,
) -> Result<OpenResult, FileError> {
    if !path.is_file() {
        return Err(FileError::NotRegular { path: path.to_path_buf() });
    }
    let mut file = File::open(path).map_err(|source| FileError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let file_size = file
        .metadata()
        .map_err(|source| FileError::Read { path: path.to_path_buf(), source })?
        .len();

    let mut offset = if persisted_offset > file_size { 0 } else { persisted_offset };
    let mut too_large_note = None;
    if !offset_overridden && file_size.saturating_sub(offset) > maxsize {
        offset = file_size - maxsize;
        too_large_note = Some(format!(
            "{}: {} bytes unread, truncated to the last {} bytes",
            path.display(),
            file_size - offset,
            maxsize
        ));
    }

    let approx_start_line = if find_line_number && offset > 0 {
        Some(count_newlines(&mut file, offset).map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?)
    } else {
        None
    };

    let seek_target = if offset == 0 {
        0
    } else {
        let backstepped = offset.max(BACKSTEP_BYTES) - BACKSTEP_BYTES;
        backstepped.saturating_sub(rewind)
    };

    if seek_target != 0 {
        file.seek(SeekFrom::Start(seek_target))
            .map_err(|source| FileError::Read { path: path.to_path_buf(), source })?;
        discard_partial_line(&mut file).map_err(|source| FileError::Read {
            path: path.to_path_buf(),
            source,
        })?;
    }

    Ok(OpenResult {
        file,
        start_offset: seek_target,
        file_size,
        too_large_note,
        approx_start_line,
    })
}

fn discard_partial_line(file: &mut File) -> std::io::Result<()> {
    let mut byte = [0u8; 1];
    loop {
        match file.read(&mut byte)? {
            0 => break,
            _ if byte[0] == b'\n' => break,
            _ => continue,
        }
    }
    Ok(())
}

fn count_newlines(file: &mut File, up_to: u64) -> std::io::Result<u64> {
    let saved = file.stream_position()?;
    file.seek(SeekFrom::Start(0))?;
    let mut remaining = up_to;
    let mut buf = [0u8; 64 * 1024];
    let mut count = 0u64;
    while remaining > 0 {
        let want = remaining.min(buf.len() as u64) as usize;
        let read = file.read(&mut buf[..want])?;
        if read == 0 {
            break;
        }
        count += buf[..read].iter().filter(|&&b| b == b'\n').count() as u64;
        remaining -= read as u64;
    }
    file.seek(SeekFrom::Start(saved))?;
    Ok(count)
}

/// One pass of physical lines read from the current offset to EOF,
/// including the truncated-final-line retry.
pub struct LineBatch {
    pub lines: Vec<String>,
    pub new_offset: u64,
}

pub fn read_lines(file: &mut File, start_offset: u64) -> std::io::Result<LineBatch> {
    file.seek(SeekFrom::Start(start_offset))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    if !buf.is_empty() && buf[buf.len() - 1] != b'\n' {
        thread::sleep(TRUNCATION_RETRY_DELAY);
        file.seek(SeekFrom::Start(start_offset))?;
        buf.clear();
        file.read_to_end(&mut buf)?;
    }

    let mut lines = Vec::new();
    let mut pos = 0usize;
    let mut full_end = start_offset;
    for i in 0..buf.len() {
        if buf[i] == b'\n' {
            lines.push(String::from_utf8_lossy(&buf[pos..i]).into_owned());
            pos = i + 1;
            full_end = start_offset + pos as u64;
        }
    }
    if pos < buf.len() {
        lines.push(String::from_utf8_lossy(&buf[pos..]).into_owned());
    }
    Ok(LineBatch { lines, new_offset: full_end })
}

fn is_continuation(rest: &str) -> bool {
    let trimmed = rest.trim_start();
    CONTINUATION_KEYWORDS.iter().any(|kw| trimmed.starts_with(kw))
}

lazy_static::lazy_static! {
    static ref SQLSTATE_HEAD: Regex = Regex::new(r"^[0-9A-Z]{5} ").unwrap();
}

/// Stateful multi-line assembler, one per file entry per run.
pub struct Assembler {
    matchers: PrefixMatchers,
    syslog: bool,
    strip_sqlstate: bool,
    skip_non_parsed: bool,
    open_records: IndexMap<String, LogRecord>,
    current_num: std::collections::HashMap<String, u32>,
    seq_n: std::collections::HashMap<String, u32>,
    last_pid: Option<String>,
}

impl Assembler {
    /// Whether the leading SQLSTATE token is stripped from each record body
    /// follows directly from `matchers`: PostgreSQL only emits it when
    /// `log_line_prefix` carries `%e`.
    pub fn new(matchers: PrefixMatchers, syslog: bool, skip_non_parsed: bool) -> Self {
        let strip_sqlstate = matchers.has_sqlstate;
        Assembler {
            matchers,
            syslog,
            strip_sqlstate,
            skip_non_parsed,
            open_records: IndexMap::new(),
            current_num: std::collections::HashMap::new(),
            seq_n: std::collections::HashMap::new(),
            last_pid: None,
        }
    }

    fn start_record(&mut self, pid: &str, pgprefix: &str, pgtime: &str, rest: &str, source_file: &str, line_no: u64) {
        let mut record = LogRecord {
            pid: pid.to_string(),
            pgprefix: pgprefix.to_string(),
            pgtime: pgtime.to_string(),
            source_file: source_file.to_string(),
            source_line_number: Some(line_no),
            ..Default::default()
        };
        record.segments.insert(1, rest.to_string());
        self.open_records.insert(pid.to_string(), record);
        self.current_num.insert(pid.to_string(), 1);
    }

    fn append_segment(&mut self, pid: &str, text: &str) {
        let num = self.current_num.entry(pid.to_string()).or_insert(0);
        *num += 1;
        if let Some(rec) = self.open_records.get_mut(pid) {
            rec.segments.insert(*num, text.to_string());
        }
    }

    /// Feed one physical line; returns a record that just closed, if any.
    pub fn process_line(&mut self, line: &str, line_no: u64, source_file: &str) -> Option<LogRecord> {
        if let Some(caps) = self.matchers.strict.captures(line) {
            let whole = caps.name("whole").unwrap();
            let ts = caps.name("ts").map(|m| m.as_str()).unwrap_or("");
            let pid = caps.name("pid").map(|m| m.as_str()).unwrap_or("");
            let mut rest = &line[whole.end()..];
            if self.strip_sqlstate {
                if let Some(m) = SQLSTATE_HEAD.find(rest) {
                    rest = &rest[m.end()..];
                }
            }

            if self.syslog {
                if let (Some(n), _m) = (caps.name("seq_n"), caps.name("seq_m")) {
                    let n: u32 = n.as_str().parse().unwrap_or(0);
                    let prev = self.seq_n.insert(pid.to_string(), n);
                    if prev.is_some() && prev != Some(n) {
                        let closed = self.open_records.shift_remove(pid);
                        self.start_record(pid, whole.as_str(), ts, rest, source_file, line_no);
                        self.last_pid = Some(pid.to_string());
                        return closed;
                    }
                }
            }

            let closed = if self.open_records.contains_key(pid) {
                if is_continuation(rest) {
                    self.append_segment(pid, rest);
                    self.last_pid = Some(pid.to_string());
                    return None;
                }
                let closed = self.open_records.shift_remove(pid);
                self.start_record(pid, whole.as_str(), ts, rest, source_file, line_no);
                closed
            } else {
                self.start_record(pid, whole.as_str(), ts, rest, source_file, line_no);
                None
            };
            self.last_pid = Some(pid.to_string());
            return closed;
        }

        if self.matchers.cluster.is_match(line) {
            return None;
        }

        let last_pid = match &self.last_pid {
            Some(p) => p.clone(),
            None => return None,
        };

        if let Some(stripped) = line.strip_prefix('\t') {
            self.append_segment(&last_pid, stripped);
            return None;
        }

        if let Some(m) = self.matchers.timestamp_only.find(line) {
            if line[m.end()..].trim_start().starts_with("LOG:") {
                return None;
            }
        }

        if self.skip_non_parsed {
            return None;
        }
        let mut record = LogRecord {
            pid: "?".to_string(),
            source_file: source_file.to_string(),
            source_line_number: Some(line_no),
            forced: true,
            ..Default::default()
        };
        record.segments.insert(1, line.to_string());
        Some(record)
    }

    /// Drain any still-open records, in pid insertion order.
    pub fn drain(mut self) -> Vec<LogRecord> {
        self.open_records.drain(..).map(|(_, r)| r).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prefix;

    fn assembler(format: &str) -> Assembler {
        let matchers = prefix::compile(format, false).unwrap();
        Assembler::new(matchers, false, false)
    }

    #[test]
    fn multiline_reassembly_with_statement_and_tab_continuation() {
        let mut a = assembler("%t [%p]: ");
        let p1 = "2024-01-01 00:00:00 UTC [100]: LOG:  duration: 5 ms";
        let p1_statement = "2024-01-01 00:00:00 UTC [100]: STATEMENT:  select 1";
        let p2 = "2024-01-01 00:00:01 UTC [200]: LOG:  duration: 6 ms";
        let p1_tab = "\tmore detail for 100";
        let p1_next = "2024-01-01 00:00:02 UTC [100]: LOG:  duration: 7 ms";

        assert!(a.process_line(p1, 1, "f").is_none());
        assert!(a.process_line(p1_statement, 2, "f").is_none());
        assert!(a.process_line(p2, 3, "f").is_none());
        assert!(a.process_line(p1_tab, 4, "f").is_none());
        let closed = a.process_line(p1_next, 5, "f").unwrap();
        assert_eq!(closed.pid, "100");
        assert_eq!(closed.segments.len(), 3);

        let remaining = a.drain();
        assert_eq!(remaining.len(), 2);
    }

    #[test]
    fn forced_record_for_unparseable_line() {
        let mut a = assembler("%t [%p]: ");
        let closed = a.process_line("some OS-level garbage", 1, "f");
        let rec = closed.unwrap();
        assert_eq!(rec.pid, "?");
        assert!(rec.forced);
    }

    #[test]
    fn cluster_notice_dropped_silently() {
        let mut a = assembler("%t user=%u ");
        let notice = "2024-01-01 00:00:00 UTC user= ";
        assert!(a.process_line(notice, 1, "f").is_none());
        assert!(a.last_pid.is_none());
    }

    #[test]
    fn strip_sqlstate_follows_the_e_specifier() {
        let without = assembler("%t [%p]: ");
        assert!(!without.strip_sqlstate);

        let matchers = prefix::compile("%t [%p] %e: ", false).unwrap();
        let with = Assembler::new(matchers, false, false);
        assert!(with.strip_sqlstate);
    }
}
