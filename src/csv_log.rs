//! CSV-format log backend. Postgres's `log_destination = csvlog` emits one
//! row per message; each row becomes one closed record directly, with no
//! multi-line assembly needed since CSV fields already carry embedded
//! newlines inside their own quoting.

use crate::error::CsvBackendError;
use crate::reader::LogRecord;

const COL_TIME: usize = 0;
const COL_PID: usize = 3;
const COL_SEVERITY: usize = 11;
const COL_MESSAGE: usize = 13;
const COL_DETAIL: usize = 14;
const COL_CONTEXT: usize = 18;
const COL_QUERY: usize = 19;
const MIN_COLUMNS: usize = 20;

/// Split one CSV row into fields, honoring double-quote escaping (`""` is a
/// literal quote) the way Postgres's csvlog writer emits it. Hand-rolled
/// rather than pulled from a crate, in the same spirit as the canonicalizer's
/// own tokenizer: this is a small, fully-specified grammar.
pub fn split_row(row: &str) -> Result<Vec<String>, CsvBackendError> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = row.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    if in_quotes {
        return Err(CsvBackendError(format!(
            "unterminated quoted field in row: {}",
            row
        )));
    }
    fields.push(field);
    Ok(fields)
}

/// Build the synthetic record for one CSV row: prefix `"ts [pid]"`, body
/// `"<level>:  <message> [CONTEXT: <context> ]STATEMENT:  <statement>"`.
pub fn to_record(
    row: &str,
    source_file: &str,
    line_no: u64,
) -> Result<Option<LogRecord>, CsvBackendError> {
    let fields = split_row(row)?;
    if fields.len() < MIN_COLUMNS {
        return Err(CsvBackendError(format!(
            "expected at least {} csvlog columns, got {}",
            MIN_COLUMNS,
            fields.len()
        )));
    }
    let time = &fields[COL_TIME];
    let pid = &fields[COL_PID];
    let severity = &fields[COL_SEVERITY];
    let message = &fields[COL_MESSAGE];
    let detail = fields.get(COL_DETAIL).map(String::as_str).unwrap_or("");
    let context = fields.get(COL_CONTEXT).map(String::as_str).unwrap_or("");
    let query = fields.get(COL_QUERY).map(String::as_str).unwrap_or("");

    let mut body = format!("{}:  {}", severity, message);
    if !detail.is_empty() {
        body.push_str(&format!(" DETAIL:  {}", detail));
    }
    if !context.is_empty() {
        body.push_str(&format!(" CONTEXT: {} ", context));
    }
    body.push_str(&format!("STATEMENT:  {}", query));

    let mut record = LogRecord {
        pid: pid.clone(),
        pgprefix: format!("{} [{}]", time, pid),
        pgtime: time.clone(),
        source_file: source_file.to_string(),
        source_line_number: Some(line_no),
        forced: false,
        ..Default::default()
    };
    record.segments.insert(1, body);
    Ok(Some(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn csv_row(message: &str, query: &str) -> String {
        let mut cols = vec!["x".to_string(); MIN_COLUMNS];
        cols[COL_TIME] = "2024-01-01 00:00:00 UTC".to_string();
        cols[COL_PID] = "555".to_string();
        cols[COL_SEVERITY] = "ERROR".to_string();
        cols[COL_MESSAGE] = message.to_string();
        cols[COL_DETAIL] = String::new();
        cols[COL_CONTEXT] = String::new();
        cols[COL_QUERY] = query.to_string();
        cols.join(",")
    }

    #[test]
    fn composes_expected_body() {
        let row = csv_row("syntax error", "select 1");
        let record = to_record(&row, "f.csv", 1).unwrap().unwrap();
        assert_eq!(record.pid, "555");
        assert_eq!(record.pgprefix, "2024-01-01 00:00:00 UTC [555]");
        assert_eq!(record.body(), "ERROR:  syntax error STATEMENT:  select 1");
    }

    #[test]
    fn handles_quoted_commas_and_escaped_quotes() {
        let row = format!(
            "2024-01-01 00:00:00 UTC,u,d,555,c,s,1,SELECT,st,v,t,ERROR,XXCCC,\"message, with comma and \"\"quote\"\"\",,,,,,,,,"
        );
        let fields = split_row(&row).unwrap();
        assert_eq!(fields[COL_MESSAGE], "message, with comma and \"quote\"");
    }

    #[test]
    fn rejects_unterminated_quote() {
        let row = "a,\"unterminated";
        assert!(split_row(row).is_err());
    }
}
