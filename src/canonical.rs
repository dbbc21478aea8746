//! Canonicalizer: rewrites a statement into a canonical form used as
//! the cluster key, abstracting over literal values. Disabled in duration
//! mode: the aggregator uses [`duration_key`] there instead, which only
//! normalizes the varying millisecond figure.
//!
//! Stage A is a fixed, ordered list of targeted regex substitutions. Stage B
//! is an explicit finite-state tokenizer over `VALUES`/`REPLACE` tuple
//! lists, modeled independently of the substitution chain since nested
//! tuples and quoting can't be expressed as one regex. Stage C produces the
//! pretty, non-flattened form kept as the cluster's `raw_string`.

use regex::Regex;

/// Stage A: ordered regex substitutions. Order matters — e.g. the VALUES
/// tuple pass in stage B must see bare literals the way the source wrote
/// them, so stage A intentionally leaves VALUES lists alone.
struct Rule {
    pattern: Regex,
    replacement: &'static str,
}

lazy_static::lazy_static! {
    static ref STAGE_A: Vec<Rule> = vec![
        // tempfile size varies per occurrence but belongs to the same
        // cluster as its statement; duration mode never reaches this list
        // since it skips canonicalize() entirely (see duration_key).
        Rule {
            pattern: Regex::new(r"(?i)(temporary file:[^,]*,?\s*size\s+)\d+").unwrap(),
            replacement: "${1}?",
        },
        // WHERE col = <number> / WHERE col = '<string>'
        Rule {
            pattern: Regex::new(r"(?i)(WHERE\s+[\w.]+\s*=\s*)-?\d+(?:\.\d+)?").unwrap(),
            replacement: "${1}?",
        },
        Rule {
            pattern: Regex::new(r"(?i)(WHERE\s+[\w.]+\s*=\s*)'(?:[^'\\]|\\.|'')*'").unwrap(),
            replacement: "${1}'?'",
        },
        // UPDATE t SET c = '<string>'
        Rule {
            pattern: Regex::new(r"(?i)(SET\s+[\w.]+\s*=\s*)'(?:[^'\\]|\\.|'')*'").unwrap(),
            replacement: "${1}'?'",
        },
        // bare timestamp literal after '='
        Rule {
            pattern: Regex::new(r"(=\s*)'\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?'").unwrap(),
            replacement: "${1}'?'",
        },
        // named cursor
        Rule {
            pattern: Regex::new(r#"(?i)(DECLARE\s+)"[^"]*"(\s+CURSOR)"#).unwrap(),
            replacement: r#"${1}"?"${2}"#,
        },
        // ARRAY[...] literal
        Rule {
            pattern: Regex::new(r"ARRAY\s*\[[^\[\]]*\]").unwrap(),
            replacement: "ARRAY[?]",
        },
        // UTF8 byte sequence error
        Rule {
            pattern: Regex::new(r#"(?i)(invalid byte sequence for encoding "UTF8": )0x[0-9A-Fa-f]+"#).unwrap(),
            replacement: "${1}?",
        },
        // "Failed on request of size N"
        Rule {
            pattern: Regex::new(r"(Failed on request of size )\d+").unwrap(),
            replacement: "${1}?",
        },
        // "Failing row contains (...)"
        Rule {
            pattern: Regex::new(r"(Failing row contains )\([^()]*\)").unwrap(),
            replacement: "${1}(?)",
        },
        // "syntax error ... at character N"
        Rule {
            pattern: Regex::new(r"(at character )\d+").unwrap(),
            replacement: "${1}?",
        },
        // ambiguity marker
        Rule {
            pattern: Regex::new(r#"(?i)(column reference )"[^"]*"( is ambiguous)"#).unwrap(),
            replacement: r#"${1}"?"${2}"#,
        },
        // DETAIL: Key (...)=(...)
        Rule {
            pattern: Regex::new(r"(DETAIL:\s*Key )\([^()]*\)=\([^()]*\)").unwrap(),
            replacement: "${1}(?)=(?)",
        },
    ];

    static ref WHERE_IN: Regex = Regex::new(r"(?i)(\bIN\s*)\(([^()]*)\)").unwrap();
    static ref SELECT_LIST: Regex = Regex::new(
        r"(?i)(\bSELECT\s+)((?:-?\d+(?:\.\d+)?|'(?:[^'\\]|\\.|'')*')(?:\s*,\s*(?:-?\d+(?:\.\d+)?|'(?:[^'\\]|\\.|'')*'))*)"
    ).unwrap();
    static ref FUNC_CALL: Regex = Regex::new(r"(?i)\bSELECT\s+(\w+)\(([^()]*)\)").unwrap();
}

/// Replace a comma-separated argument list with `?` placeholders, leaving
/// existing `$N` bind placeholders untouched.
fn flatten_arg_list(args: &str) -> String {
    args.split(',')
        .map(|arg| {
            let trimmed = arg.trim();
            if trimmed.is_empty() {
                trimmed.to_string()
            } else if trimmed.starts_with('$') && trimmed[1..].chars().all(|c| c.is_ascii_digit()) {
                trimmed.to_string()
            } else {
                "?".to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",")
}

fn apply_select_func_args(input: &str) -> String {
    FUNC_CALL
        .replace_all(input, |caps: &regex::Captures| {
            format!("SELECT {}({})", &caps[1], flatten_arg_list(&caps[2]))
        })
        .into_owned()
}

fn apply_select_literal_list(input: &str) -> String {
    SELECT_LIST
        .replace_all(input, |caps: &regex::Captures| {
            let n = caps[2].split(',').count();
            let placeholders = std::iter::repeat("?").take(n).collect::<Vec<_>>().join(", ");
            format!("{}{}", &caps[1], placeholders)
        })
        .into_owned()
}

fn apply_where_in(input: &str) -> String {
    WHERE_IN
        .replace_all(input, |caps: &regex::Captures| {
            let inner = caps[2].trim_start();
            if inner.len() >= 6 && inner[..6].eq_ignore_ascii_case("select") {
                caps[0].to_string()
            } else {
                format!("{}(?)", &caps[1])
            }
        })
        .into_owned()
}

/// Stage B finite-state tuple tokenizer. Scans `VALUES (...)`
/// and `REPLACE (...)` occurrences and collapses each tuple list to `(?)`.
mod tuples {
    #[derive(Debug, PartialEq, Eq)]
    enum State {
        Start,
        Literal,
        InQuote,
        Dollar,
        Fail,
    }

    /// Find the end index of the tuple-list region starting at `start`
    /// (the index of the opening `(`), or `None` if the FSM fails.
    fn scan_region(chars: &[char], start: usize) -> Option<usize> {
        let mut i = start;
        let mut state = State::Start;
        let mut depth: i32 = 0;
        let mut dollar_tag = String::new();
        let n = chars.len();

        while i < n {
            let c = chars[i];
            match state {
                State::Start => {
                    if c.is_whitespace() || c == ',' {
                        i += 1;
                    } else if c == '(' {
                        depth += 1;
                        i += 1;
                    } else if c == ')' {
                        depth -= 1;
                        i += 1;
                        if depth <= 0 {
                            // Possibly more tuples follow after a comma.
                            let mut j = i;
                            while j < n && chars[j].is_whitespace() {
                                j += 1;
                            }
                            if j < n && chars[j] == ',' {
                                i = j + 1;
                                state = State::Start;
                            } else {
                                return Some(i);
                            }
                        }
                    } else if c == '\'' {
                        state = State::InQuote;
                        i += 1;
                    } else if c == 'E' && chars.get(i + 1) == Some(&'\'') {
                        state = State::InQuote;
                        i += 2;
                    } else if c == '$' {
                        let mut j = i + 1;
                        while j < n && chars[j] != '$' {
                            j += 1;
                        }
                        if j >= n {
                            state = State::Fail;
                        } else {
                            dollar_tag = chars[i..=j].iter().collect();
                            i = j + 1;
                            state = State::Dollar;
                        }
                    } else {
                        state = State::Literal;
                        i += 1;
                    }
                }
                State::Literal => {
                    if c == ',' {
                        state = State::Start;
                        i += 1;
                    } else if c == ';' {
                        return Some(i);
                    } else if c == ')' {
                        depth -= 1;
                        i += 1;
                        if depth <= 0 {
                            let mut j = i;
                            while j < n && chars[j].is_whitespace() {
                                j += 1;
                            }
                            if j < n && chars[j] == ',' {
                                i = j + 1;
                                state = State::Start;
                            } else {
                                return Some(i);
                            }
                        }
                    } else if c == '(' {
                        depth += 1;
                        i += 1;
                    } else {
                        i += 1;
                    }
                }
                State::InQuote => {
                    if c == '\\' {
                        i += 2;
                    } else if c == '\'' {
                        if chars.get(i + 1) == Some(&'\'') {
                            i += 2;
                        } else {
                            i += 1;
                            state = State::Literal;
                        }
                    } else {
                        i += 1;
                    }
                }
                State::Dollar => {
                    let tag_len = dollar_tag.chars().count();
                    if chars[i..].iter().take(tag_len).collect::<String>() == dollar_tag {
                        i += tag_len;
                        state = State::Literal;
                    } else {
                        i += 1;
                    }
                }
                State::Fail => return None,
            }
        }
        if state == State::Fail {
            None
        } else {
            Some(i)
        }
    }

    /// Replace every `VALUES (...)`/`REPLACE (...)` occurrence with `(?)`.
    pub fn flatten(input: &str) -> String {
        let chars: Vec<char> = input.chars().collect();
        let lower: Vec<char> = input.to_ascii_lowercase().chars().collect();
        let mut out = String::new();
        let mut i = 0usize;
        let n = chars.len();

        while i < n {
            let matched_kw = ["values", "replace"]
                .iter()
                .find(|kw| lower[i..].iter().collect::<String>().starts_with(**kw));
            let at_word_start = i == 0 || !chars[i - 1].is_alphanumeric();
            if let (Some(kw), true) = (matched_kw, at_word_start) {
                let kw_end = i + kw.len();
                let after = kw_end == n || !chars.get(kw_end).map_or(false, |c| c.is_alphanumeric());
                let mut j = kw_end;
                while j < n && chars[j].is_whitespace() {
                    j += 1;
                }
                if after && j < n && chars[j] == '(' {
                    if let Some(end) = scan_region(&chars, j) {
                        out.push_str(&chars[i..kw_end].iter().collect::<String>());
                        out.push_str(" (?)");
                        i = end;
                        continue;
                    }
                }
            }
            out.push(chars[i]);
            i += 1;
        }
        out
    }
}

lazy_static::lazy_static! {
    static ref DURATION_MS: Regex = Regex::new(r"(?i)(duration:\s*)[0-9.]+(\s*ms)").unwrap();
}

/// Cluster key for duration mode, which never runs the literal-abstracting
/// canonicalizer: only the varying millisecond value is normalized away, so
/// repeats of the same statement at different durations still share a
/// cluster while statements that genuinely differ do not collapse together.
pub fn duration_key(raw: &str) -> String {
    DURATION_MS.replace_all(raw, "${1}?${2}").into_owned()
}

/// Stage A + B: the canonical cluster key.
pub fn canonicalize(raw: &str) -> String {
    let mut text = raw.to_string();
    text = apply_where_in(&text);
    text = apply_select_func_args(&text);
    for rule in STAGE_A.iter() {
        if rule.replacement.is_empty() {
            continue;
        }
        text = rule.pattern.replace_all(&text, rule.replacement).into_owned();
    }
    text = apply_select_literal_list(&text);
    text = tuples::flatten(&text);
    text
}

lazy_static::lazy_static! {
    static ref CONTINUATION_HEAD: Regex =
        Regex::new(r"(?i)\s*(DETAIL:|HINT:|QUERY:|CONTEXT:|STATEMENT:)").unwrap();
    static ref DURATION_STATEMENT: Regex =
        Regex::new(r"(?is)LOG:\s*duration:\s*([0-9.]+ ms)\s*LOG:\s*statement:\s*(.*)").unwrap();
}

/// Stage C: pretty (non-flattened) form preserved as `raw_string`.
pub fn prettify(raw: &str, duration_mode: bool) -> String {
    if duration_mode {
        if let Some(caps) = DURATION_STATEMENT.captures(raw) {
            return format!("DURATION: {}\nSTATEMENT: {}", &caps[1], &caps[2]);
        }
    }
    CONTINUATION_HEAD.replace_all(raw, "\n$1").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_tuples_with_different_literal_values_share_a_key() {
        let a = "INSERT INTO t VALUES (1,'x'),(2,'y')";
        let b = "INSERT INTO t VALUES (3,'z')";
        assert_eq!(canonicalize(a), canonicalize(b));
    }

    #[test]
    fn where_equality_number_and_string() {
        assert_eq!(canonicalize("SELECT * FROM t WHERE id = 5"), "SELECT * FROM t WHERE id = ?");
        assert_eq!(
            canonicalize("SELECT * FROM t WHERE name = 'bob'"),
            "SELECT * FROM t WHERE name = '?'"
        );
    }

    #[test]
    fn where_in_list_flattened_unless_subselect() {
        assert_eq!(
            canonicalize("SELECT * FROM t WHERE id IN (1,2,3)"),
            "SELECT * FROM t WHERE id IN (?)"
        );
        let sub = "SELECT * FROM t WHERE id IN (SELECT id FROM u)";
        assert_eq!(canonicalize(sub), sub);
    }

    #[test]
    fn update_set_string_literal() {
        assert_eq!(
            canonicalize("UPDATE t SET name = 'bob' WHERE id = 1"),
            "UPDATE t SET name = '?' WHERE id = ?"
        );
    }

    #[test]
    fn array_literal_and_failing_row() {
        assert_eq!(canonicalize("x = ARRAY[1,2,3]"), "x = ARRAY[?]");
        assert_eq!(
            canonicalize("Failing row contains (1, 'a', null)."),
            "Failing row contains (?)."
        );
    }

    #[test]
    fn prettify_inserts_newlines_before_sections() {
        let raw = "LOG:  statement: select 1 STATEMENT:  select 1";
        let pretty = prettify(raw, false);
        assert!(pretty.contains('\n'));
    }

    #[test]
    fn prettify_reshapes_duration_mode() {
        let raw = "LOG:  duration: 12.3 ms LOG:  statement: select 1";
        let pretty = prettify(raw, true);
        assert_eq!(pretty, "DURATION: 12.3 ms\nSTATEMENT: select 1");
    }

    #[test]
    fn duration_key_normalizes_only_the_measurement() {
        let a = "duration: 10.0 ms statement: select 1";
        let b = "duration: 250 ms statement: select 1";
        assert_eq!(duration_key(a), duration_key(b));
    }

    #[test]
    fn duration_key_leaves_literal_values_untouched() {
        let a = "duration: 10 ms statement: select * from t where id = 1";
        let b = "duration: 10 ms statement: select * from t where id = 2";
        assert_ne!(duration_key(a), duration_key(b));
    }
}
