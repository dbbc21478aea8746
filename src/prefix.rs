//! Prefix Grammar Compiler: turns a `log_line_prefix` format string
//! into the three regex matchers the reader needs. The builder is a pure
//! function of the format string and the syslog flag, and is unit-testable
//! on its own.

use regex::Regex;

use crate::error::PrefixError;

/// The three derived matchers for one `log_line_prefix` value.
#[derive(Debug)]
pub struct PrefixMatchers {
    /// Captures (whole prefix, timestamp-or-empty, pid-or-empty) via the
    /// named groups `whole`, `ts`, `pid`. Always present, even when the
    /// format has no timestamp or pid field.
    pub strict: Regex,
    /// Matches cluster-wide notices, which never carry session fields.
    pub cluster: Regex,
    /// Matches only up to and including the first field, used to silently
    /// drop continuation-adjacent `LOG:` lines.
    pub timestamp_only: Regex,
    /// Whether the format string included `%e`: PostgreSQL only emits the
    /// leading SQLSTATE token on each record body when this specifier is
    /// part of `log_line_prefix`.
    pub has_sqlstate: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Specifier {
    Timestamp, // %t
    Epoch,     // %m
    Pid,       // %p
    SessionId, // %c
    Line,      // %l
    User,      // %u
    Database,  // %d
    Remote,    // %r
    Host,      // %h
    App,       // %a
    SqlState,  // %e
    Stop,      // %q
    VirtXact,  // %i / %v
    Start,     // %s
    Xid,       // %x
}

impl Specifier {
    fn from_char(c: char) -> Result<Self, PrefixError> {
        Ok(match c {
            't' => Specifier::Timestamp,
            'm' => Specifier::Epoch,
            'p' => Specifier::Pid,
            'c' => Specifier::SessionId,
            'l' => Specifier::Line,
            'u' => Specifier::User,
            'd' => Specifier::Database,
            'r' => Specifier::Remote,
            'h' => Specifier::Host,
            'a' => Specifier::App,
            'e' => Specifier::SqlState,
            'q' => Specifier::Stop,
            'i' | 'v' => Specifier::VirtXact,
            's' => Specifier::Start,
            'x' => Specifier::Xid,
            other => return Err(PrefixError::UnknownSpecifier(other)),
        })
    }

    /// Non-capturing regex fragment for this field's semantic shape.
    fn shape(self) -> &'static str {
        match self {
            Specifier::Timestamp => r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}(?:\.\d+)?(?: \S+)?",
            Specifier::Epoch => r"\d+\.\d+",
            Specifier::Pid => r"\d+",
            Specifier::SessionId => r"[0-9a-f]+\.[0-9a-f]+",
            Specifier::Line => r"\d+",
            // `+` (not `*`): a genuine per-session line always carries a
            // non-empty value here, which is what lets the strict matcher
            // fail over to the cluster matcher for session-less notices
            // where these fields are emitted empty.
            Specifier::User | Specifier::Database => r"[^\[\],]+",
            Specifier::Remote | Specifier::Host | Specifier::App => r"\S+",
            Specifier::SqlState => r"[0-9A-Z]{5}",
            Specifier::Stop => "",
            Specifier::VirtXact | Specifier::Xid => r"[\d/]+",
            Specifier::Start => r"\S+",
        }
    }

    fn is_timestamp(self) -> bool {
        matches!(self, Specifier::Timestamp | Specifier::Epoch)
    }

    fn is_pid(self) -> bool {
        matches!(self, Specifier::Pid | Specifier::SessionId)
    }

    /// Fields stripped entirely from the cluster-notice matcher:
    /// they never appear on cluster-wide notices.
    fn stripped_for_cluster(self) -> bool {
        matches!(
            self,
            Specifier::User
                | Specifier::Database
                | Specifier::Remote
                | Specifier::Host
                | Specifier::VirtXact
                | Specifier::SessionId
                | Specifier::Line
                | Specifier::Start
                | Specifier::Xid
        )
    }
}

enum Token {
    Literal(String),
    Field(Specifier),
}

fn tokenize(format: &str) -> Result<Vec<Token>, PrefixError> {
    let mut tokens = Vec::new();
    let mut literal = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '%' {
            if let Some(&next) = chars.peek() {
                chars.next();
                if !literal.is_empty() {
                    tokens.push(Token::Literal(std::mem::take(&mut literal)));
                }
                tokens.push(Token::Field(Specifier::from_char(next)?));
                continue;
            }
        }
        literal.push(c);
    }
    if !literal.is_empty() {
        tokens.push(Token::Literal(literal));
    }
    Ok(tokens)
}

/// Build the strict matcher pattern. Substitutions happen in format order
/// (first timestamp field, then first pid field, then everything else) as a
/// single forward pass, so group order is always (whole, ts, pid) and an
/// earlier capture is never touched by a later substitution. When the
/// format has no timestamp or pid field, an empty capture is synthesized at
/// the front of `whole` to keep the group arity fixed at three.
fn build_strict_pattern(tokens: &[Token]) -> String {
    let mut ts_done = false;
    let mut pid_done = false;
    let mut body = String::new();
    for token in tokens {
        match token {
            Token::Literal(s) => body.push_str(&regex::escape(s)),
            Token::Field(spec) => {
                if spec.is_timestamp() && !ts_done {
                    body.push_str("(?P<ts>");
                    body.push_str(spec.shape());
                    body.push(')');
                    ts_done = true;
                } else if spec.is_pid() && !pid_done {
                    body.push_str("(?P<pid>");
                    body.push_str(spec.shape());
                    body.push(')');
                    pid_done = true;
                } else {
                    body.push_str(spec.shape());
                }
            }
        }
    }
    let ts_prefix = if ts_done { "" } else { "(?P<ts>)" };
    let pid_prefix = if pid_done { "" } else { "(?P<pid>)" };
    format!("^(?P<whole>{}{}{})", ts_prefix, pid_prefix, body)
}

fn build_cluster_pattern(tokens: &[Token]) -> String {
    let mut body = String::new();
    for token in tokens {
        match token {
            Token::Literal(s) => body.push_str(&regex::escape(s)),
            Token::Field(spec) => {
                if spec.stripped_for_cluster() {
                    continue;
                }
                body.push_str(spec.shape());
            }
        }
    }
    format!("^{}", body)
}

fn build_timestamp_only_pattern(tokens: &[Token]) -> String {
    let mut body = String::new();
    for token in tokens {
        match token {
            Token::Literal(s) => body.push_str(&regex::escape(s)),
            Token::Field(spec) => {
                if spec.is_timestamp() {
                    body.push_str(spec.shape());
                }
                // any other field, including the first non-timestamp one,
                // ends the pattern right after this point.
                return format!("^{}", body);
            }
        }
    }
    format!("^{}", body)
}

/// Compile a `log_line_prefix` format string into its three matchers.
///
/// `syslog` wraps the resulting patterns with a fixed framing that captures
/// the syslog timestamp, host, process name, pid, and the `[N-M]`
/// continuation counter.
pub fn compile(format: &str, syslog: bool) -> Result<PrefixMatchers, PrefixError> {
    let tokens = tokenize(format)?;
    let has_sqlstate = tokens
        .iter()
        .any(|t| matches!(t, Token::Field(Specifier::SqlState)));
    let strict_body = build_strict_pattern(&tokens);
    let cluster_body = build_cluster_pattern(&tokens);
    let ts_only_body = build_timestamp_only_pattern(&tokens);

    let (strict_pattern, cluster_pattern, ts_only_pattern) = if syslog {
        (
            wrap_syslog(&strict_body),
            wrap_syslog(&cluster_body),
            wrap_syslog(&ts_only_body),
        )
    } else {
        (strict_body, cluster_body, ts_only_body)
    };

    Ok(PrefixMatchers {
        strict: Regex::new(&strict_pattern)?,
        cluster: Regex::new(&cluster_pattern)?,
        timestamp_only: Regex::new(&ts_only_pattern)?,
        has_sqlstate,
    })
}

/// Syslog framing: `<date> <host> <process>[<pid>]: [<N>-<M>] <rest>`.
fn wrap_syslog(inner_anchored: &str) -> String {
    let inner = inner_anchored.trim_start_matches('^');
    format!(
        r"^(?P<syslog_ts>\S+\s+\d+\s+[\d:]+)\s+(?P<syslog_host>\S+)\s+(?P<syslog_proc>\S+?)\[(?P<syslog_pid>\d+)\]:\s+(?:\[(?P<seq_n>\d+)-(?P<seq_m>\d+)\]\s+)?{}",
        inner
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strict_matcher_always_has_three_named_groups() {
        let m = compile("no fields here", false).unwrap();
        assert!(m.strict.capture_names().any(|n| n == Some("whole")));
        assert!(m.strict.capture_names().any(|n| n == Some("ts")));
        assert!(m.strict.capture_names().any(|n| n == Some("pid")));
    }

    #[test]
    fn strict_matcher_extracts_timestamp_and_pid() {
        let m = compile("%t [%p]: ", false).unwrap();
        let line = "2024-01-02 03:04:05.678 UTC [12345]: LOG:  statement: select 1";
        let caps = m.strict.captures(line).unwrap();
        assert_eq!(&caps["ts"], "2024-01-02 03:04:05.678 UTC");
        assert_eq!(&caps["pid"], "12345");
        let rest = &line[caps.name("whole").unwrap().end()..];
        assert_eq!(rest, "LOG:  statement: select 1");
    }

    #[test]
    fn cluster_matcher_strips_session_fields() {
        let m = compile("%t [%p] user=%u db=%d ", false).unwrap();
        let line = "2024-01-02 03:04:05 UTC [12345] user= db= ";
        assert!(m.cluster.is_match(line));
    }

    #[test]
    fn timestamp_only_matcher_stops_at_first_field() {
        let m = compile("%t [%p]: ", false).unwrap();
        let line = "2024-01-02 03:04:05 UTC [999]: LOG:  duration: 1 ms";
        assert!(m.timestamp_only.is_match(line));
    }

    #[test]
    fn unknown_specifier_errors() {
        assert!(compile("%z", false).is_err());
    }

    #[test]
    fn has_sqlstate_tracks_the_e_specifier() {
        assert!(!compile("%t [%p]: ", false).unwrap().has_sqlstate);
        assert!(compile("%t [%p] %e: ", false).unwrap().has_sqlstate);
    }

    #[test]
    fn syslog_framing_wraps_inner_pattern() {
        let m = compile("%t [%p]: ", true).unwrap();
        let line = "Jan  2 03:04:05 dbhost postgres[555]: [1-1] 2024-01-02 03:04:05 UTC [12345]: LOG:  x";
        assert!(m.strict.is_match(line));
    }
}
