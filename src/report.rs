//! Report Renderer: turns sorted clusters into one or more email
//! bodies, applying the per-report-type caps and splitting only at cluster
//! boundaries when a body would exceed `maxemailsize`.

use crate::aggregate::Cluster;
use crate::config::{Config, ReportType};

/// Context available to the subject template (`FILE`, `HOST`, `NUMBER`,
/// `UNIQUE`).
pub struct Context<'a> {
    pub file_label: &'a str,
    pub host: &'a str,
}

/// One chunk of the report, ready to hand to the mailer.
pub struct Chunk {
    pub subject: String,
    pub body: String,
}

const DEFAULT_SUBJECT: &str = "FILE log activity";

fn render_subject(template: &str, ctx: &Context, number: usize, total_chunks: usize, unique: usize) -> String {
    template
        .replace("FILE", ctx.file_label)
        .replace("HOST", ctx.host)
        .replace("NUMBER", &format!("{}/{}", number, total_chunks))
        .replace("UNIQUE", &unique.to_string())
}

fn truncate_statement(text: &str, limit: Option<usize>) -> String {
    match limit {
        Some(limit) if text.len() > limit => {
            let mut boundary = limit;
            while boundary > 0 && !text.is_char_boundary(boundary) {
                boundary -= 1;
            }
            let omitted = text.len() - boundary;
            format!("{}...\n[{} bytes omitted]", &text[..boundary], omitted)
        }
        _ => text.to_string(),
    }
}

fn render_block(index: usize, cluster: &Cluster, report_type: ReportType, statement_size: Option<usize>) -> String {
    let statement = truncate_statement(&cluster.raw_string, statement_size);
    match report_type {
        ReportType::Normal => format!(
            "[{}] occurred {} times, first at {}, last at {}\n{}\n",
            index,
            cluster.count(),
            cluster.first_time(),
            cluster.last_time(),
            statement
        ),
        ReportType::Duration => format!(
            "[{}] occurred {} times, total duration {:.1} ms, longest {:.1} ms\n{}\n",
            index,
            cluster.count(),
            cluster.total_duration_ms(),
            cluster.max_duration_ms(),
            statement
        ),
        ReportType::Tempfile => format!(
            "[{}] occurred {} times, smallest {} bytes, largest {} bytes, total {} bytes, mean {:.1} bytes\n{}\n",
            index,
            cluster.count(),
            cluster.min_filesize(),
            cluster.max_filesize(),
            cluster.total_filesize(),
            cluster.mean_filesize(),
            statement
        ),
    }
}

/// Render sorted clusters into one or more chunks. `duration_limit`/
/// `tempfile_limit` cap how many clusters are shown for their respective
/// report types; every omission is recorded as an explicit note, never a
/// silent truncation.
pub fn render(cfg: &Config, ctx: &Context, clusters: &[Cluster]) -> Vec<Chunk> {
    let unique = clusters.len();
    let limit = match cfg.report_type {
        ReportType::Duration => cfg.duration_limit,
        ReportType::Tempfile => cfg.tempfile_limit,
        ReportType::Normal => None,
    };
    let (shown, omitted) = match limit {
        Some(limit) if limit < clusters.len() => (&clusters[..limit], clusters.len() - limit),
        _ => (clusters, 0),
    };

    let mut blocks: Vec<String> = shown
        .iter()
        .enumerate()
        .map(|(i, c)| render_block(i + 1, c, cfg.report_type, cfg.statement_size))
        .collect();
    if omitted > 0 {
        blocks.push(format!("[{} additional clusters omitted by the configured limit]\n", omitted));
    }

    let maxsize = cfg.maxemailsize as usize;
    let mut bodies: Vec<String> = Vec::new();
    let mut current = String::new();
    for block in blocks {
        if !current.is_empty() && current.len() + block.len() > maxsize {
            bodies.push(std::mem::take(&mut current));
        }
        current.push_str(&block);
        current.push('\n');
    }
    if !current.is_empty() || bodies.is_empty() {
        bodies.push(current);
    }

    let subject_template = cfg.mail.subject.as_deref().unwrap_or(DEFAULT_SUBJECT);
    let total = bodies.len();
    bodies
        .into_iter()
        .enumerate()
        .map(|(i, body)| Chunk {
            subject: render_subject(subject_template, ctx, i + 1, total, unique),
            body,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::Occurrence;

    fn cluster(raw: &str, count: usize) -> Cluster {
        Cluster {
            raw_string: raw.to_string(),
            occurrences: (0..count)
                .map(|_| Occurrence {
                    pgtime: "2024-01-01".to_string(),
                    source_file: "f".to_string(),
                    source_line_number: None,
                    duration_ms: None,
                    filesize: None,
                })
                .collect(),
        }
    }

    #[test]
    fn single_chunk_under_maxemailsize() {
        let mut cfg = Config::new("t.conf");
        cfg.maxemailsize = 10_000;
        let clusters = vec![cluster("select 1", 3)];
        let ctx = Context { file_label: "pg.log", host: "db1" };
        let chunks = render(&cfg, &ctx, &clusters);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].body.contains("occurred 3 times"));
    }

    #[test]
    fn splits_only_at_cluster_boundaries_when_too_big() {
        let mut cfg = Config::new("t.conf");
        cfg.maxemailsize = 60;
        let clusters = vec![cluster("select one", 1), cluster("select two", 1)];
        let ctx = Context { file_label: "pg.log", host: "db1" };
        let chunks = render(&cfg, &ctx, &clusters);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.body.contains("select one") ^ chunk.body.contains("select two") || chunks.len() == 1);
        }
    }

    #[test]
    fn duration_limit_adds_explicit_omission_note() {
        let mut cfg = Config::new("t.conf");
        cfg.report_type = ReportType::Duration;
        cfg.duration_limit = Some(1);
        let clusters = vec![cluster("a", 1), cluster("b", 1), cluster("c", 1)];
        let ctx = Context { file_label: "pg.log", host: "db1" };
        let chunks = render(&cfg, &ctx, &clusters);
        let all_bodies: String = chunks.iter().map(|c| c.body.clone()).collect();
        assert!(all_bodies.contains("2 additional clusters omitted"));
    }

    #[test]
    fn tempfile_block_renders_smallest_and_mean() {
        let mut cfg = Config::new("t.conf");
        cfg.report_type = ReportType::Tempfile;
        let cluster = Cluster {
            raw_string: "statement: select 1".to_string(),
            occurrences: [1000u64, 3000, 2000]
                .iter()
                .map(|&size| Occurrence {
                    pgtime: "2024-01-01".to_string(),
                    source_file: "f".to_string(),
                    source_line_number: None,
                    duration_ms: None,
                    filesize: Some(size),
                })
                .collect(),
        };
        let ctx = Context { file_label: "pg.log", host: "db1" };
        let chunks = render(&cfg, &ctx, &[cluster]);
        let body = &chunks[0].body;
        assert!(body.contains("smallest 1000 bytes"));
        assert!(body.contains("largest 3000 bytes"));
        assert!(body.contains("total 6000 bytes"));
        assert!(body.contains("mean 2000.0 bytes"));
    }

    #[test]
    fn subject_template_substitution() {
        let mut cfg = Config::new("t.conf");
        cfg.mail.subject = Some("HOST: FILE has UNIQUE unique statements (NUMBER)".into());
        let clusters = vec![cluster("select 1", 1)];
        let ctx = Context { file_label: "pg.log", host: "db1" };
        let chunks = render(&cfg, &ctx, &clusters);
        assert_eq!(chunks[0].subject, "db1: pg.log has 1 unique statements (1/1)");
    }
}
