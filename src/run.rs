//! Top-level orchestration: wires the configuration model, file
//! resolver, line reader/assembler, filter pipeline, canonicalizer,
//! aggregator, report renderer, mailer, and offset persistence into one
//! run. Per-file errors are recoverable and become warnings; a mail
//! transport failure is fatal and blocks offset persistence so the next
//! run retries the same window.

use std::path::{Path, PathBuf};

use chrono::Utc;
use either::Either;
use failure::Error;

use crate::aggregate::Aggregator;
use crate::config::{self, Config, FileEntry, ReportType};
use crate::csv_log;
use crate::filter::{self, FilterSet};
use crate::mailer::{DryRunTransport, Mailer, Message, SendmailTransport};
use crate::prefix;
use crate::reader::{self, Assembler, LogRecord};
use crate::report;

/// Parsed CLI overrides layered on top of the config file.
#[derive(Default)]
pub struct RunOptions {
    pub config_path: PathBuf,
    pub dry_run: bool,
    pub reset: bool,
    pub rewind: u64,
    pub timewarp_secs: i64,
    pub test_prefix: Option<String>,
    pub offset_override: Option<u64>,
    pub report_type_override: Option<ReportType>,
    pub duration_override: Option<u64>,
    pub tempfile_override: Option<u64>,
    pub mail_override: Vec<String>,
}

fn is_csv(path: &Path) -> bool {
    path.extension().map(|e| e.eq_ignore_ascii_case("csv")).unwrap_or(false)
}

/// Drive the assembler/CSV backend over one file and feed every closed
/// record through the filter pipeline into `aggregator`.
fn process_file(
    path: &Path,
    entry: &mut FileEntry,
    cfg: &Config,
    filters: &FilterSet,
    log_line_prefix: &str,
    rewind: u64,
    offset_overridden: bool,
    aggregator: &mut Aggregator,
) -> Result<(), Error> {
    let persisted_offset = if entry.last_path == path.to_string_lossy().as_ref() { entry.offset } else { 0 };
    let open = reader::open_for_reading(
        path,
        persisted_offset,
        cfg.maxsize,
        rewind,
        offset_overridden,
        cfg.find_line_number,
    )?;
    if let Some(note) = &open.too_large_note {
        log::warn!("{}", note);
    }

    let mut file = open.file;
    let batch = reader::read_lines(&mut file, open.start_offset)?;

    let mut closed_records: Vec<LogRecord> = Vec::new();
    if is_csv(path) {
        for (i, line) in batch.lines.iter().enumerate() {
            if line.is_empty() {
                continue;
            }
            match csv_log::to_record(line, &path.to_string_lossy(), i as u64 + 1) {
                Ok(Some(record)) => closed_records.push(record),
                Ok(None) => {}
                Err(e) => log::warn!("skipping unparseable csv row in {}: {}", path.display(), e),
            }
        }
    } else {
        let matchers = prefix::compile(log_line_prefix, false)?;
        let mut assembler = Assembler::new(matchers, false, false);
        for (i, line) in batch.lines.iter().enumerate() {
            if let Some(record) = assembler.process_line(line, i as u64 + 1, &path.to_string_lossy()) {
                closed_records.push(record);
            }
        }
        closed_records.extend(assembler.drain());
    }

    for record in closed_records {
        match filter::apply(
            filters,
            &record,
            cfg.report_type,
            cfg.duration,
            cfg.tempfile,
        ) {
            filter::Verdict::Drop => {}
            filter::Verdict::Pass { body, duration_ms, filesize } => {
                aggregator.add(&record.pgtime, &record.source_file, record.source_line_number, &body, duration_ms, filesize);
            }
        }
    }

    entry.latest_path = Some(path.to_string_lossy().into_owned());
    entry.latest_offset = Some(batch.new_offset);
    Ok(())
}

fn apply_overrides(cfg: &mut Config, opts: &RunOptions) {
    if let Some(prefix) = &opts.test_prefix {
        cfg.log_line_prefix = prefix.clone();
    }
    if let Some(rt) = opts.report_type_override {
        cfg.report_type = rt;
    }
    if opts.duration_override.is_some() {
        cfg.duration = opts.duration_override;
    }
    if opts.tempfile_override.is_some() {
        cfg.tempfile = opts.tempfile_override;
    }
    if !opts.mail_override.is_empty() {
        cfg.mail.email = opts.mail_override.clone();
    }
    if opts.reset {
        for entry in cfg.files.iter_mut() {
            entry.offset = 0;
            entry.last_path.clear();
        }
    }
    if let Some(offset) = opts.offset_override {
        for entry in cfg.files.iter_mut() {
            entry.offset = offset;
        }
    }
}

/// Load inherited configs (`INHERIT`) and fold their file entries in,
/// marked so offset persistence never rewrites them into this file.
fn load_inherited(cfg: &mut Config) -> Result<(), Error> {
    let config_dir = cfg.path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
    let binary_dir = std::env::current_exe()
        .ok()
        .and_then(|p| p.parent().map(|p| p.to_path_buf()))
        .unwrap_or_else(|| PathBuf::from("."));

    for name in cfg.inherit.clone() {
        let candidate = config::parser::inherit_search_paths(&name, &config_dir, &binary_dir)
            .into_iter()
            .find(|p| p.is_file());
        let path = match candidate {
            Some(p) => p,
            None => return Err(crate::error::ConfigError::InheritNotFound(name).into()),
        };
        let (mut inherited, _doc) = config::parser::load(&path)?;
        for entry in inherited.files.iter_mut() {
            entry.inherited = true;
        }
        cfg.files.extend(inherited.files);
    }
    Ok(())
}

/// Run once. Returns the process exit code.
pub fn run(opts: &RunOptions) -> Result<i32, Error> {
    let (mut cfg, mut doc) = config::parser::load(&opts.config_path)?;
    load_inherited(&mut cfg)?;
    if let Ok(Some(defaults)) = config::rcfile::load_rc_defaults() {
        config::rcfile::apply_defaults(&mut cfg, &defaults);
    }
    apply_overrides(&mut cfg, opts);
    cfg.renumber()?;

    let filters = FilterSet::compile(&cfg.filters)?;
    let mut aggregator = Aggregator::new(cfg.report_type);
    let host = hostname();
    let offset_overridden = opts.offset_override.is_some() || opts.reset;

    for entry in cfg.files.iter_mut() {
        if entry.inherited {
            continue;
        }
        let paths = crate::resolver::resolve(entry, Utc::now(), opts.timewarp_secs)?;
        for path in &paths {
            if let Err(e) = process_file(
                path,
                entry,
                &cfg,
                &filters,
                &cfg.log_line_prefix,
                opts.rewind,
                offset_overridden,
                &mut aggregator,
            ) {
                log::warn!("skipping {}: {}", path.display(), e);
            }
        }
    }

    if aggregator.is_empty() && !cfg.mail.mailzero {
        log::info!("no matching records this run, nothing to send");
    } else {
        let ctx = report::Context {
            file_label: cfg.files.first().map(|f| f.template.as_str()).unwrap_or(""),
            host: &host,
        };
        let clusters = aggregator.into_sorted(cfg.sortby);
        let chunks = report::render(&cfg, &ctx, &clusters);

        let mailer: Either<SendmailTransport, DryRunTransport> =
            if opts.dry_run { Either::Right(DryRunTransport::default()) } else { Either::Left(SendmailTransport::default()) };
        let from = cfg.mail.from.clone().unwrap_or_else(|| format!("logcourier@{}", host));

        for chunk in &chunks {
            let message = Message { from: &from, to: &cfg.mail.email, subject: &chunk.subject, body: &chunk.body };
            mailer.send(&message)?;
        }
    }

    if !opts.dry_run || opts.reset {
        let changed = config::rewrite::apply_updates(&mut cfg, &mut doc)?;
        if changed {
            let text = config::rewrite::render(&doc);
            config::rewrite::write_atomic(&cfg.path, &text)?;
        }
    }

    Ok(0)
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}
