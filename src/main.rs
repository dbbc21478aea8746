//! CLI entry point: parses options, initializes logging, and runs one
//! pass of the reporter.

use std::path::PathBuf;
use std::process;

use structopt::StructOpt;

use logcourier::config::ReportType;
use logcourier::logging::{self, LogSettings};
use logcourier::run::{self, RunOptions};

/// Incremental log-tailing reporter for database server logs.
#[derive(Debug, StructOpt)]
#[structopt(name = "logcourier")]
struct Opts {
    /// Path to the configuration file.
    config: PathBuf,

    /// Do not send mail or persist offsets; print what would be sent to stdout.
    #[structopt(long)]
    dryrun: bool,

    /// Forget all persisted offsets and last-seen files before this run.
    #[structopt(long)]
    reset: bool,

    /// Re-read this many extra bytes before the persisted offset, useful
    /// after editing a file by hand.
    #[structopt(long, default_value = "0")]
    rewind: u64,

    /// Pretend "now" is this far in the past, for testing time-templated
    /// file names (e.g. "2h", "30m").
    #[structopt(long, default_value = "0s")]
    timewarp: humantime::Duration,

    /// Override every file's persisted offset for this run.
    #[structopt(long)]
    setoffset: Option<u64>,

    /// Compile this log_line_prefix format string and print the derived
    /// strict/cluster/timestamp-only regexes, then exit without touching
    /// any log file.
    #[structopt(long)]
    testprefix: Option<String>,

    /// Force the report type for this run (normal, duration, tempfile).
    #[structopt(long)]
    report_type: Option<ReportType>,

    /// Minimum duration in milliseconds to report, for duration mode.
    #[structopt(long)]
    duration: Option<u64>,

    /// Minimum temp file size in bytes to report, for tempfile mode.
    #[structopt(long)]
    tempfile: Option<u64>,

    /// Send to these addresses instead of the configured EMAIL list.
    #[structopt(long = "mailto")]
    mail_override: Vec<String>,

    /// Regenerate the config's inherited RC defaults and exit.
    #[structopt(long)]
    makerc: bool,

    /// Increase verbosity; repeatable.
    #[structopt(short, long, parse(from_occurrences))]
    verbose: u64,

    /// Decrease verbosity; repeatable.
    #[structopt(short, long, parse(from_occurrences))]
    quiet: u64,

    /// Write logs to this file instead of stderr.
    #[structopt(short = "l", long = "log-file")]
    log_file: Option<PathBuf>,

    /// Override the log level for one target, as `target=level`; repeatable.
    #[structopt(short = "L", long = "log-module")]
    log_module: Vec<String>,
}

fn main() {
    let opts = Opts::from_args();
    let mut settings = LogSettings::from_verbosity(opts.verbose, opts.quiet);
    if let Some(path) = &opts.log_file {
        settings = settings.with_log_file(path.clone());
    }
    for raw in &opts.log_module {
        match logging::parse_module_override(raw) {
            Ok((target, level)) => settings = settings.with_module_override(target, level),
            Err(e) => {
                eprintln!("invalid --log-module {:?}: {}", raw, e);
                process::exit(2);
            }
        }
    }
    if let Err(e) = logging::init(&settings) {
        eprintln!("failed to initialize logging: {}", e);
        process::exit(2);
    }

    if opts.makerc {
        let mut cfg = match logcourier::config::rcfile::load_rc_defaults() {
            Ok(Some(cfg)) => cfg,
            Ok(None) => {
                log::info!("rc defaults disabled, nothing to show");
                process::exit(0);
            }
            Err(e) => {
                log::error!("{}", e);
                process::exit(1);
            }
        };
        if let Some(rt) = opts.report_type {
            cfg.report_type = rt;
        }
        if opts.duration.is_some() {
            cfg.duration = opts.duration;
        }
        if opts.tempfile.is_some() {
            cfg.tempfile = opts.tempfile;
        }
        if !opts.mail_override.is_empty() {
            cfg.mail.email = opts.mail_override.clone();
        }
        print!("{}", logcourier::config::rcfile::render(&cfg));
        process::exit(0);
    }

    if let Some(format) = &opts.testprefix {
        match logcourier::prefix::compile(format, false) {
            Ok(matchers) => {
                println!("strict:         {}", matchers.strict.as_str());
                println!("cluster:        {}", matchers.cluster.as_str());
                println!("timestamp-only: {}", matchers.timestamp_only.as_str());
                process::exit(0);
            }
            Err(e) => {
                log::error!("{}", e);
                process::exit(1);
            }
        }
    }

    let run_opts = RunOptions {
        config_path: opts.config,
        dry_run: opts.dryrun,
        reset: opts.reset,
        rewind: opts.rewind,
        timewarp_secs: -(opts.timewarp.as_secs() as i64),
        test_prefix: opts.testprefix,
        offset_override: opts.setoffset,
        report_type_override: opts.report_type,
        duration_override: opts.duration,
        tempfile_override: opts.tempfile,
        mail_override: opts.mail_override,
    };

    match run::run(&run_opts) {
        Ok(code) => process::exit(code),
        Err(e) => {
            log::error!("{}", e);
            process::exit(1);
        }
    }
}
