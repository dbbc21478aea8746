//! Logging setup: a `fern::Dispatch` over the `log` facade, in the same
//! spirit as the logging helper this crate grew out of - a single base
//! level, optional per-module overrides, one line per record to stderr.

use std::str::FromStr;

use chrono::Local;
use failure::Error;
use fern::Dispatch;
use log::LevelFilter;

use crate::error::LogError;

/// Resolved logging settings for one run, built from the base verbosity
/// plus the `--verbose`/`--quiet` repeat-count flags and any
/// `--log-module target=level` overrides.
pub struct LogSettings {
    pub level: LevelFilter,
    pub per_module: Vec<(String, LevelFilter)>,
    pub log_file: Option<std::path::PathBuf>,
}

impl LogSettings {
    /// `base` is `Info` by default; each `-v` raises it one step, each `-q`
    /// lowers it one step, floor `Error`, ceiling `Trace`.
    pub fn from_verbosity(verbose: u64, quiet: u64) -> Self {
        let levels = [
            LevelFilter::Error,
            LevelFilter::Warn,
            LevelFilter::Info,
            LevelFilter::Debug,
            LevelFilter::Trace,
        ];
        let base_index = 2i64; // Info
        let shift = verbose as i64 - quiet as i64;
        let index = (base_index + shift).clamp(0, levels.len() as i64 - 1) as usize;
        LogSettings { level: levels[index], per_module: Vec::new(), log_file: None }
    }

    pub fn with_module_override(mut self, target: impl Into<String>, level: LevelFilter) -> Self {
        self.per_module.push((target.into(), level));
        self
    }

    pub fn with_log_file(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.log_file = Some(path.into());
        self
    }
}

/// Parse one `--log-module target=level` argument.
pub fn parse_module_override(raw: &str) -> Result<(String, LevelFilter), Error> {
    let (target, level) = raw
        .split_once('=')
        .ok_or_else(|| LogError::MissingEquals(raw.to_string()))?;
    let level = LevelFilter::from_str(level)
        .map_err(|_| LogError::UnknownLevel(level.to_string()))?;
    Ok((target.to_string(), level))
}

/// Install the global logger. Call once, as early in `main` as possible.
pub fn init(settings: &LogSettings) -> Result<(), Error> {
    let mut dispatch = Dispatch::new().level(settings.level).format(|out, message, record| {
        out.finish(format_args!(
            "{} {:5} {:30} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            record.level(),
            record.target(),
            message,
        ))
    });
    for (module, level) in &settings.per_module {
        dispatch = dispatch.level_for(module.clone(), *level);
    }
    match &settings.log_file {
        Some(path) => dispatch.chain(fern::log_file(path)?).apply()?,
        None => dispatch.chain(std::io::stderr()).apply()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_shifts_around_info() {
        assert_eq!(LogSettings::from_verbosity(0, 0).level, LevelFilter::Info);
        assert_eq!(LogSettings::from_verbosity(1, 0).level, LevelFilter::Debug);
        assert_eq!(LogSettings::from_verbosity(0, 1).level, LevelFilter::Warn);
        assert_eq!(LogSettings::from_verbosity(0, 10).level, LevelFilter::Error);
        assert_eq!(LogSettings::from_verbosity(10, 0).level, LevelFilter::Trace);
    }

    #[test]
    fn module_override_parses_target_and_level() {
        let (target, level) = parse_module_override("logcourier::reader=debug").unwrap();
        assert_eq!(target, "logcourier::reader");
        assert_eq!(level, LevelFilter::Debug);
    }

    #[test]
    fn module_override_rejects_missing_equals() {
        assert!(parse_module_override("logcourier::reader").is_err());
    }
}
