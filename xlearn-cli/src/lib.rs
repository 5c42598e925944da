//! Shared scaffolding for `xlearn-train` and `xlearn-predict`: the `fern`
//! logging dispatcher and the pre-flight file checks from
//! `original_source/src/solver/checker.cc` (SPEC_FULL.md §10.2, §11 item 4).
//! Nothing in the `xlearn` library crate configures a logger or touches the
//! filesystem on the CLI's behalf — both live here instead.

use std::fs;
use std::path::Path;

use chrono::Local;
use log::LevelFilter;
use xlearn::error::ConfigError;
use xlearn::XLearnError;

/// Install a `fern` dispatcher that mirrors `level`-and-above to stderr
/// (unless `quiet`), and, when `prefix` is given, additionally writes each
/// of INFO/WARN/ERROR to its own file named
/// `<prefix>.<host>.<user>.<YYYYMMDD-HHMMSS>.<pid>.{INFO,WARN,ERROR}`
/// (spec.md §6).
pub fn init_logging(level: LevelFilter, prefix: Option<&Path>, quiet: bool) -> eyre::Result<()> {
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level);

    if !quiet {
        dispatch = dispatch.chain(std::io::stderr());
    }

    if let Some(prefix) = prefix {
        for (suffix, threshold) in [("INFO", LevelFilter::Info), ("WARN", LevelFilter::Warn), ("ERROR", LevelFilter::Error)] {
            let path = log_file_path(prefix, suffix);
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            let file = fern::log_file(&path)?;
            dispatch = dispatch.chain(fern::Dispatch::new().level(threshold).chain(file));
        }
    }

    dispatch.apply()?;
    Ok(())
}

fn log_file_path(prefix: &Path, suffix: &str) -> std::path::PathBuf {
    let stamp = Local::now().format("%Y%m%d-%H%M%S");
    let host = hostname();
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    let pid = std::process::id();
    let mut s = prefix.as_os_str().to_owned();
    s.push(format!(".{host}.{user}.{stamp}.{pid}.{suffix}"));
    std::path::PathBuf::from(s)
}

fn hostname() -> String {
    fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

/// `solver/checker.cc`'s file-existence pre-flight (SPEC_FULL.md §11 item 4).
pub fn check_input_file(path: &Path) -> Result<(), XLearnError> {
    if !path.is_file() {
        return Err(ConfigError::MissingFile(path.to_path_buf()).into());
    }
    Ok(())
}

/// Same check, surfaced as the validation-file variant of
/// [`ConfigError`] when the CLI is told the file is optional.
pub fn check_validation_file(path: &Path) -> Result<(), XLearnError> {
    if !path.is_file() {
        return Err(ConfigError::MissingValidationFile(path.to_path_buf()).into());
    }
    Ok(())
}

/// Checks the parent directory of an output path exists and is a
/// directory, surfacing a Configuration error instead of failing mid-epoch
/// when the model checkpoint write fails at the very end of training.
pub fn check_output_dir(path: &Path) -> Result<(), XLearnError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    if !dir.is_dir() {
        return Err(ConfigError::UnwritableOutput(path.to_path_buf()).into());
    }
    Ok(())
}
