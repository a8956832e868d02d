//! INI parsing for `ConfigFile`.
//!
//! The single place where INI key names are mapped to struct fields.
//! Out-of-range values are rejected, never clamped.

use super::file::ConfigFileError;
use super::settings::ConfigFile;
use crate::scheduler::MIN_POLL_INTERVAL_MS;
use ini::{Ini, Properties};
use std::path::PathBuf;
use std::str::FromStr;

/// Parse an `Ini` object into a `ConfigFile`.
///
/// Starts from `ConfigFile::default()` and overlays any values found.
pub(super) fn parse_ini(ini: &Ini) -> Result<ConfigFile, ConfigFileError> {
    let mut config = ConfigFile::default();

    // [scheduler] section
    if let Some(section) = ini.section(Some("scheduler")) {
        let s = &mut config.scheduler;
        if let Some(v) = parse_at_least(section, "poll_interval_ms", MIN_POLL_INTERVAL_MS)? {
            s.poll_interval_ms = v;
        }
        if let Some(v) = section.get("compiler_strategy") {
            s.compiler_strategy =
                parse_choice(v, "compiler_strategy", "must be 'serial' or 'pooled'")?;
        }
        if let Some(v) = parse_at_least(section, "compiler_pool_size", 1)? {
            s.compiler_pool_size = v;
        }
        if let Some(v) = section.get("executor_strategy") {
            s.executor_strategy =
                parse_choice(v, "executor_strategy", "must be 'serial' or 'bounded'")?;
        }
        if let Some(v) = parse_at_least(section, "max_concurrent_runs", 1)? {
            s.max_concurrent_runs = v;
        }
        if let Some(v) = parse_at_least(section, "interrupt_grace_ms", 0)? {
            s.interrupt_grace_ms = v;
        }
        if let Some(v) = parse_at_least(section, "shutdown_timeout_secs", 1)? {
            s.shutdown_timeout_secs = v;
        }
    }

    // [workspace] section
    if let Some(section) = ini.section(Some("workspace")) {
        if let Some(v) = section.get("root") {
            let v = v.trim();
            if !v.is_empty() {
                config.workspace.root = expand_tilde(v);
            }
        }
    }

    // [logging] section
    if let Some(section) = ini.section(Some("logging")) {
        if let Some(v) = section.get("directory") {
            let v = v.trim();
            if !v.is_empty() {
                config.logging.directory = expand_tilde(v);
            }
        }
        if let Some(v) = section.get("file") {
            let v = v.trim();
            if v.is_empty() || v.contains(['/', '\\']) {
                return Err(invalid("logging", "file", v, "must be a plain file name"));
            }
            config.logging.file = v.to_string();
        }
    }

    Ok(config)
}

fn invalid(section: &str, key: &str, value: &str, reason: &str) -> ConfigFileError {
    ConfigFileError::InvalidValue {
        section: section.to_string(),
        key: key.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Parses an integer `[scheduler]` key that must be at least `min`.
fn parse_at_least<T>(
    section: &Properties,
    key: &str,
    min: T,
) -> Result<Option<T>, ConfigFileError>
where
    T: FromStr + PartialOrd + std::fmt::Display + Copy,
{
    let Some(raw) = section.get(key) else {
        return Ok(None);
    };
    let value: T = raw
        .trim()
        .parse()
        .map_err(|_| invalid("scheduler", key, raw, "must be a non-negative integer"))?;
    if value < min {
        return Err(invalid(
            "scheduler",
            key,
            raw,
            &format!("must be at least {}", min),
        ));
    }
    Ok(Some(value))
}

fn parse_choice<T: FromStr>(raw: &str, key: &str, reason: &str) -> Result<T, ConfigFileError> {
    raw.parse()
        .map_err(|_| invalid("scheduler", key, raw, reason))
}

/// Expand ~ to home directory in paths.
pub(super) fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
