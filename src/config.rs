#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_COOKIES_FILE: &str = "cookies.txt";
pub const DEFAULT_DOWNLOAD_SUBDIR: &str = "mediagrab_downloads";
pub const DEFAULT_RETENTION_SECS: u64 = 3600;
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;

/// Everything the service needs to know at startup. Built once and shared for
/// the lifetime of the process.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub download_dir: PathBuf,
    pub host: String,
    pub port: u16,
    pub tool_path: Option<PathBuf>,
    pub cookies_file: PathBuf,
    pub retention: Duration,
    pub sweep_interval: Duration,
    pub max_concurrent: Option<usize>,
}

/// Values supplied on the command line. They win over the environment and the
/// `.env` file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub download_dir: Option<PathBuf>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tool_path: Option<PathBuf>,
    pub cookies_file: Option<PathBuf>,
    pub max_concurrent: Option<usize>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_service_config(overrides: ConfigOverrides) -> Result<ServiceConfig> {
    let env_path = overrides
        .env_path
        .as_deref()
        .unwrap_or_else(|| Path::new(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(env_path)?;
    Ok(build_service_config_with_overrides(
        &file_vars,
        env_var_string,
        overrides,
    ))
}

#[cfg(test)]
fn build_service_config(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> ServiceConfig {
    build_service_config_with_overrides(file_vars, env_lookup, ConfigOverrides::default())
}

fn build_service_config_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: ConfigOverrides,
) -> ServiceConfig {
    let download_dir = overrides
        .download_dir
        .or_else(|| {
            lookup_value("MEDIAGRAB_DOWNLOAD_DIR", file_vars, &env_lookup).map(PathBuf::from)
        })
        .unwrap_or_else(|| env::temp_dir().join(DEFAULT_DOWNLOAD_SUBDIR));
    let host = overrides
        .host
        .and_then(|value| {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        })
        .or_else(|| lookup_value("MEDIAGRAB_HOST", file_vars, &env_lookup))
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = overrides
        .port
        .or_else(|| lookup_parsed("MEDIAGRAB_PORT", file_vars, &env_lookup))
        .or_else(|| lookup_parsed("PORT", file_vars, &env_lookup))
        .unwrap_or(DEFAULT_PORT);
    let tool_path = overrides
        .tool_path
        .or_else(|| lookup_value("YTDLP_PATH", file_vars, &env_lookup).map(PathBuf::from));
    let cookies_file = overrides
        .cookies_file
        .or_else(|| lookup_value("MEDIAGRAB_COOKIES", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_COOKIES_FILE));
    let retention = lookup_parsed::<u64>("MEDIAGRAB_RETENTION_SECS", file_vars, &env_lookup)
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_RETENTION_SECS);
    let sweep_interval =
        lookup_parsed::<u64>("MEDIAGRAB_SWEEP_INTERVAL_SECS", file_vars, &env_lookup)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS);
    let max_concurrent = overrides
        .max_concurrent
        .or_else(|| lookup_parsed("MEDIAGRAB_MAX_CONCURRENT", file_vars, &env_lookup))
        .filter(|limit| *limit > 0);

    ServiceConfig {
        download_dir,
        host,
        port,
        tool_path,
        cookies_file,
        retention: Duration::from_secs(retention),
        sweep_interval: Duration::from_secs(sweep_interval),
        max_concurrent,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key)
        .or_else(|| file_vars.get(key).cloned())
        .filter(|value| !value.trim().is_empty())
}

fn lookup_parsed<T: std::str::FromStr>(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<T> {
    lookup_value(key, file_vars, env_lookup).and_then(|value| value.trim().parse::<T>().ok())
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
