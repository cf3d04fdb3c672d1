use crate::config::Config;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Environment variable naming a YAML config file when `--config` is not given.
pub const CONFIG_PATH_ENV: &str = "GTFS_TRANSFORMER_CONFIG";

/// Loads an optional YAML config file, then applies environment overrides.
///
/// Without a file (and without `GTFS_TRANSFORMER_CONFIG`) the defaults are used,
/// so a bare deployment needs no configuration at all.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let path: Option<PathBuf> = match path {
        Some(p) => Some(p.to_path_buf()),
        None => std::env::var_os(CONFIG_PATH_ENV).map(PathBuf::from),
    };

    let mut config = match path {
        Some(path_ref) => {
            info!(config_path = ?path_ref, "Loading configuration from file");
            let content = match fs::read_to_string(&path_ref) {
                Ok(content) => content,
                Err(e) => {
                    error!(error = ?e, config_path = ?path_ref, "Failed to read config file");
                    return Err(anyhow::anyhow!(
                        "Failed to read config file {:?}: {}",
                        path_ref,
                        e
                    ));
                }
            };
            match parse_config(&content) {
                Ok(conf) => {
                    info!(config_path = ?path_ref, "Parsed config YAML successfully");
                    conf
                }
                Err(e) => {
                    error!(error = ?e, config_path = ?path_ref, "Failed to parse config YAML");
                    return Err(e);
                }
            }
        }
        None => {
            info!("No config file given, using defaults");
            Config::default()
        }
    };

    apply_env_overrides(&mut config)?;
    validate(&config)?;
    config.trace_loaded();
    Ok(config)
}

/// Parses YAML config text. An empty document yields the defaults.
pub fn parse_config(content: &str) -> Result<Config> {
    if content.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config YAML: {e}"))
}

/// Environment variables win over the file.
pub fn apply_env_overrides(config: &mut Config) -> Result<()> {
    if let Some(v) = env_var("DESTINATION_SUFFIX") {
        config.destination_suffix = v;
    }
    if let Some(v) = env_var("SCRIPT_SUFFIX") {
        config.script_suffix = v;
    }
    if let Some(v) = env_var("FAIL_ON_ERROR") {
        config.fail_on_error = parse_bool("FAIL_ON_ERROR", &v)?;
    }
    if let Some(v) = env_var("TRANSFORMER_COMMAND") {
        config.transformer.command = v.split_whitespace().map(str::to_string).collect();
    }
    if let Some(v) = env_var("TRANSFORMER_TIMEOUT_SECS") {
        let secs = v.parse::<u64>().map_err(|e| {
            error!(error = ?e, var = ?v, "TRANSFORMER_TIMEOUT_SECS must be a whole number of seconds");
            anyhow::anyhow!("TRANSFORMER_TIMEOUT_SECS must be a valid integer: {e}")
        })?;
        config.transformer.timeout_secs = Some(secs);
    }
    if let Some(v) = env_var("AWS_REGION") {
        config.store.region = Some(v);
    }
    if let Some(v) = env_var("S3_ENDPOINT_URL") {
        config.store.endpoint = Some(v);
    }
    if let Some(v) = env_var("S3_FORCE_PATH_STYLE") {
        config.store.force_path_style = parse_bool("S3_FORCE_PATH_STYLE", &v)?;
    }
    if let Some(v) = env_var("S3_ACCESS_KEY_ID") {
        config.store.access_key_id = Some(v);
    }
    if let Some(v) = env_var("S3_SECRET_ACCESS_KEY") {
        info!("S3_SECRET_ACCESS_KEY found in env");
        config.store.secret_access_key = Some(v);
    }
    if let Some(v) = env_var("WORK_DIR") {
        config.workspace.root = PathBuf::from(v);
    }
    Ok(())
}

fn validate(config: &Config) -> Result<()> {
    if config.transformer.command.is_empty() {
        error!("transformer.command is empty");
        anyhow::bail!("transformer.command must name a program");
    }
    if config.destination_suffix.is_empty() {
        error!("destination_suffix is empty");
        anyhow::bail!("destination_suffix must not be empty, results would overwrite the source");
    }
    if config.script_suffix.is_empty() {
        anyhow::bail!("script_suffix must not be empty");
    }
    Ok(())
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => {
            error!(var = name, value = other, "Expected a boolean");
            anyhow::bail!("{name} must be a boolean, got {other:?}")
        }
    }
}
