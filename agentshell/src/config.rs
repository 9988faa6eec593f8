//! Ambient configuration layer: typed defaults, overridable by an
//! `agentshell.toml` file and then by environment variables, following
//! VTCode's config-layer convention scaled down to this system's surface.

use std::path::PathBuf;

use serde::Deserialize;

const CONFIG_FILE_NAME: &str = "agentshell.toml";
const ENV_REGISTRY_HOST: &str = "AGENTSHELL_REGISTRY_HOST";
const ENV_REGISTRY_PORT: &str = "AGENTSHELL_REGISTRY_PORT";
const ENV_IN_CONTAINER: &str = "AGENTSHELL_IN_CONTAINER";
const ENV_LOG: &str = "AGENTSHELL_LOG";

#[derive(Debug, Clone, Deserialize, Default)]
struct FileConfig {
    registry_host: Option<String>,
    registry_port: Option<u16>,
    scan_port_start: Option<u16>,
    scan_port_end: Option<u16>,
    tool_call_timeout_secs: Option<f64>,
    command_timeout_secs: Option<f64>,
}

/// Resolved configuration for one process run.
#[derive(Debug, Clone)]
pub struct Config {
    pub registry_host: Option<String>,
    pub registry_port: Option<u16>,
    pub scan_range: std::ops::RangeInclusive<u16>,
    pub in_container: bool,
    pub tool_call_timeout: std::time::Duration,
    pub command_timeout: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry_host: None,
            registry_port: None,
            scan_range: 8080..=8090,
            in_container: false,
            tool_call_timeout: std::time::Duration::from_secs(30),
            command_timeout: std::time::Duration::from_secs(30),
        }
    }
}

impl Config {
    /// Loads `agentshell.toml` from the current directory or the XDG config
    /// dir if present, then applies environment overrides on top.
    pub fn load() -> Self {
        let mut config = Config::default();

        if let Some(file) = find_config_file() {
            if let Ok(contents) = std::fs::read_to_string(&file) {
                match toml::from_str::<FileConfig>(&contents) {
                    Ok(parsed) => config.apply_file(parsed),
                    Err(err) => {
                        tracing::warn!(path = %file.display(), error = %err, "ignoring malformed config file");
                    }
                }
            }
        }

        config.apply_env();
        config
    }

    fn apply_file(&mut self, file: FileConfig) {
        if let Some(host) = file.registry_host {
            self.registry_host = Some(host);
        }
        if let Some(port) = file.registry_port {
            self.registry_port = Some(port);
        }
        if let (Some(start), Some(end)) = (file.scan_port_start, file.scan_port_end) {
            self.scan_range = start..=end;
        }
        if let Some(secs) = file.tool_call_timeout_secs {
            self.tool_call_timeout = std::time::Duration::from_secs_f64(secs);
        }
        if let Some(secs) = file.command_timeout_secs {
            self.command_timeout = std::time::Duration::from_secs_f64(secs);
        }
    }

    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var(ENV_REGISTRY_HOST) {
            self.registry_host = Some(host);
        }
        if let Ok(port) = std::env::var(ENV_REGISTRY_PORT) {
            if let Ok(port) = port.parse() {
                self.registry_port = Some(port);
            }
        }
        if let Ok(flag) = std::env::var(ENV_IN_CONTAINER) {
            self.in_container = flag == "1";
        } else {
            self.in_container = std::path::Path::new("/.dockerenv").exists();
        }
    }
}

fn find_config_file() -> Option<PathBuf> {
    let cwd_candidate = PathBuf::from(CONFIG_FILE_NAME);
    if cwd_candidate.exists() {
        return Some(cwd_candidate);
    }
    dirs::config_dir().map(|dir| dir.join("agentshell").join(CONFIG_FILE_NAME))
        .filter(|p| p.exists())
}

/// Reads `AGENTSHELL_LOG` for the `tracing-subscriber` env filter, falling
/// back to `info` when unset.
pub fn log_filter() -> String {
    std::env::var(ENV_LOG).unwrap_or_else(|_| "info".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_timeouts() {
        let config = Config::default();
        assert_eq!(config.tool_call_timeout, std::time::Duration::from_secs(30));
        assert_eq!(config.command_timeout, std::time::Duration::from_secs(30));
    }

    #[test]
    fn file_config_overrides_scan_range_only_when_both_bounds_present() {
        let mut config = Config::default();
        config.apply_file(FileConfig {
            registry_host: Some("example.test".to_string()),
            registry_port: None,
            scan_port_start: Some(9000),
            scan_port_end: Some(9010),
            tool_call_timeout_secs: None,
            command_timeout_secs: None,
        });
        assert_eq!(config.registry_host.as_deref(), Some("example.test"));
        assert_eq!(config.scan_range, 9000..=9010);
    }
}
