//! Configuration: Docker connection, host configuration directory and settings.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Name of the host configuration directory under `~/.config`.
pub const CONFIG_DIR_NAME: &str = "docker_inside";
/// File name of the pre-built privilege-drop helper in the configuration directory.
pub const SU_EXEC_FILE: &str = "su-exec";
/// File name of the optional settings file in the configuration directory.
pub const SETTINGS_FILE: &str = "settings.json";
/// Environment variable overriding the configuration directory.
pub const CONFIG_DIR_ENV: &str = "DIN_CONFIG_DIR";

/// How to reach the Docker daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DockerClientConfig {
    /// Local socket, or whatever `DOCKER_HOST` points at without TLS.
    Local,
    /// TLS-verified remote daemon.
    Tls { host: String, cert_path: PathBuf },
}

impl DockerClientConfig {
    /// Build from `DOCKER_TLS_VERIFY`, `DOCKER_HOST` and `DOCKER_CERT_PATH`.
    ///
    /// TLS is used only when all three are set.
    pub fn from_env(env: &HashMap<String, String>) -> Self {
        let tls_verify = env.get("DOCKER_TLS_VERIFY");
        let host = env.get("DOCKER_HOST");
        let cert_path = env.get("DOCKER_CERT_PATH");
        match (tls_verify, host, cert_path) {
            (Some(verify), Some(host), Some(cert_path)) if !verify.is_empty() && verify != "0" => {
                tracing::debug!(
                    tls_verify = %verify,
                    host = %host,
                    cert_path = %cert_path,
                    "Found TLS docker configuration"
                );
                DockerClientConfig::Tls {
                    host: host.clone(),
                    cert_path: PathBuf::from(cert_path),
                }
            }
            _ => DockerClientConfig::Local,
        }
    }
}

/// Host configuration directory, `~/.config/docker_inside` unless overridden.
pub fn config_dir(env: &HashMap<String, String>) -> PathBuf {
    if let Some(dir) = env.get(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    config_dir_for_home(&home_dir())
}

/// Configuration directory below a given home directory.
pub fn config_dir_for_home(home: &Path) -> PathBuf {
    home.join(".config").join(CONFIG_DIR_NAME)
}

/// Home directory of the invoking user.
pub fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

/// Snapshot of the process environment.
pub fn host_env() -> HashMap<String, String> {
    std::env::vars().collect()
}

/// Defaults loaded from `settings.json` in the configuration directory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Pull missing images without `--auto-pull`.
    pub auto_pull: bool,
    /// Volumes added to every run, in `-v` syntax.
    pub volumes: Vec<String>,
    /// Environment entries added to every run, in `-e` syntax.
    pub env: Vec<String>,
}

impl Settings {
    /// Load settings from `dir`, falling back to defaults.
    pub fn load(dir: &Path) -> Self {
        Self::load_from(&dir.join(SETTINGS_FILE))
    }

    /// Load settings from a file; a missing or malformed file yields defaults.
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Ignoring malformed settings"
                    );
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_local_when_tls_incomplete() {
        assert_eq!(DockerClientConfig::from_env(&env(&[])), DockerClientConfig::Local);
        assert_eq!(
            DockerClientConfig::from_env(&env(&[
                ("DOCKER_TLS_VERIFY", "1"),
                ("DOCKER_HOST", "tcp://10.0.0.1:2376"),
            ])),
            DockerClientConfig::Local
        );
        assert_eq!(
            DockerClientConfig::from_env(&env(&[
                ("DOCKER_TLS_VERIFY", "0"),
                ("DOCKER_HOST", "tcp://10.0.0.1:2376"),
                ("DOCKER_CERT_PATH", "/certs"),
            ])),
            DockerClientConfig::Local
        );
    }

    #[test]
    fn test_tls_from_env() {
        let config = DockerClientConfig::from_env(&env(&[
            ("DOCKER_TLS_VERIFY", "1"),
            ("DOCKER_HOST", "tcp://10.0.0.1:2376"),
            ("DOCKER_CERT_PATH", "/certs"),
        ]));
        assert_eq!(
            config,
            DockerClientConfig::Tls {
                host: "tcp://10.0.0.1:2376".to_string(),
                cert_path: PathBuf::from("/certs"),
            }
        );
    }

    #[test]
    fn test_config_dir_override() {
        assert_eq!(
            config_dir(&env(&[(CONFIG_DIR_ENV, "/tmp/din")])),
            PathBuf::from("/tmp/din")
        );
        assert_eq!(
            config_dir_for_home(Path::new("/home/alice")),
            PathBuf::from("/home/alice/.config/docker_inside")
        );
    }

    #[test]
    fn test_settings_load() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(Settings::load(dir.path()), Settings::default());

        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            r#"{"auto_pull": true, "volumes": ["/data:/data:ro"]}"#,
        )
        .unwrap();
        let settings = Settings::load(dir.path());
        assert!(settings.auto_pull);
        assert_eq!(settings.volumes, vec!["/data:/data:ro".to_string()]);
        assert!(settings.env.is_empty());
    }

    #[test]
    fn test_malformed_settings_fall_back() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(SETTINGS_FILE), "{not json").unwrap();
        assert_eq!(Settings::load(dir.path()), Settings::default());
    }
}
