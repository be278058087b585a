//! One-time build of the `su-exec` helper into the host configuration directory.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::compose::{EnvMap, env_map_to_list, volume_args_to_binds};
use crate::config::{self, SU_EXEC_FILE};
use crate::docker::{ContainerBackend, CreateRequest};
use crate::error::Result;
use crate::image::{ImageRef, ensure_image};
use crate::orchestrator::{DockerInside, ExitOutcome, shutdown_signal};
use crate::payload::{PayloadEntry, pack_files};
use crate::relay::AttachMode;

pub const DEFAULT_SU_EXEC_URL: &str = "https://github.com/ncopa/su-exec.git";
pub const DEFAULT_REFSPEC: &str = "master";
/// Image the helper is compiled in. musl makes the static binary portable.
pub const SETUP_IMAGE_NAME: &str = "alpine";
pub const SETUP_IMAGE_TAG: &str = "3.19";
/// Container mount point of the configuration directory.
pub const CONFIG_MOUNT: &str = "/din_config";
pub const SETUP_ARCHIVE_PATH: &str = "din_setup.sh";
pub const SETUP_PATH: &str = "/din_setup.sh";
/// Host proxy variables forwarded to the build.
pub const PASSED_HOST_ENV: [&str; 5] = [
    "http_proxy",
    "https_proxy",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "HTTP_PROXY_AUTH",
];

/// Build script run inside the setup container.
pub const SETUP_SCRIPT: &[u8] = br#"#!/bin/sh

set -e
apk add --no-cache git musl-dev gcc

cd /tmp
git clone -b "${DIN_REFSPEC}" "${DIN_SU_EXEC_URL}" su-exec
cd su-exec

gcc -static su-exec.c -o su-exec
cp -v su-exec /din_config/
chown "${DIN_UID}:${DIN_GID}" /din_config/su-exec
"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetupOptions {
    pub url: String,
    pub refspec: Option<String>,
    /// Home directory whose configuration directory receives the helper.
    pub home: Option<PathBuf>,
    pub name: Option<String>,
    pub auto_pull: bool,
    pub host_network: bool,
}

impl Default for SetupOptions {
    fn default() -> Self {
        Self {
            url: DEFAULT_SU_EXEC_URL.to_string(),
            refspec: None,
            home: None,
            name: None,
            auto_pull: false,
            host_network: false,
        }
    }
}

pub fn setup_image() -> ImageRef {
    ImageRef::new(SETUP_IMAGE_NAME, SETUP_IMAGE_TAG)
}

/// Configuration directory the helper is written to.
pub fn target_dir(options: &SetupOptions, host_env: &HashMap<String, String>) -> PathBuf {
    match &options.home {
        Some(home) => config::config_dir_for_home(home),
        None => config::config_dir(host_env),
    }
}

/// Creation request for the setup container.
pub fn setup_request(
    options: &SetupOptions,
    uid: u32,
    gid: u32,
    config_dir: &Path,
    host_env: &HashMap<String, String>,
) -> CreateRequest {
    let mut env = EnvMap::new();
    env.insert("DIN_UID".to_string(), uid.to_string());
    env.insert("DIN_GID".to_string(), gid.to_string());
    env.insert("DIN_SU_EXEC_URL".to_string(), options.url.clone());
    env.insert(
        "DIN_REFSPEC".to_string(),
        options
            .refspec
            .clone()
            .unwrap_or_else(|| DEFAULT_REFSPEC.to_string()),
    );
    for name in PASSED_HOST_ENV {
        if let Some(value) = host_env.get(name) {
            env.insert(name.to_string(), value.clone());
        }
    }

    CreateRequest {
        image: setup_image(),
        name: options.name.clone(),
        cmd: Some(vec![SETUP_PATH.to_string()]),
        env: env_map_to_list(&env),
        binds: volume_args_to_binds(&[format!("{}:{}", config_dir.display(), CONFIG_MOUNT)]),
        open_stdin: false,
        network_mode: options.host_network.then(|| "host".to_string()),
        ..Default::default()
    }
}

pub fn setup_payload() -> Result<Vec<u8>> {
    let mut entries = BTreeMap::new();
    entries.insert(
        SETUP_ARCHIVE_PATH.to_string(),
        PayloadEntry::bytes(SETUP_SCRIPT, 0o755),
    );
    pack_files(&entries)
}

/// Build and install `su-exec`, returning the build's exit status.
pub async fn run_setup<B: ContainerBackend>(
    app: &DockerInside<B>,
    options: &SetupOptions,
    uid: u32,
    gid: u32,
    host_env: &HashMap<String, String>,
) -> Result<ExitOutcome> {
    run_setup_until(app, options, uid, gid, host_env, shutdown_signal()).await
}

pub async fn run_setup_until<B, F>(
    app: &DockerInside<B>,
    options: &SetupOptions,
    uid: u32,
    gid: u32,
    host_env: &HashMap<String, String>,
    shutdown: F,
) -> Result<ExitOutcome>
where
    B: ContainerBackend,
    F: Future<Output = ()>,
{
    let image = setup_image();
    ensure_image(app.backend(), &image, options.auto_pull).await?;

    let config_dir = target_dir(options, host_env);
    std::fs::create_dir_all(&config_dir)?;
    tracing::debug!(config_dir = %config_dir.display(), "Configuration directory (host)");
    tracing::debug!(
        network = if options.host_network { "host" } else { "default" },
        "Network mode"
    );

    let request = setup_request(options, uid, gid, &config_dir, host_env);
    let outcome = app
        .execute_until(&request, setup_payload()?, AttachMode::Log, shutdown)
        .await?;

    tracing::info!(status_code = outcome.status_code, "setup returned");
    if outcome.status_code == 0 {
        tracing::info!(path = %config_dir.join(SU_EXEC_FILE).display(), "Installed su-exec");
    }
    Ok(outcome)
}
