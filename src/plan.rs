//! Turning run options into a validated plan and a creation request.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::bootstrap::{BOOTSTRAP_PATH, BootstrapOptions, HomeStrategy, build_bootstrap_env};
use crate::compose::{
    self, DeviceSpec, PortTable, VolumeSpec, merge_env, normalize_volume, parse_device,
    parse_size, tmpfs_list_to_map,
};
use crate::config::SU_EXEC_FILE;
use crate::docker::{CreateRequest, ImageMetadata};
use crate::error::{PathKind, Result};
use crate::identity::HostIdentity;
use crate::image::ImageRef;
use crate::relay::AttachMode;

/// X11 socket directory shared in GUI mode.
pub const X11_SOCKET_DIR: &str = "/tmp/.X11-unix";

/// Working directory selection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Workdir {
    /// The image's working directory.
    #[default]
    Image,
    /// A container path.
    Path(String),
    /// A host directory mounted at the same path and used as working directory.
    Mount(PathBuf),
}

/// Everything a user can ask of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub image: String,
    /// Command and arguments; empty runs the image's default command.
    pub command: Vec<String>,
    pub name: Option<String>,
    pub volumes: Vec<String>,
    pub home: HomeStrategy,
    pub auto_pull: bool,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub devices: Vec<String>,
    pub env: Vec<String>,
    pub ports: Vec<String>,
    pub tmpfs: Vec<String>,
    pub workdir: Workdir,
    pub shm_size: Option<String>,
    pub x11: bool,
    pub init: bool,
    pub switch_root: bool,
    pub verbose_bootstrap: bool,
    /// Attach mode; detected from the host terminal when unset.
    pub attach: Option<AttachMode>,
}

/// A validated run, ready to be turned into a [`CreateRequest`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunPlan {
    pub image: ImageRef,
    pub auto_pull: bool,
    pub name: Option<String>,
    pub command: Option<Vec<String>>,
    pub volumes: Vec<VolumeSpec>,
    pub ports: PortTable,
    pub tmpfs: HashMap<String, String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub devices: Vec<DeviceSpec>,
    pub working_dir: Option<String>,
    pub shm_size: Option<i64>,
    pub init: bool,
    pub user: Option<String>,
    pub env_args: Vec<String>,
    pub host_env: HashMap<String, String>,
    pub bootstrap: BootstrapOptions,
    pub identity: HostIdentity,
    pub su_exec: Option<PathBuf>,
    pub attach: AttachMode,
}

impl RunPlan {
    /// Validate `options` against the host and build the plan.
    ///
    /// Host paths are checked here, before anything is created.
    pub fn prepare(
        options: RunOptions,
        identity: HostIdentity,
        host_env: HashMap<String, String>,
        home: &Path,
        config_dir: &Path,
    ) -> Result<Self> {
        let image = ImageRef::parse(&options.image)?;
        let container_home = HomeStrategy::container_home(&identity.username);

        let mut volumes = Vec::new();
        for spec in &options.volumes {
            volumes.push(resolve_volume(normalize_volume(spec))?);
        }

        match &options.home {
            HomeStrategy::MountHome => {
                let host_home = compose::assert_path_exists(home, PathKind::Directory)?;
                volumes.push(VolumeSpec::new(
                    host_home.display().to_string(),
                    container_home.clone(),
                    "rw",
                ));
            }
            HomeStrategy::HomeDir(dir) => {
                let dir = compose::assert_path_exists(dir, PathKind::Directory)?;
                volumes.push(VolumeSpec::new(
                    dir.display().to_string(),
                    container_home.clone(),
                    "rw",
                ));
            }
            HomeStrategy::None | HomeStrategy::Temporary => {}
        }

        let working_dir = match &options.workdir {
            Workdir::Image => None,
            Workdir::Path(path) => Some(path.clone()),
            Workdir::Mount(dir) => {
                let dir = compose::assert_path_exists(dir, PathKind::Directory)?;
                let path = dir.display().to_string();
                volumes.push(VolumeSpec::new(path.clone(), path.clone(), "rw"));
                Some(path)
            }
        };

        let mut env_args = options.env.clone();
        if options.x11 {
            compose::assert_path_exists(X11_SOCKET_DIR, PathKind::Directory)?;
            volumes.push(VolumeSpec::new(X11_SOCKET_DIR, X11_SOCKET_DIR, "rw"));
            env_args.push("DISPLAY".to_string());
        }

        let shm_size = options.shm_size.as_deref().map(parse_size).transpose()?;

        let su_exec = Some(config_dir.join(SU_EXEC_FILE)).filter(|p| p.is_file());
        if su_exec.is_none() {
            tracing::debug!(
                config_dir = %config_dir.display(),
                "No su-exec helper, falling back to su"
            );
        }

        Ok(Self {
            image,
            auto_pull: options.auto_pull,
            name: options.name,
            command: (!options.command.is_empty()).then_some(options.command),
            volumes,
            ports: compose::build_port_table(&options.ports)?,
            tmpfs: tmpfs_list_to_map(&options.tmpfs),
            cap_add: options.cap_add,
            cap_drop: options.cap_drop,
            devices: options.devices.iter().map(|d| parse_device(d)).collect(),
            working_dir,
            shm_size,
            init: options.init,
            user: options.switch_root.then(|| "0".to_string()),
            env_args,
            host_env,
            bootstrap: BootstrapOptions {
                verbose: options.verbose_bootstrap,
                home: options.home,
            },
            identity,
            su_exec,
            attach: options.attach.unwrap_or_else(AttachMode::detect),
        })
    }

    /// The creation request for an image with `metadata`.
    pub fn create_request(&self, metadata: &ImageMetadata) -> CreateRequest {
        let mut env = merge_env(&self.env_args, &self.host_env, &metadata.env);
        build_bootstrap_env(&self.identity, metadata.entrypoint.as_deref(), &self.bootstrap)
            .apply(&mut env);

        CreateRequest {
            image: self.image.clone(),
            name: self.name.clone(),
            cmd: self.command.clone().or_else(|| metadata.cmd.clone()),
            entrypoint: Some(vec![BOOTSTRAP_PATH.to_string()]),
            env: compose::env_map_to_list(&env),
            binds: self.volumes.iter().map(VolumeSpec::to_bind).collect(),
            ports: self.ports.clone(),
            tmpfs: self.tmpfs.clone(),
            cap_add: self.cap_add.clone(),
            cap_drop: self.cap_drop.clone(),
            devices: self.devices.clone(),
            working_dir: self.working_dir.clone(),
            shm_size: self.shm_size,
            tty: self.attach.wants_tty(),
            open_stdin: true,
            init: self.init.then_some(true),
            user: self.user.clone(),
            network_mode: None,
        }
    }
}

/// Check and absolutize the host side of a bind mount; named volumes pass through.
fn resolve_volume(volume: VolumeSpec) -> Result<VolumeSpec> {
    if !volume.is_host_path() {
        return Ok(volume);
    }
    let host = compose::assert_path_exists(&volume.host_path, PathKind::Any)?;
    let container_path = if volume.container_path == volume.host_path {
        host.display().to_string()
    } else {
        volume.container_path
    };
    Ok(VolumeSpec::new(host.display().to_string(), container_path, volume.mode))
}
