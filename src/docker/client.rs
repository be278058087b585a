//! bollard-backed [`ContainerBackend`].

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions, LogOutput,
    RemoveContainerOptions, ResizeContainerTtyOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{DeviceMapping, HostConfig, PortBinding};
use futures::StreamExt;

use super::{Attachment, ContainerBackend, CreateRequest, ImageMetadata, OutputChunk};
use crate::compose::env_list_to_map;
use crate::config::DockerClientConfig;
use crate::error::{Error, Result};
use crate::image::ImageRef;

/// Seconds the engine waits for a graceful stop before killing.
const STOP_TIMEOUT_SECS: i64 = 2;
/// Client request timeout, in seconds.
const CLIENT_TIMEOUT_SECS: u64 = 120;

/// Connect to the Docker daemon described by `config`.
pub async fn connect_docker(config: &DockerClientConfig) -> Result<Docker> {
    let docker = match config {
        DockerClientConfig::Local => {
            tracing::debug!("Use local docker installation");
            Docker::connect_with_local_defaults()?
        }
        DockerClientConfig::Tls { host, cert_path } => {
            tracing::debug!(host = %host, cert_path = %cert_path.display(), "Use TLS docker host");
            Docker::connect_with_ssl(
                host,
                &cert_path.join("key.pem"),
                &cert_path.join("cert.pem"),
                &cert_path.join("ca.pem"),
                CLIENT_TIMEOUT_SECS,
                bollard::API_DEFAULT_VERSION,
            )?
        }
    };

    docker.ping().await.map_err(|e| Error::Config {
        reason: format!("Docker daemon not reachable: {}", e),
    })?;
    Ok(docker)
}

/// Docker engine backend.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    docker: Docker,
}

impl DockerBackend {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connect using `config` and wrap the client.
    pub async fn connect(config: &DockerClientConfig) -> Result<Self> {
        Ok(Self::new(connect_docker(config).await?))
    }
}

fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn container_config(request: &CreateRequest) -> Config<String> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = request
        .ports
        .iter()
        .map(|(port, binding)| {
            (
                port.clone(),
                Some(vec![PortBinding {
                    host_ip: binding.host_ip().map(String::from),
                    host_port: Some(binding.host_port().to_string()),
                }]),
            )
        })
        .collect();
    let exposed_ports: HashMap<String, HashMap<(), ()>> = request
        .ports
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();
    let devices: Vec<DeviceMapping> = request
        .devices
        .iter()
        .map(|d| DeviceMapping {
            path_on_host: Some(d.host_path.clone()),
            path_in_container: Some(d.container_path.clone()),
            cgroup_permissions: Some(d.permissions.clone()),
        })
        .collect();

    let host_config = HostConfig {
        binds: Some(request.binds.clone()),
        port_bindings: (!port_bindings.is_empty()).then_some(port_bindings),
        tmpfs: (!request.tmpfs.is_empty()).then(|| request.tmpfs.clone()),
        cap_add: (!request.cap_add.is_empty()).then(|| request.cap_add.clone()),
        cap_drop: (!request.cap_drop.is_empty()).then(|| request.cap_drop.clone()),
        devices: (!devices.is_empty()).then_some(devices),
        shm_size: request.shm_size,
        init: request.init,
        network_mode: request.network_mode.clone(),
        ..Default::default()
    };

    Config {
        image: Some(request.image.full_name()),
        cmd: request.cmd.clone(),
        entrypoint: request.entrypoint.clone(),
        env: Some(request.env.clone()),
        working_dir: request.working_dir.clone(),
        user: request.user.clone(),
        tty: Some(request.tty),
        open_stdin: Some(request.open_stdin),
        attach_stdin: Some(request.open_stdin),
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        exposed_ports: (!exposed_ports.is_empty()).then_some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerBackend for DockerBackend {
    async fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        match self.docker.inspect_image(&image.full_name()).await {
            Ok(_) => Ok(true),
            Err(e) if is_status(&e, 404) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn pull_image(&self, image: &ImageRef) -> Result<()> {
        let options = CreateImageOptions {
            from_image: image.name.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);
        while let Some(info) = progress.next().await {
            let info = info?;
            if let Some(status) = info.status {
                tracing::debug!(image = %image, progress = ?info.progress, "{}", status);
            }
        }
        Ok(())
    }

    async fn inspect_image(&self, image: &ImageRef) -> Result<ImageMetadata> {
        let inspect = self.docker.inspect_image(&image.full_name()).await?;
        let config = inspect.config.unwrap_or_default();
        Ok(ImageMetadata {
            entrypoint: config.entrypoint.filter(|e| !e.is_empty()),
            cmd: config.cmd.filter(|c| !c.is_empty()),
            env: env_list_to_map(&config.env.unwrap_or_default()),
        })
    }

    async fn create_container(&self, request: &CreateRequest) -> Result<String> {
        let options = request.name.as_ref().map(|name| CreateContainerOptions {
            name: name.clone(),
            platform: None,
        });
        let response = self
            .docker
            .create_container(options, container_config(request))
            .await?;
        for warning in &response.warnings {
            tracing::warn!(container = %response.id, "{}", warning);
        }
        Ok(response.id)
    }

    async fn inject_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        let options = UploadToContainerOptions {
            path: path.to_string(),
            ..Default::default()
        };
        self.docker
            .upload_to_container(id, Some(options), archive.into())
            .await?;
        Ok(())
    }

    async fn attach_container(&self, id: &str) -> Result<Attachment> {
        let options = AttachContainerOptions::<String> {
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            stream: Some(true),
            logs: Some(true),
            detach_keys: None,
        };
        let AttachContainerResults { output, input } =
            self.docker.attach_container(id, Some(options)).await?;
        let output = output
            .filter_map(|item| async move {
                match item {
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        Some(Ok(OutputChunk::Stdout(message)))
                    }
                    Ok(LogOutput::StdErr { message }) => Some(Ok(OutputChunk::Stderr(message))),
                    Ok(LogOutput::StdIn { .. }) => None,
                    Err(e) => Some(Err(Error::from(e))),
                }
            })
            .boxed();
        Ok(Attachment { output, input })
    }

    async fn start_container(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn resize_tty(&self, id: &str, rows: u16, cols: u16) -> Result<()> {
        self.docker
            .resize_container_tty(
                id,
                ResizeContainerTtyOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str) -> Result<i64> {
        let mut responses = self
            .docker
            .wait_container(id, None::<WaitContainerOptions<String>>);
        let mut status_code = None;
        while let Some(response) = responses.next().await {
            match response {
                Ok(response) => status_code = Some(response.status_code),
                // bollard reports a non-zero exit as an error carrying the code.
                Err(BollardError::DockerContainerWaitError { code, .. }) => {
                    status_code = Some(code)
                }
                Err(e) => return Err(e.into()),
            }
        }
        status_code.ok_or_else(|| Error::InvalidContainerState {
            operation: "wait for".to_string(),
            state: "unknown (no exit status reported)".to_string(),
        })
    }

    async fn stop_container(&self, id: &str) -> Result<()> {
        let options = StopContainerOptions {
            t: STOP_TIMEOUT_SECS,
        };
        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            // 304: already stopped
            Err(e) if is_status(&e, 304) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove_container(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compose::{DeviceSpec, HostBinding, PortTable};

    fn request() -> CreateRequest {
        let mut ports = PortTable::new();
        ports.insert("8080/udp".to_string(), HostBinding::Address("1.2.3.4".into(), 80));
        ports.insert("9001/tcp".to_string(), HostBinding::Port(9001));
        CreateRequest {
            image: ImageRef::new("alpine", "3.19"),
            cmd: Some(vec!["echo".into(), "hello".into()]),
            entrypoint: Some(vec!["/din_entrypoint.sh".into()]),
            env: vec!["DIN_UID=1000".into()],
            binds: vec!["/src:/src:rw".into()],
            ports,
            cap_add: vec!["SYS_PTRACE".into()],
            devices: vec![DeviceSpec {
                host_path: "/dev/fuse".into(),
                container_path: "/dev/fuse".into(),
                permissions: "rwm".into(),
            }],
            shm_size: Some(64 * 1024 * 1024),
            open_stdin: true,
            user: Some("0".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_container_config_maps_request() {
        let config = container_config(&request());
        assert_eq!(config.image.as_deref(), Some("alpine:3.19"));
        assert_eq!(config.entrypoint, Some(vec!["/din_entrypoint.sh".to_string()]));
        assert_eq!(config.tty, Some(false));
        assert_eq!(config.open_stdin, Some(true));
        assert_eq!(config.user.as_deref(), Some("0"));

        let exposed = config.exposed_ports.unwrap();
        assert!(exposed.contains_key("8080/udp"));
        assert!(exposed.contains_key("9001/tcp"));

        let host = config.host_config.unwrap();
        assert_eq!(host.binds, Some(vec!["/src:/src:rw".to_string()]));
        assert_eq!(host.shm_size, Some(64 * 1024 * 1024));
        assert!(host.cap_drop.is_none());
        assert!(host.tmpfs.is_none());

        let bindings = host.port_bindings.unwrap();
        let udp = bindings["8080/udp"].as_ref().unwrap();
        assert_eq!(udp[0].host_ip.as_deref(), Some("1.2.3.4"));
        assert_eq!(udp[0].host_port.as_deref(), Some("80"));
        let tcp = bindings["9001/tcp"].as_ref().unwrap();
        assert!(tcp[0].host_ip.is_none());
        assert_eq!(tcp[0].host_port.as_deref(), Some("9001"));

        let devices = host.devices.unwrap();
        assert_eq!(devices[0].path_in_container.as_deref(), Some("/dev/fuse"));
    }

    #[test]
    fn test_container_config_without_ports() {
        let config = container_config(&CreateRequest::default());
        assert!(config.exposed_ports.is_none());
        assert!(config.host_config.unwrap().port_bindings.is_none());
    }
}
