//! Docker engine access.
//!
//! Everything the orchestrator needs from the engine goes through the
//! [`ContainerBackend`] trait. [`DockerBackend`] implements it on top of
//! bollard; tests substitute a recording backend.

mod client;

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

use crate::compose::{DeviceSpec, EnvMap, PortTable};
use crate::error::Result;
use crate::image::ImageRef;

pub use client::{DockerBackend, connect_docker};

/// What the image declares about how to run it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageMetadata {
    pub entrypoint: Option<Vec<String>>,
    pub cmd: Option<Vec<String>>,
    pub env: EnvMap,
}

/// Everything needed to create one container.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateRequest {
    pub image: ImageRef,
    pub name: Option<String>,
    pub cmd: Option<Vec<String>>,
    pub entrypoint: Option<Vec<String>>,
    /// `KEY=VALUE` entries.
    pub env: Vec<String>,
    /// Docker bind strings `host:container:mode`.
    pub binds: Vec<String>,
    pub ports: PortTable,
    pub tmpfs: HashMap<String, String>,
    pub cap_add: Vec<String>,
    pub cap_drop: Vec<String>,
    pub devices: Vec<DeviceSpec>,
    pub working_dir: Option<String>,
    pub shm_size: Option<i64>,
    pub tty: bool,
    pub open_stdin: bool,
    pub init: Option<bool>,
    pub user: Option<String>,
    pub network_mode: Option<String>,
}

/// A chunk of container output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    Stdout(Bytes),
    Stderr(Bytes),
}

/// Streams of an attached container.
pub struct Attachment {
    pub output: BoxStream<'static, Result<OutputChunk>>,
    pub input: Pin<Box<dyn AsyncWrite + Send>>,
}

impl std::fmt::Debug for Attachment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachment").finish_non_exhaustive()
    }
}

/// Operations on the container engine.
#[async_trait]
pub trait ContainerBackend: Send + Sync {
    /// Whether `image` exists locally under exactly this `name:tag`.
    async fn image_exists(&self, image: &ImageRef) -> Result<bool>;

    /// Pull `image` from its registry.
    async fn pull_image(&self, image: &ImageRef) -> Result<()>;

    /// Entrypoint, command and environment the image declares.
    async fn inspect_image(&self, image: &ImageRef) -> Result<ImageMetadata>;

    /// Create a container and return its id.
    async fn create_container(&self, request: &CreateRequest) -> Result<String>;

    /// Extract a tar archive into the container filesystem at `path`.
    async fn inject_archive(&self, id: &str, path: &str, archive: Vec<u8>) -> Result<()>;

    /// Attach to stdin/stdout/stderr. Must be called before start to see all output.
    async fn attach_container(&self, id: &str) -> Result<Attachment>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Resize the container TTY.
    async fn resize_tty(&self, id: &str, rows: u16, cols: u16) -> Result<()>;

    /// Block until the container exits and return its status code.
    async fn wait_container(&self, id: &str) -> Result<i64>;

    /// Stop the container; stopping a stopped container succeeds.
    async fn stop_container(&self, id: &str) -> Result<()>;

    /// Remove the container; removing a missing container succeeds.
    async fn remove_container(&self, id: &str) -> Result<()>;
}
