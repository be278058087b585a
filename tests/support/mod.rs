//! Recording container backend for tests that must not touch a Docker daemon.

#![allow(dead_code)]

use std::collections::HashSet;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::io::AsyncWrite;

use docker_inside::Error;
use docker_inside::docker::{
    Attachment, ContainerBackend, CreateRequest, ImageMetadata, OutputChunk,
};
use docker_inside::error::Result;
use docker_inside::identity::{GroupMembership, HostIdentity};
use docker_inside::image::ImageRef;

pub const CONTAINER_ID: &str = "c0ffee";

/// Backend that records every call and answers from canned state.
#[derive(Default)]
pub struct MockBackend {
    /// Images present locally, as `name:tag`.
    pub images: Mutex<HashSet<String>>,
    /// Images a pull makes available.
    pub pullable: HashSet<String>,
    /// Operation name that fails with an I/O error.
    pub fail_on: Option<&'static str>,
    pub metadata: ImageMetadata,
    pub stdout: Vec<u8>,
    pub exit_code: i64,
    /// Never return from `wait_container`.
    pub hang_wait: bool,
    pub calls: Mutex<Vec<&'static str>>,
    pub created: Mutex<Vec<CreateRequest>>,
    pub archives: Mutex<Vec<(String, Vec<u8>)>>,
    /// Set once the attach input has been shut down.
    pub stdin_closed: Arc<AtomicBool>,
}

/// Attach input that discards data and records shutdown.
pub struct RecordingInput(Arc<AtomicBool>);

impl AsyncWrite for RecordingInput {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        self.0.store(true, Ordering::SeqCst);
        Poll::Ready(Ok(()))
    }
}

impl MockBackend {
    pub fn with_image(image: &str) -> Self {
        let backend = Self::default();
        backend.images.lock().unwrap().insert(image.to_string());
        backend
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.lock().unwrap().clone()
    }

    pub fn stdin_closed(&self) -> bool {
        self.stdin_closed.load(Ordering::SeqCst)
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| **c == call).count()
    }

    fn record(&self, call: &'static str) -> Result<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_on == Some(call) {
            return Err(Error::Io(std::io::Error::other(format!("{} failed", call))));
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerBackend for MockBackend {
    async fn image_exists(&self, image: &ImageRef) -> Result<bool> {
        self.record("image_exists")?;
        Ok(self.images.lock().unwrap().contains(&image.full_name()))
    }

    async fn pull_image(&self, image: &ImageRef) -> Result<()> {
        self.record("pull")?;
        if self.pullable.contains(&image.full_name()) {
            self.images.lock().unwrap().insert(image.full_name());
        }
        Ok(())
    }

    async fn inspect_image(&self, _image: &ImageRef) -> Result<ImageMetadata> {
        self.record("inspect")?;
        Ok(self.metadata.clone())
    }

    async fn create_container(&self, request: &CreateRequest) -> Result<String> {
        self.record("create")?;
        self.created.lock().unwrap().push(request.clone());
        Ok(CONTAINER_ID.to_string())
    }

    async fn inject_archive(&self, _id: &str, path: &str, archive: Vec<u8>) -> Result<()> {
        self.record("inject")?;
        self.archives.lock().unwrap().push((path.to_string(), archive));
        Ok(())
    }

    async fn attach_container(&self, _id: &str) -> Result<Attachment> {
        self.record("attach")?;
        let chunks = if self.stdout.is_empty() {
            Vec::new()
        } else {
            vec![Ok(OutputChunk::Stdout(Bytes::from(self.stdout.clone())))]
        };
        Ok(Attachment {
            output: futures::stream::iter(chunks).boxed(),
            input: Box::pin(RecordingInput(self.stdin_closed.clone())),
        })
    }

    async fn start_container(&self, _id: &str) -> Result<()> {
        self.record("start")
    }

    async fn resize_tty(&self, _id: &str, _rows: u16, _cols: u16) -> Result<()> {
        self.record("resize")
    }

    async fn wait_container(&self, _id: &str) -> Result<i64> {
        self.record("wait")?;
        if self.hang_wait {
            std::future::pending::<()>().await;
        }
        Ok(self.exit_code)
    }

    async fn stop_container(&self, _id: &str) -> Result<()> {
        self.record("stop")
    }

    async fn remove_container(&self, _id: &str) -> Result<()> {
        self.record("remove")
    }
}

pub fn identity() -> HostIdentity {
    HostIdentity {
        uid: 1000,
        username: "alice".to_string(),
        gid: 1000,
        groupname: "alice".to_string(),
        supplementary_groups: vec![GroupMembership {
            name: "docker".to_string(),
            gid: 998,
        }],
    }
}
