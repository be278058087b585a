//! Lifecycle of a single container.

use std::fmt;

use tracing::Instrument;

use crate::docker::{Attachment, ContainerBackend, CreateRequest};
use crate::error::{Error, Result};
use crate::relay::{self, AttachMode};

/// Archive extraction target for injected payloads.
pub const INJECT_PATH: &str = "/";

/// Where a container is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Unstarted,
    Created,
    Running,
    Exited(i64),
    Removed,
    /// An engine operation failed; only cleanup is allowed.
    Failed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Unstarted => write!(f, "unstarted"),
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited(code) => write!(f, "exited({})", code),
            ContainerState::Removed => write!(f, "removed"),
            ContainerState::Failed => write!(f, "failed"),
        }
    }
}

/// Result of running a container to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitOutcome {
    pub status_code: i64,
    /// Stdout collected in [`AttachMode::Capture`].
    pub captured: Option<Vec<u8>>,
}

/// Owns one container from creation to removal.
///
/// Operations are only valid in the states the lifecycle allows
///
/// ```text
/// Unstarted -> Created -> Running -> Exited -> Removed
///                  \          \
///                   `-> Failed `-> Failed -> Removed
/// ```
///
/// [`cleanup`](Self::cleanup) may be called from any state, any number of
/// times, and removes the container exactly once.
pub struct ContainerSession<'a, B: ContainerBackend + ?Sized> {
    backend: &'a B,
    handle: Option<String>,
    state: ContainerState,
    span: tracing::Span,
}

impl<'a, B: ContainerBackend + ?Sized> ContainerSession<'a, B> {
    pub fn new(backend: &'a B, image: &str) -> Self {
        Self {
            backend,
            handle: None,
            state: ContainerState::Unstarted,
            span: tracing::debug_span!("container", image = %image),
        }
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// Engine id, once created and until removed.
    pub fn container_id(&self) -> Option<&str> {
        self.handle.as_deref()
    }

    fn invalid(&self, operation: &str) -> Error {
        Error::InvalidContainerState {
            operation: operation.to_string(),
            state: self.state.to_string(),
        }
    }

    /// The id, if the session is in one of `allowed`.
    fn require(&self, operation: &str, allowed: &[ContainerState]) -> Result<String> {
        match &self.handle {
            Some(id) if allowed.contains(&self.state) => Ok(id.clone()),
            _ => Err(self.invalid(operation)),
        }
    }

    fn failed<T>(&mut self, err: Error) -> Result<T> {
        self.state = ContainerState::Failed;
        Err(err)
    }

    pub async fn create(&mut self, request: &CreateRequest) -> Result<()> {
        if self.state != ContainerState::Unstarted {
            return Err(self.invalid("create"));
        }
        match self
            .backend
            .create_container(request)
            .instrument(self.span.clone())
            .await
        {
            Ok(id) => {
                self.span.in_scope(|| tracing::debug!(id = %id, "Created container"));
                self.handle = Some(id);
                self.state = ContainerState::Created;
                Ok(())
            }
            Err(e) => self.failed(e),
        }
    }

    /// Extract `archive` at the container root. Only before start.
    pub async fn inject(&mut self, archive: Vec<u8>) -> Result<()> {
        let id = self.require("inject into", &[ContainerState::Created])?;
        let size = archive.len();
        match self
            .backend
            .inject_archive(&id, INJECT_PATH, archive)
            .instrument(self.span.clone())
            .await
        {
            Ok(()) => {
                self.span.in_scope(|| tracing::debug!(bytes = size, "Injected payload"));
                Ok(())
            }
            Err(e) => self.failed(e),
        }
    }

    /// Attach and start. The attachment is taken before start so no output is lost.
    pub async fn start(&mut self, mode: AttachMode) -> Result<Attachment> {
        let id = self.require("start", &[ContainerState::Created])?;
        let started = async {
            let attachment = self.backend.attach_container(&id).await?;
            self.backend.start_container(&id).await?;
            Ok::<_, Error>(attachment)
        }
        .instrument(self.span.clone())
        .await;

        let attachment = match started {
            Ok(attachment) => attachment,
            Err(e) => return self.failed(e),
        };
        self.state = ContainerState::Running;

        if mode.wants_tty() {
            if let Some((rows, cols)) = relay::terminal_size() {
                if let Err(e) = self.backend.resize_tty(&id, rows, cols).await {
                    self.span
                        .in_scope(|| tracing::warn!(error = %e, "Cannot resize container TTY"));
                }
            }
        }
        Ok(attachment)
    }

    /// Relay the attachment and wait for the container to exit.
    pub async fn wait(&mut self, attachment: Attachment, mode: AttachMode) -> Result<ExitOutcome> {
        let id = self.require("wait for", &[ContainerState::Running])?;
        let (relayed, status) = tokio::join!(
            relay::relay(attachment, mode),
            self.backend.wait_container(&id).instrument(self.span.clone())
        );

        let status_code = match status {
            Ok(code) => code,
            Err(e) => return self.failed(e),
        };
        self.state = ContainerState::Exited(status_code);
        self.span.in_scope(|| tracing::debug!(status_code, "Container exited"));

        let captured = match relayed {
            Ok(captured) => captured,
            Err(e) => {
                self.span
                    .in_scope(|| tracing::warn!(error = %e, "Output relay ended with an error"));
                None
            }
        };
        Ok(ExitOutcome {
            status_code,
            captured,
        })
    }

    /// Stop a live container.
    pub async fn stop(&mut self) -> Result<()> {
        let id = self.require(
            "stop",
            &[
                ContainerState::Created,
                ContainerState::Running,
                ContainerState::Failed,
            ],
        )?;
        self.backend
            .stop_container(&id)
            .instrument(self.span.clone())
            .await
    }

    /// Remove the container if one was created. Errors are logged, not returned.
    pub async fn cleanup(&mut self) {
        let Some(id) = self.handle.take() else {
            return;
        };
        let span = self.span.clone();
        async {
            if self.state == ContainerState::Running {
                if let Err(e) = self.backend.stop_container(&id).await {
                    tracing::warn!(error = %e, "Cannot stop container");
                }
            }
            match self.backend.remove_container(&id).await {
                Ok(()) => tracing::debug!(id = %id, "Removed container"),
                Err(e) => tracing::warn!(id = %id, error = %e, "Cannot remove container"),
            }
        }
        .instrument(span)
        .await;
        self.state = ContainerState::Removed;
    }
}

impl<B: ContainerBackend + ?Sized> Drop for ContainerSession<'_, B> {
    fn drop(&mut self) {
        if let Some(id) = &self.handle {
            tracing::warn!(id = %id, "Container session dropped without cleanup");
        }
    }
}
