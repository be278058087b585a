//! Running an image as the invoking host user.
//!
//! ```text
//!   RunPlan ──► ensure_image ──► inspect_image ──► CreateRequest
//!                                                      │
//!                         ┌────────────────────────────┘
//!                         ▼
//!   ContainerSession: create ─► inject payload ─► attach + start ─► relay + wait
//!                         │                                            │
//!                         └──────────── cleanup (always) ◄─────────────┘
//! ```
//!
//! The session body races a termination signal; whichever way it ends, the
//! container is removed before the run returns.

mod session;

use std::future::Future;

use crate::docker::{ContainerBackend, CreateRequest};
use crate::error::{Error, Result};
use crate::image::ensure_image;
use crate::payload;
use crate::plan::RunPlan;
use crate::relay::AttachMode;

pub use session::{ContainerSession, ContainerState, ExitOutcome, INJECT_PATH};

/// Exit code when `din` itself fails before or around the container.
pub const EXIT_ORCHESTRATION_FAILURE: i32 = 125;
/// Exit code after a termination signal.
pub const EXIT_INTERRUPTED: i32 = 130;

/// Map a container status code to a process exit code.
pub fn exit_code(status_code: i64) -> i32 {
    i32::try_from(status_code).unwrap_or(EXIT_ORCHESTRATION_FAILURE)
}

/// Exit code for a failed run.
pub fn error_exit_code(err: &Error) -> i32 {
    match err {
        Error::Interrupted => EXIT_INTERRUPTED,
        _ => EXIT_ORCHESTRATION_FAILURE,
    }
}

/// Completes on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::warn!("Termination signal received, cleaning up");
}

/// Runs containers through a [`ContainerBackend`].
pub struct DockerInside<B: ContainerBackend> {
    backend: B,
}

impl<B: ContainerBackend> DockerInside<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `plan` until the container exits or the process is signalled.
    pub async fn run(&self, plan: &RunPlan) -> Result<ExitOutcome> {
        self.run_until(plan, shutdown_signal()).await
    }

    /// Run `plan`, treating completion of `shutdown` as an interruption.
    pub async fn run_until<F>(&self, plan: &RunPlan, shutdown: F) -> Result<ExitOutcome>
    where
        F: Future<Output = ()>,
    {
        ensure_image(&self.backend, &plan.image, plan.auto_pull).await?;
        let metadata = self.backend.inspect_image(&plan.image).await?;
        let request = plan.create_request(&metadata);
        let archive = payload::run_payload(plan.su_exec.as_deref())?;
        tracing::debug!(
            image = %plan.image,
            cmd = ?request.cmd,
            binds = ?request.binds,
            tty = request.tty,
            "Running container"
        );
        self.execute_until(&request, archive, plan.attach, shutdown)
            .await
    }

    /// Create a container from `request`, inject `archive`, run it and remove it.
    pub async fn execute_until<F>(
        &self,
        request: &CreateRequest,
        archive: Vec<u8>,
        mode: AttachMode,
        shutdown: F,
    ) -> Result<ExitOutcome>
    where
        F: Future<Output = ()>,
    {
        let mut session = ContainerSession::new(&self.backend, &request.image.full_name());
        let result = tokio::select! {
            result = drive(&mut session, request, archive, mode) => result,
            _ = shutdown => Err(Error::Interrupted),
        };
        if let Err(e) = &result {
            tracing::debug!(state = %session.state(), error = %e, "Run failed");
        }
        session.cleanup().await;
        result
    }
}

async fn drive<B: ContainerBackend + ?Sized>(
    session: &mut ContainerSession<'_, B>,
    request: &CreateRequest,
    archive: Vec<u8>,
    mode: AttachMode,
) -> Result<ExitOutcome> {
    session.create(request).await?;
    session.inject(archive).await?;
    let attachment = session.start(mode).await?;
    session.wait(attachment, mode).await
}
