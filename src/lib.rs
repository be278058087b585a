//! docker-inside: run Docker images as the invoking host user.
//!
//! A run resolves the host identity, composes a container request from the
//! command line, injects a bootstrap script that provisions a matching user
//! and group, and relays the container's I/O until it exits. The container is
//! always removed afterwards.

pub mod bootstrap;
pub mod cli;
pub mod compose;
pub mod config;
pub mod docker;
pub mod error;
pub mod identity;
pub mod image;
pub mod logging;
pub mod orchestrator;
pub mod payload;
pub mod plan;
pub mod relay;
pub mod setup;

pub use error::{Error, Result};
pub use orchestrator::{ContainerSession, ContainerState, DockerInside, ExitOutcome};
pub use plan::{RunOptions, RunPlan};
