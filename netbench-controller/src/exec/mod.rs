//! Command execution inside a host's isolated context
//!
//! The orchestration core only sees the [`HostExecutor`] trait:
//! - run a command on a host and capture its output, with an optional timeout
//! - start a detached command on a host and get a [`BackgroundProcess`] back
//!
//! How a host's execution context is found is an adapter concern:
//! [`MnexecExecutor`] enters Mininet host namespaces, [`LocalExecutor`] runs
//! everything on the controller machine for development.

mod local;
mod mnexec;
mod process;

pub use local::LocalExecutor;
pub use mnexec::MnexecExecutor;
pub use process::GroupProcess;

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Captured result of a foreground command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("host not found: {0}")]
    HostNotFound(String),
    #[error("empty command line")]
    EmptyCommand,
    #[error("invalid command wrapper: {0}")]
    InvalidWrapper(String),
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Detached process started with [`HostExecutor::spawn_detached`]
#[async_trait]
pub trait BackgroundProcess: Send {
    /// OS identifier, when known
    fn id(&self) -> Option<u32>;

    /// Non-blocking liveness check
    fn is_running(&mut self) -> bool;

    /// Graceful termination request (SIGTERM to the process group)
    fn terminate(&mut self) -> Result<(), ExecError>;

    /// Forced termination (SIGKILL to the process group)
    fn kill(&mut self) -> Result<(), ExecError>;

    /// Waits up to `timeout` for the process to exit; true if it did
    async fn wait_for_exit(&mut self, timeout: Duration) -> bool;
}

#[async_trait]
pub trait HostExecutor: Send + Sync {
    /// Runs `argv` on `host` and captures stdout/stderr/exit code.
    /// A non-zero exit code is not an error.
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError>;

    /// Starts `argv` on `host` in its own process group, stdio detached.
    async fn spawn_detached(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Box<dyn BackgroundProcess>, ExecError>;
}

/// Builds an owned argv from string literals and formatted values
pub fn argv<I, S>(parts: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    parts.into_iter().map(Into::into).collect()
}
