use super::process::{run_command, spawn_group};
use super::{BackgroundProcess, CommandOutput, ExecError, HostExecutor};
use async_trait::async_trait;
use std::time::Duration;
use sysinfo::System;
use tracing::{debug, error};

const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Enters a Mininet host's namespaces through `mnexec -a <pid>`.
///
/// The host shell PID is looked up on every call: first in the process
/// table (the shell carries a `mininet:<host>` argument), then with
/// `pgrep -f` over the configured patterns.
#[derive(Debug, Clone)]
pub struct MnexecExecutor {
    wrapper: Vec<String>,
    locator_patterns: Vec<String>,
}

impl MnexecExecutor {
    /// `wrapper` is a shell-words template where `{pid}` is replaced by the
    /// host PID (ex: `sudo mnexec -a {pid}`). Patterns use `{host}`.
    pub fn new(wrapper: &str, locator_patterns: Vec<String>) -> Result<Self, ExecError> {
        let wrapper = shell_words::split(wrapper).map_err(|e| ExecError::InvalidWrapper(e.to_string()))?;
        if wrapper.is_empty() {
            return Err(ExecError::InvalidWrapper("empty wrapper".into()));
        }
        if !wrapper.iter().any(|w| w.contains("{pid}")) {
            return Err(ExecError::InvalidWrapper("wrapper must reference {pid}".into()));
        }
        Ok(Self {
            wrapper,
            locator_patterns,
        })
    }

    pub async fn locate(&self, host: &str) -> Result<u32, ExecError> {
        let marker = format!("mininet:{host}");
        let scanned = tokio::task::spawn_blocking(move || scan_process_table(&marker))
            .await
            .ok()
            .flatten();
        if let Some(pid) = scanned {
            return Ok(pid);
        }

        for pattern in &self.locator_patterns {
            let pattern = pattern.replace("{host}", host);
            let probe = vec!["pgrep".to_string(), "-f".to_string(), pattern.clone()];
            match run_command(&probe, Some(LOOKUP_TIMEOUT)).await {
                Ok(out) if out.success() => {
                    if let Some(pid) = out.stdout.lines().next().and_then(|l| l.trim().parse().ok()) {
                        debug!(host, pid, pattern = %pattern, "host located with pgrep");
                        return Ok(pid);
                    }
                }
                Ok(_) => {}
                Err(e) => debug!(host, pattern = %pattern, error = %e, "pgrep lookup failed"),
            }
        }

        error!(host, patterns = ?self.locator_patterns, "host execution context not found");
        Err(ExecError::HostNotFound(host.to_string()))
    }

    pub fn wrap(&self, pid: u32, argv: &[String]) -> Vec<String> {
        let pid = pid.to_string();
        self.wrapper
            .iter()
            .map(|part| part.replace("{pid}", &pid))
            .chain(argv.iter().cloned())
            .collect()
    }
}

fn scan_process_table(marker: &str) -> Option<u32> {
    let mut sys = System::new();
    sys.refresh_processes();
    sys.processes()
        .iter()
        .find(|(_, p)| p.cmd().iter().any(|arg| arg == marker))
        .map(|(pid, _)| pid.as_u32())
}

#[async_trait]
impl HostExecutor for MnexecExecutor {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        if argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let pid = self.locate(host).await?;
        run_command(&self.wrap(pid, argv), timeout).await
    }

    async fn spawn_detached(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Box<dyn BackgroundProcess>, ExecError> {
        if argv.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let pid = self.locate(host).await?;
        Ok(Box::new(spawn_group(&self.wrap(pid, argv))?))
    }
}
