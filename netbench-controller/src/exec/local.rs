use super::process::{run_command, spawn_group};
use super::{BackgroundProcess, CommandOutput, ExecError, HostExecutor};
use async_trait::async_trait;
use std::collections::HashSet;
use std::time::Duration;

/// Runs every host's commands directly on the controller machine.
///
/// No isolation at all: meant for development against a loopback listener.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    hosts: HashSet<String>,
}

impl LocalExecutor {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            hosts: hosts.into_iter().map(Into::into).collect(),
        }
    }

    fn check_host(&self, host: &str) -> Result<(), ExecError> {
        if self.hosts.contains(host) {
            Ok(())
        } else {
            Err(ExecError::HostNotFound(host.to_string()))
        }
    }
}

#[async_trait]
impl HostExecutor for LocalExecutor {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        self.check_host(host)?;
        run_command(argv, timeout).await
    }

    async fn spawn_detached(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Box<dyn BackgroundProcess>, ExecError> {
        self.check_host(host)?;
        Ok(Box::new(spawn_group(argv)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::argv;

    fn executor() -> LocalExecutor {
        LocalExecutor::new(["h1"])
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let out = executor()
            .run("h1", &argv(["sh", "-c", "echo hello; echo oops >&2; exit 3"]), None)
            .await
            .unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert_eq!(out.exit_code, 3);
        assert!(!out.success());
    }

    #[tokio::test]
    async fn unknown_host_is_not_found() {
        let err = executor().run("h9", &argv(["true"]), None).await.unwrap_err();
        assert!(matches!(err, ExecError::HostNotFound(h) if h == "h9"));
    }

    #[tokio::test]
    async fn timeout_is_reported() {
        let err = executor()
            .run("h1", &argv(["sleep", "5"]), Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout(_)));
    }

    #[tokio::test]
    async fn missing_binary_fails_to_spawn() {
        let err = executor()
            .run("h1", &argv(["/nonexistent/netbench-tool"]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));

        let err = executor().run("h1", &[], None).await.unwrap_err();
        assert!(matches!(err, ExecError::EmptyCommand));
    }

    #[tokio::test]
    async fn detached_process_terminates_on_sigterm() {
        let mut proc = executor()
            .spawn_detached("h1", &argv(["sleep", "30"]))
            .await
            .unwrap();
        assert!(proc.id().is_some());
        assert!(proc.is_running());

        proc.terminate().unwrap();
        assert!(proc.wait_for_exit(Duration::from_secs(5)).await);
        assert!(!proc.is_running());
        // signalling an exited group is harmless
        proc.kill().unwrap();
    }

    #[tokio::test]
    async fn ignored_sigterm_needs_kill() {
        let mut proc = executor()
            .spawn_detached("h1", &argv(["sh", "-c", "trap '' TERM; sleep 30"]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        proc.terminate().unwrap();
        assert!(!proc.wait_for_exit(Duration::from_millis(300)).await);
        proc.kill().unwrap();
        assert!(proc.wait_for_exit(Duration::from_secs(5)).await);
    }
}
