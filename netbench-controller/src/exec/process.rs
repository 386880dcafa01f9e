use super::{BackgroundProcess, CommandOutput, ExecError};
use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tracing::debug;

pub(crate) async fn run_command(
    argv: &[String],
    timeout: Option<Duration>,
) -> Result<CommandOutput, ExecError> {
    let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
    debug!(command = %argv.join(" "), ?timeout, "running command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

    // on timeout the child is dropped, kill_on_drop reaps it
    let output = match timeout {
        Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
            .await
            .map_err(|_| ExecError::Timeout(limit))??,
        None => child.wait_with_output().await?,
    };

    Ok(CommandOutput {
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        exit_code: output.status.code().unwrap_or(-1),
    })
}

pub(crate) fn spawn_group(argv: &[String]) -> Result<GroupProcess, ExecError> {
    let (program, args) = argv.split_first().ok_or(ExecError::EmptyCommand)?;
    debug!(command = %argv.join(" "), "spawning detached command");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0)
        .spawn()
        .map_err(|source| ExecError::Spawn {
            program: program.clone(),
            source,
        })?;

    let pgid = child.id();
    Ok(GroupProcess { child, pgid })
}

/// Child started as leader of its own process group, so signals reach
/// everything it forked (sudo, mnexec, the tool itself).
#[derive(Debug)]
pub struct GroupProcess {
    child: Child,
    pgid: Option<u32>,
}

impl GroupProcess {
    fn signal_group(&self, signal: Signal) -> Result<(), ExecError> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        match killpg(Pid::from_raw(pgid as i32), signal) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(ExecError::Io(e.into())),
        }
    }
}

#[async_trait]
impl BackgroundProcess for GroupProcess {
    fn id(&self) -> Option<u32> {
        self.pgid
    }

    fn is_running(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn terminate(&mut self) -> Result<(), ExecError> {
        self.signal_group(Signal::SIGTERM)
    }

    fn kill(&mut self) -> Result<(), ExecError> {
        self.signal_group(Signal::SIGKILL)
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        matches!(tokio::time::timeout(timeout, self.child.wait()).await, Ok(Ok(_)))
    }
}
