/*!
Exécuteur de commandes scripté pour développement sans Mininet

Remplace MnexecExecutor/LocalExecutor dans les tests : aucune commande réelle
n'est lancée. Chaque appel est enregistré, les clients iperf3 reçoivent la
réponse scriptée de leur host et le listener est un processus simulé dont on
contrôle le comportement (refus de démarrer, mort immédiate, SIGTERM ignoré).
*/

use async_trait::async_trait;
use netbench_controller::exec::{BackgroundProcess, CommandOutput, ExecError, HostExecutor};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::fixtures;

/// Answer given to a foreground (client) command
#[derive(Debug, Clone)]
pub enum Reply {
    Output { output: CommandOutput, delay: Duration },
    /// the host's execution context cannot be found
    Unreachable,
}

impl Reply {
    pub fn stdout(stdout: impl Into<String>) -> Self {
        Reply::Output {
            output: CommandOutput {
                stdout: stdout.into(),
                stderr: String::new(),
                exit_code: 0,
            },
            delay: Duration::ZERO,
        }
    }

    /// Successful TCP run measuring `mbps`
    pub fn mbps(mbps: f64) -> Self {
        Self::stdout(fixtures::iperf_tcp_json(mbps * 1_000_000.0))
    }

    pub fn exit(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Output {
            output: CommandOutput {
                stdout: fixtures::iperf_error_json(),
                stderr: stderr.into(),
                exit_code: code,
            },
            delay: Duration::ZERO,
        }
    }

    /// Same reply, returned only after `delay` (the client "runs" that long)
    pub fn after(self, delay: Duration) -> Self {
        match self {
            Reply::Output { output, .. } => Reply::Output { output, delay },
            Reply::Unreachable => Reply::Unreachable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ListenerBehavior {
    #[default]
    Healthy,
    /// spawn fails (binary missing, host unreachable)
    FailSpawn,
    /// starts then dies before the settle delay is over
    ExitImmediately,
    /// survives SIGTERM, only SIGKILL stops it
    IgnoreTerm,
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub host: String,
    pub argv: Vec<String>,
    pub detached: bool,
    pub at: Instant,
}

impl RecordedCall {
    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }

    pub fn is_client(&self) -> bool {
        !self.detached && self.argv.iter().any(|a| a == "-c")
    }
}

#[derive(Debug, Default)]
struct FakeState {
    alive: bool,
    ignore_term: bool,
    terms: u32,
    kills: u32,
}

struct FakeProcess {
    pid: u32,
    state: Arc<Mutex<FakeState>>,
}

#[async_trait]
impl BackgroundProcess for FakeProcess {
    fn id(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn is_running(&mut self) -> bool {
        self.state.lock().alive
    }

    fn terminate(&mut self) -> Result<(), ExecError> {
        let mut st = self.state.lock();
        st.terms += 1;
        if !st.ignore_term {
            st.alive = false;
        }
        Ok(())
    }

    fn kill(&mut self) -> Result<(), ExecError> {
        let mut st = self.state.lock();
        st.kills += 1;
        st.alive = false;
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if !self.state.lock().alive {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

#[derive(Default)]
struct Script {
    unknown_hosts: HashSet<String>,
    replies: HashMap<String, Reply>,
    default_reply: Option<Reply>,
    listener: ListenerBehavior,
    leftover_listener: bool,
    calls: Vec<RecordedCall>,
    listeners: Vec<Arc<Mutex<FakeState>>>,
}

/// Scripted [`HostExecutor`]; clones share the same script and call log.
#[derive(Clone, Default)]
pub struct ScriptedExecutor {
    script: Arc<Mutex<Script>>,
    next_pid: Arc<AtomicU32>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, host: &str, reply: Reply) -> Self {
        self.script.lock().replies.insert(host.to_string(), reply);
        self
    }

    /// Reply for hosts without a dedicated one (default: 10 Mbps)
    pub fn default_reply(self, reply: Reply) -> Self {
        self.script.lock().default_reply = Some(reply);
        self
    }

    pub fn unknown_host(self, host: &str) -> Self {
        self.script.lock().unknown_hosts.insert(host.to_string());
        self
    }

    pub fn listener(self, behavior: ListenerBehavior) -> Self {
        self.script.lock().listener = behavior;
        self
    }

    /// Simulates a listener left over by a previous unclean shutdown
    pub fn with_leftover_listener(self) -> Self {
        self.script.lock().leftover_listener = true;
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.script.lock().calls.clone()
    }

    pub fn client_calls(&self) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(RecordedCall::is_client).collect()
    }

    pub fn client_hosts(&self) -> Vec<String> {
        self.client_calls().into_iter().map(|c| c.host).collect()
    }

    pub fn listener_spawns(&self) -> usize {
        self.calls().iter().filter(|c| c.detached).count()
    }

    pub fn live_listeners(&self) -> usize {
        self.script.lock().listeners.iter().filter(|l| l.lock().alive).count()
    }

    /// SIGKILLs sent to simulated listeners
    pub fn listener_kills(&self) -> u32 {
        self.script.lock().listeners.iter().map(|l| l.lock().kills).sum()
    }

    fn record(&self, host: &str, argv: &[String], detached: bool) {
        debug!(host, command = %argv.join(" "), detached, "scripted call");
        self.script.lock().calls.push(RecordedCall {
            host: host.to_string(),
            argv: argv.to_vec(),
            detached,
            at: Instant::now(),
        });
    }

    fn check_host(&self, host: &str) -> Result<(), ExecError> {
        if self.script.lock().unknown_hosts.contains(host) {
            return Err(ExecError::HostNotFound(host.to_string()));
        }
        Ok(())
    }

    fn output(stdout: &str, exit_code: i32) -> CommandOutput {
        CommandOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code,
        }
    }
}

#[async_trait]
impl HostExecutor for ScriptedExecutor {
    async fn run(
        &self,
        host: &str,
        argv: &[String],
        timeout: Option<Duration>,
    ) -> Result<CommandOutput, ExecError> {
        self.record(host, argv, false);
        self.check_host(host)?;

        match argv.first().map(String::as_str) {
            None => Err(ExecError::EmptyCommand),
            Some("pgrep") => {
                let script = self.script.lock();
                let live = script.leftover_listener || script.listeners.iter().any(|l| l.lock().alive);
                Ok(if live { Self::output("4242\n", 0) } else { Self::output("", 1) })
            }
            Some("pkill") => {
                let mut script = self.script.lock();
                let mut matched = std::mem::take(&mut script.leftover_listener);
                for listener in &script.listeners {
                    let mut st = listener.lock();
                    if st.alive {
                        st.alive = false;
                        matched = true;
                    }
                }
                Ok(Self::output("", if matched { 0 } else { 1 }))
            }
            Some(_) => {
                let reply = {
                    let script = self.script.lock();
                    script
                        .replies
                        .get(host)
                        .or(script.default_reply.as_ref())
                        .cloned()
                        .unwrap_or_else(|| Reply::mbps(10.0))
                };
                match reply {
                    Reply::Unreachable => Err(ExecError::HostNotFound(host.to_string())),
                    Reply::Output { output, delay } => {
                        if let Some(limit) = timeout.filter(|t| *t < delay) {
                            tokio::time::sleep(limit).await;
                            return Err(ExecError::Timeout(limit));
                        }
                        tokio::time::sleep(delay).await;
                        Ok(output)
                    }
                }
            }
        }
    }

    async fn spawn_detached(
        &self,
        host: &str,
        argv: &[String],
    ) -> Result<Box<dyn BackgroundProcess>, ExecError> {
        self.record(host, argv, true);
        self.check_host(host)?;
        let program = argv.first().cloned().ok_or(ExecError::EmptyCommand)?;

        let behavior = self.script.lock().listener;
        if behavior == ListenerBehavior::FailSpawn {
            return Err(ExecError::Spawn {
                program,
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "scripted spawn failure"),
            });
        }

        let state = Arc::new(Mutex::new(FakeState {
            alive: behavior != ListenerBehavior::ExitImmediately,
            ignore_term: behavior == ListenerBehavior::IgnoreTerm,
            ..FakeState::default()
        }));
        self.script.lock().listeners.push(state.clone());
        let pid = 10_000 + self.next_pid.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(FakeProcess { pid, state }))
    }
}
