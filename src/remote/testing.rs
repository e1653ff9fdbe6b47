//! Scripted shell for the test suites: canned replies keyed by command
//! prefix, every issued command recorded.
use super::error::RemoteError;
use super::shell::{CmdOutput, RemoteShell, ShellFactory};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Default)]
pub struct ScriptedShell {
    rules: Mutex<Vec<(String, CmdOutput)>>,
    pub commands: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    /// When set, every command sleeps this long before answering; pairs
    /// with paused tokio time in deadline tests
    pub delay: Mutex<Option<std::time::Duration>>,
}

impl ScriptedShell {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reply with `stdout` (exit 0) to any command starting with `prefix`
    pub fn on(self: &Arc<Self>, prefix: &str, stdout: &str) -> Arc<Self> {
        self.rules.lock().push((
            prefix.to_string(),
            CmdOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                status: 0,
            },
        ));
        self.clone()
    }

    /// Reply with a full output record to any command starting with `prefix`
    pub fn on_output(self: &Arc<Self>, prefix: &str, output: CmdOutput) -> Arc<Self> {
        self.rules.lock().push((prefix.to_string(), output));
        self.clone()
    }

    pub fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteShell for Arc<ScriptedShell> {
    async fn run(&self, command: &str) -> Result<CmdOutput, RemoteError> {
        self.commands.lock().push(command.to_string());
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let reply = {
            let rules = self.rules.lock();
            rules
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
                .map(|(_, output)| output.clone())
                .unwrap_or_default()
        };
        Ok(reply)
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Hands out clones of one scripted shell and records the hosts asked for
#[derive(Default)]
pub struct ScriptedShellFactory {
    pub shell: Arc<ScriptedShell>,
    pub hosts: Mutex<Vec<String>>,
}

impl ScriptedShellFactory {
    pub fn wrapping(shell: Arc<ScriptedShell>) -> Arc<Self> {
        Arc::new(Self {
            shell,
            hosts: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl ShellFactory for ScriptedShellFactory {
    async fn connect(&self, host: &str) -> Result<Box<dyn RemoteShell>, RemoteError> {
        self.hosts.lock().push(host.to_string());
        Ok(Box::new(self.shell.clone()))
    }
}
