//! The production shell: one SSH session per open worker interface,
//! driven through the system ssh so Host/Hostname/User aliases from the
//! user's ~/.ssh/config apply without any parsing on our side.
use super::error::RemoteError;
use super::shell::{CmdOutput, RemoteShell, ShellFactory};
use async_trait::async_trait;
use openssh::{KnownHosts, Session};

#[derive(Debug)]
pub struct SshShell {
    session: Option<Session>,
}

impl SshShell {
    pub async fn connect(host: &str) -> Result<Self, RemoteError> {
        let session = Session::connect(host, KnownHosts::Add).await?;
        Ok(Self {
            session: Some(session),
        })
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run(&self, command: &str) -> Result<CmdOutput, RemoteError> {
        let session = self
            .session
            .as_ref()
            .ok_or(RemoteError::NotRunning("ssh session"))?;
        let output = session
            .command("sh")
            .arg("-c")
            .arg(command)
            .output()
            .await?;
        Ok(CmdOutput {
            stdout: String::from_utf8(output.stdout)?,
            stderr: String::from_utf8(output.stderr)?,
            status: output.status.code().unwrap_or(-1),
        })
    }

    async fn close(&mut self) -> Result<(), RemoteError> {
        if let Some(session) = self.session.take() {
            session.close().await?;
        }
        Ok(())
    }
}

/// Factory for the production shell
#[derive(Debug, Default, Clone)]
pub struct SshShellFactory;

#[async_trait]
impl ShellFactory for SshShellFactory {
    async fn connect(&self, host: &str) -> Result<Box<dyn RemoteShell>, RemoteError> {
        Ok(Box::new(SshShell::connect(host).await?))
    }
}
