//! The command transport underneath the worker interface. Production
//! code talks to a host over SSH; tests script the replies.
use super::error::RemoteError;
use async_trait::async_trait;
use std::borrow::Cow;

/// What one remote command produced
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CmdOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }
}

/// One open session on a remote host
#[async_trait]
pub trait RemoteShell: Send + Sync {
    async fn run(&self, command: &str) -> Result<CmdOutput, RemoteError>;
    /// Tear the session down. Implementations also clean up on Drop, but
    /// an explicit close surfaces teardown errors.
    async fn close(&mut self) -> Result<(), RemoteError>;
}

/// Opens sessions; injected into the task layer so tests can substitute
/// scripted shells
#[async_trait]
pub trait ShellFactory: Send + Sync {
    async fn connect(&self, host: &str) -> Result<Box<dyn RemoteShell>, RemoteError>;
}

/// Single-quote a word for the remote shell if it contains anything the
/// shell might interpret. Plain path-like words pass through untouched.
pub fn quoted(word: &str) -> Cow<'_, str> {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/'));
    if plain {
        Cow::Borrowed(word)
    } else {
        Cow::Owned(format!("'{}'", word.replace('\'', r"'\''")))
    }
}
