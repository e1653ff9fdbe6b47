/// Errors from the SSH worker interface
#[derive(Debug)]
pub enum RemoteError {
    /// Connection or channel failure underneath us
    Ssh(openssh::Error),
    /// The process we went looking for is not running on the host
    NotRunning(&'static str),
    /// lsof answered for a different command than the one asked about
    WrongProcess(String),
    /// A shell command exited non-zero where success was required
    CommandFailed(String, String),
    FailedUtf8(std::string::FromUtf8Error),
}

impl From<openssh::Error> for RemoteError {
    fn from(value: openssh::Error) -> Self {
        Self::Ssh(value)
    }
}

impl From<std::string::FromUtf8Error> for RemoteError {
    fn from(value: std::string::FromUtf8Error) -> Self {
        Self::FailedUtf8(value)
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ssh(e) => write!(f, "SSH session error: {e}"),
            Self::NotRunning(process) => {
                write!(f, "lsof didn't find {process} running on the host!")
            }
            Self::WrongProcess(found) => {
                write!(f, "lsof found {found} instead of dataRouter!")
            }
            Self::CommandFailed(command, stderr) => {
                write!(f, "Remote command `{command}` failed: {stderr}")
            }
            Self::FailedUtf8(e) => write!(f, "Remote output was not UTF-8: {e}"),
        }
    }
}

impl std::error::Error for RemoteError {}
