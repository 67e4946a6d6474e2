use std::io;

/// All error types for the h2-daemon crate, mapped 1:1 onto the error
/// taxonomy in §7.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("malformed request: {0}")]
    BadRequest(String),

    #[error("agent has exited")]
    AgentExited,

    #[error("daemon already running")]
    AlreadyRunning,

    #[error("PTY write exceeded its deadline")]
    PtyWriteTimeout,

    #[error("child process hung and was killed")]
    ChildHung,

    #[error("operation cancelled by shutdown")]
    Cancelled,

    #[error("config error: {0}")]
    ConfigInvalid(String),

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error(transparent)]
    Codec(#[from] h2_protocol::CodecError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Base64Decode(#[from] base64::DecodeError),
}

impl DaemonError {
    /// Error code string for the IPC protocol (§6, §7).
    pub fn error_code(&self) -> &'static str {
        match self {
            DaemonError::BadRequest(_) => "bad_request",
            DaemonError::AgentExited => "agent_exited",
            DaemonError::AlreadyRunning => "already_running",
            DaemonError::PtyWriteTimeout => "pty_write_timeout",
            DaemonError::ChildHung => "child_hung",
            DaemonError::Cancelled => "cancelled",
            DaemonError::ConfigInvalid(_) => "bad_request",
            DaemonError::PtyError(_) => "io_error",
            DaemonError::Codec(_) => "bad_request",
            DaemonError::Io(_) => "io_error",
            DaemonError::Serde(_) => "bad_request",
            DaemonError::Base64Decode(_) => "bad_request",
        }
    }

    /// Whether this error originates from caller-supplied input rather than
    /// internal/environmental failure.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            DaemonError::BadRequest(_)
                | DaemonError::AgentExited
                | DaemonError::AlreadyRunning
                | DaemonError::Codec(_)
                | DaemonError::Serde(_)
                | DaemonError::Base64Decode(_)
        )
    }
}
