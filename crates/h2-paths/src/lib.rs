use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found — set $HOME environment variable")]
    HomeNotFound,
}

/// Centralized path construction for the `<h2_dir>/` directory layout (§3, §6).
///
/// Single source of truth for every path a daemon reads or writes. Use
/// `resolve()` in production code, `from_env()` to honor `H2_DIR`, and
/// `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct H2Paths {
    h2_dir: PathBuf,
}

impl H2Paths {
    /// Resolve paths from the user's home directory (`~/.h2`).
    pub fn resolve() -> Result<Self, PathError> {
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        Ok(Self {
            h2_dir: home.join(".h2"),
        })
    }

    /// Resolve paths honoring `H2_DIR` if set, falling back to `resolve()`.
    pub fn from_env() -> Result<Self, PathError> {
        if let Some(dir) = std::env::var_os("H2_DIR") {
            return Ok(Self::from_dir(PathBuf::from(dir)));
        }
        Self::resolve()
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(h2_dir: PathBuf) -> Self {
        Self { h2_dir }
    }

    /// The base `<h2_dir>` directory.
    pub fn h2_dir(&self) -> &Path {
        &self.h2_dir
    }

    // --- Top-level subdirectories ---

    pub fn sessions_dir(&self) -> PathBuf {
        self.h2_dir.join("sessions")
    }

    pub fn sockets_dir(&self) -> PathBuf {
        self.h2_dir.join("sockets")
    }

    pub fn config_file(&self) -> PathBuf {
        self.h2_dir.join("config.toml")
    }

    // --- Per-agent socket ---

    /// `<h2_dir>/sockets/agent-<name>.sock`
    pub fn agent_socket(&self, name: &str) -> PathBuf {
        self.sockets_dir().join(format!("agent-{name}.sock"))
    }

    // --- Session directory layout (§6) ---

    fn sanitized(name: &str) -> String {
        name.replace('/', "_")
    }

    pub fn session_dir(&self, name: &str) -> PathBuf {
        self.sessions_dir().join(Self::sanitized(name))
    }

    pub fn session_metadata_file(&self, name: &str) -> PathBuf {
        self.session_dir(name).join("metadata.json")
    }

    pub fn session_activity_log(&self, name: &str) -> PathBuf {
        self.session_dir(name).join("session-activity.jsonl")
    }

    pub fn session_events_log(&self, name: &str) -> PathBuf {
        self.session_dir(name).join("events.jsonl")
    }

    pub fn session_messages_dir(&self, name: &str) -> PathBuf {
        self.session_dir(name).join("messages")
    }

    /// `<session>/messages/<YYYYMMDD-HHMMSS>-<id8>.md`
    pub fn session_message_file(&self, name: &str, timestamp: &str, id8: &str) -> PathBuf {
        self.session_messages_dir(name)
            .join(format!("{timestamp}-{id8}.md"))
    }

    pub fn session_permission_reviewer(&self, name: &str) -> PathBuf {
        self.session_dir(name).join("permission-reviewer.md")
    }
}
