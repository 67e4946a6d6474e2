use serde::{Deserialize, Serialize};

use crate::errors::DaemonError;

/// Daemon-wide tunables, read from the `[daemon]` section of `<h2_dir>/config.toml`.
///
/// Field defaults and meaning are per SPEC_FULL.md §1. The daemon reads this
/// itself at startup; nothing upstream of it carries these values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// No output from the child within this window, with the cursor
    /// stationary, is one of the three idle conjuncts (§4.1). Default: 200.
    #[serde(default = "default_idle_quiet_ms")]
    pub idle_quiet_ms: u64,

    /// Quiescence window required after spawn before `starting -> idle`
    /// (§4.5). Default: 1500.
    #[serde(default = "default_startup_settle_ms")]
    pub startup_settle_ms: u64,

    /// Grace period between SIGTERM and SIGKILL during hung-child
    /// escalation (§4.1). Default: 2000.
    #[serde(default = "default_hang_grace_ms")]
    pub hang_grace_ms: u64,

    /// Deadline for a single PTY write (§4.1, §5). Default: 3000.
    #[serde(default = "default_pty_write_timeout_ms")]
    pub pty_write_timeout_ms: u64,

    /// Deadline D.`WaitForIdle` waits per interrupt attempt (§4.4). Default: 5000.
    #[serde(default = "default_interrupt_wait_ms")]
    pub interrupt_wait_ms: u64,

    /// Max interrupt delivery attempts before proceeding anyway (§4.4). Default: 3.
    #[serde(default = "default_interrupt_retries")]
    pub interrupt_retries: u32,

    /// Bounded scrollback size in lines (§3). Default: 10000.
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,

    /// Deadline for any RPC handler's reply (§5). Default: 30.
    #[serde(default = "default_rpc_deadline_secs")]
    pub rpc_deadline_secs: u64,

    /// Optional heartbeat/keepalive nudge (§4.9).
    #[serde(default)]
    pub heartbeat: Option<HeartbeatConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    pub idle_timeout_secs: u64,
    pub message: String,
    #[serde(default)]
    pub condition: Option<String>,
}

impl DaemonConfig {
    /// Validate configuration values after loading.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.idle_quiet_ms == 0 {
            return Err(DaemonError::ConfigInvalid(
                "idle_quiet_ms must be > 0".to_string(),
            ));
        }
        if self.scrollback_lines == 0 {
            return Err(DaemonError::ConfigInvalid(
                "scrollback_lines must be > 0".to_string(),
            ));
        }
        if self.interrupt_retries == 0 {
            return Err(DaemonError::ConfigInvalid(
                "interrupt_retries must be > 0".to_string(),
            ));
        }
        if let Some(hb) = &self.heartbeat
            && hb.message.is_empty()
        {
            return Err(DaemonError::ConfigInvalid(
                "heartbeat.message must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            idle_quiet_ms: default_idle_quiet_ms(),
            startup_settle_ms: default_startup_settle_ms(),
            hang_grace_ms: default_hang_grace_ms(),
            pty_write_timeout_ms: default_pty_write_timeout_ms(),
            interrupt_wait_ms: default_interrupt_wait_ms(),
            interrupt_retries: default_interrupt_retries(),
            scrollback_lines: default_scrollback_lines(),
            rpc_deadline_secs: default_rpc_deadline_secs(),
            heartbeat: None,
        }
    }
}

fn default_idle_quiet_ms() -> u64 {
    200
}
fn default_startup_settle_ms() -> u64 {
    1500
}
fn default_hang_grace_ms() -> u64 {
    2000
}
fn default_pty_write_timeout_ms() -> u64 {
    3000
}
fn default_interrupt_wait_ms() -> u64 {
    5000
}
fn default_interrupt_retries() -> u32 {
    3
}
fn default_scrollback_lines() -> usize {
    10_000
}
fn default_rpc_deadline_secs() -> u64 {
    30
}

/// Wrapper for deserializing the `[daemon]` section of `<h2_dir>/config.toml`.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    daemon: DaemonConfig,
}

/// Load daemon configuration from `<h2_dir>/config.toml`.
///
/// Falls back to defaults if the file doesn't exist, can't be read, or
/// fails to parse, logging a warning in each case — the daemon must still
/// be able to start with no config file present.
pub fn load_daemon_config(config_path: &std::path::Path) -> Result<DaemonConfig, DaemonError> {
    let config = match std::fs::read_to_string(config_path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(file) => file.daemon,
            Err(e) => {
                tracing::warn!(
                    event = "daemon.config.parse_failed",
                    path = %config_path.display(),
                    error = %e,
                );
                DaemonConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(e) => {
            tracing::warn!(
                event = "daemon.config.read_failed",
                path = %config_path.display(),
                error = %e,
            );
            DaemonConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.idle_quiet_ms, 200);
        assert_eq!(config.startup_settle_ms, 1500);
        assert_eq!(config.hang_grace_ms, 2000);
        assert_eq!(config.pty_write_timeout_ms, 3000);
        assert_eq!(config.interrupt_wait_ms, 5000);
        assert_eq!(config.interrupt_retries, 3);
        assert_eq!(config.scrollback_lines, 10_000);
        assert_eq!(config.rpc_deadline_secs, 30);
        assert!(config.heartbeat.is_none());
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = DaemonConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: DaemonConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.idle_quiet_ms, config.idle_quiet_ms);
    }

    #[test]
    fn test_load_from_toml_with_overrides() {
        let toml = r#"
[daemon]
idle_quiet_ms = 500
scrollback_lines = 2000
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.daemon.idle_quiet_ms, 500);
        assert_eq!(file.daemon.scrollback_lines, 2000);
        // unset fields keep defaults
        assert_eq!(file.daemon.interrupt_retries, 3);
    }

    #[test]
    fn test_load_missing_daemon_section_uses_defaults() {
        let toml = "[other]\nx = 1\n";
        let file: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.daemon.idle_quiet_ms, 200);
    }

    #[test]
    fn test_load_daemon_config_missing_file_falls_back() {
        let config = load_daemon_config(std::path::Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.idle_quiet_ms, 200);
    }

    #[test]
    fn test_validate_zero_idle_quiet_fails() {
        let mut config = DaemonConfig::default();
        config.idle_quiet_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_scrollback_fails() {
        let mut config = DaemonConfig::default();
        config.scrollback_lines = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_roundtrip() {
        let toml = r#"
[daemon]
[daemon.heartbeat]
idle_timeout_secs = 600
message = "still there?"
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        let hb = file.daemon.heartbeat.unwrap();
        assert_eq!(hb.idle_timeout_secs, 600);
        assert_eq!(hb.message, "still there?");
        assert!(hb.condition.is_none());
    }

    #[test]
    fn test_validate_empty_heartbeat_message_fails() {
        let mut config = DaemonConfig::default();
        config.heartbeat = Some(HeartbeatConfig {
            idle_timeout_secs: 60,
            message: String::new(),
            condition: None,
        });
        assert!(config.validate().is_err());
    }
}
