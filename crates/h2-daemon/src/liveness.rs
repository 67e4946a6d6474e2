use std::path::Path;
use std::time::Duration;

use tokio::net::UnixStream;

/// Outcome of probing an existing socket path before bind (§4.6).
#[derive(Debug, PartialEq, Eq)]
pub enum SocketProbe {
    /// No socket file was present; safe to bind directly.
    Absent,
    /// A socket file was present but nothing answered; it was unlinked.
    Stale,
    /// A live daemon answered; the caller must refuse to start.
    LiveDaemon,
}

const DIAL_TIMEOUT: Duration = Duration::from_millis(300);

/// Probe `socket_path` per the stale-socket policy in §4.6: if the path
/// exists, attempt a short-timeout dial. A successful connect means a live
/// daemon owns the socket. A failed or timed-out connect means the socket
/// is stale and is unlinked so bind can proceed.
pub async fn probe_socket(socket_path: &Path) -> std::io::Result<SocketProbe> {
    if !socket_path.exists() {
        return Ok(SocketProbe::Absent);
    }

    match tokio::time::timeout(DIAL_TIMEOUT, UnixStream::connect(socket_path)).await {
        Ok(Ok(_stream)) => {
            tracing::warn!(
                event = "daemon.liveness.live_daemon_detected",
                path = %socket_path.display(),
            );
            Ok(SocketProbe::LiveDaemon)
        }
        _ => {
            tracing::info!(
                event = "daemon.liveness.stale_socket_removed",
                path = %socket_path.display(),
            );
            std::fs::remove_file(socket_path)?;
            Ok(SocketProbe::Stale)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    #[tokio::test]
    async fn test_probe_absent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-a1.sock");
        let probe = probe_socket(&path).await.unwrap();
        assert_eq!(probe, SocketProbe::Absent);
    }

    #[tokio::test]
    async fn test_probe_stale_socket_is_unlinked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-a1.sock");
        // Bind then drop the listener: the socket file remains but nothing
        // is listening behind it.
        {
            let _listener = UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());

        let probe = probe_socket(&path).await.unwrap();
        assert_eq!(probe, SocketProbe::Stale);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_probe_live_daemon_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent-a1.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let _accept_task = tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let probe = probe_socket(&path).await.unwrap();
        assert_eq!(probe, SocketProbe::LiveDaemon);
        assert!(path.exists());
    }
}
