use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::broadcast::error::RecvError;

use crate::errors::DaemonError;
use crate::vt::Vt;

/// Snapshot-then-tail bridge between an upgraded control connection and the
/// VT (§4.8 component H).
///
/// `raw_holder` is shared across every attach for one agent: only the first
/// connection to win the compare-exchange gets to forward its input bytes
/// to the PTY; later attaches still receive the live output tail but their
/// keystrokes are dropped, matching §4.8's "only one attach may hold raw
/// mode at a time."
pub struct AttachBridge {
    raw_holder: AtomicBool,
}

impl AttachBridge {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            raw_holder: AtomicBool::new(false),
        })
    }

    /// Runs one attach session to completion. Returns once the client
    /// disconnects or the output subscription is closed (§4.8 cancellation).
    pub async fn run<S>(&self, vt: Arc<Vt>, stream: S) -> Result<(), DaemonError>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let (screen_lines, _scrollback) = vt.snapshot(0);
        let mut paint = Vec::new();
        paint.extend_from_slice(b"\x1b[2J\x1b[H");
        for line in &screen_lines {
            paint.extend_from_slice(line.as_bytes());
            paint.extend_from_slice(b"\r\n");
        }

        let (mut read_half, mut write_half) = tokio::io::split(stream);
        write_half.write_all(&paint).await?;
        write_half.flush().await?;

        let has_raw = self
            .raw_holder
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        let mut rx = vt.subscribe();
        let write_timeout = Duration::from_millis(3000);

        let read_loop = async {
            if !has_raw {
                std::future::pending::<()>().await;
            }
            let mut buf = [0u8; 4096];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => {
                        let _ = vt.write_pty(buf[..n].to_vec(), write_timeout).await;
                    }
                }
            }
        };

        let write_loop = async {
            loop {
                match rx.recv().await {
                    Ok(bytes) => {
                        if write_half.write_all(&bytes).await.is_err() {
                            return;
                        }
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return,
                }
            }
        };

        tokio::select! {
            _ = read_loop => {}
            _ = write_loop => {}
        }

        if has_raw {
            self.raw_holder.store(false, Ordering::SeqCst);
        }
        Ok(())
    }
}
