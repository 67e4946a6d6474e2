mod connection;

use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use crate::supervisor::AgentContext;

pub use connection::handle_connection;

/// Accept loop for the agent's control socket (§4.6 component F). One task
/// per accepted connection, each handling exactly one request before it
/// exits (or, for `attach`, running until the client disconnects).
pub async fn run_accept_loop(listener: UnixListener, agent: Arc<AgentContext>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let agent = Arc::clone(&agent);
                        tokio::spawn(async move {
                            handle_connection(stream, agent).await;
                        });
                    }
                    Err(e) => {
                        tracing::warn!(event = "daemon.control.accept_failed", error = %e);
                    }
                }
            }
        }
    }
}
