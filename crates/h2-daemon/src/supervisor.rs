use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use h2_paths::H2Paths;
use h2_protocol::{AgentInfo, AgentName, AgentState};
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use crate::activity::ActivityLog;
use crate::agent_state::StateTracker;
use crate::attach::AttachBridge;
use crate::config::DaemonConfig;
use crate::control;
use crate::delivery::DeliveryScheduler;
use crate::errors::DaemonError;
use crate::liveness::{SocketProbe, probe_socket};
use crate::queue::MessageQueue;
use crate::store::MessageStore;
use crate::vt::Vt;

/// Launch parameters the caller (the h2 CLI process that execs the
/// daemon) supplies — harness command, working directory, and the handful
/// of environment variables §4.9 names explicitly.
pub struct LaunchSpec {
    pub agent_name: String,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: String,
    pub harness: String,
    pub role: Option<String>,
    pub extra_env: HashMap<String, String>,
}

/// Everything a control connection needs to dispatch a request (§4.2's A-H
/// wiring, held by the daemon supervisor).
pub struct AgentContext {
    pub name: AgentName,
    pub command: String,
    pub started_at: Instant,
    pub vt: Arc<Vt>,
    pub queue: Arc<MessageQueue>,
    pub state: Arc<StateTracker>,
    pub activity: Arc<ActivityLog>,
    pub store: MessageStore,
    pub attach: Arc<AttachBridge>,
    pub config: DaemonConfig,
    pub shutdown: CancellationToken,
}

impl AgentContext {
    pub async fn snapshot_info(&self) -> AgentInfo {
        let state = self.state.current().await;
        AgentInfo {
            name: self.name.clone(),
            command: self.command.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            state,
            sub_state: if self.state.blocked_on_permission() {
                Some("blocked".to_string())
            } else {
                None
            },
            state_duration_secs: self.state.state_duration().await.as_secs(),
            queued_count: self.queue.pending_count().await,
            blocked_on_permission: self.state.blocked_on_permission(),
            pod: None,
        }
    }
}

/// Runs one agent daemon to completion and returns the process exit code
/// per §6's table (0/64/65/69/70).
///
/// Wires components A-H exactly per §4.9's six-step startup sequence, then
/// runs the accept loop, delivery loop, heartbeat, and a PTY read pump until
/// shutdown is triggered either by `stop` or by the child exiting on its
/// own.
pub async fn run_agent_daemon(paths: H2Paths, spec: LaunchSpec) -> i32 {
    match run_agent_daemon_inner(paths, spec).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(event = "daemon.startup.failed", error = %e);
            64
        }
    }
}

async fn run_agent_daemon_inner(paths: H2Paths, spec: LaunchSpec) -> Result<i32, DaemonError> {
    // Step 1: resolve session dir.
    let session_dir = paths.session_dir(&spec.agent_name);
    tokio::fs::create_dir_all(&session_dir).await?;

    // Step 2: open activity log. The session id is a fresh identifier
    // distinct from the long-lived agent name (§3's data model) — it
    // changes every time this agent is (re)launched, while `agent_name`
    // stays stable across restarts.
    let session_id = uuid::Uuid::new_v4().to_string();
    let activity = Arc::new(
        ActivityLog::open(
            &paths.session_activity_log(&spec.agent_name),
            &spec.agent_name,
            &session_id,
        )
        .await?,
    );
    activity.log_session_started().await;

    let config = crate::config::load_daemon_config(&paths.config_file())?;

    // Stale-socket policy (§4.6) folds into startup before bind.
    let socket_path = paths.agent_socket(&spec.agent_name);
    match probe_socket(&socket_path).await? {
        SocketProbe::LiveDaemon => return Err(DaemonError::AlreadyRunning),
        SocketProbe::Absent | SocketProbe::Stale => {}
    }

    // Step 3: fork child under a fresh PTY with the §4.9 environment.
    let mut env_vars = spec.extra_env.clone();
    env_vars.insert("H2_ACTOR".to_string(), spec.agent_name.clone());
    env_vars.insert(
        "H2_SESSION_DIR".to_string(),
        session_dir.to_string_lossy().to_string(),
    );
    if let Some(role) = &spec.role {
        env_vars.insert("H2_ROLE".to_string(), role.clone());
    }
    for key in ["TERM", "COLORTERM", "COLORFGBG"] {
        if let Ok(val) = std::env::var(key) {
            env_vars.entry(key.to_string()).or_insert(val);
        }
    }

    let (vt, mut pty_reader) = match Vt::spawn(
        &spec.command,
        &spec.args,
        &spec.cwd,
        &env_vars,
        24,
        80,
        &spec.harness,
        config.scrollback_lines,
    ) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!(event = "daemon.pty.spawn_failed", error = %e);
            return Ok(69);
        }
    };

    // Step 4: bind and listen on the control socket.
    if let Some(parent) = socket_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let listener = match UnixListener::bind(&socket_path) {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(event = "daemon.control.bind_failed", error = %e);
            return Ok(65);
        }
    };

    let queue = MessageQueue::new();
    let state = StateTracker::new(AgentState::Starting);
    let store = MessageStore::new(paths.clone());
    let attach = AttachBridge::new();
    let shutdown = CancellationToken::new();

    let agent = Arc::new(AgentContext {
        name: AgentName::new(spec.agent_name.clone()),
        command: spec.command.clone(),
        started_at: Instant::now(),
        vt: Arc::clone(&vt),
        queue: Arc::clone(&queue),
        state: Arc::clone(&state),
        activity: Arc::clone(&activity),
        store,
        attach,
        config: config.clone(),
        shutdown: shutdown.clone(),
    });

    // Step 5 (install hook settings) is an external collaborator's
    // responsibility in this scope — the daemon only serves `hook_event`
    // once the harness is configured to call it.

    // Step 6: start the read pump, delivery loop, accept loop, heartbeat.
    let read_pump = {
        let vt = Arc::clone(&vt);
        let shutdown = shutdown.clone();
        tokio::task::spawn_blocking(move || {
            let mut buf = [0u8; 4096];
            loop {
                if shutdown.is_cancelled() {
                    return;
                }
                match std::io::Read::read(&mut pty_reader, &mut buf) {
                    Ok(0) => {
                        shutdown.cancel();
                        return;
                    }
                    Ok(n) => vt.write(&buf[..n]),
                    Err(_) => {
                        shutdown.cancel();
                        return;
                    }
                }
            }
        })
    };

    let delivery = DeliveryScheduler::new(
        Arc::clone(&queue),
        Arc::clone(&vt),
        Arc::clone(&state),
        Arc::clone(&activity),
        config.clone(),
    );
    let delivery_shutdown = shutdown.clone();
    let delivery_task = tokio::spawn(async move { delivery.run(delivery_shutdown).await });

    let accept_shutdown = shutdown.clone();
    let accept_agent = Arc::clone(&agent);
    let accept_task = tokio::spawn(async move {
        control::run_accept_loop(listener, accept_agent, accept_shutdown).await
    });

    // Continuously reclassifies `starting -> idle` (once, at startup
    // settle) and `active -> idle` (repeatedly, for the lifetime of the
    // session) from VT quiescence — per §4.5's tie-break, VT observation
    // wins for idle/active regardless of what the hook stream last said.
    let settle_task = {
        let vt = Arc::clone(&vt);
        let state = Arc::clone(&state);
        let settle = Duration::from_millis(config.startup_settle_ms);
        let idle_quiet = Duration::from_millis(config.idle_quiet_ms);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            while !shutdown.is_cancelled() {
                match state.current().await {
                    AgentState::Starting => {
                        if vt.idle_for(settle) {
                            state.set_state(AgentState::Idle).await;
                        }
                    }
                    AgentState::Active => {
                        if vt.idle_for(idle_quiet) && !state.has_tool_in_progress().await {
                            state.set_state(AgentState::Idle).await;
                        }
                    }
                    AgentState::Idle | AgentState::Exited => {}
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };

    // Mirrors every state transition into the activity log (§4.7) — nothing
    // else observes `state.subscribe()`, so without this `state_change`
    // records would never be emitted.
    let state_log_task = {
        let activity = Arc::clone(&activity);
        let mut rx = state.subscribe();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let mut previous = *rx.borrow();
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        let current = *rx.borrow();
                        activity
                            .log_state_change(&previous.to_string(), &current.to_string())
                            .await;
                        previous = current;
                    }
                }
            }
        })
    };

    let heartbeat_task = config.heartbeat.clone().map(|hb| {
        let state = Arc::clone(&state);
        let queue = Arc::clone(&queue);
        let store = MessageStore::new(paths.clone());
        let activity = Arc::clone(&activity);
        let agent_name = spec.agent_name.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            run_heartbeat(hb, state, queue, store, activity, agent_name, shutdown).await
        })
    });

    shutdown.cancelled().await;

    shutdown_sequence(&vt).await;
    let _ = delivery_task.await;
    let _ = accept_task.await;
    let _ = settle_task.await;
    let _ = state_log_task.await;
    if let Some(task) = heartbeat_task {
        task.abort();
    }
    let _ = read_pump.await;
    let _ = tokio::fs::remove_file(&socket_path).await;

    activity.log_session_ended().await;

    if vt.is_hung() {
        return Ok(70);
    }
    let exit_code = match vt.try_wait() {
        Ok(Some(status)) => status.exit_code().clamp(0, 125) as i32,
        _ => 0,
    };
    Ok(exit_code)
}

/// SIGINT, wait 3s, SIGTERM, wait 3s, SIGKILL (§4.9 shutdown sequence).
async fn shutdown_sequence(vt: &Arc<Vt>) {
    let _ = vt.send_sigint();
    if wait_for_exit(vt, Duration::from_secs(3)).await {
        return;
    }
    let _ = vt.send_sigterm();
    if wait_for_exit(vt, Duration::from_secs(3)).await {
        return;
    }
    let _ = vt.kill();
}

async fn wait_for_exit(vt: &Arc<Vt>, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if matches!(vt.try_wait(), Ok(Some(_))) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[allow(clippy::too_many_arguments)]
async fn run_heartbeat(
    hb: crate::config::HeartbeatConfig,
    state: Arc<StateTracker>,
    queue: Arc<MessageQueue>,
    store: MessageStore,
    activity: Arc<ActivityLog>,
    agent_name: String,
    shutdown: CancellationToken,
) {
    let idle_timeout = Duration::from_secs(hb.idle_timeout_secs);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(idle_timeout) => {}
        }
        if state.current().await != AgentState::Idle {
            continue;
        }
        if let Some(condition) = &hb.condition
            && !condition_passes(condition).await
        {
            continue;
        }
        if let Ok((id, path)) = store.persist(&agent_name, &hb.message).await {
            queue
                .enqueue(crate::queue::QueuedMessage {
                    id: id.clone(),
                    priority: h2_protocol::Priority::Normal,
                    from: Some("heartbeat".to_string()),
                    body: hb.message.clone(),
                    file_path: path,
                })
                .await;
            activity.log_message_enqueued(&id, h2_protocol::Priority::Normal).await;
        }
    }
}

async fn condition_passes(condition: &str) -> bool {
    tokio::process::Command::new("sh")
        .arg("-c")
        .arg(condition)
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}
