use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use h2_protocol::{AgentState, HookEventName};
use tokio::sync::{Mutex, watch};

use crate::queue::MessageQueue;

/// Tracks the agent's inferred state machine and the orthogonal
/// `blocked_on_permission` flag (§4.5 component E).
///
/// `blocked_on_permission` is carried separately from `AgentState` because
/// it can be true while the agent is either `idle` or `active` — a
/// permission prompt can appear mid-turn as well as between turns.
pub struct StateTracker {
    state: Mutex<AgentState>,
    state_entered_at: Mutex<Instant>,
    blocked_on_permission: AtomicBool,
    /// Tool-use ids with a `PreToolUse` seen but no matching `PostToolUse`
    /// yet. `active -> idle` only fires once this is empty (§4.5: "no tool
    /// in progress"); VT quiescence alone isn't enough.
    tools_in_progress: Mutex<HashSet<String>>,
    tx: watch::Sender<AgentState>,
}

impl StateTracker {
    pub fn new(initial: AgentState) -> Arc<Self> {
        let (tx, _rx) = watch::channel(initial);
        Arc::new(Self {
            state: Mutex::new(initial),
            state_entered_at: Mutex::new(Instant::now()),
            blocked_on_permission: AtomicBool::new(false),
            tools_in_progress: Mutex::new(HashSet::new()),
            tx,
        })
    }

    /// Whether any `PreToolUse` is still awaiting its `PostToolUse` — the
    /// other half of the `active -> idle` conjunct alongside VT quiescence.
    pub async fn has_tool_in_progress(&self) -> bool {
        !self.tools_in_progress.lock().await.is_empty()
    }

    pub async fn current(&self) -> AgentState {
        *self.state.lock().await
    }

    pub async fn state_duration(&self) -> Duration {
        self.state_entered_at.lock().await.elapsed()
    }

    pub fn blocked_on_permission(&self) -> bool {
        self.blocked_on_permission.load(Ordering::SeqCst)
    }

    /// Transitions to `new` if different from the current state, resetting
    /// the state-entered clock and notifying subscribers (§4.5).
    pub async fn set_state(&self, new: AgentState) {
        let mut state = self.state.lock().await;
        if *state != new {
            *state = new;
            *self.state_entered_at.lock().await = Instant::now();
            let _ = self.tx.send(new);
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<AgentState> {
        self.tx.subscribe()
    }

    /// Blocks until the agent reaches `Idle` or `timeout` elapses. Returns
    /// whether idle was actually reached (§4.4, used by the interrupt path's
    /// `WaitForIdle`).
    pub async fn wait_for_idle(&self, timeout: Duration) -> bool {
        if self.current().await == AgentState::Idle {
            return true;
        }
        let mut rx = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match tokio::time::timeout_at(deadline, rx.changed()).await {
                Ok(Ok(())) => {
                    if *rx.borrow() == AgentState::Idle {
                        return true;
                    }
                }
                _ => return self.current().await == AgentState::Idle,
            }
        }
    }

    /// Applies a hook notification's effect on state and the permission
    /// gate, pausing/unpausing `queue` as needed (§4.5, GLOSSARY).
    ///
    /// `SessionStart` is accepted but carries no direct transition.
    /// `active -> idle` itself is driven by VT quiescence (the supervisor's
    /// continuous idle-reclassification task), not by any single hook event
    /// — this method only maintains the `tools_in_progress` and
    /// `blocked_on_permission` inputs that task reads.
    pub async fn handle_hook_event(
        &self,
        queue: &MessageQueue,
        event: HookEventName,
        payload: &serde_json::Value,
    ) {
        match event {
            HookEventName::UserPromptSubmit => {
                self.set_state(AgentState::Active).await;
            }
            HookEventName::PreToolUse => {
                if let Some(id) = payload.get("tool_use_id").and_then(|v| v.as_str()) {
                    self.tools_in_progress.lock().await.insert(id.to_string());
                }
                self.set_state(AgentState::Active).await;
            }
            HookEventName::PostToolUse => {
                if let Some(id) = payload.get("tool_use_id").and_then(|v| v.as_str()) {
                    self.tools_in_progress.lock().await.remove(id);
                }
                // §4.5: blocked_on_permission also clears on the next
                // PostToolUse for the tool that was blocked, not only on an
                // explicit permission_decision.
                if self.blocked_on_permission.swap(false, Ordering::SeqCst) {
                    queue.unpause();
                }
            }
            HookEventName::PermissionRequest => {
                self.blocked_on_permission.store(true, Ordering::SeqCst);
                queue.pause();
            }
            HookEventName::PermissionDecision => {
                self.blocked_on_permission.store(false, Ordering::SeqCst);
                queue.unpause();
            }
            HookEventName::Stop => {
                self.set_state(AgentState::Idle).await;
            }
            HookEventName::SessionStart | HookEventName::Unknown => {}
        }
    }
}
