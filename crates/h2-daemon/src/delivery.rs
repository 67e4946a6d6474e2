use std::sync::Arc;
use std::time::Duration;

use h2_protocol::{MessageStatus, Priority};

use crate::activity::ActivityLog;
use crate::agent_state::StateTracker;
use crate::config::DaemonConfig;
use crate::queue::{MessageQueue, QueuedMessage};
use crate::vt::Vt;

/// Drives messages out of the queue and into the PTY (§4.4 component D).
///
/// One scheduler per agent, single consumer of the queue — this is the only
/// writer of non-interrupt payload bytes, so delivery order is exactly the
/// queue's dequeue order.
pub struct DeliveryScheduler {
    queue: Arc<MessageQueue>,
    vt: Arc<Vt>,
    state: Arc<StateTracker>,
    activity: Arc<ActivityLog>,
    config: DaemonConfig,
}

/// Outcome of one delivery attempt, used by the supervisor to decide whether
/// the agent should be marked hung.
pub enum DeliveryOutcome {
    Delivered,
    TimedOut,
}

impl DeliveryScheduler {
    pub fn new(
        queue: Arc<MessageQueue>,
        vt: Arc<Vt>,
        state: Arc<StateTracker>,
        activity: Arc<ActivityLog>,
        config: DaemonConfig,
    ) -> Self {
        Self {
            queue,
            vt,
            state,
            activity,
            config,
        }
    }

    /// Runs until `shutdown` fires. Wakes on the queue's collapsing signal
    /// or a 1-second interval (§4.4 step 1) — the interval catches the case
    /// where an `idle`/`idle-first` message is already queued and only
    /// becomes eligible once the agent transitions to idle on its own,
    /// which doesn't itself signal the queue. Each wakeup drains everything
    /// currently eligible (§4.4 step 2) before going back to sleep.
    ///
    /// A delivery timeout ends the loop and runs the hung-child escalation
    /// (§4.1), then cancels `shutdown` itself — nothing else observes a hang,
    /// so without this the daemon would sit past `shutdown.cancelled().await`
    /// in the supervisor forever instead of reaching SIGKILL/exit 70.
    pub async fn run(&self, shutdown: tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {}
                _ = self.queue.wait_wakeup() => {}
            }
            if self.drain().await.is_err() {
                self.handle_hang().await;
                shutdown.cancel();
                return;
            }
        }
    }

    /// Hung-child escalation (§4.1): SIGTERM, wait `hang_grace_ms`, and
    /// SIGKILL if the child still hasn't exited, then mark the agent
    /// `exited` so the control path refuses further enqueues.
    async fn handle_hang(&self) {
        let _ = self.vt.send_sigterm();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.hang_grace_ms);
        while tokio::time::Instant::now() < deadline {
            if matches!(self.vt.try_wait(), Ok(Some(_))) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        if !matches!(self.vt.try_wait(), Ok(Some(_))) {
            let _ = self.vt.kill();
        }
        self.state.set_state(h2_protocol::AgentState::Exited).await;
    }

    /// Drains every currently eligible message, stopping once `Dequeue`
    /// would block (§4.4 step 2). Returns `Err` if a delivery timed out,
    /// which ends the scheduler loop per spec (the agent is hung).
    async fn drain(&self) -> Result<(), ()> {
        loop {
            let is_idle = self.vt.is_idle(Duration::from_millis(self.config.idle_quiet_ms));
            let Some(message) = self.queue.try_dequeue(is_idle).await else {
                return Ok(());
            };

            match self.deliver(&message).await {
                DeliveryOutcome::Delivered => {
                    self.activity
                        .log_message_delivered(&message.id, message.priority)
                        .await;
                }
                DeliveryOutcome::TimedOut => {
                    self.activity.log_agent_hung().await;
                    return Err(());
                }
            }
        }
    }

    async fn deliver(&self, message: &QueuedMessage) -> DeliveryOutcome {
        if message.priority == Priority::Interrupt {
            self.run_interrupt_preempt().await;
        }

        let payload = if message.file_path.as_os_str().is_empty() {
            message.body.clone()
        } else {
            format!(
                "[h2-message from={} id={} priority={}] Read {}",
                message.from.as_deref().unwrap_or(""),
                message.id,
                message.priority,
                message.file_path.display()
            )
        };

        let write_timeout = Duration::from_millis(self.config.pty_write_timeout_ms);
        if self
            .vt
            .write_pty(payload.into_bytes(), write_timeout)
            .await
            .is_err()
        {
            return DeliveryOutcome::TimedOut;
        }

        tokio::time::sleep(Duration::from_millis(50)).await;

        if self
            .vt
            .write_pty(b"\r".to_vec(), write_timeout)
            .await
            .is_err()
        {
            return DeliveryOutcome::TimedOut;
        }

        DeliveryOutcome::Delivered
    }

    /// Up to `interrupt_retries` attempts of Ctrl-C + `WaitForIdle`. Proceeds
    /// to payload write regardless of whether idle was ever reached (§4.4).
    async fn run_interrupt_preempt(&self) {
        let wait = Duration::from_millis(self.config.interrupt_wait_ms);
        for _ in 0..self.config.interrupt_retries {
            let _ = self
                .vt
                .write_pty(vec![0x03], Duration::from_millis(self.config.pty_write_timeout_ms))
                .await;
            if self.state.wait_for_idle(wait).await {
                return;
            }
        }
    }
}

#[allow(dead_code)]
fn message_status_label(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Queued => "queued",
        MessageStatus::Delivered => "delivered",
        MessageStatus::Cancelled => "cancelled",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLog;
    use crate::agent_state::StateTracker;
    use std::collections::HashMap;

    #[test]
    fn test_reference_line_format() {
        let line = format!(
            "[h2-message from={} id={} priority={}] Read {}",
            "user", "abc-123", "normal", "/home/x/.h2/sessions/a1/messages/20260101-000000-abcd1234.md"
        );
        assert_eq!(
            line,
            "[h2-message from=user id=abc-123 priority=normal] Read /home/x/.h2/sessions/a1/messages/20260101-000000-abcd1234.md"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_handle_hang_kills_child_ignoring_sigterm_and_marks_exited() {
        let (vt, _reader) = Vt::spawn(
            "sh",
            &["-c".to_string(), "trap '' TERM; sleep 5".to_string()],
            "/tmp",
            &HashMap::new(),
            24,
            80,
            "generic",
            100,
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let activity = Arc::new(
            ActivityLog::open(&dir.path().join("activity.jsonl"), "a1", "s1").await.unwrap(),
        );
        let mut config = DaemonConfig::default();
        config.hang_grace_ms = 100;
        let scheduler = DeliveryScheduler::new(
            MessageQueue::new(),
            Arc::clone(&vt),
            StateTracker::new(h2_protocol::AgentState::Active),
            activity,
            config,
        );

        scheduler.handle_hang().await;

        assert!(matches!(vt.try_wait(), Ok(Some(_))));
        assert_eq!(scheduler.state.current().await, h2_protocol::AgentState::Exited);
    }
}
