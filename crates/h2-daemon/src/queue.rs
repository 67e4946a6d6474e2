use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use h2_protocol::{MessageId, Priority};
use tokio::sync::{Mutex, Notify};

/// A message that has already been persisted by the message store and is
/// now waiting for delivery (§4.3 component C).
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub id: MessageId,
    pub priority: Priority,
    pub from: Option<String>,
    pub body: String,
    pub file_path: PathBuf,
}

/// Four priority lanes plus a reference-counted pause gate and a collapsing
/// wakeup signal (§4.3).
///
/// `interrupt` and `normal` are FIFO; `idle-first` is LIFO on enqueue (new
/// arrivals jump to the front of that lane, per §4.3); `idle` is FIFO.
/// `idle-first` and `idle` are only eligible for dequeue while the agent is
/// idle — `interrupt` and `normal` are deliverable regardless. `Pause`/
/// `Unpause` are reference-counted since more than one reason (a permission
/// block, an in-flight interrupt) can hold the gate at once; `interrupt`
/// bypasses the gate so a user can still preempt a blocked agent.
pub struct MessageQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    pause_count: AtomicU32,
}

struct QueueInner {
    interrupt: VecDeque<QueuedMessage>,
    normal: VecDeque<QueuedMessage>,
    idle_first: VecDeque<QueuedMessage>,
    idle: VecDeque<QueuedMessage>,
}

impl MessageQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(QueueInner {
                interrupt: VecDeque::new(),
                normal: VecDeque::new(),
                idle_first: VecDeque::new(),
                idle: VecDeque::new(),
            }),
            notify: Notify::new(),
            pause_count: AtomicU32::new(0),
        })
    }

    pub async fn enqueue(&self, message: QueuedMessage) {
        {
            let mut inner = self.inner.lock().await;
            match message.priority {
                Priority::Interrupt => inner.interrupt.push_back(message),
                Priority::Normal => inner.normal.push_back(message),
                Priority::IdleFirst => inner.idle_first.push_front(message),
                Priority::Idle => inner.idle.push_back(message),
            }
        }
        self.notify.notify_one();
    }

    /// Removes a queued (not yet delivered) message by id. Returns true if
    /// it was found and removed.
    pub async fn cancel(&self, id: &MessageId) -> bool {
        let mut inner = self.inner.lock().await;
        for lane in [
            &mut inner.interrupt,
            &mut inner.normal,
            &mut inner.idle_first,
            &mut inner.idle,
        ] {
            if let Some(pos) = lane.iter().position(|m| &m.id == id) {
                lane.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn pause(&self) {
        self.pause_count.fetch_add(1, Ordering::SeqCst);
    }

    pub fn unpause(&self) {
        self.pause_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .ok();
        self.notify.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.pause_count.load(Ordering::SeqCst) > 0
    }

    pub async fn pending_count(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.interrupt.len() + inner.normal.len() + inner.idle_first.len() + inner.idle.len()
    }

    /// Pops the next eligible message, highest priority lane first. `is_idle`
    /// gates whether `idle-first`/`idle` lanes are eligible this round.
    /// Returns `None` if nothing is currently eligible.
    pub async fn try_dequeue(&self, is_idle: bool) -> Option<QueuedMessage> {
        let mut inner = self.inner.lock().await;
        if let Some(m) = inner.interrupt.pop_front() {
            return Some(m);
        }
        if self.is_paused() {
            return None;
        }
        if let Some(m) = inner.normal.pop_front() {
            return Some(m);
        }
        if is_idle {
            if let Some(m) = inner.idle_first.pop_front() {
                return Some(m);
            }
            if let Some(m) = inner.idle.pop_front() {
                return Some(m);
            }
        }
        None
    }

    /// Waits until an eligible message is available and pops it. `is_idle`
    /// is sampled fresh each time the collapsing signal wakes the consumer,
    /// since the agent's idle/active status can change between wakeups.
    pub async fn dequeue(&self, mut is_idle: impl FnMut() -> bool) -> QueuedMessage {
        loop {
            if let Some(m) = self.try_dequeue(is_idle()).await {
                return m;
            }
            self.notify.notified().await;
        }
    }

    /// Waits for the next enqueue/unpause signal without consuming anything.
    /// Used by the delivery scheduler to wake for a fresh eligibility check
    /// alongside its periodic idle-transition poll (§4.4 step 1).
    pub async fn wait_wakeup(&self) {
        self.notify.notified().await;
    }
}
