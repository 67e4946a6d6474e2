pub mod markers;
pub mod screen;

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use portable_pty::{Child, CommandBuilder, ExitStatus, MasterPty, PtySize, native_pty_system};
use tokio::sync::broadcast;
use vte::{Params, Perform};

use crate::errors::DaemonError;
use screen::Screen;

const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Owns the PTY master and the single child process it drives, the parsed
/// screen/scrollback model, and the bounded PTY writer (§2 component A).
///
/// `Write` (child -> VT) and `WritePTY` (VT -> child) are both exposed here;
/// all PTY writes are serialized through `writer` and all screen mutation
/// through `inner`, matching the "PTY master exclusive to A" ownership rule
/// in §3/§5.
pub struct Vt {
    inner: Mutex<VtInner>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    master: Box<dyn MasterPty + Send>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    output_seq: AtomicU64,
    last_output_time: Mutex<Instant>,
    last_cursor: Mutex<(usize, usize)>,
    last_cursor_moved: Mutex<Instant>,
    output_tx: broadcast::Sender<Vec<u8>>,
    markers: Vec<&'static str>,
    hung: AtomicBool,
}

struct VtInner {
    parser: vte::Parser,
    screen: Screen,
    scrollback: VecDeque<String>,
    scrollback_capacity: usize,
}

impl VtInner {
    fn feed(&mut self, bytes: &[u8]) {
        let mut perform = VtPerform {
            screen: &mut self.screen,
            scrollback: &mut self.scrollback,
            capacity: self.scrollback_capacity,
        };
        for &b in bytes {
            self.parser.advance(&mut perform, b);
        }
    }
}

struct VtPerform<'a> {
    screen: &'a mut Screen,
    scrollback: &'a mut VecDeque<String>,
    capacity: usize,
}

impl VtPerform<'_> {
    fn push_scrollback(&mut self, line: Option<String>) {
        if let Some(line) = line {
            if self.scrollback.len() >= self.capacity {
                self.scrollback.pop_front();
            }
            self.scrollback.push_back(line);
        }
    }
}

impl Perform for VtPerform<'_> {
    fn print(&mut self, c: char) {
        let scrolled = self.screen.put_char(c);
        self.push_scrollback(scrolled);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                let scrolled = self.screen.line_feed();
                self.push_scrollback(scrolled);
            }
            b'\r' => self.screen.carriage_return(),
            0x08 => self.screen.backspace(),
            _ => {}
        }
    }

    fn csi_dispatch(&mut self, params: &Params, _intermediates: &[u8], _ignore: bool, action: char) {
        let values: Vec<i64> = params
            .iter()
            .map(|p| p.first().copied().unwrap_or(0) as i64)
            .collect();
        let nth = |i: usize, default: i64| -> i64 {
            values.get(i).copied().filter(|v| *v != 0).unwrap_or(default)
        };
        match action {
            'H' | 'f' => {
                let row = nth(0, 1) - 1;
                let col = nth(1, 1) - 1;
                self.screen.move_cursor_to(row.max(0) as usize, col.max(0) as usize);
            }
            'A' => self.screen.move_cursor_relative(-nth(0, 1), 0),
            'B' => self.screen.move_cursor_relative(nth(0, 1), 0),
            'C' => self.screen.move_cursor_relative(0, nth(0, 1)),
            'D' => self.screen.move_cursor_relative(0, -nth(0, 1)),
            'J' => self.screen.erase_in_display(nth(0, 0).max(0) as u16),
            'K' => self.screen.erase_in_line(nth(0, 0).max(0) as u16),
            _ => {}
        }
    }

    fn osc_dispatch(&mut self, params: &[&[u8]], _bell_terminated: bool) {
        if let [kind, title, ..] = params
            && matches!(*kind, b"0" | b"1" | b"2")
            && let Ok(title) = std::str::from_utf8(title)
        {
            self.screen.set_title(title.to_string());
        }
    }
}

impl Vt {
    /// Forks the child under a fresh PTY and returns the owning `Vt` plus
    /// the raw PTY reader half — the caller (the daemon supervisor) owns
    /// the read pump task, mirroring the split between PTY ownership and
    /// the blocking read loop in the teacher's `pty::manager`/`pty::output`.
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: &str,
        env_vars: &HashMap<String, String>,
        rows: u16,
        cols: u16,
        harness: &str,
        scrollback_capacity: usize,
    ) -> Result<(Arc<Vt>, Box<dyn std::io::Read + Send>), DaemonError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DaemonError::PtyError(e.to_string()))?;

        let mut cmd = CommandBuilder::new(command);
        cmd.args(args);
        cmd.cwd(cwd);
        for (k, v) in env_vars {
            cmd.env(k, v);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DaemonError::PtyError(e.to_string()))?;
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DaemonError::PtyError(e.to_string()))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DaemonError::PtyError(e.to_string()))?;

        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);

        let vt = Arc::new(Vt {
            inner: Mutex::new(VtInner {
                parser: vte::Parser::new(),
                screen: Screen::new(rows as usize, cols as usize),
                scrollback: VecDeque::new(),
                scrollback_capacity,
            }),
            writer: Arc::new(Mutex::new(writer)),
            master: pair.master,
            child: Mutex::new(child),
            output_seq: AtomicU64::new(0),
            last_output_time: Mutex::new(Instant::now()),
            last_cursor: Mutex::new((0, 0)),
            last_cursor_moved: Mutex::new(Instant::now()),
            output_tx,
            markers: markers::markers_for_harness(harness),
            hung: AtomicBool::new(false),
        });

        Ok((vt, reader))
    }

    /// Feeds child output into the parser, threadsafe (§4.1 `Write`
    /// contract). Advances `output_seq`, `last_output_time`, and the
    /// cursor-moved clock, then fans the raw bytes out to attach subscribers.
    pub fn write(&self, bytes: &[u8]) {
        let cursor = {
            let mut inner = self.inner.lock().unwrap();
            inner.feed(bytes);
            inner.screen.cursor()
        };

        self.output_seq.fetch_add(bytes.len() as u64, Ordering::Relaxed);
        *self.last_output_time.lock().unwrap() = Instant::now();

        let mut last_cursor = self.last_cursor.lock().unwrap();
        if *last_cursor != cursor {
            *last_cursor = cursor;
            *self.last_cursor_moved.lock().unwrap() = Instant::now();
        }
        drop(last_cursor);

        // Dropped receivers (no attached clients) are expected; ignore.
        let _ = self.output_tx.send(bytes.to_vec());
    }

    /// Writes to the PTY master with a hard deadline (§4.1 `WritePTY`).
    /// On timeout, marks the VT hung and returns `PtyWriteTimeout` — the
    /// caller (the delivery scheduler) is responsible for the SIGTERM/SIGKILL
    /// escalation described in §4.1.
    pub async fn write_pty(&self, data: Vec<u8>, timeout: Duration) -> Result<(), DaemonError> {
        let writer = Arc::clone(&self.writer);
        let result = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(move || -> std::io::Result<()> {
                let mut w = writer.lock().unwrap();
                w.write_all(&data)?;
                w.flush()
            }),
        )
        .await;

        match result {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(DaemonError::Io(e)),
            Ok(Err(_join_err)) => Err(DaemonError::PtyError("writer task panicked".to_string())),
            Err(_elapsed) => {
                self.hung.store(true, Ordering::SeqCst);
                Err(DaemonError::PtyWriteTimeout)
            }
        }
    }

    /// The idle classification rule in §4.1: quiet output, quiet cursor, and
    /// no harness-specific working marker currently on screen.
    pub fn is_idle(&self, idle_quiet: Duration) -> bool {
        let quiet_output = self.last_output_time.lock().unwrap().elapsed() >= idle_quiet;
        let quiet_cursor = self.last_cursor_moved.lock().unwrap().elapsed() >= idle_quiet;
        let no_marker = {
            let inner = self.inner.lock().unwrap();
            !self.markers.iter().any(|m| inner.screen.contains_marker(m))
        };
        quiet_output && quiet_cursor && no_marker
    }

    /// `idle_for(d)`: true if quiescent for at least `d` (§3 VT model).
    pub fn idle_for(&self, d: Duration) -> bool {
        self.is_idle(d)
    }

    /// Current screen plus the last `scrollback_lines` scrollback lines,
    /// for attach's snapshot phase (§4.8).
    pub fn snapshot(&self, scrollback_lines: usize) -> (Vec<String>, Vec<String>) {
        let inner = self.inner.lock().unwrap();
        let screen_lines = inner.screen.snapshot_text();
        let tail_start = inner.scrollback.len().saturating_sub(scrollback_lines);
        let scrollback_tail = inner.scrollback.iter().skip(tail_start).cloned().collect();
        (screen_lines, scrollback_tail)
    }

    /// A channel of incremental output frames for attach streaming (§4.1
    /// `Subscribe`). Slow subscribers that don't keep up simply miss frames
    /// once tokio's broadcast buffer lags — the attach bridge surfaces this
    /// to the client as a dropped-bytes notice.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output_tx.subscribe()
    }

    pub fn resize(&self, rows: u16, cols: u16) -> Result<(), DaemonError> {
        self.master
            .resize(PtySize {
                rows,
                cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| DaemonError::PtyError(e.to_string()))?;
        self.inner.lock().unwrap().screen.resize(rows as usize, cols as usize);
        Ok(())
    }

    pub fn is_hung(&self) -> bool {
        self.hung.load(Ordering::SeqCst)
    }

    pub fn child_pid(&self) -> Option<u32> {
        self.child.lock().unwrap().process_id()
    }

    /// Non-blocking poll for child exit (§4.9 "child-exit without stop").
    pub fn try_wait(&self) -> Result<Option<ExitStatus>, DaemonError> {
        self.child
            .lock()
            .unwrap()
            .try_wait()
            .map_err(|e| DaemonError::PtyError(e.to_string()))
    }

    /// Sends SIGTERM to the child (§4.1 hung-child detection, §4.9 shutdown).
    pub fn send_sigterm(&self) -> Result<(), DaemonError> {
        let Some(pid) = self.child_pid() else {
            return Ok(());
        };
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| DaemonError::PtyError(e.to_string()))
    }

    /// Sends SIGINT to the child (§4.9 graceful shutdown's first step).
    pub fn send_sigint(&self) -> Result<(), DaemonError> {
        let Some(pid) = self.child_pid() else {
            return Ok(());
        };
        signal::kill(Pid::from_raw(pid as i32), Signal::SIGINT)
            .map_err(|e| DaemonError::PtyError(e.to_string()))
    }

    /// Forcibly kills the child (SIGKILL escalation, §4.1/§4.9).
    pub fn kill(&self) -> Result<(), DaemonError> {
        self.child
            .lock()
            .unwrap()
            .kill()
            .map_err(|e| DaemonError::PtyError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_idle_false_when_output_recent() {
        let mut inner = VtInner {
            parser: vte::Parser::new(),
            screen: Screen::new(5, 20),
            scrollback: VecDeque::new(),
            scrollback_capacity: 100,
        };
        inner.feed(b"hello");
        // last_output_time defaults to "now" in a real Vt; this test only
        // exercises the parser feed path in isolation since constructing a
        // full Vt requires a real PTY.
        assert_eq!(inner.screen.cursor(), (0, 5));
    }

    #[test]
    fn test_csi_cursor_position() {
        let mut inner = VtInner {
            parser: vte::Parser::new(),
            screen: Screen::new(10, 10),
            scrollback: VecDeque::new(),
            scrollback_capacity: 100,
        };
        inner.feed(b"\x1b[3;4H");
        assert_eq!(inner.screen.cursor(), (2, 3));
    }

    #[test]
    fn test_csi_erase_line() {
        let mut inner = VtInner {
            parser: vte::Parser::new(),
            screen: Screen::new(2, 10),
            scrollback: VecDeque::new(),
            scrollback_capacity: 100,
        };
        inner.feed(b"hello\x1b[2K");
        assert_eq!(inner.screen.snapshot_text()[0], "");
    }

    #[test]
    fn test_osc_title_capture() {
        let mut inner = VtInner {
            parser: vte::Parser::new(),
            screen: Screen::new(2, 10),
            scrollback: VecDeque::new(),
            scrollback_capacity: 100,
        };
        inner.feed(b"\x1b]0;my-title\x07");
        assert_eq!(inner.screen.title(), "my-title");
    }

    #[test]
    fn test_scrollback_bounded() {
        let mut inner = VtInner {
            parser: vte::Parser::new(),
            screen: Screen::new(1, 5),
            scrollback: VecDeque::new(),
            scrollback_capacity: 2,
        };
        inner.feed(b"a\nb\nc\n");
        assert!(inner.scrollback.len() <= 2);
    }
}
