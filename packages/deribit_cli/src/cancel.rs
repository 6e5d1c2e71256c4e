//! Operator cancellation of a running stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use tracing::debug;

/// Non-blocking "has the operator asked to stop?" check
pub trait CancelSignal {
    fn is_cancelled(&self) -> bool;
}

/// Shared cancellation flag
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

impl CancelSignal for CancelToken {
    fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A line that asks the stream to stop
pub fn is_cancel_line(line: &str) -> bool {
    matches!(line.trim(), "q" | "Q")
}

/// Watches stdin on a helper thread while a stream runs. A `q` line (or end of
/// input) trips the token. Dropping the watcher stops the thread and joins it,
/// handing stdin back to the line editor.
pub struct StdinCancelWatcher {
    token: CancelToken,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StdinCancelWatcher {
    #[cfg(unix)]
    pub fn spawn() -> Self {
        use std::os::fd::AsRawFd;
        let stdin_fd = std::io::stdin().as_raw_fd();
        Self::start(move |token, shutdown| watch_fd(stdin_fd, token, shutdown))
    }

    #[cfg(not(unix))]
    pub fn spawn() -> Self {
        Self::start(watch_stdin)
    }

    /// Run `watch` on a named helper thread with a fresh token and shutdown flag.
    fn start(watch: impl FnOnce(CancelToken, Arc<AtomicBool>) + Send + 'static) -> Self {
        let token = CancelToken::new();
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_token = token.clone();
        let thread_shutdown = shutdown.clone();
        let thread = std::thread::Builder::new()
            .name("stdin-cancel".into())
            .spawn(move || watch(thread_token, thread_shutdown))
            .map_err(|e| debug!("stdin watcher not started: {}", e))
            .ok();

        Self {
            token,
            shutdown,
            thread,
        }
    }
}

impl CancelSignal for StdinCancelWatcher {
    fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for StdinCancelWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            #[cfg(unix)]
            let _ = thread.join();
            // Without poll the reader may sit in a blocking read; leave it detached.
            #[cfg(not(unix))]
            drop(thread);
        }
    }
}

/// Read `fd` until a cancel line, end of input, or shutdown. Reads go straight
/// to the descriptor so nothing is left buffered for the line editor to miss.
#[cfg(unix)]
fn watch_fd(fd: std::os::fd::RawFd, token: CancelToken, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; 1024];
    let mut pending = String::new();

    while !shutdown.load(Ordering::Relaxed) {
        // 100ms poll timeout so the shutdown flag is seen promptly
        let mut pfd = nix::libc::pollfd {
            fd,
            events: nix::libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { nix::libc::poll(&mut pfd, 1, 100) };
        if ret <= 0 {
            continue;
        }
        let n = unsafe { nix::libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n < 0 && std::io::Error::last_os_error().kind() == std::io::ErrorKind::Interrupted {
            continue;
        }
        if n <= 0 {
            debug!("input closed while streaming");
            token.cancel();
            break;
        }
        pending.push_str(&String::from_utf8_lossy(&buf[..n as usize]));
        if scan_lines(&mut pending) {
            token.cancel();
            break;
        }
    }
}

#[cfg(not(unix))]
fn watch_stdin(token: CancelToken, shutdown: Arc<AtomicBool>) {
    let mut line = String::new();
    while !shutdown.load(Ordering::Relaxed) {
        line.clear();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) | Err(_) => {
                token.cancel();
                break;
            }
            Ok(_) if is_cancel_line(&line) => {
                token.cancel();
                break;
            }
            Ok(_) => {}
        }
    }
}

/// Consume complete lines from `pending`; true once a cancel line shows up.
#[cfg_attr(not(unix), allow(dead_code))]
fn scan_lines(pending: &mut String) -> bool {
    while let Some(end) = pending.find('\n') {
        let line: String = pending.drain(..=end).collect();
        if is_cancel_line(&line) {
            return true;
        }
    }
    false
}
