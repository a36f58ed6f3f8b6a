//! Runs a generated script in a child interpreter with a hard timeout.

use std::io::{self, Read, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::ExecuteConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(20);
/// How long output may keep arriving after the child is gone. A grandchild
/// that inherited the pipes can hold them open indefinitely.
const DRAIN_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// `None` when the child was killed by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub timed_out: bool,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

#[derive(Debug, Clone)]
pub struct Sandbox {
    interpreter: String,
    timeout: Duration,
    stdin: String,
    env: Vec<(String, Option<String>)>,
}

impl Sandbox {
    pub fn new(config: &ExecuteConfig) -> Self {
        Sandbox {
            interpreter: config.interpreter.clone(),
            timeout: config.timeout(),
            stdin: config.stdin_text(),
            env: Vec::new(),
        }
    }

    /// Set (`Some`) or remove (`None`) a variable in the child environment.
    pub fn with_env(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.env.push((key.into(), value));
        self
    }

    pub fn interpreter(&self) -> &str {
        &self.interpreter
    }

    /// Whether the interpreter can be started at all.
    pub fn interpreter_available(&self) -> bool {
        Command::new(&self.interpreter)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok_and(|s| s.success())
    }

    /// Run `script` with `workdir` as the current directory. With
    /// `feed_stdin` the configured responses are written to its stdin;
    /// otherwise stdin is empty.
    pub fn run(&self, script: &Path, workdir: &Path, feed_stdin: bool) -> io::Result<ExecOutput> {
        let mut command = Command::new(&self.interpreter);
        command
            .arg(script)
            .current_dir(workdir)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .stdin(if feed_stdin { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        for (key, value) in &self.env {
            match value {
                Some(v) => command.env(key, v),
                None => command.env_remove(key),
            };
        }

        let start = Instant::now();
        let mut child = command.spawn()?;
        debug!(script = %script.display(), pid = child.id(), "spawned interpreter");

        let feeder = child.stdin.take().map(|mut stdin| {
            let input = self.stdin.clone();
            thread::spawn(move || {
                // The script may exit without reading; a broken pipe is fine.
                let _ = stdin.write_all(input.as_bytes());
            })
        });
        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let (status, timed_out) = loop {
            if let Some(status) = child.try_wait()? {
                break (status, false);
            }
            if start.elapsed() >= self.timeout {
                warn!(script = %script.display(), timeout = ?self.timeout, "killing interpreter");
                // Already exited between the poll and the kill.
                let _ = child.kill();
                break (child.wait()?, true);
            }
            thread::sleep(POLL_INTERVAL);
        };
        let elapsed = start.elapsed();

        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }
        let deadline = Instant::now() + DRAIN_GRACE;
        let stdout = stdout.map(|d| d.collect(deadline)).unwrap_or_default();
        let stderr = stderr.map(|d| d.collect(deadline)).unwrap_or_default();

        Ok(ExecOutput {
            code: status.code(),
            success: succeeded(status, timed_out),
            timed_out,
            stdout,
            stderr,
            elapsed,
        })
    }
}

fn succeeded(status: ExitStatus, timed_out: bool) -> bool {
    !timed_out && status.success()
}

/// Output read so far by a background thread.
struct Drain {
    buf: Arc<Mutex<Vec<u8>>>,
    done: Receiver<()>,
}

impl Drain {
    /// Wait until end of output or `deadline`, then take what arrived. On
    /// timeout the reader thread is left detached.
    fn collect(self, deadline: Instant) -> String {
        let wait = deadline.saturating_duration_since(Instant::now());
        if self.done.recv_timeout(wait).is_err() {
            warn!("output pipe still open after the interpreter exited");
        }
        let bytes = self.buf.lock().map(|b| b.clone()).unwrap_or_default();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Drain {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let shared = Arc::clone(&buf);
    let (tx, done) = mpsc::channel();
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut b) = shared.lock() {
                        b.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        let _ = tx.send(());
    });
    Drain { buf, done }
}

/// Cut `text` to at most `max` bytes on a char boundary.
pub fn truncate(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &text[..end])
}
