//! Supervision of the long-lived `flutter run` process.

use anyhow::{Context, Result};
use reconcile::config::DevServerConfig;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshSignal {
    HotReload,
    FullRestart,
}

impl RefreshSignal {
    fn command(self) -> &'static [u8] {
        match self {
            RefreshSignal::HotReload => b"r\n",
            RefreshSignal::FullRestart => b"R\n",
        }
    }
}

pub struct DevServer {
    child: Child,
    stdin: Option<ChildStdin>,
    ready: Receiver<()>,
    readers: Vec<JoinHandle<()>>,
    stopped: bool,
}

impl DevServer {
    /// Spawns the dev server in `root` and starts draining its output.
    pub fn start(config: &DevServerConfig, root: &Path) -> Result<Self> {
        let mut command = Command::new(&config.program);
        command.args(&config.args).current_dir(root);
        if let Some(device) = &config.device {
            command.args(["-d", device]);
        }
        let mut child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to start {}", config.program))?;
        tracing::info!(program = %config.program, "dev server started");

        let (tx, ready) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader("stdout", stdout, config.ready_marker.clone(), tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader("stderr", stderr, config.ready_marker.clone(), tx));
        }

        Ok(Self {
            stdin: child.stdin.take(),
            child,
            ready,
            readers,
            stopped: false,
        })
    }

    /// Blocks until the readiness marker shows up, the output closes, or `timeout` passes.
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        self.ready.recv_timeout(timeout).is_ok()
    }

    pub fn send(&mut self, signal: RefreshSignal) -> Result<()> {
        let stdin = self.stdin.as_mut().context("dev server stdin is closed")?;
        stdin
            .write_all(signal.command())
            .and_then(|_| stdin.flush())
            .context("Failed to signal dev server")?;
        tracing::info!(?signal, "dev server signalled");
        Ok(())
    }

    /// Asks the server to quit, killing it after a grace period.
    pub fn stop(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;

        if let Some(mut stdin) = self.stdin.take() {
            let _ = stdin.write_all(b"q\n");
        }
        let deadline = Instant::now() + STOP_GRACE;
        while Instant::now() < deadline {
            if self.child.try_wait()?.is_some() {
                break;
            }
            thread::sleep(Duration::from_millis(100));
        }
        if self.child.try_wait()?.is_none() {
            tracing::warn!("dev server did not quit, killing it");
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
        // Grandchildren may keep the pipes open; readers are detached, not joined.
        self.readers.clear();
        tracing::info!("dev server stopped");
        Ok(())
    }
}

impl Drop for DevServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// Observes one output stream. Never touches project state.
fn spawn_reader<R: Read + Send + 'static>(
    stream: &'static str,
    output: R,
    marker: String,
    ready: Sender<()>,
) -> JoinHandle<()> {
    thread::spawn(move || {
        for line in BufReader::new(output).lines() {
            let Ok(line) = line else {
                break;
            };
            tracing::debug!(stream, "{}", line);
            if line.contains(&marker) {
                let _ = ready.send(());
            }
        }
    })
}
