use async_trait::async_trait;
use std::io::BufRead;
use std::process::Stdio;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::errors::RunnerError;
use crate::phase::{PhaseKind, PhaseSpec};

/// Receives child output, one line at a time, in emission order.
pub trait LineSink: Send + Sync {
    fn line(&self, phase: PhaseKind, line: &str);
}

/// Forwards child output to the tracing subscriber.
pub struct TracingSink;

impl LineSink for TracingSink {
    fn line(&self, phase: PhaseKind, line: &str) {
        info!(target: "testpilot::child", phase = %phase, "{}", line);
    }
}

/// Accumulates child output in memory.
#[derive(Default)]
pub struct CollectingSink {
    lines: Mutex<Vec<(PhaseKind, String)>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }

    pub fn lines_for(&self, phase: PhaseKind) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(kind, _)| *kind == phase)
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl LineSink for CollectingSink {
    fn line(&self, phase: PhaseKind, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((phase, line.to_string()));
    }
}

/// How a child process finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The process exited on its own. `code` is `None` when it was killed by a signal.
    Exited {
        code: Option<i32>,
        duration: Duration,
    },
    /// The phase timeout expired and the process was killed.
    TimedOut { after: Duration },
}

impl RunOutcome {
    pub fn success(&self) -> bool {
        matches!(self, RunOutcome::Exited { code: Some(0), .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            RunOutcome::Exited { code, .. } => *code,
            RunOutcome::TimedOut { .. } => None,
        }
    }
}

/// Launches a phase's external tool and streams its output.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, phase: &PhaseSpec, sink: &dyn LineSink)
    -> Result<RunOutcome, RunnerError>;
}

/// Runs phases as real child processes on the tokio runtime.
///
/// stdout and stderr share one pipe, so lines arrive in exactly the order the
/// child wrote them. The pipe is drained on a reader thread that hands each
/// line to the async side over a channel.
///
/// On unix the child leads its own process group. A timeout kills the whole
/// group, so helpers the tool started (browsers, dev servers) go with it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioProcessRunner;

impl TokioProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        phase: &PhaseSpec,
        sink: &dyn LineSink,
    ) -> Result<RunOutcome, RunnerError> {
        let command_line = phase.display_command();
        let io_err = |source: std::io::Error| RunnerError::Io {
            command: command_line.clone(),
            source,
        };

        let start = Instant::now();
        let (pipe_reader, pipe_writer) = std::io::pipe().map_err(io_err)?;

        // `cmd` holds copies of the write end; it must be dropped right after
        // spawning or the reader never sees EOF.
        let mut child = {
            let stderr_writer = pipe_writer.try_clone().map_err(io_err)?;
            let mut cmd = Command::new(&phase.command);
            cmd.args(&phase.args)
                .current_dir(&phase.working_dir)
                .stdin(Stdio::null())
                .stdout(pipe_writer)
                .stderr(stderr_writer)
                .kill_on_drop(true);
            #[cfg(unix)]
            cmd.process_group(0);
            cmd.spawn().map_err(|source| RunnerError::Spawn {
                command: phase.command.clone(),
                source,
            })?
        };
        debug!(
            phase = %phase.kind,
            pid = child.id().unwrap_or(0),
            "Spawned: {}",
            command_line
        );

        let (tx, mut rx) = mpsc::unbounded_channel::<std::io::Result<String>>();
        // A plain thread, not `spawn_blocking`: runtime shutdown must never wait
        // on a pipe that an escaped descendant still holds open.
        let reader = std::thread::Builder::new()
            .name(format!("testpilot-{}-output", phase.kind))
            .spawn(move || {
                let mut reader = std::io::BufReader::new(pipe_reader);
                let mut buf = Vec::new();
                loop {
                    buf.clear();
                    match reader.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            if tx.send(Ok(decode_line(&buf))).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            let _ = tx.send(Err(e));
                            break;
                        }
                    }
                }
            });
        if let Err(e) = reader {
            kill_process_tree(&mut child, phase.kind).await;
            return Err(io_err(e));
        }

        let stream = async {
            while let Some(item) = rx.recv().await {
                let line = item.map_err(io_err)?;
                sink.line(phase.kind, &line);
            }
            child.wait().await.map_err(io_err)
        };

        let status = match phase.timeout {
            Some(limit) => match tokio::time::timeout(limit, stream).await {
                Ok(status) => status?,
                Err(_) => {
                    warn!(
                        phase = %phase.kind,
                        "No exit after {}s, killing: {}",
                        limit.as_secs_f64(),
                        command_line
                    );
                    kill_process_tree(&mut child, phase.kind).await;
                    return Ok(RunOutcome::TimedOut {
                        after: start.elapsed(),
                    });
                }
            },
            None => stream.await?,
        };

        let duration = start.elapsed();
        debug!(
            phase = %phase.kind,
            "Completed in {:.1}s (exit: {})",
            duration.as_secs_f64(),
            status.code().unwrap_or(-1)
        );

        Ok(RunOutcome::Exited {
            code: status.code(),
            duration,
        })
    }
}

/// Kill the child and, on unix, every process left in its group.
async fn kill_process_tree(child: &mut Child, phase: PhaseKind) {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, killpg};
        use nix::unistd::Pid;

        if let Some(pid) = child.id()
            && let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL)
        {
            warn!(phase = %phase, "Failed to kill process group {}: {}", pid, e);
        }
    }
    if let Err(e) = child.kill().await {
        warn!(phase = %phase, "Failed to kill child: {}", e);
    }
}

fn decode_line(raw: &[u8]) -> String {
    let mut end = raw.len();
    while end > 0 && (raw[end - 1] == b'\n' || raw[end - 1] == b'\r') {
        end -= 1;
    }
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
