//! Tools for running the external media tool.
//!
//! A [`Launcher`] starts one process per call and hands back a [`ProcessHandle`]: a lazy sequence of
//! output lines tagged by stream, followed by a completion signal carrying the exit code. A failed
//! launch is reported on the completion signal, never as a line.
//!
//! [`Executor`] builds on top of a launcher to collect the whole output of a short-lived command.

use crate::error::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// How many decoded lines may wait in a handle before the readers stop pulling from the pipes.
const LINE_BUFFER: usize = 256;

/// The stream an output line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// The standard output of the process.
    Stdout,
    /// The standard error of the process.
    Stderr,
}

impl fmt::Display for OutputStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputStream::Stdout => write!(f, "stdout"),
            OutputStream::Stderr => write!(f, "stderr"),
        }
    }
}

/// One fully delimited line of process output, without its line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    /// The stream the line was read from.
    pub stream: OutputStream,
    /// The text of the line.
    pub text: String,
}

impl OutputLine {
    /// Creates a line read from stdout.
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stdout,
            text: text.into(),
        }
    }

    /// Creates a line read from stderr.
    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: OutputStream::Stderr,
            text: text.into(),
        }
    }
}

/// The completion signal of a process: its exit code, or the reason it never ran to completion.
///
/// A process killed by a signal reports `-1`.
pub type Completion = Result<i32>;

/// A handle on a launched process.
///
/// Lines are consumed once with [`ProcessHandle::next_line`]; the sequence cannot be restarted.
/// [`ProcessHandle::wait`] resolves once the process has exited.
#[derive(Debug)]
pub struct ProcessHandle {
    lines: mpsc::Receiver<OutputLine>,
    completion: oneshot::Receiver<Completion>,
    cancellation_token: CancellationToken,
}

impl ProcessHandle {
    /// Returns the next output line, or `None` once both streams are closed.
    pub async fn next_line(&mut self) -> Option<OutputLine> {
        self.lines.recv().await
    }

    /// Waits for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Launch`] if the process never started.
    pub async fn wait(self) -> Completion {
        self.completion
            .await
            .unwrap_or_else(|_| Err(Error::Command("Process supervisor stopped".to_string())))
    }

    /// Kills the process. Lines already read stay available.
    pub fn terminate(&self) {
        self.cancellation_token.cancel();
    }

    /// Builds a handle that replays a fixed script instead of running a process.
    ///
    /// The lines are delivered in order, then the completion signal fires. This is the seam used to
    /// exercise the job machinery without the real tool installed.
    pub fn scripted(lines: Vec<OutputLine>, completion: Completion) -> Self {
        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
        let (completion_tx, completion_rx) = oneshot::channel();

        tokio::spawn(async move {
            for line in lines {
                if line_tx.send(line).await.is_err() {
                    break;
                }
            }
            drop(line_tx);
            let _ = completion_tx.send(completion);
        });

        Self {
            lines: line_rx,
            completion: completion_rx,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// A handle for a process that could not be started: no lines, and a launch error on completion.
    pub fn launch_failed(program: impl AsRef<Path>, reason: impl fmt::Display) -> Self {
        let (_, line_rx) = mpsc::channel(1);
        let (completion_tx, completion_rx) = oneshot::channel();
        let _ = completion_tx.send(Err(Error::Launch {
            program: program.as_ref().to_path_buf(),
            reason: reason.to_string(),
        }));

        Self {
            lines: line_rx,
            completion: completion_rx,
            cancellation_token: CancellationToken::new(),
        }
    }

    fn termination_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }
}

/// Starts external processes.
///
/// Implementations must be called from within a tokio runtime.
pub trait Launcher: Send + Sync {
    /// Starts `program` with `args` and returns a handle on its output and exit.
    fn launch(&self, program: &Path, args: &[String]) -> ProcessHandle;
}

/// Launches real OS processes with piped stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLauncher;

impl Launcher for SystemLauncher {
    fn launch(&self, program: &Path, args: &[String]) -> ProcessHandle {
        #[cfg(feature = "tracing")]
        tracing::debug!("Launching {:?} with args {:?}", program, args);

        let mut command = tokio::process::Command::new(program);
        command.args(args);
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        #[cfg(target_os = "windows")]
        {
            command.creation_flags(0x08000000);
        }

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Failed to launch {:?}: {}", program, e);

                return ProcessHandle::launch_failed(program, e);
            }
        };

        let (line_tx, line_rx) = mpsc::channel(LINE_BUFFER);
        if let Some(stdout) = child.stdout.take() {
            spawn_line_reader(stdout, OutputStream::Stdout, line_tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_reader(stderr, OutputStream::Stderr, line_tx.clone());
        }
        drop(line_tx);

        let cancellation_token = CancellationToken::new();
        let (completion_tx, completion_rx) = oneshot::channel();
        let token = cancellation_token.clone();

        tokio::spawn(async move {
            let completion = tokio::select! {
                _ = token.cancelled() => {
                    let _ = child.kill().await;
                    Err(Error::Command("Process was terminated".to_string()))
                }
                status = child.wait() => match status {
                    Ok(exit_status) => Ok(exit_status.code().unwrap_or(-1)),
                    Err(e) => Err(Error::IO(e)),
                }
            };
            let _ = completion_tx.send(completion);
        });

        ProcessHandle {
            lines: line_rx,
            completion: completion_rx,
            cancellation_token,
        }
    }
}

/// Reads `reader` until EOF and forwards every complete line to `tx`.
///
/// Bytes are buffered until a `\n` arrives, so a line split across several reads is emitted once.
/// A trailing `\r` is dropped and invalid UTF-8 is replaced. Once the receiver is gone the pipe is
/// still drained so the process never blocks on a full pipe.
pub(crate) fn spawn_line_reader<R>(reader: R, stream: OutputStream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buffer = Vec::new();

        loop {
            buffer.clear();
            match reader.read_until(b'\n', &mut buffer).await {
                Ok(0) => break,
                Ok(_) => {
                    if tx.is_closed() {
                        continue;
                    }
                    let line = OutputLine {
                        stream,
                        text: decode_line(&buffer),
                    };
                    let _ = tx.send(line).await;
                }
                Err(_e) => {
                    #[cfg(feature = "tracing")]
                    tracing::warn!("Failed to read process {}: {}", stream, _e);
                    break;
                }
            }
        }
    });
}

fn decode_line(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

/// Represents a command executor.
///
/// # Example
///
/// ```rust,no_run
/// # use tubedrop_core::utils;
/// # use std::path::PathBuf;
/// # use std::time::Duration;
/// # use tubedrop_core::executor::{Executor, SystemLauncher};
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let args = vec!["--version"];
///
/// let executor = Executor {
///     executable_path: PathBuf::from("yt-dlp"),
///     timeout: Duration::from_secs(30),
///     args: utils::to_owned(args),
/// };
///
/// let output = executor.execute(&SystemLauncher).await?;
/// println!("Output: {}", output.stdout);
///
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Executor {
    /// The path to the command executable.
    pub executable_path: PathBuf,
    /// The timeout for the process.
    pub timeout: Duration,

    /// The arguments to pass to the command.
    pub args: Vec<String>,
}

/// Represents the output of a process.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessOutput {
    /// The stdout of the process, one line per output line.
    pub stdout: String,
    /// The stderr of the process, one line per output line.
    pub stderr: String,
    /// The exit code of the process.
    pub code: i32,
}

impl Executor {
    /// Executes the command and returns the output.
    ///
    /// # Errors
    ///
    /// This function will return an error if the command could not be launched, if it exited with a
    /// nonzero code, or if the process timed out.
    pub async fn execute(&self, launcher: &dyn Launcher) -> Result<ProcessOutput> {
        #[cfg(feature = "tracing")]
        tracing::debug!("Executing command: {:?}", self);

        let mut handle = launcher.launch(&self.executable_path, &self.args);
        let token = handle.termination_token();

        let collect = async {
            let mut stdout = String::new();
            let mut stderr = String::new();

            while let Some(line) = handle.next_line().await {
                let target = match line.stream {
                    OutputStream::Stdout => &mut stdout,
                    OutputStream::Stderr => &mut stderr,
                };
                target.push_str(&line.text);
                target.push('\n');
            }

            (stdout, stderr, handle.wait().await)
        };

        let (stdout, stderr, completion) = match tokio::time::timeout(self.timeout, collect).await {
            Ok(result) => result,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Process timed out after {:?}, killing it", self.timeout);

                token.cancel();
                return Err(Error::Timeout(self.timeout));
            }
        };

        let code = completion?;
        if code == 0 {
            return Ok(ProcessOutput {
                stdout,
                stderr,
                code,
            });
        }

        Err(Error::Command(format!(
            "Process failed with code {}: {}",
            code,
            stderr.trim_end()
        )))
    }
}
