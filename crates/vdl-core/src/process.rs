//! External process abstraction.
//!
//! A [`ProcessLauncher`] starts one invocation of the external fetcher and
//! hands back a [`RunningProcess`]: a finite, non-restartable stream of
//! output lines plus an exit status. [`CommandLauncher`] is the real
//! implementation on top of `std::process`; tests substitute scripted ones.

use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::LaunchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub stream: Stream,
    pub text: String,
}

impl OutputLine {
    pub fn stdout(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stdout,
            text: text.into(),
        }
    }

    pub fn stderr(text: impl Into<String>) -> Self {
        Self {
            stream: Stream::Stderr,
            text: text.into(),
        }
    }
}

/// Result of waiting for the next output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextLine {
    Line(OutputLine),
    /// All output streams are closed.
    Eof,
    /// The deadline passed before another line arrived.
    TimedOut,
}

/// Result of waiting for exit with a deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Exit code; `None` when terminated by a signal.
    Exited(Option<i32>),
    /// Still running when the deadline passed.
    TimedOut,
}

/// One running invocation of the external program.
pub trait RunningProcess: Send {
    /// Next merged output line, blocking until one arrives, the streams
    /// close, or `deadline` (if any) passes.
    fn next_line(&mut self, deadline: Option<Instant>) -> NextLine;

    /// Waits for exit. `None` means the process was terminated by a signal.
    fn wait(&mut self) -> io::Result<Option<i32>>;

    /// Like [`wait`](Self::wait), giving up once `deadline` passes. The
    /// process keeps running on timeout.
    fn wait_until(&mut self, deadline: Instant) -> io::Result<WaitOutcome>;

    fn kill(&mut self) -> io::Result<()>;
}

/// Starts invocations of one external program.
pub trait ProcessLauncher: Send + Sync {
    fn launch(&self, args: &[String]) -> Result<Box<dyn RunningProcess>, LaunchError>;
}

/// Launches a binary with piped stdout/stderr merged into one line stream.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: PathBuf,
}

impl CommandLauncher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &std::path::Path {
        &self.program
    }
}

impl ProcessLauncher for CommandLauncher {
    fn launch(&self, args: &[String]) -> Result<Box<dyn RunningProcess>, LaunchError> {
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| LaunchError {
                program: self.program.display().to_string(),
                reason: e.to_string(),
            })?;

        let (tx, rx) = mpsc::channel();
        if let Some(out) = child.stdout.take() {
            spawn_reader(out, Stream::Stdout, tx.clone());
        }
        if let Some(err) = child.stderr.take() {
            spawn_reader(err, Stream::Stderr, tx);
        }
        tracing::debug!(program = %self.program.display(), pid = child.id(), "process launched");
        Ok(Box::new(ChildProcess { child, lines: rx }))
    }
}

/// Poll interval for [`RunningProcess::wait_until`] on real children.
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Drops the line terminator (`\n` or `\r\n`) and decodes lossily.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Forwards lines from one pipe until EOF. Invalid UTF-8 is replaced, not
/// fatal, so the pipe keeps draining. The channel closes once every reader
/// has dropped its sender.
fn spawn_reader<R: Read + Send + 'static>(pipe: R, stream: Stream, tx: Sender<OutputLine>) {
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => {
                    let text = decode_line(&buf);
                    if tx.send(OutputLine { stream, text }).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::debug!(?stream, "output pipe read failed: {}", e);
                    break;
                }
            }
        }
    });
}

struct ChildProcess {
    child: Child,
    lines: Receiver<OutputLine>,
}

impl RunningProcess for ChildProcess {
    fn next_line(&mut self, deadline: Option<Instant>) -> NextLine {
        match deadline {
            None => match self.lines.recv() {
                Ok(line) => NextLine::Line(line),
                Err(_) => NextLine::Eof,
            },
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                match self.lines.recv_timeout(remaining) {
                    Ok(line) => NextLine::Line(line),
                    Err(RecvTimeoutError::Timeout) => NextLine::TimedOut,
                    Err(RecvTimeoutError::Disconnected) => NextLine::Eof,
                }
            }
        }
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        Ok(self.child.wait()?.code())
    }

    fn wait_until(&mut self, deadline: Instant) -> io::Result<WaitOutcome> {
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(WaitOutcome::Exited(status.code()));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
            thread::sleep(EXIT_POLL.min(deadline - now));
        }
    }

    fn kill(&mut self) -> io::Result<()> {
        self.child.kill()?;
        // Reap so the child does not linger as a zombie.
        self.child.wait().map(|_| ())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sh(script: &str) -> Box<dyn RunningProcess> {
        CommandLauncher::new("sh")
            .launch(&["-c".to_string(), script.to_string()])
            .unwrap()
    }

    #[test]
    fn missing_binary_is_launch_error() {
        let err = CommandLauncher::new("/nonexistent/vdl-test-binary")
            .launch(&[])
            .err()
            .expect("launch should fail");
        assert_eq!(err.program, "/nonexistent/vdl-test-binary");
    }

    #[test]
    fn stdout_lines_arrive_in_order_then_eof() {
        let mut p = sh("echo one; echo two; echo three");
        let mut seen = Vec::new();
        while let NextLine::Line(line) = p.next_line(None) {
            assert_eq!(line.stream, Stream::Stdout);
            seen.push(line.text);
        }
        assert_eq!(seen, vec!["one", "two", "three"]);
        assert_eq!(p.wait().unwrap(), Some(0));
    }

    #[test]
    fn invalid_utf8_is_replaced_and_later_lines_survive() {
        let mut p = sh("printf 'first\\n\\377bad\\r\\nafter1\\nafter2\\n'");
        let mut seen = Vec::new();
        while let NextLine::Line(line) = p.next_line(None) {
            seen.push(line.text);
        }
        assert_eq!(seen, vec!["first", "\u{FFFD}bad", "after1", "after2"]);
        assert_eq!(p.wait().unwrap(), Some(0));
    }

    #[test]
    fn wait_until_times_out_on_a_process_that_closed_its_pipes() {
        let mut p = sh("exec >/dev/null 2>&1; sleep 5");
        assert_eq!(p.next_line(None), NextLine::Eof);
        let deadline = Instant::now() + Duration::from_millis(100);
        assert_eq!(p.wait_until(deadline).unwrap(), WaitOutcome::TimedOut);
        p.kill().unwrap();
    }

    #[test]
    fn wait_until_reports_exit_code() {
        let mut p = sh("exit 4");
        while p.next_line(None) != NextLine::Eof {}
        let deadline = Instant::now() + Duration::from_secs(5);
        assert_eq!(p.wait_until(deadline).unwrap(), WaitOutcome::Exited(Some(4)));
    }

    #[test]
    fn stderr_is_tagged_and_exit_code_reported() {
        let mut p = sh("echo oops 1>&2; exit 3");
        let mut lines = Vec::new();
        while let NextLine::Line(line) = p.next_line(None) {
            lines.push(line);
        }
        assert_eq!(lines, vec![OutputLine::stderr("oops")]);
        assert_eq!(p.wait().unwrap(), Some(3));
    }

    #[test]
    fn deadline_times_out_and_kill_reaps() {
        let mut p = sh("sleep 5");
        let deadline = Instant::now() + Duration::from_millis(100);
        assert_eq!(p.next_line(Some(deadline)), NextLine::TimedOut);
        p.kill().unwrap();
    }
}
