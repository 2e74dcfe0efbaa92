//! Scripted stand-in for the external fetcher.
//!
//! Scripts are keyed by target (the last argument of an invocation). The
//! launcher records every invocation, tracks how many processes are alive at
//! once, and can hold a process open until the test releases its gate.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use vdl_core::error::LaunchError;
use vdl_core::process::{NextLine, OutputLine, ProcessLauncher, RunningProcess, WaitOutcome};

/// Blocks a process until released.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

#[derive(Clone, Default)]
pub struct Script {
    pub lines: Vec<OutputLine>,
    pub exit_code: i32,
    pub line_delay: Duration,
    pub gate: Option<Arc<Gate>>,
    /// Never produces output; only a deadline ends the read.
    pub hang: bool,
    /// Closes its output normally but never exits on its own.
    pub linger: bool,
    pub launch_error: bool,
}

impl Script {
    pub fn ok(lines: &[&str]) -> Self {
        Self {
            lines: lines.iter().map(|l| OutputLine::stdout(*l)).collect(),
            ..Self::default()
        }
    }

    pub fn json(payload: &str) -> Self {
        Self::ok(&[payload])
    }

    pub fn failing(code: i32, stderr: &[&str]) -> Self {
        Self {
            lines: stderr.iter().map(|l| OutputLine::stderr(*l)).collect(),
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn gated(mut self, gate: &Arc<Gate>) -> Self {
        self.gate = Some(Arc::clone(gate));
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.line_delay = delay;
        self
    }
}

#[derive(Default)]
struct Counters {
    launches: Vec<Vec<String>>,
    active: usize,
    max_active: usize,
    kills: usize,
}

#[derive(Default)]
pub struct FakeLauncher {
    scripts: Mutex<HashMap<String, Script>>,
    counters: Arc<Mutex<Counters>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, target: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap()
            .insert(target.to_string(), script);
    }

    pub fn launch_count(&self) -> usize {
        self.counters.lock().unwrap().launches.len()
    }

    pub fn launches_for(&self, target: &str) -> usize {
        self.counters
            .lock()
            .unwrap()
            .launches
            .iter()
            .filter(|args| args.last().map(String::as_str) == Some(target))
            .count()
    }

    /// Targets in launch order.
    pub fn launched_targets(&self) -> Vec<String> {
        self.counters
            .lock()
            .unwrap()
            .launches
            .iter()
            .filter_map(|args| args.last().cloned())
            .collect()
    }

    pub fn last_args_for(&self, target: &str) -> Option<Vec<String>> {
        self.counters
            .lock()
            .unwrap()
            .launches
            .iter()
            .rev()
            .find(|args| args.last().map(String::as_str) == Some(target))
            .cloned()
    }

    pub fn max_active(&self) -> usize {
        self.counters.lock().unwrap().max_active
    }

    pub fn kills(&self) -> usize {
        self.counters.lock().unwrap().kills
    }

    /// Polls until `n` launches happened; false on timeout.
    pub fn wait_for_launches(&self, n: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.launch_count() >= n {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        self.launch_count() >= n
    }
}

impl ProcessLauncher for FakeLauncher {
    fn launch(&self, args: &[String]) -> Result<Box<dyn RunningProcess>, LaunchError> {
        let target = args.last().cloned().unwrap_or_default();
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&target)
            .cloned()
            .unwrap_or_else(|| Script::json("{}"));
        if script.launch_error {
            return Err(LaunchError {
                program: "fake-yt-dlp".to_string(),
                reason: "No such file or directory".to_string(),
            });
        }
        {
            let mut c = self.counters.lock().unwrap();
            c.launches.push(args.to_vec());
            c.active += 1;
            c.max_active = c.max_active.max(c.active);
        }
        Ok(Box::new(FakeProcess {
            lines: script.lines.clone().into(),
            script,
            gate_passed: false,
            exited: false,
            counters: Arc::clone(&self.counters),
        }))
    }
}

struct FakeProcess {
    script: Script,
    lines: std::collections::VecDeque<OutputLine>,
    gate_passed: bool,
    exited: bool,
    counters: Arc<Mutex<Counters>>,
}

impl FakeProcess {
    fn exit(&mut self) {
        if !self.exited {
            self.exited = true;
            self.counters.lock().unwrap().active -= 1;
        }
    }
}

impl RunningProcess for FakeProcess {
    fn next_line(&mut self, deadline: Option<Instant>) -> NextLine {
        if self.script.hang {
            match deadline {
                Some(d) => {
                    thread::sleep(d.saturating_duration_since(Instant::now()));
                    return NextLine::TimedOut;
                }
                None => return NextLine::Eof,
            }
        }
        if !self.gate_passed {
            if let Some(gate) = &self.script.gate {
                gate.wait();
            }
            self.gate_passed = true;
        }
        match self.lines.pop_front() {
            Some(line) => {
                if !self.script.line_delay.is_zero() {
                    thread::sleep(self.script.line_delay);
                }
                NextLine::Line(line)
            }
            None => NextLine::Eof,
        }
    }

    fn wait(&mut self) -> io::Result<Option<i32>> {
        self.exit();
        Ok(Some(self.script.exit_code))
    }

    fn wait_until(&mut self, deadline: Instant) -> io::Result<WaitOutcome> {
        if self.script.linger {
            thread::sleep(deadline.saturating_duration_since(Instant::now()));
            return Ok(WaitOutcome::TimedOut);
        }
        self.exit();
        Ok(WaitOutcome::Exited(Some(self.script.exit_code)))
    }

    fn kill(&mut self) -> io::Result<()> {
        self.counters.lock().unwrap().kills += 1;
        self.exit();
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.exit();
    }
}
