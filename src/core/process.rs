//! Executor process handle: one child per call, killed exactly once.

use crate::config::types::{EvaluatorError, ExecutorSpec, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, killpg, Signal};
use nix::unistd::Pid;
use std::io::Write;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

fn to_process_error(prefix: &str, err: impl std::fmt::Display) -> EvaluatorError {
    EvaluatorError::Process(format!("{prefix}: {err}"))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A spawned worker. Shared between the bridge (which drives its streams) and
/// whoever is responsible for terminating it.
#[derive(Debug)]
pub struct ExecutorProcess {
    language: String,
    pid: Pid,
    child: Mutex<Child>,
    stdin: Mutex<Option<ChildStdin>>,
    stdout: Mutex<Option<ChildStdout>>,
    stderr: Mutex<Option<ChildStderr>>,
    terminated: AtomicBool,
}

impl ExecutorProcess {
    /// Start `spec` with the parent's environment plus the spec's overrides,
    /// in its own process group, with all three streams piped.
    pub fn spawn(language: &str, spec: &ExecutorSpec) -> Result<Self> {
        let mut cmd = Command::new(&spec.executable);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        let mut child = cmd.spawn().map_err(|e| {
            to_process_error(
                &format!("Could not start executor {} for {}", spec.executable, language),
                e,
            )
        })?;
        let pid = Pid::from_raw(child.id() as i32);
        log::debug!("spawned {} executor {} (pid {})", language, spec.executable, pid);

        Ok(Self {
            language: language.to_string(),
            pid,
            stdin: Mutex::new(child.stdin.take()),
            stdout: Mutex::new(child.stdout.take()),
            stderr: Mutex::new(child.stderr.take()),
            child: Mutex::new(child),
            terminated: AtomicBool::new(false),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    /// Stdout can be taken once; the bridge owns reading it.
    pub fn take_stdout(&self) -> Option<ChildStdout> {
        lock(&self.stdout).take()
    }

    pub fn take_stderr(&self) -> Option<ChildStderr> {
        lock(&self.stderr).take()
    }

    /// Write one newline-terminated line to the worker's stdin.
    pub fn write_line(&self, line: &str) -> Result<()> {
        let mut stdin = lock(&self.stdin);
        let pipe = stdin.as_mut().ok_or_else(|| {
            EvaluatorError::Process(format!("stdin of pid {} is already closed", self.pid))
        })?;
        pipe.write_all(line.as_bytes())?;
        pipe.write_all(b"\n")?;
        pipe.flush()?;
        Ok(())
    }

    /// Drop stdin so a worker blocked on input sees EOF. Returns false if it
    /// was already closed.
    pub fn close_stdin(&self) -> bool {
        lock(&self.stdin).take().is_some()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// SIGKILL the worker's process group and reap the worker. Only the first
    /// call signals; it returns true, every later call returns false.
    ///
    /// The signal goes out before stdin is touched: a `write_line` blocked on
    /// a full pipe holds the stdin lock until the worker dies.
    pub fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }

        // The worker leads its own group, so this also reaches grandchildren.
        match killpg(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => log::warn!("failed to kill process group {}: {}", self.pid, e),
        }
        match kill(self.pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => {
                self.close_stdin();
                if let Err(e) = lock(&self.child).wait() {
                    log::warn!("failed to reap pid {}: {}", self.pid, e);
                }
            }
            Err(e) => log::warn!("failed to kill pid {}: {}", self.pid, e),
        }
        log::debug!("terminated {} executor (pid {})", self.language, self.pid);
        true
    }
}

impl Drop for ExecutorProcess {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    fn sh(script: &str) -> ExecutorSpec {
        ExecutorSpec::new("/bin/sh", &["-c", script])
    }

    #[test]
    fn echoes_a_line_with_merged_env() {
        let spec = sh("read line; echo \"$GREETING $line\"").with_env("GREETING", "hello");
        let process = ExecutorProcess::spawn("shell", &spec).unwrap();
        process.write_line("world").unwrap();

        let mut out = BufReader::new(process.take_stdout().unwrap());
        let mut line = String::new();
        out.read_line(&mut line).unwrap();
        assert_eq!(line, "hello world\n");
        assert!(process.take_stdout().is_none());
    }

    #[test]
    fn runs_in_its_own_process_group() {
        let process = ExecutorProcess::spawn("shell", &sh("sleep 5")).unwrap();
        let group = nix::unistd::getpgid(Some(process.pid())).unwrap();
        assert_eq!(group, process.pid());
        assert!(process.terminate());
    }

    #[test]
    fn terminate_signals_exactly_once() {
        let process = ExecutorProcess::spawn("shell", &sh("sleep 30")).unwrap();
        assert!(!process.is_terminated());
        assert!(process.terminate());
        assert!(!process.terminate());
        assert!(process.is_terminated());
        assert!(process.write_line("late").is_err());
    }

    #[test]
    fn terminate_after_natural_exit_is_quiet() {
        let process = ExecutorProcess::spawn("shell", &sh("exit 0")).unwrap();
        let mut out = process.take_stdout().unwrap();
        let mut sink = Vec::new();
        std::io::Read::read_to_end(&mut out, &mut sink).unwrap();
        assert!(process.terminate());
    }

    #[test]
    fn terminate_unblocks_a_stuck_writer() {
        let process = std::sync::Arc::new(
            ExecutorProcess::spawn("shell", &sh("exec sleep 30")).unwrap(),
        );
        let writer = {
            let process = std::sync::Arc::clone(&process);
            std::thread::spawn(move || process.write_line(&"x".repeat(1 << 20)))
        };
        std::thread::sleep(std::time::Duration::from_millis(100));

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        {
            let process = std::sync::Arc::clone(&process);
            std::thread::spawn(move || {
                let _ = done_tx.send(process.terminate());
            });
        }
        assert_eq!(
            done_rx.recv_timeout(std::time::Duration::from_secs(5)),
            Ok(true)
        );
        assert!(writer.join().unwrap().is_err());
    }

    #[test]
    fn terminate_kills_the_whole_group() {
        // The background sleep inherits stdout; EOF means it died too.
        let process =
            ExecutorProcess::spawn("shell", &sh("sleep 30 & echo started; wait")).unwrap();
        let mut out = BufReader::new(process.take_stdout().unwrap());
        let mut line = String::new();
        out.read_line(&mut line).unwrap();
        assert_eq!(line, "started\n");

        assert!(process.terminate());
        let (eof_tx, eof_rx) = crossbeam_channel::bounded(1);
        std::thread::spawn(move || {
            let mut rest = Vec::new();
            let _ = eof_tx.send(std::io::Read::read_to_end(&mut out, &mut rest).is_ok());
        });
        assert_eq!(
            eof_rx.recv_timeout(std::time::Duration::from_secs(5)),
            Ok(true)
        );
    }

    #[test]
    fn missing_executable_is_a_process_error() {
        let spec = ExecutorSpec::new("/nonexistent/worker", &[]);
        let err = ExecutorProcess::spawn("ghost", &spec).unwrap_err();
        assert!(matches!(err, EvaluatorError::Process(_)));
        assert!(err
            .to_string()
            .starts_with("Could not start executor /nonexistent/worker for ghost"));
    }
}
