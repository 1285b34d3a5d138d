//! One external process invocation: spawn, stream its diagnostic output,
//! suspend/resume/terminate it, and reap it.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use log::{debug, warn};
use sysinfo::{Pid, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, Signal, System};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::time::timeout;

use crate::command::CommandLine;
use crate::error::{ProcessControlError, SpawnError};

/// Platform capability for signalling a live process by pid
pub trait ProcessSignals: Send + Sync {
    fn suspend(&self, pid: u32) -> Result<(), ProcessControlError>;
    fn resume(&self, pid: u32) -> Result<(), ProcessControlError>;
    /// Ask the process to exit; must not block
    fn terminate(&self, pid: u32) -> Result<(), ProcessControlError>;
}

/// Signals delivered through `sysinfo`: SIGSTOP/SIGCONT/SIGTERM on unix,
/// hard kill as the only termination available elsewhere.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoSignals;

impl SysinfoSignals {
    fn send(&self, pid: u32, signal: Signal, name: &'static str) -> Result<(), ProcessControlError> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), ProcessRefreshKind::new());

        let process = system
            .process(sys_pid)
            .ok_or(ProcessControlError::Exited { pid })?;
        if matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
            return Err(ProcessControlError::Exited { pid });
        }

        match process.kill_with(signal) {
            Some(true) => Ok(()),
            Some(false) => Err(ProcessControlError::SignalRejected { pid, signal: name }),
            None => Err(ProcessControlError::Unsupported { signal: name }),
        }
    }
}

impl ProcessSignals for SysinfoSignals {
    fn suspend(&self, pid: u32) -> Result<(), ProcessControlError> {
        self.send(pid, Signal::Stop, "stop")
    }

    fn resume(&self, pid: u32) -> Result<(), ProcessControlError> {
        self.send(pid, Signal::Continue, "continue")
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessControlError> {
        match self.send(pid, Signal::Term, "term") {
            Err(ProcessControlError::Unsupported { .. }) => self.send(pid, Signal::Kill, "kill"),
            other => other,
        }
    }
}

/// Suspends a process by suspending each of its threads.
///
/// Windows has no stop signal, so sysinfo cannot pause a process there.
/// Termination still goes through sysinfo.
#[cfg(windows)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSuspendSignals;

#[cfg(windows)]
impl ThreadSuspendSignals {
    fn threads_of(pid: u32) -> Option<Vec<u32>> {
        use std::mem;
        use windows_sys::Win32::Foundation::{CloseHandle, INVALID_HANDLE_VALUE};
        use windows_sys::Win32::System::Diagnostics::ToolHelp::{
            CreateToolhelp32Snapshot, Thread32First, Thread32Next, TH32CS_SNAPTHREAD, THREADENTRY32,
        };

        // SAFETY: the snapshot handle is checked before use and closed once,
        // `entry` is a plain C struct with `dwSize` set as the API requires.
        unsafe {
            let snapshot = CreateToolhelp32Snapshot(TH32CS_SNAPTHREAD, 0);
            if snapshot == INVALID_HANDLE_VALUE {
                return None;
            }
            let mut entry: THREADENTRY32 = mem::zeroed();
            entry.dwSize = mem::size_of::<THREADENTRY32>() as u32;

            let mut threads = Vec::new();
            let mut more = Thread32First(snapshot, &mut entry);
            while more != 0 {
                if entry.th32OwnerProcessID == pid {
                    threads.push(entry.th32ThreadID);
                }
                more = Thread32Next(snapshot, &mut entry);
            }
            CloseHandle(snapshot);
            Some(threads)
        }
    }

    fn apply(&self, pid: u32, suspend: bool, name: &'static str) -> Result<(), ProcessControlError> {
        use windows_sys::Win32::Foundation::CloseHandle;
        use windows_sys::Win32::System::Threading::{
            OpenThread, ResumeThread, SuspendThread, THREAD_SUSPEND_RESUME,
        };

        let threads = Self::threads_of(pid).ok_or(ProcessControlError::SignalRejected { pid, signal: name })?;
        if threads.is_empty() {
            return Err(ProcessControlError::Exited { pid });
        }

        let mut failed = 0;
        for tid in threads {
            // SAFETY: the thread handle is checked for null and closed after use
            unsafe {
                let thread = OpenThread(THREAD_SUSPEND_RESUME, 0, tid);
                if thread == 0 {
                    failed += 1;
                    continue;
                }
                let previous = if suspend { SuspendThread(thread) } else { ResumeThread(thread) };
                if previous == u32::MAX {
                    failed += 1;
                }
                CloseHandle(thread);
            }
        }
        if failed > 0 {
            debug!("{} of process {} failed on {} thread(s)", name, pid, failed);
            return Err(ProcessControlError::SignalRejected { pid, signal: name });
        }
        Ok(())
    }
}

#[cfg(windows)]
impl ProcessSignals for ThreadSuspendSignals {
    fn suspend(&self, pid: u32) -> Result<(), ProcessControlError> {
        self.apply(pid, true, "suspend")
    }

    fn resume(&self, pid: u32) -> Result<(), ProcessControlError> {
        self.apply(pid, false, "resume")
    }

    fn terminate(&self, pid: u32) -> Result<(), ProcessControlError> {
        SysinfoSignals.terminate(pid)
    }
}

/// Signalling backend that really halts a process on the current platform
pub fn platform_signals() -> Arc<dyn ProcessSignals> {
    #[cfg(windows)]
    {
        Arc::new(ThreadSuspendSignals)
    }
    #[cfg(not(windows))]
    {
        Arc::new(SysinfoSignals)
    }
}

#[derive(Debug, Default)]
struct ControlState {
    suspended: bool,
    exited: bool,
}

struct ControlInner {
    pid: u32,
    signals: Arc<dyn ProcessSignals>,
    state: Mutex<ControlState>,
}

/// Cloneable control side of a running process.
///
/// The reading side stays with whoever owns the `ProcessHandle`; this half can
/// be handed to other contexts to pause, resume or stop the process.
#[derive(Clone)]
pub struct ProcessControl {
    inner: Arc<ControlInner>,
}

impl std::fmt::Debug for ProcessControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessControl")
            .field("pid", &self.inner.pid)
            .field("suspended", &self.is_suspended())
            .finish()
    }
}

impl ProcessControl {
    fn new(pid: u32, signals: Arc<dyn ProcessSignals>) -> Self {
        Self {
            inner: Arc::new(ControlInner {
                pid,
                signals,
                state: Mutex::new(ControlState::default()),
            }),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ControlState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn pid(&self) -> u32 {
        self.inner.pid
    }

    pub fn is_suspended(&self) -> bool {
        self.state().suspended
    }

    /// Halt scheduling of the process. No-op when already suspended.
    pub fn suspend(&self) -> Result<(), ProcessControlError> {
        let mut state = self.state();
        if state.exited {
            return Err(ProcessControlError::Exited { pid: self.inner.pid });
        }
        if state.suspended {
            return Ok(());
        }
        self.inner.signals.suspend(self.inner.pid)?;
        state.suspended = true;
        debug!("Suspended process {}", self.inner.pid);
        Ok(())
    }

    /// Inverse of `suspend`. No-op when not suspended.
    pub fn resume(&self) -> Result<(), ProcessControlError> {
        let mut state = self.state();
        if !state.suspended {
            return Ok(());
        }
        if state.exited {
            state.suspended = false;
            return Err(ProcessControlError::Exited { pid: self.inner.pid });
        }
        self.inner.signals.resume(self.inner.pid)?;
        state.suspended = false;
        debug!("Resumed process {}", self.inner.pid);
        Ok(())
    }

    /// Request exit without waiting for it. A suspended process is continued
    /// first, it may ignore the request while frozen.
    pub fn terminate(&self) -> Result<(), ProcessControlError> {
        let mut state = self.state();
        if state.exited {
            return Err(ProcessControlError::Exited { pid: self.inner.pid });
        }
        if state.suspended {
            if let Err(e) = self.inner.signals.resume(self.inner.pid) {
                warn!("Could not continue process {} before terminating it: {}", self.inner.pid, e);
            }
            state.suspended = false;
        }
        self.inner.signals.terminate(self.inner.pid)?;
        debug!("Requested termination of process {}", self.inner.pid);
        Ok(())
    }

    fn mark_exited(&self) {
        let mut state = self.state();
        state.exited = true;
        state.suspended = false;
    }
}

/// Line reader that treats both `\n` and `\r` as terminators.
///
/// ffmpeg rewrites its status line with carriage returns, so a plain
/// `lines()` would only yield progress once the encode ends. Empty segments
/// (as produced by `\r\n`) are skipped. Cancel safe: bytes taken from the
/// buffer are kept in `pending` across dropped futures.
pub struct DiagnosticLines<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    finished: bool,
}

impl<R: AsyncRead + Unpin> DiagnosticLines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            reader: BufReader::new(inner),
            pending: Vec::new(),
            finished: false,
        }
    }

    fn take_line(&mut self) -> String {
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        line
    }

    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            if self.finished {
                if self.pending.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(self.take_line()));
            }

            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                self.finished = true;
                continue;
            }

            match available.iter().position(|b| *b == b'\n' || *b == b'\r') {
                Some(pos) => {
                    self.pending.extend_from_slice(&available[..pos]);
                    self.reader.consume(pos + 1);
                    if !self.pending.is_empty() {
                        return Ok(Some(self.take_line()));
                    }
                }
                None => {
                    let len = available.len();
                    self.pending.extend_from_slice(available);
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// A started external process with a streamed diagnostic output
pub struct ProcessHandle {
    program: PathBuf,
    child: Child,
    lines: DiagnosticLines<ChildStderr>,
    control: ProcessControl,
}

impl ProcessHandle {
    /// Spawn the command with stderr captured as the diagnostic stream
    pub fn start(command: &CommandLine) -> Result<Self, SpawnError> {
        Self::start_with_signals(command, platform_signals())
    }

    pub fn start_with_signals(
        command: &CommandLine,
        signals: Arc<dyn ProcessSignals>,
    ) -> Result<Self, SpawnError> {
        debug!("Starting: {}", command);

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                SpawnError::NotFound { program: command.program.clone() }
            } else {
                SpawnError::Launch { program: command.program.clone(), source }
            }
        })?;

        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SpawnError::MissingStream { program: command.program.clone() })?;
        let pid = child
            .id()
            .ok_or_else(|| SpawnError::MissingStream { program: command.program.clone() })?;

        Ok(Self {
            program: command.program.clone(),
            child,
            lines: DiagnosticLines::new(stderr),
            control: ProcessControl::new(pid, signals),
        })
    }

    pub fn pid(&self) -> u32 {
        self.control.pid()
    }

    /// Control half for use from other contexts
    pub fn control(&self) -> ProcessControl {
        self.control.clone()
    }

    /// Next diagnostic line, `None` once the stream is closed.
    ///
    /// A read error is logged and treated as the end of the stream.
    pub async fn read_line(&mut self) -> Option<String> {
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Diagnostic stream of {} failed: {}", self.program.display(), e);
                None
            }
        }
    }

    pub fn suspend(&self) -> Result<(), ProcessControlError> {
        self.control.suspend()
    }

    pub fn resume(&self) -> Result<(), ProcessControlError> {
        self.control.resume()
    }

    pub fn terminate(&self) -> Result<(), ProcessControlError> {
        self.control.terminate()
    }

    /// Block until the process has exited and return its exit code
    /// (`-1` when it was ended by a signal).
    pub async fn wait(self) -> io::Result<i32> {
        self.wait_with_grace(None).await
    }

    /// Like `wait`, but kill the process outright if it is still alive after `grace`
    pub async fn wait_with_grace(mut self, grace: Option<Duration>) -> io::Result<i32> {
        match grace {
            Some(grace) => match timeout(grace, self.exited()).await {
                Ok(code) => code,
                Err(_) => {
                    warn!(
                        "Process {} ({}) still alive after {:?}, killing it",
                        self.control.pid(),
                        self.program.display(),
                        grace
                    );
                    self.child.kill().await?;
                    self.exited().await
                }
            },
            None => self.exited().await,
        }
    }

    /// Wait for exit without giving up the handle. Cancel safe, so it can
    /// race other events and be retried.
    pub async fn exited(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        self.control.mark_exited();

        let exit_code = status.code().unwrap_or(-1);
        debug!("Process {} exited with code {}", self.control.pid(), exit_code);
        Ok(exit_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect(input: &[u8]) -> Vec<String> {
        let mut lines = DiagnosticLines::new(input);
        let mut out = Vec::new();
        while let Some(line) = lines.next_line().await.unwrap() {
            out.push(line);
        }
        out
    }

    #[tokio::test]
    async fn test_lines_split_on_carriage_return() {
        let input = b"frame=1 time=00:00:01.00\rframe=2 time=00:00:02.00\rdone\n";
        assert_eq!(
            collect(input).await,
            vec!["frame=1 time=00:00:01.00", "frame=2 time=00:00:02.00", "done"]
        );
    }

    #[tokio::test]
    async fn test_lines_skip_crlf_blanks_and_keep_tail() {
        let input = b"first\r\n\r\nsecond\r\ntrailing";
        assert_eq!(collect(input).await, vec!["first", "second", "trailing"]);
    }

    #[tokio::test]
    async fn test_lines_are_lossy_utf8() {
        let input = b"ok \xff bytes\n";
        assert_eq!(collect(input).await, vec!["ok \u{fffd} bytes"]);
    }

    #[tokio::test]
    async fn test_empty_stream() {
        assert!(collect(b"").await.is_empty());
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let cmd = CommandLine::new("/nonexistent/bin/ffmpeg-missing").arg("-version");
        match ProcessHandle::start(&cmd) {
            Err(SpawnError::NotFound { program }) => {
                assert_eq!(program, PathBuf::from("/nonexistent/bin/ffmpeg-missing"));
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("spawn of a missing binary succeeded"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reads_stderr_and_exit_code() {
        let cmd = CommandLine::new("sh")
            .arg("-c")
            .arg("printf 'a\\rb\\n' >&2; echo ignored; exit 3");
        let mut handle = ProcessHandle::start(&cmd).unwrap();

        let mut lines = Vec::new();
        while let Some(line) = handle.read_line().await {
            lines.push(line);
        }
        assert_eq!(lines, vec!["a", "b"]);
        assert_eq!(handle.wait().await.unwrap(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_control_after_exit_is_an_error() {
        let cmd = CommandLine::new("sh").arg("-c").arg("exit 0");
        let handle = ProcessHandle::start(&cmd).unwrap();
        let control = handle.control();
        assert_eq!(handle.wait().await.unwrap(), 0);

        assert!(matches!(control.suspend(), Err(ProcessControlError::Exited { .. })));
        assert!(matches!(control.terminate(), Err(ProcessControlError::Exited { .. })));
        // Resume of a process that was never suspended stays a no-op
        assert!(control.resume().is_ok());
    }

    fn os_status(pid: u32) -> Option<ProcessStatus> {
        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(ProcessesToUpdate::Some(&[sys_pid]), ProcessRefreshKind::new());
        system.process(sys_pid).map(|p| p.status())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_suspend_stops_the_os_process() {
        let cmd = CommandLine::new("sh").arg("-c").arg("exec sleep 30");
        let handle = ProcessHandle::start(&cmd).unwrap();
        let pid = handle.pid();

        handle.suspend().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(os_status(pid), Some(ProcessStatus::Stop));

        handle.resume().unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        let status = os_status(pid);
        assert!(status.is_some());
        assert_ne!(status, Some(ProcessStatus::Stop));

        handle.terminate().unwrap();
        handle.wait_with_grace(Some(Duration::from_secs(5))).await.unwrap();
    }

    #[cfg(windows)]
    #[tokio::test]
    async fn test_thread_suspend_round_trip() {
        let cmd = CommandLine::new("cmd").args(["/C", "ping -n 30 127.0.0.1 >NUL"]);
        let handle = ProcessHandle::start(&cmd).unwrap();

        handle.suspend().unwrap();
        assert!(handle.control().is_suspended());
        handle.resume().unwrap();
        assert!(!handle.control().is_suspended());

        handle.terminate().unwrap();
        handle.wait_with_grace(Some(Duration::from_secs(5))).await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_can_be_raced_and_retried() {
        let cmd = CommandLine::new("sh").arg("-c").arg("sleep 0.3; exit 4");
        let mut handle = ProcessHandle::start(&cmd).unwrap();

        assert!(timeout(Duration::from_millis(20), handle.exited()).await.is_err());
        assert_eq!(handle.exited().await.unwrap(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_suspend_is_idempotent_and_terminate_ends_process() {
        let cmd = CommandLine::new("sh").arg("-c").arg("exec sleep 30");
        let handle = ProcessHandle::start(&cmd).unwrap();

        handle.suspend().unwrap();
        handle.suspend().unwrap();
        assert!(handle.control().is_suspended());

        handle.resume().unwrap();
        handle.resume().unwrap();
        assert!(!handle.control().is_suspended());

        handle.suspend().unwrap();
        handle.terminate().unwrap();
        let code = handle.wait_with_grace(Some(Duration::from_secs(5))).await.unwrap();
        assert_eq!(code, -1);
    }
}
