//! Process management layer
//!
//! Launches backend language servers and watches their lifecycle. Stdio of
//! the child is handed off as a [`StreamTransport`]; stderr is always drained
//! so a chatty backend can never block on a full pipe.

use crate::io::transport::{StreamTransport, Transport};
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

// ============================================================================
// Process Description
// ============================================================================

/// Everything needed to launch a backend: program, arguments, extra
/// environment and working directory
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProcessDescriptor {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl ProcessDescriptor {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

// ============================================================================
// Process State Management
// ============================================================================

/// How to stop a process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// SIGTERM, leaving the wait task to observe the exit
    Graceful,
    /// SIGKILL
    Force,
}

/// Process lifecycle states
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessState {
    NotStarted,
    Running { pid: u32 },
    Stopped,
}

impl ProcessState {
    pub fn pid(&self) -> Option<u32> {
        match self {
            ProcessState::Running { pid } => Some(*pid),
            _ => None,
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ProcessState::Running { .. })
    }
}

/// Fired once when the child exits, for whatever reason
#[derive(Debug, Clone)]
pub struct ProcessExitEvent {
    pub pid: Option<u32>,
    /// Exit code, `None` when terminated by a signal or when waiting failed
    pub code: Option<i32>,
}

/// Receives process exit notifications
#[async_trait]
pub trait ProcessExitHandler: Send + Sync {
    async fn on_process_exit(&self, event: ProcessExitEvent);
}

/// Stderr line sink installation
pub trait StderrMonitor: Send + Sync {
    /// Install a handler for stderr lines. Replaces any previous handler and
    /// must be called before `start` to take effect.
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static;
}

// ============================================================================
// Process Management
// ============================================================================

/// Error types for process management
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Process not started")]
    NotStarted,

    #[error("Process already started")]
    AlreadyStarted,

    #[error("Stdin not available")]
    StdinNotAvailable,

    #[error("Stdout not available")]
    StdoutNotAvailable,

    #[error("Stderr not available")]
    StderrNotAvailable,
}

/// Lifecycle control for an external process
#[async_trait]
pub trait ProcessManager: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn start(&mut self) -> Result<(), Self::Error>;

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error>;

    fn is_running(&self) -> bool;

    /// Take the transport over the child's stdin/stdout. Only succeeds once
    /// per start.
    fn take_transport(&mut self) -> Result<StreamTransport, Self::Error>;

    /// Force kill without awaiting, for use from `Drop`
    fn kill_sync(&mut self);
}

/// Manages a child process spawned from a [`ProcessDescriptor`]
pub struct ChildProcessManager {
    descriptor: ProcessDescriptor,
    state: Arc<Mutex<ProcessState>>,
    transport: Option<StreamTransport>,
    stderr_handler: Option<Box<dyn Fn(String) + Send + Sync>>,
    stderr_task: Option<JoinHandle<()>>,
    wait_task: Option<JoinHandle<()>>,
    exit_handler: Option<Arc<dyn ProcessExitHandler>>,
}

impl ChildProcessManager {
    pub fn new(descriptor: ProcessDescriptor) -> Self {
        Self {
            descriptor,
            state: Arc::new(Mutex::new(ProcessState::NotStarted)),
            transport: None,
            stderr_handler: None,
            stderr_task: None,
            wait_task: None,
            exit_handler: None,
        }
    }

    pub fn descriptor(&self) -> &ProcessDescriptor {
        &self.descriptor
    }

    /// Current process state
    pub fn get_state(&self) -> ProcessState {
        self.state
            .lock()
            .map(|state| state.clone())
            .unwrap_or(ProcessState::Stopped)
    }

    fn set_state(&self, new_state: ProcessState) {
        if let Ok(mut state) = self.state.lock() {
            *state = new_state;
        }
    }

    /// Register a handler invoked when the child exits. Must be set before
    /// `start`.
    pub fn set_exit_handler(&mut self, handler: Arc<dyn ProcessExitHandler>) {
        self.exit_handler = Some(handler);
    }

    fn spawn_stderr_monitor(&mut self, stderr: ChildStderr) {
        if self.stderr_task.is_some() {
            return;
        }

        let handler = self.stderr_handler.take();
        let program = self.descriptor.program.clone();

        let task = tokio::spawn(async move {
            let mut reader = BufReader::new(stderr);
            let mut line = String::new();

            loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => {
                        trace!("ChildProcessManager: stderr EOF for {}", program);
                        break;
                    }
                    Ok(_) => {
                        let content = line.trim_end();
                        if content.is_empty() {
                            continue;
                        }
                        match handler {
                            Some(ref handler) => handler(content.to_string()),
                            None => trace!("ChildProcessManager: stderr drained: {}", content),
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from stderr of {}: {}", program, e);
                        break;
                    }
                }
            }
        });

        self.stderr_task = Some(task);
    }

    fn spawn_wait_task(&mut self, mut child: Child) {
        let pid = self.get_state().pid();
        let exit_handler = self.exit_handler.clone();
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            let code = match child.wait().await {
                Ok(status) => {
                    info!("Process PID {:?} exited with status: {}", pid, status);
                    status.code()
                }
                Err(e) => {
                    error!("Error waiting for child process {:?}: {}", pid, e);
                    None
                }
            };

            if let Ok(mut process_state) = state.lock() {
                *process_state = ProcessState::Stopped;
            }

            if let Some(handler) = &exit_handler {
                handler.on_process_exit(ProcessExitEvent { pid, code }).await;
            }
        });

        self.wait_task = Some(task);
    }

    #[cfg(unix)]
    fn signal(pid: u32, mode: StopMode) {
        let signal = match mode {
            StopMode::Graceful => libc::SIGTERM,
            StopMode::Force => libc::SIGKILL,
        };
        // SAFETY: kill(2) has no memory-safety preconditions
        let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
        if rc == 0 {
            info!("Sent {:?} signal to process {}", mode, pid);
        } else {
            warn!(
                "Failed to signal process {}: {}",
                pid,
                io::Error::last_os_error()
            );
        }
    }

    #[cfg(not(unix))]
    fn signal(pid: u32, _mode: StopMode) {
        warn!("Process signalling not supported on this platform (PID {})", pid);
    }
}

#[async_trait]
impl ProcessManager for ChildProcessManager {
    type Error = ProcessError;

    async fn start(&mut self) -> Result<(), Self::Error> {
        if self.is_running() {
            return Err(ProcessError::AlreadyStarted);
        }

        let descriptor = &self.descriptor;
        info!(
            "Starting process: {} {:?}",
            descriptor.program, descriptor.args
        );

        let mut command = Command::new(&descriptor.program);
        command
            .args(&descriptor.args)
            .envs(descriptor.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &descriptor.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            program: descriptor.program.clone(),
            source,
        })?;

        let pid = child
            .id()
            .ok_or_else(|| ProcessError::Io(io::Error::other("Failed to get process ID")))?;
        info!("Process started with PID: {}", pid);
        self.set_state(ProcessState::Running { pid });

        let stdin = child.stdin.take().ok_or(ProcessError::StdinNotAvailable)?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ProcessError::StdoutNotAvailable)?;
        let stderr = child
            .stderr
            .take()
            .ok_or(ProcessError::StderrNotAvailable)?;

        self.transport = Some(StreamTransport::new(stdout, stdin));
        self.spawn_stderr_monitor(stderr);
        self.spawn_wait_task(child);

        Ok(())
    }

    async fn stop(&mut self, mode: StopMode) -> Result<(), Self::Error> {
        let pid = self.get_state().pid().ok_or(ProcessError::NotStarted)?;

        if let Some(mut transport) = self.transport.take() {
            let _ = transport.close().await;
        }

        Self::signal(pid, mode);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }

        self.set_state(ProcessState::Stopped);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.get_state().is_running()
    }

    fn take_transport(&mut self) -> Result<StreamTransport, Self::Error> {
        self.transport.take().ok_or(ProcessError::NotStarted)
    }

    fn kill_sync(&mut self) {
        let Some(pid) = self.get_state().pid() else {
            return;
        };

        Self::signal(pid, StopMode::Force);

        if let Some(task) = self.stderr_task.take() {
            task.abort();
        }
        self.set_state(ProcessState::Stopped);
    }
}

impl StderrMonitor for ChildProcessManager {
    fn on_stderr_line<F>(&mut self, handler: F)
    where
        F: Fn(String) + Send + Sync + 'static,
    {
        self.stderr_handler = Some(Box::new(handler));
    }
}

impl Drop for ChildProcessManager {
    fn drop(&mut self) {
        self.kill_sync();
    }
}

// ============================================================================
// Tests
// ============================================================================
