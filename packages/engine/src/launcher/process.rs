// packages/engine/src/launcher/process.rs
//! Running the target program with the shim injected
//!
//! The child inherits the launcher's stdio. Ctrl-C is forwarded to it as
//! SIGTERM and the launcher reports the child's exit code (128 + signal when
//! the child was killed).

use crate::utils::errors::{HookError, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// What to run and with which extra environment
#[derive(Debug, Clone, Default)]
pub struct LaunchSpec {
    /// Program to execute, looked up in `PATH`
    pub program: String,

    /// Arguments passed to the program
    pub args: Vec<String>,

    /// Environment added on top of the launcher's own
    pub env_vars: Vec<(String, String)>,
}

impl LaunchSpec {
    /// Split a command line into program and arguments
    pub fn from_command(command: &[String], env_vars: Vec<(String, String)>) -> Result<Self> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| HookError::ProcessFailed("no command given".to_string()))?;

        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env_vars,
        })
    }
}

/// Spawns and supervises the child process
#[derive(Debug, Default)]
pub struct ProcessLauncher;

impl ProcessLauncher {
    pub fn new() -> Self {
        Self
    }

    /// Spawn the child
    pub fn spawn(&self, spec: &LaunchSpec) -> Result<Child> {
        debug!("Spawning {} {:?}", spec.program, spec.args);

        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        for (key, value) in &spec.env_vars {
            command.env(key, value);
        }

        let child = command
            .spawn()
            .map_err(|e| HookError::ProcessFailed(format!("Failed to spawn {}: {}", spec.program, e)))?;

        debug!("Process spawned with PID: {:?}", child.id());
        Ok(child)
    }

    /// Run the child to completion and return its exit code
    pub async fn run(&self, spec: &LaunchSpec) -> Result<i32> {
        let mut child = self.spawn(spec)?;
        let pid = child.id();

        loop {
            tokio::select! {
                status = child.wait() => {
                    let status = status
                        .map_err(|e| HookError::ProcessFailed(format!("Failed to wait for child: {}", e)))?;
                    debug!("Child exited: {}", status);
                    return Ok(exit_code(status));
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.map_err(|e| HookError::ProcessFailed(format!("Failed to listen for Ctrl-C: {}", e)))?;
                    if let Some(pid) = pid {
                        info!("Forwarding interrupt to PID {}", pid);
                        forward_signal(pid, Signal::SIGTERM)?;
                    }
                }
            }
        }
    }
}

/// Send `signal` to a child process
pub fn forward_signal(pid: u32, signal: Signal) -> Result<()> {
    let pid = i32::try_from(pid).map_err(|_| HookError::ProcessFailed(format!("PID {} out of range", pid)))?;
    kill(Pid::from_raw(pid), signal)
        .map_err(|e| HookError::ProcessFailed(format!("Failed to send {} to PID {}: {}", signal, pid, e)))
}

/// Shell-style exit code for a finished child
pub fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        None => 128 + status.signal().unwrap_or(0),
    }
}
