//! Command executor - runs one command string in a local interpreter process.
//!
//! The interpreter is launched with its profile disabled and the command passed
//! as a single inline argument. stdout and stderr are captured and decoded
//! lossily, so undecodable bytes never fail a call.
//!
//! Every failure mode is folded into an [`ExecutionResult`]; nothing in this
//! module returns an error to the caller.

use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{ExecutionRequest, ExecutionResult, NO_EXIT_CODE};

/// Executables tried, in order, after any explicitly configured one.
pub const DEFAULT_POWERSHELL_CANDIDATES: &[&str] = &["pwsh", "powershell.exe"];

const POWERSHELL_ARGS: &[&str] = &["-NoProfile", "-NonInteractive", "-Command"];

const PREVIEW_LIMIT: usize = 160;

/// An interpreter executable plus the arguments placed before the command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub program: String,
    pub args: Vec<String>,
}

impl Interpreter {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// `<program> -NoProfile -NonInteractive -Command <command>`
    pub fn powershell(program: impl Into<String>) -> Self {
        Self::new(program, POWERSHELL_ARGS.iter().copied())
    }
}

#[derive(Debug, Clone)]
pub struct CommandExecutor {
    interpreters: Vec<Interpreter>,
    timeout: Option<Duration>,
}

impl CommandExecutor {
    /// Interpreters are tried in order; one that is not installed is skipped.
    pub fn new(interpreters: Vec<Interpreter>) -> Self {
        Self {
            interpreters,
            timeout: None,
        }
    }

    /// PowerShell executor: `preferred` first (if any), then `pwsh`, then
    /// `powershell.exe`.
    pub fn powershell(preferred: Option<&str>) -> Self {
        let mut programs: Vec<&str> = preferred.into_iter().collect();
        for candidate in DEFAULT_POWERSHELL_CANDIDATES {
            if !programs.contains(candidate) {
                programs.push(candidate);
            }
        }
        Self::new(programs.into_iter().map(Interpreter::powershell).collect())
    }

    /// Kill the interpreter if it runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interpreters(&self) -> &[Interpreter] {
        &self.interpreters
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Run every command of a request in order and shape the response.
    pub async fn run(
        &self,
        request: &ExecutionRequest,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        match request.commands() {
            [] => ExecutionResult::failure("invalid request: 'commands' must not be empty"),
            [command] => self.execute(command, cancel).await,
            commands => {
                tracing::info!(count = commands.len(), "Running batch");
                let mut items = Vec::with_capacity(commands.len());
                for command in commands {
                    items.push(self.execute(command, cancel).await);
                }
                ExecutionResult::from_batch(items)
            }
        }
    }

    /// Run one command to completion (or until the deadline or cancellation).
    pub async fn execute(&self, command: &str, cancel: &CancellationToken) -> ExecutionResult {
        tracing::info!(command = %preview_command(command), "Running command");

        let mut not_found = Vec::new();
        for interpreter in &self.interpreters {
            match spawn(interpreter, command) {
                Ok(child) => return self.wait(child, &interpreter.program, cancel).await,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(program = %interpreter.program, "Interpreter not found");
                    not_found.push(interpreter.program.as_str());
                }
                Err(e) => {
                    tracing::warn!(
                        program = %interpreter.program,
                        error = %e,
                        "Failed to launch interpreter"
                    );
                    return ExecutionResult::failure(format!(
                        "failed to launch {}: {e}",
                        interpreter.program
                    ));
                }
            }
        }

        let message = if not_found.is_empty() {
            "no interpreter configured".to_string()
        } else {
            format!("no interpreter found (tried {})", not_found.join(", "))
        };
        tracing::warn!(%message, "Command not run");
        ExecutionResult::failure(message)
    }

    async fn wait(
        &self,
        child: Child,
        program: &str,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let timeout = self.timeout;
        let deadline = async {
            match timeout {
                Some(t) => tokio::time::sleep(t).await,
                None => std::future::pending::<()>().await,
            }
        };

        // Dropping the output future drops the child, which kills it (kill_on_drop).
        tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) => {
                    let code = exit_code(&output.status);
                    tracing::info!(
                        code,
                        stdout_bytes = output.stdout.len(),
                        stderr_bytes = output.stderr.len(),
                        "Command finished"
                    );
                    ExecutionResult::exited(
                        String::from_utf8_lossy(&output.stdout),
                        String::from_utf8_lossy(&output.stderr),
                        code,
                    )
                }
                Err(e) => {
                    tracing::warn!(%program, error = %e, "Failed to collect interpreter output");
                    ExecutionResult::failure(format!(
                        "failed to collect output from {program}: {e}"
                    ))
                }
            },
            _ = deadline => {
                let secs = timeout.unwrap_or_default().as_secs_f64();
                tracing::warn!(timeout_secs = secs, "Command timed out, terminating interpreter");
                ExecutionResult::failure(format!(
                    "command timed out after {secs}s and was terminated"
                ))
            }
            _ = cancel.cancelled() => {
                tracing::warn!("Command cancelled, terminating interpreter");
                ExecutionResult::failure("command was cancelled before it finished")
            }
        }
    }
}

fn spawn(interpreter: &Interpreter, command: &str) -> io::Result<Child> {
    Command::new(&interpreter.program)
        .args(&interpreter.args)
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
}

/// Exit code, or `128 + signal` for a signal-terminated Unix process.
fn exit_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }
    NO_EXIT_CODE
}

/// One-line preview of a command for logs.
pub fn preview_command(command: &str) -> String {
    let one_line = command.lines().collect::<Vec<_>>().join(" ");
    let one_line = one_line.trim();
    if one_line.chars().count() <= PREVIEW_LIMIT {
        return one_line.to_string();
    }
    let mut preview: String = one_line.chars().take(PREVIEW_LIMIT - 3).collect();
    preview.push_str("...");
    preview
}
