//! Wire protocol types for bridge-listener communication.
//!
//! Every TCP connection carries exactly one exchange:
//! - **Request**: one `ExecutionRequest` JSON object terminated by `\n`
//! - **Response**: one `ExecutionResult` JSON object terminated by `\n`
//!
//! The listener closes the connection after writing the response.

use serde::{Deserialize, Serialize};

/// Exit code reported when there is no interpreter exit status to report.
pub const NO_EXIT_CODE: i32 = -1;

/// Identifier attached to each accepted listener connection for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &uuid::Uuid {
        &self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Request sent from the bridge to the listener.
///
/// Unknown fields are ignored so older clients that send `action` or
/// `async` keys are still understood.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionRequest {
    Single {
        command: String,
    },
    /// Commands run in order, each in a fresh interpreter process.
    Batch {
        commands: Vec<String>,
    },
}

impl ExecutionRequest {
    pub fn single(command: impl Into<String>) -> Self {
        Self::Single {
            command: command.into(),
        }
    }

    pub fn batch(commands: Vec<String>) -> Self {
        Self::Batch { commands }
    }

    pub fn commands(&self) -> &[String] {
        match self {
            Self::Single { command } => std::slice::from_ref(command),
            Self::Batch { commands } => commands,
        }
    }
}

/// Outcome of one command inside a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub index: usize,
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default = "no_exit_code")]
    pub code: i32,
}

/// Response sent from the listener to the bridge.
///
/// `ok` is true iff the interpreter was launched and exited, whatever its
/// exit code. When `ok` is false, `code` is [`NO_EXIT_CODE`] and `stderr`
/// describes the failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub ok: bool,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default = "no_exit_code")]
    pub code: i32,
    /// Per-command outcomes, present only for batch requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<CommandOutcome>>,
}

fn no_exit_code() -> i32 {
    NO_EXIT_CODE
}

impl ExecutionResult {
    /// The interpreter ran to completion with the given exit code.
    pub fn exited(stdout: impl Into<String>, stderr: impl Into<String>, code: i32) -> Self {
        Self {
            ok: true,
            stdout: stdout.into(),
            stderr: stderr.into(),
            code,
            results: None,
        }
    }

    /// Launch, transport or decode failure.
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            stdout: String::new(),
            stderr: message.into(),
            code: NO_EXIT_CODE,
            results: None,
        }
    }

    /// True when the command ran and exited with status 0.
    pub fn succeeded(&self) -> bool {
        self.ok && self.code == 0
    }

    /// Fold the results of a batch into one response.
    ///
    /// `ok` is the conjunction of all items. `code` is the first nonzero item
    /// code, or [`NO_EXIT_CODE`] when any item failed to run. Outputs are
    /// concatenated with a `[command <i> stdout]` header per non-empty item.
    pub fn from_batch(items: Vec<ExecutionResult>) -> Self {
        let outcomes: Vec<CommandOutcome> = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| CommandOutcome {
                index,
                ok: item.ok,
                stdout: item.stdout,
                stderr: item.stderr,
                code: item.code,
            })
            .collect();

        let ok = outcomes.iter().all(|o| o.ok);
        let code = if ok {
            outcomes
                .iter()
                .map(|o| o.code)
                .find(|code| *code != 0)
                .unwrap_or(0)
        } else {
            NO_EXIT_CODE
        };

        let stdout = join_sections(&outcomes, "stdout", |o| o.stdout.as_str());
        let stderr = join_sections(&outcomes, "stderr", |o| o.stderr.as_str());

        Self {
            ok,
            stdout,
            stderr,
            code,
            results: Some(outcomes),
        }
    }
}

fn join_sections(
    outcomes: &[CommandOutcome],
    stream: &str,
    text: impl Fn(&CommandOutcome) -> &str,
) -> String {
    let sections: Vec<String> = outcomes
        .iter()
        .filter(|o| !text(o).is_empty())
        .map(|o| format!("[command {} {stream}]\n{}", o.index, text(o).trim_end()))
        .collect();

    if sections.is_empty() {
        String::new()
    } else {
        sections.join("\n\n") + "\n"
    }
}
