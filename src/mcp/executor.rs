//! Command execution against a pooled session.
//!
//! Three modes share one session:
//!
//! - [`execute`]: one-shot exec channel, stdout/stderr/exit status collected
//!   until the channel closes or the timeout fires.
//! - [`execute_multi`]: strictly sequential `execute` calls with optional
//!   stop-on-error.
//! - [`execute_interactive`]: expect/response automation over a PTY shell.
//!
//! Every mode probes the session first and refuses to run on a dead one.
//!
//! # Interactive Protocol
//!
//! The expect loop is an explicit state machine:
//!
//! ```text
//! SendingCommand -> WaitingForPrompt(0) -> SendingResponse(0) -> ...
//!                -> WaitingForPrompt(n-1) -> SendingResponse(n-1) -> Draining -> Done
//! ```
//!
//! A single deadline, fixed when the call starts, bounds every wait for a
//! prompt. Prompts are matched as substrings of everything the shell has
//! printed since it was opened, not just the newest chunk. Output that
//! arrives in pieces is therefore still matched, but a prompt string already
//! seen for an earlier step matches again immediately. That false match is a
//! known approximation of this mode.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::config::InteractiveTiming;
use super::error::ManagerError;
use super::session::Session;
use super::transport::ShellChannel;
use super::types::{CommandOutcome, CommandResult};

/// History prefix marking interactive commands
pub(crate) const INTERACTIVE_MARKER: &str = "INTERACTIVE: ";

/// Fail with `ConnectionInactive` unless the session passes its liveness probe.
pub(crate) async fn ensure_active(
    session: &Session,
    probe_timeout: Duration,
) -> Result<(), ManagerError> {
    if session.probe(probe_timeout).await {
        Ok(())
    } else {
        Err(ManagerError::ConnectionInactive {
            session_id: session.id.clone(),
        })
    }
}

/// Run one command on a fresh exec channel.
pub(crate) async fn execute(
    session: &Session,
    command: &str,
    timeout: Duration,
    probe_timeout: Duration,
) -> Result<CommandResult, ManagerError> {
    ensure_active(session, probe_timeout).await?;

    debug!("Executing on {}: {}", session.id, command);
    let started = Instant::now();

    let output = session
        .connection()
        .exec(command, timeout)
        .await
        .map_err(|cause| {
            session.mark_disconnected();
            ManagerError::CommandExecution {
                command: command.to_string(),
                cause,
            }
        })?;

    if output.timed_out {
        warn!(
            "Command on {} timed out after {:?}: {}",
            session.id, timeout, command
        );
        return Err(ManagerError::CommandTimeout {
            command: command.to_string(),
            timeout,
            waiting_for: None,
        });
    }

    session.record_command(command).await;

    let exit_code = output.exit_code.map(|code| code as i32).unwrap_or(-1);
    Ok(CommandResult {
        command: command.to_string(),
        stdout: output.stdout,
        stderr: output.stderr,
        exit_code,
        duration_ms: started.elapsed().as_millis() as u64,
        success: exit_code == 0,
    })
}

/// Run `commands` in order, each with its own `timeout`.
///
/// Errors become [`CommandOutcome::Failed`] markers. With `stop_on_error`,
/// the run ends after the first failed or unsuccessful step, which is
/// included in the returned sequence.
pub(crate) async fn execute_multi(
    session: &Session,
    commands: &[String],
    timeout: Duration,
    stop_on_error: bool,
    probe_timeout: Duration,
) -> Vec<CommandOutcome> {
    let mut outcomes = Vec::with_capacity(commands.len());

    for command in commands {
        let outcome = match execute(session, command, timeout, probe_timeout).await {
            Ok(result) => CommandOutcome::Completed(result),
            Err(e) => CommandOutcome::Failed {
                command: command.clone(),
                error: e.to_string(),
            },
        };

        let halt = stop_on_error && outcome.is_failure();
        outcomes.push(outcome);
        if halt {
            debug!(
                "Stopping multi-command run on {} after step {} of {}",
                session.id,
                outcomes.len(),
                commands.len()
            );
            break;
        }
    }

    outcomes
}

/// Drive a command through an interactive shell, answering each prompt in turn.
///
/// Exit status is not observable in this mode: a run that beats its deadline
/// reports `exit_code == 0` and `success == true`.
pub(crate) async fn execute_interactive(
    session: &Session,
    command: &str,
    expect_prompts: &[String],
    responses: &[String],
    timeout: Duration,
    probe_timeout: Duration,
    timing: InteractiveTiming,
) -> Result<CommandResult, ManagerError> {
    if expect_prompts.len() != responses.len() {
        return Err(ManagerError::ArgumentMismatch {
            prompts: expect_prompts.len(),
            responses: responses.len(),
        });
    }

    let started = Instant::now();
    let deadline = started + timeout;

    ensure_active(session, probe_timeout).await?;

    debug!(
        "Interactive command on {} with {} prompt(s): {}",
        session.id,
        expect_prompts.len(),
        command
    );

    let mut shell = tokio::time::timeout_at(deadline, session.connection().open_shell())
        .await
        .map_err(|_| ManagerError::CommandTimeout {
            command: command.to_string(),
            timeout,
            waiting_for: None,
        })?
        .map_err(|cause| ManagerError::CommandExecution {
            command: command.to_string(),
            cause,
        })?;

    let script = ExpectScript {
        command,
        prompts: expect_prompts,
        responses,
        timeout,
        deadline,
        timing,
    };
    let outcome = script.run(shell.as_mut()).await;

    if let Err(e) = shell.close().await {
        warn!("Error closing interactive shell on {}: {}", session.id, e);
    }

    let stdout = outcome?;
    session
        .record_command(format!("{}{}", INTERACTIVE_MARKER, command))
        .await;

    Ok(CommandResult {
        command: command.to_string(),
        stdout,
        stderr: String::new(),
        exit_code: 0,
        duration_ms: started.elapsed().as_millis() as u64,
        success: true,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExpectState {
    SendingCommand,
    WaitingForPrompt(usize),
    SendingResponse(usize),
    Draining,
    Done,
}

struct ExpectScript<'a> {
    command: &'a str,
    prompts: &'a [String],
    responses: &'a [String],
    timeout: Duration,
    deadline: Instant,
    timing: InteractiveTiming,
}

impl ExpectScript<'_> {
    /// State after the response (or command, for `answered == 0`) has been sent.
    fn after_send(&self, answered: usize) -> ExpectState {
        if answered < self.prompts.len() {
            ExpectState::WaitingForPrompt(answered)
        } else {
            ExpectState::Draining
        }
    }

    fn send_failed(&self, cause: String) -> ManagerError {
        ManagerError::CommandExecution {
            command: self.command.to_string(),
            cause,
        }
    }

    /// Run the state machine to completion and return the accumulated output.
    async fn run(&self, shell: &mut dyn ShellChannel) -> Result<String, ManagerError> {
        let deadline = self.deadline;
        let mut output: Vec<u8> = Vec::new();
        let mut state = ExpectState::SendingCommand;

        while state != ExpectState::Done {
            state = match state {
                ExpectState::SendingCommand => {
                    let line = format!("{}\n", self.command);
                    shell
                        .send(line.as_bytes())
                        .await
                        .map_err(|e| self.send_failed(e))?;
                    self.after_send(0)
                }
                ExpectState::WaitingForPrompt(i) => {
                    let chunk = shell
                        .read_available()
                        .await
                        .map_err(|e| self.send_failed(e))?;
                    output.extend_from_slice(&chunk);

                    if contains(&output, self.prompts[i].as_bytes()) {
                        debug!("Matched prompt {:?}", self.prompts[i]);
                        ExpectState::SendingResponse(i)
                    } else if Instant::now() >= deadline {
                        return Err(ManagerError::CommandTimeout {
                            command: self.command.to_string(),
                            timeout: self.timeout,
                            waiting_for: Some(self.prompts[i].clone()),
                        });
                    } else {
                        tokio::time::sleep(self.timing.poll_interval).await;
                        ExpectState::WaitingForPrompt(i)
                    }
                }
                ExpectState::SendingResponse(i) => {
                    let line = format!("{}\n", self.responses[i]);
                    shell
                        .send(line.as_bytes())
                        .await
                        .map_err(|e| self.send_failed(e))?;
                    tokio::time::sleep(self.timing.response_delay).await;
                    self.after_send(i + 1)
                }
                ExpectState::Draining => {
                    tokio::time::sleep(self.timing.drain_grace).await;
                    let chunk = shell
                        .read_available()
                        .await
                        .map_err(|e| self.send_failed(e))?;
                    output.extend_from_slice(&chunk);
                    ExpectState::Done
                }
                ExpectState::Done => ExpectState::Done,
            };
        }

        Ok(String::from_utf8_lossy(&output).into_owned())
    }
}

/// Byte substring search; an empty needle always matches.
fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|window| window == needle)
}
