//! External command execution

use async_trait::async_trait;
use snapsync_types::{CommandFailure, CommandOutput, CommandRunner, CommandSpec};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Runs commands as child processes of this node
///
/// A command that outlives its timeout is killed when its future is dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    /// Create a new runner
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(
        &self,
        command: &CommandSpec,
        timeout: Duration,
    ) -> Result<CommandOutput, CommandFailure> {
        debug!("Running command: {}", command);

        let mut child = Command::new(&command.program);
        child
            .args(&command.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(timeout, child.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandFailure::Spawn {
                    message: format!("{}: {}", command.program, e),
                })
            }
            Err(_) => {
                warn!("Command timed out after {:?}: {}", timeout, command);
                return Err(CommandFailure::Timeout {
                    seconds: timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        if output.status.success() {
            Ok(CommandOutput { stdout, stderr })
        } else {
            debug!("Command failed ({}): {}", output.status, stderr);
            Err(CommandFailure::Exit {
                code: output.status.code(),
                stderr,
            })
        }
    }
}
