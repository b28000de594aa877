//! External command checks
//!
//! Runs the check command through `/bin/sh -c`, capturing standard output
//! only. Standard error goes to `/dev/null` and there is no execution
//! timeout: a command that never exits stalls its caller.
//!
//! Exit codes are reported verbatim, they are how external checks signal
//! severity.

use std::process::Stdio;
use std::time::Instant;

use tokio::process::Command as AsyncCommand;
use tracing::{debug, warn};

use super::{CheckOutput, CheckRequest, ExitStatus};

const SHELL: &str = "/bin/sh";

/// Execute `request.check.command` and normalize the outcome
pub async fn execute(request: CheckRequest) -> CheckOutput {
    let executed = chrono::Utc::now().timestamp();
    let start = Instant::now();
    debug!(check = %request.check.name, command = %request.check.command, "Executing external check");

    let (status, output) = match run_shell(&request.check.command).await {
        Ok(result) => result,
        Err(e) => {
            warn!(check = %request.check.name, error = %e, "Failed to spawn check command");
            (ExitStatus::ERROR, e.to_string())
        }
    };

    CheckOutput {
        status,
        output,
        duration: start.elapsed().as_secs_f64(),
        executed,
        request,
    }
}

async fn run_shell(command: &str) -> std::io::Result<(ExitStatus, String)> {
    let output = AsyncCommand::new(SHELL)
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    Ok((exit_status(&output.status), stdout))
}

fn exit_status(status: &std::process::ExitStatus) -> ExitStatus {
    if let Some(code) = status.code() {
        return ExitStatus(code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return ExitStatus(128 + signal);
        }
    }

    ExitStatus::ERROR
}
