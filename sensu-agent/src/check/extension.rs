//! Timing wrapper around in-process checks

use std::time::Instant;

use tracing::debug;

use super::{CheckOutput, CheckRequest, ExtensionCheck};

/// Run an extension check, stamping start time and duration
pub fn execute(check: &dyn ExtensionCheck, request: CheckRequest) -> CheckOutput {
    let executed = chrono::Utc::now().timestamp();
    let start = Instant::now();

    let result = check.run();

    let duration = start.elapsed().as_secs_f64();
    debug!(check = %request.check.name, status = %result.status, duration, "Extension check finished");

    CheckOutput {
        status: result.status,
        output: result.output,
        duration,
        executed,
        request,
    }
}
