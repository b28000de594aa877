//! Check execution engine
//!
//! Resolves a request to an in-process check or an external command:
//! 1. `extension` if set and registered
//! 2. `name` if registered
//! 3. error when there is no command
//! 4. the command, through the shell

use std::sync::Arc;

use tracing::debug;

use crate::check::{extension, external, CheckOutput, CheckRegistry, CheckRequest};
use crate::error::CheckError;

#[derive(Debug, Clone)]
pub struct CheckExecutor {
    registry: Arc<CheckRegistry>,
}

impl CheckExecutor {
    pub fn new(registry: Arc<CheckRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &CheckRegistry {
        &self.registry
    }

    /// Run the check described by `request`. The returned output always
    /// carries the request it was produced from.
    pub async fn execute(&self, request: CheckRequest) -> Result<CheckOutput, CheckError> {
        let registered = request
            .check
            .extension
            .as_deref()
            .filter(|name| !name.is_empty())
            .and_then(|name| self.registry.get(name))
            .or_else(|| self.registry.get(&request.check.name));

        if let Some(check) = registered {
            debug!(check = %request.check.name, "Dispatching to extension check");
            return Ok(extension::execute(check.as_ref(), request));
        }

        if request.check.command.is_empty() {
            return Err(CheckError::MissingCommand);
        }

        Ok(external::execute(request).await)
    }
}
