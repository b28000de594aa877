//! Registry of in-process checks
//!
//! Filled by the embedding program before the client starts, then shared
//! read-only (behind an `Arc`) with the executor.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::ExtensionCheckResult;

/// An in-process check
pub trait ExtensionCheck: Send + Sync {
    fn run(&self) -> ExtensionCheckResult;
}

impl<F> ExtensionCheck for F
where
    F: Fn() -> ExtensionCheckResult + Send + Sync,
{
    fn run(&self) -> ExtensionCheckResult {
        self()
    }
}

/// Name -> extension check mapping, exact-key lookup only
#[derive(Default, Clone)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<dyn ExtensionCheck>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check under `name`. A later registration under the same
    /// name replaces the earlier one.
    pub fn register<N, C>(&mut self, name: N, check: C) -> &mut Self
    where
        N: Into<String>,
        C: ExtensionCheck + 'static,
    {
        let name = name.into();
        if self.checks.insert(name.clone(), Arc::new(check)).is_some() {
            debug!(check = %name, "Replacing registered extension check");
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ExtensionCheck>> {
        self.checks.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.checks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::check::handler;

    #[test]
    fn test_last_registration_wins() {
        let mut registry = CheckRegistry::new();
        registry.register("cpu", || handler::warning("first"));
        registry.register("cpu", || handler::ok("second"));

        assert_eq!(registry.len(), 1);
        let result = registry.get("cpu").unwrap().run();
        assert_eq!(result.output, "OK: second");
    }

    #[test]
    fn test_lookup_is_exact() {
        let mut registry = CheckRegistry::new();
        registry.register("memory", || handler::ok("fine"));

        assert!(registry.contains("memory"));
        assert!(!registry.contains("mem"));
        assert!(!registry.contains("Memory"));
        assert!(registry.get("memory_usage").is_none());
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = CheckRegistry::new();
        registry
            .register("zeta", || handler::ok("z"))
            .register("alpha", || handler::ok("a"));

        assert_eq!(registry.names(), vec!["alpha", "zeta"]);
    }
}
