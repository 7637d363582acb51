//! Readiness checks.
//!
//! A `HealthMonitor` holds named checks and runs them on demand. The
//! messenger contributes one through [`Messenger::readiness_check`]; an
//! embedding service can add its own and expose the result however it likes.
//!
//! [`Messenger::readiness_check`]: crate::messenger::Messenger::readiness_check

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use tracing::debug;

pub type ReadinessCheck = Box<dyn Fn() -> Result<(), String> + Send + Sync>;

#[derive(Default)]
pub struct HealthMonitor {
    checks: RwLock<BTreeMap<String, ReadinessCheck>>,
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `check` under `name`, replacing any check with that name.
    pub fn register_readiness_check<F>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Result<(), String> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(check = %name, "Readiness check registered");
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name, Box::new(check));
    }

    pub fn unregister_readiness_check(&self, name: &str) -> bool {
        self.checks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
            .is_some()
    }

    /// Runs every check and returns one `"<name>: <reason>"` entry per
    /// failing check, ordered by name. Empty means ready.
    pub fn check_readiness(&self) -> Vec<String> {
        self.checks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|(name, check)| check().err().map(|reason| format!("{name}: {reason}")))
            .collect()
    }

    pub fn is_ready(&self) -> bool {
        self.check_readiness().is_empty()
    }
}

impl fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let checks = self.checks.read().unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("HealthMonitor")
            .field("checks", &checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests;
