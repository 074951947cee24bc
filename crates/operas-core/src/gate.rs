//! Authorization checks consulted before every radio operation.
//!
//! A gate only answers "may the radio be used right now?". It never asks the
//! user or the system for anything; obtaining authorization is the host's job.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Synchronous authorization query.
pub trait CapabilityGate: Send + Sync + 'static {
    /// Returns `true` if the radio may be operated at this moment.
    fn check(&self) -> bool;

    /// Short name used in logs.
    fn name(&self) -> &'static str {
        "gate"
    }
}

/// A revocable grant held by the host.
///
/// Starts in the state given to [`Permission::new`]; the host flips it as the
/// user grants or withdraws access.
#[derive(Debug, Default)]
pub struct Permission {
    granted: AtomicBool,
}

impl Permission {
    /// Creates a permission in the given initial state.
    #[must_use]
    pub const fn new(granted: bool) -> Self {
        Self {
            granted: AtomicBool::new(granted),
        }
    }

    /// Marks the permission as granted.
    pub fn grant(&self) {
        self.set(true);
    }

    /// Withdraws the permission.
    pub fn revoke(&self) {
        self.set(false);
    }

    /// Sets the grant state.
    pub fn set(&self, granted: bool) {
        let previous = self.granted.swap(granted, Ordering::AcqRel);
        if previous != granted {
            tracing::info!(granted, "Advertising permission changed");
        }
    }

    /// Current grant state.
    #[must_use]
    pub fn is_granted(&self) -> bool {
        self.granted.load(Ordering::Acquire)
    }
}

impl CapabilityGate for Permission {
    fn check(&self) -> bool {
        self.is_granted()
    }

    fn name(&self) -> &'static str {
        "permission"
    }
}

/// Open only when every inner gate is open.
#[derive(Default)]
pub struct AllOf {
    gates: Vec<Arc<dyn CapabilityGate>>,
}

impl AllOf {
    /// Creates an empty conjunction, which is always open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a gate.
    #[must_use]
    pub fn with(mut self, gate: Arc<dyn CapabilityGate>) -> Self {
        self.gates.push(gate);
        self
    }

    /// Names of the gates that are currently closed.
    #[must_use]
    pub fn closed(&self) -> Vec<&'static str> {
        self.gates
            .iter()
            .filter(|gate| !gate.check())
            .map(|gate| gate.name())
            .collect()
    }
}

impl fmt::Debug for AllOf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.gates.iter().map(|gate| gate.name()))
            .finish()
    }
}

impl CapabilityGate for AllOf {
    fn check(&self) -> bool {
        self.gates.iter().all(|gate| gate.check())
    }

    fn name(&self) -> &'static str {
        "all_of"
    }
}
