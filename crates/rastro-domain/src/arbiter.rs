use tracing::debug;

use crate::types::ConfigStatus;

/// A stalled peer may be displaced once its attempt counter passes this.
pub const OWNERSHIP_OVERRIDE_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    /// Nobody held the change; this instance now does.
    Claimed,
    /// This instance already held it and retries its own attempt.
    Retrying,
    /// A stalled peer was displaced.
    Seized,
    /// A healthy peer holds it; take no action this cycle.
    Declined,
}

impl ClaimDecision {
    pub fn granted(&self) -> bool {
        !matches!(self, ClaimDecision::Declined)
    }
}

/// Best-effort ownership arbitration over a configuration's shared status
/// document. Not a linearizable lease: two instances racing on the same
/// snapshot can both proceed, which the apply path tolerates as a duplicate
/// command.
pub struct ConfigArbiter {
    server_name: String,
}

impl ConfigArbiter {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Evaluate (and mutate) the status for this instance. The caller is
    /// responsible for writing the mutated status back to the shared store
    /// when the claim is granted.
    pub fn evaluate(&self, status: &mut ConfigStatus) -> ClaimDecision {
        if !status.in_progress {
            status.in_progress = true;
            status.owner = Some(self.server_name.clone());
            status.attempts = 1;
            return ClaimDecision::Claimed;
        }

        if status.owner.as_deref() == Some(self.server_name.as_str()) {
            status.attempts += 1;
            return ClaimDecision::Retrying;
        }

        if status.attempts > OWNERSHIP_OVERRIDE_ATTEMPTS {
            status.owner = Some(self.server_name.clone());
            status.attempts = 1;
            return ClaimDecision::Seized;
        }

        debug!(
            owner = status.owner.as_deref().unwrap_or("unknown"),
            attempts = status.attempts,
            "configuration held by another instance"
        );
        ClaimDecision::Declined
    }
}
