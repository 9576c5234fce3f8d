//! Deployment listeners and the undeploy veto
//!
//! Listeners observe the deployment lifecycle in registration order.
//! Notification happens synchronously on the calling task and iterates a
//! point-in-time snapshot of the listener list, so a listener may safely
//! add or remove listeners, or re-enter the engine, from inside a callback.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::boundary::IsolationBoundary;

/// Opaque failure raised by a deployment listener.
pub type ListenerFault = Box<dyn std::error::Error + Send + Sync>;

/// Single-use cancellation token for the undeploy veto phase.
///
/// Once any listener invokes [`Veto::veto`], the whole undeploy aborts with
/// no state change. The first reason given wins; later calls are ignored.
#[derive(Debug, Default)]
pub struct Veto {
    vetoed: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl Veto {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Abort the in-progress undeploy.
    pub fn veto(&self, reason: impl Into<String>) {
        if !self.vetoed.swap(true, Ordering::SeqCst) {
            *self.reason.lock() = Some(reason.into());
        }
    }

    /// Whether any listener has vetoed.
    pub fn is_vetoed(&self) -> bool {
        self.vetoed.load(Ordering::SeqCst)
    }

    /// Reason supplied by the vetoing listener.
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

/// Observer of boundary deployment lifecycle events.
#[async_trait]
pub trait DeploymentListener: Send + Sync {
    /// A boundary was registered. Errors propagate to the `deploy` caller;
    /// the boundary remains registered either way.
    async fn deployed(&self, boundary: &IsolationBoundary) -> Result<(), ListenerFault> {
        let _ = boundary;
        Ok(())
    }

    /// An undeploy entered its veto phase. Invoking `veto` aborts the
    /// operation; this is the only cancellation primitive.
    async fn undeploying(&self, boundary: &IsolationBoundary, veto: &Veto) {
        let _ = (boundary, veto);
    }

    /// A boundary was torn down and removed from the registry. Errors are
    /// collected into the undeploy report, teardown is already complete.
    async fn undeployed(&self, boundary: &IsolationBoundary) -> Result<(), ListenerFault> {
        let _ = boundary;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_veto_reason_wins() {
        let veto = Veto::new();
        assert!(!veto.is_vetoed());
        assert_eq!(veto.reason(), None);

        veto.veto("migration in progress");
        veto.veto("second opinion");

        assert!(veto.is_vetoed());
        assert_eq!(veto.reason(), Some("migration in progress".to_string()));
    }
}
