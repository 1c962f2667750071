//! Primary/secondary upstream selection with one-way failover.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::connection::Connection;
use crate::error::{EngineError, Result};

/// Result of a successful [`UpstreamSelector::failover`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailoverOutcome {
    /// This call moved traffic to the secondary.
    Switched,
    /// An earlier call already did.
    AlreadyOnSecondary,
}

/// Holds the primary and optional secondary connection.
///
/// The active side is read on every [`current`](Self::current) call, so a
/// failover is visible to every caller from that point on. There is no
/// fail-back.
pub struct UpstreamSelector {
    primary: Arc<dyn Connection>,
    secondary: Option<Arc<dyn Connection>>,
    on_secondary: AtomicBool,
}

impl UpstreamSelector {
    pub fn new(primary: Arc<dyn Connection>, secondary: Option<Arc<dyn Connection>>) -> Self {
        Self {
            primary,
            secondary,
            on_secondary: AtomicBool::new(false),
        }
    }

    /// The connection new requests should use.
    pub fn current(&self) -> Arc<dyn Connection> {
        if self.on_secondary.load(Ordering::Acquire)
            && let Some(secondary) = &self.secondary
        {
            return secondary.clone();
        }
        self.primary.clone()
    }

    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    pub fn is_on_secondary(&self) -> bool {
        self.on_secondary.load(Ordering::Acquire)
    }

    /// Switch to the secondary connection.
    ///
    /// Returns [`EngineError::NoSecondaryConfigured`] and leaves the active
    /// connection unchanged when there is no secondary.
    pub fn failover(&self) -> Result<FailoverOutcome> {
        let Some(secondary) = &self.secondary else {
            warn!("Failover requested but no secondary upstream is configured");
            return Err(EngineError::NoSecondaryConfigured);
        };

        match self
            .on_secondary
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!(
                    from = %self.primary.label(),
                    to = %secondary.label(),
                    "Switched to secondary upstream"
                );
                Ok(FailoverOutcome::Switched)
            }
            Err(_) => Ok(FailoverOutcome::AlreadyOnSecondary),
        }
    }

    pub fn primary_label(&self) -> &str {
        self.primary.label()
    }

    pub fn secondary_label(&self) -> Option<&str> {
        self.secondary.as_ref().map(|c| c.label())
    }
}

impl std::fmt::Debug for UpstreamSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamSelector")
            .field("primary", &self.primary.label())
            .field("secondary", &self.secondary_label())
            .field("on_secondary", &self.is_on_secondary())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedConnection;

    #[test]
    fn test_starts_on_primary() {
        let selector = UpstreamSelector::new(
            Arc::new(ScriptedConnection::new("primary")),
            Some(Arc::new(ScriptedConnection::new("backup"))),
        );
        assert_eq!(selector.current().label(), "primary");
        assert!(!selector.is_on_secondary());
    }

    #[test]
    fn test_failover_is_sticky() {
        let selector = UpstreamSelector::new(
            Arc::new(ScriptedConnection::new("primary")),
            Some(Arc::new(ScriptedConnection::new("backup"))),
        );

        assert_eq!(selector.failover().unwrap(), FailoverOutcome::Switched);
        for _ in 0..5 {
            assert_eq!(selector.current().label(), "backup");
        }
        assert_eq!(
            selector.failover().unwrap(),
            FailoverOutcome::AlreadyOnSecondary
        );
        assert_eq!(selector.current().label(), "backup");
    }

    #[test]
    fn test_failover_without_secondary() {
        let selector = UpstreamSelector::new(Arc::new(ScriptedConnection::new("primary")), None);
        assert_eq!(selector.failover(), Err(EngineError::NoSecondaryConfigured));
        assert_eq!(selector.current().label(), "primary");
        assert!(!selector.is_on_secondary());
    }

    #[test]
    fn test_failover_visible_across_threads() {
        let selector = Arc::new(UpstreamSelector::new(
            Arc::new(ScriptedConnection::new("primary")),
            Some(Arc::new(ScriptedConnection::new("backup"))),
        ));
        selector.failover().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let selector = selector.clone();
                std::thread::spawn(move || selector.current().label().to_string())
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.join().unwrap(), "backup");
        }
    }
}
