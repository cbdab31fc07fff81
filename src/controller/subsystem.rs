//! Subsystem Reconcilers
//!
//! Each subsystem of an OpenSearchService implements the same three-phase
//! capability. The driver runs `reconcile` for every subsystem, then
//! `configure`, then `status`, in list order.

use crate::error::Result;
use async_trait::async_trait;
use tracing::{debug, error};

/// Reconcile/Configure/Status capability of one subsystem
#[async_trait]
pub trait SubsystemReconciler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Converge the subsystem towards the desired state
    async fn reconcile(&self) -> Result<()>;

    /// Apply configuration that depends on every subsystem being reconciled
    async fn configure(&self) -> Result<()>;

    /// Report the subsystem state
    async fn status(&self) -> Result<()>;
}

/// Run every phase over `subsystems`; the first error aborts the run
pub async fn run_subsystems(subsystems: &[Box<dyn SubsystemReconciler>]) -> Result<()> {
    for subsystem in subsystems {
        debug!(subsystem = %subsystem.name(), "Reconcile");
        subsystem.reconcile().await.map_err(|e| {
            error!(subsystem = %subsystem.name(), "Reconcile failed: {}", e);
            e
        })?;
    }
    for subsystem in subsystems {
        debug!(subsystem = %subsystem.name(), "Configure");
        subsystem.configure().await?;
    }
    for subsystem in subsystems {
        subsystem.status().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::testing::Journal;
    use assert_matches::assert_matches;

    struct Recording {
        name: &'static str,
        journal: Journal,
        fail_reconcile: bool,
    }

    #[async_trait]
    impl SubsystemReconciler for Recording {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn reconcile(&self) -> Result<()> {
            self.journal.record(format!("reconcile:{}", self.name));
            if self.fail_reconcile {
                return Err(Error::Internal("boom".into()));
            }
            Ok(())
        }

        async fn configure(&self) -> Result<()> {
            self.journal.record(format!("configure:{}", self.name));
            Ok(())
        }

        async fn status(&self) -> Result<()> {
            self.journal.record(format!("status:{}", self.name));
            Ok(())
        }
    }

    fn subsystem(name: &'static str, journal: &Journal, fail_reconcile: bool) -> Box<dyn SubsystemReconciler> {
        Box::new(Recording {
            name,
            journal: journal.clone(),
            fail_reconcile,
        })
    }

    #[tokio::test]
    async fn test_phases_run_in_order() {
        let journal = Journal::default();
        let subsystems = vec![subsystem("a", &journal, false), subsystem("b", &journal, false)];

        run_subsystems(&subsystems).await.unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "reconcile:a",
                "reconcile:b",
                "configure:a",
                "configure:b",
                "status:a",
                "status:b"
            ]
        );
    }

    #[tokio::test]
    async fn test_reconcile_error_stops_the_run() {
        let journal = Journal::default();
        let subsystems = vec![subsystem("a", &journal, true), subsystem("b", &journal, false)];

        let result = run_subsystems(&subsystems).await;

        assert_matches!(result, Err(Error::Internal(_)));
        assert_eq!(journal.entries(), vec!["reconcile:a"]);
    }
}
