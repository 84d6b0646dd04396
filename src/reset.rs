//! Bulk reset of the primary data store for test and bootstrap harnesses.
//!
//! [`StoreResetService::clean_database`] empties every clearable collection,
//! and refuses to do anything at all when the environment is production.
//!
//! Clears run concurrently with no ordering between collections and no
//! enclosing transaction. If one fails after others succeeded, the succeeded
//! ones stay empty; dependent collections may be left half-cleared.

use crate::collection::{is_data_collection, CollectionSource};
use crate::config::Environment;
use crate::error::{Error, Result};
use futures::future::join_all;
use std::time::Instant;

/// Outcome of a successful `clean_database` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResetReport {
    /// Production guard engaged; nothing was touched.
    Skipped,
    /// Every clearable collection was emptied.
    Cleared {
        /// Collections emptied, in discovery order
        cleared: Vec<String>,
        /// Collections without a bulk-clear capability
        skipped: Vec<String>,
    },
}

impl ResetReport {
    pub fn is_skipped(&self) -> bool {
        matches!(self, ResetReport::Skipped)
    }

    pub fn cleared(&self) -> &[String] {
        match self {
            ResetReport::Cleared { cleared, .. } => cleared,
            ResetReport::Skipped => &[],
        }
    }
}

/// Clears all data collections outside production.
pub struct StoreResetService<S: CollectionSource> {
    source: S,
    environment: Environment,
}

impl<S: CollectionSource> StoreResetService<S> {
    pub fn new(source: S, environment: Environment) -> Self {
        StoreResetService {
            source,
            environment,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Empty every data collection of the store.
    ///
    /// In production this returns `Ok(ResetReport::Skipped)` without
    /// enumerating or touching any collection. Otherwise collections are
    /// discovered now, internal members are filtered out, and one clear per
    /// collection is issued concurrently. Collections lacking a bulk-clear
    /// capability are reported as skipped.
    ///
    /// # Errors
    ///
    /// - discovery failure from the source, unchanged
    /// - `Error::ResetFailed` naming every collection whose clear failed;
    ///   clears that succeeded are not undone
    pub async fn clean_database(&self) -> Result<ResetReport> {
        match self.guard() {
            Ok(()) => {}
            Err(Error::GuardedOperationSkipped(reason)) => {
                warn!("⚠ Database clean skipped: {}", reason);
                return Ok(ResetReport::Skipped);
            }
            Err(e) => return Err(e),
        }

        let timer = Instant::now();
        let collections: Vec<_> = self
            .source
            .collections()
            .await?
            .into_iter()
            .filter(|c| {
                let keep = is_data_collection(c.name());
                if !keep {
                    trace!("Ignoring internal member {}", c.name());
                }
                keep
            })
            .collect();

        warn!(
            "⚠ Cleaning database ({}): {} collections",
            self.environment,
            collections.len()
        );

        let outcomes = join_all(collections.iter().map(|c| async move {
            let outcome = c.clear().await;
            (c.name().to_string(), outcome)
        }))
        .await;

        let mut cleared = Vec::new();
        let mut skipped = Vec::new();
        let mut failed = Vec::new();
        let mut first_error = None;

        for (name, outcome) in outcomes {
            match outcome {
                Ok(rows) => {
                    debug!("✓ Cleared {} ({} rows)", name, rows);
                    cleared.push(name);
                }
                Err(Error::CapabilityUnsupported(_)) => {
                    debug!("Skipping {}: no bulk clear", name);
                    skipped.push(name);
                }
                Err(e) => {
                    error!("Failed to clear {}: {}", name, e);
                    first_error.get_or_insert_with(|| e.to_string());
                    failed.push(name);
                }
            }
        }

        if let Some(message) = first_error {
            return Err(Error::ResetFailed { failed, message });
        }

        info!(
            "✓ Database cleaned in {:?}: {} cleared, {} skipped",
            timer.elapsed(),
            cleared.len(),
            skipped.len()
        );
        Ok(ResetReport::Cleared { cleared, skipped })
    }

    fn guard(&self) -> Result<()> {
        if self.environment.is_production() {
            return Err(Error::GuardedOperationSkipped(format!(
                "environment is {}",
                self.environment
            )));
        }
        Ok(())
    }
}
