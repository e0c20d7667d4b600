//! Import orchestration that trusts the store over the importer.

use super::importer::Importer;
use super::probe::ExistenceProbe;
use super::reporter::TransportReporter;
use super::types::{Descriptor, Disposition, Phase, ReconciliationError, StatusReport};
use crate::store::{Connection, ConnectionFactory, Credentials};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Pause between the import call and verification, letting store writes become visible.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(2);

/// Runs an import, verifies it independently, and reports the verified outcome.
///
/// The importer's own result never decides the disposition: a failed import whose document is
/// nonetheless present ends in `DONE`, and a successful import whose document cannot be found
/// ends in `ERROR`.
pub struct ImportReconciler {
    factory: Arc<dyn ConnectionFactory>,
    probe: ExistenceProbe,
    settle_delay: Duration,
}

impl ImportReconciler {
    /// Create a reconciler with the default settle delay.
    pub fn new(factory: Arc<dyn ConnectionFactory>, probe: ExistenceProbe) -> Self {
        Self {
            factory,
            probe,
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }

    /// Override the settle delay.
    pub fn with_settle_delay(mut self, settle_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self
    }

    /// Import `descriptor`, verify it, and send the final status.
    pub async fn run(
        &self,
        descriptor: &Descriptor,
        importer: &dyn Importer,
        connection: Connection,
        credentials: &Credentials,
        reporter: &TransportReporter,
    ) -> Result<Disposition, ReconciliationError> {
        let started = Instant::now();
        reporter
            .send(&StatusReport::new(
                descriptor.id.as_str(),
                Phase::Processing,
                format!("Importing {}", descriptor.title()),
                0.0,
            ))
            .await;

        let import_error = match importer.import(connection.as_ref(), descriptor).await {
            Ok(receipt) => {
                tracing::debug!(
                    upload_id = %descriptor.id,
                    chunks = receipt.chunks_written,
                    "Importer reported success"
                );
                None
            }
            Err(error) => {
                tracing::warn!(
                    upload_id = %descriptor.id,
                    error = %error,
                    "Importer reported failure; verifying store state"
                );
                Some(error)
            }
        };

        tokio::time::sleep(self.settle_delay).await;

        let verifier = match self.factory.connect(credentials).await {
            Ok(fresh) => fresh,
            Err(error) => {
                tracing::warn!(
                    upload_id = %descriptor.id,
                    error = %error,
                    "Fresh connection failed; verifying with the import connection"
                );
                connection
            }
        };
        let outcome = self.probe.verify(verifier.as_ref(), descriptor).await;
        let elapsed_seconds = started.elapsed().as_secs_f64();

        let (disposition, error) = if outcome.found {
            if import_error.is_some() {
                tracing::info!(
                    upload_id = %descriptor.id,
                    "Document present despite importer failure"
                );
            }
            let disposition = Disposition {
                phase: Phase::Done,
                message: format!("Imported {}", descriptor.title()),
                elapsed_seconds,
                matched_id: outcome.matched_id,
            };
            (disposition, None)
        } else {
            let error = match import_error {
                Some(source) => ReconciliationError::Import(source),
                None => ReconciliationError::NotFound {
                    name: descriptor.title().to_string(),
                },
            };
            let disposition = Disposition {
                phase: Phase::Error,
                message: error.to_string(),
                elapsed_seconds,
                matched_id: None,
            };
            (disposition, Some(error))
        };

        reporter
            .send(&StatusReport::new(
                descriptor.id.as_str(),
                disposition.phase,
                disposition.message.as_str(),
                disposition.elapsed_seconds,
            ))
            .await;

        match error {
            Some(error) => Err(error),
            None => Ok(disposition),
        }
    }
}
