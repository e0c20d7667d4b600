//! Fragment ingestion: reassembly, import, verification, and status reporting.
//!
//! Data flows from fragments through the [`FragmentAssembler`] to a complete [`Descriptor`],
//! which the [`ImportReconciler`] imports, verifies with the [`ExistenceProbe`], and reports
//! through the [`TransportReporter`]. [`ImportSession`] ties these together for one connection.

pub mod assembler;
pub(crate) mod chunking;
pub mod importer;
pub mod probe;
pub mod reconciler;
pub mod reporter;
pub mod session;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use assembler::FragmentAssembler;
pub use chunking::ChunkingError;
pub use importer::{ImportSettings, Importer, StoreImporter};
pub use probe::{ExistenceProbe, ProbePolicy};
pub use reconciler::{DEFAULT_SETTLE_DELAY, ImportReconciler};
pub use reporter::{
    ChannelSink, ReporterHealth, ReporterPhase, ReporterPolicy, StatusSink, TransportError,
    TransportReporter,
};
pub use session::{ImportSession, IngestService};
pub use types::{
    Descriptor, Disposition, FragmentMessage, ImportError, ImportReceipt, ParseError, Phase,
    ReconciliationError, StatusReport, VerificationOutcome,
};
