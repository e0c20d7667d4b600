//! Reassembly of uploads delivered as indexed fragments.

use super::types::{Descriptor, ParseError};
use std::collections::{BTreeMap, HashMap};

/// Accumulating state for one in-progress upload.
#[derive(Debug)]
struct UploadSession {
    declared_total: usize,
    fragments: BTreeMap<usize, String>,
}

/// Reconstructs descriptors from fragments that may arrive in any order.
///
/// Sessions are keyed by upload id and owned by a single control loop, so recording needs no
/// synchronization. A session is removed as soon as it completes, whether or not its payload
/// parses.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    sessions: HashMap<String, UploadSession>,
}

impl FragmentAssembler {
    /// Create an assembler with no open sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one fragment and complete the upload when possible.
    ///
    /// Completion fires once the number of distinct indices equals `total`, or immediately when
    /// `is_final` is set (a forced completion that parses whatever has been recorded). Fragments
    /// are joined in ascending index order. Returns `Ok(None)` while the upload is incomplete.
    pub fn add_fragment(
        &mut self,
        upload_id: &str,
        index: usize,
        total: usize,
        payload: String,
        is_final: bool,
    ) -> Result<Option<Descriptor>, ParseError> {
        let session = self
            .sessions
            .entry(upload_id.to_string())
            .or_insert_with(|| UploadSession {
                declared_total: total,
                fragments: BTreeMap::new(),
            });
        session.declared_total = total;
        if session.fragments.insert(index, payload).is_some() {
            tracing::debug!(upload_id, index, "Fragment index repeated; keeping latest");
        }

        let received = session.fragments.len();
        if received != session.declared_total && !is_final {
            tracing::trace!(upload_id, received, total, "Waiting for more fragments");
            return Ok(None);
        }

        let Some(session) = self.sessions.remove(upload_id) else {
            return Ok(None);
        };
        if received != session.declared_total {
            tracing::warn!(
                upload_id,
                received,
                total = session.declared_total,
                "Final fragment arrived before all fragments; assembling what was received"
            );
        } else {
            tracing::info!(upload_id, fragments = received, "Collected all fragments");
        }

        let raw: String = session.fragments.into_values().collect();
        Descriptor::parse(upload_id, &raw).map(Some)
    }

    /// Number of uploads still waiting for fragments.
    pub fn pending_sessions(&self) -> usize {
        self.sessions.len()
    }

    /// Drop an in-progress upload. Returns whether a session existed.
    pub fn discard(&mut self, upload_id: &str) -> bool {
        self.sessions.remove(upload_id).is_some()
    }
}
