//! Post-import verification against the document store.

use super::types::{Descriptor, VerificationOutcome};
use crate::qdrant::TITLE_FIELD;
use crate::store::{Candidate, DocumentStore, StoreError};
use std::time::Duration;

/// Retry, timeout, and backoff settings for [`ExistenceProbe`].
#[derive(Debug, Clone, Copy)]
pub struct ProbePolicy {
    /// Attempts before giving up.
    pub max_retries: u32,
    /// Deadline for one ranked search.
    pub search_timeout: Duration,
    /// Candidates requested from the ranked search.
    pub ranked_limit: usize,
    /// Backoff when the document collection does not exist yet.
    pub missing_collection_backoff: Duration,
    /// Backoff after a miss or a failed query.
    pub miss_backoff: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            search_timeout: Duration::from_secs(30),
            ranked_limit: 5,
            missing_collection_backoff: Duration::from_secs(1),
            miss_backoff: Duration::from_secs(2),
        }
    }
}

/// Result of one probe attempt.
enum Attempt {
    Found(String),
    CollectionMissing,
    Miss,
    Failed(StoreError),
}

/// Checks whether an upload actually landed in the store.
///
/// Ranked hits are only candidates: a document counts as present only when a candidate's title
/// equals [`Descriptor::title`] exactly. A ranked search that times out falls back to an equality
/// query on the title field within the same attempt.
#[derive(Debug, Clone)]
pub struct ExistenceProbe {
    collection: String,
    policy: ProbePolicy,
}

impl ExistenceProbe {
    /// Probe `collection` with the default policy.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            policy: ProbePolicy::default(),
        }
    }

    /// Replace the retry policy.
    pub fn with_policy(mut self, policy: ProbePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Collection searched for document records.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Search for `descriptor` until found or out of attempts. Never fails.
    pub async fn verify(
        &self,
        store: &dyn DocumentStore,
        descriptor: &Descriptor,
    ) -> VerificationOutcome {
        let max_retries = self.policy.max_retries.max(1);
        for attempt in 1..=max_retries {
            let backoff = match self.attempt(store, descriptor, attempt == 1).await {
                Attempt::Found(id) => {
                    tracing::info!(
                        upload_id = %descriptor.id,
                        title = %descriptor.title(),
                        matched_id = %id,
                        attempt,
                        "Document verified in store"
                    );
                    return VerificationOutcome::found(id);
                }
                Attempt::CollectionMissing => {
                    if attempt == 1 {
                        tracing::warn!(
                            upload_id = %descriptor.id,
                            collection = %self.collection,
                            "Document collection does not exist"
                        );
                    }
                    self.policy.missing_collection_backoff
                }
                Attempt::Miss => self.policy.miss_backoff,
                Attempt::Failed(error) => {
                    if attempt == 1 {
                        tracing::warn!(
                            upload_id = %descriptor.id,
                            error = %error,
                            "Verification query failed"
                        );
                    }
                    self.policy.miss_backoff
                }
            };

            if attempt == max_retries {
                break;
            }
            tracing::debug!(
                upload_id = %descriptor.id,
                attempt,
                max_retries,
                backoff_ms = backoff.as_millis() as u64,
                "Document not yet visible; retrying"
            );
            tokio::time::sleep(backoff).await;
        }

        tracing::warn!(
            upload_id = %descriptor.id,
            title = %descriptor.title(),
            attempts = max_retries,
            "Document not found in store"
        );
        VerificationOutcome::not_found()
    }

    async fn attempt(
        &self,
        store: &dyn DocumentStore,
        descriptor: &Descriptor,
        log_diagnostics: bool,
    ) -> Attempt {
        let title = descriptor.title();
        match store.collection_exists(&self.collection).await {
            Ok(true) => {}
            Ok(false) => return Attempt::CollectionMissing,
            Err(error) => return Attempt::Failed(error),
        }

        let timeout = self.policy.search_timeout;
        let ranked = tokio::time::timeout(
            timeout,
            store.search_ranked(
                &self.collection,
                title,
                self.policy.ranked_limit,
                timeout,
            ),
        )
        .await
        .unwrap_or(Err(StoreError::Timeout(timeout)));

        let candidates = match ranked {
            Ok(candidates) => {
                if log_diagnostics {
                    tracing::debug!(
                        upload_id = %descriptor.id,
                        candidates = candidates.len(),
                        titles = ?candidates.iter().map(|c| c.title.as_deref()).collect::<Vec<_>>(),
                        "Ranked search returned candidates"
                    );
                }
                candidates
            }
            Err(StoreError::Timeout(elapsed)) => {
                tracing::warn!(
                    upload_id = %descriptor.id,
                    timeout_secs = elapsed.as_secs_f64(),
                    "Ranked search timed out; falling back to exact title query"
                );
                match store
                    .query_equal(&self.collection, TITLE_FIELD, title, 1)
                    .await
                {
                    Ok(candidates) => candidates,
                    Err(error) => return Attempt::Failed(error),
                }
            }
            Err(error) => return Attempt::Failed(error),
        };

        match first_exact_match(candidates, title) {
            Some(id) => Attempt::Found(id),
            None => Attempt::Miss,
        }
    }
}

fn first_exact_match(candidates: Vec<Candidate>, title: &str) -> Option<String> {
    candidates
        .into_iter()
        .find(|candidate| candidate.is_exact_match(title))
        .map(|candidate| candidate.id)
}
