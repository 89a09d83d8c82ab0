use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use reclaim_core::{
    evaluate_pair, plan_matches, ArchiveEntry, Category, Claimant, FoundItem, FoundItemDraft,
    ItemKey, ItemKind, ItemStatus, LostItem, LostItemDraft, LostItemPatch, MatchKey, MatchRecord,
    ReclaimError,
};
use reclaim_store_sqlite::{
    ClaimMatchedOutcome, ListFilter, MatchCreateOutcome, SortOrder, SqliteStore,
};

pub const API_CONTRACT_VERSION: &str = "api.v1";

/// Address meaning "the reporter declined notification". Treated as a logged
/// no-op success, never an error.
pub const NO_NOTIFY_SENTINEL: &str = "none";

const MATCH_SUBJECT: &str = "Match Found for Your Lost Item";
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// External notification collaborator. Delivery is best-effort: a failed
/// send is logged by the orchestrator and never rolls back a match.
pub trait Notifier: Send + Sync + fmt::Debug {
    /// # Errors
    /// Returns [`ReclaimError::Notify`] when delivery fails.
    fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), ReclaimError>;
}

/// Default notifier: records the intent in the log and succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn send(&self, to: &str, subject: &str, _html_body: &str) -> Result<(), ReclaimError> {
        tracing::info!(to, subject, "no notifier configured; notification dropped");
        Ok(())
    }
}

/// Posts notification payloads to a delivery webhook (the mail relay is a
/// separate deployment concern).
#[derive(Clone)]
pub struct WebhookNotifier {
    agent: ureq::Agent,
    endpoint: String,
}

impl fmt::Debug for WebhookNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookNotifier").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl WebhookNotifier {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(NOTIFY_TIMEOUT).build();
        Self { agent, endpoint: endpoint.into() }
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, to: &str, subject: &str, html_body: &str) -> Result<(), ReclaimError> {
        self.agent
            .post(&self.endpoint)
            .send_json(serde_json::json!({
                "to": to,
                "subject": subject,
                "html_body": html_body,
            }))
            .map_err(|err| ReclaimError::Notify(err.to_string()))?;
        Ok(())
    }
}

/// One match produced by a reconciliation pass, carrying the updated item
/// states so callers never re-fetch after a mutation.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MatchCreated {
    pub record: MatchRecord,
    pub lost: LostItem,
    pub found: FoundItem,
}

/// Result of a cancellation: the removed match plus the reverted items.
/// An item already deleted out-of-band is reported as `None`.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct MatchCancelled {
    pub record: MatchRecord,
    pub lost: Option<LostItem>,
    pub found: Option<FoundItem>,
}

/// Facade over the catalog store, the matching engine, and the notifier.
/// Clones share the reconciliation gate, so passes are serialized across
/// every handle of one `ReclaimApi`.
#[derive(Debug, Clone)]
pub struct ReclaimApi {
    db_path: PathBuf,
    notifier: Arc<dyn Notifier>,
    reconcile_gate: Arc<Mutex<()>>,
}

impl ReclaimApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self::with_notifier(db_path, Arc::new(NoopNotifier))
    }

    #[must_use]
    pub fn with_notifier(db_path: PathBuf, notifier: Arc<dyn Notifier>) -> Self {
        Self { db_path, notifier, reconcile_gate: Arc::new(Mutex::new(())) }
    }

    fn open_store(&self) -> Result<SqliteStore, ReclaimError> {
        let mut store = SqliteStore::open(&self.db_path).map_err(store_error)?;
        store.migrate().map_err(store_error)?;
        Ok(store)
    }

    /// Record a lost-item report.
    ///
    /// # Errors
    /// Returns [`ReclaimError::Validation`] for an invalid draft, or
    /// [`ReclaimError::Store`] when persistence fails.
    pub fn submit_lost(&self, draft: &LostItemDraft) -> Result<LostItem, ReclaimError> {
        draft.validate()?;
        let mut store = self.open_store()?;
        store.create_lost(draft).map_err(store_error)
    }

    /// Record a found-item report.
    ///
    /// # Errors
    /// Returns [`ReclaimError::Validation`] for an invalid draft, or
    /// [`ReclaimError::Store`] when persistence fails.
    pub fn submit_found(&self, draft: &FoundItemDraft) -> Result<FoundItem, ReclaimError> {
        draft.validate()?;
        let mut store = self.open_store()?;
        store.create_found(draft).map_err(store_error)
    }

    /// # Errors
    /// Returns [`ReclaimError::Store`] when the query fails.
    pub fn lost_items(&self, filter: &ListFilter) -> Result<Vec<LostItem>, ReclaimError> {
        self.open_store()?.list_lost(filter).map_err(store_error)
    }

    /// # Errors
    /// Returns [`ReclaimError::Store`] when the query fails.
    pub fn found_items(&self, filter: &ListFilter) -> Result<Vec<FoundItem>, ReclaimError> {
        self.open_store()?.list_found(filter).map_err(store_error)
    }

    /// # Errors
    /// Returns [`ReclaimError::Store`] when the query fails.
    pub fn matches(
        &self,
        date: Option<time::Date>,
        order: SortOrder,
    ) -> Result<Vec<MatchRecord>, ReclaimError> {
        self.open_store()?.list_matches(date, order).map_err(store_error)
    }

    /// # Errors
    /// Returns [`ReclaimError::Store`] when the query fails.
    pub fn archive_entries(&self, filter: &ListFilter) -> Result<Vec<ArchiveEntry>, ReclaimError> {
        self.open_store()?.list_archive(filter).map_err(store_error)
    }

    /// # Errors
    /// Returns [`ReclaimError::Store`] when the query fails.
    pub fn count_found_in_category(&self, category: Category) -> Result<u64, ReclaimError> {
        self.open_store()?.count_found_in_category(category).map_err(store_error)
    }

    /// Apply an owner edit to a lost-item report.
    ///
    /// # Errors
    /// Returns [`ReclaimError::NotFound`] when the key does not resolve, or
    /// [`ReclaimError::Store`] when persistence fails.
    pub fn edit_lost(&self, key: ItemKey, patch: &LostItemPatch) -> Result<LostItem, ReclaimError> {
        let mut store = self.open_store()?;
        store
            .update_lost(key, patch)
            .map_err(store_error)?
            .ok_or_else(|| ReclaimError::NotFound(format!("lost item {key}")))
    }

    /// Remove a live item report.
    ///
    /// # Errors
    /// Returns [`ReclaimError::NotFound`] when the key does not resolve, or
    /// [`ReclaimError::Store`] when the delete fails.
    pub fn remove_item(&self, kind: ItemKind, key: ItemKey) -> Result<(), ReclaimError> {
        let store = self.open_store()?;
        let removed = match kind {
            ItemKind::Lost => store.delete_lost(key).map_err(store_error)?,
            ItemKind::Found => store.delete_found(key).map_err(store_error)?,
        };
        if removed {
            Ok(())
        } else {
            Err(ReclaimError::NotFound(format!("{} item {key}", kind.as_str())))
        }
    }

    /// Run one reconciliation pass over the current pending lost x found
    /// sets. Candidate pairs are re-read from the store before the match is
    /// created; a failure on one pair never aborts the pass, and the pair
    /// stays eligible for the next pass. Notification is best-effort.
    ///
    /// Passes are serialized: two callers racing into `reconcile` cannot
    /// both observe the same item as Pending.
    ///
    /// # Errors
    /// Returns [`ReclaimError::Store`] when the pending listings cannot be
    /// read at all.
    pub fn reconcile(&self) -> Result<Vec<MatchCreated>, ReclaimError> {
        let _gate = self.reconcile_gate.lock().unwrap_or_else(PoisonError::into_inner);

        let mut store = self.open_store()?;
        let pending_lost = store.list_pending_lost().map_err(store_error)?;
        let pending_found = store.list_pending_found().map_err(store_error)?;
        let plan = plan_matches(&pending_lost, &pending_found);
        for (kind, key) in &plan.missing_descriptions {
            tracing::warn!(
                kind = kind.as_str(),
                item = %key,
                "item has an empty description and is excluded from matching"
            );
        }

        let mut created = Vec::new();
        for pair in plan.candidates {
            let fresh_lost = match store.get_lost(pair.lost_key) {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::warn!(lost = %pair.lost_key, "lost item vanished before match creation");
                    continue;
                }
                Err(err) => {
                    tracing::error!(lost = %pair.lost_key, error = %err, "failed to re-read lost item");
                    continue;
                }
            };
            let fresh_found = match store.get_found(pair.found_key) {
                Ok(Some(item)) => item,
                Ok(None) => {
                    tracing::warn!(found = %pair.found_key, "found item vanished before match creation");
                    continue;
                }
                Err(err) => {
                    tracing::error!(found = %pair.found_key, error = %err, "failed to re-read found item");
                    continue;
                }
            };

            let eligibility = evaluate_pair(&fresh_lost, &fresh_found);
            if !eligibility.is_candidate() {
                tracing::debug!(
                    lost = %fresh_lost.lost_id,
                    found = %fresh_found.found_id,
                    reason = eligibility.as_str(),
                    "pair no longer eligible after re-read"
                );
                continue;
            }

            let record = match store.create_match(pair.lost_key, pair.found_key, OffsetDateTime::now_utc())
            {
                Ok(MatchCreateOutcome::Created(record)) => record,
                Ok(outcome) => {
                    tracing::warn!(
                        lost = %fresh_lost.lost_id,
                        found = %fresh_found.found_id,
                        outcome = ?outcome,
                        "match creation declined by the store"
                    );
                    continue;
                }
                Err(err) => {
                    tracing::error!(
                        lost = %fresh_lost.lost_id,
                        found = %fresh_found.found_id,
                        error = %err,
                        "match creation failed; pair will be retried next pass"
                    );
                    continue;
                }
            };

            tracing::info!(
                match_id = %record.match_id,
                lost = %record.lost_id,
                found = %record.found_id,
                "match created"
            );
            self.notify_match(&record);

            let mut lost = record.lost_snapshot.clone();
            lost.status = ItemStatus::Matched;
            let mut found = record.found_snapshot.clone();
            found.status = ItemStatus::Matched;
            created.push(MatchCreated { record, lost, found });
        }

        Ok(created)
    }

    /// Claim one live item directly, without a match (a student presenting
    /// proof at the desk).
    ///
    /// # Errors
    /// Returns [`ReclaimError::Validation`] for an empty claimant,
    /// [`ReclaimError::NotFound`] when the key does not resolve, or
    /// [`ReclaimError::Store`] when the transition fails.
    pub fn claim_item(
        &self,
        kind: ItemKind,
        key: ItemKey,
        claimant: &Claimant,
    ) -> Result<ArchiveEntry, ReclaimError> {
        claimant.validate()?;
        let mut store = self.open_store()?;
        store
            .claim_item(kind, key, claimant, OffsetDateTime::now_utc())
            .map_err(store_error)?
            .ok_or_else(|| ReclaimError::NotFound(format!("{} item {key}", kind.as_str())))
    }

    /// Claim both items of a match and retire the match record, atomically.
    ///
    /// # Errors
    /// Returns [`ReclaimError::Validation`] for an empty claimant,
    /// [`ReclaimError::NotFound`] when the match key does not resolve,
    /// [`ReclaimError::InconsistentState`] when the match references a
    /// missing item (nothing is mutated), or [`ReclaimError::Store`] when
    /// the transition fails.
    pub fn claim_matched(
        &self,
        match_key: MatchKey,
        claimant: &Claimant,
    ) -> Result<(ArchiveEntry, ArchiveEntry), ReclaimError> {
        claimant.validate()?;
        let mut store = self.open_store()?;
        match store
            .claim_matched(match_key, claimant, OffsetDateTime::now_utc())
            .map_err(store_error)?
        {
            ClaimMatchedOutcome::Claimed { lost, found } => Ok((lost, found)),
            ClaimMatchedOutcome::MatchNotFound => {
                Err(ReclaimError::NotFound(format!("match {match_key}")))
            }
            ClaimMatchedOutcome::MissingItems { lost_missing, found_missing } => {
                let mut missing = Vec::new();
                if lost_missing {
                    missing.push("lost item");
                }
                if found_missing {
                    missing.push("found item");
                }
                Err(ReclaimError::InconsistentState(format!(
                    "match {match_key} references a deleted {}",
                    missing.join(" and ")
                )))
            }
        }
    }

    /// Cancel a match: both items revert to Pending and the pair becomes
    /// eligible again on the next reconciliation pass.
    ///
    /// # Errors
    /// Returns [`ReclaimError::NotFound`] when the match key does not
    /// resolve, or [`ReclaimError::Store`] when the transition fails.
    pub fn cancel_match(&self, match_key: MatchKey) -> Result<MatchCancelled, ReclaimError> {
        let mut store = self.open_store()?;
        let cancelled = store
            .cancel_match(match_key)
            .map_err(store_error)?
            .ok_or_else(|| ReclaimError::NotFound(format!("match {match_key}")))?;
        tracing::info!(match_id = %cancelled.record.match_id, "match cancelled");
        Ok(MatchCancelled {
            record: cancelled.record,
            lost: cancelled.lost,
            found: cancelled.found,
        })
    }

    fn notify_match(&self, record: &MatchRecord) {
        let to = record
            .lost_snapshot
            .notify_email
            .as_deref()
            .map(str::trim)
            .filter(|address| !address.is_empty())
            .unwrap_or(NO_NOTIFY_SENTINEL);
        if to.eq_ignore_ascii_case(NO_NOTIFY_SENTINEL) {
            tracing::info!(match_id = %record.match_id, "notification skipped: no address on file");
            return;
        }
        if let Err(err) = self.notifier.send(to, MATCH_SUBJECT, &render_match_body(record)) {
            tracing::warn!(match_id = %record.match_id, error = %err, "match notification failed");
        }
    }
}

fn store_error(err: anyhow::Error) -> ReclaimError {
    ReclaimError::Store(format!("{err:#}"))
}

fn render_match_body(record: &MatchRecord) -> String {
    let matched_at = record
        .matched_at
        .format(&Rfc3339)
        .unwrap_or_else(|_| record.matched_at.to_string());
    format!(
        "<h1>Match Found!</h1>\n\
         <p>Your lost item (\"{}\") has been matched with a found item.</p>\n\
         <p>Location: {} and {}</p>\n\
         <p>Date Matched: {}</p>\n\
         <p>Thank you for using our service!</p>",
        record.lost_snapshot.name,
        record.lost_snapshot.location,
        record.found_snapshot.location_found,
        matched_at,
    )
}
