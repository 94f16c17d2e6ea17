//! Thread origin resolver: drives a crawl session over a listing window.
//!
//! Each listing entry is resolved on one of three paths:
//! - ledger hit: a previous expansion (or fast-path commit) already owns the
//!   entry's message, nothing is fetched
//! - fast path: the classifier says "origin" and the ledger agrees, the
//!   entry itself is committed from listing metadata
//! - expansion: the whole thread is fetched, every member id is claimed in
//!   one step and the first message becomes the origin
//!
//! Origins are always recorded under the canonical ref of their origin
//! message; any other thread ref that leads to the same origin becomes a
//! cross-reference. That keeps the outcome independent of which entry of a
//! thread the pool happens to reach first.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use threadmark_common::{
    has_reply_prefix, Cursor, ListingEntry, MessageId, OriginRecord, RegistryEntry,
    ResolutionPath, ThreadRef, ThreadmarkError, TimeWindow,
};

use crate::checkpoint::{Checkpoint, CheckpointStore};
use crate::classifier::{classify, Classification};
use crate::error::{ExpandError, FetchError, RegistryConflict, SessionError};
use crate::ledger::Ledger;
use crate::registry::{OriginRegistry, PutOutcome, RegistrySnapshot};
use crate::report::SessionReport;
use crate::traits::{ListingSource, ThreadExpander};

// ---------------------------------------------------------------------------
// Session state
// ---------------------------------------------------------------------------

/// The only mutable state shared by the workers of a session.
#[derive(Default)]
pub struct ResolverContext {
    pub ledger: Ledger,
    pub registry: OriginRegistry,
}

impl ResolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(
        ledger: BTreeMap<MessageId, ThreadRef>,
        registry: RegistrySnapshot,
    ) -> Self {
        Self {
            ledger: Ledger::restore(ledger),
            registry: OriginRegistry::restore(registry),
        }
    }

    /// Check the structural invariants the resolver maintains. A failure is a
    /// programming error, never an operational one.
    pub fn verify(&self) -> Result<(), ThreadmarkError> {
        for (key, entry) in self.registry.snapshot().entries {
            let RegistryEntry::Origin(record) = entry else {
                continue;
            };
            if record.thread_ref != key {
                return Err(ThreadmarkError::Invariant(format!(
                    "origin {} stored under {key} but belongs to {}",
                    record.message_id, record.thread_ref
                )));
            }
            if !self.ledger.contains(&record.message_id) {
                return Err(ThreadmarkError::Invariant(format!(
                    "origin {} of {key} is missing from the ledger",
                    record.message_id
                )));
            }
        }
        Ok(())
    }
}

/// Identity of one crawl session and where its listing crawl starts.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: Uuid,
    pub window: TimeWindow,
    pub resume_from: Option<Cursor>,
}

impl Session {
    pub fn new(window: TimeWindow) -> Self {
        Self {
            id: Uuid::new_v4(),
            window,
            resume_from: None,
        }
    }

    /// Continue the session a checkpoint was taken from.
    pub fn resume(checkpoint: &Checkpoint) -> Self {
        Self {
            id: checkpoint.session_id,
            window: checkpoint.window,
            resume_from: checkpoint.last_cursor.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Classifier only. Subjects opening with a reply prefix are skipped;
    /// only the ambiguous ones with a marker further in are fetched.
    Fast,
    /// Expand every entry the ledger doesn't already cover.
    Thorough,
    /// Fast path for likely origins, expansion for the rest.
    #[default]
    Combined,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Fast => write!(f, "fast"),
            Strategy::Thorough => write!(f, "thorough"),
            Strategy::Combined => write!(f, "combined"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ResolverSettings {
    pub strategy: Strategy,
    /// Entries resolved concurrently.
    pub workers: usize,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::Combined,
            workers: 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    Fetch { error: FetchError },
    EmptyThread,
    /// The listing row carries no message id and the strategy doesn't fetch.
    MissingMessageId,
}

impl std::fmt::Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::Fetch { error } => write!(f, "fetch failed: {error}"),
            UnresolvedReason::EmptyThread => write!(f, "thread has no messages"),
            UnresolvedReason::MissingMessageId => write!(f, "listing row has no message id"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    /// The entry's message is already attributed to `owner`.
    Known { owner: ThreadRef },
    /// An origin record was written (or reconciled) under `origin`.
    Committed {
        origin: ThreadRef,
        message_id: MessageId,
        path: ResolutionPath,
        put: PutOutcome,
    },
    /// The thread's origin was already recorded under `origin`.
    CrossReferenced {
        origin: ThreadRef,
        message_id: MessageId,
    },
    /// Likely reply under the fast strategy.
    SkippedReply,
    Unresolved(UnresolvedReason),
    Conflicted(RegistryConflict),
}

impl EntryOutcome {
    /// Canonical thread the entry ended up attached to.
    pub fn thread(&self) -> Option<&ThreadRef> {
        match self {
            EntryOutcome::Known { owner } => Some(owner),
            EntryOutcome::Committed { origin, .. } => Some(origin),
            EntryOutcome::CrossReferenced { origin, .. } => Some(origin),
            _ => None,
        }
    }
}

/// Expansion whose first message was already owned by a different thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConflict {
    pub thread_ref: ThreadRef,
    pub message_id: MessageId,
    pub claimed_by: ThreadRef,
}

/// Non-origin members an expansion shares with a thread of a different origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Overlap {
    pub thread_ref: ThreadRef,
    pub other: ThreadRef,
    pub shared: Vec<MessageId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub thread_ref: ThreadRef,
    pub outcome: EntryOutcome,
    /// The classifier said origin but the ledger already knew the id.
    pub fell_through: bool,
    pub ledger_conflict: Option<LedgerConflict>,
    pub overlaps: Vec<Overlap>,
}

impl Resolution {
    fn new(entry: &ListingEntry, outcome: EntryOutcome) -> Self {
        Self {
            thread_ref: entry.thread_ref.clone(),
            outcome,
            fell_through: false,
            ledger_conflict: None,
            overlaps: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

pub struct Resolver {
    listing: Arc<dyn ListingSource>,
    expander: Arc<dyn ThreadExpander>,
    ctx: Arc<ResolverContext>,
    settings: ResolverSettings,
}

impl Resolver {
    pub fn new(
        listing: Arc<dyn ListingSource>,
        expander: Arc<dyn ThreadExpander>,
        ctx: Arc<ResolverContext>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            listing,
            expander,
            ctx,
            settings,
        }
    }

    pub fn context(&self) -> &Arc<ResolverContext> {
        &self.ctx
    }

    /// Crawl the session's window to exhaustion.
    ///
    /// Entries of one listing page are resolved concurrently; the next page
    /// is only requested once every entry of the current one has settled.
    /// With a checkpoint store, state is saved after each page.
    pub async fn run(
        &self,
        session: &Session,
        checkpoints: Option<&CheckpointStore>,
    ) -> Result<SessionReport, SessionError> {
        let window = session.window;
        let mut report = SessionReport::new(session.id, window, self.settings.strategy);
        let mut visited: HashSet<ThreadRef> = HashSet::new();
        let mut cursor = session.resume_from.clone();
        let workers = self.settings.workers.max(1);

        info!(
            session_id = %session.id,
            strategy = %self.settings.strategy,
            workers,
            start = %window.start,
            end = %window.end,
            resumed = cursor.is_some(),
            "Resolver session starting"
        );

        loop {
            let page = self
                .listing
                .next_page(&window, cursor.as_ref())
                .await
                .map_err(SessionError::ListingUnavailable)?;
            report.pages += 1;

            let listed = page.entries.len();
            let fresh: Vec<ListingEntry> = page
                .entries
                .into_iter()
                .filter(|e| visited.insert(e.thread_ref.clone()))
                .collect();
            report.duplicates += (listed - fresh.len()) as u32;

            let resolutions: Vec<Resolution> = stream::iter(fresh)
                .map(|entry| async move { self.resolve_entry(&entry).await })
                .buffer_unordered(workers)
                .collect()
                .await;
            for resolution in &resolutions {
                report.record(resolution);
            }

            let next = match page.next {
                Some(next) if cursor.as_ref() == Some(&next) => {
                    warn!(cursor = %next, "Listing cursor did not advance, stopping");
                    None
                }
                other => other,
            };

            info!(
                page = report.pages,
                entries = listed,
                resolved = resolutions.len(),
                ledger = self.ctx.ledger.len(),
                "Listing page settled"
            );

            if let Some(store) = checkpoints {
                store.save(&Checkpoint::capture(session, &self.ctx, next.clone()))?;
            }

            match next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        self.ctx.verify()?;
        report.finish(&self.ctx);
        info!(session_id = %session.id, "Resolver session complete");
        Ok(report)
    }

    /// Resolve one listing entry and note its activity on the thread it
    /// lands in.
    pub async fn resolve_entry(&self, entry: &ListingEntry) -> Resolution {
        let resolution = self.resolve(entry).await;
        if let Some(thread) = resolution.outcome.thread() {
            self.ctx.registry.touch(thread, entry.timestamp);
        }
        resolution
    }

    async fn resolve(&self, entry: &ListingEntry) -> Resolution {
        if let Some(id) = &entry.message_id {
            if let Some(owner) = self.ctx.ledger.owner_of(id) {
                debug!(thread_ref = %entry.thread_ref, owner = %owner, "Ledger hit, skipping");
                return self.known(entry, owner);
            }
        }
        self.resolve_unclaimed(entry).await
    }

    /// Resolve an entry the ledger didn't know at the pre-check. Other
    /// workers may claim its message id at any point from here on.
    pub(crate) async fn resolve_unclaimed(&self, entry: &ListingEntry) -> Resolution {
        let ledger = &self.ctx.ledger;
        let strategy = self.settings.strategy;

        if strategy == Strategy::Thorough {
            return self.expand_and_commit(entry).await;
        }

        if classify(entry) == Classification::LikelyReply {
            if strategy == Strategy::Fast && has_reply_prefix(&entry.subject) {
                debug!(thread_ref = %entry.thread_ref, "Likely reply, skipped");
                return Resolution::new(entry, EntryOutcome::SkippedReply);
            }
            // A marker inside the subject (`Fwd: Re: ..`) is ambiguous even
            // for the fast strategy.
            return self.expand_and_commit(entry).await;
        }

        let Some(id) = &entry.message_id else {
            if strategy == Strategy::Fast {
                return Resolution::new(
                    entry,
                    EntryOutcome::Unresolved(UnresolvedReason::MissingMessageId),
                );
            }
            return self.expand_and_commit(entry).await;
        };

        let canonical = ThreadRef::of_message(id);
        let Some(owner) = ledger.try_claim(id, &canonical) else {
            return self.commit_from_listing(entry, id.clone(), canonical);
        };

        // Another worker claimed the id between the ledger check and the claim.
        if strategy == Strategy::Fast {
            return self.known(entry, owner);
        }
        warn!(
            thread_ref = %entry.thread_ref,
            message_id = %id,
            owner = %owner,
            "Looked like an origin but the ledger already knows it, expanding"
        );
        let mut resolution = self.expand_and_commit(entry).await;
        resolution.fell_through = true;
        resolution
    }

    fn known(&self, entry: &ListingEntry, owner: ThreadRef) -> Resolution {
        if entry.thread_ref != owner {
            let origin_id = owner.origin_id();
            if let Err(conflict) =
                self.ctx
                    .registry
                    .put_cross_reference(entry.thread_ref.clone(), owner.clone(), origin_id)
            {
                return Resolution::new(entry, EntryOutcome::Conflicted(conflict));
            }
        }
        Resolution::new(entry, EntryOutcome::Known { owner })
    }

    fn commit_from_listing(
        &self,
        entry: &ListingEntry,
        message_id: MessageId,
        canonical: ThreadRef,
    ) -> Resolution {
        let record = OriginRecord::from_listing(entry, message_id.clone());
        let put = match self.ctx.registry.put(record) {
            Ok(put) => put,
            Err(conflict) => return Resolution::new(entry, EntryOutcome::Conflicted(conflict)),
        };
        if let Err(conflict) = self.alias(entry, &canonical, &message_id) {
            return Resolution::new(entry, EntryOutcome::Conflicted(conflict));
        }

        info!(
            thread_ref = %entry.thread_ref,
            message_id = %message_id,
            subject = entry.subject.as_str(),
            "Committed origin from listing"
        );
        Resolution::new(
            entry,
            EntryOutcome::Committed {
                origin: canonical,
                message_id,
                path: ResolutionPath::Listing,
                put,
            },
        )
    }

    async fn expand_and_commit(&self, entry: &ListingEntry) -> Resolution {
        let messages = match self.expander.expand(&entry.thread_ref).await {
            Ok(messages) => messages,
            Err(e) => {
                let reason = match e {
                    ExpandError::Fetch(error) => UnresolvedReason::Fetch { error },
                    ExpandError::EmptyThread(_) => UnresolvedReason::EmptyThread,
                };
                warn!(thread_ref = %entry.thread_ref, %reason, "Thread left unresolved");
                return Resolution::new(entry, EntryOutcome::Unresolved(reason));
            }
        };
        let Some(origin) = messages.first() else {
            warn!(thread_ref = %entry.thread_ref, "Expansion returned no messages");
            return Resolution::new(
                entry,
                EntryOutcome::Unresolved(UnresolvedReason::EmptyThread),
            );
        };

        let ids: Vec<MessageId> = messages.iter().map(|m| m.message_id.clone()).collect();
        let canonical = ThreadRef::of_message(&origin.message_id);
        let claim = self.ctx.ledger.claim_thread(&ids, &canonical);
        let overlaps = overlaps(&claim.origin_owner, &ids, &claim.prior);
        for overlap in &overlaps {
            warn!(
                thread_ref = %overlap.thread_ref,
                other = %overlap.other,
                shared = overlap.shared.len(),
                "Expanded thread shares messages with a different origin"
            );
        }

        if claim.origin_owner != canonical {
            // The first message is already a member of another thread.
            let owner = claim.origin_owner;
            let conflict = LedgerConflict {
                thread_ref: entry.thread_ref.clone(),
                message_id: origin.message_id.clone(),
                claimed_by: owner.clone(),
            };
            warn!(
                thread_ref = %entry.thread_ref,
                message_id = %origin.message_id,
                claimed_by = %owner,
                "Origin already claimed by another thread, cross-referencing"
            );
            let origin_id = owner.origin_id();
            let mut resolution = if entry.thread_ref == owner {
                Resolution::new(entry, EntryOutcome::Known { owner })
            } else {
                match self.ctx.registry.put_cross_reference(
                    entry.thread_ref.clone(),
                    owner.clone(),
                    origin_id.clone(),
                ) {
                    Ok(_) => Resolution::new(
                        entry,
                        EntryOutcome::CrossReferenced {
                            origin: owner,
                            message_id: origin_id,
                        },
                    ),
                    Err(c) => Resolution::new(entry, EntryOutcome::Conflicted(c)),
                }
            };
            resolution.ledger_conflict = Some(conflict);
            resolution.overlaps = overlaps;
            return resolution;
        }

        let origin_was_new = claim.origin_was_new();
        let message_id = origin.message_id.clone();
        let record = OriginRecord::from_expansion(canonical.clone(), origin.clone(), messages.len());
        let outcome = match self.ctx.registry.put(record) {
            Err(conflict) => EntryOutcome::Conflicted(conflict),
            Ok(put) => match self.alias(entry, &canonical, &message_id) {
                Err(conflict) => EntryOutcome::Conflicted(conflict),
                Ok(()) if origin_was_new || entry.thread_ref == canonical => {
                    info!(
                        thread_ref = %entry.thread_ref,
                        origin = %canonical,
                        members = messages.len(),
                        ?put,
                        "Committed origin from expansion"
                    );
                    EntryOutcome::Committed {
                        origin: canonical,
                        message_id,
                        path: ResolutionPath::Expansion,
                        put,
                    }
                }
                Ok(()) => {
                    info!(
                        thread_ref = %entry.thread_ref,
                        origin = %canonical,
                        "Origin already recorded, cross-referenced"
                    );
                    EntryOutcome::CrossReferenced {
                        origin: canonical,
                        message_id,
                    }
                }
            },
        };

        let mut resolution = Resolution::new(entry, outcome);
        resolution.overlaps = overlaps;
        resolution
    }

    /// Point the entry's own ref at `canonical` when they differ.
    fn alias(
        &self,
        entry: &ListingEntry,
        canonical: &ThreadRef,
        message_id: &MessageId,
    ) -> Result<(), RegistryConflict> {
        if entry.thread_ref == *canonical {
            return Ok(());
        }
        self.ctx
            .registry
            .put_cross_reference(entry.thread_ref.clone(), canonical.clone(), message_id.clone())
            .map(|_| ())
    }
}

/// Group non-origin ids that were already owned by a thread other than
/// `owner`.
fn overlaps(owner: &ThreadRef, ids: &[MessageId], prior: &[Option<ThreadRef>]) -> Vec<Overlap> {
    let mut shared: BTreeMap<ThreadRef, Vec<MessageId>> = BTreeMap::new();
    for (id, previous) in ids.iter().zip(prior).skip(1) {
        if let Some(other) = previous.as_ref().filter(|other| *other != owner) {
            shared.entry(other.clone()).or_default().push(id.clone());
        }
    }
    shared
        .into_iter()
        .map(|(other, shared)| Overlap {
            thread_ref: owner.clone(),
            other,
            shared,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{entry, january, thread, MockExpander, MockListing};

    fn resolver(strategy: Strategy, expander: MockExpander) -> (Resolver, Arc<MockExpander>) {
        let expander = Arc::new(expander);
        let resolver = Resolver::new(
            Arc::new(MockListing::new(Vec::new())),
            expander.clone(),
            Arc::new(ResolverContext::new()),
            ResolverSettings {
                strategy,
                workers: 1,
            },
        );
        (resolver, expander)
    }

    #[tokio::test]
    async fn likely_origin_commits_without_fetch() {
        let (resolver, expander) = resolver(Strategy::Combined, MockExpander::new());

        let resolution = resolver
            .resolve_entry(&entry("m1", "Feature X", "2025-01-02 10:00:00"))
            .await;

        assert!(matches!(
            resolution.outcome,
            EntryOutcome::Committed {
                path: ResolutionPath::Listing,
                put: PutOutcome::Inserted,
                ..
            }
        ));
        assert_eq!(expander.total_calls(), 0);
        assert!(resolver.context().ledger.contains(&MessageId::new("m1")));
    }

    #[tokio::test]
    async fn ledger_hit_skips_expansion() {
        let members = thread(&[("m1", "Feature X"), ("m2", "Re: Feature X")]);
        let (resolver, expander) =
            resolver(Strategy::Combined, MockExpander::new().on_every_page(members));

        resolver
            .resolve_entry(&entry("m2", "Re: Feature X", "2025-01-02 10:30:00"))
            .await;
        let resolution = resolver
            .resolve_entry(&entry("m1", "Feature X", "2025-01-02 10:00:00"))
            .await;

        assert_eq!(
            resolution.outcome,
            EntryOutcome::Known {
                owner: ThreadRef::new("m1")
            }
        );
        assert_eq!(expander.total_calls(), 1);
    }

    #[tokio::test]
    async fn fast_strategy_skips_replies() {
        let (resolver, expander) = resolver(Strategy::Fast, MockExpander::new());

        let resolution = resolver
            .resolve_entry(&entry("m2", "Re: Feature X", "2025-01-02 10:30:00"))
            .await;

        assert_eq!(resolution.outcome, EntryOutcome::SkippedReply);
        assert_eq!(expander.total_calls(), 0);
        assert!(resolver.context().ledger.is_empty());
    }

    #[tokio::test]
    async fn fast_strategy_checks_subjects_with_an_inner_reply_marker() {
        let members = thread(&[
            ("m20", "Fwd: Re: NFS readdir"),
            ("m21", "Re: Fwd: Re: NFS readdir"),
        ]);
        let (resolver, expander) =
            resolver(Strategy::Fast, MockExpander::new().on_every_page(members));

        let resolution = resolver
            .resolve_entry(&entry("m20", "Fwd: Re: NFS readdir", "2025-01-02 10:00:00"))
            .await;

        assert!(matches!(
            resolution.outcome,
            EntryOutcome::Committed {
                path: ResolutionPath::Expansion,
                ..
            }
        ));
        assert_eq!(expander.calls("m20"), 1);
        let new = resolver.context().registry.list_resolved(&january());
        assert_eq!(new.len(), 1);
        assert_eq!(new[0].subject, "Fwd: Re: NFS readdir");
    }

    #[tokio::test]
    async fn origin_claimed_after_the_ledger_check_falls_through_to_expansion() {
        // m2 lost its reply marker. Between its ledger check and its claim,
        // an expansion of the same thread takes every id.
        let members = thread(&[
            ("m1", "Feature X"),
            ("m2", "Re: Feature X"),
            ("m3", "Re: Feature X"),
        ]);
        let (resolver, expander) =
            resolver(Strategy::Combined, MockExpander::new().on_every_page(members));
        let row = entry("m2", "Feature X", "2025-01-02 10:30:00");
        assert_eq!(resolver.context().ledger.owner_of(&MessageId::new("m2")), None);

        resolver
            .resolve_entry(&entry("m3", "Re: Feature X", "2025-01-02 11:00:00"))
            .await;
        let resolution = resolver.resolve_unclaimed(&row).await;

        assert!(resolution.fell_through);
        assert_eq!(
            resolution.outcome,
            EntryOutcome::CrossReferenced {
                origin: ThreadRef::new("m1"),
                message_id: MessageId::new("m1"),
            }
        );
        assert_eq!(expander.calls("m2"), 1);
        assert_eq!(resolver.context().registry.counts(), (1, 2));

        let mut report = SessionReport::new(Uuid::new_v4(), january(), Strategy::Combined);
        report.record(&resolution);
        assert_eq!(report.fallthroughs, 1);
        assert_eq!(report.cross_referenced, 1);
    }

    #[tokio::test]
    async fn thorough_strategy_expands_likely_origins() {
        let members = thread(&[("m1", "Feature X"), ("m2", "Re: Feature X")]);
        let (resolver, expander) =
            resolver(Strategy::Thorough, MockExpander::new().on_every_page(members));

        let resolution = resolver
            .resolve_entry(&entry("m1", "Feature X", "2025-01-02 10:00:00"))
            .await;

        assert!(matches!(
            resolution.outcome,
            EntryOutcome::Committed {
                path: ResolutionPath::Expansion,
                ..
            }
        ));
        assert_eq!(expander.calls("m1"), 1);
        let record = resolver.context().registry.get(&ThreadRef::new("m1")).unwrap();
        assert_eq!(record.reply_count, Some(1));
    }

    #[tokio::test]
    async fn row_without_message_id_is_expanded() {
        let members = thread(&[("m1", "Feature X"), ("m2", "Re: Feature X")]);
        let (resolver, expander) = resolver(
            Strategy::Combined,
            MockExpander::new().on_thread("page-7", members),
        );
        let mut row = entry("page-7", "Feature X", "2025-01-02 10:00:00");
        row.message_id = None;

        let resolution = resolver.resolve_entry(&row).await;

        assert!(matches!(resolution.outcome, EntryOutcome::Committed { .. }));
        assert_eq!(expander.calls("page-7"), 1);
        let registry = &resolver.context().registry;
        assert!(matches!(
            registry.entry(&ThreadRef::new("page-7")),
            Some(RegistryEntry::CrossReference { .. })
        ));
        assert_eq!(
            registry.get(&ThreadRef::new("page-7")).unwrap().message_id,
            MessageId::new("m1")
        );
    }

    #[tokio::test]
    async fn known_origin_of_a_different_thread_is_a_ledger_conflict() {
        // m5's page shows m2 as the first message, but m2 already belongs to m1's thread
        let (resolver, _) = resolver(
            Strategy::Combined,
            MockExpander::new()
                .on_thread("m2", thread(&[("m1", "Feature X"), ("m2", "Re: Feature X")]))
                .on_thread("m5", thread(&[("m2", "Re: Feature X"), ("m5", "Re: Feature X")])),
        );
        resolver
            .resolve_entry(&entry("m2", "Re: Feature X", "2025-01-02 10:30:00"))
            .await;
        let resolution = resolver
            .resolve_entry(&entry("m5", "Re: Feature X", "2025-01-02 11:00:00"))
            .await;

        assert_eq!(
            resolution.outcome,
            EntryOutcome::CrossReferenced {
                origin: ThreadRef::new("m1"),
                message_id: MessageId::new("m1"),
            }
        );
        let conflict = resolution.ledger_conflict.unwrap();
        assert_eq!(conflict.message_id, MessageId::new("m2"));
        assert_eq!(conflict.claimed_by, ThreadRef::new("m1"));
    }

    #[test]
    fn overlaps_group_by_other_owner() {
        let owner = ThreadRef::new("m1");
        let ids: Vec<_> = ["m1", "m2", "m3", "m4"].into_iter().map(MessageId::new).collect();
        let prior = vec![
            None,
            Some(ThreadRef::new("m9")),
            Some(owner.clone()),
            Some(ThreadRef::new("m9")),
        ];

        let found = overlaps(&owner, &ids, &prior);
        assert_eq!(
            found,
            vec![Overlap {
                thread_ref: owner,
                other: ThreadRef::new("m9"),
                shared: vec![MessageId::new("m2"), MessageId::new("m4")],
            }]
        );
    }
}
