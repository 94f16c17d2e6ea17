//! Output store: thread ref → resolved origin (or a cross-reference to one).
//!
//! Writes are first-writer-wins per key. A second write with the same origin
//! message is a no-op or fills in missing detail, and an expansion replaces
//! the headers a listing row supplied; a different origin message is rejected
//! and kept as an audit entry.

use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::warn;

use threadmark_common::{MessageId, OriginRecord, RegistryEntry, ThreadRef, TimeWindow};

use crate::error::RegistryConflict;

/// Cross-references are only ever one hop deep when written by the resolver;
/// the bound protects reads against hand-edited checkpoints.
const MAX_HOPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PutOutcome {
    Inserted,
    /// Same origin already recorded; nothing changed.
    Unchanged,
    /// Same origin already recorded; missing detail was filled in.
    Enriched,
}

/// Persisted shape of the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub entries: BTreeMap<ThreadRef, RegistryEntry>,
    #[serde(default)]
    pub activity: BTreeMap<ThreadRef, NaiveDateTime>,
    #[serde(default)]
    pub conflicts: Vec<RegistryConflict>,
}

#[derive(Default)]
struct State {
    entries: HashMap<ThreadRef, RegistryEntry>,
    /// Latest listing timestamp seen per canonical thread.
    activity: HashMap<ThreadRef, NaiveDateTime>,
    conflicts: Vec<RegistryConflict>,
}

impl State {
    fn resolve(&self, thread_ref: &ThreadRef) -> Option<&OriginRecord> {
        let mut current = thread_ref;
        for _ in 0..MAX_HOPS {
            match self.entries.get(current)? {
                RegistryEntry::Origin(record) => return Some(record),
                RegistryEntry::CrossReference { origin, .. } => current = origin,
            }
        }
        None
    }

    fn reject(&mut self, conflict: RegistryConflict) -> RegistryConflict {
        warn!(
            thread_ref = %conflict.thread_ref,
            existing = %conflict.existing,
            proposed = %conflict.proposed,
            "Registry conflict, keeping first resolution"
        );
        self.conflicts.push(conflict.clone());
        conflict
    }
}

#[derive(Default)]
pub struct OriginRegistry {
    state: RwLock<State>,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(snapshot: RegistrySnapshot) -> Self {
        Self {
            state: RwLock::new(State {
                entries: snapshot.entries.into_iter().collect(),
                activity: snapshot.activity.into_iter().collect(),
                conflicts: snapshot.conflicts,
            }),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `record` under its own thread ref.
    pub fn put(&self, record: OriginRecord) -> Result<PutOutcome, RegistryConflict> {
        let mut state = self.write();
        let key = record.thread_ref.clone();

        let existing_id = match state.entries.get_mut(&key) {
            None => {
                state.entries.insert(key, RegistryEntry::Origin(record));
                return Ok(PutOutcome::Inserted);
            }
            Some(RegistryEntry::Origin(existing)) if existing.message_id == record.message_id => {
                if existing.is_enriched_by(&record) {
                    existing.absorb(record);
                    return Ok(PutOutcome::Enriched);
                }
                return Ok(PutOutcome::Unchanged);
            }
            Some(RegistryEntry::Origin(existing)) => existing.message_id.clone(),
            Some(RegistryEntry::CrossReference { message_id, .. }) => message_id.clone(),
        };

        Err(state.reject(RegistryConflict {
            thread_ref: key,
            existing: existing_id,
            proposed: record.message_id,
        }))
    }

    /// Record that `thread_ref`'s origin `message_id` is already stored under `origin`.
    pub fn put_cross_reference(
        &self,
        thread_ref: ThreadRef,
        origin: ThreadRef,
        message_id: MessageId,
    ) -> Result<PutOutcome, RegistryConflict> {
        let mut state = self.write();

        let existing_id = match state.entries.get(&thread_ref) {
            None => {
                state
                    .entries
                    .insert(thread_ref, RegistryEntry::CrossReference { origin, message_id });
                return Ok(PutOutcome::Inserted);
            }
            Some(RegistryEntry::Origin(existing)) => &existing.message_id,
            Some(RegistryEntry::CrossReference {
                message_id: existing,
                ..
            }) => existing,
        };
        if *existing_id == message_id {
            return Ok(PutOutcome::Unchanged);
        }

        let existing = existing_id.clone();
        Err(state.reject(RegistryConflict {
            thread_ref,
            existing,
            proposed: message_id,
        }))
    }

    /// Origin record for `thread_ref`, following cross-references.
    pub fn get(&self, thread_ref: &ThreadRef) -> Option<OriginRecord> {
        self.read().resolve(thread_ref).cloned()
    }

    /// The raw entry stored under `thread_ref`.
    pub fn entry(&self, thread_ref: &ThreadRef) -> Option<RegistryEntry> {
        self.read().entries.get(thread_ref).cloned()
    }

    /// Note listing activity on a thread. Stored against the canonical thread
    /// when `thread_ref` is resolved, so replies count toward their origin.
    pub fn touch(&self, thread_ref: &ThreadRef, seen_at: NaiveDateTime) {
        let mut state = self.write();
        let key = state
            .resolve(thread_ref)
            .map(|record| record.thread_ref.clone())
            .unwrap_or_else(|| thread_ref.clone());
        state
            .activity
            .entry(key)
            .and_modify(|latest| *latest = (*latest).max(seen_at))
            .or_insert(seen_at);
    }

    /// Origins whose own timestamp falls in `window`, oldest first.
    pub fn list_resolved(&self, window: &TimeWindow) -> Vec<OriginRecord> {
        let state = self.read();
        let mut records: Vec<OriginRecord> = state
            .entries
            .values()
            .filter_map(|entry| match entry {
                RegistryEntry::Origin(record) if window.contains(record.timestamp) => {
                    Some(record.clone())
                }
                _ => None,
            })
            .collect();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.thread_ref.cmp(&b.thread_ref))
        });
        records
    }

    /// Origins of threads with listing activity in `window`, most recently
    /// active first.
    pub fn list_active(&self, window: &TimeWindow) -> Vec<(OriginRecord, NaiveDateTime)> {
        let state = self.read();
        let mut latest: HashMap<ThreadRef, (OriginRecord, NaiveDateTime)> = HashMap::new();
        for (thread_ref, seen_at) in &state.activity {
            if !window.contains(*seen_at) {
                continue;
            }
            let Some(record) = state.resolve(thread_ref) else {
                continue;
            };
            latest
                .entry(record.thread_ref.clone())
                .and_modify(|(_, at)| *at = (*at).max(*seen_at))
                .or_insert_with(|| (record.clone(), *seen_at));
        }
        let mut active: Vec<_> = latest.into_values().collect();
        active.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.thread_ref.cmp(&b.0.thread_ref))
        });
        active
    }

    pub fn conflicts(&self) -> Vec<RegistryConflict> {
        self.read().conflicts.clone()
    }

    /// `(origins, cross_references)`.
    pub fn counts(&self) -> (usize, usize) {
        let state = self.read();
        let origins = state
            .entries
            .values()
            .filter(|entry| matches!(entry, RegistryEntry::Origin(_)))
            .count();
        (origins, state.entries.len() - origins)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read();
        RegistrySnapshot {
            entries: state
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            activity: state.activity.iter().map(|(k, v)| (k.clone(), *v)).collect(),
            conflicts: state.conflicts.clone(),
        }
    }
}
