//! Session-wide set of message ids already attributed to a resolved thread.
//!
//! Each id maps to the thread it was first attributed to. Entries are never
//! removed except by an explicit `clear`, and an id's owner never changes.
//! Every mutation happens under one lock, so each absent→present transition
//! has exactly one winner.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use threadmark_common::{MessageId, ThreadRef};

/// Outcome of claiming a whole expanded thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadClaim {
    /// Aligned with the claimed ids: the owner an id already had, `None`
    /// where this claim inserted it.
    pub prior: Vec<Option<ThreadRef>>,
    /// Thread the origin id is attributed to after the claim. Equals the
    /// proposed owner when the origin id was new.
    pub origin_owner: ThreadRef,
}

impl ThreadClaim {
    pub fn origin_was_new(&self) -> bool {
        matches!(self.prior.first(), Some(None))
    }

    /// `true` where the id was already known.
    pub fn known(&self) -> Vec<bool> {
        self.prior.iter().map(Option::is_some).collect()
    }
}

#[derive(Default)]
pub struct Ledger {
    owners: Mutex<HashMap<MessageId, ThreadRef>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(snapshot: BTreeMap<MessageId, ThreadRef>) -> Self {
        Self {
            owners: Mutex::new(snapshot.into_iter().collect()),
        }
    }

    fn owners(&self) -> MutexGuard<'_, HashMap<MessageId, ThreadRef>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `id` for `owner` if absent and return `false`; return `true`
    /// without mutating if it was already known.
    pub fn test_and_insert(&self, id: &MessageId, owner: &ThreadRef) -> bool {
        self.try_claim(id, owner).is_some()
    }

    /// Same as `test_and_insert`, but hands back the existing owner.
    pub fn try_claim(&self, id: &MessageId, owner: &ThreadRef) -> Option<ThreadRef> {
        let mut owners = self.owners();
        if let Some(existing) = owners.get(id) {
            return Some(existing.clone());
        }
        owners.insert(id.clone(), owner.clone());
        None
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.owners().contains_key(id)
    }

    pub fn owner_of(&self, id: &MessageId) -> Option<ThreadRef> {
        self.owners().get(id).cloned()
    }

    /// Claim every id for `owner` in one step. The result is aligned with
    /// `ids`: `true` where the id was already known (including repeats
    /// within `ids`).
    pub fn bulk_claim(&self, ids: &[MessageId], owner: &ThreadRef) -> Vec<bool> {
        let mut owners = self.owners();
        claim_all(&mut owners, ids, owner)
            .iter()
            .map(Option::is_some)
            .collect()
    }

    /// Claim an expanded thread whose origin is `ids[0]`.
    ///
    /// New ids are attributed to whichever thread owns the origin after the
    /// claim: `proposed` if the origin was new, its existing owner otherwise.
    pub fn claim_thread(&self, ids: &[MessageId], proposed: &ThreadRef) -> ThreadClaim {
        let mut owners = self.owners();
        let origin_owner = ids
            .first()
            .and_then(|origin| owners.get(origin).cloned())
            .unwrap_or_else(|| proposed.clone());
        let prior = claim_all(&mut owners, ids, &origin_owner);
        ThreadClaim {
            prior,
            origin_owner,
        }
    }

    pub fn len(&self) -> usize {
        self.owners().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<MessageId, ThreadRef> {
        self.owners()
            .iter()
            .map(|(id, owner)| (id.clone(), owner.clone()))
            .collect()
    }

    /// Explicit session reset.
    pub fn clear(&self) {
        self.owners().clear();
    }
}

fn claim_all(
    owners: &mut HashMap<MessageId, ThreadRef>,
    ids: &[MessageId],
    owner: &ThreadRef,
) -> Vec<Option<ThreadRef>> {
    ids.iter()
        .map(|id| match owners.get(id) {
            Some(existing) => Some(existing.clone()),
            None => {
                owners.insert(id.clone(), owner.clone());
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use super::*;

    fn ids(raw: &[&str]) -> Vec<MessageId> {
        raw.iter().map(|s| MessageId::new(*s)).collect()
    }

    #[test]
    fn test_and_insert_reports_was_known() {
        let ledger = Ledger::new();
        let t1 = ThreadRef::new("t1");
        assert!(!ledger.test_and_insert(&MessageId::new("m1"), &t1));
        assert!(ledger.test_and_insert(&MessageId::new("m1"), &ThreadRef::new("t2")));
        // the loser does not steal ownership
        assert_eq!(ledger.owner_of(&MessageId::new("m1")), Some(t1.clone()));
        assert_eq!(
            ledger.try_claim(&MessageId::new("m1"), &ThreadRef::new("t3")),
            Some(t1)
        );
    }

    #[test]
    fn bulk_claim_is_aligned_with_input() {
        let ledger = Ledger::new();
        ledger.test_and_insert(&MessageId::new("m2"), &ThreadRef::new("t0"));

        let claimed = ledger.bulk_claim(&ids(&["m1", "m2", "m3", "m1"]), &ThreadRef::new("t1"));
        assert_eq!(claimed, vec![false, true, false, true]);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.owner_of(&MessageId::new("m3")), Some(ThreadRef::new("t1")));
        assert_eq!(ledger.owner_of(&MessageId::new("m2")), Some(ThreadRef::new("t0")));
    }

    #[test]
    fn claim_thread_inherits_owner_of_known_origin() {
        let ledger = Ledger::new();
        let t1 = ThreadRef::new("m1");
        ledger.test_and_insert(&MessageId::new("m1"), &t1);

        let claim = ledger.claim_thread(&ids(&["m1", "m2", "m3"]), &ThreadRef::new("m2"));
        assert!(!claim.origin_was_new());
        assert_eq!(claim.origin_owner, t1);
        assert_eq!(claim.known(), vec![true, false, false]);
        assert_eq!(claim.prior[0], Some(t1.clone()));
        assert_eq!(ledger.owner_of(&MessageId::new("m3")), Some(t1));
    }

    #[test]
    fn snapshot_restores_ownership() {
        let ledger = Ledger::new();
        ledger.bulk_claim(&ids(&["a", "b"]), &ThreadRef::new("a"));
        let restored = Ledger::restore(ledger.snapshot());
        assert!(restored.contains(&MessageId::new("b")));
        assert_eq!(restored.owner_of(&MessageId::new("a")), Some(ThreadRef::new("a")));

        restored.clear();
        assert!(restored.is_empty());
    }

    #[test]
    fn exactly_one_racer_wins_each_id() {
        let ledger = Arc::new(Ledger::new());
        let racers = 8;
        let barrier = Arc::new(Barrier::new(racers));

        let handles: Vec<_> = (0..racers)
            .map(|i| {
                let ledger = ledger.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    let owner = ThreadRef::new(format!("t{i}"));
                    barrier.wait();
                    (0..200)
                        .filter(|n| {
                            !ledger.test_and_insert(&MessageId::new(format!("m{n}")), &owner)
                        })
                        .count()
                })
            })
            .collect();

        let wins: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(wins, 200);
        assert_eq!(ledger.len(), 200);
    }
}
