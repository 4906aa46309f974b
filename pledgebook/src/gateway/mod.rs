// Remote store contract, change events, and subscription fan-out

pub mod memory;
pub mod sqlite;

pub use memory::MemoryGateway;
pub use sqlite::SqliteGateway;

use crate::error::{PledgeError, Result};
use crate::member::MemberId;
use crate::wire::MemberRecord;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Handle returned by [`Gateway::subscribe`], used to unsubscribe.
pub type SubscriptionId = u64;

/// The remote member collection.
///
/// Implementations are passed into the [`Store`](crate::Store) explicitly so
/// tests and offline mode can swap in a different backend.
pub trait Gateway: Send + Sync {
    /// Read the whole collection.
    fn fetch_all(&self) -> Result<Vec<MemberRecord>>;

    /// Insert or replace records by id. A single record is a one-element batch.
    fn upsert(&self, records: &[MemberRecord]) -> Result<()>;

    /// Merge the non-null keys of a JSON object into one stored record.
    fn update_fields(&self, id: MemberId, fields: &serde_json::Value) -> Result<()>;

    /// Remove a record. Deleting an absent id is not an error.
    fn delete(&self, id: MemberId) -> Result<()>;

    /// Start receiving change events for every successful write.
    fn subscribe(&self) -> Result<Subscription>;

    /// Stop delivering events to a subscription.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// Key/value settings stored next to the collection (e.g. the access code).
pub trait ConfigSource {
    fn config_value(&self, key: &str) -> Result<Option<String>>;
}

impl<G: Gateway + ?Sized> Gateway for Arc<G> {
    fn fetch_all(&self) -> Result<Vec<MemberRecord>> {
        (**self).fetch_all()
    }

    fn upsert(&self, records: &[MemberRecord]) -> Result<()> {
        (**self).upsert(records)
    }

    fn update_fields(&self, id: MemberId, fields: &serde_json::Value) -> Result<()> {
        (**self).update_fields(id, fields)
    }

    fn delete(&self, id: MemberId) -> Result<()> {
        (**self).delete(id)
    }

    fn subscribe(&self) -> Result<Subscription> {
        (**self).subscribe()
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        (**self).unsubscribe(id)
    }
}

impl<C: ConfigSource + ?Sized> ConfigSource for Arc<C> {
    fn config_value(&self, key: &str) -> Result<Option<String>> {
        (**self).config_value(key)
    }
}

/// The kind of change reported by the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// A change notification for one member record.
/// Deletes carry only the id, as the row no longer exists.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Insert(MemberRecord),
    Update(MemberRecord),
    Delete { id: MemberId },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Insert(_) => ChangeKind::Insert,
            ChangeEvent::Update(_) => ChangeKind::Update,
            ChangeEvent::Delete { .. } => ChangeKind::Delete,
        }
    }

    pub fn id(&self) -> MemberId {
        match self {
            ChangeEvent::Insert(r) | ChangeEvent::Update(r) => r.id,
            ChangeEvent::Delete { id } => *id,
        }
    }
}

/// A live subscription. Events queue on `event_rx` in delivery order
/// until the store drains them.
pub struct Subscription {
    pub id: SubscriptionId,
    pub event_rx: mpsc::Receiver<ChangeEvent>,
}

type Senders = Vec<(SubscriptionId, mpsc::Sender<ChangeEvent>)>;

/// Fan-out of change events to every live subscriber.
#[derive(Default)]
pub struct Subscribers {
    next_id: AtomicU64,
    senders: Mutex<Senders>,
}

impl Subscribers {
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::channel();
        self.lock().push((id, tx));
        log::debug!("Subscription {id} opened");
        Subscription { id, event_rx: rx }
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().retain(|(sid, _)| *sid != id);
        log::debug!("Subscription {id} closed");
    }

    /// Deliver events to all subscribers, dropping those whose receiver is gone.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }
        let mut senders = self.lock();
        senders.retain(|(_, tx)| events.iter().all(|e| tx.send(e.clone()).is_ok()));
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Senders> {
        self.senders.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Apply a partial update to a record: every non-null key in `fields`
/// overwrites the stored value, and the result must still be a valid record.
pub(crate) fn apply_patch(
    record: &MemberRecord,
    fields: &serde_json::Value,
) -> Result<MemberRecord> {
    let patch = fields.as_object().ok_or_else(|| {
        PledgeError::Validation("Partial update must be a JSON object".into())
    })?;

    let mut merged = serde_json::to_value(record)?;
    if let Some(base) = merged.as_object_mut() {
        for (key, value) in patch {
            if key == "id" {
                return Err(PledgeError::Validation(
                    "Partial update cannot change the member id".into(),
                ));
            }
            if !value.is_null() {
                base.insert(key.clone(), value.clone());
            }
        }
    }

    crate::wire::record_from_json(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::Frequency;
    use pretty_assertions::assert_eq;

    fn record(id: MemberId) -> MemberRecord {
        MemberRecord {
            id,
            name: format!("Member {id}"),
            phone: None,
            email: None,
            committed_amount: 100.0,
            frequency: Frequency::Yearly,
            payments: Some(vec![]),
            notes: None,
        }
    }

    #[test]
    fn test_publish_reaches_all_subscribers() {
        let subs = Subscribers::default();
        let a = subs.subscribe();
        let b = subs.subscribe();
        assert_ne!(a.id, b.id);

        subs.publish(vec![ChangeEvent::Delete { id: 4 }]);
        assert_eq!(a.event_rx.try_recv().unwrap(), ChangeEvent::Delete { id: 4 });
        assert_eq!(b.event_rx.try_recv().unwrap(), ChangeEvent::Delete { id: 4 });
    }

    #[test]
    fn test_unsubscribe_and_prune() {
        let subs = Subscribers::default();
        let a = subs.subscribe();
        let b = subs.subscribe();

        subs.unsubscribe(a.id);
        drop(b);
        subs.publish(vec![ChangeEvent::Insert(record(1))]);

        assert!(subs.is_empty());
        assert!(a.event_rx.try_recv().is_err());
    }

    #[test]
    fn test_apply_patch_merges_non_null() {
        let base = record(2);
        let patched = apply_patch(
            &base,
            &serde_json::json!({ "notes": "updated", "phone": null }),
        )
        .unwrap();
        assert_eq!(patched.notes.as_deref(), Some("updated"));
        assert_eq!(patched.name, base.name);
    }

    #[test]
    fn test_apply_patch_rejects_id_and_bad_shapes() {
        let base = record(2);
        assert!(apply_patch(&base, &serde_json::json!({ "id": 9 })).is_err());
        assert!(apply_patch(&base, &serde_json::json!([1, 2])).is_err());
        assert!(apply_patch(&base, &serde_json::json!({ "frequency": "Weekly" })).is_err());
    }

    #[test]
    fn test_event_accessors() {
        assert_eq!(ChangeEvent::Insert(record(3)).kind(), ChangeKind::Insert);
        assert_eq!(ChangeEvent::Update(record(3)).id(), 3);
        assert_eq!(ChangeEvent::Delete { id: 8 }.id(), 8);
    }
}
