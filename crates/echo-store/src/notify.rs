// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change-batch notification queue.
//!
//! Mutations enqueue `(subject, kind)` pairs while a batch is open. Closing the
//! outermost batch flushes the queue in `Subject` order, invoking each
//! matching subscriber once per affected subject with the union of kinds seen
//! during the batch. No subscriber ever observes a half-applied batch.
use std::collections::BTreeMap;
use std::fmt;

use crate::collection::CollectionId;
use crate::ident::Identity;

/// Something a subscriber can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Subject {
    /// One resource record.
    Record(Identity),
    /// One record array.
    Collection(CollectionId),
}

/// What changed about a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ChangeKind {
    /// Visible attribute values.
    Attributes = 1 << 0,
    /// Relationship membership, links or meta.
    Relationships = 1 << 1,
    /// Lifecycle state.
    State = 1 << 2,
    /// Collection membership or collection metadata.
    Membership = 1 << 3,
    /// Server id assigned to a local identity.
    Identity = 1 << 4,
    /// Record unloaded or collection destroyed.
    Unloaded = 1 << 5,
}

impl ChangeKind {
    const ALL: [Self; 6] = [
        Self::Attributes,
        Self::Relationships,
        Self::State,
        Self::Membership,
        Self::Identity,
        Self::Unloaded,
    ];
}

/// Set of [`ChangeKind`]s.
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct ChangeKinds(u8);

impl ChangeKinds {
    /// The empty set.
    pub const EMPTY: Self = Self(0);

    /// Adds `kind`.
    pub fn insert(&mut self, kind: ChangeKind) {
        self.0 |= kind as u8;
    }

    /// Membership test.
    #[must_use]
    pub const fn contains(self, kind: ChangeKind) -> bool {
        self.0 & kind as u8 != 0
    }

    /// `true` when no kind is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the kinds in declaration order.
    pub fn iter(self) -> impl Iterator<Item = ChangeKind> {
        ChangeKind::ALL.into_iter().filter(move |k| self.contains(*k))
    }
}

impl From<ChangeKind> for ChangeKinds {
    fn from(kind: ChangeKind) -> Self {
        Self(kind as u8)
    }
}

impl fmt::Debug for ChangeKinds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// One flushed notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeNotice {
    /// What changed.
    pub subject: Subject,
    /// Every kind of change recorded for the subject during the batch.
    pub kinds: ChangeKinds,
}

/// Handle returned by [`ChangeBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn FnMut(&ChangeNotice)>;

struct Subscriber {
    filter: Option<Subject>,
    callback: Callback,
}

/// Batching notification queue.
#[derive(Default)]
pub struct ChangeBus {
    pending: BTreeMap<Subject, ChangeKinds>,
    depth: u32,
    next_subscription: u64,
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    retired: Vec<Subject>,
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("pending", &self.pending)
            .field("depth", &self.depth)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl ChangeBus {
    /// Creates an idle bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for `filter` (`None` observes every subject).
    pub fn subscribe<F>(&mut self, filter: Option<Subject>, callback: F) -> SubscriptionId
    where
        F: FnMut(&ChangeNotice) + 'static,
    {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.subscribers.insert(
            id,
            Subscriber {
                filter,
                callback: Box::new(callback),
            },
        );
        id
    }

    /// Removes a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Records a change. Flushes immediately when no batch is open.
    pub fn enqueue(&mut self, subject: Subject, kind: ChangeKind) {
        self.pending.entry(subject).or_default().insert(kind);
        if self.depth == 0 {
            self.flush();
        }
    }

    /// Opens a (possibly nested) batch.
    pub fn begin(&mut self) {
        self.depth += 1;
    }

    /// Closes a batch; the outermost close flushes.
    pub fn end(&mut self) {
        self.depth = self.depth.saturating_sub(1);
        if self.depth == 0 {
            self.flush();
        }
    }

    /// Drops subscriptions filtered on `subject` after the next flush, so they
    /// still see the change that retired the subject.
    pub fn retire(&mut self, subject: Subject) {
        self.retired.push(subject);
        if self.depth == 0 {
            self.flush();
        }
    }

    /// Removes every subscription.
    pub fn clear_subscribers(&mut self) {
        self.subscribers.clear();
    }

    fn flush(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        for (subject, kinds) in pending {
            let notice = ChangeNotice { subject, kinds };
            for sub in self.subscribers.values_mut() {
                if sub.filter.is_none_or(|f| f == subject) {
                    (sub.callback)(&notice);
                }
            }
        }
        if !self.retired.is_empty() {
            let retired = std::mem::take(&mut self.retired);
            self.subscribers
                .retain(|_, s| s.filter.is_none_or(|f| !retired.contains(&f)));
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record(n: u64) -> Subject {
        Subject::Record(Identity::from_raw(n))
    }

    fn recorder(bus: &mut ChangeBus, filter: Option<Subject>) -> Rc<RefCell<Vec<ChangeNotice>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        bus.subscribe(filter, move |n| sink.borrow_mut().push(*n));
        log
    }

    #[test]
    fn batch_coalesces_per_subject() {
        let mut bus = ChangeBus::new();
        let log = recorder(&mut bus, None);
        bus.begin();
        bus.enqueue(record(2), ChangeKind::Attributes);
        bus.enqueue(record(1), ChangeKind::State);
        bus.begin();
        bus.enqueue(record(2), ChangeKind::Relationships);
        bus.end();
        assert!(log.borrow().is_empty(), "inner end must not flush");
        bus.end();
        let log = log.borrow();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].subject, record(1));
        assert!(log[1].kinds.contains(ChangeKind::Attributes));
        assert!(log[1].kinds.contains(ChangeKind::Relationships));
        assert!(!log[1].kinds.contains(ChangeKind::State));
    }

    #[test]
    fn filters_and_retirement() {
        let mut bus = ChangeBus::new();
        let only_one = recorder(&mut bus, Some(record(1)));
        bus.enqueue(record(2), ChangeKind::Attributes);
        assert!(only_one.borrow().is_empty());
        bus.begin();
        bus.enqueue(record(1), ChangeKind::Unloaded);
        bus.retire(record(1));
        bus.end();
        assert_eq!(only_one.borrow().len(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let mut bus = ChangeBus::new();
        let log = Rc::new(RefCell::new(0_u32));
        let sink = Rc::clone(&log);
        let id = bus.subscribe(None, move |_| *sink.borrow_mut() += 1);
        bus.enqueue(record(1), ChangeKind::State);
        assert!(bus.unsubscribe(id));
        bus.enqueue(record(1), ChangeKind::State);
        assert_eq!(*log.borrow(), 1);
    }
}
