// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Subscriber that records change notices.

use std::cell::RefCell;
use std::rc::Rc;

use echo_store::{ChangeKind, ChangeNotice, Store, Subject, SubscriptionId};

/// Records every notice delivered to one subscription.
#[derive(Clone)]
pub struct NoticeLog {
    id: SubscriptionId,
    seen: Rc<RefCell<Vec<ChangeNotice>>>,
}

impl NoticeLog {
    /// Subscribe to `filter` (`None`: every subject) on `store`.
    pub fn attach(store: &mut Store, filter: Option<Subject>) -> Self {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let id = store.subscribe(filter, move |n| sink.borrow_mut().push(*n));
        Self { id, seen }
    }

    /// Subscription id, for unsubscribing.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Every notice seen so far.
    pub fn notices(&self) -> Vec<ChangeNotice> {
        self.seen.borrow().clone()
    }

    /// Drains the log.
    pub fn take(&self) -> Vec<ChangeNotice> {
        std::mem::take(&mut *self.seen.borrow_mut())
    }

    /// Number of notices seen.
    pub fn len(&self) -> usize {
        self.seen.borrow().len()
    }

    /// `true` when nothing was seen.
    pub fn is_empty(&self) -> bool {
        self.seen.borrow().is_empty()
    }

    /// Notices for one subject.
    pub fn for_subject(&self, subject: Subject) -> Vec<ChangeNotice> {
        self.seen
            .borrow()
            .iter()
            .filter(|n| n.subject == subject)
            .copied()
            .collect()
    }

    /// `true` if any notice for `subject` carried `kind`.
    pub fn saw(&self, subject: Subject, kind: ChangeKind) -> bool {
        self.seen
            .borrow()
            .iter()
            .any(|n| n.subject == subject && n.kinds.contains(kind))
    }
}
