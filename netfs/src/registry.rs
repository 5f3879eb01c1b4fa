//! Registry of in-flight requests
//!
//! Writers (insert/remove) serialize on one `parking_lot::Mutex`. Readers
//! never touch that mutex: every mutation republishes an immutable,
//! id-ordered list of the members through an `ArcSwap`, and a reader pins
//! whichever list is current.
//!
//! ```text
//!   insert / remove                       listing readers
//!         |                                      |
//!         v                                      v
//! ┌──────────────────────┐  publish   ┌─────────────────────────┐
//! │ members (Mutex)      │ ─────────> │ published (ArcSwap)     │
//! │ BTreeMap<id, RequestRef>          │ Arc<Vec<Arc<IoRequest>>>│
//! │ one ref per member   │            │ pinned per step         │
//! └──────────────────────┘            └─────────────────────────┘
//! ```
//!
//! A pinned list keeps every request in it allocated, so a reader that
//! raced with `remove` still sees a complete request, never a freed one.
//! The registry's counted reference (`ref_count`) is dropped at removal;
//! the allocation goes away once the last pinned list containing it is
//! released.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::NetfsError;
use crate::idgen::DebugId;
use crate::request::{IoRequest, RequestFlags, RequestRef, RequestView};
use crate::trace::{trace_request, RefTrace, RequestTrace};

type Published = Vec<Arc<IoRequest>>;

/// Process-wide set of active requests, ordered by debug id
pub struct Registry {
    members: Mutex<BTreeMap<DebugId, RequestRef>>,
    published: ArcSwap<Published>,
    /// Only changed under the `members` lock
    closed: AtomicBool,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            members: Mutex::new(BTreeMap::new()),
            published: ArcSwap::from_pointee(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Add a newly created request. The registry takes its own reference.
    ///
    /// # Errors
    ///
    /// `AlreadyRegistered` if the request (or its id) is already a member,
    /// `AlreadyRetired` if it went past the registered state, `ShutDown`
    /// once the registry is closed.
    pub fn insert(&self, req: &RequestRef) -> Result<(), NetfsError> {
        let mut members = self.members.lock();
        if self.closed.load(Ordering::Acquire) {
            log::debug!("registry.insert: R={} after close", req.debug_id());
            return Err(NetfsError::ShutDown);
        }
        if members.contains_key(&req.debug_id()) {
            log::warn!("registry.insert: R={} already registered", req.debug_id());
            return Err(NetfsError::AlreadyRegistered(req.debug_id()));
        }
        req.mark_registered()?;
        req.set_flags(RequestFlags::IN_REGISTRY);
        members.insert(req.debug_id(), req.get(RefTrace::GetRegistry));
        self.publish(&members);
        drop(members);

        trace_request(req.debug_id(), req.origin(), RequestTrace::Registered);
        Ok(())
    }

    /// Unlink a request and hand back the registry's reference.
    ///
    /// Returns `None` if the request is not a member. The caller drops the
    /// returned reference; doing that outside the writer lock keeps the
    /// release hook out of the critical section.
    pub fn remove(&self, req: &IoRequest) -> Option<RequestRef> {
        let mut members = self.members.lock();
        let membership = members.remove(&req.debug_id())?;
        if !std::ptr::eq(&*membership, req) {
            log::warn!(
                "registry.remove: R={} belongs to a different request",
                req.debug_id()
            );
            members.insert(req.debug_id(), membership);
            return None;
        }
        req.clear_flags(RequestFlags::IN_REGISTRY);
        self.publish(&members);
        drop(members);
        Some(membership)
    }

    /// Rebuild the reader-side list. Caller holds the writer lock.
    fn publish(&self, members: &BTreeMap<DebugId, RequestRef>) {
        let list: Published = members.values().map(RequestRef::shared).collect();
        self.published.store(Arc::new(list));
    }

    /// Number of members as seen by readers
    #[must_use]
    pub fn len(&self) -> usize {
        self.published.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.published.load().is_empty()
    }

    #[must_use]
    pub fn contains(&self, debug_id: DebugId) -> bool {
        self.published
            .load()
            .binary_search_by_key(&debug_id, |r| r.debug_id())
            .is_ok()
    }

    /// Run `f` on the first member with an id greater than `after`
    /// (or the first member when `after` is `None`).
    ///
    /// The list is pinned only for the duration of `f`.
    pub fn with_entry_after<R>(
        &self,
        after: Option<DebugId>,
        f: impl FnOnce(&IoRequest) -> R,
    ) -> Option<R> {
        let pinned = self.published.load();
        let idx = match after {
            None => 0,
            Some(after) => pinned.partition_point(|r| r.debug_id() <= after),
        };
        pinned.get(idx).map(|req| f(req.as_ref()))
    }

    /// Lazy walk over the members in id order
    #[must_use]
    pub fn walk(&self) -> RegistryWalk<'_> {
        self.walk_from(None)
    }

    /// Resume a walk strictly after `after`
    #[must_use]
    pub fn walk_from(&self, after: Option<DebugId>) -> RegistryWalk<'_> {
        RegistryWalk {
            registry: self,
            last: after,
        }
    }

    /// Refuse further inserts and return counted references to whatever
    /// is still a member. Returns `None` if already closed.
    ///
    /// Inserts serialize with this on the writer lock, so every request
    /// that made it in is in the returned list.
    pub(crate) fn close(&self) -> Option<Vec<RequestRef>> {
        let members = self.members.lock();
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(members.values().map(|r| r.get(RefTrace::Get)).collect())
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Iterator over registry members, see [`Registry::walk`]
///
/// Each step pins the current list afresh, so members added or removed
/// during the walk may or may not show up. Every yielded view was read
/// from a request that was still allocated.
pub struct RegistryWalk<'a> {
    registry: &'a Registry,
    last: Option<DebugId>,
}

impl RegistryWalk<'_> {
    /// Id of the last yielded member, usable with [`Registry::walk_from`]
    #[must_use]
    pub fn position(&self) -> Option<DebugId> {
        self.last
    }
}

impl Iterator for RegistryWalk<'_> {
    type Item = RequestView;

    fn next(&mut self) -> Option<RequestView> {
        let view = self.registry.with_entry_after(self.last, IoRequest::view)?;
        self.last = Some(view.debug_id);
        Some(view)
    }
}
