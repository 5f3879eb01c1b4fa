//! In-flight I/O request
//!
//! A request is shared between the submitter, every outstanding
//! sub-operation and the registry. Each of them holds a [`RequestRef`];
//! the count of live `RequestRef`s is the `ref_count` shown in the
//! listing. When it drops to zero the request is released (stats and
//! trace hooks fire). The memory behind it stays valid until the last
//! registry reader that could still see it lets go.
//!
//! # Lifecycle
//!
//! ```text
//! Created --register--> Registered --last sub_op_complete--> Completing
//!    |                      |                                    |
//!    |                      +----------- retire / cancel --------+--> Retired
//!    +--last sub_op_complete--> Completing
//! ```
//!
//! All fields that change after creation are atomics, so sub-operation
//! completions never need the registry lock.

use std::fmt;
use std::ops::{BitOr, BitOrAssign, Deref};
use std::sync::atomic::{fence, AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::config::{DEBUG_LIFECYCLE, DEBUG_REFS};
use crate::error::NetfsError;
use crate::idgen::DebugId;
use crate::origin::IoOrigin;
use crate::stats::StatsSink;
use crate::trace::{trace_ref, trace_request, RefTrace, RequestTrace};

// ============================================================================
// Flags
// ============================================================================

/// Request flag bits, shown raw in the listing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct RequestFlags(u64);

impl RequestFlags {
    pub const CANCELLED: Self = Self(1 << 0);
    pub const FAILED: Self = Self(1 << 1);
    pub const IN_REGISTRY: Self = Self(1 << 2);
    pub const COMPLETE: Self = Self(1 << 3);

    /// First bit available to the I/O layer for its own markers
    pub const FIRST_USER_BIT: u32 = 8;

    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// Flag for one of the I/O layer's own bits, `None` past bit 63
    #[must_use]
    pub const fn user(bit: u32) -> Option<Self> {
        if bit >= u64::BITS - Self::FIRST_USER_BIT {
            return None;
        }
        Some(Self(1 << (Self::FIRST_USER_BIT + bit)))
    }

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for RequestFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for RequestFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RequestState {
    Created = 0,
    Registered = 1,
    Completing = 2,
    Retired = 3,
}

impl RequestState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Registered,
            2 => Self::Completing,
            _ => Self::Retired,
        }
    }
}

// ============================================================================
// Request
// ============================================================================

/// One in-flight I/O operation
pub struct IoRequest {
    debug_id: DebugId,
    origin: IoOrigin,
    start: u64,
    len: u64,
    ref_count: AtomicU32,
    flags: AtomicU64,
    error: AtomicI32,
    nr_outstanding: AtomicU32,
    submitted: AtomicU64,
    state: AtomicU8,
    freed: AtomicBool,
    stats: Arc<dyn StatsSink>,
    debug_mask: u32,
}

impl IoRequest {
    #[must_use]
    pub fn debug_id(&self) -> DebugId {
        self.debug_id
    }

    #[must_use]
    pub fn origin(&self) -> IoOrigin {
        self.origin
    }

    #[must_use]
    pub fn start(&self) -> u64 {
        self.start
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn ref_count(&self) -> u32 {
        self.ref_count.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn flags(&self) -> RequestFlags {
        RequestFlags(self.flags.load(Ordering::Acquire))
    }

    #[must_use]
    pub fn test_flags(&self, flags: RequestFlags) -> bool {
        self.flags().contains(flags)
    }

    pub fn set_flags(&self, flags: RequestFlags) {
        self.flags.fetch_or(flags.0, Ordering::AcqRel);
    }

    pub fn clear_flags(&self, flags: RequestFlags) {
        self.flags.fetch_and(!flags.0, Ordering::AcqRel);
    }

    /// Sticky error, zero when none was recorded
    #[must_use]
    pub fn error(&self) -> i32 {
        self.error.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn nr_outstanding(&self) -> u32 {
        self.nr_outstanding.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn state(&self) -> RequestState {
        RequestState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Whether the release hook has run (`ref_count` reached zero)
    #[must_use]
    pub fn is_freed(&self) -> bool {
        self.freed.load(Ordering::Acquire)
    }

    /// Record a sub-operation failure.
    ///
    /// The first non-zero code wins; later codes are only logged. Returns
    /// the code now stored in the request.
    pub fn mark_error(&self, code: i32) -> i32 {
        if code == 0 {
            return self.error();
        }
        match self
            .error
            .compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.set_flags(RequestFlags::FAILED);
                self.stats.request_failed(self.origin);
                if self.debug_mask & DEBUG_LIFECYCLE != 0 {
                    log::debug!("R={} error {code}", self.debug_id);
                }
                code
            }
            Err(kept) => {
                if kept != code {
                    log::debug!(
                        "R={} error {code} ignored, keeping first error {kept}",
                        self.debug_id
                    );
                }
                kept
            }
        }
    }

    /// Account a new sub-operation covering `bytes` of the request.
    ///
    /// Returns `false` without changing anything if the bytes would go past
    /// `len`, the request is retired, or completion has already fired.
    #[must_use]
    pub fn begin_sub_op(&self, bytes: u64) -> bool {
        if self.state() == RequestState::Retired {
            return false;
        }
        let len = self.len;
        if self
            .submitted
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |submitted| {
                submitted.checked_add(bytes).filter(|&s| s <= len)
            })
            .is_err()
        {
            return false;
        }
        let started = self
            .nr_outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                if n == 0 {
                    None
                } else {
                    n.checked_add(1)
                }
            })
            .is_ok();
        if !started {
            self.submitted.fetch_sub(bytes, Ordering::AcqRel);
        }
        started
    }

    /// Retire one outstanding sub-operation.
    ///
    /// Returns `true` for exactly one caller: the one that took the count
    /// to zero. That caller owns the completion path. A call with nothing
    /// outstanding is refused and logged.
    #[must_use]
    pub fn sub_op_complete(&self) -> bool {
        let Ok(prev) = self
            .nr_outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
        else {
            log::warn!("R={} sub_op_complete with nothing outstanding", self.debug_id);
            return false;
        };
        if prev != 1 {
            return false;
        }

        // Cancellation may already have retired the request; the state then stays put
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                match RequestState::from_u8(s) {
                    RequestState::Created | RequestState::Registered => {
                        Some(RequestState::Completing as u8)
                    }
                    RequestState::Completing | RequestState::Retired => None,
                }
            });
        self.set_flags(RequestFlags::COMPLETE);
        self.stats.request_completed(self.origin);
        trace_request(self.debug_id, self.origin, RequestTrace::Completing);
        true
    }

    /// Created -> Registered. A request is registered at most once.
    pub(crate) fn mark_registered(&self) -> Result<(), NetfsError> {
        self.state
            .compare_exchange(
                RequestState::Created as u8,
                RequestState::Registered as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
            .map_err(|s| match RequestState::from_u8(s) {
                RequestState::Registered => NetfsError::AlreadyRegistered(self.debug_id),
                _ => NetfsError::AlreadyRetired(self.debug_id),
            })
    }

    /// Registered or Completing -> Retired. Only one caller ever succeeds;
    /// it gets the state it moved the request out of.
    pub(crate) fn mark_retired(&self) -> Result<RequestState, NetfsError> {
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| {
                match RequestState::from_u8(s) {
                    RequestState::Registered | RequestState::Completing => {
                        Some(RequestState::Retired as u8)
                    }
                    RequestState::Created | RequestState::Retired => None,
                }
            })
            .map(RequestState::from_u8)
            .map_err(|s| match RequestState::from_u8(s) {
                RequestState::Created => NetfsError::NotRegistered(self.debug_id),
                _ => NetfsError::AlreadyRetired(self.debug_id),
            })
    }

    /// Forced-retirement outcome: `CANCELLED`, and `error` if still clear.
    ///
    /// Unlike [`IoRequest::mark_error`] this is not a sub-operation
    /// failure, so neither `FAILED` nor the failure counter move.
    pub(crate) fn mark_cancelled(&self, code: i32) {
        self.set_flags(RequestFlags::CANCELLED);
        let _ = self
            .error
            .compare_exchange(0, code, Ordering::AcqRel, Ordering::Acquire);
        self.stats.request_cancelled(self.origin);
        if self.debug_mask & DEBUG_LIFECYCLE != 0 {
            log::debug!("R={} cancelled, error {}", self.debug_id, self.error());
        }
    }

    /// Plain-value copy of what the listing shows
    #[must_use]
    pub fn view(&self) -> RequestView {
        RequestView {
            debug_id: self.debug_id,
            origin: self.origin,
            ref_count: self.ref_count(),
            flags: self.flags(),
            error: self.error(),
            nr_outstanding: self.nr_outstanding(),
            start: self.start,
            submitted: self.submitted(),
            len: self.len,
        }
    }

    fn free(&self) {
        if self.freed.swap(true, Ordering::AcqRel) {
            log::warn!("R={} released twice", self.debug_id);
            return;
        }
        self.stats.request_freed();
        trace_request(self.debug_id, self.origin, RequestTrace::Free);
        if self.debug_mask & DEBUG_LIFECYCLE != 0 {
            log::debug!("R={} free", self.debug_id);
        }
    }
}

impl fmt::Debug for IoRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "IoRequest(R={}, origin={}, state={:?}, ref={}, flags={:#x}, error={}, ops={}, {}/{}@{:#x})",
            self.debug_id,
            self.origin,
            self.state(),
            self.ref_count(),
            self.flags().bits(),
            self.error(),
            self.nr_outstanding(),
            self.submitted(),
            self.len,
            self.start,
        )
    }
}

/// Snapshot of a request's listing columns, taken with atomic loads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestView {
    pub debug_id: DebugId,
    pub origin: IoOrigin,
    pub ref_count: u32,
    pub flags: RequestFlags,
    pub error: i32,
    pub nr_outstanding: u32,
    pub start: u64,
    pub submitted: u64,
    pub len: u64,
}

// ============================================================================
// Reference handle
// ============================================================================

/// One counted reference to a request
///
/// Cloning takes a reference, dropping puts it. Use [`RequestRef::get`] and
/// [`RequestRef::put`] to record why.
pub struct RequestRef {
    req: Arc<IoRequest>,
    put_reason: RefTrace,
}

impl RequestRef {
    /// Allocate a request holding a single reference
    pub(crate) fn new(
        debug_id: DebugId,
        origin: IoOrigin,
        start: u64,
        len: u64,
        stats: Arc<dyn StatsSink>,
        debug_mask: u32,
    ) -> Self {
        let req = Arc::new(IoRequest {
            debug_id,
            origin,
            start,
            len,
            ref_count: AtomicU32::new(1),
            flags: AtomicU64::new(0),
            error: AtomicI32::new(0),
            nr_outstanding: AtomicU32::new(1),
            submitted: AtomicU64::new(0),
            state: AtomicU8::new(RequestState::Created as u8),
            freed: AtomicBool::new(false),
            stats,
            debug_mask,
        });
        req.stats.request_created(origin);
        trace_request(debug_id, origin, RequestTrace::New);
        trace_ref(debug_id, 1, RefTrace::New);
        Self {
            req,
            put_reason: RefTrace::Put,
        }
    }

    /// Take another reference
    #[must_use]
    pub fn get(&self, why: RefTrace) -> Self {
        let refs = self.req.ref_count.fetch_add(1, Ordering::Relaxed) + 1;
        trace_ref(self.req.debug_id, refs, why);
        if self.req.debug_mask & DEBUG_REFS != 0 {
            log::debug!("R={} get {} r={refs}", self.req.debug_id, why.name());
        }
        Self {
            req: Arc::clone(&self.req),
            put_reason: RefTrace::Put,
        }
    }

    /// Drop this reference, recording why
    pub fn put(mut self, why: RefTrace) {
        self.put_reason = why;
    }

    /// The shared request behind the reference (for registry readers)
    pub(crate) fn shared(&self) -> Arc<IoRequest> {
        Arc::clone(&self.req)
    }

    #[must_use]
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.req, &b.req)
    }
}

impl Clone for RequestRef {
    fn clone(&self) -> Self {
        self.get(RefTrace::Get)
    }
}

impl Deref for RequestRef {
    type Target = IoRequest;

    fn deref(&self) -> &IoRequest {
        &self.req
    }
}

impl Drop for RequestRef {
    fn drop(&mut self) {
        let prev = self.req.ref_count.fetch_sub(1, Ordering::Release);
        trace_ref(self.req.debug_id, prev - 1, self.put_reason);
        if self.req.debug_mask & DEBUG_REFS != 0 {
            log::debug!(
                "R={} put {} r={}",
                self.req.debug_id,
                self.put_reason.name(),
                prev - 1
            );
        }
        if prev == 1 {
            fence(Ordering::Acquire);
            self.req.free();
        }
    }
}

impl fmt::Debug for RequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.req, f)
    }
}
