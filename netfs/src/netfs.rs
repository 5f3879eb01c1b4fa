//! Netfs context - the submission interface over the registry
//!
//! One `Netfs` is created by the hosting process with [`Netfs::init`] and
//! handed (as `Arc<Netfs>`) to whatever issues I/O and whatever lists it.
//! [`Netfs::shutdown`] is the matching teardown.
//!
//! Typical request flow on the I/O side:
//!
//! ```
//! use netfs::{IoOrigin, Netfs, NetfsConfig};
//!
//! let netfs = Netfs::init(NetfsConfig::default()).unwrap();
//! let rreq = netfs.create(IoOrigin::ReadAhead, 0, 0x2000).unwrap();
//! netfs.register(&rreq).unwrap();
//!
//! // Issue two sub-operations, then drop the issuer's hold
//! assert!(netfs.begin_sub_op(&rreq, 0x1000));
//! assert!(netfs.begin_sub_op(&rreq, 0x1000));
//! assert!(!netfs.sub_op_complete(&rreq));
//!
//! // Sub-operation completions, possibly on other threads
//! assert!(!netfs.sub_op_complete(&rreq));
//! if netfs.sub_op_complete(&rreq) {
//!     netfs.retire(&rreq).unwrap();
//! }
//! assert!(netfs.requests_report().to_text().lines().count() == 2);
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::{NetfsConfig, DEBUG_LIFECYCLE};
use crate::error::{NetfsError, ECANCELED};
use crate::idgen::IdGen;
use crate::origin::IoOrigin;
use crate::registry::Registry;
use crate::reporter::RequestsReport;
use crate::request::{RequestRef, RequestState};
use crate::stats::{NetfsStats, StatsSink};
use crate::trace::{trace_request, RefTrace, RequestTrace};

/// Forwards to the configured sink and counts live requests for
/// `max_requests`
struct Accounting {
    inner: Arc<dyn StatsSink>,
    live: AtomicUsize,
}

impl StatsSink for Accounting {
    fn request_created(&self, origin: IoOrigin) {
        self.inner.request_created(origin);
    }

    fn request_completed(&self, origin: IoOrigin) {
        self.inner.request_completed(origin);
    }

    fn request_failed(&self, origin: IoOrigin) {
        self.inner.request_failed(origin);
    }

    fn request_cancelled(&self, origin: IoOrigin) {
        self.inner.request_cancelled(origin);
    }

    fn request_freed(&self) {
        self.live.fetch_sub(1, Ordering::AcqRel);
        self.inner.request_freed();
    }

    fn render(&self, out: &mut String) {
        self.inner.render(out);
    }
}

pub struct Netfs {
    config: NetfsConfig,
    idgen: IdGen,
    registry: Arc<Registry>,
    accounting: Arc<Accounting>,
    shut_down: AtomicBool,
}

impl Netfs {
    /// Create a context with the default [`NetfsStats`] sink.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the config does not validate.
    pub fn init(config: NetfsConfig) -> Result<Arc<Self>, NetfsError> {
        Self::with_stats_sink(config, Arc::new(NetfsStats::new()))
    }

    /// Create a context feeding counters to `stats`.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the config does not validate.
    pub fn with_stats_sink(
        config: NetfsConfig,
        stats: Arc<dyn StatsSink>,
    ) -> Result<Arc<Self>, NetfsError> {
        config.validate()?;
        if config.debug(DEBUG_LIFECYCLE) {
            log::debug!("netfs: init {config:?}");
        }
        Ok(Arc::new(Self {
            config,
            idgen: IdGen::new(),
            registry: Arc::new(Registry::new()),
            accounting: Arc::new(Accounting {
                inner: stats,
                live: AtomicUsize::new(0),
            }),
            shut_down: AtomicBool::new(false),
        }))
    }

    #[must_use]
    pub fn config(&self) -> &NetfsConfig {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Allocate a request covering `len` bytes at `start`.
    ///
    /// The request is not yet visible in the listing; call
    /// [`Netfs::register`] for that.
    ///
    /// # Errors
    ///
    /// `NoMemory` when `max_requests` requests are already live,
    /// `ShutDown` after [`Netfs::shutdown`].
    pub fn create(
        &self,
        origin: IoOrigin,
        start: u64,
        len: u64,
    ) -> Result<RequestRef, NetfsError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(NetfsError::ShutDown);
        }
        let limit = self.config.max_requests.unwrap_or(usize::MAX);
        if self
            .accounting
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < limit).then_some(n + 1)
            })
            .is_err()
        {
            log::debug!("netfs: cannot create {origin} request, {limit} live");
            return Err(NetfsError::NoMemory { limit });
        }

        let stats: Arc<dyn StatsSink> = self.accounting.clone();
        let rreq = RequestRef::new(
            self.idgen.get_next(),
            origin,
            start,
            len,
            stats,
            self.config.debug_mask,
        );
        if self.config.debug(DEBUG_LIFECYCLE) {
            log::debug!("netfs: new {rreq:?}");
        }
        Ok(rreq)
    }

    /// Make the request visible in the listing
    ///
    /// # Errors
    ///
    /// See [`Registry::insert`]; `ShutDown` once [`Netfs::shutdown`] has
    /// started, even for requests created before it.
    pub fn register(&self, rreq: &RequestRef) -> Result<(), NetfsError> {
        self.registry.insert(rreq)
    }

    /// Record a sub-operation failure; the first non-zero code sticks
    pub fn mark_error(&self, rreq: &RequestRef, code: i32) -> i32 {
        rreq.mark_error(code)
    }

    /// See [`crate::IoRequest::begin_sub_op`]
    #[must_use]
    pub fn begin_sub_op(&self, rreq: &RequestRef, bytes: u64) -> bool {
        rreq.begin_sub_op(bytes)
    }

    /// See [`crate::IoRequest::sub_op_complete`]
    #[must_use]
    pub fn sub_op_complete(&self, rreq: &RequestRef) -> bool {
        rreq.sub_op_complete()
    }

    /// Retire one sub-operation; if it was the last, run `on_complete`
    /// and retire the request. Returns whether completion ran.
    pub fn complete_sub_op(
        &self,
        rreq: &RequestRef,
        on_complete: impl FnOnce(&RequestRef),
    ) -> bool {
        if !rreq.sub_op_complete() {
            return false;
        }
        on_complete(rreq);
        match self.retire(rreq) {
            Ok(()) => {}
            Err(NetfsError::AlreadyRetired(id)) => {
                log::debug!("netfs: R={id} was cancelled before completion");
            }
            Err(e) => log::warn!("netfs: retire after completion failed: {e}"),
        }
        true
    }

    /// Remove the request from the registry and drop the registry's
    /// reference. Exactly one of any number of racing retire/cancel calls
    /// succeeds.
    ///
    /// # Errors
    ///
    /// `AlreadyRetired` for the losers, `NotRegistered` if the request was
    /// never registered. Neither changes the request.
    pub fn retire(&self, rreq: &RequestRef) -> Result<(), NetfsError> {
        rreq.mark_retired()?;
        self.unlink(rreq);
        Ok(())
    }

    /// Forced retirement. Marks the request cancelled and records
    /// `-ECANCELED` unless an error is already set.
    ///
    /// If completion has already fired, the outcome it acted on stands:
    /// the request is only unlinked, with no flag, error or counter change.
    ///
    /// # Errors
    ///
    /// Same as [`Netfs::retire`]; a losing cancel leaves no trace on the
    /// request.
    pub fn cancel(&self, rreq: &RequestRef) -> Result<(), NetfsError> {
        match rreq.mark_retired()? {
            RequestState::Completing => {
                log::debug!("netfs: R={} already completing, unlink only", rreq.debug_id());
            }
            _ => {
                rreq.mark_cancelled(-ECANCELED);
                trace_request(rreq.debug_id(), rreq.origin(), RequestTrace::Cancelled);
            }
        }
        self.unlink(rreq);
        Ok(())
    }

    fn unlink(&self, rreq: &RequestRef) {
        match self.registry.remove(rreq) {
            Some(membership) => membership.put(RefTrace::PutRegistry),
            None => log::warn!("netfs: R={} retired but not in registry", rreq.debug_id()),
        }
        trace_request(rreq.debug_id(), rreq.origin(), RequestTrace::Retired);
        if self.config.debug(DEBUG_LIFECYCLE) {
            log::debug!("netfs: retired {rreq:?}");
        }
    }

    /// Paginated listing of the registry
    #[must_use]
    pub fn requests_report(&self) -> RequestsReport {
        RequestsReport::new(
            Arc::clone(&self.registry),
            self.config.report_page_rows,
            self.config.debug_mask,
        )
    }

    /// Text of the statistics report
    #[must_use]
    pub fn stats_report(&self) -> String {
        let mut out = String::new();
        self.accounting.render(&mut out);
        out
    }

    /// Requests created and not yet released
    #[must_use]
    pub fn live_requests(&self) -> usize {
        self.accounting.live.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    /// Refuse new requests and registrations, then force-retire whatever
    /// is still registered.
    ///
    /// Returns how many requests had to be force-retired.
    pub fn shutdown(&self) -> usize {
        self.shut_down.store(true, Ordering::Release);
        let Some(leftovers) = self.registry.close() else {
            return 0;
        };
        if !leftovers.is_empty() {
            log::warn!("netfs: shutdown with {} requests in flight", leftovers.len());
        }
        let mut cancelled = 0;
        for rreq in leftovers {
            if self.cancel(&rreq).is_ok() {
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl std::fmt::Debug for Netfs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Netfs")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("shut_down", &self.is_shut_down())
            .finish_non_exhaustive()
    }
}
