//! Statistics sink
//!
//! The registry core only feeds counters; what a sink does with them is up
//! to the sink. [`NetfsStats`] is the default, producing the stats report:
//!
//! ```text
//! Netfs  : create RA=3 RP=0 RW=0 WB=1 WT=0 LW=0 UW=0 DR=0 DW=0
//! Netfs  : done   RA=2 RP=0 RW=0 WB=1 WT=0 LW=0 UW=0 DR=0 DW=0
//! Netfs  : rr=1 fail=0 cancel=0
//! ```

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::origin::IoOrigin;

/// Hook points fed by request creation, completion and release
pub trait StatsSink: Send + Sync {
    fn request_created(&self, origin: IoOrigin);
    fn request_completed(&self, origin: IoOrigin);
    fn request_failed(&self, origin: IoOrigin);
    fn request_cancelled(&self, origin: IoOrigin);
    fn request_freed(&self);

    /// Append a human-readable report. Sinks that only forward counters
    /// elsewhere can leave this empty.
    fn render(&self, _out: &mut String) {}
}

/// Per-origin atomic counters
#[derive(Debug, Default)]
pub struct NetfsStats {
    created: [AtomicU64; IoOrigin::COUNT],
    completed: [AtomicU64; IoOrigin::COUNT],
    failed: AtomicU64,
    cancelled: AtomicU64,
    nr_requests: AtomicUsize,
}

impl NetfsStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn created(&self, origin: IoOrigin) -> u64 {
        self.created[origin.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn completed(&self, origin: IoOrigin) -> u64 {
        self.completed[origin.index()].load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn cancelled(&self) -> u64 {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Requests created and not yet freed
    #[must_use]
    pub fn live_requests(&self) -> usize {
        self.nr_requests.load(Ordering::Relaxed)
    }
}

fn render_per_origin(out: &mut String, label: &str, counters: &[AtomicU64; IoOrigin::COUNT]) {
    let _ = write!(out, "Netfs  : {label:<6}");
    for origin in IoOrigin::ALL {
        let _ = write!(
            out,
            " {}={}",
            origin.mnemonic(),
            counters[origin.index()].load(Ordering::Relaxed)
        );
    }
    out.push('\n');
}

impl StatsSink for NetfsStats {
    fn request_created(&self, origin: IoOrigin) {
        self.created[origin.index()].fetch_add(1, Ordering::Relaxed);
        self.nr_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn request_completed(&self, origin: IoOrigin) {
        self.completed[origin.index()].fetch_add(1, Ordering::Relaxed);
    }

    fn request_failed(&self, _origin: IoOrigin) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn request_cancelled(&self, _origin: IoOrigin) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn request_freed(&self) {
        self.nr_requests.fetch_sub(1, Ordering::Relaxed);
    }

    fn render(&self, out: &mut String) {
        render_per_origin(out, "create", &self.created);
        render_per_origin(out, "done", &self.completed);
        let _ = writeln!(
            out,
            "Netfs  : rr={} fail={} cancel={}",
            self.live_requests(),
            self.failed(),
            self.cancelled()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_fresh_stats() {
        let stats = NetfsStats::new();
        let mut out = String::new();
        stats.render(&mut out);
        assert_eq!(
            out,
            "Netfs  : create RA=0 RP=0 RW=0 WB=0 WT=0 LW=0 UW=0 DR=0 DW=0\n\
             Netfs  : done   RA=0 RP=0 RW=0 WB=0 WT=0 LW=0 UW=0 DR=0 DW=0\n\
             Netfs  : rr=0 fail=0 cancel=0\n"
        );
    }

    #[test]
    fn test_live_gauge_follows_create_and_free() {
        let stats = NetfsStats::new();
        stats.request_created(IoOrigin::Writeback);
        stats.request_created(IoOrigin::DioRead);
        stats.request_freed();
        assert_eq!(stats.live_requests(), 1);
        assert_eq!(stats.created(IoOrigin::Writeback), 1);
        assert_eq!(stats.created(IoOrigin::DioRead), 1);
        assert_eq!(stats.created(IoOrigin::ReadAhead), 0);
    }

    #[test]
    fn test_render_counts() {
        let stats = NetfsStats::new();
        stats.request_created(IoOrigin::ReadAhead);
        stats.request_completed(IoOrigin::ReadAhead);
        stats.request_failed(IoOrigin::ReadAhead);
        let mut out = String::new();
        stats.render(&mut out);
        assert!(out.contains("create RA=1 RP=0"));
        assert!(out.contains("done   RA=1 RP=0"));
        assert!(out.ends_with("rr=1 fail=1 cancel=0\n"));
    }
}
