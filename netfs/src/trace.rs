//! Named request and reference events
//!
//! Emitted through `tracing` at TRACE level, targets `netfs::rreq` and
//! `netfs::ref`. Enable with e.g. `RUST_LOG=netfs::rreq=trace`.

use crate::idgen::DebugId;
use crate::origin::IoOrigin;

/// Request lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestTrace {
    New,
    Registered,
    Completing,
    Retired,
    Cancelled,
    Free,
}

impl RequestTrace {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Registered => "REGISTERED",
            Self::Completing => "COMPLETING",
            Self::Retired => "RETIRED",
            Self::Cancelled => "CANCELLED",
            Self::Free => "FREE",
        }
    }
}

/// Why a reference was taken or dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefTrace {
    New,
    Get,
    Put,
    GetRegistry,
    PutRegistry,
    GetSubOp,
    PutSubOp,
}

impl RefTrace {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::New => "NEW",
            Self::Get => "GET",
            Self::Put => "PUT",
            Self::GetRegistry => "GET REGISTRY",
            Self::PutRegistry => "PUT REGISTRY",
            Self::GetSubOp => "GET SUBOP",
            Self::PutSubOp => "PUT SUBOP",
        }
    }
}

pub(crate) fn trace_request(debug_id: DebugId, origin: IoOrigin, what: RequestTrace) {
    tracing::trace!(
        target: "netfs::rreq",
        debug_id = %debug_id,
        origin = origin.mnemonic(),
        what = what.name(),
    );
}

pub(crate) fn trace_ref(debug_id: DebugId, refs: u32, what: RefTrace) {
    tracing::trace!(
        target: "netfs::ref",
        debug_id = %debug_id,
        refs,
        what = what.name(),
    );
}
