//! Error type for registry and submission operations

use std::fmt;

use crate::idgen::DebugId;

pub const ENOENT: i32 = 2;
pub const ENOMEM: i32 = 12;
pub const EBUSY: i32 = 16;
pub const EINVAL: i32 = 22;
pub const ESHUTDOWN: i32 = 108;
pub const EALREADY: i32 = 114;
pub const ECANCELED: i32 = 125;

/// Errors reported to callers of the netfs core
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetfsError {
    /// A request could not be allocated (live-request limit reached)
    NoMemory { limit: usize },
    /// The request is, or has already been, in the registry
    AlreadyRegistered(DebugId),
    /// The request was never registered
    NotRegistered(DebugId),
    /// Someone else already retired the request
    AlreadyRetired(DebugId),
    /// Configuration could not be parsed or failed validation
    InvalidConfig(String),
    /// The context is shutting down and accepts no new requests
    ShutDown,
}

impl NetfsError {
    /// Negative errno-style status for callers that deal in numeric codes
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::NoMemory { .. } => -ENOMEM,
            Self::AlreadyRegistered(_) => -EBUSY,
            Self::NotRegistered(_) => -ENOENT,
            Self::AlreadyRetired(_) => -EALREADY,
            Self::InvalidConfig(_) => -EINVAL,
            Self::ShutDown => -ESHUTDOWN,
        }
    }
}

impl fmt::Display for NetfsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoMemory { limit } => {
                write!(f, "Cannot allocate request: {limit} requests already live")
            }
            Self::AlreadyRegistered(id) => write!(f, "Request {id} already registered"),
            Self::NotRegistered(id) => write!(f, "Request {id} is not registered"),
            Self::AlreadyRetired(id) => write!(f, "Request {id} already retired"),
            Self::InvalidConfig(msg) => write!(f, "Invalid config: {msg}"),
            Self::ShutDown => write!(f, "Netfs is shutting down"),
        }
    }
}

impl std::error::Error for NetfsError {}
