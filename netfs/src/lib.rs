//! Registry of in-flight network filesystem I/O requests
//!
//! I/O-issuing threads create, register, update and retire requests while a
//! diagnostic reader lists them concurrently without blocking anybody.
//!
//! ```text
//!  submission threads                    listing consumer
//!        │                                      │
//!        ▼                                      ▼
//!  ┌───────────┐  create/register   ┌────────────────────┐
//!  │   Netfs   │ ─────────────────> │ Registry           │
//!  │  IdGen    │  retire/cancel     │  writer: Mutex     │
//!  │  stats    │                    │  readers: ArcSwap  │
//!  └───────────┘                    └────────────────────┘
//!                                            ▲
//!                                            │ one pinned row at a time
//!                                   ┌────────────────────┐
//!                                   │ RequestsReport     │
//!                                   └────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod idgen;
pub mod netfs;
pub mod origin;
pub mod registry;
pub mod reporter;
pub mod request;
pub mod stats;
pub mod trace;

pub use config::NetfsConfig;
pub use error::NetfsError;
pub use idgen::{DebugId, IdGen};
pub use netfs::Netfs;
pub use origin::IoOrigin;
pub use registry::{Registry, RegistryWalk};
pub use reporter::{render_row, Cursor, Page, RequestsReport};
pub use request::{IoRequest, RequestFlags, RequestRef, RequestState, RequestView};
pub use stats::{NetfsStats, StatsSink};
pub use trace::{RefTrace, RequestTrace};
