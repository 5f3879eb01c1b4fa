//! Human-readable listing of in-flight requests
//!
//! ```text
//! REQUEST  OR REF FL ERR  OPS COVERAGE
//! ======== == === == ==== === =========
//! 00000001 RA   2  4    0   3 @0400 800/1000
//! ```
//!
//! The listing is produced item by item: the header, then one row per
//! registry member in id order. Each row is rendered while the registry
//! list is pinned and the pin is released before the row is handed on, so
//! a slow consumer never holds anything that writers or reclamation wait
//! on. A [`Cursor`] remembers where a consumer stopped; resuming after a
//! member that has since been removed continues with the next higher id.

use std::fmt;
use std::sync::Arc;

use futures::stream::{self, Stream};
use tokio::sync::mpsc;

use crate::config::DEBUG_REPORT;
use crate::idgen::DebugId;
use crate::registry::Registry;
use crate::request::RequestView;

pub const HEADER: &str = "REQUEST  OR REF FL ERR  OPS COVERAGE\n\
                          ======== == === == ==== === =========\n";

/// Opaque resume position in the listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor(Position);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Header,
    After(Option<DebugId>),
    End,
}

impl Cursor {
    /// Before the header
    pub const START: Cursor = Cursor(Position::Header);

    #[must_use]
    pub fn is_end(&self) -> bool {
        self.0 == Position::End
    }
}

impl Default for Cursor {
    fn default() -> Self {
        Self::START
    }
}

/// One page of the listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub text: String,
    /// Request rows in `text`, header not counted
    pub rows: usize,
    pub next: Cursor,
}

impl Page {
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.next.is_end()
    }
}

/// Render one listing row, without the trailing newline
#[must_use]
pub fn render_row(view: &RequestView) -> String {
    format!(
        "{:08x} {} {:3} {:2x} {:4} {:3} @{:04x} {:x}/{:x}",
        view.debug_id.id(),
        view.origin.mnemonic(),
        view.ref_count,
        view.flags.bits(),
        view.error,
        view.nr_outstanding,
        view.start,
        view.submitted,
        view.len,
    )
}

/// Paginated producer over a [`Registry`]
#[derive(Debug, Clone)]
pub struct RequestsReport {
    registry: Arc<Registry>,
    page_rows: usize,
    debug_mask: u32,
}

impl RequestsReport {
    #[must_use]
    pub fn new(registry: Arc<Registry>, page_rows: usize, debug_mask: u32) -> Self {
        Self {
            registry,
            page_rows: page_rows.max(1),
            debug_mask,
        }
    }

    #[must_use]
    pub fn header() -> &'static str {
        HEADER
    }

    /// Produce the item at `cursor` and the cursor following it.
    ///
    /// Returns `None` at the end of the listing.
    #[must_use]
    pub fn next_item(&self, cursor: Cursor) -> Option<(String, Cursor)> {
        match cursor.0 {
            Position::Header => Some((HEADER.to_string(), Cursor(Position::After(None)))),
            Position::After(after) => {
                // Pinned only while this one row renders
                self.registry.with_entry_after(after, |req| {
                    let view = req.view();
                    let mut line = render_row(&view);
                    line.push('\n');
                    (line, Cursor(Position::After(Some(view.debug_id))))
                })
            }
            Position::End => None,
        }
    }

    /// Read up to `max_rows` request rows starting at `cursor`.
    ///
    /// The header is included only when starting from [`Cursor::START`] and
    /// does not count toward `max_rows`.
    #[must_use]
    pub fn read_page(&self, cursor: Cursor, max_rows: usize) -> Page {
        let mut text = String::new();
        let mut rows = 0;
        let mut cursor = cursor;

        if cursor == Cursor::START {
            text.push_str(HEADER);
            cursor = Cursor(Position::After(None));
        }
        while rows < max_rows {
            match self.next_item(cursor) {
                Some((line, next)) => {
                    text.push_str(&line);
                    rows += 1;
                    cursor = next;
                }
                None => {
                    cursor = Cursor(Position::End);
                    break;
                }
            }
        }

        if self.debug_mask & DEBUG_REPORT != 0 {
            log::debug!("requests report: page of {rows} rows, next {cursor:?}");
        }
        Page {
            text,
            rows,
            next: cursor,
        }
    }

    /// Read a page of the configured size
    #[must_use]
    pub fn read_default_page(&self, cursor: Cursor) -> Page {
        self.read_page(cursor, self.page_rows)
    }

    /// Write the whole listing to `out`
    ///
    /// # Errors
    ///
    /// Propagates errors from `out`.
    pub fn write_all(&self, out: &mut impl fmt::Write) -> fmt::Result {
        let mut cursor = Cursor::START;
        while let Some((line, next)) = self.next_item(cursor) {
            out.write_str(&line)?;
            cursor = next;
        }
        Ok(())
    }

    /// Whole listing as a string
    #[must_use]
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let _ = self.write_all(&mut out);
        out
    }

    /// The listing as a stream of items (header, then one row each).
    ///
    /// Rows are rendered lazily, when the consumer polls for them.
    pub fn stream(&self) -> impl Stream<Item = String> + Send + 'static {
        let report = self.clone();
        stream::unfold(Cursor::START, move |cursor| {
            let item = report.next_item(cursor);
            async move { item }
        })
    }

    /// Send the listing into `tx`, waiting for room as needed.
    ///
    /// Returns the number of request rows sent. Stops early if the receiver
    /// goes away.
    pub async fn send_to(&self, tx: mpsc::Sender<String>) -> usize {
        let mut cursor = Cursor::START;
        let mut rows = 0;
        loop {
            // The pin is gone by the time we wait on the channel
            let Some((line, next)) = self.next_item(cursor) else {
                break;
            };
            if tx.send(line).await.is_err() {
                log::debug!("requests report: receiver dropped after {rows} rows");
                break;
            }
            if cursor != Cursor::START {
                rows += 1;
            }
            cursor = next;
        }
        rows
    }
}
