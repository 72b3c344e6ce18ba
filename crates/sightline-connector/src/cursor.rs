//! Pagination engine.
//!
//! Every vendor pages differently: LDAP hands back an opaque cookie, Graph
//! and Salesforce a full next URL, GitHub a `Link` header, AWS a
//! continuation token, ServiceNow nothing at all (the client advances an
//! offset). [`PageCursor`] folds those into one tagged value and
//! [`paginate`] drives the fetch loop for all of them.

use std::future::Future;
use tracing::{debug, warn};

use crate::error::ConnectorResult;

/// Continuation value produced by one page fetch and consumed by the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageCursor {
    /// Opaque paging cookie (LDAP paged results control).
    Cookie(Vec<u8>),
    /// Full URL of the next page (`@odata.nextLink`, `nextRecordsUrl`, `Link`).
    NextUrl(String),
    /// Continuation token (`PaginationToken`, `Marker`).
    Token(String),
    /// Client-driven offset window.
    Offset { offset: u64, limit: u64 },
}

impl PageCursor {
    /// First window of an offset-paged listing.
    #[must_use]
    pub fn first_offset(limit: u64) -> Self {
        PageCursor::Offset { offset: 0, limit }
    }

    /// An empty cookie, URL or token means the listing is exhausted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            PageCursor::Cookie(bytes) => bytes.is_empty(),
            PageCursor::NextUrl(url) => url.is_empty(),
            PageCursor::Token(token) => token.is_empty(),
            PageCursor::Offset { limit, .. } => *limit == 0,
        }
    }

    /// The window after this one, for offset cursors.
    #[must_use]
    pub fn advance(&self) -> Option<Self> {
        match self {
            PageCursor::Offset { offset, limit } => Some(PageCursor::Offset {
                offset: offset + limit,
                limit: *limit,
            }),
            _ => None,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            PageCursor::Cookie(_) => "cookie",
            PageCursor::NextUrl(_) => "next_url",
            PageCursor::Token(_) => "token",
            PageCursor::Offset { .. } => "offset",
        }
    }
}

/// One fetched page.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub records: Vec<T>,
    pub next: Option<PageCursor>,
}

impl<T> Page<T> {
    pub fn new(records: Vec<T>, next: Option<PageCursor>) -> Self {
        Self { records, next }
    }

    /// A page with no continuation.
    pub fn last(records: Vec<T>) -> Self {
        Self {
            records,
            next: None,
        }
    }
}

/// Counters reported once a listing is exhausted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationSummary {
    pub pages: usize,
    pub records: usize,
}

/// Drive a page-fetch loop until the vendor stops returning a cursor.
///
/// `fetch` receives the cursor for the page to fetch (`initial` for the
/// first call) and returns the page. `on_page` receives each page's records
/// in order. The loop ends when:
///
/// - the page carries no cursor, or an empty one;
/// - the request used an offset cursor and the page came back shorter than
///   its limit;
/// - the vendor echoes back the cursor it was given.
pub async fn paginate<T, F, Fut, S>(
    initial: Option<PageCursor>,
    mut fetch: F,
    mut on_page: S,
) -> ConnectorResult<PaginationSummary>
where
    F: FnMut(Option<PageCursor>) -> Fut,
    Fut: Future<Output = ConnectorResult<Page<T>>>,
    S: FnMut(Vec<T>) -> ConnectorResult<()>,
{
    let mut summary = PaginationSummary::default();
    let mut cursor = initial;

    loop {
        let page = fetch(cursor.clone()).await?;
        summary.pages += 1;
        summary.records += page.records.len();

        let short_page = matches!(
            cursor,
            Some(PageCursor::Offset { limit, .. }) if (page.records.len() as u64) < limit
        );

        on_page(page.records)?;

        if short_page {
            debug!(pages = summary.pages, "Short offset page, listing exhausted");
            break;
        }

        match page.next {
            Some(next) if next.is_empty() => break,
            Some(next) if cursor.as_ref() == Some(&next) => {
                warn!(
                    cursor_kind = next.kind(),
                    pages = summary.pages,
                    "Vendor returned the same cursor twice, stopping pagination"
                );
                break;
            }
            Some(next) => cursor = Some(next),
            None => break,
        }
    }

    debug!(
        pages = summary.pages,
        records = summary.records,
        "Pagination complete"
    );
    Ok(summary)
}

/// Collect every record of a paged listing into one `Vec`.
pub async fn collect_pages<T, F, Fut>(
    initial: Option<PageCursor>,
    fetch: F,
) -> ConnectorResult<Vec<T>>
where
    F: FnMut(Option<PageCursor>) -> Fut,
    Fut: Future<Output = ConnectorResult<Page<T>>>,
{
    let mut all = Vec::new();
    paginate(initial, fetch, |records| {
        all.extend(records);
        Ok(())
    })
    .await?;
    Ok(all)
}
