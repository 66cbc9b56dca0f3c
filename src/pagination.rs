//! Pagination strategies
//!
//! Platforms page in three different ways. A `Paginator` hides which one is
//! in use: callers ask for the next `PageRequest`, fetch it, and hand the
//! resulting `Page` back with `record`. Every strategy stops on a short page,
//! so an empty first page costs exactly one call.
//!
//! A `Page` remembers how many raw items the platform returned and the
//! largest numeric id among them. Records that fail to normalize are dropped
//! from `records` but still count toward both, so one malformed record never
//! looks like the end of the data.

use crate::normalize::fields::u64_field;
use crate::Result;
use serde_json::Value;
use tracing::warn;

/// Consecutive failed pages after which a walk gives up
pub const MAX_FAILED_PAGES_IN_ROW: u32 = 3;

/// How a platform advances between pages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStrategy {
    /// `start += page_size` (page numbers are derived from it)
    Cursor,
    /// Positional `(count, start)` window embedded in the endpoint path
    OffsetWindow,
    /// Next marker is `max(id in batch) + 1`
    Marker,
    /// Endpoint returns everything in one response
    Single,
}

/// Parameters for one page fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    /// Offset for cursor/window strategies, marker id for marker strategy
    pub start: u64,
    pub page_size: u32,
    /// Zero-based index of this page within the walk
    pub index: u32,
}

impl PageRequest {
    /// One-based page number, for APIs that take `page=N`
    pub fn page_number(&self) -> u64 {
        u64::from(self.index) + 1
    }
}

/// One fetched page
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub records: Vec<T>,
    /// Raw items returned by the platform, before normalization
    pub fetched: usize,
    /// Largest numeric id among the raw items
    pub max_key: Option<u64>,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            records: Vec::new(),
            fetched: 0,
            max_key: None,
        }
    }

    /// Normalize raw items, skipping (and logging) the ones that fail
    pub fn from_items<F>(what: &str, items: &[&Value], key_field: &str, mut normalize: F) -> Self
    where
        F: FnMut(&Value) -> Result<T>,
    {
        let max_key = items.iter().filter_map(|v| u64_field(v, key_field)).max();
        let records = items
            .iter()
            .filter_map(|item| match normalize(item) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(record = what, error = %e, "Skipping malformed record");
                    None
                }
            })
            .collect();

        Self {
            records,
            fetched: items.len(),
            max_key,
        }
    }
}

/// Drives one pagination walk
#[derive(Debug, Clone)]
pub struct Paginator {
    strategy: PageStrategy,
    page_size: u32,
    max_pages: u32,
    start: u64,
    index: u32,
    failed_in_row: u32,
    done: bool,
}

impl Paginator {
    pub fn new(strategy: PageStrategy, page_size: u32) -> Self {
        Self {
            strategy,
            page_size: page_size.max(1),
            max_pages: 10_000,
            start: 0,
            index: 0,
            failed_in_row: 0,
            done: false,
        }
    }

    /// Initial offset or marker (Kayako user markers start at 1)
    pub fn starting_at(mut self, start: u64) -> Self {
        self.start = start;
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    /// The next page to fetch, or `None` once the walk is over
    pub fn next_page(&mut self) -> Option<PageRequest> {
        if self.done {
            return None;
        }
        if self.index >= self.max_pages {
            warn!(
                strategy = ?self.strategy,
                max_pages = self.max_pages,
                "Pagination safety valve reached, stopping"
            );
            self.done = true;
            return None;
        }

        let request = PageRequest {
            start: self.start,
            page_size: self.page_size,
            index: self.index,
        };
        self.index += 1;
        Some(request)
    }

    /// Feed back the page returned for the last request
    pub fn record<T>(&mut self, page: &Page<T>) {
        self.advance(page.fetched, page.max_key);
    }

    /// Step past a page whose fetch failed.
    ///
    /// Positional strategies move to the next window and return `true`.
    /// Marker walks cannot know the next marker without the page, and a
    /// single-shot walk has nothing left, so both end and return `false`.
    /// A run of `MAX_FAILED_PAGES_IN_ROW` failures also ends the walk.
    pub fn skip_failed_page(&mut self) -> bool {
        self.failed_in_row += 1;
        if self.failed_in_row >= MAX_FAILED_PAGES_IN_ROW {
            warn!(
                strategy = ?self.strategy,
                failures = self.failed_in_row,
                "Too many failed pages in a row, stopping"
            );
            self.done = true;
            return false;
        }

        match self.strategy {
            PageStrategy::Cursor | PageStrategy::OffsetWindow => {
                self.start += u64::from(self.page_size);
                true
            }
            PageStrategy::Marker | PageStrategy::Single => {
                self.done = true;
                false
            }
        }
    }

    /// Feed back the raw size and largest id of the last page
    pub fn advance(&mut self, fetched: usize, max_key: Option<u64>) {
        self.failed_in_row = 0;
        if fetched < self.page_size as usize {
            self.done = true;
            return;
        }

        match self.strategy {
            PageStrategy::Single => self.done = true,
            PageStrategy::Cursor | PageStrategy::OffsetWindow => {
                self.start += u64::from(self.page_size);
            }
            PageStrategy::Marker => match max_key.map(|max| max.saturating_add(1)) {
                Some(next) if next > self.start => self.start = next,
                _ => {
                    // Ids did not move past the current marker; the platform
                    // would hand back the same page forever.
                    warn!(marker = self.start, "Marker did not advance, stopping");
                    self.done = true;
                }
            },
        }
    }
}
