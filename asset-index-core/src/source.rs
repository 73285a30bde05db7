//! The paged-source contract.
//!
//! Anything that can hand out rows newest-first, one page at a time, is a
//! [`PagedSource`]: the whole-library index, a single album, a test fixture.
//! `next_cursor == None` is the one and only exhaustion signal.

use crate::row::AssetRow;
use crate::sort::Cursor;

/// One page of rows plus the cursor to resume after it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub rows: Vec<AssetRow>,
    /// `None` when this page is the terminal page.
    pub next_cursor: Option<Cursor>,
}

impl Page {
    /// An empty terminal page.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.next_cursor.is_none()
    }
}

/// A source of rows ordered newest-first.
pub trait PagedSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch up to `limit` rows strictly after `cursor`.
    ///
    /// With `cursor == None` the source continues from its own position
    /// (the newest row on the first call).
    fn fetch_page(&mut self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, Self::Error>;
}

impl<S: PagedSource + ?Sized> PagedSource for Box<S> {
    type Error = S::Error;

    fn fetch_page(&mut self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, Self::Error> {
        (**self).fetch_page(limit, cursor)
    }
}
