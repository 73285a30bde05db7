//! [`PagedSource`] adapter over an [`AssetRepository`].

use std::sync::Arc;

use asset_index_core::{Cursor, FilterParams, Page, PagedSource};

use crate::error::RepositoryError;
use crate::queries::AlbumScope;
use crate::repository::AssetRepository;

/// One scoped, filtered view of an index, read page by page.
///
/// The whole library and a single album are both just a `CursorQuery` with
/// a different [`AlbumScope`], so the merger can treat them the same way.
#[derive(Debug)]
pub struct CursorQuery {
    repo: Arc<AssetRepository>,
    scope: AlbumScope,
    filter: FilterParams,
    cursor: Option<Cursor>,
    exhausted: bool,
}

impl CursorQuery {
    pub fn new(repo: Arc<AssetRepository>, scope: AlbumScope, filter: FilterParams) -> Self {
        Self {
            repo,
            scope,
            filter,
            cursor: None,
            exhausted: false,
        }
    }

    /// The whole library with `filter`.
    pub fn library(repo: Arc<AssetRepository>, filter: FilterParams) -> Self {
        Self::new(repo, AlbumScope::library(), filter)
    }

    pub fn scope(&self) -> &AlbumScope {
        &self.scope
    }

    /// Position after the last row handed out, if any.
    pub fn cursor(&self) -> Option<&Cursor> {
        self.cursor.as_ref()
    }

    pub fn exhausted(&self) -> bool {
        self.exhausted
    }

    /// Rewind to the newest row.
    pub fn reset(&mut self) {
        self.cursor = None;
        self.exhausted = false;
    }

    /// Total rows this query walks through, independent of pagination.
    pub fn count(&self) -> Result<u64, RepositoryError> {
        self.repo.count(&self.scope, &self.filter)
    }
}

impl PagedSource for CursorQuery {
    type Error = RepositoryError;

    fn fetch_page(&mut self, limit: usize, cursor: Option<&Cursor>) -> Result<Page, Self::Error> {
        if limit == 0 {
            return Ok(Page {
                rows: Vec::new(),
                next_cursor: cursor.cloned().or_else(|| self.cursor.clone()),
            });
        }
        let from = match cursor {
            Some(cursor) => Some(cursor.clone()),
            None if self.exhausted => return Ok(Page::empty()),
            None => self.cursor.clone(),
        };

        let rows = self
            .repo
            .get_assets_page(from.as_ref(), limit, &self.scope, &self.filter)?;

        if rows.len() < limit {
            self.exhausted = true;
            self.cursor = rows.last().map(|row| row.sort_key()).or(from);
            return Ok(Page {
                rows,
                next_cursor: None,
            });
        }

        let next = rows.last().map(|row| row.sort_key());
        self.exhausted = false;
        self.cursor = next.clone();
        Ok(Page {
            rows,
            next_cursor: next,
        })
    }
}
