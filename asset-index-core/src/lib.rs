//! Shared data model for the asset index.
//!
//! Holds the types every other crate agrees on: the fixed-schema
//! [`AssetRow`], the `(timestamp, id)` [`SortKey`] that defines "newest
//! first", the [`FilterParams`] a UI layer hands to queries, and the
//! [`PagedSource`] contract that repositories and mergers speak.

pub mod filter;
pub mod row;
pub mod sort;
pub mod source;
pub mod timestamp;
pub mod util;

pub use filter::FilterParams;
pub use row::{AssetRow, LiveRole, MediaKind, RowError};
pub use sort::{Cursor, SortKey};
pub use source::{Page, PagedSource};
pub use timestamp::{normalize_timestamp, seconds_to_micros};
