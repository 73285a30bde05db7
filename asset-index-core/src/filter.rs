//! Filter configuration supplied by the UI layer.

use serde::{Deserialize, Serialize};

use crate::row::{AssetRow, MediaKind};

/// Predicates applied to an index read *before* pagination.
///
/// Every field is optional so a UI can send only the keys it cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    /// Restrict to one media kind.
    pub media_type: Option<MediaKind>,
    /// Only rows paired as live photos.
    pub live_only: bool,
    pub favorites_only: bool,
    /// Exact location match.
    pub location: Option<String>,
    /// `Some(true)` keeps only rows with a location, `Some(false)` only rows without.
    pub has_location: Option<bool>,
    /// Exclude hidden live-photo companions.
    pub exclude_hidden: bool,
}

impl FilterParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn favorites() -> Self {
        Self {
            favorites_only: true,
            ..Self::default()
        }
    }

    pub fn videos() -> Self {
        Self {
            media_type: Some(MediaKind::Video),
            ..Self::default()
        }
    }

    pub fn live() -> Self {
        Self {
            live_only: true,
            ..Self::default()
        }
    }

    /// Build the filter for a gallery filter mode name
    /// (`"videos"`, `"live"`, `"favorites"`). Unknown or empty modes
    /// select everything.
    pub fn from_mode(mode: Option<&str>) -> Self {
        match mode.map(|m| m.trim().to_ascii_lowercase()).as_deref() {
            Some("videos") => Self::videos(),
            Some("live") => Self::live(),
            Some("favorites") => Self::favorites(),
            _ => Self::default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Evaluate the filter against an in-memory row.
    ///
    /// Mirrors the SQL predicates so rows streamed live from a scanner can
    /// be filtered the same way as rows read back from the index.
    pub fn matches(&self, row: &AssetRow) -> bool {
        if let Some(kind) = self.media_type {
            if row.media_type != kind {
                return false;
            }
        }
        if self.live_only && !row.is_live() {
            return false;
        }
        if self.favorites_only && !row.is_favorite {
            return false;
        }
        if let Some(location) = &self.location {
            if row.location.as_deref() != Some(location.as_str()) {
                return false;
            }
        }
        if let Some(wanted) = self.has_location {
            let has = row.location.as_deref().is_some_and(|l| !l.is_empty());
            if has != wanted {
                return false;
            }
        }
        if self.exclude_hidden && row.is_hidden_companion() {
            return false;
        }
        true
    }
}
