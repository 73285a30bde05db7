//! The asset row: one media item in an index.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::PathBuf;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sort::SortKey;
use crate::timestamp::{normalize_timestamp, seconds_to_micros};

/// Errors describing rows that cannot be indexed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RowError {
    /// The row has no `rel`, so it has no identity within its index root.
    #[error("row is missing its 'rel' key")]
    MissingKey,
}

/// Broad media category of an asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[default]
    Image,
    Video,
}

impl MediaKind {
    /// Integer stored in the `media_type` column.
    pub fn as_i64(self) -> i64 {
        match self {
            MediaKind::Image => 0,
            MediaKind::Video => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }

    /// Guess the kind from a MIME type, defaulting to [`MediaKind::Image`].
    pub fn from_mime(mime: &str) -> Self {
        if mime.starts_with("video/") {
            MediaKind::Video
        } else {
            MediaKind::Image
        }
    }
}

/// Role of a row in a live-photo pair.
///
/// The motion half of a live photo is a *companion*: it is indexed so the
/// pairing survives re-scans, but UIs normally hide it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveRole {
    #[default]
    Primary,
    Companion,
}

impl LiveRole {
    pub fn as_i64(self) -> i64 {
        match self {
            LiveRole::Primary => 0,
            LiveRole::Companion => 1,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        match value {
            1 => LiveRole::Companion,
            _ => LiveRole::Primary,
        }
    }
}

/// One media item.
///
/// `rel` is the unique key within an index root. `abs` is derived from the
/// root on read and never persisted. `featured` is derived from an album
/// manifest and never persisted either. Enrichment fields that have no
/// column of their own travel in `extra` and are merged on re-append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssetRow {
    #[serde(default)]
    pub rel: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abs: Option<PathBuf>,
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "deserialize_dt")]
    pub dt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ts: Option<i64>,
    #[serde(default)]
    pub bytes: Option<i64>,
    #[serde(default)]
    pub w: Option<i64>,
    #[serde(default)]
    pub h: Option<i64>,
    #[serde(default)]
    pub mime: Option<String>,
    #[serde(default)]
    pub media_type: MediaKind,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub is_favorite: bool,
    #[serde(skip)]
    pub featured: bool,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub content_id: Option<String>,
    #[serde(default)]
    pub live_partner_rel: Option<String>,
    #[serde(default)]
    pub live_role: LiveRole,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl AssetRow {
    pub fn new(rel: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_dt(mut self, dt: impl Into<String>) -> Self {
        self.dt = Some(dt.into());
        self
    }

    /// Set the capture time from epoch seconds.
    pub fn with_ts_secs(mut self, secs: i64) -> Self {
        self.ts = secs.checked_mul(1_000_000);
        self
    }

    pub fn with_media_type(mut self, kind: MediaKind) -> Self {
        self.media_type = kind;
        self
    }

    pub fn with_favorite(mut self, favorite: bool) -> Self {
        self.is_favorite = favorite;
        self
    }

    /// The row's key, or `None` if the row is malformed.
    pub fn key(&self) -> Option<&str> {
        if self.rel.is_empty() {
            None
        } else {
            Some(&self.rel)
        }
    }

    pub fn validate(&self) -> Result<(), RowError> {
        self.key().map(|_| ()).ok_or(RowError::MissingKey)
    }

    /// Stable identifier, falling back to `rel` when no id was supplied.
    pub fn effective_id(&self) -> &str {
        if self.id.is_empty() { &self.rel } else { &self.id }
    }

    /// Normalized capture time in epoch microseconds.
    ///
    /// An explicit `ts` wins; otherwise `dt` is parsed.
    pub fn timestamp(&self) -> Option<i64> {
        self.ts
            .or_else(|| self.dt.as_deref().and_then(normalize_timestamp))
    }

    pub fn sort_key(&self) -> SortKey {
        SortKey::new(self.timestamp(), self.effective_id()).with_rel(self.rel.as_str())
    }

    pub fn is_live(&self) -> bool {
        self.live_partner_rel.is_some()
    }

    pub fn is_hidden_companion(&self) -> bool {
        self.live_role == LiveRole::Companion
    }

    /// Derive `featured` from an album manifest's featured set.
    pub fn mark_featured(&mut self, featured: &HashSet<String>) {
        self.featured = featured.contains(&self.rel);
    }
}

/// Accept `dt` as a string, an epoch number, or null.
fn deserialize_dt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    struct DtVisitor;

    impl<'de> Visitor<'de> for DtVisitor {
        type Value = Option<String>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an ISO-8601 string, an epoch number, or null")
        }

        fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_some<D2: Deserializer<'de>>(self, d: D2) -> Result<Self::Value, D2::Error> {
            d.deserialize_any(DtVisitor)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_string<E: de::Error>(self, v: String) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            Ok(seconds_to_micros(v).map(|_| v.to_string()))
        }
    }

    deserializer.deserialize_any(DtVisitor)
}

/// Accept `is_favorite` as a bool or as 0/1.
fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    struct FlagVisitor;

    impl<'de> Visitor<'de> for FlagVisitor {
        type Value = bool;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a boolean or 0/1")
        }

        fn visit_bool<E: de::Error>(self, v: bool) -> Result<bool, E> {
            Ok(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<bool, E> {
            Ok(v != 0)
        }

        fn visit_unit<E: de::Error>(self) -> Result<bool, E> {
            Ok(false)
        }
    }

    deserializer.deserialize_any(FlagVisitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_scanner_row() {
        let row: AssetRow = serde_json::from_str(
            r#"{"rel": "2023/IMG_0001.JPG", "dt": "2023-05-01T10:00:00Z",
                "bytes": 1024, "w": 4032, "h": 3024, "mime": "image/jpeg",
                "is_favorite": 1, "lens": "iPhone 14 back camera"}"#,
        )
        .unwrap();
        assert_eq!(row.rel, "2023/IMG_0001.JPG");
        assert!(row.is_favorite);
        assert_eq!(row.effective_id(), "2023/IMG_0001.JPG");
        assert_eq!(
            row.extra.get("lens"),
            Some(&serde_json::json!("iPhone 14 back camera"))
        );
        assert!(row.timestamp().is_some());
    }

    #[test]
    fn test_numeric_dt_is_accepted() {
        let row: AssetRow = serde_json::from_str(r#"{"rel": "a.jpg", "dt": 3}"#).unwrap();
        assert_eq!(row.dt.as_deref(), Some("3"));
        assert_eq!(row.timestamp(), Some(3_000_000));

        let row: AssetRow = serde_json::from_str(r#"{"rel": "b.jpg", "dt": null}"#).unwrap();
        assert_eq!(row.dt, None);
        assert_eq!(row.timestamp(), None);
    }

    #[test]
    fn test_missing_rel_is_malformed() {
        let row: AssetRow = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert_eq!(row.key(), None);
        assert_eq!(row.validate(), Err(RowError::MissingKey));
    }

    #[test]
    fn test_explicit_ts_wins_over_dt() {
        let row = AssetRow::new("a.jpg").with_dt("2020-01-01").with_ts_secs(7);
        assert_eq!(row.timestamp(), Some(7_000_000));
    }

    #[test]
    fn test_featured_is_not_serialized() {
        let mut row = AssetRow::new("a.jpg");
        row.mark_featured(&HashSet::from(["a.jpg".to_string()]));
        assert!(row.featured);
        let json = serde_json::to_value(&row).unwrap();
        assert!(json.get("featured").is_none());
    }
}
