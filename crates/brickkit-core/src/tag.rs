//! Tags and tag-set merge semantics.
//!
//! Effective tags of a resource are the union of ancestor tags with child
//! tags overriding on identical keys. Convention defaults are applied
//! before user tags, so a user-declared tag always wins over a default.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single key/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    /// Tag key.
    pub key: String,
    /// Tag value.
    pub value: String,
}

impl Tag {
    /// Creates a tag.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// An ordered tag map with merge semantics.
///
/// Backed by a `BTreeMap` so iteration order (and therefore diff and
/// report output) is deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(BTreeMap<String, String>);

impl TagSet {
    /// Creates an empty tag set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a tag set from a tag list; later duplicates win.
    #[must_use]
    pub fn from_tags(tags: &[Tag]) -> Self {
        let mut set = Self::new();
        for tag in tags {
            set.0.insert(tag.key.clone(), tag.value.clone());
        }
        set
    }

    /// Returns the value for a key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true when the key is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Inserts a tag, overriding any existing value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Inserts a tag only when the key is absent.
    ///
    /// Returns true when the tag was inserted. This is the convention
    /// default rule: defaults never overwrite declared values.
    pub fn insert_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.0.contains_key(&key) {
            return false;
        }
        self.0.insert(key, value.into());
        true
    }

    /// Removes a tag, returning its previous value.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    /// Merges `overriding` into this set; its values win on shared keys.
    #[must_use]
    pub fn merged_with(&self, overriding: &Self) -> Self {
        let mut merged = self.clone();
        for (key, value) in &overriding.0 {
            merged.0.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Number of tags.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true when no tags are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over `(key, value)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Converts back to a tag list in key order.
    #[must_use]
    pub fn to_tags(&self) -> Vec<Tag> {
        self.0
            .iter()
            .map(|(k, v)| Tag::new(k.clone(), v.clone()))
            .collect()
    }
}

impl FromIterator<(String, String)> for TagSet {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_overrides_parent_on_merge() {
        let parent = TagSet::from_tags(&[Tag::new("pii", "true"), Tag::new("team", "quant")]);
        let child = TagSet::from_tags(&[Tag::new("pii", "false")]);
        let merged = parent.merged_with(&child);
        assert_eq!(merged.get("pii"), Some("false"));
        assert_eq!(merged.get("team"), Some("quant"));
    }

    #[test]
    fn defaults_do_not_overwrite() {
        let mut tags = TagSet::from_tags(&[Tag::new("cost_center", "CC-1")]);
        assert!(!tags.insert_if_absent("cost_center", "CC-default"));
        assert!(tags.insert_if_absent("managed_by", "brickkit"));
        assert_eq!(tags.get("cost_center"), Some("CC-1"));
    }
}
