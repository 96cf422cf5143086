//! Stored record types

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Value of a single tag: one string, or a set of strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagValue {
    Single(String),
    Multi(BTreeSet<String>),
}

impl TagValue {
    /// Iterate over every string held by this tag.
    pub fn iter(&self) -> impl Iterator<Item = &str> + '_ {
        let (single, multi) = match self {
            TagValue::Single(value) => (Some(value.as_str()), None),
            TagValue::Multi(values) => (None, Some(values.iter().map(String::as_str))),
        };
        single.into_iter().chain(multi.into_iter().flatten())
    }

    pub fn is_multi(&self) -> bool {
        matches!(self, TagValue::Multi(_))
    }

    /// True for a multi-valued tag with no members, which no backend stores.
    pub fn is_empty(&self) -> bool {
        matches!(self, TagValue::Multi(values) if values.is_empty())
    }
}

impl From<&str> for TagValue {
    fn from(value: &str) -> Self {
        TagValue::Single(value.to_string())
    }
}

impl From<String> for TagValue {
    fn from(value: String) -> Self {
        TagValue::Single(value)
    }
}

impl From<Vec<String>> for TagValue {
    fn from(values: Vec<String>) -> Self {
        TagValue::Multi(values.into_iter().collect())
    }
}

impl From<Vec<&str>> for TagValue {
    fn from(values: Vec<&str>) -> Self {
        TagValue::Multi(values.into_iter().map(str::to_string).collect())
    }
}

/// Indexed attributes of an entry, used for filtering and ordering only.
pub type Tags = BTreeMap<String, TagValue>;

/// The atomic stored unit.
///
/// `(profile, category, name)` is unique within a store. The value is opaque
/// to the engine; tags are what filters run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub category: String,
    pub name: String,
    pub value: Option<Vec<u8>>,
    pub tags: Tags,
    pub expiry: Option<DateTime<Utc>>,
}

impl Entry {
    pub fn new(category: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            value: None,
            tags: Tags::new(),
            expiry: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Vec<u8>>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<TagValue>) -> Self {
        self.tags.insert(name.into(), value.into());
        self
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    /// Set an absolute expiry. Stored with millisecond precision.
    pub fn with_expiry(mut self, expiry: DateTime<Utc>) -> Self {
        self.expiry = truncate_millis(expiry);
        self
    }

    /// Expire the entry `ttl` from now.
    pub fn expires_in(self, ttl: Duration) -> Self {
        self.with_expiry(Utc::now() + ttl)
    }

    /// Drop tags that carry no value.
    pub fn prune_empty_tags(&mut self) {
        self.tags.retain(|_, value| !value.is_empty());
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expiry, Some(expiry) if expiry <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}

fn truncate_millis(at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(at.timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_tag_value_iter() {
        let single = TagValue::from("active");
        assert_eq!(single.iter().collect::<Vec<_>>(), vec!["active"]);

        let multi = TagValue::from(vec!["b", "a"]);
        assert_eq!(multi.iter().collect::<Vec<_>>(), vec!["a", "b"]);
        assert!(multi.is_multi());
    }

    #[test]
    fn test_tag_value_json_shape() {
        let mut tags = Tags::new();
        tags.insert("status".into(), "active".into());
        tags.insert("roles".into(), vec!["admin", "user"].into());
        let json = serde_json::to_string(&tags).unwrap();
        assert_eq!(json, r#"{"roles":["admin","user"],"status":"active"}"#);

        let back: Tags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tags);
    }

    #[test]
    fn test_expiry() {
        let now = Utc::now();
        let past = Entry::new("cat", "a").with_expiry(now - Duration::seconds(5));
        let future = Entry::new("cat", "b").with_expiry(now + Duration::seconds(5));
        let never = Entry::new("cat", "c");

        assert!(past.is_expired_at(now));
        assert!(!future.is_expired_at(now));
        assert!(!never.is_expired_at(now));
    }

    #[test]
    fn test_expiry_is_truncated_to_millis() {
        let at = DateTime::from_timestamp(1_704_067_200, 123_456_789).unwrap();
        let entry = Entry::new("cat", "a").with_expiry(at);
        assert_eq!(entry.expiry.unwrap().timestamp_subsec_nanos(), 123_000_000);
    }
}
