//! Tag filter query model
//!
//! A [`TagFilter`] is a boolean expression over an entry's tags. Backends
//! either compile it into their native query language or evaluate it
//! in-process with [`TagFilter::matches`]; both must select the same entries.
//!
//! # Semantics
//!
//! ```text
//! Equals(t, v)      some value of t == v
//! NotEquals(t, v)   some value of t != v
//! Like(t, p)        some value of t matches p ('%' is the only wildcard)
//! In(t, [v..])      some value of t is one of the listed values
//! Compare(op, t, v) some value of t compares with v (byte-wise ordering)
//! Exist([t..])      every listed tag is present
//! And([..])         all children hold (empty: true)
//! Or([..])          any child holds (empty: false)
//! Not(e)            e does not hold
//! ```
//!
//! Leaves on an absent tag are false. Multi-valued tags satisfy a leaf when
//! any member does.
//!
//! # Example
//!
//! ```rust
//! use recordstore_core::filter::TagFilter;
//! use recordstore_core::entry::Tags;
//!
//! let filter: TagFilter = r#"{"status": "active", "name": {"$like": "al%"}}"#.parse().unwrap();
//!
//! let mut tags = Tags::new();
//! tags.insert("status".into(), "active".into());
//! tags.insert("name".into(), "alice".into());
//! assert!(filter.matches(&tags));
//! ```

mod wire;

use std::fmt;

use crate::entry::Tags;

/// Ordering comparison used by [`TagFilter::Compare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    /// Wire-format operator key (`$gt`, ...).
    pub fn as_key(&self) -> &'static str {
        match self {
            CompareOp::Gt => "$gt",
            CompareOp::Gte => "$gte",
            CompareOp::Lt => "$lt",
            CompareOp::Lte => "$lte",
        }
    }

    /// SQL operator.
    pub fn as_sql(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    fn holds(&self, value: &str, operand: &str) -> bool {
        match self {
            CompareOp::Gt => value > operand,
            CompareOp::Gte => value >= operand,
            CompareOp::Lt => value < operand,
            CompareOp::Lte => value <= operand,
        }
    }
}

/// Boolean expression tree over entry tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    Equals(String, String),
    NotEquals(String, String),
    Like(String, String),
    In(String, Vec<String>),
    Compare(CompareOp, String, String),
    Exist(Vec<String>),
    And(Vec<TagFilter>),
    Or(Vec<TagFilter>),
    Not(Box<TagFilter>),
}

impl TagFilter {
    pub fn equals(tag: impl Into<String>, value: impl Into<String>) -> Self {
        TagFilter::Equals(tag.into(), value.into())
    }

    pub fn not_equals(tag: impl Into<String>, value: impl Into<String>) -> Self {
        TagFilter::NotEquals(tag.into(), value.into())
    }

    pub fn like(tag: impl Into<String>, pattern: impl Into<String>) -> Self {
        TagFilter::Like(tag.into(), pattern.into())
    }

    pub fn one_of<I, S>(tag: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagFilter::In(tag.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn compare(op: CompareOp, tag: impl Into<String>, value: impl Into<String>) -> Self {
        TagFilter::Compare(op, tag.into(), value.into())
    }

    pub fn exist<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        TagFilter::Exist(tags.into_iter().map(Into::into).collect())
    }

    pub fn all(children: Vec<TagFilter>) -> Self {
        TagFilter::And(children)
    }

    pub fn any(children: Vec<TagFilter>) -> Self {
        TagFilter::Or(children)
    }

    pub fn negate(self) -> Self {
        TagFilter::Not(Box::new(self))
    }

    /// Evaluate the filter against one entry's tags.
    pub fn matches(&self, tags: &Tags) -> bool {
        let any_value = |tag: &str, pred: &dyn Fn(&str) -> bool| {
            tags.get(tag)
                .map(|value| value.iter().any(pred))
                .unwrap_or(false)
        };

        match self {
            TagFilter::Equals(tag, expected) => any_value(tag, &|v| v == expected),
            TagFilter::NotEquals(tag, expected) => any_value(tag, &|v| v != expected),
            TagFilter::Like(tag, pattern) => any_value(tag, &|v| like_match(pattern, v)),
            TagFilter::In(tag, options) => any_value(tag, &|v| options.iter().any(|o| o == v)),
            TagFilter::Compare(op, tag, operand) => any_value(tag, &|v| op.holds(v, operand)),
            TagFilter::Exist(names) => names.iter().all(|name| tags.contains_key(name)),
            TagFilter::And(children) => children.iter().all(|child| child.matches(tags)),
            TagFilter::Or(children) => children.iter().any(|child| child.matches(tags)),
            TagFilter::Not(child) => !child.matches(tags),
        }
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

/// Match `value` against a pattern where `%` stands for any run of
/// characters and every other character is literal.
pub fn like_match(pattern: &str, value: &str) -> bool {
    let parts: Vec<&str> = pattern.split('%').collect();
    let (first, last) = match (parts.first(), parts.last()) {
        (Some(first), Some(last)) if parts.len() > 1 => (*first, *last),
        _ => return pattern == value,
    };

    // Prefix and suffix are anchored; the remaining parts must appear in order
    // between them.
    let Some(mut rest) = value
        .strip_prefix(first)
        .and_then(|tail| tail.strip_suffix(last))
    else {
        return false;
    };

    for part in &parts[1..parts.len() - 1] {
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    true
}
