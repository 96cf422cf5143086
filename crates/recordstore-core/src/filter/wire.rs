//! JSON wire format for tag filters
//!
//! ```json
//! {"status": "active"}                          equals
//! {"status": {"$neq": "revoked"}}               not equals
//! {"name": {"$like": "al%"}}                    like
//! {"tier": {"$in": ["gold", "silver"]}}         in
//! {"score": {"$gte": "0042"}}                   compare ($gt, $gte, $lt, $lte)
//! {"$exist": ["a", "b"]}                        exist (a single string is allowed)
//! {"$and": [...]}, {"$or": [...]}, {"$not": {}} combinators
//! ```
//!
//! Several keys in one object are an implicit `$and`.

use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use super::{CompareOp, TagFilter};
use crate::error::{Error, Result};

impl TagFilter {
    /// Decode a filter from its JSON value.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| Error::input(format!("Tag filter must be a JSON object, got {value}")))?;

        let mut clauses = object
            .iter()
            .map(|(key, operand)| decode_clause(key, operand))
            .collect::<Result<Vec<_>>>()?;

        if clauses.len() == 1 {
            Ok(clauses.remove(0))
        } else {
            Ok(TagFilter::And(clauses))
        }
    }

    /// Encode the filter as its JSON value.
    pub fn to_json(&self) -> Value {
        match self {
            TagFilter::Equals(tag, value) => json!({ tag.as_str(): value }),
            TagFilter::NotEquals(tag, value) => json!({ tag.as_str(): { "$neq": value } }),
            TagFilter::Like(tag, pattern) => json!({ tag.as_str(): { "$like": pattern } }),
            TagFilter::In(tag, values) => json!({ tag.as_str(): { "$in": values } }),
            TagFilter::Compare(op, tag, value) => json!({ tag.as_str(): { op.as_key(): value } }),
            TagFilter::Exist(tags) => json!({ "$exist": tags }),
            TagFilter::And(children) => {
                json!({ "$and": children.iter().map(TagFilter::to_json).collect::<Vec<_>>() })
            }
            TagFilter::Or(children) => {
                json!({ "$or": children.iter().map(TagFilter::to_json).collect::<Vec<_>>() })
            }
            TagFilter::Not(child) => json!({ "$not": child.to_json() }),
        }
    }
}

fn decode_clause(key: &str, operand: &Value) -> Result<TagFilter> {
    match key {
        "$and" => Ok(TagFilter::And(decode_children(key, operand)?)),
        "$or" => Ok(TagFilter::Or(decode_children(key, operand)?)),
        "$not" => Ok(TagFilter::Not(Box::new(TagFilter::from_json(operand)?))),
        "$exist" => match operand {
            Value::String(tag) => Ok(TagFilter::Exist(vec![tag.clone()])),
            Value::Array(_) => Ok(TagFilter::Exist(string_list(key, operand)?)),
            other => Err(Error::input(format!(
                "$exist expects a tag name or a list of tag names, got {other}"
            ))),
        },
        op if op.starts_with('$') => Err(Error::input(format!("Unknown filter operator: {op}"))),
        tag => decode_tag(tag, operand),
    }
}

fn decode_children(key: &str, operand: &Value) -> Result<Vec<TagFilter>> {
    operand
        .as_array()
        .ok_or_else(|| Error::input(format!("{key} expects a list of filters, got {operand}")))?
        .iter()
        .map(TagFilter::from_json)
        .collect()
}

fn decode_tag(tag: &str, operand: &Value) -> Result<TagFilter> {
    match operand {
        Value::String(value) => Ok(TagFilter::Equals(tag.to_string(), value.clone())),
        Value::Object(ops) if !ops.is_empty() => {
            let mut leaves = ops
                .iter()
                .map(|(op, value)| decode_leaf(tag, op, value))
                .collect::<Result<Vec<_>>>()?;
            if leaves.len() == 1 {
                Ok(leaves.remove(0))
            } else {
                Ok(TagFilter::And(leaves))
            }
        }
        other => Err(Error::input(format!(
            "Invalid value for tag '{tag}': expected a string or an operator object, got {other}"
        ))),
    }
}

fn decode_leaf(tag: &str, op: &str, value: &Value) -> Result<TagFilter> {
    let tag = tag.to_string();
    let compare = |op: CompareOp| -> Result<TagFilter> {
        Ok(TagFilter::Compare(op, tag.clone(), string_operand(op.as_key(), value)?))
    };

    match op {
        "$neq" => Ok(TagFilter::NotEquals(tag.clone(), string_operand(op, value)?)),
        "$like" => Ok(TagFilter::Like(tag.clone(), string_operand(op, value)?)),
        "$in" => Ok(TagFilter::In(tag.clone(), string_list(op, value)?)),
        "$gt" => compare(CompareOp::Gt),
        "$gte" => compare(CompareOp::Gte),
        "$lt" => compare(CompareOp::Lt),
        "$lte" => compare(CompareOp::Lte),
        other => Err(Error::input(format!("Unknown operator {other} for tag '{tag}'"))),
    }
}

fn string_operand(op: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::input(format!("{op} expects a string, got {value}")))
}

fn string_list(op: &str, value: &Value) -> Result<Vec<String>> {
    value
        .as_array()
        .ok_or_else(|| Error::input(format!("{op} expects a list of strings, got {value}")))?
        .iter()
        .map(|item| string_operand(op, item))
        .collect()
}

impl FromStr for TagFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| Error::input(format!("Tag filter is not valid JSON: {e}")).with_source(e))?;
        TagFilter::from_json(&value)
    }
}

impl Serialize for TagFilter {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TagFilter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        TagFilter::from_json(&value).map_err(|e| D::Error::custom(e.message()))
    }
}

impl From<TagFilter> for Value {
    fn from(filter: TagFilter) -> Self {
        filter.to_json()
    }
}

impl TryFrom<Map<String, Value>> for TagFilter {
    type Error = Error;

    fn try_from(map: Map<String, Value>) -> Result<Self> {
        TagFilter::from_json(&Value::Object(map))
    }
}
