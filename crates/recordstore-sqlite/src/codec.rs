//! Conversions between entries and their SQLite columns
//!
//! - expiry is stored as Unix milliseconds (`INTEGER`, NULL for none)
//! - each tag value is one `items_tags` row; `multi` marks members of a
//!   multi-valued tag so a one-member set reads back as a set
//! - values are encrypted with the store key before they reach the table

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use recordstore_core::{StoreKey, TagValue, Tags};
use rusqlite::{params, Connection};

use crate::error::{Result, SqliteError};

pub fn expiry_to_sql(expiry: Option<DateTime<Utc>>) -> Option<i64> {
    expiry.map(|at| at.timestamp_millis())
}

pub fn sql_to_expiry(millis: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    millis
        .map(|ms| {
            DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| SqliteError::Corrupt(format!("Invalid expiry timestamp: {ms}")))
        })
        .transpose()
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Flatten tags into `(name, value, multi)` rows.
pub fn tags_to_rows(tags: &Tags) -> Vec<(&str, &str, bool)> {
    tags.iter()
        .flat_map(|(name, value)| {
            let multi = value.is_multi();
            value.iter().map(move |v| (name.as_str(), v, multi))
        })
        .collect()
}

/// Rebuild tags from `(name, value, multi)` rows.
pub fn rows_to_tags(rows: impl IntoIterator<Item = (String, String, bool)>) -> Tags {
    let mut singles = Tags::new();
    let mut multis: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for (name, value, multi) in rows {
        if multi {
            multis.entry(name).or_default().insert(value);
        } else {
            singles.insert(name, TagValue::Single(value));
        }
    }
    singles.extend(
        multis
            .into_iter()
            .map(|(name, values)| (name, TagValue::Multi(values))),
    );
    singles
}

pub fn insert_tags(conn: &Connection, item_id: i64, tags: &Tags) -> Result<()> {
    let mut stmt = conn
        .prepare_cached("INSERT INTO items_tags (item_id, name, value, multi) VALUES (?, ?, ?, ?)")?;
    for (name, value, multi) in tags_to_rows(tags) {
        stmt.execute(params![item_id, name, value, multi])?;
    }
    Ok(())
}

pub fn load_tags(conn: &Connection, item_id: i64) -> Result<Tags> {
    let mut stmt =
        conn.prepare_cached("SELECT name, value, multi FROM items_tags WHERE item_id = ?")?;
    let rows = stmt
        .query_map([item_id], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
        .collect::<rusqlite::Result<Vec<(String, String, bool)>>>()?;
    Ok(rows_to_tags(rows))
}

pub fn encrypt_value(key: &StoreKey, value: Option<&[u8]>) -> Option<Vec<u8>> {
    value.map(|v| key.encrypt(v))
}

pub fn decrypt_value(key: &StoreKey, value: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    value
        .map(|v| key.decrypt(&v).map_err(SqliteError::from))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_expiry_round_trip_is_millisecond_precise() {
        let at = DateTime::from_timestamp_millis(1_704_067_200_123).unwrap();
        let stored = expiry_to_sql(Some(at));
        assert_eq!(stored, Some(1_704_067_200_123));
        assert_eq!(sql_to_expiry(stored).unwrap(), Some(at));
        assert_eq!(sql_to_expiry(None).unwrap(), None);
    }

    #[test]
    fn test_single_member_set_stays_multi() {
        let mut tags = Tags::new();
        tags.insert("status".into(), "active".into());
        tags.insert("roles".into(), vec!["admin"].into());

        let rows: Vec<(String, String, bool)> = tags_to_rows(&tags)
            .into_iter()
            .map(|(n, v, m)| (n.to_string(), v.to_string(), m))
            .collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows_to_tags(rows), tags);
    }
}
