//! Profile contents and the row selection shared by sessions and scans

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::error::MemoryError;
use crate::backend::{OrderBy, ScanCursor, ScanRow};
use crate::entry::Entry;
use crate::filter::TagFilter;

#[derive(Debug, Clone)]
pub(crate) struct StoredItem {
    pub id: i64,
    pub entry: Entry,
}

/// Entries of one profile, keyed by `(category, name)`.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProfileData {
    items: BTreeMap<(String, String), StoredItem>,
}

/// A write, recorded so a transaction can replay it at commit.
#[derive(Debug, Clone)]
pub(crate) enum Op {
    Insert(Entry),
    Replace(Entry),
    Remove {
        category: String,
        name: String,
    },
    RemoveAll {
        category: Option<String>,
        tag_filter: Option<TagFilter>,
    },
}

/// Selection parameters shared by `fetch_all` and scans.
pub(crate) struct Selection<'a> {
    pub category: Option<&'a str>,
    pub tag_filter: Option<&'a TagFilter>,
    pub order_by: OrderBy,
    pub descending: bool,
    pub cursor: ScanCursor,
    pub limit: Option<usize>,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue<'a> {
    Null,
    Int(i64),
    Text(&'a str),
}

fn sort_key(order_by: OrderBy, item: &StoredItem) -> (SortValue<'_>, i64) {
    let value = match order_by {
        OrderBy::Id => SortValue::Int(item.id),
        OrderBy::Category => SortValue::Text(&item.entry.category),
        OrderBy::Name => SortValue::Text(&item.entry.name),
        OrderBy::Expiry => item
            .entry
            .expiry
            .map_or(SortValue::Null, |at| SortValue::Int(at.timestamp_millis())),
    };
    (value, item.id)
}

impl ProfileData {
    pub fn get_live(&self, category: &str, name: &str, now: DateTime<Utc>) -> Option<&StoredItem> {
        self.items
            .get(&(category.to_string(), name.to_string()))
            .filter(|item| !item.entry.is_expired_at(now))
    }

    pub fn matching<'a>(
        &'a self,
        category: Option<&'a str>,
        tag_filter: Option<&'a TagFilter>,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &'a StoredItem> + 'a {
        self.items.values().filter(move |item| {
            !item.entry.is_expired_at(now)
                && category.map_or(true, |c| item.entry.category == c)
                && tag_filter.map_or(true, |f| f.matches(&item.entry.tags))
        })
    }

    pub fn select(&self, selection: &Selection<'_>, now: DateTime<Utc>) -> Result<Vec<ScanRow>, MemoryError> {
        let order_by = selection.order_by;
        let mut rows: Vec<&StoredItem> = self
            .matching(selection.category, selection.tag_filter, now)
            .collect();
        rows.sort_by(|a, b| sort_key(order_by, a).cmp(&sort_key(order_by, b)));
        if selection.descending {
            rows.reverse();
        }

        let skip = match selection.cursor {
            ScanCursor::Offset(offset) => offset,
            ScanCursor::After(None) => 0,
            ScanCursor::After(Some(last_id)) if order_by == OrderBy::Id => rows
                .iter()
                .take_while(|item| {
                    if selection.descending {
                        item.id >= last_id
                    } else {
                        item.id <= last_id
                    }
                })
                .count(),
            ScanCursor::After(Some(last_id)) => {
                match self.items.values().find(|item| item.id == last_id) {
                    Some(anchor) => {
                        let anchor_key = sort_key(order_by, anchor);
                        rows.iter()
                            .take_while(|item| {
                                let key = sort_key(order_by, item);
                                if selection.descending {
                                    key >= anchor_key
                                } else {
                                    key <= anchor_key
                                }
                            })
                            .count()
                    }
                    // Row gone: keep to ids past the cursor, still in column order
                    None => {
                        rows.retain(|item| {
                            if selection.descending {
                                item.id < last_id
                            } else {
                                item.id > last_id
                            }
                        });
                        0
                    }
                }
            }
        };

        Ok(rows
            .into_iter()
            .skip(skip)
            .take(selection.limit.unwrap_or(usize::MAX))
            .map(|item| ScanRow {
                id: item.id,
                entry: item.entry.clone(),
            })
            .collect())
    }

    /// Apply one write. Returns the number of entries it affected.
    pub fn apply(&mut self, op: &Op, next_id: &mut i64, now: DateTime<Utc>) -> Result<u64, MemoryError> {
        match op {
            Op::Insert(entry) => {
                let key = (entry.category.clone(), entry.name.clone());
                if self.get_live(&entry.category, &entry.name, now).is_some() {
                    return Err(MemoryError::Duplicate {
                        category: entry.category.clone(),
                        name: entry.name.clone(),
                    });
                }
                // An expired row under the same key is superseded
                let id = *next_id;
                *next_id += 1;
                let mut entry = entry.clone();
                entry.prune_empty_tags();
                self.items.insert(key, StoredItem { id, entry });
                Ok(1)
            }
            Op::Replace(entry) => {
                let key = (entry.category.clone(), entry.name.clone());
                match self.items.get_mut(&key) {
                    Some(item) if !item.entry.is_expired_at(now) => {
                        item.entry = entry.clone();
                        item.entry.prune_empty_tags();
                        Ok(1)
                    }
                    _ => Err(MemoryError::EntryNotFound {
                        category: entry.category.clone(),
                        name: entry.name.clone(),
                    }),
                }
            }
            Op::Remove { category, name } => {
                if self.get_live(category, name, now).is_none() {
                    return Err(MemoryError::EntryNotFound {
                        category: category.clone(),
                        name: name.clone(),
                    });
                }
                self.items.remove(&(category.clone(), name.clone()));
                Ok(1)
            }
            Op::RemoveAll {
                category,
                tag_filter,
            } => {
                let doomed: Vec<(String, String)> = self
                    .matching(category.as_deref(), tag_filter.as_ref(), now)
                    .map(|item| (item.entry.category.clone(), item.entry.name.clone()))
                    .collect();
                for key in &doomed {
                    self.items.remove(key);
                }
                Ok(doomed.len() as u64)
            }
        }
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> u64 {
        let before = self.items.len();
        self.items.retain(|_, item| !item.entry.is_expired_at(now));
        (before - self.items.len()) as u64
    }
}
