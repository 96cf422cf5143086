//! Tag filter compilation and row selection
//!
//! A [`TagFilter`] becomes a boolean SQL expression over the `items` row
//! aliased `i`. Every tag leaf is an `EXISTS` sub-select on `items_tags`, so a
//! multi-valued tag satisfies a leaf when any of its rows does:
//!
//! ```sql
//! EXISTS (SELECT 1 FROM items_tags t
//!         WHERE t.item_id = i.id AND t.name = ? AND t.value LIKE ? ESCAPE '\')
//! ```
//!
//! `LIKE` runs with `case_sensitive_like` on and with `_` and `\` escaped, so
//! `%` is the only wildcard.

use recordstore_core::{Entry, OrderBy, ScanRow, StoreKey, TagFilter};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};

use crate::codec::{decrypt_value, load_tags, now_millis, sql_to_expiry};
use crate::error::Result;

/// A SQL fragment and the parameters it binds, in order.
#[derive(Debug, Default)]
pub struct Fragment {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Fragment {
    fn push(&mut self, sql: &str) {
        self.sql.push_str(sql);
    }

    fn bind(&mut self, value: impl Into<Value>) {
        self.params.push(value.into());
    }
}

/// Escape a pattern so only `%` keeps its `LIKE` meaning.
pub fn like_pattern(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '\\' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

const TAG_EXISTS: &str = "EXISTS (SELECT 1 FROM items_tags t WHERE t.item_id = i.id AND t.name = ?";

/// Append the SQL for `filter` to `out`.
pub fn compile_filter(filter: &TagFilter, out: &mut Fragment) {
    match filter {
        TagFilter::Equals(tag, value) => leaf(out, tag, " AND t.value = ?", value),
        TagFilter::NotEquals(tag, value) => leaf(out, tag, " AND t.value != ?", value),
        TagFilter::Like(tag, pattern) => leaf(
            out,
            tag,
            " AND t.value LIKE ? ESCAPE '\\'",
            &like_pattern(pattern),
        ),
        TagFilter::Compare(op, tag, value) => {
            leaf(out, tag, &format!(" AND t.value {} ?", op.as_sql()), value)
        }
        TagFilter::In(_, values) if values.is_empty() => out.push("0"),
        TagFilter::In(tag, values) => {
            out.push(TAG_EXISTS);
            out.bind(tag.clone());
            out.push(" AND t.value IN (");
            for (i, value) in values.iter().enumerate() {
                out.push(if i == 0 { "?" } else { ", ?" });
                out.bind(value.clone());
            }
            out.push("))");
        }
        TagFilter::Exist(tags) if tags.is_empty() => out.push("1"),
        TagFilter::Exist(tags) => {
            out.push("(");
            for (i, tag) in tags.iter().enumerate() {
                if i > 0 {
                    out.push(" AND ");
                }
                out.push(TAG_EXISTS);
                out.push(")");
                out.bind(tag.clone());
            }
            out.push(")");
        }
        TagFilter::And(children) => combine(out, children, " AND ", "1"),
        TagFilter::Or(children) => combine(out, children, " OR ", "0"),
        TagFilter::Not(child) => {
            out.push("NOT (");
            compile_filter(child, out);
            out.push(")");
        }
    }
}

fn leaf(out: &mut Fragment, tag: &str, condition: &str, value: &str) {
    out.push(TAG_EXISTS);
    out.push(condition);
    out.push(")");
    out.bind(tag.to_string());
    out.bind(value.to_string());
}

fn combine(out: &mut Fragment, children: &[TagFilter], op: &str, empty: &str) {
    if children.is_empty() {
        out.push(empty);
        return;
    }
    out.push("(");
    for (i, child) in children.iter().enumerate() {
        if i > 0 {
            out.push(op);
        }
        compile_filter(child, out);
    }
    out.push(")");
}

fn column(order_by: OrderBy) -> &'static str {
    match order_by {
        OrderBy::Id => "i.id",
        OrderBy::Category => "i.category",
        OrderBy::Name => "i.name",
        OrderBy::Expiry => "i.expiry",
    }
}

/// Position of a row in a scan's ordering, used to resume after it.
#[derive(Debug, Clone, PartialEq)]
pub struct Anchor {
    pub value: Value,
    pub id: i64,
}

impl Anchor {
    /// Anchor on a row that was just yielded.
    pub fn after_row(order_by: OrderBy, row: &ScanRow) -> Self {
        let value = match order_by {
            OrderBy::Id => Value::Integer(row.id),
            OrderBy::Category => Value::Text(row.entry.category.clone()),
            OrderBy::Name => Value::Text(row.entry.name.clone()),
            OrderBy::Expiry => row
                .entry
                .expiry
                .map_or(Value::Null, |at| Value::Integer(at.timestamp_millis())),
        };
        Self { value, id: row.id }
    }

    /// Anchor on a stored row by id, looking up its ordering value. `None`
    /// when the row is gone.
    pub fn lookup(
        conn: &Connection,
        profile_id: i64,
        order_by: OrderBy,
        id: i64,
    ) -> Result<Option<Self>> {
        if order_by == OrderBy::Id {
            return Ok(Some(Self {
                value: Value::Integer(id),
                id,
            }));
        }
        let sql = format!(
            "SELECT {} FROM items i WHERE i.id = ? AND i.profile_id = ?",
            column(order_by)
        );
        let value: Option<Value> = conn
            .query_row(&sql, [id, profile_id], |row| row.get(0))
            .optional()?;
        Ok(value.map(|value| Self { value, id }))
    }

    /// Condition selecting rows strictly after this anchor. NULLs order
    /// first ascending and last descending, as SQLite sorts them.
    fn compile(&self, order_by: OrderBy, descending: bool, out: &mut Fragment) {
        if order_by == OrderBy::Id {
            out.push(if descending { " AND i.id < ?" } else { " AND i.id > ?" });
            out.bind(self.id);
            return;
        }

        let col = column(order_by);
        let (cmp, id_cmp) = if descending { ("<", "<") } else { (">", ">") };
        match (&self.value, descending) {
            (Value::Null, false) => {
                out.push(&format!(" AND ({col} IS NOT NULL OR i.id > ?)"));
                out.bind(self.id);
            }
            (Value::Null, true) => {
                out.push(&format!(" AND ({col} IS NULL AND i.id < ?)"));
                out.bind(self.id);
            }
            (value, _) => {
                let nulls_after = if descending {
                    format!(" OR {col} IS NULL")
                } else {
                    String::new()
                };
                out.push(&format!(
                    " AND ({col} {cmp} ? OR ({col} = ? AND i.id {id_cmp} ?){nulls_after})"
                ));
                out.bind(value.clone());
                out.bind(value.clone());
                out.bind(self.id);
            }
        }
    }
}

/// Which rows of a profile to read.
#[derive(Debug)]
pub struct RowQuery<'a> {
    pub profile_id: i64,
    pub category: Option<&'a str>,
    pub tag_filter: Option<&'a TagFilter>,
    pub order_by: OrderBy,
    pub descending: bool,
    pub after: Option<&'a Anchor>,
    /// Only rows past this id in scan direction
    pub past_id: Option<i64>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl<'a> RowQuery<'a> {
    pub fn new(profile_id: i64) -> Self {
        Self {
            profile_id,
            category: None,
            tag_filter: None,
            order_by: OrderBy::Id,
            descending: false,
            after: None,
            past_id: None,
            offset: 0,
            limit: None,
        }
    }

    pub fn category(mut self, category: Option<&'a str>) -> Self {
        self.category = category;
        self
    }

    pub fn tag_filter(mut self, tag_filter: Option<&'a TagFilter>) -> Self {
        self.tag_filter = tag_filter;
        self
    }

    /// Shared `WHERE` clause: profile, liveness, category and filter.
    pub fn where_clause(&self) -> Fragment {
        let mut out = Fragment::default();
        out.push(" WHERE i.profile_id = ? AND (i.expiry IS NULL OR i.expiry > ?)");
        out.bind(self.profile_id);
        out.bind(now_millis());
        if let Some(category) = self.category {
            out.push(" AND i.category = ?");
            out.bind(category.to_string());
        }
        if let Some(filter) = self.tag_filter {
            out.push(" AND ");
            compile_filter(filter, &mut out);
        }
        if let Some(anchor) = self.after {
            anchor.compile(self.order_by, self.descending, &mut out);
        }
        if let Some(id) = self.past_id {
            out.push(if self.descending { " AND i.id < ?" } else { " AND i.id > ?" });
            out.bind(id);
        }
        out
    }

    pub fn count(&self, conn: &Connection) -> Result<u64> {
        let clause = self.where_clause();
        let sql = format!("SELECT COUNT(*) FROM items i{}", clause.sql);
        let count: i64 = conn.query_row(&sql, params_from_iter(clause.params), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn delete(&self, conn: &Connection) -> Result<u64> {
        let clause = self.where_clause();
        let sql = format!(
            "DELETE FROM items WHERE id IN (SELECT i.id FROM items i{})",
            clause.sql
        );
        let removed = conn.execute(&sql, params_from_iter(clause.params))?;
        Ok(removed as u64)
    }

    /// Read matching rows in order, decrypting values with `key`.
    pub fn rows(&self, conn: &Connection, key: &StoreKey) -> Result<Vec<ScanRow>> {
        let mut clause = self.where_clause();
        let dir = if self.descending { "DESC" } else { "ASC" };
        let order = match self.order_by {
            OrderBy::Id => format!("i.id {dir}"),
            other => format!("{} {dir}, i.id {dir}", column(other)),
        };
        let sql = format!(
            "SELECT i.id, i.category, i.name, i.value, i.expiry FROM items i{} ORDER BY {order} LIMIT ? OFFSET ?",
            clause.sql
        );
        clause.bind(self.limit.map_or(-1, |limit| limit as i64));
        clause.bind(self.offset as i64);

        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(clause.params), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<Vec<u8>>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(id, category, name, value, expiry)| {
                let entry = Entry {
                    category,
                    name,
                    value: decrypt_value(key, value)?,
                    tags: load_tags(conn, id)?,
                    expiry: sql_to_expiry(expiry)?,
                };
                Ok(ScanRow { id, entry })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn compiled(filter: &TagFilter) -> (String, usize) {
        let mut out = Fragment::default();
        compile_filter(filter, &mut out);
        (out.sql, out.params.len())
    }

    #[test]
    fn test_like_pattern_escaping() {
        assert_eq!(like_pattern("a%b"), "a%b");
        assert_eq!(like_pattern("a_b"), "a\\_b");
        assert_eq!(like_pattern("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_empty_combinators() {
        assert_eq!(compiled(&TagFilter::all(vec![])).0, "1");
        assert_eq!(compiled(&TagFilter::any(vec![])).0, "0");
        assert_eq!(compiled(&TagFilter::exist(Vec::<String>::new())).0, "1");
        assert_eq!(compiled(&TagFilter::one_of("t", Vec::<String>::new())).0, "0");
    }

    #[test]
    fn test_params_follow_placeholders() {
        let filter = TagFilter::all(vec![
            TagFilter::equals("a", "1"),
            TagFilter::one_of("b", ["x", "y"]),
            TagFilter::exist(["c", "d"]).negate(),
        ]);
        let (sql, params) = compiled(&filter);
        assert_eq!(sql.matches('?').count(), params);
        assert_eq!(params, 2 + 3 + 2);
    }
}
