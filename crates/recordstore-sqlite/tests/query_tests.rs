//! Tag filter and scan tests for the SQLite backend

use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;
use recordstore_core::{
    CompareOp, Entry, ErrorKind, NativeResult, ProvisionOptions, ScanCursor, ScanIter,
    ScanRequest, ScanRow, SyncBackend, SyncStore, TagFilter, TagValue, Tags,
};
use recordstore_sqlite::{SqliteBackend, BATCH_SIZE};

fn memory_store() -> Arc<dyn SyncStore> {
    SqliteBackend::new()
        .provision("sqlite://:memory:", &ProvisionOptions::new())
        .unwrap()
}

fn person(name: &str, city: &str, age: &str) -> Entry {
    Entry::new("person", name)
        .with_tag("city", city)
        .with_tag("age", age)
}

fn seeded_store() -> Arc<dyn SyncStore> {
    let store = memory_store();
    let mut session = store.session(None, false).unwrap();
    for entry in [
        person("alice", "paris", "31"),
        person("bob", "berlin", "25"),
        person("carol", "paris", "47"),
        person("dave", "par_is", "52").with_tag("nick", vec!["d", "dd"]),
        Entry::new("pet", "rex").with_tag("city", "paris"),
    ] {
        session.insert(&entry).unwrap();
    }
    session.close().unwrap();
    store
}

fn names(store: &Arc<dyn SyncStore>, filter: TagFilter) -> Vec<String> {
    let mut session = store.session(None, false).unwrap();
    let query = recordstore_core::EntryQuery::new()
        .category("person")
        .tag_filter(filter)
        .order_by("name");
    session
        .fetch_all(&query)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect()
}

fn scan_names(store: &Arc<dyn SyncStore>, request: ScanRequest) -> Vec<String> {
    let rows: ScanIter = store.scan(request).unwrap();
    rows.map(|row| row.unwrap().entry.name).collect()
}

#[test]
fn test_filter_equals_and_in() {
    let store = seeded_store();
    assert_eq!(
        names(&store, TagFilter::equals("city", "paris")),
        vec!["alice", "carol"]
    );
    assert_eq!(
        names(&store, TagFilter::one_of("city", ["berlin", "par_is"])),
        vec!["bob", "dave"]
    );
    assert_eq!(names(&store, TagFilter::one_of("city", Vec::<String>::new())), Vec::<String>::new());
}

#[test]
fn test_filter_like_treats_underscore_literally() {
    let store = seeded_store();
    assert_eq!(
        names(&store, TagFilter::like("city", "par%")),
        vec!["alice", "carol", "dave"]
    );
    assert_eq!(names(&store, TagFilter::like("city", "par_is")), vec!["dave"]);
    assert_eq!(names(&store, TagFilter::like("city", "PAR%")), Vec::<String>::new());
}

#[test]
fn test_filter_compare_is_lexicographic() {
    let store = seeded_store();
    assert_eq!(
        names(&store, TagFilter::compare(CompareOp::Gte, "age", "31")),
        vec!["alice", "carol", "dave"]
    );
    assert_eq!(
        names(&store, TagFilter::compare(CompareOp::Lt, "age", "31")),
        vec!["bob"]
    );
}

#[test]
fn test_filter_exist_not_and_or() {
    let store = seeded_store();
    assert_eq!(names(&store, TagFilter::exist(["nick"])), vec!["dave"]);
    assert_eq!(
        names(&store, TagFilter::exist(["nick"]).negate()),
        vec!["alice", "bob", "carol"]
    );
    assert_eq!(
        names(
            &store,
            TagFilter::any(vec![
                TagFilter::equals("nick", "dd"),
                TagFilter::all(vec![
                    TagFilter::equals("city", "paris"),
                    TagFilter::compare(CompareOp::Gt, "age", "40"),
                ]),
            ])
        ),
        vec!["carol", "dave"]
    );
}

#[test]
fn test_filter_from_wire_format() {
    let store = seeded_store();
    let filter: TagFilter = r#"{"city": "paris", "age": {"$lt": "40"}}"#.parse().unwrap();
    assert_eq!(names(&store, filter), vec!["alice"]);
}

#[test]
fn test_scan_offset_and_limit() {
    let store = seeded_store();
    let request = ScanRequest {
        category: Some("person".into()),
        cursor: ScanCursor::Offset(1),
        limit: Some(2),
        ..Default::default()
    };
    assert_eq!(scan_names(&store, request), vec!["bob", "carol"]);
}

#[test]
fn test_scan_invalid_order_by_is_lazy() {
    let store = seeded_store();
    let mut scan = store
        .scan(ScanRequest {
            order_by: Some("value".into()),
            ..Default::default()
        })
        .unwrap();

    let err = scan.next().unwrap().unwrap_err();
    assert_eq!(SqliteBackend::new().translate_error(err).kind(), ErrorKind::Input);
    assert!(scan.next().is_none());
}

#[test]
fn test_scan_crosses_batches() {
    let store = memory_store();
    {
        let mut session = store.session(None, false).unwrap();
        for i in 0..(BATCH_SIZE * 2 + 5) {
            session.insert(&Entry::new("bulk", format!("e{i:04}"))).unwrap();
        }
    }

    let rows: Vec<ScanRow> = store
        .scan(ScanRequest::default())
        .unwrap()
        .collect::<NativeResult<_>>()
        .unwrap();
    assert_eq!(rows.len(), BATCH_SIZE * 2 + 5);
    assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
}

#[test]
fn test_keyset_resumes_after_id() {
    let store = memory_store();
    {
        let mut session = store.session(None, false).unwrap();
        for i in 0..10 {
            session.insert(&Entry::new("c", format!("e{i}"))).unwrap();
        }
    }
    let all: Vec<ScanRow> = store
        .scan(ScanRequest::default())
        .unwrap()
        .collect::<NativeResult<_>>()
        .unwrap();

    let page = |after: Option<i64>| -> Vec<ScanRow> {
        store
            .scan(ScanRequest {
                cursor: ScanCursor::After(after),
                limit: Some(4),
                ..Default::default()
            })
            .unwrap()
            .collect::<NativeResult<_>>()
            .unwrap()
    };

    let mut seen = Vec::new();
    let mut after = None;
    loop {
        let rows = page(after);
        if rows.is_empty() {
            break;
        }
        after = rows.last().map(|r| r.id);
        seen.extend(rows);
    }
    assert_eq!(seen, all);
}

#[test]
fn test_keyset_by_expiry_descending() {
    let store = memory_store();
    let base = Utc::now() + chrono::Duration::hours(1);
    {
        let mut session = store.session(None, false).unwrap();
        session.insert(&Entry::new("c", "none-1")).unwrap();
        session
            .insert(&Entry::new("c", "late").with_expiry(base + chrono::Duration::minutes(5)))
            .unwrap();
        session.insert(&Entry::new("c", "early").with_expiry(base)).unwrap();
        session.insert(&Entry::new("c", "none-2")).unwrap();
    }

    let request = |after: Option<i64>| ScanRequest {
        cursor: ScanCursor::After(after),
        order_by: Some("expiry".into()),
        descending: true,
        ..Default::default()
    };
    let all: Vec<ScanRow> = store
        .scan(request(None))
        .unwrap()
        .collect::<NativeResult<_>>()
        .unwrap();
    let order: Vec<&str> = all.iter().map(|r| r.entry.name.as_str()).collect();
    assert_eq!(order, vec!["late", "early", "none-2", "none-1"]);

    for (i, row) in all.iter().enumerate() {
        let rest: Vec<String> = scan_names(&store, request(Some(row.id)));
        let expected: Vec<String> = all[i + 1..].iter().map(|r| r.entry.name.clone()).collect();
        assert_eq!(rest, expected, "after {}", row.entry.name);
    }
}

#[test]
fn test_keyset_after_deleted_row_continues_past_its_id() {
    let store = seeded_store();
    let carol = store
        .scan(ScanRequest::default())
        .unwrap()
        .map(|row| row.unwrap())
        .find(|row| row.entry.name == "carol")
        .unwrap()
        .id;
    {
        let mut session = store.session(None, false).unwrap();
        session.remove("person", "carol").unwrap();
    }
    let request = |descending: bool, after: i64| ScanRequest {
        cursor: ScanCursor::After(Some(after)),
        order_by: Some("name".into()),
        descending,
        ..Default::default()
    };

    assert_eq!(scan_names(&store, request(false, carol)), vec!["dave", "rex"]);
    assert_eq!(scan_names(&store, request(true, carol)), vec!["bob", "alice"]);
    assert!(scan_names(&store, request(false, 9_999)).is_empty());
}

const TAG_NAMES: &[&str] = &["a", "b", "c"];
const TAG_VALUES: &[&str] = &["x", "y", "xy", "a_b", "X", "10", "9"];
const PATTERNS: &[&str] = &["%", "x%", "%y", "x%y", "a_b", "%_%", "X", "%1%"];

fn tag_name() -> impl Strategy<Value = String> {
    prop::sample::select(TAG_NAMES).prop_map(str::to_string)
}

fn tag_value() -> impl Strategy<Value = String> {
    prop::sample::select(TAG_VALUES).prop_map(str::to_string)
}

fn tags() -> impl Strategy<Value = Tags> {
    let value = prop_oneof![
        tag_value().prop_map(TagValue::Single),
        prop::collection::btree_set(tag_value(), 1..3).prop_map(TagValue::Multi),
    ];
    prop::collection::btree_map(tag_name(), value, 0..3)
}

fn leaf_filter() -> impl Strategy<Value = TagFilter> {
    let op = prop::sample::select(vec![CompareOp::Gt, CompareOp::Gte, CompareOp::Lt, CompareOp::Lte]);
    prop_oneof![
        (tag_name(), tag_value()).prop_map(|(t, v)| TagFilter::equals(t, v)),
        (tag_name(), tag_value()).prop_map(|(t, v)| TagFilter::not_equals(t, v)),
        (tag_name(), prop::sample::select(PATTERNS)).prop_map(|(t, p)| TagFilter::like(t, p)),
        (tag_name(), prop::collection::vec(tag_value(), 0..3))
            .prop_map(|(t, vs)| TagFilter::one_of(t, vs)),
        (op, tag_name(), tag_value()).prop_map(|(op, t, v)| TagFilter::compare(op, t, v)),
        prop::collection::vec(tag_name(), 0..3).prop_map(TagFilter::exist),
    ]
}

fn tag_filter() -> impl Strategy<Value = TagFilter> {
    leaf_filter().prop_recursive(3, 16, 3, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..3).prop_map(TagFilter::all),
            prop::collection::vec(inner.clone(), 0..3).prop_map(TagFilter::any),
            inner.prop_map(TagFilter::negate),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_sql_filter_agrees_with_matches(
        tag_sets in prop::collection::vec(tags(), 1..8),
        filter in tag_filter(),
    ) {
        let store = memory_store();
        let mut session = store.session(None, false).unwrap();
        for (i, tags) in tag_sets.iter().enumerate() {
            session
                .insert(&Entry::new("c", format!("e{i}")).with_tags(tags.clone()))
                .unwrap();
        }

        let expected = tag_sets.iter().filter(|tags| filter.matches(tags)).count() as u64;
        let counted = session.count(None, Some(&filter)).unwrap();
        prop_assert_eq!(counted, expected, "filter {}", filter);
    }
}
