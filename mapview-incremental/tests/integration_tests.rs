//! Integration tests for the view engine

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use mapview_incremental::prelude::*;
use mapview_incremental::records::SEQUENCE_MARKER_ID;
use mapview_store::{
    ChangeEvent, ChangeStream, ChangesOptions, DocumentStore, MemoryStore, MemoryStoreProvider,
    RangeRequest, RangeResponse, RemoteRequest, RemoteTransport, Seq, StoreError, StoreProvider,
    StoreResult, Transport, WriteOp, WriteOutcome,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

struct Fixture {
    source: Arc<MemoryStore>,
    provider: Arc<MemoryStoreProvider>,
    engine: ViewEngine,
}

fn fixture() -> Fixture {
    init_tracing();
    let source = Arc::new(MemoryStore::new("db"));
    let provider = Arc::new(MemoryStoreProvider::new());
    let engine = ViewEngine::new(source.clone(), provider.clone());
    Fixture {
        source,
        provider,
        engine,
    }
}

/// Emits `doc[field]` as key with a null value
fn by_field(field: &str) -> ViewDefinition {
    let field = field.to_string();
    ViewDefinition::new(move |doc: &Value, emit: &mut Emitter| {
        if let Some(key) = doc.get(&field) {
            emit.emit_key(key.clone());
        }
        Ok(())
    })
}

/// Emits `(doc.key, doc.n)`
fn key_and_number() -> ViewDefinition {
    ViewDefinition::new(|doc: &Value, emit: &mut Emitter| {
        emit.emit(doc["key"].clone(), doc["n"].clone());
        Ok(())
    })
}

fn put_all(store: &MemoryStore, docs: Vec<Value>) {
    for doc in docs {
        store.put(doc).unwrap();
    }
}

fn rows(result: &QueryResult) -> Vec<(Value, Value)> {
    result
        .rows
        .iter()
        .map(|row| (row.key.clone(), row.value.clone()))
        .collect()
}

#[tokio::test]
async fn test_temp_view_orders_by_key_then_id() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "3", "foo": "bar"}),
            json!({"_id": "1", "foo": "baz"}),
            json!({"_id": "2", "foo": "bar"}),
            json!({"_id": "4"}),
        ],
    );

    let result = f.engine.query(by_field("foo"), QueryOptions::new()).await.unwrap();
    assert_eq!(result.total_rows, 3);
    assert_eq!(result.offset, 0);
    assert_eq!(result.ids(), vec!["2", "3", "1"]);
    assert!(result.rows.iter().all(|row| row.doc.is_none()));
}

#[tokio::test]
async fn test_keys_fan_out_preserves_order_duplicates_and_holes() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "a", "k": "x"}),
            json!({"_id": "b", "k": "y"}),
            json!({"_id": "c", "k": "x"}),
        ],
    );

    let options = QueryOptions::new().keys(["y", "missing", "x", "y"]);
    let result = f.engine.query(by_field("k"), options).await.unwrap();
    assert_eq!(result.ids(), vec!["b", "a", "c", "b"]);
    assert_eq!(
        result.keys(),
        vec![&json!("y"), &json!("x"), &json!("x"), &json!("y")]
    );
}

#[tokio::test]
async fn test_multiple_emissions_from_one_document() {
    let f = fixture();
    f.source.put(json!({"_id": "a", "tags": ["t", "t", "s"]})).unwrap();

    let view = ViewDefinition::new(|doc: &Value, emit: &mut Emitter| {
        for (position, tag) in doc["tags"].as_array().into_iter().flatten().enumerate() {
            emit.emit(tag.clone(), position % 2);
        }
        Ok(())
    });
    let result = f.engine.query(view, QueryOptions::new()).await.unwrap();
    assert_eq!(
        rows(&result),
        vec![
            (json!("s"), json!(0)),
            (json!("t"), json!(0)),
            (json!("t"), json!(1)),
        ]
    );

    let duplicates = ViewDefinition::new(|_: &Value, emit: &mut Emitter| {
        emit.emit("same", 1);
        emit.emit("same", 1);
        Ok(())
    });
    let result = f.engine.query(duplicates, QueryOptions::new()).await.unwrap();
    assert_eq!(result.rows.len(), 2);
}

#[tokio::test]
async fn test_range_queries_and_descending() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "a", "k": "1"}),
            json!({"_id": "b", "k": "1"}),
            json!({"_id": "c", "k": "2"}),
            json!({"_id": "d", "k": "2"}),
            json!({"_id": "e", "k": "3"}),
            json!({"_id": "f", "k": "4"}),
        ],
    );

    let ascending = f
        .engine
        .query(by_field("k"), QueryOptions::new().startkey("1").endkey("2"))
        .await
        .unwrap();
    assert_eq!(ascending.ids(), vec!["a", "b", "c", "d"]);

    let descending = f
        .engine
        .query(
            by_field("k"),
            QueryOptions::new().startkey("2").endkey("1").descending(true),
        )
        .await
        .unwrap();
    assert_eq!(descending.ids(), vec!["d", "c", "b", "a"]);

    let single = f
        .engine
        .query(by_field("k"), QueryOptions::new().key("2").descending(true))
        .await
        .unwrap();
    assert_eq!(single.ids(), vec!["d", "c"]);

    let open_start = f
        .engine
        .query(by_field("k"), QueryOptions::new().endkey("2").descending(true))
        .await
        .unwrap();
    assert_eq!(open_start.ids(), vec!["f", "e", "d", "c"]);

    let inverted = f
        .engine
        .query(by_field("k"), QueryOptions::new().startkey("3").endkey("1"))
        .await
        .unwrap();
    assert!(inverted.rows.is_empty());
}

#[tokio::test]
async fn test_null_bound_is_not_an_open_bound() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "n", "k": null}),
            json!({"_id": "b", "k": false}),
            json!({"_id": "i", "k": 1}),
            json!({"_id": "s", "k": "a"}),
        ],
    );

    let all = f.engine.query(by_field("k"), QueryOptions::new()).await.unwrap();
    assert_eq!(all.ids(), vec!["n", "b", "i", "s"]);

    let from_null = f
        .engine
        .query(by_field("k"), QueryOptions::new().startkey(Value::Null))
        .await
        .unwrap();
    assert_eq!(from_null.rows.len(), 4);

    let to_null = f
        .engine
        .query(by_field("k"), QueryOptions::new().endkey(Value::Null))
        .await
        .unwrap();
    assert_eq!(to_null.ids(), vec!["n"]);

    let empty_string = f
        .engine
        .query(by_field("k"), QueryOptions::new().startkey(""))
        .await
        .unwrap();
    assert_eq!(empty_string.ids(), vec!["s"]);
}

#[tokio::test]
async fn test_mixed_type_keys_collate() {
    let f = fixture();
    let keys = vec![
        json!({"a": 1}),
        json!(["a"]),
        json!("b"),
        json!("a"),
        json!(10),
        json!(2.5),
        json!(-1),
        json!(true),
        json!(false),
        json!(null),
    ];
    for (i, key) in keys.iter().enumerate() {
        f.source.put(json!({"_id": format!("doc_{i}"), "k": key})).unwrap();
    }

    let result = f.engine.query(by_field("k"), QueryOptions::new()).await.unwrap();
    let expected: Vec<&Value> = keys.iter().rev().collect();
    assert_eq!(result.keys(), expected);
}

#[tokio::test]
async fn test_date_string_keys_sort_chronologically() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "c", "date": "2024-03-01T10:00:00Z"}),
            json!({"_id": "a", "date": "2023-12-31T23:59:59Z"}),
            json!({"_id": "b", "date": "2024-01-15T08:30:00Z"}),
        ],
    );

    let result = f
        .engine
        .query(
            by_field("date"),
            QueryOptions::new().startkey("2024-01-01").endkey("2024-12-31"),
        )
        .await
        .unwrap();
    assert_eq!(result.ids(), vec!["b", "c"]);
}

#[tokio::test]
async fn test_missing_design_doc_and_view() {
    let f = fixture();
    let err = f
        .engine
        .query(ViewRef::named("nope", "v"), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));

    f.source
        .put(json!({"_id": "_design/app", "views": {}}))
        .unwrap();
    let err = f
        .engine
        .query(ViewRef::parse("app/v").unwrap(), QueryOptions::new())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "not_found: missing_named_view");
    assert!(f.provider.names().is_empty());
}

#[tokio::test]
async fn test_named_view_follows_changes() {
    let f = fixture();
    f.engine
        .registry()
        .register_map("tags", |doc: &Value, emit: &mut Emitter| {
            for tag in doc["tags"].as_array().into_iter().flatten() {
                emit.emit_key(tag.clone());
            }
            Ok(())
        });
    put_all(
        &f.source,
        vec![
            json!({"_id": "_design/app", "views": {"by_tag": {"map": "tags"}}}),
            json!({"_id": "a", "tags": ["x", "y"]}),
            json!({"_id": "b", "tags": ["y"]}),
        ],
    );
    let view = ViewRef::named("app", "by_tag");

    let first = f.engine.query(view.clone(), QueryOptions::new()).await.unwrap();
    assert_eq!(first.ids(), vec!["a", "a", "b"]);

    f.source.put(json!({"_id": "a", "tags": ["z"]})).unwrap();
    f.source.remove("b").unwrap();
    f.source.put(json!({"_id": "c", "tags": ["x"]})).unwrap();

    let second = f.engine.query(view.clone(), QueryOptions::new()).await.unwrap();
    let pairs: Vec<(&Value, &str)> = second
        .rows
        .iter()
        .map(|row| (&row.key, row.id.as_ref().unwrap().as_str()))
        .collect();
    assert_eq!(pairs, vec![(&json!("x"), "c"), (&json!("z"), "a")]);
    assert_eq!(second.total_rows, 2);

    // deleted documents leave nothing behind
    let handle = f.engine.open_view(&view).await.unwrap();
    let entry = handle.checkpoints().get(&DocId::new("b")).await.unwrap();
    assert!(entry.is_none());

    // a second pass with no changes touches nothing
    let before = handle
        .index()
        .range_scan(RangeRequest::default().include_docs(true))
        .await
        .unwrap();
    let summary = f.engine.update(&view).await.unwrap();
    assert!(summary.is_noop());
    assert_eq!(summary.docs_indexed, 0);
    let after = handle
        .index()
        .range_scan(RangeRequest::default().include_docs(true))
        .await
        .unwrap();
    assert_eq!(before, after);

    let metrics = f.engine.metrics();
    assert_eq!(metrics.docs_removed, 1);
    assert_eq!(metrics.docs_indexed, 4);
}

#[tokio::test]
async fn test_joined_documents_and_include_docs() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "target", "title": "joined"}),
            json!({"_id": "a", "ref": "target"}),
            json!({"_id": "b", "ref": "gone"}),
        ],
    );
    let view = ViewDefinition::new(|doc: &Value, emit: &mut Emitter| {
        if let Some(reference) = doc.get("ref") {
            emit.emit(doc["_id"].clone(), json!({"_id": reference}));
        }
        Ok(())
    });

    let with_docs = f
        .engine
        .query(view.clone(), QueryOptions::new().include_docs(true))
        .await
        .unwrap();
    assert_eq!(with_docs.rows[0].doc.as_ref().unwrap()["title"], json!("joined"));
    assert_eq!(with_docs.rows[1].doc.as_ref().unwrap()["_id"], json!("b"));

    let without_docs = f.engine.query(view, QueryOptions::new()).await.unwrap();
    assert_eq!(without_docs.rows.len(), 2);
    assert!(without_docs.rows.iter().all(|row| row.doc.is_none()));
}

#[tokio::test]
async fn test_builtin_reducers() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "a", "key": "k", "n": 1}),
            json!({"_id": "b", "key": "k", "n": 2}),
            json!({"_id": "c", "key": "k", "n": 3}),
        ],
    );

    let count = f
        .engine
        .query(key_and_number().with_reduce(BuiltinReduce::Count), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(rows(&count), vec![(json!("k"), json!(3))]);
    assert!(count.rows[0].id.is_none());

    let sum = f
        .engine
        .query(key_and_number().with_reduce(BuiltinReduce::Sum), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(rows(&sum), vec![(json!("k"), json!(6))]);

    let stats = f
        .engine
        .query(key_and_number().with_reduce(BuiltinReduce::Stats), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(
        stats.rows[0].value,
        json!({"sum": 6, "min": 1, "max": 3, "count": 3, "sumsqr": 14})
    );

    let unreduced = f
        .engine
        .query(
            key_and_number().with_reduce(BuiltinReduce::Sum),
            QueryOptions::new().reduce(false),
        )
        .await
        .unwrap();
    assert_eq!(unreduced.ids(), vec!["a", "b", "c"]);
    assert!(f.provider.names().is_empty());
}

#[tokio::test]
async fn test_stats_rejects_non_numbers() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "a", "key": "k", "n": 1}),
            json!({"_id": "b", "key": "k", "n": "x"}),
        ],
    );

    let err = f
        .engine
        .query(key_and_number().with_reduce(BuiltinReduce::Stats), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidValue(_)));
    assert_eq!(
        err.to_string(),
        "invalid_value: builtin _stats function requires map values to be numbers"
    );
    assert!(f.provider.names().is_empty());
}

#[tokio::test]
async fn test_grouping_levels() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "a", "key": [2024, 1, 5], "n": 10}),
            json!({"_id": "b", "key": [2024, 1, 9], "n": 5}),
            json!({"_id": "c", "key": [2024, 2, 1], "n": 1}),
        ],
    );
    let view = key_and_number().with_reduce(BuiltinReduce::Sum);

    let exact = f.engine.query(view.clone(), QueryOptions::new()).await.unwrap();
    assert_eq!(exact.rows.len(), 3);

    let by_month = f
        .engine
        .query(view.clone(), QueryOptions::new().group_level(2))
        .await
        .unwrap();
    assert_eq!(
        rows(&by_month),
        vec![(json!([2024, 1]), json!(15)), (json!([2024, 2]), json!(1))]
    );

    let by_year = f
        .engine
        .query(view.clone(), QueryOptions::new().group_level(1))
        .await
        .unwrap();
    assert_eq!(rows(&by_year), vec![(json!([2024]), json!(16))]);

    let total = f
        .engine
        .query(view, QueryOptions::new().group(false))
        .await
        .unwrap();
    assert_eq!(rows(&total), vec![(Value::Null, json!(16))]);
}

#[tokio::test]
async fn test_pagination() {
    let f = fixture();
    for (i, key) in ["a", "a", "b", "c", "d"].iter().enumerate() {
        f.source
            .put(json!({"_id": format!("doc_{i}"), "key": key, "n": 1}))
            .unwrap();
    }

    let page = f
        .engine
        .query(key_and_number(), QueryOptions::new().skip(1).limit(2))
        .await
        .unwrap();
    assert_eq!(page.total_rows, 5);
    assert_eq!(page.offset, 1);
    assert_eq!(page.ids(), vec!["doc_1", "doc_2"]);

    // paging applies to groups, never to the rows feeding them
    let groups = f
        .engine
        .query(
            key_and_number().with_reduce(BuiltinReduce::Count),
            QueryOptions::new().skip(0).limit(1),
        )
        .await
        .unwrap();
    assert_eq!(rows(&groups), vec![(json!("a"), json!(2))]);
    assert_eq!(groups.total_rows, 4);

    let groups = f
        .engine
        .query(
            key_and_number().with_reduce(BuiltinReduce::Count),
            QueryOptions::new().skip(1).limit(2),
        )
        .await
        .unwrap();
    assert_eq!(
        rows(&groups),
        vec![(json!("b"), json!(1)), (json!("c"), json!(1))]
    );
    assert_eq!(groups.offset, 1);
}

#[tokio::test]
async fn test_reduce_requires_reduce_function() {
    let f = fixture();
    f.source.put(json!({"_id": "a", "key": "k", "n": 1})).unwrap();
    let err = f
        .engine
        .query(key_and_number(), QueryOptions::new().reduce(true))
        .await
        .unwrap_err();
    assert_eq!(err.name(), "invalid_request");
}

#[tokio::test]
async fn test_custom_reduce() {
    let f = fixture();
    put_all(
        &f.source,
        vec![
            json!({"_id": "a", "key": "k", "n": 4}),
            json!({"_id": "b", "key": "k", "n": 9}),
        ],
    );

    let max = Reduce::custom(|_: &[(Value, DocId)], values: &[Value], _: bool| {
        Ok(json!(values.iter().filter_map(Value::as_i64).max()))
    });
    let result = f
        .engine
        .query(key_and_number().with_reduce(max), QueryOptions::new())
        .await
        .unwrap();
    assert_eq!(rows(&result), vec![(json!("k"), json!(9))]);

    let failing = Reduce::custom(|_: &[(Value, DocId)], _: &[Value], _: bool| Err("no".into()));
    let err = f
        .engine
        .query(key_and_number().with_reduce(failing), QueryOptions::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ReduceFunction { .. }));
    assert!(f.provider.names().is_empty());
}

#[tokio::test]
async fn test_map_errors_propagate_and_clean_up() {
    let f = fixture();
    put_all(
        &f.source,
        vec![json!({"_id": "a", "ok": true}), json!({"_id": "b"})],
    );
    let view = ViewDefinition::new(|doc: &Value, emit: &mut Emitter| {
        if doc.get("ok").is_none() {
            return Err(format!("{} is not ok", doc["_id"]).into());
        }
        emit.emit_key(doc["_id"].clone());
        Ok(())
    });

    let err = f.engine.query(view, QueryOptions::new()).await.unwrap_err();
    match err {
        Error::MapFunction { doc_id, source } => {
            assert_eq!(doc_id.as_str(), "b");
            assert_eq!(source.to_string(), "\"b\" is not ok");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(f.provider.names().is_empty());
}

/// Source whose change feed never completes
struct StallingStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl DocumentStore for StallingStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, id: &DocId) -> StoreResult<Option<Value>> {
        self.inner.get(id).await
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>> {
        self.inner.bulk_write(ops).await
    }

    async fn range_scan(&self, request: RangeRequest) -> StoreResult<RangeResponse> {
        self.inner.range_scan(request).await
    }

    fn changes(&self, _since: Seq, _options: ChangesOptions) -> ChangeStream {
        stream::pending().boxed()
    }
}

#[tokio::test]
async fn test_temp_view_cleanup_on_cancellation() {
    init_tracing();
    let inner = Arc::new(MemoryStore::new("db"));
    inner.put(json!({"_id": "a", "k": 1})).unwrap();
    let provider = Arc::new(MemoryStoreProvider::new());
    let engine = ViewEngine::new(Arc::new(StallingStore { inner }), provider.clone());

    let query = engine.query(by_field("k"), QueryOptions::new());
    let outcome = tokio::time::timeout(Duration::from_millis(50), query).await;
    assert!(outcome.is_err());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(provider.names().is_empty());
}

/// Source whose change feed fails while `failing` is set
struct FlakyStore {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
}

#[async_trait]
impl DocumentStore for FlakyStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, id: &DocId) -> StoreResult<Option<Value>> {
        self.inner.get(id).await
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>> {
        self.inner.bulk_write(ops).await
    }

    async fn range_scan(&self, request: RangeRequest) -> StoreResult<RangeResponse> {
        self.inner.range_scan(request).await
    }

    fn changes(&self, since: Seq, options: ChangesOptions) -> ChangeStream {
        if !self.failing.load(Ordering::SeqCst) {
            return self.inner.changes(since, options);
        }
        let mut events: Vec<StoreResult<ChangeEvent>> = Vec::new();
        let mut healthy = futures::executor::block_on_stream(self.inner.changes(since, options));
        if let Some(first) = healthy.next() {
            events.push(first);
        }
        events.push(Err(StoreError::Unavailable("feed interrupted".to_string())));
        stream::iter(events).boxed()
    }
}

#[tokio::test]
async fn test_feed_failure_does_not_advance_marker() {
    init_tracing();
    let inner = Arc::new(MemoryStore::new("db"));
    put_all(
        &inner,
        vec![
            json!({"_id": "_design/app", "views": {"v": {"map": "k"}}}),
            json!({"_id": "a", "k": 1}),
            json!({"_id": "b", "k": 2}),
        ],
    );
    let source = Arc::new(FlakyStore {
        inner,
        failing: AtomicBool::new(true),
    });
    let provider = Arc::new(MemoryStoreProvider::new());
    let engine = ViewEngine::new(source.clone(), provider);
    engine
        .registry()
        .register_map("k", |doc: &Value, emit: &mut Emitter| {
            emit.emit_key(doc["k"].clone());
            Ok(())
        });
    let view = ViewRef::named("app", "v");

    let err = engine.query(view.clone(), QueryOptions::new()).await.unwrap_err();
    assert!(matches!(err, Error::Store(StoreError::Unavailable(_))));

    let handle = engine.open_view(&view).await.unwrap();
    let marker = handle
        .checkpoints()
        .get(&DocId::new(SEQUENCE_MARKER_ID))
        .await
        .unwrap();
    assert!(marker.is_none());

    source.failing.store(false, Ordering::SeqCst);
    let result = engine.query(view, QueryOptions::new()).await.unwrap();
    assert_eq!(result.ids(), vec!["a", "b"]);
}

/// Fails one checkpoint write touching `target`, after `skip` such writes succeed
struct WriteFault {
    target: DocId,
    skip: AtomicUsize,
    armed: AtomicBool,
}

impl WriteFault {
    fn new(target: &str) -> Self {
        WriteFault {
            target: DocId::new(target),
            skip: AtomicUsize::new(0),
            armed: AtomicBool::new(false),
        }
    }

    fn arm(&self, skip: usize) {
        self.skip.store(skip, Ordering::SeqCst);
        self.armed.store(true, Ordering::SeqCst);
    }

    fn trips(&self, ops: &[WriteOp]) -> bool {
        if !ops.iter().any(|op| op.id().as_ref() == Some(&self.target)) {
            return false;
        }
        if !self.armed.load(Ordering::SeqCst) {
            return false;
        }
        if self.skip.load(Ordering::SeqCst) > 0 {
            self.skip.fetch_sub(1, Ordering::SeqCst);
            return false;
        }
        self.armed.store(false, Ordering::SeqCst);
        true
    }
}

struct FaultyCheckpoints {
    inner: Arc<dyn DocumentStore>,
    fault: Arc<WriteFault>,
}

#[async_trait]
impl DocumentStore for FaultyCheckpoints {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, id: &DocId) -> StoreResult<Option<Value>> {
        self.inner.get(id).await
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>> {
        if self.fault.trips(&ops) {
            return Err(StoreError::Unavailable("checkpoint write failed".to_string()));
        }
        self.inner.bulk_write(ops).await
    }

    async fn range_scan(&self, request: RangeRequest) -> StoreResult<RangeResponse> {
        self.inner.range_scan(request).await
    }

    fn changes(&self, since: Seq, options: ChangesOptions) -> ChangeStream {
        self.inner.changes(since, options)
    }
}

/// Provider whose checkpoint stores are subject to `fault`
struct FaultyProvider {
    inner: MemoryStoreProvider,
    fault: Arc<WriteFault>,
}

#[async_trait]
impl StoreProvider for FaultyProvider {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn DocumentStore>> {
        let store = self.inner.open(name).await?;
        if !name.ends_with("-checkpoints") {
            return Ok(store);
        }
        Ok(Arc::new(FaultyCheckpoints {
            inner: store,
            fault: self.fault.clone(),
        }))
    }

    async fn destroy(&self, name: &str) -> StoreResult<()> {
        self.inner.destroy(name).await
    }

    async fn exists(&self, name: &str) -> StoreResult<bool> {
        self.inner.exists(name).await
    }
}

#[tokio::test]
async fn test_failed_checkpoint_write_is_safe_to_retry() {
    init_tracing();
    // 0 fails the write widening the entry, 1 the write shrinking it
    for skip in [0, 1] {
        let source = Arc::new(MemoryStore::new("db"));
        let fault = Arc::new(WriteFault::new("a"));
        let provider = Arc::new(FaultyProvider {
            inner: MemoryStoreProvider::new(),
            fault: fault.clone(),
        });
        let engine = ViewEngine::new(source.clone(), provider);
        engine
            .registry()
            .register_map("k", |doc: &Value, emit: &mut Emitter| {
                emit.emit_key(doc["k"].clone());
                Ok(())
            });
        put_all(
            &source,
            vec![
                json!({"_id": "_design/app", "views": {"v": {"map": "k"}}}),
                json!({"_id": "a", "k": 1}),
            ],
        );
        let view = ViewRef::named("app", "v");
        engine.query(view.clone(), QueryOptions::new()).await.unwrap();

        let handle = engine.open_view(&view).await.unwrap();
        let marker_id = DocId::new(SEQUENCE_MARKER_ID);
        let marker = handle.checkpoints().get(&marker_id).await.unwrap();
        assert!(marker.is_some());

        fault.arm(skip);
        source.put(json!({"_id": "a", "k": 2})).unwrap();
        let err = engine.query(view.clone(), QueryOptions::new()).await.unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Unavailable(_))), "skip {skip}");
        assert_eq!(handle.checkpoints().get(&marker_id).await.unwrap(), marker);

        // the document moves on before the retry
        source.put(json!({"_id": "a", "k": 3})).unwrap();
        let result = engine.query(view.clone(), QueryOptions::new()).await.unwrap();
        assert_eq!(rows(&result), vec![(json!(3), Value::Null)], "skip {skip}");

        let index = handle.index().range_scan(RangeRequest::default()).await.unwrap();
        assert_eq!(index.rows.len(), 1, "skip {skip}");
        let entry = handle.checkpoints().get(&DocId::new("a")).await.unwrap().unwrap();
        assert_eq!(entry["keys"].as_array().map(Vec::len), Some(1));
    }
}

#[tokio::test]
async fn test_concurrent_queries_on_named_view_are_serialized() {
    let f = fixture();
    f.engine
        .registry()
        .register_map("k", |doc: &Value, emit: &mut Emitter| {
            emit.emit_key(doc["k"].clone());
            Ok(())
        });
    f.source
        .put(json!({"_id": "_design/app", "views": {"v": {"map": "k"}}}))
        .unwrap();
    for i in 0..20 {
        f.source.put(json!({"_id": format!("doc_{i:02}"), "k": i})).unwrap();
    }

    let queries = (0..8).map(|_| f.engine.query(ViewRef::named("app", "v"), QueryOptions::new()));
    let results = futures::future::join_all(queries).await;

    for result in results {
        let result = result.unwrap();
        assert_eq!(result.rows.len(), 20);
    }
    let metrics = f.engine.metrics();
    assert_eq!(metrics.sweeps, 8);
    assert_eq!(metrics.docs_indexed, 20);
}

/// Transport recording requests and answering with a canned response
struct MockTransport {
    requests: Mutex<Vec<RemoteRequest>>,
    response: Value,
}

#[async_trait]
impl RemoteTransport for MockTransport {
    async fn request(&self, request: RemoteRequest) -> StoreResult<Value> {
        self.requests.lock().unwrap().push(request);
        Ok(self.response.clone())
    }
}

struct RemoteStore {
    inner: MemoryStore,
    transport: Arc<MockTransport>,
}

#[async_trait]
impl DocumentStore for RemoteStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn transport(&self) -> Transport {
        Transport::Remote(self.transport.clone())
    }

    async fn get(&self, id: &DocId) -> StoreResult<Option<Value>> {
        self.inner.get(id).await
    }

    async fn bulk_write(&self, ops: Vec<WriteOp>) -> StoreResult<Vec<WriteOutcome>> {
        self.inner.bulk_write(ops).await
    }

    async fn range_scan(&self, request: RangeRequest) -> StoreResult<RangeResponse> {
        self.inner.range_scan(request).await
    }

    fn changes(&self, since: Seq, options: ChangesOptions) -> ChangeStream {
        self.inner.changes(since, options)
    }
}

#[tokio::test]
async fn test_remote_stores_answer_queries_themselves() {
    init_tracing();
    let response = json!({
        "total_rows": 1,
        "offset": 0,
        "rows": [{"id": "a", "key": "x", "value": null}]
    });
    let transport = Arc::new(MockTransport {
        requests: Mutex::new(Vec::new()),
        response: response.clone(),
    });
    let source = Arc::new(RemoteStore {
        inner: MemoryStore::new("remote"),
        transport: transport.clone(),
    });
    let provider = Arc::new(MemoryStoreProvider::new());
    let engine = ViewEngine::new(source, provider.clone());

    let result = engine
        .query(ViewRef::named("app", "v"), QueryOptions::new().key("x"))
        .await
        .unwrap();
    assert_eq!(serde_json::to_value(&result).unwrap(), response);
    assert!(provider.names().is_empty());

    let inline = by_field("k").with_source("function (doc) { emit(doc.k); }", None);
    engine.query(inline, QueryOptions::new()).await.unwrap();

    let err = engine.query(by_field("k"), QueryOptions::new()).await.unwrap_err();
    assert_eq!(err.name(), "invalid_request");

    let requests = transport.requests.lock().unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].path, "_design/app/_view/v");
    assert_eq!(requests[0].params, vec![("key".to_string(), "\"x\"".to_string())]);
    assert_eq!(requests[1].path, "_temp_view");
    assert_eq!(
        requests[1].body,
        Some(json!({"map": "function (doc) { emit(doc.k); }"}))
    );
}
