//! Integration tests for the driver against the memory backend.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod common;

use std::sync::Arc;

use common::{collect, collect_ints, connect, driver, ingest, int_batch, query};
use datafusion::arrow::array::{
    Array, ArrayRef, BooleanArray, Date32Array, Decimal128Array, Float64Array, Int16Array,
    Int32Array, Int64Array, Int8Array, ListArray, RecordBatch, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray,
};
use datafusion::arrow::datatypes::{DataType, Field, Int32Type, Schema, TimeUnit};
use sail_adbc::codec::batch_body_length;
use sail_adbc::{Driver, DriverConfig, DriverErrorKind, IngestMode, PartitionDescriptor};
use sail_adbc_memory::MemoryBackend;

/// Tests the basic ingest-then-query flow.
///
/// - Ingesting three rows reports three rows inserted
/// - Querying the table returns the rows with the ingested column type
/// - The stream reports no more data once exhausted, and keeps doing so
#[tokio::test]
async fn test_ingest_then_query() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;

    let count = ingest(
        &connection,
        "t",
        IngestMode::Create,
        int_batch(vec![1, 2, 3]),
    )
    .await
    .unwrap();
    assert_eq!(count, Some(3));

    let mut stream = query(&connection, "SELECT * FROM t").await.unwrap();
    assert_eq!(
        stream.schema().as_ref(),
        &Schema::new(vec![Field::new("a", DataType::Int32, false)])
    );
    assert_eq!(collect_ints(&mut stream).await, vec![1, 2, 3]);
    assert!(!stream.load_next_batch().await.unwrap());
    assert!(!stream.load_next_batch().await.unwrap());
}

/// Tests that column names, order, nullability, and values survive a round trip.
///
/// - Narrow integers are widened to the smallest backend integer type
/// - Timestamps come back in microseconds in the session time zone
#[tokio::test]
async fn test_round_trip_types() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://types").await;

    let input = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("small", DataType::Int8, true),
            Field::new("big", DataType::Int64, false),
            Field::new("ratio", DataType::Float64, true),
            Field::new("label", DataType::Utf8, true),
            Field::new("flag", DataType::Boolean, false),
            Field::new("day", DataType::Date32, false),
            Field::new(
                "at",
                DataType::Timestamp(TimeUnit::Millisecond, None),
                false,
            ),
            Field::new("amount", DataType::Decimal128(10, 2), true),
        ])),
        vec![
            Arc::new(Int8Array::from(vec![Some(1), Some(-2), None])) as ArrayRef,
            Arc::new(Int64Array::from(vec![10, 20, 30])),
            Arc::new(Float64Array::from(vec![Some(0.5), Some(1.5), None])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            Arc::new(BooleanArray::from(vec![true, false, true])),
            Arc::new(Date32Array::from(vec![0, 1, 19000])),
            Arc::new(TimestampMillisecondArray::from(vec![0, 1_000, 86_400_000])),
            Arc::new(
                Decimal128Array::from(vec![Some(12345), None, Some(-1)])
                    .with_precision_and_scale(10, 2)
                    .unwrap(),
            ),
        ],
    )
    .unwrap();
    let count = ingest(&connection, "mixed", IngestMode::Create, input)
        .await
        .unwrap();
    assert_eq!(count, Some(3));

    let expected = RecordBatch::try_new(
        Arc::new(Schema::new(vec![
            Field::new("small", DataType::Int16, true),
            Field::new("big", DataType::Int64, false),
            Field::new("ratio", DataType::Float64, true),
            Field::new("label", DataType::Utf8, true),
            Field::new("flag", DataType::Boolean, false),
            Field::new("day", DataType::Date32, false),
            Field::new(
                "at",
                DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
                false,
            ),
            Field::new("amount", DataType::Decimal128(10, 2), true),
        ])),
        vec![
            Arc::new(Int16Array::from(vec![Some(1), Some(-2), None])) as ArrayRef,
            Arc::new(Int64Array::from(vec![10, 20, 30])),
            Arc::new(Float64Array::from(vec![Some(0.5), Some(1.5), None])),
            Arc::new(StringArray::from(vec![Some("a"), None, Some("c")])),
            Arc::new(BooleanArray::from(vec![true, false, true])),
            Arc::new(Date32Array::from(vec![0, 1, 19000])),
            Arc::new(
                TimestampMicrosecondArray::from(vec![0, 1_000_000, 86_400_000_000])
                    .with_timezone("UTC"),
            ),
            Arc::new(
                Decimal128Array::from(vec![Some(12345), None, Some(-1)])
                    .with_precision_and_scale(10, 2)
                    .unwrap(),
            ),
        ],
    )
    .unwrap();

    let mut stream = query(&connection, "SELECT * FROM mixed ORDER BY big")
        .await
        .unwrap();
    let batches = collect(&mut stream).await;
    assert_eq!(batches, vec![expected]);
}

/// Tests that result timestamps use the configured session time zone.
#[tokio::test]
async fn test_session_time_zone() {
    let mut config = DriverConfig::default();
    config.session_time_zone = "Asia/Tokyo".to_string();
    let driver = Driver::new(Arc::new(MemoryBackend::new()), config).unwrap();
    let connection = connect(&driver, "mem://tz").await;

    let column = TimestampMicrosecondArray::from(vec![0]);
    let column = column.with_timezone("UTC");
    let input = RecordBatch::try_new(
        Arc::new(Schema::new(vec![Field::new(
            "at",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            false,
        )])),
        vec![Arc::new(column) as ArrayRef],
    )
    .unwrap();
    ingest(&connection, "events", IngestMode::Create, input)
        .await
        .unwrap();

    let mut stream = query(&connection, "SELECT at FROM events").await.unwrap();
    assert_eq!(
        stream.schema().field(0).data_type(),
        &DataType::Timestamp(TimeUnit::Microsecond, Some("Asia/Tokyo".into()))
    );
    let batches = collect(&mut stream).await;
    let column = batches[0]
        .column(0)
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .unwrap();
    assert_eq!(column.value(0), 0);
}

/// Tests that a nested column is rejected and no table is created.
#[tokio::test]
async fn test_nested_type_rejected() {
    let backend = MemoryBackend::new();
    let driver = driver(backend.clone());
    let connection = connect(&driver, "mem://nested").await;

    let list = ListArray::from_iter_primitive::<Int32Type, _, _>(vec![Some(vec![Some(1)])]);
    let field = Field::new("items", list.data_type().clone(), true);
    let schema = Arc::new(Schema::new(vec![field]));
    let batch = RecordBatch::try_new(schema, vec![Arc::new(list) as ArrayRef]).unwrap();

    let error = ingest(&connection, "t", IngestMode::Create, batch)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::UnsupportedType);
    assert!(backend.database("nested").unwrap().table_names().is_empty());

    let error = query(&connection, "SELECT * FROM t").await.unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::ExecutionError);
}

/// Tests statement preconditions.
///
/// - `execute` with neither a query nor an ingest target fails with invalid state
/// - Ingestion without a bound batch fails with invalid state
#[tokio::test]
async fn test_execute_preconditions() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    let mut statement = connection.new_statement().unwrap();

    let error = statement.execute().await.unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::InvalidState);

    statement.set_ingest_target("t").unwrap();
    let error = statement.execute().await.unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::InvalidState);
}

/// Tests that closing statements, streams, and connections twice succeeds.
#[tokio::test]
async fn test_close_is_idempotent() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(&connection, "t", IngestMode::Create, int_batch(vec![1]))
        .await
        .unwrap();

    let mut statement = connection.new_statement().unwrap();
    statement.set_query("SELECT a FROM t").unwrap();
    statement.execute().await.unwrap();
    let mut stream = statement.get_result_stream().unwrap();

    stream.close().unwrap();
    stream.close().unwrap();
    statement.close().unwrap();
    statement.close().unwrap();
    connection.close().await.unwrap();
    connection.close().await.unwrap();
}

/// Tests that `bytes_read` grows with every batch by the size of its buffers.
#[tokio::test]
async fn test_bytes_read() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(
        &connection,
        "t",
        IngestMode::Create,
        int_batch((0..3000).collect()),
    )
    .await
    .unwrap();

    let mut stream = query(&connection, "SELECT a FROM t").await.unwrap();
    assert_eq!(stream.bytes_read(), 0);
    let mut total = 0;
    let mut rows = 0;
    while stream.load_next_batch().await.unwrap() {
        let batch = stream.current_batch().unwrap();
        assert!(batch.num_rows() <= 1024);
        rows += batch.num_rows();
        total += batch_body_length(batch) as u64;
        assert_eq!(stream.bytes_read(), total);
    }
    assert_eq!(rows, 3000);
    assert_eq!(stream.bytes_read(), total);
}

/// Tests that the result order follows the query.
#[tokio::test]
async fn test_order_by() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(
        &connection,
        "t",
        IngestMode::Create,
        int_batch(vec![3, 1, 2]),
    )
    .await
    .unwrap();

    let mut stream = query(&connection, "SELECT a FROM t ORDER BY a DESC")
        .await
        .unwrap();
    assert_eq!(collect_ints(&mut stream).await, vec![3, 2, 1]);
}

/// Tests each ingest mode against existing and missing tables.
///
/// - `create` fails if the table exists
/// - `create_append` creates the table once and appends afterward
/// - `append` fails if the table does not exist
#[tokio::test]
async fn test_ingest_modes() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;

    ingest(&connection, "t", IngestMode::Create, int_batch(vec![1]))
        .await
        .unwrap();
    let error = ingest(&connection, "t", IngestMode::Create, int_batch(vec![2]))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::ExecutionError);

    let error = ingest(
        &connection,
        "missing",
        IngestMode::Append,
        int_batch(vec![1]),
    )
    .await
    .unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::ExecutionError);

    for values in [vec![1, 2], vec![3]] {
        ingest(
            &connection,
            "u",
            IngestMode::CreateAppend,
            int_batch(values),
        )
        .await
        .unwrap();
    }
    ingest(&connection, "u", IngestMode::Append, int_batch(vec![4]))
        .await
        .unwrap();
    let mut stream = query(&connection, "SELECT a FROM u ORDER BY a")
        .await
        .unwrap();
    assert_eq!(collect_ints(&mut stream).await, vec![1, 2, 3, 4]);
}

/// Tests that a null in a non-nullable column reports the offending row.
#[tokio::test]
async fn test_ingest_null_into_required_column() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(&connection, "t", IngestMode::Create, int_batch(vec![1]))
        .await
        .unwrap();

    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, true)]));
    let batch = RecordBatch::try_new(
        schema,
        vec![Arc::new(Int32Array::from(vec![Some(2), None])) as ArrayRef],
    )
    .unwrap();
    let error = ingest(&connection, "t", IngestMode::Append, batch)
        .await
        .unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::ExecutionError);
    assert_eq!(error.row(), Some(1));

    let mut stream = query(&connection, "SELECT a FROM t").await.unwrap();
    assert_eq!(collect_ints(&mut stream).await, vec![1]);
}

/// Tests partitioned execution.
///
/// - Every partition can be read by any connection to the same backend
/// - Descriptors survive a round trip through their byte encoding
/// - The partitions together cover the whole result
#[tokio::test]
async fn test_partitions() {
    let driver = driver(MemoryBackend::new().with_target_partitions(4));
    let connection = connect(&driver, "mem://parts").await;
    for values in [vec![1, 2, 3], vec![4, 5], vec![6, 7, 8, 9]] {
        ingest(
            &connection,
            "t",
            IngestMode::CreateAppend,
            int_batch(values),
        )
        .await
        .unwrap();
    }

    let mut statement = connection.new_statement().unwrap();
    statement.set_query("SELECT a FROM t WHERE a > 2").unwrap();
    let result = statement.execute_partitions().await.unwrap();
    assert_eq!(result.schema.field(0).data_type(), &DataType::Int32);
    assert!(!result.partitions.is_empty());

    let reader = connect(&driver, "mem://other").await;
    let mut values = vec![];
    for partition in &result.partitions {
        assert!(partition
            .friendly_name()
            .is_some_and(|name| name.starts_with("parts/")));
        let bytes = partition.to_bytes().unwrap();
        let partition = PartitionDescriptor::from_bytes(&bytes).unwrap();
        let mut stream = reader.read_partition(&partition).await.unwrap();
        values.extend(collect_ints(&mut stream).await);
    }
    values.sort();
    assert_eq!(values, vec![3, 4, 5, 6, 7, 8, 9]);

    let error = reader
        .read_partition(&PartitionDescriptor::new(None, b"garbage".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::InvalidState);
}

/// Tests that closing a connection revokes its statements and result streams.
#[tokio::test]
async fn test_connection_close_revokes() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(&connection, "t", IngestMode::Create, int_batch(vec![1, 2]))
        .await
        .unwrap();

    let mut statement = connection.new_statement().unwrap();
    statement.set_query("SELECT a FROM t").unwrap();
    statement.execute().await.unwrap();
    let mut stream = statement.get_result_stream().unwrap();
    connection.close().await.unwrap();

    let error = stream.load_next_batch().await.unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::InvalidState);
    let error = statement.execute().await.unwrap_err();
    assert_eq!(error.kind(), DriverErrorKind::InvalidState);

    let other = connect(&driver, "mem://test").await;
    let mut stream = query(&other, "SELECT a FROM t ORDER BY a").await.unwrap();
    assert_eq!(collect_ints(&mut stream).await, vec![1, 2]);
}

/// Tests that each row of a bound batch runs the query once, in row order.
#[tokio::test]
async fn test_query_parameters() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(
        &connection,
        "t",
        IngestMode::Create,
        int_batch(vec![1, 2, 3, 4, 5]),
    )
    .await
    .unwrap();

    let mut statement = connection.new_statement().unwrap();
    statement
        .set_query("SELECT a FROM t WHERE a > $1 ORDER BY a")
        .unwrap();
    statement.bind(int_batch(vec![3])).unwrap();
    statement.execute().await.unwrap();
    let mut stream = statement.get_result_stream().unwrap();
    assert_eq!(collect_ints(&mut stream).await, vec![4, 5]);

    statement.bind(int_batch(vec![1, 3])).unwrap();
    statement.execute().await.unwrap();
    let mut stream = statement.get_result_stream().unwrap();
    assert_eq!(collect_ints(&mut stream).await, vec![2, 3, 4, 5, 4, 5]);
}

/// Tests that an empty bound batch gives an empty result with the query columns.
#[tokio::test]
async fn test_query_with_empty_parameters() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(&connection, "t", IngestMode::Create, int_batch(vec![1, 2]))
        .await
        .unwrap();

    let mut statement = connection.new_statement().unwrap();
    for sql in ["SELECT a FROM t WHERE a > $1", "SELECT a FROM t"] {
        statement.set_query(sql).unwrap();
        statement.bind(int_batch(vec![])).unwrap();
        statement.execute().await.unwrap();
        let mut stream = statement.get_result_stream().unwrap();
        assert_eq!(stream.schema().field(0).name(), "a");
        assert_eq!(stream.schema().field(0).data_type(), &DataType::Int32);
        assert!(collect_ints(&mut stream).await.is_empty());
    }
}

/// Tests that only read-only queries are accepted in query mode.
#[tokio::test]
async fn test_statements_other_than_queries_rejected() {
    let driver = driver(MemoryBackend::new());
    let connection = connect(&driver, "mem://test").await;
    ingest(&connection, "t", IngestMode::Create, int_batch(vec![1]))
        .await
        .unwrap();

    for sql in [
        "CREATE TABLE x (a INT)",
        "INSERT INTO t VALUES (2)",
        "SELEC 1",
    ] {
        let error = query(&connection, sql).await.unwrap_err();
        assert_eq!(error.kind(), DriverErrorKind::ExecutionError);
    }
}

/// Tests that the memory backend rejects malformed targets and unknown options.
#[tokio::test]
async fn test_open_errors() {
    let driver = driver(MemoryBackend::new());
    for options in [
        vec![("target", "mem://")],
        vec![("target", "postgres://localhost")],
        vec![("target", "mem://test"), ("mem.color", "blue")],
        vec![("target", "mem://test"), ("mem.target_partitions", "many")],
    ] {
        let error = driver.open(options).await.unwrap_err();
        assert_eq!(error.kind(), DriverErrorKind::ConnectionError);
    }
    let connection = driver
        .open([("target", "mem://test"), ("mem.target_partitions", "2")])
        .await
        .unwrap();
    assert!(!connection.is_closed());
}
