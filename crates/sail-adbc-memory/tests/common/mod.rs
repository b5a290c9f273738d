//! Shared test utilities for memory backend integration tests.

use std::sync::Arc;

use datafusion::arrow::array::{AsArray, Int32Array, RecordBatch};
use datafusion::arrow::datatypes::{DataType, Field, Int32Type, Schema};
use sail_adbc::{Connection, Driver, DriverConfig, DriverResult, IngestMode, ResultStream};
use sail_adbc_memory::MemoryBackend;

pub fn driver(backend: MemoryBackend) -> Driver {
    Driver::new(Arc::new(backend), DriverConfig::default()).unwrap()
}

pub async fn connect(driver: &Driver, target: &str) -> Connection {
    driver.open([("target", target)]).await.unwrap()
}

/// Helper to create a batch with a single non-nullable integer column `a`.
pub fn int_batch(values: Vec<i32>) -> RecordBatch {
    let schema = Arc::new(Schema::new(vec![Field::new("a", DataType::Int32, false)]));
    RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
}

pub async fn ingest(
    connection: &Connection,
    table: &str,
    mode: IngestMode,
    batch: RecordBatch,
) -> DriverResult<Option<u64>> {
    let mut statement = connection.new_statement()?;
    statement.set_ingest_target(table)?;
    statement.set_option("ingest.mode", &mode.to_string())?;
    statement.bind(batch)?;
    statement.execute().await
}

pub async fn query(connection: &Connection, sql: &str) -> DriverResult<ResultStream> {
    let mut statement = connection.new_statement()?;
    statement.set_query(sql)?;
    statement.execute().await?;
    statement.get_result_stream()
}

/// Reads all batches left in a stream.
pub async fn collect(stream: &mut ResultStream) -> Vec<RecordBatch> {
    let mut batches = vec![];
    while stream.load_next_batch().await.unwrap() {
        batches.push(stream.current_batch().cloned().unwrap());
    }
    batches
}

/// Reads the first column of every batch left in a stream as integers.
#[allow(dead_code)]
pub async fn collect_ints(stream: &mut ResultStream) -> Vec<i32> {
    collect(stream)
        .await
        .iter()
        .flat_map(|b| b.column(0).as_primitive::<Int32Type>().values().to_vec())
        .collect()
}
