//! A backend that records every call it receives.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use arrow::array::{Array, Int32Array, RecordBatch};
use arrow::datatypes::{DataType, Field, Schema};
use async_trait::async_trait;
use sail_adbc::types::{ColumnMetadata, Row, SqlType, SqlValue};
use sail_adbc::{
    BackendCursor, BackendSession, ConnectionOptions, Driver, DriverConfig, DriverError,
    DriverResult, PartitionDescriptor, PartitionedQuery, TableDefinition, TabularBackend,
};

pub type CallLog = Arc<Mutex<Vec<String>>>;

#[derive(Default)]
pub struct RecordingBackend {
    log: CallLog,
}

fn record(log: &CallLog, call: impl Into<String>) {
    log.lock().unwrap().push(call.into());
}

fn value_columns() -> Vec<ColumnMetadata> {
    vec![ColumnMetadata::new("value", SqlType::Integer, true)]
}

#[async_trait]
impl TabularBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn validate_target(&self, target: &str) -> DriverResult<()> {
        if target.starts_with("rec://") {
            Ok(())
        } else {
            Err(DriverError::connection(format!("invalid target: {target}")))
        }
    }

    fn supports_option(&self, key: &str) -> bool {
        key.starts_with("rec.")
    }

    async fn open_session(
        &self,
        options: &ConnectionOptions,
    ) -> DriverResult<Box<dyn BackendSession>> {
        if options.target == "rec://unreachable" {
            return Err(DriverError::connection("host is unreachable"));
        }
        record(&self.log, "open");
        Ok(Box::new(RecordingSession {
            log: self.log.clone(),
            closed: false,
        }))
    }
}

struct RecordingSession {
    log: CallLog,
    closed: bool,
}

impl RecordingSession {
    fn cursor(&self, rows: Vec<Row>) -> Box<dyn BackendCursor> {
        Box::new(RecordingCursor {
            columns: value_columns(),
            rows: rows.into(),
            log: self.log.clone(),
            closed: false,
        })
    }
}

#[async_trait]
impl BackendSession for RecordingSession {
    async fn execute_query(
        &mut self,
        query: &str,
        parameters: Option<Vec<Row>>,
    ) -> DriverResult<Box<dyn BackendCursor>> {
        let call = match &parameters {
            Some(parameters) => format!("query {query} ({} params)", parameters.len()),
            None => format!("query {query}"),
        };
        record(&self.log, call);
        if query == "FAIL" {
            return Err(DriverError::execution("syntax error"));
        }
        let rows = parameters
            .unwrap_or_else(|| (1..=5).map(|v| vec![SqlValue::Integer(v)]).collect());
        Ok(self.cursor(rows))
    }

    async fn plan_partitions(&mut self, query: &str) -> DriverResult<PartitionedQuery> {
        record(&self.log, format!("plan {query}"));
        let partitions = (0..2u8)
            .map(|i| PartitionDescriptor::new(Some(format!("part-{i}")), vec![i]))
            .collect();
        Ok(PartitionedQuery {
            columns: value_columns(),
            partitions,
        })
    }

    async fn read_partition(
        &mut self,
        partition: &PartitionDescriptor,
    ) -> DriverResult<Box<dyn BackendCursor>> {
        let index = match partition.descriptor() {
            [index] => *index,
            _ => return Err(DriverError::execution("unknown partition")),
        };
        record(&self.log, format!("read {index}"));
        let value = SqlValue::Integer(i32::from(index) * 10);
        Ok(self.cursor(vec![vec![value]]))
    }

    async fn create_table(
        &mut self,
        table: &TableDefinition,
        if_not_exists: bool,
    ) -> DriverResult<()> {
        record(
            &self.log,
            format!("create {} if_not_exists={if_not_exists}", table.name),
        );
        Ok(())
    }

    async fn execute_batch_insert(
        &mut self,
        table: &TableDefinition,
        rows: Vec<Row>,
    ) -> DriverResult<u64> {
        record(&self.log, format!("insert {} {}", table.name, rows.len()));
        Ok(rows.len() as u64)
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            record(&self.log, "close session");
        }
        Ok(())
    }
}

struct RecordingCursor {
    columns: Vec<ColumnMetadata>,
    rows: VecDeque<Row>,
    log: CallLog,
    closed: bool,
}

#[async_trait]
impl BackendCursor for RecordingCursor {
    fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    async fn fetch_next_rowset(&mut self, max_rows: usize) -> DriverResult<Vec<Row>> {
        if self.closed {
            return Err(DriverError::invalid_state("cursor is closed"));
        }
        let n = max_rows.min(self.rows.len());
        Ok(self.rows.drain(..n).collect())
    }

    fn close(&mut self) -> DriverResult<()> {
        if !self.closed {
            self.closed = true;
            record(&self.log, "close cursor");
        }
        Ok(())
    }
}

#[allow(dead_code)]
pub fn driver_with(config: DriverConfig) -> (Driver, CallLog) {
    let log = CallLog::default();
    let backend = RecordingBackend { log: log.clone() };
    let driver = Driver::new(Arc::new(backend), config).unwrap();
    (driver, log)
}

pub fn driver() -> (Driver, CallLog) {
    driver_with(DriverConfig::default())
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[allow(dead_code)]
pub fn close_count(log: &CallLog) -> usize {
    calls(log).iter().filter(|c| *c == "close cursor").count()
}

#[allow(dead_code)]
pub fn int_batch(values: Vec<i32>) -> RecordBatch {
    let field = Field::new("value", DataType::Int32, false);
    let schema = Arc::new(Schema::new(vec![field]));
    RecordBatch::try_new(schema, vec![Arc::new(Int32Array::from(values))]).unwrap()
}

/// Reads every remaining value of the single integer column of a stream.
#[allow(dead_code)]
pub async fn read_values(stream: &mut sail_adbc::ResultStream) -> Vec<i32> {
    let mut values = vec![];
    while stream.load_next_batch().await.unwrap() {
        let batch = stream.current_batch().unwrap();
        let column = batch
            .column(0)
            .as_any()
            .downcast_ref::<Int32Array>()
            .unwrap();
        values.extend(column.iter().flatten());
    }
    values
}
