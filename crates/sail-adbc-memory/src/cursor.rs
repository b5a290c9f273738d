use std::collections::VecDeque;
use std::sync::Arc;

use datafusion::arrow::compute::cast;
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::execution::SendableRecordBatchStream;
use futures::StreamExt;
use sail_adbc::codec::record_batch_to_rows;
use sail_adbc::types::{sql_type_from_arrow, ColumnMetadata, Row, SqlType};
use sail_adbc::{BackendCursor, DriverError, DriverResult};

use crate::error::execution_error;

/// The storage type of a query result column.
/// View and dictionary encodings are unpacked to their plain layout.
fn plain_type(data_type: &DataType) -> DataType {
    match data_type {
        DataType::Utf8View => DataType::Utf8,
        DataType::BinaryView => DataType::Binary,
        DataType::Dictionary(_, value) => plain_type(value),
        other => other.clone(),
    }
}

pub(crate) fn plain_schema(schema: &Schema) -> SchemaRef {
    let fields = schema
        .fields()
        .iter()
        .map(|f| Field::new(f.name(), plain_type(f.data_type()), f.is_nullable()))
        .collect::<Vec<_>>();
    Arc::new(Schema::new(fields))
}

pub(crate) fn columns_from_result_schema(schema: &Schema) -> Vec<ColumnMetadata> {
    schema
        .fields()
        .iter()
        .map(|f| {
            let sql_type = sql_type_from_arrow(f.data_type())
                .unwrap_or_else(|_| SqlType::Other(f.data_type().to_string()));
            ColumnMetadata::new(f.name(), sql_type, f.is_nullable())
        })
        .collect()
}

/// A cursor over one or more DataFusion result streams, read in order.
pub struct MemoryCursor {
    columns: Vec<ColumnMetadata>,
    schema: SchemaRef,
    streams: VecDeque<SendableRecordBatchStream>,
    buffer: VecDeque<Row>,
    closed: bool,
}

impl MemoryCursor {
    pub(crate) fn new(schema: SchemaRef, streams: Vec<SendableRecordBatchStream>) -> Self {
        let schema = plain_schema(&schema);
        Self {
            columns: columns_from_result_schema(&schema),
            schema,
            streams: streams.into(),
            buffer: VecDeque::new(),
            closed: false,
        }
    }

    fn to_plain_batch(&self, batch: RecordBatch) -> DriverResult<RecordBatch> {
        if batch.schema_ref().fields().len() != self.schema.fields().len() {
            return Err(DriverError::execution(format!(
                "expected {} result columns, found {}",
                self.schema.fields().len(),
                batch.num_columns()
            )));
        }
        let columns = batch
            .columns()
            .iter()
            .zip(self.schema.fields())
            .map(|(column, field)| {
                if column.data_type() == field.data_type() {
                    Ok(column.clone())
                } else {
                    cast(column, field.data_type())
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RecordBatch::try_new(self.schema.clone(), columns)?)
    }
}

#[async_trait::async_trait]
impl BackendCursor for MemoryCursor {
    fn columns(&self) -> &[ColumnMetadata] {
        &self.columns
    }

    async fn fetch_next_rowset(&mut self, max_rows: usize) -> DriverResult<Vec<Row>> {
        if self.closed {
            return Err(DriverError::invalid_state("the cursor is closed"));
        }
        while self.buffer.len() < max_rows {
            let Some(stream) = self.streams.front_mut() else {
                break;
            };
            match stream.next().await {
                Some(batch) => {
                    let batch = self.to_plain_batch(batch.map_err(execution_error)?)?;
                    self.buffer.extend(record_batch_to_rows(&batch)?);
                }
                None => {
                    self.streams.pop_front();
                }
            }
        }
        let n = max_rows.min(self.buffer.len());
        Ok(self.buffer.drain(..n).collect())
    }

    fn close(&mut self) -> DriverResult<()> {
        self.closed = true;
        self.streams.clear();
        self.buffer.clear();
        Ok(())
    }
}
