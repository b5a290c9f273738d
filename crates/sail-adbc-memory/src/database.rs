use std::sync::Arc;

use dashmap::{DashMap, Entry};
use datafusion::arrow::datatypes::SchemaRef;
use datafusion::arrow::record_batch::RecordBatch;
use datafusion::common::TableReference;
use datafusion::datasource::MemTable;
use datafusion::prelude::SessionContext;
use sail_adbc::codec::rows_to_record_batch;
use sail_adbc::types::{schema_from_columns, Row, SqlValue};
use sail_adbc::{DriverError, DriverResult, TableDefinition};

use crate::error::execution_error;

/// Timestamps are stored as UTC instants.
const STORAGE_TIME_ZONE: &str = "UTC";

struct MemoryTable {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
}

/// A named set of tables shared by every session connected to the same target.
///
/// Table names are case-insensitive, matching how unquoted identifiers
/// are resolved in queries.
pub struct MemoryDatabase {
    name: String,
    tables: DashMap<String, MemoryTable>,
}

impl MemoryDatabase {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tables: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table_names(&self) -> Vec<String> {
        let mut names = self
            .tables
            .iter()
            .map(|entry| entry.key().clone())
            .collect::<Vec<_>>();
        names.sort();
        names
    }

    pub fn create_table(&self, table: &TableDefinition, if_not_exists: bool) -> DriverResult<()> {
        let schema = schema_from_columns(&table.columns, STORAGE_TIME_ZONE)?;
        match self.tables.entry(table.name.to_lowercase()) {
            Entry::Occupied(_) => {
                if if_not_exists {
                    Ok(())
                } else {
                    Err(DriverError::execution(format!(
                        "table {} already exists",
                        table.name
                    )))
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(MemoryTable {
                    schema,
                    batches: vec![],
                });
                Ok(())
            }
        }
    }

    /// Appends rows to an existing table as a single batch.
    ///
    /// The columns of `table` are matched to the stored columns by name.
    /// Stored columns that are not provided are filled with `NULL`.
    pub fn insert(&self, table: &TableDefinition, rows: Vec<Row>) -> DriverResult<u64> {
        let mut stored = self
            .tables
            .get_mut(&table.name.to_lowercase())
            .ok_or_else(|| {
                DriverError::execution(format!("table {} does not exist", table.name))
            })?;
        if let Some(column) = table.columns.iter().find(|c| {
            stored
                .schema
                .fields()
                .iter()
                .all(|f| !f.name().eq_ignore_ascii_case(&c.name))
        }) {
            return Err(DriverError::execution(format!(
                "column {} does not exist in table {}",
                column.name, table.name
            )));
        }
        let positions = stored
            .schema
            .fields()
            .iter()
            .map(|f| {
                table
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(f.name()))
            })
            .collect::<Vec<_>>();
        let rows = rows
            .into_iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|p| match p {
                        Some(i) => row.get(*i).cloned().unwrap_or(SqlValue::Null),
                        None => SqlValue::Null,
                    })
                    .collect::<Row>()
            })
            .collect::<Vec<_>>();
        let batch = rows_to_record_batch(stored.schema.clone(), &rows)?;
        let count = batch.num_rows() as u64;
        stored.batches.push(batch);
        Ok(count)
    }

    /// Registers a snapshot of every table with a query context.
    pub fn register_tables(&self, ctx: &SessionContext) -> DriverResult<()> {
        for entry in self.tables.iter() {
            let table = MemTable::try_new(entry.schema.clone(), vec![entry.batches.clone()])
                .map_err(execution_error)?;
            ctx.register_table(TableReference::bare(entry.key().as_str()), Arc::new(table))
                .map_err(execution_error)?;
        }
        Ok(())
    }
}
